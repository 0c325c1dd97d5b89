//! Alternate-key matching configuration.
//!
//! A [`MatchSpec`] is an ordered list of [`KeySet`]s. The resolver evaluates
//! them first-to-last and uses the first key-set that locates exactly one
//! existing record.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::record::{FieldValue, InputRecord};

/// One candidate alternate key: a set of column names matched together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeySet(Vec<String>);

impl KeySet {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(columns.into_iter().map(Into::into).collect())
    }

    pub fn columns(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Column/value pairs drawn from `record`, or `None` when any column is absent
    pub fn values_from(&self, record: &InputRecord) -> Option<Vec<(String, FieldValue)>> {
        self.0
            .iter()
            .map(|column| record.get(column).map(|v| (column.clone(), v.clone())))
            .collect()
    }
}

impl fmt::Display for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(", "))
    }
}

/// Ordered list of alternate keys used to locate existing records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchSpec(Vec<KeySet>);

impl MatchSpec {
    pub fn new(key_sets: Vec<KeySet>) -> Self {
        Self(key_sets)
    }

    /// Convenience constructor from nested column lists
    pub fn from_columns<I, K, S>(key_sets: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(key_sets.into_iter().map(KeySet::new).collect())
    }

    pub fn key_sets(&self) -> &[KeySet] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
