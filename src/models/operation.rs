use serde::{Deserialize, Serialize};
use std::fmt;

/// What the engine does with each input record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Always insert a new row
    Create,
    /// Modify an existing row; a missing row is an error unless IfExists is set
    Update,
    /// Modify the matched row or insert when nothing matches
    #[default]
    Upsert,
    /// Remove the matched row
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Upsert => write!(f, "upsert"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}
