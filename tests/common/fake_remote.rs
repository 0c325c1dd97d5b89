//! In-memory stand-in for the remote tabular service.
//!
//! Rows live in a `DashMap`. Failures, delays and panics are scripted per
//! record key, which is the record's `name` field (or, for writes addressed
//! by id, the stored row's `name`).

#![allow(dead_code)]

use async_trait::async_trait;
use bulkops_core::{
    FieldValue, LookupQuery, RecordId, RemoteError, RemoteErrorKind, RemoteOperation,
    RemoteService,
};
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub table: String,
    pub fields: IndexMap<String, FieldValue>,
}

#[derive(Default)]
pub struct FakeRemoteService {
    rows: DashMap<RecordId, StoredRow>,
    scripted: DashMap<String, VecDeque<RemoteError>>,
    always_fail: DashMap<String, RemoteError>,
    delays: DashMap<String, Duration>,
    panics: DashMap<String, ()>,
    attempts: DashMap<String, Vec<Instant>>,
    executed: Mutex<Vec<RemoteOperation>>,
    lookups: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeRemoteService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing row and return its identity
    pub fn insert(&self, table: &str, fields: &[(&str, &str)]) -> RecordId {
        let id = Uuid::new_v4();
        self.rows.insert(
            id,
            StoredRow {
                table: table.to_string(),
                fields: fields
                    .iter()
                    .map(|(name, value)| (name.to_string(), FieldValue::from(*value)))
                    .collect(),
            },
        );
        id
    }

    /// Fail the next writes for `key` with `errors`, in order
    pub fn fail_next(&self, key: &str, errors: Vec<RemoteError>) {
        self.scripted
            .entry(key.to_string())
            .or_default()
            .extend(errors);
    }

    /// Fail every write for `key`
    pub fn fail_always(&self, key: &str, error: RemoteError) {
        self.always_fail.insert(key.to_string(), error);
    }

    /// Sleep for `delay` inside every write for `key`
    pub fn delay(&self, key: &str, delay: Duration) {
        self.delays.insert(key.to_string(), delay);
    }

    /// Delay every write that has no more specific delay
    pub fn delay_all(&self, delay: Duration) {
        self.delays.insert(String::new(), delay);
    }

    /// Panic inside the write for `key`
    pub fn panic_on(&self, key: &str) {
        self.panics.insert(key.to_string(), ());
    }

    pub fn row(&self, id: &RecordId) -> Option<StoredRow> {
        self.rows.get(id).map(|row| row.clone())
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows.iter().filter(|row| row.table == table).count()
    }

    /// Instants at which writes for `key` started
    pub fn attempts(&self, key: &str) -> Vec<Instant> {
        self.attempts
            .get(key)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    pub fn executed(&self) -> Vec<RemoteOperation> {
        self.executed.lock().clone()
    }

    pub fn write_count(&self) -> usize {
        self.executed.lock().len()
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Highest number of writes observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn key_for(&self, operation: &RemoteOperation) -> String {
        let fields = match operation {
            RemoteOperation::Create { fields, .. } | RemoteOperation::Update { fields, .. } => {
                Some(fields)
            }
            RemoteOperation::Delete { .. } => None,
        };
        if let Some(FieldValue::Text(name)) = fields.and_then(|f| f.get("name")) {
            return name.clone();
        }

        let id = match operation {
            RemoteOperation::Update { id, .. } | RemoteOperation::Delete { id, .. } => Some(*id),
            RemoteOperation::Create { .. } => None,
        };
        id.and_then(|id| {
            self.rows.get(&id).and_then(|row| match row.fields.get("name") {
                Some(FieldValue::Text(name)) => Some(name.clone()),
                _ => None,
            })
        })
        .unwrap_or_default()
    }

    fn scripted_failure(&self, key: &str) -> Option<RemoteError> {
        if let Some(error) = self.always_fail.get(key) {
            return Some(error.clone());
        }
        self.scripted
            .get_mut(key)
            .and_then(|mut queue| queue.pop_front())
    }

    fn apply(&self, operation: &RemoteOperation) -> Result<RecordId, RemoteError> {
        match operation {
            RemoteOperation::Create { table, fields, .. } => {
                let id = Uuid::new_v4();
                self.rows.insert(
                    id,
                    StoredRow {
                        table: table.clone(),
                        fields: fields.clone(),
                    },
                );
                Ok(id)
            }
            RemoteOperation::Update { id, fields, .. } => {
                let mut row = self
                    .rows
                    .get_mut(id)
                    .ok_or_else(|| RemoteError::new(RemoteErrorKind::NotFound, id.to_string()))?;
                for (name, value) in fields {
                    row.fields.insert(name.clone(), value.clone());
                }
                Ok(*id)
            }
            RemoteOperation::Delete { id, .. } => self
                .rows
                .remove(id)
                .map(|(id, _)| id)
                .ok_or_else(|| RemoteError::new(RemoteErrorKind::NotFound, id.to_string())),
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteService for FakeRemoteService {
    async fn execute(&self, operation: &RemoteOperation) -> Result<RecordId, RemoteError> {
        let key = self.key_for(operation);
        self.attempts
            .entry(key.clone())
            .or_default()
            .push(Instant::now());
        self.executed.lock().push(operation.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = self
            .delays
            .get(&key)
            .or_else(|| self.delays.get(""))
            .map(|entry| *entry);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.panics.contains_key(&key) {
            panic!("remote fault injected for {key}");
        }

        match self.scripted_failure(&key) {
            Some(error) => Err(error),
            None => self.apply(operation),
        }
    }

    async fn lookup(&self, query: &LookupQuery) -> Result<Vec<RecordId>, RemoteError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rows
            .iter()
            .filter(|row| row.table == query.table)
            .filter(|row| {
                query
                    .keys
                    .iter()
                    .all(|(column, value)| row.fields.get(column) == Some(value))
            })
            .map(|row| *row.key())
            .collect())
    }
}
