//! # Bulk Engine Configuration
//!
//! All tunables of a bulk run live in [`BulkConfig`]. A configuration can be
//! built in code, loaded from a YAML/TOML file, or overridden from
//! `BULKOPS__*` environment variables (see [`loader`]).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bulkops_core::config::BulkConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BulkConfig::load("config/bulkops.yaml")?;
//! println!("chunks of {} across {} workers", config.chunk_size, config.max_parallel);
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{BulkError, BulkResult};
use crate::models::{MatchSpec, OperationKind};
use crate::orchestration::backoff_calculator::RetryPolicy;
use crate::remote::{BusinessLogicKind, OperationOptions};

/// Root configuration for one bulk run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Records per chunk (unit of parallel dispatch)
    pub chunk_size: usize,

    /// Upper bound on concurrently running workers
    pub max_parallel: usize,

    /// Operation applied to every record
    pub operation: OperationKind,

    /// Table used for records that do not declare one
    pub default_table: Option<String>,

    /// Additional attempts after the first transient failure
    pub retries: u32,

    /// Delay before the first retry, in seconds
    pub initial_retry_delay_secs: f64,

    /// Growth factor applied to each subsequent retry delay
    pub backoff_multiplier: f64,

    /// Optional cap on any single retry delay, in milliseconds
    pub max_retry_delay_ms: Option<u64>,

    /// Ordered alternate keys used to locate existing records
    pub match_on: MatchSpec,

    /// Apply update/delete to every row a key-set matches instead of failing
    pub allow_multiple_matches: bool,

    /// Demote "record not found" on update/delete to a skip
    pub if_exists: bool,

    pub bypass_business_logic_execution: BTreeSet<BusinessLogicKind>,

    pub bypass_business_logic_execution_step_ids: BTreeSet<Uuid>,

    /// Upper bound on how long a worker sleeps between retry sweeps
    pub poll_interval_ms: u64,

    /// How long in-flight work may continue after cancellation
    pub cancellation_grace_period_ms: u64,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            max_parallel: 4,
            operation: OperationKind::Upsert,
            default_table: None,
            retries: 3,
            initial_retry_delay_secs: 5.0,
            backoff_multiplier: 2.0,
            max_retry_delay_ms: None,
            match_on: MatchSpec::default(),
            allow_multiple_matches: false,
            if_exists: false,
            bypass_business_logic_execution: BTreeSet::new(),
            bypass_business_logic_execution_step_ids: BTreeSet::new(),
            poll_interval_ms: 100,
            cancellation_grace_period_ms: 5_000,
        }
    }
}

impl BulkConfig {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> BulkResult<()> {
        if self.chunk_size == 0 {
            return Err(BulkError::Configuration(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if self.max_parallel == 0 {
            return Err(BulkError::Configuration(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if !self.initial_retry_delay_secs.is_finite() || self.initial_retry_delay_secs < 0.0 {
            return Err(BulkError::Configuration(format!(
                "initial_retry_delay_secs must be a non-negative number, got {}",
                self.initial_retry_delay_secs
            )));
        }
        if Duration::try_from_secs_f64(self.initial_retry_delay_secs).is_err() {
            return Err(BulkError::Configuration(format!(
                "initial_retry_delay_secs is too large, got {}",
                self.initial_retry_delay_secs
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(BulkError::Configuration(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(BulkError::Configuration(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if let Some(position) = self.match_on.key_sets().iter().position(|k| k.is_empty()) {
            return Err(BulkError::Configuration(format!(
                "match_on key-set #{} has no columns",
                position + 1
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            initial_delay: Duration::try_from_secs_f64(self.initial_retry_delay_secs)
                .unwrap_or(Duration::MAX),
            multiplier: self.backoff_multiplier,
            max_delay: self.max_retry_delay_ms.map(Duration::from_millis),
        }
    }

    pub fn operation_options(&self) -> OperationOptions {
        OperationOptions {
            bypass_business_logic_execution: self.bypass_business_logic_execution.clone(),
            bypass_business_logic_execution_step_ids: self
                .bypass_business_logic_execution_step_ids
                .clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cancellation_grace_period(&self) -> Duration {
        Duration::from_millis(self.cancellation_grace_period_ms)
    }
}
