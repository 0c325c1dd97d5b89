//! Record and engine builders shared by the integration tests.

#![allow(dead_code)]

use bulkops_core::{
    BulkConfig, BulkEngine, InputRecord, OutcomeKind, OutputLane, RecordOutcome, ReportEvent,
    ReportItem,
};
use std::sync::Arc;

use super::fake_remote::FakeRemoteService;

/// Account record keyed by `name`
pub fn account(name: &str) -> InputRecord {
    InputRecord::for_table("account").with_field("name", name)
}

/// `count` accounts named `prefix-0`, `prefix-1`, ...
pub fn accounts(prefix: &str, count: usize) -> Vec<InputRecord> {
    (0..count)
        .map(|n| account(&format!("{prefix}-{n}")))
        .collect()
}

/// Contact record matched by email or by first and last name
pub fn contact(name: &str, email: &str, first: &str, last: &str) -> InputRecord {
    InputRecord::for_table("contact")
        .with_field("name", name)
        .with_field("emailaddress1", email)
        .with_field("firstname", first)
        .with_field("lastname", last)
}

/// Config with fast retries suitable for tests
pub fn test_config() -> BulkConfig {
    BulkConfig {
        chunk_size: 3,
        max_parallel: 2,
        retries: 3,
        initial_retry_delay_secs: 2.0,
        backoff_multiplier: 2.0,
        ..BulkConfig::default()
    }
}

pub fn engine(remote: &Arc<FakeRemoteService>, config: BulkConfig) -> BulkEngine {
    BulkEngine::builder()
        .config(config)
        .connection(remote.clone())
        .build()
        .expect("engine should build")
}

/// Every outcome forwarded on the results lane
pub fn results(events: &[ReportEvent]) -> Vec<RecordOutcome> {
    events
        .iter()
        .filter_map(|event| match &event.item {
            ReportItem::Result(outcome) => Some(outcome.clone()),
            _ => None,
        })
        .collect()
}

pub fn count_kind(events: &[ReportEvent], kind: OutcomeKind) -> usize {
    results(events)
        .iter()
        .filter(|outcome| outcome.kind == kind)
        .count()
}

pub fn lane_items(events: &[ReportEvent], lane: OutputLane) -> Vec<&ReportEvent> {
    events.iter().filter(|event| event.lane == lane).collect()
}
