//! # Bulk Engine
//!
//! Entry point of the crate. A [`BulkEngine`] is built once from a
//! [`BulkConfig`] and a remote connection, and can then start any number of
//! independent runs.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bulkops_core::config::BulkConfig;
//! use bulkops_core::engine::BulkEngine;
//! use bulkops_core::models::InputRecord;
//! use bulkops_core::remote::RemoteService;
//!
//! # async fn example(connection: Arc<dyn RemoteService>) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = BulkEngine::builder()
//!     .config(BulkConfig::default())
//!     .connection(connection)
//!     .build()?;
//!
//! let records = (0..250).map(|n| InputRecord::for_table("account").with_field("accountnumber", n as i64));
//! let mut run = engine.start(records)?;
//! while let Some(event) = run.next_event().await {
//!     println!("[{}] worker {} #{}", event.lane, event.worker_id, event.sequence);
//! }
//! let summary = run.join().await?;
//! println!("run {}: {} failed", summary.status, summary.outcomes.failed);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BulkConfig;
use crate::error::{BulkError, BulkResult};
use crate::execution::completion::RunSummary;
use crate::execution::dispatcher::{Dispatcher, DispatcherSettings};
use crate::execution::multiplexer::ReportEvent;
use crate::models::InputRecord;
use crate::orchestration::chunk_partitioner::ChunkPartitioner;
use crate::orchestration::error_classifier::{ErrorClassifier, StandardErrorClassifier};
use crate::orchestration::record_resolver::{RecordResolver, ResolverSettings};
use crate::orchestration::retry_queue::RetryQueue;
use crate::remote::{ConnectionResolver, RemoteService};

/// Builder for [`BulkEngine`]
#[derive(Default)]
pub struct BulkEngineBuilder {
    config: Option<BulkConfig>,
    connection: Option<Arc<dyn RemoteService>>,
    connection_resolver: Option<Arc<dyn ConnectionResolver>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
}

impl BulkEngineBuilder {
    pub fn config(mut self, config: BulkConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Connection used for every remote call; takes precedence over a resolver
    pub fn connection(mut self, connection: Arc<dyn RemoteService>) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Consulted once in [`build`](Self::build) when no connection was injected
    pub fn connection_resolver(mut self, resolver: Arc<dyn ConnectionResolver>) -> Self {
        self.connection_resolver = Some(resolver);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn build(self) -> BulkResult<BulkEngine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let connection = match (self.connection, self.connection_resolver) {
            (Some(connection), _) => connection,
            (None, Some(resolver)) => resolver.default_connection()?,
            (None, None) => {
                return Err(BulkError::Configuration(
                    "no remote connection: inject one or provide a connection resolver"
                        .to_string(),
                ))
            }
        };

        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(StandardErrorClassifier::new()));

        Ok(BulkEngine {
            config: Arc::new(config),
            connection,
            classifier,
        })
    }
}

/// Configured engine; cheap to clone and share
#[derive(Clone)]
pub struct BulkEngine {
    config: Arc<BulkConfig>,
    connection: Arc<dyn RemoteService>,
    classifier: Arc<dyn ErrorClassifier>,
}

impl std::fmt::Debug for BulkEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkEngine")
            .field("config", &self.config)
            .field("classifier", &self.classifier.classifier_name())
            .finish()
    }
}

impl BulkEngine {
    pub fn builder() -> BulkEngineBuilder {
        BulkEngineBuilder::default()
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    /// Start a run over `records`. Must be called within a Tokio runtime.
    pub fn start<I>(&self, records: I) -> BulkResult<BulkRun>
    where
        I: IntoIterator<Item = InputRecord>,
        I::IntoIter: Send + 'static,
    {
        self.start_with_cancellation(records, CancellationToken::new())
    }

    /// Start a run that stops when `cancel` fires
    pub fn start_with_cancellation<I>(
        &self,
        records: I,
        cancel: CancellationToken,
    ) -> BulkResult<BulkRun>
    where
        I: IntoIterator<Item = InputRecord>,
        I::IntoIter: Send + 'static,
    {
        let config = &self.config;
        let partitioner = ChunkPartitioner::new(records.into_iter(), config.chunk_size)?;

        let resolver = RecordResolver::new(
            Arc::clone(&self.connection),
            Arc::clone(&self.classifier),
            Arc::new(ResolverSettings {
                operation: config.operation,
                match_on: config.match_on.clone(),
                if_exists: config.if_exists,
                allow_multiple_matches: config.allow_multiple_matches,
                options: config.operation_options(),
                default_table: config.default_table.clone(),
            }),
        );
        let retry_queue = Arc::new(RetryQueue::new(config.retry_policy()));
        let dispatcher = Dispatcher::new(
            DispatcherSettings {
                max_parallel: config.max_parallel,
                poll_interval: config.poll_interval(),
                cancellation_grace_period: config.cancellation_grace_period(),
            },
            resolver,
            retry_queue,
            cancel.clone(),
        );

        info!(
            operation = %config.operation,
            chunk_size = config.chunk_size,
            max_parallel = config.max_parallel,
            retries = config.retries,
            "Starting bulk run"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(dispatcher.run(partitioner, events_tx));

        Ok(BulkRun {
            events: events_rx,
            handle,
            cancel,
        })
    }

    /// Run to completion, collecting every forwarded event
    pub async fn run<I>(&self, records: I) -> BulkResult<(Vec<ReportEvent>, RunSummary)>
    where
        I: IntoIterator<Item = InputRecord>,
        I::IntoIter: Send + 'static,
    {
        self.start(records)?.collect().await
    }
}

/// Handle to a run in progress
#[derive(Debug)]
pub struct BulkRun {
    events: mpsc::UnboundedReceiver<ReportEvent>,
    handle: JoinHandle<BulkResult<RunSummary>>,
    cancel: CancellationToken,
}

impl BulkRun {
    /// Next forwarded item; `None` once the run has finished and drained
    pub async fn next_event(&mut self) -> Option<ReportEvent> {
        self.events.recv().await
    }

    /// Request cancellation; in-flight work gets the configured grace period
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to finish. Unread events are discarded.
    pub async fn join(self) -> BulkResult<RunSummary> {
        drop(self.events);
        self.handle
            .await
            .map_err(|error| BulkError::Internal(format!("run task failed: {error}")))?
    }

    /// Read every event, then wait for the summary
    pub async fn collect(mut self) -> BulkResult<(Vec<ReportEvent>, RunSummary)> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let summary = self.join().await?;
        Ok((events, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::models::RecordId;
    use crate::remote::{LookupQuery, RemoteOperation, StaticConnectionResolver};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct AlwaysOk;

    #[async_trait]
    impl RemoteService for AlwaysOk {
        async fn execute(&self, _operation: &RemoteOperation) -> Result<RecordId, RemoteError> {
            Ok(Uuid::new_v4())
        }

        async fn lookup(&self, _query: &LookupQuery) -> Result<Vec<RecordId>, RemoteError> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_build_requires_a_connection() {
        let err = BulkEngine::builder().build().unwrap_err();
        assert!(matches!(err, BulkError::Configuration(_)));
    }

    #[test]
    fn test_build_uses_connection_resolver() {
        let engine = BulkEngine::builder()
            .connection_resolver(Arc::new(StaticConnectionResolver::new(Arc::new(AlwaysOk))))
            .build();
        assert!(engine.is_ok());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let err = BulkEngine::builder()
            .config(BulkConfig {
                max_parallel: 0,
                ..BulkConfig::default()
            })
            .connection(Arc::new(AlwaysOk))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max_parallel"));
    }

    #[tokio::test]
    async fn test_empty_source_succeeds_with_nothing_dispatched() {
        let engine = BulkEngine::builder()
            .connection(Arc::new(AlwaysOk))
            .build()
            .unwrap();
        let (events, summary) = engine.run(Vec::new()).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(summary.chunks_dispatched, 0);
        assert!(summary.is_success());
    }
}
