//! # Per-record Operation Resolver
//!
//! Turns one [`InputRecord`] plus the run-wide operation settings into remote
//! calls and a terminal verdict for that attempt.
//!
//! ## Identity Resolution
//!
//! Update, Upsert and Delete need the primary identity of an existing row:
//!
//! 1. A record carrying `id` uses it directly, no lookup is made.
//! 2. Otherwise each key-set of the [`MatchSpec`] is tried in order. Key-sets
//!    whose columns are not all present on the record are skipped. Zero rows
//!    moves on to the next key-set, one row wins, several rows either fail the
//!    record or, with `allow_multiple_matches`, are all targeted.
//! 3. When nothing matched, Upsert creates, while Update and Delete fail with
//!    `NotFound` unless `if_exists` demotes that to a skip.
//!
//! Any remote failure, from lookup or write, goes through the
//! [`ErrorClassifier`] and comes back as [`Resolution::Retryable`] or
//! [`Resolution::Failed`]. The resolver never sleeps or retries by itself.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::error_classifier::ErrorClassifier;
use crate::error::{describe_ids, RecordError, RemoteError};
use crate::models::{InputRecord, MatchSpec, OperationKind, OutcomeKind, RecordId};
use crate::remote::{LookupQuery, OperationOptions, RemoteOperation, RemoteService};

/// Read-only settings shared by every worker of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverSettings {
    pub operation: OperationKind,
    pub match_on: MatchSpec,
    pub if_exists: bool,
    pub allow_multiple_matches: bool,
    pub options: OperationOptions,
    pub default_table: Option<String>,
}

/// Verdict of a single attempt on one record
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Terminal success (Created, Updated, Deleted or Skipped)
    Completed { kind: OutcomeKind, ids: Vec<RecordId> },
    /// Terminal failure
    Failed(RecordError),
    /// Transient failure; belongs in the retry queue
    Retryable {
        error: RecordError,
        retry_after: Option<Duration>,
    },
}

/// Diagnostic produced while resolving, routed to the matching output lane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverNote {
    Verbose(String),
    Debug(String),
    Warning(String),
}

/// Resolution plus the diagnostics gathered on the way
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverReport {
    /// Table the record resolved to, if any
    pub table: Option<String>,
    pub resolution: Resolution,
    pub notes: Vec<ResolverNote>,
}

enum Target {
    Existing(Vec<RecordId>),
    Missing,
}

#[derive(Clone)]
pub struct RecordResolver {
    remote: Arc<dyn RemoteService>,
    classifier: Arc<dyn ErrorClassifier>,
    settings: Arc<ResolverSettings>,
}

impl std::fmt::Debug for RecordResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordResolver")
            .field("classifier", &self.classifier.classifier_name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl RecordResolver {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        classifier: Arc<dyn ErrorClassifier>,
        settings: Arc<ResolverSettings>,
    ) -> Self {
        Self {
            remote,
            classifier,
            settings,
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Table `record` will be written to
    pub fn table_for(&self, record: &InputRecord) -> Option<String> {
        record
            .resolve_table(self.settings.default_table.as_deref())
            .map(str::to_string)
    }

    /// Run one attempt for `record`
    #[instrument(skip(self, record), fields(operation = %self.settings.operation))]
    pub async fn resolve(&self, record: &InputRecord) -> ResolverReport {
        let mut notes = Vec::new();
        let Some(table) = self.table_for(record) else {
            return ResolverReport {
                table: None,
                resolution: Resolution::Failed(RecordError::MissingTable),
                notes,
            };
        };

        let resolution = match self.attempt(&table, record, &mut notes).await {
            Ok(resolution) => resolution,
            Err((verb, error)) => self.classify(verb, &table, error),
        };

        ResolverReport {
            table: Some(table),
            resolution,
            notes,
        }
    }

    async fn attempt(
        &self,
        table: &str,
        record: &InputRecord,
        notes: &mut Vec<ResolverNote>,
    ) -> Result<Resolution, (&'static str, RemoteError)> {
        let operation = self.settings.operation;
        if operation == OperationKind::Create {
            return self.create(table, record).await;
        }

        let target = match record.id {
            Some(id) => {
                notes.push(ResolverNote::Debug(format!(
                    "using primary identity {id} for table {table}"
                )));
                Target::Existing(vec![id])
            }
            None => match self.locate(table, record, notes).await {
                Ok(Ok(target)) => target,
                Ok(Err(failure)) => return Ok(Resolution::Failed(failure)),
                Err(error) => return Err(("lookup", error)),
            },
        };

        match (operation, target) {
            (OperationKind::Delete, Target::Existing(ids)) => {
                for id in &ids {
                    self.execute(RemoteOperation::Delete {
                        table: table.to_string(),
                        id: *id,
                        options: self.settings.options.clone(),
                    })
                    .await?;
                }
                Ok(Resolution::Completed {
                    kind: OutcomeKind::Deleted,
                    ids,
                })
            }
            (_, Target::Existing(ids)) => {
                for id in &ids {
                    self.execute(RemoteOperation::Update {
                        table: table.to_string(),
                        id: *id,
                        fields: record.fields.clone(),
                        options: self.settings.options.clone(),
                    })
                    .await?;
                }
                Ok(Resolution::Completed {
                    kind: OutcomeKind::Updated,
                    ids,
                })
            }
            (OperationKind::Upsert, Target::Missing) => {
                notes.push(ResolverNote::Verbose(format!(
                    "no existing record in {table}, creating"
                )));
                self.create(table, record).await
            }
            (_, Target::Missing) if self.settings.if_exists => {
                notes.push(ResolverNote::Warning(format!(
                    "skipping {operation}: no existing record found in {table}"
                )));
                Ok(Resolution::Completed {
                    kind: OutcomeKind::Skipped,
                    ids: vec![],
                })
            }
            (_, Target::Missing) => {
                let failure = if self.has_usable_key(record) {
                    RecordError::NotFound {
                        table: table.to_string(),
                        operation: operation.to_string(),
                    }
                } else {
                    RecordError::NoIdentity {
                        table: table.to_string(),
                        operation: operation.to_string(),
                    }
                };
                Ok(Resolution::Failed(failure))
            }
        }
    }

    /// Walk the key-sets in order; the first one that locates rows wins
    async fn locate(
        &self,
        table: &str,
        record: &InputRecord,
        notes: &mut Vec<ResolverNote>,
    ) -> Result<Result<Target, RecordError>, RemoteError> {
        for key_set in self.settings.match_on.key_sets() {
            let Some(keys) = key_set.values_from(record) else {
                notes.push(ResolverNote::Debug(format!(
                    "key-set [{key_set}] skipped: record lacks one of its columns"
                )));
                continue;
            };

            let query = LookupQuery {
                table: table.to_string(),
                keys,
            };
            let matches = self.remote.lookup(&query).await?;
            debug!(table, key_set = %key_set, matches = matches.len(), "Lookup finished");

            match matches.len() {
                0 => continue,
                1 => {
                    notes.push(ResolverNote::Verbose(format!(
                        "matched {} in {table} on [{key_set}]",
                        matches[0]
                    )));
                    return Ok(Ok(Target::Existing(matches)));
                }
                count if self.settings.allow_multiple_matches => {
                    notes.push(ResolverNote::Warning(format!(
                        "[{key_set}] matched {count} records in {table}, applying to all: {}",
                        describe_ids(&matches)
                    )));
                    return Ok(Ok(Target::Existing(matches)));
                }
                count => {
                    return Ok(Err(RecordError::AmbiguousMatch {
                        table: table.to_string(),
                        key_set: key_set.to_string(),
                        matches: count,
                    }));
                }
            }
        }
        Ok(Ok(Target::Missing))
    }

    async fn create(
        &self,
        table: &str,
        record: &InputRecord,
    ) -> Result<Resolution, (&'static str, RemoteError)> {
        let id = self
            .execute(RemoteOperation::Create {
                table: table.to_string(),
                fields: record.fields.clone(),
                options: self.settings.options.clone(),
            })
            .await?;
        Ok(Resolution::Completed {
            kind: OutcomeKind::Created,
            ids: vec![id],
        })
    }

    async fn execute(
        &self,
        operation: RemoteOperation,
    ) -> Result<RecordId, (&'static str, RemoteError)> {
        self.remote
            .execute(&operation)
            .await
            .map_err(|error| (operation.verb(), error))
    }

    fn has_usable_key(&self, record: &InputRecord) -> bool {
        self.settings
            .match_on
            .key_sets()
            .iter()
            .any(|key_set| key_set.values_from(record).is_some())
    }

    fn classify(&self, verb: &'static str, table: &str, error: RemoteError) -> Resolution {
        let classification = self.classifier.classify_error(&error);
        debug!(
            table,
            verb,
            error_code = classification.error_code,
            retryable = classification.is_retryable,
            "Remote call failed"
        );

        let record_error = RecordError::Remote {
            operation: verb.to_string(),
            table: table.to_string(),
            category: classification.error_category,
            source: error,
        };

        if classification.is_retryable {
            Resolution::Retryable {
                error: record_error,
                retry_after: classification.retry_after,
            }
        } else {
            Resolution::Failed(record_error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::error_classifier::{ErrorCategory, StandardErrorClassifier};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use uuid::Uuid;

    /// Scripted remote: lookups answer from a fixed table, writes succeed
    /// unless `fail_with` is set.
    #[derive(Default)]
    struct ScriptedRemote {
        lookups: Vec<(Vec<String>, Vec<RecordId>)>,
        fail_with: Option<RemoteError>,
        executed: Mutex<Vec<RemoteOperation>>,
    }

    #[async_trait]
    impl RemoteService for ScriptedRemote {
        async fn execute(&self, operation: &RemoteOperation) -> Result<RecordId, RemoteError> {
            self.executed.lock().push(operation.clone());
            match &self.fail_with {
                Some(error) => Err(error.clone()),
                None => Ok(match operation {
                    RemoteOperation::Create { .. } => Uuid::new_v4(),
                    RemoteOperation::Update { id, .. } | RemoteOperation::Delete { id, .. } => *id,
                }),
            }
        }

        async fn lookup(&self, query: &LookupQuery) -> Result<Vec<RecordId>, RemoteError> {
            let columns: Vec<String> = query.keys.iter().map(|(c, _)| c.clone()).collect();
            Ok(self
                .lookups
                .iter()
                .find(|(cols, _)| *cols == columns)
                .map(|(_, ids)| ids.clone())
                .unwrap_or_default())
        }
    }

    fn resolver(
        remote: ScriptedRemote,
        settings: ResolverSettings,
    ) -> (RecordResolver, Arc<ScriptedRemote>) {
        let remote = Arc::new(remote);
        let resolver = RecordResolver::new(
            remote.clone(),
            Arc::new(StandardErrorClassifier::new()),
            Arc::new(settings),
        );
        (resolver, remote)
    }

    fn contact() -> InputRecord {
        InputRecord::for_table("contact")
            .with_field("emailaddress1", "ann@example.com")
            .with_field("firstname", "Ann")
            .with_field("lastname", "Smith")
    }

    fn match_on() -> MatchSpec {
        MatchSpec::from_columns(vec![vec!["emailaddress1"], vec!["firstname", "lastname"]])
    }

    #[tokio::test]
    async fn test_second_key_set_locates_record() {
        let existing = Uuid::new_v4();
        let (resolver, remote) = resolver(
            ScriptedRemote {
                lookups: vec![(
                    vec!["firstname".into(), "lastname".into()],
                    vec![existing],
                )],
                ..Default::default()
            },
            ResolverSettings {
                operation: OperationKind::Update,
                match_on: match_on(),
                ..Default::default()
            },
        );

        let report = resolver.resolve(&contact()).await;
        assert_eq!(
            report.resolution,
            Resolution::Completed {
                kind: OutcomeKind::Updated,
                ids: vec![existing]
            }
        );
        assert!(matches!(
            remote.executed.lock()[0],
            RemoteOperation::Update { id, .. } if id == existing
        ));
    }

    #[tokio::test]
    async fn test_ambiguous_match_fails_without_write() {
        let (resolver, remote) = resolver(
            ScriptedRemote {
                lookups: vec![(
                    vec!["emailaddress1".into()],
                    vec![Uuid::new_v4(), Uuid::new_v4()],
                )],
                ..Default::default()
            },
            ResolverSettings {
                operation: OperationKind::Upsert,
                match_on: match_on(),
                ..Default::default()
            },
        );

        let report = resolver.resolve(&contact()).await;
        match report.resolution {
            Resolution::Failed(RecordError::AmbiguousMatch { matches, .. }) => {
                assert_eq!(matches, 2)
            }
            other => panic!("unexpected resolution {other:?}"),
        }
        assert!(remote.executed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_multiple_matches_apply_to_all() {
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let (resolver, remote) = resolver(
            ScriptedRemote {
                lookups: vec![(vec!["emailaddress1".into()], ids.clone())],
                ..Default::default()
            },
            ResolverSettings {
                operation: OperationKind::Delete,
                match_on: match_on(),
                allow_multiple_matches: true,
                ..Default::default()
            },
        );

        let report = resolver.resolve(&contact()).await;
        assert_eq!(
            report.resolution,
            Resolution::Completed {
                kind: OutcomeKind::Deleted,
                ids
            }
        );
        assert_eq!(remote.executed.lock().len(), 2);
        assert!(report
            .notes
            .iter()
            .any(|n| matches!(n, ResolverNote::Warning(_))));
    }

    #[tokio::test]
    async fn test_upsert_without_match_creates() {
        let (resolver, remote) = resolver(
            ScriptedRemote::default(),
            ResolverSettings {
                operation: OperationKind::Upsert,
                match_on: match_on(),
                ..Default::default()
            },
        );

        let report = resolver.resolve(&contact()).await;
        assert!(matches!(
            report.resolution,
            Resolution::Completed {
                kind: OutcomeKind::Created,
                ..
            }
        ));
        assert!(matches!(
            remote.executed.lock()[0],
            RemoteOperation::Create { .. }
        ));
    }

    #[tokio::test]
    async fn test_delete_without_match_respects_if_exists() {
        let settings = ResolverSettings {
            operation: OperationKind::Delete,
            match_on: match_on(),
            ..Default::default()
        };

        let (strict, _) = resolver(ScriptedRemote::default(), settings.clone());
        assert!(matches!(
            strict.resolve(&contact()).await.resolution,
            Resolution::Failed(RecordError::NotFound { .. })
        ));

        let (lenient, _) = resolver(
            ScriptedRemote::default(),
            ResolverSettings {
                if_exists: true,
                ..settings
            },
        );
        assert_eq!(
            lenient.resolve(&contact()).await.resolution,
            Resolution::Completed {
                kind: OutcomeKind::Skipped,
                ids: vec![]
            }
        );
    }

    #[tokio::test]
    async fn test_update_without_identity_or_key_fails() {
        let (resolver, _) = resolver(
            ScriptedRemote::default(),
            ResolverSettings {
                operation: OperationKind::Update,
                ..Default::default()
            },
        );
        assert!(matches!(
            resolver.resolve(&contact()).await.resolution,
            Resolution::Failed(RecordError::NoIdentity { .. })
        ));
    }

    #[tokio::test]
    async fn test_primary_identity_skips_lookup() {
        let id = Uuid::new_v4();
        let (resolver, remote) = resolver(
            ScriptedRemote {
                lookups: vec![(vec!["emailaddress1".into()], vec![Uuid::new_v4()])],
                ..Default::default()
            },
            ResolverSettings {
                operation: OperationKind::Upsert,
                match_on: match_on(),
                ..Default::default()
            },
        );

        let report = resolver.resolve(&contact().with_id(id)).await;
        assert_eq!(
            report.resolution,
            Resolution::Completed {
                kind: OutcomeKind::Updated,
                ids: vec![id]
            }
        );
        assert_eq!(remote.executed.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_table_is_fatal() {
        let (resolver, _) = resolver(ScriptedRemote::default(), ResolverSettings::default());
        let report = resolver
            .resolve(&InputRecord::new().with_field("name", "x"))
            .await;
        assert_eq!(report.resolution, Resolution::Failed(RecordError::MissingTable));
    }

    #[tokio::test]
    async fn test_remote_errors_are_classified() {
        let (resolver, _) = resolver(
            ScriptedRemote {
                fail_with: Some(
                    RemoteError::throttled("slow down").with_retry_after(Duration::from_secs(7)),
                ),
                ..Default::default()
            },
            ResolverSettings {
                operation: OperationKind::Create,
                ..Default::default()
            },
        );

        match resolver.resolve(&contact()).await.resolution {
            Resolution::Retryable { error, retry_after } => {
                assert_eq!(error.category(), ErrorCategory::RateLimit);
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("unexpected resolution {other:?}"),
        }
    }
}
