//! Batch pipeline coordination.
//!
//! One `run` call is one batch: search every provider concurrently,
//! merge the fragments, resolve mirrors, then fetch through a bounded
//! worker pool. Individual failures never abort the batch; they are
//! retried up to the ceiling and then reported as abandoned.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheError, RecordCache};
use crate::config::Settings;
use crate::download::{Artifact, DownloadManager, FetchError, MirrorAttempt, TargetKind};
use crate::mirror::MirrorResolver;
use crate::provider::enrichment::{self, EnrichmentSource};
use crate::provider::ProviderAdapter;
use crate::record::merge::RecordMerger;
use crate::record::{BookRecord, IdentityKey};
use crate::task::{DownloadTask, TaskState};

/// Errors that abort a whole batch.
///
/// Almost nothing does: provider, mirror, and task failures degrade the
/// batch instead of killing it.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No providers are configured; a batch cannot even start.
    #[error("no providers configured")]
    NoProviders,

    /// The dedup cache is unusable.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// A record whose book file landed on disk.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub key: IdentityKey,
    pub slug: String,
    pub path: PathBuf,
    /// Mirror walks it took, 1 for a first-attempt success.
    pub attempts: u32,
}

/// A record given up on, with the evidence.
#[derive(Debug, Clone)]
pub struct AbandonedRecord {
    pub key: IdentityKey,
    pub slug: String,
    /// Why the record was abandoned.
    pub reason: String,
    /// Per-mirror failures from the final walk.
    pub mirror_failures: Vec<MirrorAttempt>,
}

/// What a batch produced.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Books fetched on the first mirror walk.
    pub succeeded: Vec<RecordOutcome>,
    /// Books fetched after at least one re-enqueue.
    pub recovered: Vec<RecordOutcome>,
    /// Records given up on.
    pub abandoned: Vec<AbandonedRecord>,
    /// Records skipped because a previous batch already acquired them.
    pub skipped_cached: Vec<String>,
    /// Covers fetched (best-effort, failures only logged).
    pub covers_fetched: usize,
    /// Identity collisions kept separate by the merger.
    pub merge_conflicts: usize,
}

impl BatchReport {
    /// Records that ended in an artifact.
    #[must_use]
    pub fn acquired(&self) -> usize {
        self.succeeded.len() + self.recovered.len()
    }
}

/// Coordinates one batch end to end.
pub struct Orchestrator {
    providers: Vec<Box<dyn ProviderAdapter>>,
    merger: RecordMerger,
    resolver: MirrorResolver,
    manager: Arc<DownloadManager>,
    cache: RecordCache,
    enrichment: Option<Arc<dyn EnrichmentSource>>,
    fetch_covers: bool,
    concurrency: usize,
    retry_ceiling: u32,
}

impl Orchestrator {
    /// Wires the pipeline from settings.
    #[must_use]
    pub fn new(
        providers: Vec<Box<dyn ProviderAdapter>>,
        manager: DownloadManager,
        cache: RecordCache,
        settings: &Settings,
    ) -> Self {
        Self {
            providers,
            merger: RecordMerger::new(settings.provider_priority.clone()),
            resolver: MirrorResolver::new(settings.mirror_cooldown),
            manager: Arc::new(manager),
            cache,
            enrichment: None,
            fetch_covers: true,
            concurrency: settings.effective_concurrency().max(1),
            retry_ceiling: settings.retry_ceiling,
        }
    }

    /// Adds an optional metadata enrichment source.
    #[must_use]
    pub fn with_enrichment(mut self, source: Arc<dyn EnrichmentSource>) -> Self {
        self.enrichment = Some(source);
        self
    }

    /// Disables cover fetching; only book files are downloaded.
    #[must_use]
    pub fn without_covers(mut self) -> Self {
        self.fetch_covers = false;
        self
    }

    /// Runs one batch for `query`.
    #[instrument(skip(self), fields(concurrency = self.concurrency))]
    pub async fn run(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<BatchReport, OrchestratorError> {
        if self.providers.is_empty() {
            return Err(OrchestratorError::NoProviders);
        }

        let fragments = self.search_all(query, max_results).await;
        info!(fragments = fragments.len(), "search phase complete");

        let outcome = self.merger.merge(fragments);
        let mut report = BatchReport {
            merge_conflicts: outcome.conflicts.len(),
            ..BatchReport::default()
        };
        for conflict in &outcome.conflicts {
            warn!(
                title = %conflict.title,
                isbns = ?conflict.isbns,
                "merge conflict kept as separate records"
            );
        }

        let mut runnable: Vec<BookRecord> = Vec::new();
        for mut record in outcome.records {
            if let Some(source) = &self.enrichment {
                if enrichment::needs_enrichment(&record) {
                    enrichment::apply(source.as_ref(), &mut record).await;
                }
            }
            record.mirrors = self.resolver.resolve(std::mem::take(&mut record.mirrors));

            let key = record.identity_key();
            if self.cache.get(&key).await?.is_some() {
                debug!(key = %key, "already acquired, skipping");
                report.skipped_cached.push(record.slug());
                continue;
            }
            if record.mirrors.is_empty() {
                // Abandoned before any network call.
                let mut task = DownloadTask::new(key.clone(), TargetKind::Book);
                let _ = task.advance(TaskState::Abandoned);
                report.abandoned.push(AbandonedRecord {
                    key,
                    slug: record.slug(),
                    reason: "no usable mirrors".to_string(),
                    mirror_failures: Vec::new(),
                });
                continue;
            }
            runnable.push(record);
        }

        self.run_tasks(runnable, &mut report).await?;
        info!(
            acquired = report.acquired(),
            abandoned = report.abandoned.len(),
            skipped = report.skipped_cached.len(),
            "batch complete"
        );
        Ok(report)
    }

    /// Searches every provider concurrently and normalizes the hits.
    /// A failing provider contributes nothing but never aborts the batch.
    async fn search_all(&self, query: &str, max_results: usize) -> Vec<BookRecord> {
        let batches = join_all(self.providers.iter().map(|provider| async move {
            match provider.search(query, max_results).await {
                Ok(hits) => hits.iter().map(|hit| provider.normalize(hit)).collect(),
                Err(e) => {
                    warn!(provider = %provider.source(), error = %e, "provider search failed, continuing without it");
                    Vec::new()
                }
            }
        }))
        .await;
        batches.into_iter().flatten().collect()
    }

    /// Spawns the worker pool and folds task results into the report.
    async fn run_tasks(
        &self,
        records: Vec<BookRecord>,
        report: &mut BatchReport,
    ) -> Result<(), OrchestratorError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut table: HashMap<IdentityKey, Arc<Mutex<BookRecord>>> = HashMap::new();
        let mut tasks: Vec<DownloadTask> = Vec::new();

        for record in records {
            let key = record.identity_key();
            tasks.push(DownloadTask::new(key.clone(), TargetKind::Book));
            if self.fetch_covers && record.cover_url.is_some() {
                tasks.push(DownloadTask::new(key.clone(), TargetKind::Cover));
            }
            table.insert(key, Arc::new(Mutex::new(record)));
        }

        let handles: Vec<_> = tasks
            .into_iter()
            .filter_map(|task| {
                let record = Arc::clone(table.get(&task.record_key)?);
                let manager = Arc::clone(&self.manager);
                let semaphore = Arc::clone(&semaphore);
                let retry_ceiling = self.retry_ceiling;
                Some(tokio::spawn(run_task(
                    manager,
                    semaphore,
                    record,
                    task,
                    retry_ceiling,
                )))
            })
            .collect();

        for handle in handles {
            let (task, result) = match handle.await {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "worker panicked");
                    continue;
                }
            };
            match (task.target, result) {
                (TargetKind::Book, Ok(artifact)) => {
                    let record = {
                        let guard = table[&task.record_key].lock().await;
                        guard.clone()
                    };
                    self.cache
                        .put(&task.record_key, &record, &artifact.path)
                        .await?;
                    let outcome = RecordOutcome {
                        key: task.record_key.clone(),
                        slug: artifact.slug,
                        path: artifact.path,
                        attempts: task.attempt_count,
                    };
                    if task.attempt_count > 1 {
                        report.recovered.push(outcome);
                    } else {
                        report.succeeded.push(outcome);
                    }
                }
                (TargetKind::Book, Err(e)) => {
                    let slug = {
                        let guard = table[&task.record_key].lock().await;
                        guard.slug()
                    };
                    let mirror_failures = match e {
                        FetchError::MirrorExhausted { attempts, .. } => attempts,
                        ref other => vec![MirrorAttempt {
                            url: String::new(),
                            reason: other.to_string(),
                        }],
                    };
                    report.abandoned.push(AbandonedRecord {
                        key: task.record_key.clone(),
                        slug,
                        reason: format!(
                            "abandoned after {} mirror walk(s)",
                            task.attempt_count
                        ),
                        mirror_failures,
                    });
                }
                (TargetKind::Cover, Ok(_)) => report.covers_fetched += 1,
                (TargetKind::Cover, Err(e)) => {
                    debug!(key = %task.record_key, error = %e, "cover fetch abandoned");
                }
            }
        }
        Ok(())
    }
}

/// One task's retry loop. The pool permit is held per mirror walk, not
/// per task, so a re-enqueued task goes to the back of the line.
async fn run_task(
    manager: Arc<DownloadManager>,
    semaphore: Arc<Semaphore>,
    record: Arc<Mutex<BookRecord>>,
    mut task: DownloadTask,
    retry_ceiling: u32,
) -> (DownloadTask, Result<Artifact, FetchError>) {
    loop {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            // Pool shut down; nothing left to do.
            let _ = task.advance(TaskState::Abandoned);
            return (
                task,
                Err(FetchError::MirrorExhausted {
                    slug: String::new(),
                    attempts: Vec::new(),
                }),
            );
        };
        if let Err(e) = task.begin() {
            debug!(error = %e, "task could not start");
        }

        let result = {
            let mut guard = record.lock().await;
            manager.fetch(&mut guard, task.target).await
        };
        drop(permit);

        match result {
            Ok(artifact) => {
                let _ = task.advance(TaskState::Succeeded);
                return (task, Ok(artifact));
            }
            Err(e) => {
                let _ = task.advance(TaskState::Failed);
                if task.attempt_count <= retry_ceiling {
                    warn!(
                        key = %task.record_key,
                        attempt = task.attempt_count,
                        error = %e,
                        "mirror walk failed, re-enqueueing"
                    );
                    let _ = task.requeue();
                    continue;
                }
                let _ = task.advance(TaskState::Abandoned);
                return (task, Err(e));
            }
        }
    }
}
