//! Execution coordinator
//!
//! A run takes the [`RunLock`], makes sure the shared resource is live, plans the pending
//! backlog into batches and drives each batch through its driver in planned order:
//!
//! 1. Build the payload and publish it on the driver's queue, keyed by driver name
//! 2. `prepare`, `handle`, `collect`
//! 3. Fold the reported identifiers into the run's completion set
//!
//! Any failure abandons the remaining batches. Completions are written back to the store
//! after each batch ([`ReconcileMode::PerBatch`]) or once after the last batch
//! ([`ReconcileMode::EndOfRun`]). The lock is released on every exit path, the resource is
//! not: it stays live for the next run unless the run was cancelled.

use crate::batching::{Batch, BatchScheduler};
use crate::bridge::QueueBridge;
use crate::config::{Config, ReconcileMode};
use crate::db::Database;
use crate::drivers::{BatchContext, DriverRegistry, PluginReturn, ReloadOutcome};
use crate::error::{Error, Phase, PluginError, Result};
use crate::resource::{ResourceHandle, ResourceManager};
use crate::retry::with_retry;
use crate::types::{Event, RunOutcome, SkipReason, TaskStatus};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

mod run_lock;

pub use run_lock::{RunGuard, RunLock};

/// Runs pending work under the single-flight lock
pub struct ExecutionCoordinator {
    config: Arc<Config>,
    db: Arc<Database>,
    registry: Arc<DriverRegistry>,
    resource: Arc<ResourceManager>,
    bridge: Arc<dyn QueueBridge>,
    scheduler: BatchScheduler,
    lock: RunLock,
    reload_pending: AtomicBool,
    current_run: Mutex<Option<CancellationToken>>,
    event_tx: broadcast::Sender<Event>,
}

impl ExecutionCoordinator {
    /// Create a coordinator over its collaborators
    pub fn new(
        config: Arc<Config>,
        db: Arc<Database>,
        registry: Arc<DriverRegistry>,
        resource: Arc<ResourceManager>,
        bridge: Arc<dyn QueueBridge>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let scheduler = BatchScheduler::new(registry.namespace());
        Self {
            config,
            db,
            registry,
            resource,
            bridge,
            scheduler,
            lock: RunLock::new(),
            reload_pending: AtomicBool::new(false),
            current_run: Mutex::new(None),
            event_tx,
        }
    }

    /// Whether a run currently holds the lock
    pub fn is_running(&self) -> bool {
        self.lock.is_running()
    }

    /// Execute one run over the pending backlog
    ///
    /// Returns `Skipped(Locked)` immediately, without touching the store or the resource,
    /// when another run is in progress.
    pub async fn run(&self) -> RunOutcome {
        let Some(guard) = self.lock.try_acquire() else {
            tracing::debug!("Run already in progress, skipping");
            return RunOutcome::Skipped {
                reason: SkipReason::Locked,
            };
        };

        let run_id = uuid::Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        *self.current_run.lock().await = Some(token.clone());

        let outcome = tokio::select! {
            outcome = self.execute(&run_id) => outcome,
            _ = token.cancelled() => {
                tracing::warn!(run_id = %run_id, "Run cancelled, releasing shared resource");
                if let Err(e) = self.resource.release().await {
                    tracing::error!(run_id = %run_id, error = %e, "Failed to release resource after cancellation");
                }
                RunOutcome::Cancelled
            }
        };

        *self.current_run.lock().await = None;
        drop(guard);

        if let Err(e) = self.apply_pending_reload().await {
            tracing::error!(error = %e, "Deferred driver reload failed, keeping previous drivers");
        }

        match &outcome {
            RunOutcome::Completed { done_count } => {
                tracing::info!(run_id = %run_id, done_count, "Run completed")
            }
            RunOutcome::Failed { error } => {
                tracing::error!(run_id = %run_id, error = %error, "Run failed")
            }
            RunOutcome::Skipped { reason } => {
                tracing::debug!(run_id = %run_id, reason = ?reason, "Run skipped")
            }
            RunOutcome::Cancelled => tracing::info!(run_id = %run_id, "Run cancelled"),
        }
        self.emit(Event::RunFinished {
            run_id: Some(run_id),
            outcome: outcome.clone(),
        });

        outcome
    }

    /// Cancel the in-flight run, if any
    ///
    /// Returns whether a run was signalled. The run ends as `Cancelled` after releasing the
    /// run lock and the shared resource; completions already reconciled stay committed.
    pub async fn cancel_run(&self) -> bool {
        match self.current_run.lock().await.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Rebuild the driver table, or defer the rebuild until the running run ends
    pub async fn reload_drivers(&self) -> Result<ReloadOutcome> {
        self.reload_pending.store(true, Ordering::SeqCst);
        let outcome = self.apply_pending_reload().await?;
        if outcome == ReloadOutcome::Deferred {
            tracing::warn!("Run in progress, driver reload deferred until it finishes");
        }
        Ok(outcome)
    }

    /// Start the shared resource outside of a run
    pub async fn init_resource(&self) -> Result<ResourceHandle> {
        let _guard = self
            .lock
            .try_acquire()
            .ok_or_else(|| Error::Busy("a run is in progress".into()))?;
        self.resource.acquire().await
    }

    /// Tear down the shared resource; refused while a run holds the lock
    ///
    /// Returns whether anything was live.
    pub async fn dispose_resource(&self) -> Result<bool> {
        let _guard = self
            .lock
            .try_acquire()
            .ok_or_else(|| Error::Busy("a run is in progress".into()))?;
        self.resource.release().await
    }

    async fn apply_pending_reload(&self) -> Result<ReloadOutcome> {
        if !self.reload_pending.load(Ordering::SeqCst) {
            return Ok(ReloadOutcome::Applied);
        }
        let Some(_guard) = self.lock.try_acquire() else {
            // The lock holder applies it when it finishes
            return Ok(ReloadOutcome::Deferred);
        };
        if self.reload_pending.swap(false, Ordering::SeqCst) {
            let drivers = self.registry.reload().await?;
            self.emit(Event::DriversReloaded { drivers });
        }
        Ok(ReloadOutcome::Applied)
    }

    async fn execute(&self, run_id: &str) -> RunOutcome {
        let resource = match self.resource.acquire().await {
            Ok(handle) => handle,
            Err(e) => return failed(e),
        };

        let pending = match with_retry(&self.config.retry, "fetch pending tasks", || {
            self.db.pending_records()
        })
        .await
        {
            Ok(pending) => pending,
            Err(e) => return failed(e),
        };
        if pending.is_empty() {
            return RunOutcome::Skipped {
                reason: SkipReason::EmptyBacklog,
            };
        }

        let pending_count = pending.len();
        let drivers = self.registry.snapshot().await;
        let batches = self.scheduler.plan(pending, &drivers);

        tracing::info!(
            run_id,
            pending = pending_count,
            batches = batches.len(),
            reconcile = ?self.config.execution.reconcile,
            "Run started"
        );
        self.emit(Event::RunStarted {
            run_id: run_id.to_string(),
            pending: pending_count,
            batches: batches.len(),
        });

        let per_batch = self.config.execution.reconcile == ReconcileMode::PerBatch;
        let mut completed: BTreeSet<String> = BTreeSet::new();

        for batch in &batches {
            let done = match self.run_batch(run_id, &resource, batch).await {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!(
                        run_id,
                        driver = %batch.driver.name,
                        batch_size = batch.len(),
                        error = %e,
                        "Batch failed, abandoning remaining batches"
                    );
                    return failed(e);
                }
            };

            if per_batch && let Err(e) = self.reconcile(&done).await {
                return failed(e);
            }

            self.emit(Event::BatchCompleted {
                run_id: run_id.to_string(),
                driver: batch.driver.name.clone(),
                done: done.len(),
            });
            completed.extend(done);
        }

        if !per_batch {
            let done: Vec<String> = completed.iter().cloned().collect();
            if let Err(e) = self.reconcile(&done).await {
                return failed(e);
            }
        }

        RunOutcome::Completed {
            done_count: completed.len(),
        }
    }

    async fn run_batch(
        &self,
        run_id: &str,
        resource: &ResourceHandle,
        batch: &Batch,
    ) -> Result<Vec<String>> {
        let registered = &batch.driver;
        let driver = &registered.driver;

        let payload = driver
            .build_payload(&registered.template, &batch.records)
            .map_err(|e| phase_error(&registered.name, Phase::Payload, e))?;
        let serialized = serde_json::to_string(&payload)?;
        self.bridge
            .publish(
                &registered.queue_address,
                &registered.name,
                &serialized,
                self.config.execution.payload_ttl,
            )
            .await?;

        tracing::info!(
            run_id,
            driver = %registered.name,
            batch_size = batch.len(),
            download_dir = ?batch.download_dir,
            bridge = self.bridge.name(),
            "Batch dispatched"
        );
        self.emit(Event::BatchDispatched {
            run_id: run_id.to_string(),
            driver: registered.name.clone(),
            batch_size: batch.len(),
            download_dir: batch.download_dir.clone(),
        });

        let context = BatchContext {
            run_id: run_id.to_string(),
            queue_key: registered.name.clone(),
            queue_address: registered.queue_address.clone(),
            payload,
            records: batch.records.clone(),
            download_dir: batch.download_dir.clone(),
            settings: registered.settings.clone(),
        };

        driver
            .prepare(resource, &context, &self.config)
            .await
            .map_err(|e| phase_error(&registered.name, Phase::Prepare, e))?;
        driver
            .handle()
            .await
            .map_err(|e| phase_error(&registered.name, Phase::Handle, e))?;
        let report = driver
            .collect()
            .await
            .map_err(|e| phase_error(&registered.name, Phase::Collect, e))?;

        let snapshot = match driver.plugin_return() {
            Some(value) => value,
            None => serde_json::to_value(&report)?,
        };
        registered.record_report(snapshot);

        let done = completion_keys(batch, &report);
        tracing::debug!(
            run_id,
            driver = %registered.name,
            reported = report.done_tasks.len(),
            done = done.len(),
            "Batch collected"
        );
        Ok(done)
    }

    async fn reconcile(&self, identifiers: &[String]) -> Result<u64> {
        if identifiers.is_empty() {
            return Ok(0);
        }
        with_retry(&self.config.retry, "mark tasks done", || {
            self.db
                .mark_status_where_identifier_in(TaskStatus::Done, identifiers)
        })
        .await
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }
}

/// Identifiers a batch contributes to the completion set
///
/// A mergeable driver's report is taken as is. For a single-record batch only the
/// record's own key counts, and only when the report names its uid or content, so a
/// report cannot complete records outside the batch.
fn completion_keys(batch: &Batch, report: &PluginReturn) -> Vec<String> {
    if batch.driver.can_merge_batch {
        return report.done_tasks.clone();
    }
    batch
        .records
        .iter()
        .filter(|record| {
            report.done_tasks.iter().any(|id| {
                record.uid.as_deref() == Some(id.as_str()) || *id == record.content
            })
        })
        .map(|record| record.completion_key().to_string())
        .collect()
}

fn phase_error(driver: &str, phase: Phase, e: Error) -> Error {
    match e {
        Error::Plugin(_) => e,
        other => Error::Plugin(PluginError::new(driver, phase, other.to_string())),
    }
}

fn failed(e: Error) -> RunOutcome {
    RunOutcome::Failed {
        error: e.to_string(),
    }
}
