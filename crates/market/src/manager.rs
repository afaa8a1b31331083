// crates/market/src/manager.rs
//! The market-sync job manager: one registry, one runner, one engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kabu_view_jobs::{
    ExecutorConfig, Job, JobRegistry, JobRunner, JobRunnerConfig, JobStatus, Progress,
    ProgressTracker, DEFAULT_MAX_COMPLETED_JOBS,
};
use serde::Serialize;
use ts_rs::TS;

use crate::client::QuotesApiClient;
use crate::store::MarketStore;
use crate::strategy::{select_strategy, SyncConfig, SyncEngine};
use crate::types::{CancelOutcome, StartedJob, SyncJobData, SyncMode, SyncResult};

/// Everything tunable about a sync manager instance.
#[derive(Debug, Clone)]
pub struct MarketSyncConfig {
    pub runner: JobRunnerConfig,
    pub executor: ExecutorConfig,
    pub sync: SyncConfig,
    pub max_completed_jobs: usize,
}

impl Default for MarketSyncConfig {
    fn default() -> Self {
        Self {
            runner: JobRunnerConfig::default(),
            executor: ExecutorConfig::default(),
            sync: SyncConfig::default(),
            max_completed_jobs: DEFAULT_MAX_COMPLETED_JOBS,
        }
    }
}

/// Serialized job state for callers (routes, CLI). Only the data subset
/// relevant to the kind is exposed: the requested mode.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "../../web/src/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct SyncJobView {
    pub job_id: String,
    pub status: JobStatus,
    pub mode: SyncMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SyncResult>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Job<SyncJobData, Progress, SyncResult>> for SyncJobView {
    fn from(job: Job<SyncJobData, Progress, SyncResult>) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            mode: job.data.mode,
            progress: job.progress,
            result: job.result,
            started_at: job.started_at.to_rfc3339(),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
            error: job.error,
        }
    }
}

/// Starts, inspects and cancels market sync jobs. At most one sync runs at
/// a time; a dataset build on its own manager may run alongside.
///
/// Constructed explicitly and injected wherever jobs are started — there is
/// no global instance.
pub struct MarketSyncManager {
    registry: Arc<JobRegistry<SyncJobData, Progress, SyncResult>>,
    runner: JobRunner,
    engine: Arc<SyncEngine>,
}

impl MarketSyncManager {
    pub fn new(store: Arc<dyn MarketStore>, client: Arc<dyn QuotesApiClient>) -> Self {
        Self::with_config(store, client, MarketSyncConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn MarketStore>,
        client: Arc<dyn QuotesApiClient>,
        config: MarketSyncConfig,
    ) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new(config.max_completed_jobs)),
            runner: JobRunner::new(config.runner),
            engine: Arc::new(SyncEngine::new(store, client, config.executor, config.sync)),
        }
    }

    /// Start a sync job in the background.
    ///
    /// Returns `None` when a sync is already active (callers map this to a
    /// conflict response). Strategy selection runs inside the job: a mode
    /// rejected by the gate fails the job with the gate's message.
    pub fn start(&self, mode: SyncMode, timeout: Option<Duration>) -> Option<StartedJob> {
        let engine = Arc::clone(&self.engine);
        let job = self
            .runner
            .start(&self.registry, SyncJobData { mode }, timeout, move |ctx| {
                async move {
                    let initialized = engine.store.is_initialized().await?;
                    let selected = select_strategy(mode, initialized)?;
                    let sink = ctx.clone();
                    let mut tracker = ProgressTracker::new(move |p| sink.report(p));
                    engine.run(selected, &mut tracker).await
                }
            })?;
        Some(StartedJob {
            job_id: job.id,
            status: job.status,
        })
    }

    /// `None` means unknown job id (a 404 upstream).
    pub fn job_status(&self, job_id: &str) -> Option<SyncJobView> {
        self.registry.get_job(job_id).map(SyncJobView::from)
    }

    /// The non-terminal job, if any.
    pub fn active_job(&self) -> Option<SyncJobView> {
        self.registry
            .get_active_job()
            .filter(|job| !job.is_terminal())
            .map(SyncJobView::from)
    }

    /// All retained jobs, oldest first.
    pub fn jobs(&self) -> Vec<SyncJobView> {
        self.registry
            .all_jobs()
            .into_iter()
            .map(SyncJobView::from)
            .collect()
    }

    pub fn cancel(&self, job_id: &str) -> CancelOutcome {
        if self.registry.cancel_job(job_id) {
            CancelOutcome {
                success: true,
                message: "Cancellation requested".to_string(),
            }
        } else {
            CancelOutcome {
                success: false,
                message: "Job not found or already finished".to_string(),
            }
        }
    }

    pub fn job_counts(&self) -> HashMap<JobStatus, usize> {
        self.registry.job_count_by_status()
    }
}
