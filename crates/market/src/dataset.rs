// crates/market/src/dataset.rs
//! Dataset construction from stored quotes.
//!
//! A dataset build materializes per-instrument feature rows into a named
//! table via the store, without touching the external API. Builds run on
//! their own registry, so one may proceed while a market sync is active;
//! the store's transactional discipline keeps the shared tables safe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kabu_view_jobs::{
    Job, JobError, JobRegistry, JobRunner, JobRunnerConfig, JobStatus, Progress,
    ProgressTracker, DEFAULT_MAX_COMPLETED_JOBS,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use ts_rs::TS;

use crate::store::{DatasetRow, MarketStore};
use crate::types::{CancelOutcome, DatasetBuildResult, StartedJob};

/// Preset determining which instruments a dataset covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/types/generated/")]
#[serde(rename_all = "kebab-case")]
pub enum DatasetPreset {
    /// Every instrument with stored quotes.
    DailyFeatures,
    /// Instruments whose average daily volume clears the liquidity floor.
    LiquidUniverse,
}

/// Job data for a dataset build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetBuildRequest {
    pub name: String,
    pub preset: DatasetPreset,
}

#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Quote window feeding the feature rows.
    pub window_days: i64,
    /// Liquidity floor for [`DatasetPreset::LiquidUniverse`].
    pub min_avg_volume: f64,
    pub runner: JobRunnerConfig,
    pub max_completed_jobs: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            window_days: 365,
            min_avg_volume: 100_000.0,
            runner: JobRunnerConfig::default(),
            max_completed_jobs: DEFAULT_MAX_COMPLETED_JOBS,
        }
    }
}

/// Builds feature rows for one dataset request.
pub struct DatasetBuilder {
    store: Arc<dyn MarketStore>,
    window_days: i64,
    min_avg_volume: f64,
}

impl DatasetBuilder {
    pub fn new(store: Arc<dyn MarketStore>, config: &DatasetConfig) -> Self {
        Self {
            store,
            window_days: config.window_days,
            min_avg_volume: config.min_avg_volume,
        }
    }

    /// Materialize the dataset, one instrument per unit of progress.
    pub async fn build(
        &self,
        request: &DatasetBuildRequest,
        tracker: &mut ProgressTracker<'_>,
    ) -> Result<DatasetBuildResult, JobError> {
        let today = Utc::now().date_naive();
        let from = today - chrono::Duration::days(self.window_days);

        let instruments = self.store.instruments().await?;
        if instruments.is_empty() {
            return Err(JobError::config(
                "No instruments in store. Use mode=initial first.",
            ));
        }

        info!(
            dataset = %request.name,
            preset = ?request.preset,
            instruments = instruments.len(),
            "starting dataset build"
        );

        let mut result = DatasetBuildResult::default();
        tracker.start_stage("dataset-rows", instruments.len() as u64)?;
        for instrument in &instruments {
            let quotes = self
                .store
                .quotes_in_range(&instrument.code, from, today)
                .await?;
            let include = match request.preset {
                DatasetPreset::DailyFeatures => true,
                DatasetPreset::LiquidUniverse => avg_volume(&quotes) >= self.min_avg_volume,
            };
            if include {
                let rows = feature_rows(&quotes);
                if !rows.is_empty() {
                    result.rows_written +=
                        self.store.write_dataset_rows(&request.name, &rows).await?;
                    result.instruments_covered += 1;
                }
            }
            tracker.update_progress(Some(&instrument.code))?;
        }

        info!(
            dataset = %request.name,
            rows = result.rows_written,
            covered = result.instruments_covered,
            "dataset build complete"
        );
        Ok(result)
    }
}

/// Feature rows from one instrument's quote window: close, volume and the
/// simple daily return against the previous traded close. Non-traded days
/// are dropped.
fn feature_rows(quotes: &[crate::types::DailyQuote]) -> Vec<DatasetRow> {
    let mut rows = Vec::new();
    let mut prev_close: Option<f64> = None;
    for quote in quotes {
        let Some(close) = quote.close else {
            continue;
        };
        rows.push(DatasetRow {
            code: quote.code.clone(),
            date: quote.date,
            close,
            return_1d: prev_close.map(|prev| close / prev - 1.0),
            volume: quote.volume,
        });
        prev_close = Some(close);
    }
    rows
}

fn avg_volume(quotes: &[crate::types::DailyQuote]) -> f64 {
    let volumes: Vec<f64> = quotes.iter().filter_map(|q| q.volume).collect();
    if volumes.is_empty() {
        return 0.0;
    }
    volumes.iter().sum::<f64>() / volumes.len() as f64
}

/// Serialized dataset-job state for callers.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "../../web/src/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct DatasetJobView {
    pub job_id: String,
    pub status: JobStatus,
    pub name: String,
    pub preset: DatasetPreset,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DatasetBuildResult>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Job<DatasetBuildRequest, Progress, DatasetBuildResult>> for DatasetJobView {
    fn from(job: Job<DatasetBuildRequest, Progress, DatasetBuildResult>) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            name: job.data.name,
            preset: job.data.preset,
            progress: job.progress,
            result: job.result,
            started_at: job.started_at.to_rfc3339(),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
            error: job.error,
        }
    }
}

/// Starts, inspects and cancels dataset-build jobs on a registry of their
/// own kind.
pub struct DatasetJobManager {
    registry: Arc<JobRegistry<DatasetBuildRequest, Progress, DatasetBuildResult>>,
    runner: JobRunner,
    builder: Arc<DatasetBuilder>,
}

impl DatasetJobManager {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self::with_config(store, DatasetConfig::default())
    }

    pub fn with_config(store: Arc<dyn MarketStore>, config: DatasetConfig) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new(config.max_completed_jobs)),
            runner: JobRunner::new(config.runner.clone()),
            builder: Arc::new(DatasetBuilder::new(store, &config)),
        }
    }

    /// Start a build in the background; `None` when one is already active.
    pub fn start(
        &self,
        request: DatasetBuildRequest,
        timeout: Option<Duration>,
    ) -> Option<StartedJob> {
        let builder = Arc::clone(&self.builder);
        let body_request = request.clone();
        let job = self
            .runner
            .start(&self.registry, request, timeout, move |ctx| async move {
                let sink = ctx.clone();
                let mut tracker = ProgressTracker::new(move |p| sink.report(p));
                builder.build(&body_request, &mut tracker).await
            })?;
        Some(StartedJob {
            job_id: job.id,
            status: job.status,
        })
    }

    pub fn job_status(&self, job_id: &str) -> Option<DatasetJobView> {
        self.registry.get_job(job_id).map(DatasetJobView::from)
    }

    pub fn active_job(&self) -> Option<DatasetJobView> {
        self.registry
            .get_active_job()
            .filter(|job| !job.is_terminal())
            .map(DatasetJobView::from)
    }

    pub fn jobs(&self) -> Vec<DatasetJobView> {
        self.registry
            .all_jobs()
            .into_iter()
            .map(DatasetJobView::from)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DailyQuote;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn quote(day: u32, close: Option<f64>, volume: Option<f64>) -> DailyQuote {
        DailyQuote {
            code: "7203".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume,
            adjustment_factor: 1.0,
        }
    }

    #[test]
    fn test_feature_rows_skip_non_traded_days() {
        let quotes = vec![
            quote(1, Some(100.0), Some(1000.0)),
            quote(4, None, None),
            quote(5, Some(110.0), Some(1200.0)),
        ];
        let rows = feature_rows(&quotes);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].return_1d, None);
        // Return bridges the non-traded day: 110 against 100.
        assert!((rows[1].return_1d.unwrap() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_avg_volume_ignores_missing() {
        let quotes = vec![
            quote(1, Some(100.0), Some(1000.0)),
            quote(4, None, None),
            quote(5, Some(110.0), Some(3000.0)),
        ];
        assert_eq!(avg_volume(&quotes), 2000.0);
        assert_eq!(avg_volume(&[]), 0.0);
    }

    #[test]
    fn test_preset_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&DatasetPreset::LiquidUniverse).unwrap(),
            "\"liquid-universe\""
        );
    }
}
