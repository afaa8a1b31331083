// crates/market/src/strategy/mod.rs
//! Sync strategy selection and execution.
//!
//! Three strategies cover the sync modes: an initial bulk load, an
//! incremental update from the last synced day, and an indices-only
//! refresh. [`select_strategy`] is the gate in front of them: it maps the
//! requested [`SyncMode`] and the store's initialization state to a
//! strategy, or to a configuration error with a user-actionable message.
//!
//! Every strategy reports progress per unit of work (one trading day, one
//! instrument, one index) through the tracker, whose sink doubles as the
//! cancellation checkpoint — so cancellation lands between units and a
//! per-unit write is never torn.

mod incremental;
mod indices;
mod initial;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use kabu_view_jobs::{ExecutorConfig, JobError, ProgressTracker, RateLimitedExecutor};
use tracing::warn;

use crate::client::QuotesApiClient;
use crate::store::MarketStore;
use crate::types::{SyncMode, SyncResult};

/// Tunables for the sync strategies.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How far back the initial bulk load reaches.
    pub history_days: i64,
    /// Window for the incremental / indices-only index refresh.
    pub index_window_days: i64,
    /// How far back the incremental adjustment scan looks.
    pub adjustment_scan_days: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            history_days: 730,
            index_window_days: 30,
            adjustment_scan_days: 14,
        }
    }
}

/// Strategy chosen by the mode gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectedStrategy {
    Initial,
    Incremental,
    IndicesOnly,
}

/// The gate in front of the strategies.
///
/// `initialized` is the store's own report; modes that read existing data
/// refuse to run against an empty store with a message naming the fix.
pub fn select_strategy(
    mode: SyncMode,
    initialized: bool,
) -> Result<SelectedStrategy, JobError> {
    match mode {
        SyncMode::Initial => Ok(SelectedStrategy::Initial),
        SyncMode::IndicesOnly => {
            if initialized {
                Ok(SelectedStrategy::IndicesOnly)
            } else {
                Err(JobError::config(
                    "TOPIX data required for indices sync. Use mode=initial first.",
                ))
            }
        }
        SyncMode::Incremental => {
            if initialized {
                Ok(SelectedStrategy::Incremental)
            } else {
                Err(JobError::config(
                    "Database not initialized. Use mode=initial first.",
                ))
            }
        }
        SyncMode::Auto => Ok(if initialized {
            SelectedStrategy::Incremental
        } else {
            SelectedStrategy::Initial
        }),
    }
}

/// Executes a selected strategy against the store and the external API.
pub struct SyncEngine {
    pub(crate) store: Arc<dyn MarketStore>,
    pub(crate) client: Arc<dyn QuotesApiClient>,
    pub(crate) executor: RateLimitedExecutor,
    pub(crate) config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn MarketStore>,
        client: Arc<dyn QuotesApiClient>,
        executor_config: ExecutorConfig,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            client,
            executor: RateLimitedExecutor::new(executor_config),
            config,
        }
    }

    // Desugared `async fn` with an explicit `Send` bound: the runner requires
    // a `Send` job future, and rustc cannot prove auto traits through the
    // nested generic async fns here (the "implementation of `Send` is not
    // general enough" limitation).
    pub fn run<'a, 'b>(
        &'a self,
        selected: SelectedStrategy,
        tracker: &'a mut ProgressTracker<'b>,
    ) -> impl std::future::Future<Output = Result<SyncResult, JobError>> + Send + use<'a, 'b> {
        async move {
            match selected {
                SelectedStrategy::Initial => self.run_initial(tracker).await,
                SelectedStrategy::Incremental => self.run_incremental(tracker).await,
                SelectedStrategy::IndicesOnly => self.run_indices_only(tracker).await,
            }
        }
    }

    /// Fetch + upsert daily quotes one trading day at a time.
    ///
    /// A day whose fetch exhausts its retries is recorded in `failed_dates`
    /// and `errors` rather than failing the job; store errors are fatal.
    pub(crate) async fn sync_daily_quotes(
        &self,
        calendar: &[NaiveDate],
        tracker: &mut ProgressTracker<'_>,
        result: &mut SyncResult,
    ) -> Result<(), JobError> {
        tracker.start_stage("daily-quotes", calendar.len() as u64)?;
        for date in calendar {
            result.api_calls += 1;
            match self.executor.execute(|| self.client.daily_quotes(*date)).await {
                Ok(quotes) => {
                    result.quotes_processed += self.store.upsert_quotes(&quotes).await?;
                }
                Err(err) => {
                    warn!(date = %date, error = %err, "daily quotes fetch failed");
                    result.errors.push(format!("quotes for {date}: {err}"));
                    result.failed_dates.push(*date);
                }
            }
            tracker.update_progress(Some(&date.to_string()))?;
        }
        Ok(())
    }

    /// Fetch index values for the range and upsert them one index at a time.
    pub(crate) async fn sync_indices(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        tracker: &mut ProgressTracker<'_>,
        result: &mut SyncResult,
    ) -> Result<(), JobError> {
        result.api_calls += 1;
        let values = self
            .executor
            .execute(|| self.client.index_values(from, to))
            .await?;

        // Group so progress counts whole indices, not individual rows.
        let mut by_code = BTreeMap::new();
        for value in values {
            by_code
                .entry(value.code.clone())
                .or_insert_with(Vec::new)
                .push(value);
        }

        tracker.start_stage("indices", by_code.len() as u64)?;
        for (code, values) in by_code {
            self.store.upsert_index_values(&values).await?;
            result.indices_processed += 1;
            tracker.update_progress(Some(&code))?;
        }
        Ok(())
    }
}
