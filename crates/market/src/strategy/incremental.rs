// crates/market/src/strategy/incremental.rs
//! Incremental update: new trading days, split reconciliation, index tail.

use chrono::{Duration, Utc};
use kabu_view_jobs::{JobError, ProgressTracker};
use tracing::info;

use crate::error::SyncError;
use crate::refetch::StockHistoryRefetcher;
use crate::types::{metadata_keys, SyncResult};

use super::initial::last_synced_day;
use super::SyncEngine;

impl SyncEngine {
    pub(crate) async fn run_incremental(
        &self,
        tracker: &mut ProgressTracker<'_>,
    ) -> Result<SyncResult, JobError> {
        let mut result = SyncResult::default();
        let today = Utc::now().date_naive();
        let last_sync = self.last_sync_date().await?;
        info!(last_sync = %last_sync, "starting incremental sync");

        tracker.start_stage("trading-calendar", 1)?;
        let calendar = self
            .trading_days(last_sync + Duration::days(1), today, &mut result)
            .await?;
        tracker.update_progress(Some(&format!("{} new trading days", calendar.len())))?;

        self.sync_daily_quotes(&calendar, tracker, &mut result).await?;

        // Reconcile corporate actions: any recent adjustment factor other
        // than 1.0 invalidates that instrument's stored history.
        tracker.start_stage("adjustment-scan", 1)?;
        let since = today - Duration::days(self.config.adjustment_scan_days);
        let events = self.store.recent_adjustments(since).await?;
        tracker.update_progress(Some(&format!("{} adjustment events", events.len())))?;

        tracker.start_stage("history-refetch", events.len() as u64)?;
        let refetcher =
            StockHistoryRefetcher::new(&*self.store, &*self.client, &self.executor);
        let summary = refetcher.refetch(&events, tracker).await?;
        result.quotes_processed += summary.quotes_processed;
        result.instruments_processed += summary.instruments_refetched;
        result.api_calls += summary.api_calls;
        result.errors.extend(summary.errors);

        let index_from = today - Duration::days(self.config.index_window_days);
        self.sync_indices(index_from, today, tracker, &mut result).await?;

        tracker.start_stage("finalize", 1)?;
        if let Some(last) = last_synced_day(&calendar, &result) {
            self.store
                .set_metadata(metadata_keys::LAST_SYNC_DATE, &last.to_string())
                .await?;
        }
        tracker.update_progress(None)?;

        info!(
            quotes = result.quotes_processed,
            refetched = summary.instruments_refetched,
            skipped = summary.skipped,
            failed_dates = result.failed_dates.len(),
            "incremental sync complete"
        );
        Ok(result)
    }

    /// Two-tier calendar lookup: the cached calendar first, the live API
    /// when the cache has nothing for the range. Days fetched live are
    /// cached for the next run.
    async fn trading_days(
        &self,
        from: chrono::NaiveDate,
        to: chrono::NaiveDate,
        result: &mut SyncResult,
    ) -> Result<Vec<chrono::NaiveDate>, JobError> {
        let cached = self.store.cached_trading_days(from, to).await?;
        if !cached.is_empty() {
            return Ok(cached);
        }
        result.api_calls += 1;
        let live = self
            .executor
            .execute(|| self.client.trading_calendar(from, to))
            .await?;
        self.store.store_trading_days(&live).await?;
        Ok(live)
    }

    /// The stored last-sync marker. The mode gate already required an
    /// initialized store, so a missing or unparseable marker means the
    /// metadata table is inconsistent with that claim.
    async fn last_sync_date(&self) -> Result<chrono::NaiveDate, SyncError> {
        self.store
            .get_metadata(metadata_keys::LAST_SYNC_DATE)
            .await?
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                SyncError::Inconsistent(
                    "last sync date missing from metadata; run mode=initial again".to_string(),
                )
            })
    }
}
