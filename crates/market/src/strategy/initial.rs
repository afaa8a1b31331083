// crates/market/src/strategy/initial.rs
//! Initial bulk load: calendar, listings, full quote history, indices.

use chrono::{Duration, Utc};
use kabu_view_jobs::{JobError, ProgressTracker};
use tracing::info;

use crate::types::{metadata_keys, SyncResult};

use super::SyncEngine;

impl SyncEngine {
    pub(crate) async fn run_initial(
        &self,
        tracker: &mut ProgressTracker<'_>,
    ) -> Result<SyncResult, JobError> {
        let mut result = SyncResult::default();
        let today = Utc::now().date_naive();
        let from = today - Duration::days(self.config.history_days);
        info!(from = %from, to = %today, "starting initial sync");

        tracker.start_stage("trading-calendar", 1)?;
        result.api_calls += 1;
        let calendar = self
            .executor
            .execute(|| self.client.trading_calendar(from, today))
            .await?;
        self.store.store_trading_days(&calendar).await?;
        tracker.update_progress(Some(&format!("{} trading days", calendar.len())))?;

        tracker.start_stage("instruments", 1)?;
        result.api_calls += 1;
        let listed = self
            .executor
            .execute(|| self.client.listed_instruments())
            .await?;
        result.instruments_processed = self.store.upsert_instruments(&listed).await?;
        tracker.update_progress(Some(&format!("{} instruments", listed.len())))?;

        self.sync_daily_quotes(&calendar, tracker, &mut result).await?;

        self.sync_indices(from, today, tracker, &mut result).await?;

        tracker.start_stage("finalize", 1)?;
        self.store
            .set_metadata(metadata_keys::INITIALIZED, "true")
            .await?;
        if let Some(last) = last_synced_day(&calendar, &result) {
            self.store
                .set_metadata(metadata_keys::LAST_SYNC_DATE, &last.to_string())
                .await?;
        }
        tracker.update_progress(None)?;

        info!(
            quotes = result.quotes_processed,
            instruments = result.instruments_processed,
            indices = result.indices_processed,
            failed_dates = result.failed_dates.len(),
            "initial sync complete"
        );
        Ok(result)
    }
}

/// The day to record as last synced: the latest calendar day strictly before
/// the earliest failure, so failed days fall back inside the next
/// incremental window. With no failures, the last calendar day.
pub(crate) fn last_synced_day(
    calendar: &[chrono::NaiveDate],
    result: &SyncResult,
) -> Option<chrono::NaiveDate> {
    match result.failed_dates.iter().min() {
        None => calendar.last().copied(),
        Some(first_failed) => calendar.iter().filter(|d| *d < first_failed).max().copied(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn test_last_synced_day_without_failures() {
        let calendar = vec![d(1), d(4), d(5)];
        assert_eq!(
            last_synced_day(&calendar, &SyncResult::default()),
            Some(d(5))
        );
    }

    #[test]
    fn test_last_synced_day_stops_before_first_failure() {
        let calendar = vec![d(1), d(4), d(5), d(6)];
        let result = SyncResult {
            failed_dates: vec![d(5)],
            ..SyncResult::default()
        };
        assert_eq!(last_synced_day(&calendar, &result), Some(d(4)));
    }

    #[test]
    fn test_last_synced_day_none_when_first_day_failed() {
        let calendar = vec![d(1), d(4)];
        let result = SyncResult {
            failed_dates: vec![d(1)],
            ..SyncResult::default()
        };
        assert_eq!(last_synced_day(&calendar, &result), None);
    }
}
