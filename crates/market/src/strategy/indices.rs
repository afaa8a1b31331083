// crates/market/src/strategy/indices.rs
//! Indices-only refresh over a recent window.

use chrono::{Duration, Utc};
use kabu_view_jobs::{JobError, ProgressTracker};
use tracing::info;

use crate::types::SyncResult;

use super::SyncEngine;

impl SyncEngine {
    pub(crate) async fn run_indices_only(
        &self,
        tracker: &mut ProgressTracker<'_>,
    ) -> Result<SyncResult, JobError> {
        let mut result = SyncResult::default();
        let today = Utc::now().date_naive();
        let from = today - Duration::days(self.config.index_window_days);
        info!(from = %from, to = %today, "starting indices-only sync");

        self.sync_indices(from, today, tracker, &mut result).await?;

        info!(indices = result.indices_processed, "indices-only sync complete");
        Ok(result)
    }
}
