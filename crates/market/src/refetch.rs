// crates/market/src/refetch.rs
//! Full-history refetch after a detected corporate action.
//!
//! When a daily quote carries an adjustment factor other than 1.0, the
//! already-stored history for that instrument is no longer on the same
//! adjusted basis and must be re-downloaded wholesale. The refetcher does
//! that for a batch of flagged instruments, marking each one in store
//! metadata so repeated incremental runs do not re-download it for the same
//! event.

use kabu_view_jobs::{JobError, ProgressTracker, RateLimitedExecutor};
use tracing::{info, warn};

use crate::client::QuotesApiClient;
use crate::error::SyncError;
use crate::store::MarketStore;
use crate::types::{metadata_keys, AdjustmentEvent, DailyQuote};

/// Classification of an adjustment factor.
///
/// Thresholds are empirical: a factor below 0.7 reads as a forward split,
/// above 1.3 as a reverse split, anything between as a generic adjustment
/// with no split semantics implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Split { ratio: u32 },
    ReverseSplit { ratio: u32 },
    Generic,
}

pub fn classify_adjustment(factor: f64) -> Adjustment {
    if factor < 0.7 {
        Adjustment::Split {
            ratio: (1.0 / factor).round() as u32,
        }
    } else if factor > 1.3 {
        Adjustment::ReverseSplit {
            ratio: factor.round() as u32,
        }
    } else {
        Adjustment::Generic
    }
}

impl std::fmt::Display for Adjustment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Split { ratio } => write!(f, "1:{ratio} stock split"),
            Self::ReverseSplit { ratio } => write!(f, "{ratio}:1 reverse split"),
            Self::Generic => f.write_str("adjustment"),
        }
    }
}

/// What one refetch pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefetchSummary {
    pub instruments_refetched: u64,
    pub quotes_processed: u64,
    pub api_calls: u64,
    pub skipped: u64,
    pub errors: Vec<String>,
}

/// Re-downloads full price history for instruments flagged by an
/// adjustment-factor scan. Shared by the incremental sync strategy and the
/// standalone refresh path.
pub struct StockHistoryRefetcher<'a> {
    store: &'a dyn MarketStore,
    client: &'a dyn QuotesApiClient,
    executor: &'a RateLimitedExecutor,
}

impl<'a> StockHistoryRefetcher<'a> {
    pub fn new(
        store: &'a dyn MarketStore,
        client: &'a dyn QuotesApiClient,
        executor: &'a RateLimitedExecutor,
    ) -> Self {
        Self {
            store,
            client,
            executor,
        }
    }

    /// Refetch history for every event not already covered by a stored
    /// refetch marker. Progress is reported in absolute instrument counts
    /// through `set_progress`, since the caller's stage counts a different
    /// unit of work.
    ///
    /// A chunk whose fetch exhausts its retries is recorded in `errors` and
    /// left unmarked, so the next incremental run picks it up again.
    pub async fn refetch(
        &self,
        events: &[AdjustmentEvent],
        tracker: &mut ProgressTracker<'_>,
    ) -> Result<RefetchSummary, JobError> {
        let mut summary = RefetchSummary::default();

        let mut pending = Vec::new();
        for event in dedupe_latest_per_code(events) {
            if self.already_refetched(&event).await? {
                summary.skipped += 1;
                continue;
            }
            pending.push(event);
        }

        let total = pending.len() as u64;
        tracker.set_progress(0, total, None)?;

        let max_concurrent = self.executor.config().max_concurrent.max(1);
        let mut done = 0u64;
        for chunk in pending.chunks(max_concurrent) {
            let ops: Vec<_> = chunk
                .iter()
                .map(|event| {
                    let code = event.code.clone();
                    move || {
                        let code = code.clone();
                        async move { self.client.price_history(&code).await }
                    }
                })
                .collect();
            summary.api_calls += chunk.len() as u64;

            let histories: Vec<Vec<DailyQuote>> = match self.executor.execute_all(ops).await {
                Ok(histories) => histories,
                Err(err) => {
                    let codes: Vec<&str> =
                        chunk.iter().map(|e| e.code.as_str()).collect();
                    warn!(codes = ?codes, error = %err, "history refetch chunk failed");
                    summary
                        .errors
                        .push(format!("refetch failed for {}: {err}", codes.join(", ")));
                    done += chunk.len() as u64;
                    tracker.set_progress(done, total, None)?;
                    continue;
                }
            };

            for (event, history) in chunk.iter().zip(histories) {
                let kind = classify_adjustment(event.factor);
                info!(
                    code = %event.code,
                    factor = event.factor,
                    kind = %kind,
                    rows = history.len(),
                    "refetched full history"
                );
                summary.quotes_processed += self.store.upsert_quotes(&history).await?;
                self.store
                    .set_metadata(
                        &metadata_keys::refetch(&event.code),
                        &event.date.to_string(),
                    )
                    .await?;
                summary.instruments_refetched += 1;
                done += 1;
                tracker.set_progress(done, total, Some(&event.code))?;
            }
        }

        Ok(summary)
    }

    /// True when the stored marker covers this event's date.
    async fn already_refetched(&self, event: &AdjustmentEvent) -> Result<bool, SyncError> {
        let key = metadata_keys::refetch(&event.code);
        let Some(marker) = self.store.get_metadata(&key).await? else {
            return Ok(false);
        };
        // An unparseable marker is treated as absent and overwritten.
        Ok(marker
            .parse::<chrono::NaiveDate>()
            .is_ok_and(|marked| marked >= event.date))
    }
}

/// One event per code, keeping the latest by date.
fn dedupe_latest_per_code(events: &[AdjustmentEvent]) -> Vec<AdjustmentEvent> {
    let mut latest: Vec<AdjustmentEvent> = Vec::new();
    for event in events {
        match latest.iter_mut().find(|e| e.code == event.code) {
            Some(existing) if existing.date < event.date => *existing = event.clone(),
            Some(_) => {}
            None => latest.push(event.clone()),
        }
    }
    latest
}
