// crates/market/src/types.rs
//! Domain types shared by the sync strategies, refetcher and managers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Local security code (e.g. "7203" for Toyota).
pub type StockCode = String;

/// Requested synchronization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/types/generated/")]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Incremental if the store is initialized, otherwise initial bulk load.
    Auto,
    /// Full bulk load from scratch.
    Initial,
    /// Update from the last synced trading day forward.
    Incremental,
    /// Refresh index values only.
    IndicesOnly,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Initial => "initial",
            Self::Incremental => "incremental",
            Self::IndicesOnly => "indices-only",
        };
        f.write_str(s)
    }
}

/// A listed instrument as reported by the external API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub code: StockCode,
    pub name: String,
    pub market: String,
    pub sector: Option<String>,
}

/// One daily OHLCV row for one instrument.
///
/// Prices are `None` on days the instrument did not trade. The adjustment
/// factor is 1.0 except on ex-dates of a corporate action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyQuote {
    pub code: StockCode,
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub adjustment_factor: f64,
}

/// One daily value for a market index (e.g. TOPIX).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexValue {
    pub code: String,
    pub date: NaiveDate,
    pub close: f64,
}

/// An adjustment-factor event surfaced by the store's recent-quote scan;
/// input to the [`crate::StockHistoryRefetcher`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentEvent {
    pub code: StockCode,
    pub date: NaiveDate,
    pub factor: f64,
}

/// Terminal payload of a sync job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub quotes_processed: u64,
    pub instruments_processed: u64,
    pub indices_processed: u64,
    pub api_calls: u64,
    /// Human-readable error strings for non-fatal problems along the way.
    pub errors: Vec<String>,
    /// Trading days whose quotes could not be fetched; a later run retries.
    pub failed_dates: Vec<NaiveDate>,
}

/// Terminal payload of a dataset-build job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct DatasetBuildResult {
    pub rows_written: u64,
    pub instruments_covered: u64,
    pub api_calls: u64,
    pub errors: Vec<String>,
}

/// Job data for a sync job: what was asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJobData {
    pub mode: SyncMode,
}

/// Synchronous acknowledgement returned by a manager's `start`: callers map
/// `None` from `start` itself to a conflict response, never this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct StartedJob {
    pub job_id: String,
    pub status: kabu_view_jobs::JobStatus,
}

/// Outcome of a cancel request. `success: false` covers unknown ids and
/// jobs already in a terminal state; it is not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub success: bool,
    pub message: String,
}

/// Metadata keys the sync strategies read and write through the store.
pub mod metadata_keys {
    /// Set to "true" once an initial bulk load finished.
    pub const INITIALIZED: &str = "initialized";
    /// Last trading day whose quotes were synced (ISO date).
    pub const LAST_SYNC_DATE: &str = "last_sync_date";

    /// Per-instrument refetch marker, value is the ISO date of the refetch.
    pub fn refetch(code: &str) -> String {
        format!("refetch:{code}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sync_mode_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&SyncMode::IndicesOnly).unwrap(),
            "\"indices-only\""
        );
        assert_eq!(
            serde_json::from_str::<SyncMode>("\"auto\"").unwrap(),
            SyncMode::Auto
        );
    }

    #[test]
    fn test_sync_result_serializes_camel_case() {
        let result = SyncResult {
            quotes_processed: 3,
            failed_dates: vec![NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()],
            ..SyncResult::default()
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"quotesProcessed\":3"));
        assert!(json.contains("\"failedDates\":[\"2024-03-01\"]"));
    }

    #[test]
    fn test_refetch_metadata_key() {
        assert_eq!(metadata_keys::refetch("7203"), "refetch:7203");
    }
}
