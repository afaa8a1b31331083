// crates/market/src/store.rs
//! The persisted-store seam.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::SyncError;
use crate::types::{AdjustmentEvent, DailyQuote, IndexValue, Instrument};

/// One feature row written by the dataset builder.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRow {
    pub code: String,
    pub date: NaiveDate,
    pub close: f64,
    /// Simple daily return against the previous close, when one exists.
    pub return_1d: Option<f64>,
    pub volume: Option<f64>,
}

/// Persisted market-data store.
///
/// Implemented by the SQLite-backed schema layer; the in-memory fakes in the
/// integration tests implement it too. All methods are transactional on the
/// implementor's side; the sync core never sees partial rows.
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// True once an initial bulk load has completed.
    async fn is_initialized(&self) -> Result<bool, SyncError>;

    async fn get_metadata(&self, key: &str) -> Result<Option<String>, SyncError>;
    async fn set_metadata(&self, key: &str, value: &str) -> Result<(), SyncError>;

    /// Upsert daily quote rows; returns the number of rows written.
    async fn upsert_quotes(&self, quotes: &[DailyQuote]) -> Result<u64, SyncError>;

    /// Upsert the instrument listing; returns the number of rows written.
    async fn upsert_instruments(&self, instruments: &[Instrument]) -> Result<u64, SyncError>;

    /// Upsert index value rows; returns the number of rows written.
    async fn upsert_index_values(&self, values: &[IndexValue]) -> Result<u64, SyncError>;

    /// Trading days cached from an earlier calendar fetch, within the
    /// inclusive range, ascending. Empty when the cache has nothing there.
    async fn cached_trading_days(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDate>, SyncError>;

    /// Cache trading days fetched from the live calendar.
    async fn store_trading_days(&self, days: &[NaiveDate]) -> Result<(), SyncError>;

    /// Quotes since `since` whose adjustment factor differs from 1.0 —
    /// candidates for a full-history refetch.
    async fn recent_adjustments(&self, since: NaiveDate)
        -> Result<Vec<AdjustmentEvent>, SyncError>;

    /// All instruments currently known to the store.
    async fn instruments(&self) -> Result<Vec<Instrument>, SyncError>;

    /// Stored quotes for one instrument within a date range, ascending.
    async fn quotes_in_range(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyQuote>, SyncError>;

    /// Write rows into a named dataset; returns the number written.
    async fn write_dataset_rows(&self, name: &str, rows: &[DatasetRow])
        -> Result<u64, SyncError>;
}
