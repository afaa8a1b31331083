// crates/market/src/client.rs
//! The external quotes-API seam.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::SyncError;
use crate::types::{DailyQuote, IndexValue, Instrument};

/// External market-data API.
///
/// Pagination and per-call timeouts are the transport's concern; the
/// implementor returns fully assembled results. The sync core adds its own
/// coarser concurrency cap on top via the rate-limited executor.
#[async_trait]
pub trait QuotesApiClient: Send + Sync {
    /// Trading days (market open) within the inclusive range.
    async fn trading_calendar(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDate>, SyncError>;

    /// The full instrument listing.
    async fn listed_instruments(&self) -> Result<Vec<Instrument>, SyncError>;

    /// All instruments' quotes for one trading day.
    async fn daily_quotes(&self, date: NaiveDate) -> Result<Vec<DailyQuote>, SyncError>;

    /// Full adjusted price history for one instrument.
    async fn price_history(&self, code: &str) -> Result<Vec<DailyQuote>, SyncError>;

    /// Index values within the inclusive range.
    async fn index_values(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<IndexValue>, SyncError>;
}
