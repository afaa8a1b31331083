// crates/market/src/lib.rs
//! Market-data synchronization and dataset construction for kabu-view.
//!
//! Built on the generic job engine in `kabu-view-jobs`:
//! - [`MarketSyncManager`] runs one sync job at a time against the external
//!   quotes API, picking an [`Initial`], [`Incremental`] or [`IndicesOnly`]
//!   strategy per the requested [`SyncMode`] and store state.
//! - [`DatasetJobManager`] materializes feature datasets from stored quotes
//!   on its own registry, so a build may run alongside a sync.
//!
//! The HTTP layer, relational schema and API transport plug in through the
//! [`MarketStore`] and [`QuotesApiClient`] traits.
//!
//! [`Initial`]: strategy::SelectedStrategy::Initial
//! [`Incremental`]: strategy::SelectedStrategy::Incremental
//! [`IndicesOnly`]: strategy::SelectedStrategy::IndicesOnly

pub mod client;
pub mod dataset;
pub mod error;
pub mod manager;
pub mod refetch;
pub mod store;
pub mod strategy;
pub mod types;

pub use client::QuotesApiClient;
pub use dataset::{
    DatasetBuildRequest, DatasetBuilder, DatasetConfig, DatasetJobManager, DatasetJobView,
    DatasetPreset,
};
pub use error::SyncError;
pub use manager::{MarketSyncConfig, MarketSyncManager, SyncJobView};
pub use refetch::{classify_adjustment, Adjustment, StockHistoryRefetcher};
pub use store::MarketStore;
pub use strategy::{select_strategy, SelectedStrategy, SyncConfig, SyncEngine};
pub use types::*;
