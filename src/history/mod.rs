//! Snapshot history: the append-only store and the views built on it.

pub mod import;
pub mod store;
pub mod trend;

pub use store::HistoryStore;
pub use trend::{trend_points, write_trend_csv};
