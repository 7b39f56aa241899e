//! Analysis modules.
//!
//! Metric aggregation over raw search counts.

pub mod aggregator;

pub use aggregator::*;
