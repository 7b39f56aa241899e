//! Search API access: the count oracle, its request budget and the
//! query executor built on top of them.

pub mod budget;
pub mod client;
pub mod executor;

pub use budget::RateBudget;
pub use client::GitHubSearch;
pub use executor::{CountExecutor, RetryPolicy};
