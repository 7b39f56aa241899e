//! Data models for the PR statistics engine.
//!
//! This module contains the core data structures shared by the registry,
//! the query executor, the aggregator and the history store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A countable category of pull requests for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Every PR opened by the agent.
    Total,
    /// Non-draft PRs.
    Ready,
    /// Merged PRs.
    Merged,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Total => write!(f, "total"),
            Category::Ready => write!(f, "ready"),
            Category::Merged => write!(f, "merged"),
        }
    }
}

/// Which numerator/denominator pair defines the merge rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Methodology {
    /// merged / total
    LegacyTotalBased,
    /// merged / ready (non-draft)
    #[default]
    ReadyBased,
}

impl Methodology {
    /// The category used as the rate denominator.
    pub fn denominator(&self) -> Category {
        match self {
            Methodology::LegacyTotalBased => Category::Total,
            Methodology::ReadyBased => Category::Ready,
        }
    }

    /// Human readable definition of the rate.
    pub fn describe(&self) -> &'static str {
        match self {
            Methodology::LegacyTotalBased => "merged PRs / all PRs",
            Methodology::ReadyBased => "merged PRs / ready (non-draft) PRs",
        }
    }
}

impl fmt::Display for Methodology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Methodology::LegacyTotalBased => write!(f, "legacy_total_based"),
            Methodology::ReadyBased => write!(f, "ready_based"),
        }
    }
}

/// One opaque search query for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub category: Category,
    pub query: String,
}

/// Identity and queries of one tracked agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique key (e.g. `copilot`).
    pub key: String,
    /// Name shown in reports.
    pub display_name: String,
    /// One predicate per counting category.
    pub predicates: Vec<Predicate>,
}

impl AgentSpec {
    pub fn new(key: &str, display_name: &str) -> Self {
        Self {
            key: key.to_string(),
            display_name: display_name.to_string(),
            predicates: Vec::new(),
        }
    }

    /// Builder-style predicate registration.
    pub fn with(mut self, category: Category, query: impl Into<String>) -> Self {
        self.predicates.push(Predicate {
            category,
            query: query.into(),
        });
        self
    }

    pub fn predicate(&self, category: Category) -> Option<&Predicate> {
        self.predicates.iter().find(|p| p.category == category)
    }
}

/// Outcome of a single count query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CountOutcome {
    /// The oracle answered. `approximate` is set when it reported the
    /// figure as capped or incomplete.
    Counted { value: u64, approximate: bool },
    /// Retries were exhausted or the query was rejected.
    Failed { error: String },
}

/// Result of one count query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCount {
    pub category: Category,
    pub query: String,
    pub retrieved_at: DateTime<Utc>,
    /// Number of requests issued for this count.
    pub attempts: u32,
    #[serde(flatten)]
    pub outcome: CountOutcome,
}

impl RawCount {
    /// The counted value, or `None` when the query failed.
    pub fn value(&self) -> Option<u64> {
        match self.outcome {
            CountOutcome::Counted { value, .. } => Some(value),
            CountOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, CountOutcome::Failed { .. })
    }

    pub fn is_approximate(&self) -> bool {
        matches!(
            self.outcome,
            CountOutcome::Counted {
                approximate: true,
                ..
            }
        )
    }
}

#[cfg(test)]
impl RawCount {
    pub fn counted(category: Category, query: &str, value: u64, approximate: bool) -> Self {
        Self {
            category,
            query: query.to_string(),
            retrieved_at: Utc::now(),
            attempts: 1,
            outcome: CountOutcome::Counted { value, approximate },
        }
    }

    pub fn failed(category: Category, query: &str, error: impl Into<String>) -> Self {
        Self {
            category,
            query: query.to_string(),
            retrieved_at: Utc::now(),
            attempts: 1,
            outcome: CountOutcome::Failed {
                error: error.into(),
            },
        }
    }
}

/// Why a merge rate could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedReason {
    /// The denominator count was zero.
    ZeroDenominator,
    /// The numerator or denominator count is missing or failed.
    MissingCount,
}

/// Merge rate in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeRate {
    Percent { value: f64 },
    Undefined { reason: UndefinedReason },
}

impl MergeRate {
    pub fn percent(&self) -> Option<f64> {
        match self {
            MergeRate::Percent { value } => Some(*value),
            MergeRate::Undefined { .. } => None,
        }
    }
}

/// Whether all counts needed for the rate were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    Complete,
    Incomplete,
}

/// Metrics for one agent in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub agent_key: String,
    pub display_name: String,
    pub methodology: Methodology,
    /// Raw counts in registry order.
    pub counts: Vec<RawCount>,
    pub rate: MergeRate,
    pub completeness: Completeness,
    /// At least one count was reported as approximate.
    pub approximate: bool,
    /// The numerator exceeds the denominator; the rate is kept as computed.
    pub inconsistent: bool,
}

impl AgentMetrics {
    pub fn count(&self, category: Category) -> Option<&RawCount> {
        self.counts.iter().find(|c| c.category == category)
    }

    /// Counted value for a category, `None` if absent or failed.
    pub fn value(&self, category: Category) -> Option<u64> {
        self.count(category).and_then(RawCount::value)
    }

    pub fn is_complete(&self) -> bool {
        self.completeness == Completeness::Complete
    }

    /// True when at least one count was obtained.
    pub fn has_data(&self) -> bool {
        self.counts.iter().any(|c| !c.is_failed())
    }

    /// PR volume used for trend charts: total if available, else ready.
    pub fn volume(&self) -> Option<u64> {
        self.value(Category::Total)
            .or_else(|| self.value(Category::Ready))
    }
}

/// All agent metrics of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub run_timestamp: DateTime<Utc>,
    pub methodology: Methodology,
    /// Agent metrics in registry order.
    pub agents: Vec<AgentMetrics>,
}

impl Snapshot {
    /// True when no agent produced any count.
    pub fn is_empty_of_data(&self) -> bool {
        !self.agents.iter().any(AgentMetrics::has_data)
    }
}

#[cfg(test)]
impl Snapshot {
    pub fn agent(&self, key: &str) -> Option<&AgentMetrics> {
        self.agents.iter().find(|a| a.agent_key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_methodology_denominator() {
        assert_eq!(Methodology::LegacyTotalBased.denominator(), Category::Total);
        assert_eq!(Methodology::ReadyBased.denominator(), Category::Ready);
        assert_eq!(Methodology::default(), Methodology::ReadyBased);
    }

    #[test]
    fn test_raw_count_serialization_is_self_describing() {
        let count = RawCount::counted(Category::Merged, "is:pr+is:merged", 60, true);
        let json = serde_json::to_string(&count).unwrap();
        assert!(json.contains("\"status\":\"counted\""));
        assert!(json.contains("\"approximate\":true"));

        let failed = RawCount::failed(Category::Total, "is:pr", "HTTP 500");
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains("\"status\":\"failed\""));
        let back: RawCount = serde_json::from_str(&json).unwrap();
        assert!(back.is_failed());
        assert_eq!(back.value(), None);
    }

    #[test]
    fn test_methodology_serializes_snake_case() {
        let json = serde_json::to_string(&Methodology::LegacyTotalBased).unwrap();
        assert_eq!(json, "\"legacy_total_based\"");
    }

    #[test]
    fn test_agent_spec_builder() {
        let spec = AgentSpec::new("a", "A")
            .with(Category::Total, "q1")
            .with(Category::Merged, "q2");
        assert_eq!(spec.predicate(Category::Merged).unwrap().query, "q2");
        assert!(spec.predicate(Category::Ready).is_none());
    }
}
