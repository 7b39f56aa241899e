//! Metric aggregation.
//!
//! Turns the raw counts of one agent into an [`AgentMetrics`] record and
//! summarizes snapshots for console output.

use crate::models::{
    AgentMetrics, AgentSpec, Category, Completeness, MergeRate, Methodology, RawCount, Snapshot,
    UndefinedReason,
};

/// Compute the merge rate in percent, two decimals, halves rounded up.
///
/// Rounding is done on integers so ties like 23/160 = 14.375 % are exact.
pub fn merge_rate(merged: u64, denominator: u64) -> MergeRate {
    if denominator == 0 {
        return MergeRate::Undefined {
            reason: UndefinedReason::ZeroDenominator,
        };
    }
    let denominator = u128::from(denominator);
    let hundredths = (u128::from(merged) * 20_000 + denominator) / (2 * denominator);
    MergeRate::Percent {
        value: hundredths as f64 / 100.0,
    }
}

/// Combine one agent's raw counts into metrics.
///
/// A failed count in any category makes the record incomplete. The rate
/// is undefined when the merged count or the methodology's denominator is
/// missing or failed; other failed categories leave the rate intact.
pub fn aggregate(agent: &AgentSpec, counts: Vec<RawCount>, methodology: Methodology) -> AgentMetrics {
    let value_of = |category: Category| {
        counts
            .iter()
            .find(|c| c.category == category)
            .and_then(RawCount::value)
    };

    let numerator = value_of(Category::Merged);
    let denominator = value_of(methodology.denominator());

    let (rate, inconsistent) = match (numerator, denominator) {
        (Some(merged), Some(base)) => (merge_rate(merged, base), merged > base),
        _ => (
            MergeRate::Undefined {
                reason: UndefinedReason::MissingCount,
            },
            false,
        ),
    };

    let inputs_missing = numerator.is_none() || denominator.is_none();
    let completeness = if inputs_missing || counts.iter().any(RawCount::is_failed) {
        Completeness::Incomplete
    } else {
        Completeness::Complete
    };

    let approximate = counts.iter().any(RawCount::is_approximate);

    AgentMetrics {
        agent_key: agent.key.clone(),
        display_name: agent.display_name.clone(),
        methodology,
        counts,
        rate,
        completeness,
        approximate,
        inconsistent,
    }
}

/// Per-run tallies for console output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub agents: usize,
    pub complete: usize,
    pub incomplete: usize,
    /// Agents without a single successful count.
    pub no_data: usize,
    pub approximate: usize,
    pub inconsistent: usize,
}

impl SnapshotSummary {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut summary = Self {
            agents: snapshot.agents.len(),
            ..Self::default()
        };

        for agent in &snapshot.agents {
            if agent.is_complete() {
                summary.complete += 1;
            } else {
                summary.incomplete += 1;
            }
            if !agent.has_data() {
                summary.no_data += 1;
            }
            if agent.approximate {
                summary.approximate += 1;
            }
            if agent.inconsistent {
                summary.inconsistent += 1;
            }
        }

        summary
    }
}

/// Agents sorted by merge rate, highest first; undefined rates last.
pub fn rank_by_rate(snapshot: &Snapshot) -> Vec<&AgentMetrics> {
    let mut ranked: Vec<&AgentMetrics> = snapshot.agents.iter().collect();
    ranked.sort_by(|a, b| match (a.rate.percent(), b.rate.percent()) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    ranked
}
