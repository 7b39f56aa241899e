//! Run orchestration.
//!
//! One run queries every registered agent, aggregates the counts into a
//! snapshot and appends that snapshot to the history exactly once.
//! Collection and commit are separate steps: dropping the collection
//! future (deadline, Ctrl-C) leaves the history untouched.

use crate::analysis::aggregate;
use crate::history::HistoryStore;
use crate::models::{AgentSpec, Methodology, Snapshot};
use crate::search::CountExecutor;
use chrono::Utc;
use std::fmt;
use tracing::{error, info, warn};

/// Run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Collecting,
    /// Every agent complete; snapshot appended.
    SnapshotReady,
    /// Some agents incomplete; snapshot appended.
    Partial,
    /// Nothing appended.
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Collecting => write!(f, "collecting"),
            RunState::SnapshotReady => write!(f, "snapshot ready"),
            RunState::Partial => write!(f, "partial"),
            RunState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Why a run was aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// No agent produced a single count.
    NoData,
    /// The history store refused the snapshot.
    HistoryRejected(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::NoData => write!(f, "no agent produced any data"),
            AbortReason::HistoryRejected(reason) => write!(f, "history rejected snapshot: {}", reason),
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub state: RunState,
    /// Agents whose metrics are complete.
    pub succeeded_agents: Vec<String>,
    /// Agents flagged incomplete.
    pub failed_agents: Vec<String>,
    /// The collected snapshot; only in the history unless aborted.
    pub snapshot: Snapshot,
    pub abort_reason: Option<AbortReason>,
}

impl RunResult {
    pub fn is_aborted(&self) -> bool {
        self.state == RunState::Aborted
    }
}

/// Sequences query execution, aggregation and the history append.
pub struct Orchestrator {
    specs: Vec<AgentSpec>,
    executor: CountExecutor,
    methodology: Methodology,
    state: RunState,
}

impl Orchestrator {
    pub fn new(specs: Vec<AgentSpec>, executor: CountExecutor, methodology: Methodology) -> Self {
        Self {
            specs,
            executor,
            methodology,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Query and aggregate every agent. Agents stay in registry order.
    pub async fn collect(&mut self) -> Snapshot {
        self.state = RunState::Collecting;
        info!(
            "Collecting counts for {} agents ({})",
            self.specs.len(),
            self.methodology
        );

        let mut counts = self.executor.execute_all(&self.specs).await;

        let agents = self
            .specs
            .iter()
            .map(|spec| {
                let raw = counts.remove(&spec.key).unwrap_or_default();
                let metrics = aggregate(spec, raw, self.methodology);
                if !metrics.is_complete() {
                    warn!(agent = %spec.key, "Agent metrics incomplete");
                }
                metrics
            })
            .collect();

        Snapshot {
            run_timestamp: Utc::now(),
            methodology: self.methodology,
            agents,
        }
    }

    /// Decide the final state and append the snapshot unless aborting.
    pub fn commit(&mut self, snapshot: Snapshot, store: &mut HistoryStore) -> RunResult {
        let (succeeded_agents, failed_agents): (Vec<_>, Vec<_>) = snapshot
            .agents
            .iter()
            .partition(|a| a.is_complete());
        let succeeded_agents: Vec<String> =
            succeeded_agents.into_iter().map(|a| a.agent_key.clone()).collect();
        let failed_agents: Vec<String> =
            failed_agents.into_iter().map(|a| a.agent_key.clone()).collect();

        let abort_reason = if snapshot.is_empty_of_data() {
            Some(AbortReason::NoData)
        } else {
            match store.append(snapshot.clone()) {
                Ok(()) => None,
                Err(e) => Some(AbortReason::HistoryRejected(e.to_string())),
            }
        };

        self.state = match abort_reason {
            Some(ref reason) => {
                error!("Run aborted: {}", reason);
                RunState::Aborted
            }
            None if failed_agents.is_empty() => RunState::SnapshotReady,
            None => RunState::Partial,
        };
        info!(
            state = %self.state,
            complete = succeeded_agents.len(),
            incomplete = failed_agents.len(),
            "Run finished"
        );

        RunResult {
            state: self.state,
            succeeded_agents,
            failed_agents,
            snapshot,
            abort_reason,
        }
    }

    /// Collect and commit in one step.
    #[allow(dead_code)] // The binary wraps `collect` in its own deadline
    pub async fn run(&mut self, store: &mut HistoryStore) -> RunResult {
        let snapshot = self.collect().await;
        self.commit(snapshot, store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, MergeRate, UndefinedReason};
    use crate::search::client::{BudgetHint, OracleReply, QueryError, SearchOracle};
    use crate::search::{RateBudget, RetryPolicy};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Fixed answers per query; unknown queries time out.
    struct FixedOracle(HashMap<String, u64>);

    #[async_trait]
    impl SearchOracle for FixedOracle {
        async fn count(&self, query: &str) -> Result<OracleReply, QueryError> {
            self.0
                .get(query)
                .map(|total| OracleReply {
                    total: *total,
                    approximate: false,
                    budget: BudgetHint::default(),
                })
                .ok_or(QueryError::Timeout)
        }
    }

    fn specs() -> Vec<AgentSpec> {
        ["a", "b", "c"]
            .iter()
            .map(|key| {
                AgentSpec::new(key, &key.to_uppercase())
                    .with(Category::Total, format!("{}-total", key))
                    .with(Category::Merged, format!("{}-merged", key))
            })
            .collect()
    }

    fn orchestrator(answers: &[(&str, u64)]) -> Orchestrator {
        let oracle = FixedOracle(
            answers
                .iter()
                .map(|(q, n)| (q.to_string(), *n))
                .collect(),
        );
        let executor = CountExecutor::new(
            Arc::new(oracle),
            Arc::new(RateBudget::unthrottled()),
            RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
            },
            3,
        );
        Orchestrator::new(specs(), executor, Methodology::LegacyTotalBased)
    }

    #[tokio::test]
    async fn test_partial_run_keeps_every_agent() {
        let dir = tempdir().unwrap();
        let mut store = HistoryStore::open(dir.path().join("history.jsonl")).unwrap();
        // c-merged is never answered and exhausts its retries.
        let mut orch = orchestrator(&[
            ("a-total", 100),
            ("a-merged", 60),
            ("b-total", 0),
            ("b-merged", 0),
            ("c-total", 50),
        ]);

        let result = orch.run(&mut store).await;

        assert_eq!(result.state, RunState::Partial);
        assert_eq!(orch.state(), RunState::Partial);
        assert_eq!(result.succeeded_agents, vec!["a", "b"]);
        assert_eq!(result.failed_agents, vec!["c"]);

        let keys: Vec<&str> = result
            .snapshot
            .agents
            .iter()
            .map(|a| a.agent_key.as_str())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);

        let snapshot = &result.snapshot;
        assert_eq!(snapshot.agent("a").unwrap().rate.percent(), Some(60.0));
        assert_eq!(
            snapshot.agent("b").unwrap().rate,
            MergeRate::Undefined {
                reason: UndefinedReason::ZeroDenominator
            }
        );
        let c = snapshot.agent("c").unwrap();
        assert!(!c.is_complete());
        assert_eq!(c.rate.percent(), None);

        assert_eq!(store.len(), 1);
        assert_eq!(store.latest(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_full_run_is_snapshot_ready() {
        let dir = tempdir().unwrap();
        let mut store = HistoryStore::open(dir.path().join("history.jsonl")).unwrap();
        let mut orch = orchestrator(&[
            ("a-total", 10),
            ("a-merged", 5),
            ("b-total", 10),
            ("b-merged", 1),
            ("c-total", 4),
            ("c-merged", 4),
        ]);

        let result = orch.run(&mut store).await;
        assert_eq!(result.state, RunState::SnapshotReady);
        assert!(result.failed_agents.is_empty());
        assert!(result.abort_reason.is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_no_data_aborts_without_append() {
        let dir = tempdir().unwrap();
        let mut store = HistoryStore::open(dir.path().join("history.jsonl")).unwrap();
        let mut orch = orchestrator(&[]);

        let result = orch.run(&mut store).await;
        assert!(result.is_aborted());
        assert_eq!(result.abort_reason, Some(AbortReason::NoData));
        assert_eq!(result.failed_agents.len(), 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_history_rejection_aborts() {
        let dir = tempdir().unwrap();
        let mut store = HistoryStore::open(dir.path().join("history.jsonl")).unwrap();
        let mut orch = orchestrator(&[("a-total", 1), ("a-merged", 1)]);

        let mut future = orch.collect().await;
        future.run_timestamp = future.run_timestamp + chrono::Duration::days(1);
        store.append(future).unwrap();

        let result = orch.run(&mut store).await;
        assert_eq!(result.state, RunState::Aborted);
        assert!(matches!(
            result.abort_reason,
            Some(AbortReason::HistoryRejected(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_collection_appends_nothing() {
        let dir = tempdir().unwrap();
        let mut store = HistoryStore::open(dir.path().join("history.jsonl")).unwrap();
        let oracle = FixedOracle(HashMap::new());
        let executor = CountExecutor::new(
            Arc::new(oracle),
            Arc::new(RateBudget::unthrottled()),
            RetryPolicy {
                max_attempts: 5,
                initial_backoff: Duration::from_millis(200),
                max_backoff: Duration::from_secs(1),
            },
            1,
        );
        let mut orch = Orchestrator::new(specs(), executor, Methodology::LegacyTotalBased);

        let outcome =
            tokio::time::timeout(Duration::from_millis(20), orch.run(&mut store)).await;
        assert!(outcome.is_err());
        assert!(store.is_empty());
        assert_eq!(orch.state(), RunState::Collecting);
    }
}
