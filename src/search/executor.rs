//! Count query executor.
//!
//! Issues one count request per predicate, retries transient failures
//! with exponential backoff, and runs predicates concurrently up to a
//! fixed limit while sharing one [`RateBudget`].

use crate::models::{AgentSpec, CountOutcome, Predicate, RawCount};
use crate::search::budget::RateBudget;
use crate::search::client::{OracleReply, QueryError, SearchOracle};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retry settings for a single count query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Result of one request attempt.
#[derive(Debug)]
enum Attempt {
    Success(OracleReply),
    Retryable(QueryError),
    Terminal(QueryError),
}

impl From<Result<OracleReply, QueryError>> for Attempt {
    fn from(result: Result<OracleReply, QueryError>) -> Self {
        match result {
            Ok(reply) => Attempt::Success(reply),
            Err(e) if e.is_transient() => Attempt::Retryable(e),
            Err(e) => Attempt::Terminal(e),
        }
    }
}

/// Executes count queries against a search oracle.
pub struct CountExecutor {
    oracle: Arc<dyn SearchOracle>,
    budget: Arc<RateBudget>,
    policy: RetryPolicy,
    concurrency: usize,
    show_progress: bool,
}

impl CountExecutor {
    pub fn new(
        oracle: Arc<dyn SearchOracle>,
        budget: Arc<RateBudget>,
        policy: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            oracle,
            budget,
            policy,
            concurrency: concurrency.max(1),
            show_progress: false,
        }
    }

    /// Draw a progress bar during `execute_all`.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Run one predicate to completion.
    ///
    /// Never returns a zero in place of a failure: exhausted or rejected
    /// queries come back as [`CountOutcome::Failed`].
    pub async fn execute(&self, predicate: &Predicate) -> RawCount {
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            self.budget.acquire().await;

            let attempt = Attempt::from(self.oracle.count(&predicate.query).await);
            let error = match attempt {
                Attempt::Success(reply) => {
                    self.budget.observe(reply.budget).await;
                    debug!(
                        query = %predicate.query,
                        count = reply.total,
                        approximate = reply.approximate,
                        "Count received"
                    );
                    return self.finish(
                        predicate,
                        attempts,
                        CountOutcome::Counted {
                            value: reply.total,
                            approximate: reply.approximate,
                        },
                    );
                }
                Attempt::Terminal(e) => {
                    warn!(query = %predicate.query, error = %e, "Query rejected, not retrying");
                    return self.finish(predicate, attempts, failed(&e));
                }
                Attempt::Retryable(e) => e,
            };

            if attempts >= self.policy.max_attempts {
                warn!(
                    query = %predicate.query,
                    attempts,
                    error = %error,
                    "Query failed after retries"
                );
                return self.finish(predicate, attempts, failed(&error));
            }

            let mut delay = self.policy.delay_for(attempts);
            if let QueryError::RateLimited {
                retry_after: Some(wait),
            } = error
            {
                delay = delay.max(wait).min(self.policy.max_backoff);
            }
            if matches!(error, QueryError::RateLimited { .. }) {
                self.budget.pause_for(delay).await;
            }

            info!(
                query = %predicate.query,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying count query"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn finish(&self, predicate: &Predicate, attempts: u32, outcome: CountOutcome) -> RawCount {
        RawCount {
            category: predicate.category,
            query: predicate.query.clone(),
            retrieved_at: Utc::now(),
            attempts,
            outcome,
        }
    }

    /// Run every predicate of every agent.
    ///
    /// Requests complete in any order; each count is put back under its
    /// agent key in the agent's predicate order.
    pub async fn execute_all(&self, specs: &[AgentSpec]) -> HashMap<String, Vec<RawCount>> {
        let jobs: Vec<(usize, usize, &Predicate)> = specs
            .iter()
            .enumerate()
            .flat_map(|(agent_idx, spec)| {
                spec.predicates
                    .iter()
                    .enumerate()
                    .map(move |(pred_idx, predicate)| (agent_idx, pred_idx, predicate))
            })
            .collect();

        info!(
            "Running {} count queries (concurrency {})",
            jobs.len(),
            self.concurrency
        );
        let progress = self.progress_bar(jobs.len() as u64);

        let finished: Vec<(usize, usize, RawCount)> = stream::iter(jobs)
            .map(|(agent_idx, pred_idx, predicate)| {
                let progress = &progress;
                async move {
                    let count = self.execute(predicate).await;
                    progress.inc(1);
                    (agent_idx, pred_idx, count)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        progress.finish_and_clear();

        let mut slots: Vec<Vec<Option<RawCount>>> = specs
            .iter()
            .map(|spec| vec![None; spec.predicates.len()])
            .collect();
        for (agent_idx, pred_idx, count) in finished {
            slots[agent_idx][pred_idx] = Some(count);
        }

        specs
            .iter()
            .zip(slots)
            .map(|(spec, counts)| (spec.key.clone(), counts.into_iter().flatten().collect()))
            .collect()
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} queries")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

fn failed(error: &QueryError) -> CountOutcome {
    CountOutcome::Failed {
        error: error.to_string(),
    }
}
