//! Shared request budget for the search API.
//!
//! Every request task acquires a slot here before hitting the network and
//! reports the budget headers back afterwards. All state sits behind one
//! async mutex; the lock is held only to compute and reserve a slot, never
//! across a sleep or a request.

use crate::search::client::BudgetHint;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Longest time a single acquire waits for a window reset.
const MAX_RESET_WAIT: Duration = Duration::from_secs(90);

#[derive(Debug)]
struct BudgetState {
    /// Earliest instant the next request may start.
    next_slot: Instant,
    /// Requests left in the current window, if the API told us.
    remaining: Option<u32>,
    reset_at: Option<DateTime<Utc>>,
    /// Set after a rate-limit rejection; holds every task back.
    paused_until: Option<Instant>,
}

/// Point-in-time view of the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetStatus {
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Request budget shared by all in-flight count queries.
#[derive(Debug)]
pub struct RateBudget {
    min_interval: Duration,
    state: Mutex<BudgetState>,
}

impl RateBudget {
    /// Budget spacing requests evenly over a minute.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        Self::with_interval(Duration::from_secs(60) / rpm)
    }

    pub fn with_interval(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Mutex::new(BudgetState {
                next_slot: Instant::now(),
                remaining: None,
                reset_at: None,
                paused_until: None,
            }),
        }
    }

    /// No spacing; only server-reported limits apply.
    #[cfg(test)]
    pub fn unthrottled() -> Self {
        Self::with_interval(Duration::ZERO)
    }

    /// Wait until a request may be sent and reserve it.
    pub async fn acquire(&self) {
        let wake_at = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let mut at = state.next_slot.max(now);

            if let Some(paused) = state.paused_until {
                if paused > at {
                    at = paused;
                } else if paused <= now {
                    state.paused_until = None;
                }
            }

            match state.remaining {
                Some(0) => {
                    let until_reset = state
                        .reset_at
                        .and_then(|reset| (reset - Utc::now()).to_std().ok())
                        .unwrap_or(self.min_interval)
                        .min(MAX_RESET_WAIT);
                    at = at.max(now + until_reset);
                    // Unknown until the next response reports it.
                    state.remaining = None;
                }
                Some(left) => state.remaining = Some(left - 1),
                None => {}
            }

            state.next_slot = at + self.min_interval;
            at
        };

        let now = Instant::now();
        if wake_at > now {
            debug!(
                wait_ms = (wake_at - now).as_millis() as u64,
                "Throttling search request"
            );
            sleep_until(wake_at).await;
        }
    }

    /// Record the budget reported by a response.
    pub async fn observe(&self, hint: BudgetHint) {
        let mut state = self.state.lock().await;

        let new_window = match (hint.reset_at, state.reset_at) {
            (Some(new), Some(old)) => new > old,
            (Some(_), None) => true,
            _ => false,
        };

        if let Some(observed) = hint.remaining {
            // Responses can arrive out of order; within one window the lower figure is current.
            state.remaining = match state.remaining {
                Some(current) if !new_window => Some(current.min(observed)),
                _ => Some(observed),
            };
        }
        if new_window {
            state.reset_at = hint.reset_at;
        }
    }

    /// Hold back every task for `delay` after a rate-limit rejection.
    pub async fn pause_for(&self, delay: Duration) {
        let mut state = self.state.lock().await;
        let until = Instant::now() + delay;
        state.paused_until = Some(match state.paused_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    pub async fn status(&self) -> BudgetStatus {
        let state = self.state.lock().await;
        BudgetStatus {
            remaining: state.remaining,
            reset_at: state.reset_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_observe_tracks_lowest_remaining_in_window() {
        let budget = RateBudget::unthrottled();
        let reset = Utc::now() + ChronoDuration::seconds(60);

        budget
            .observe(BudgetHint {
                remaining: Some(8),
                reset_at: Some(reset),
            })
            .await;
        budget
            .observe(BudgetHint {
                remaining: Some(9),
                reset_at: Some(reset),
            })
            .await;

        let status = budget.status().await;
        assert_eq!(status.remaining, Some(8));
        assert_eq!(status.reset_at, Some(reset));
    }

    #[tokio::test]
    async fn test_new_window_replaces_remaining() {
        let budget = RateBudget::unthrottled();
        let first = Utc::now() + ChronoDuration::seconds(10);
        let second = first + ChronoDuration::seconds(60);

        budget
            .observe(BudgetHint {
                remaining: Some(1),
                reset_at: Some(first),
            })
            .await;
        budget
            .observe(BudgetHint {
                remaining: Some(29),
                reset_at: Some(second),
            })
            .await;

        assert_eq!(budget.status().await.remaining, Some(29));
    }

    #[tokio::test]
    async fn test_acquire_reserves_from_remaining() {
        let budget = RateBudget::unthrottled();
        budget
            .observe(BudgetHint {
                remaining: Some(3),
                reset_at: None,
            })
            .await;

        budget.acquire().await;
        budget.acquire().await;
        assert_eq!(budget.status().await.remaining, Some(1));
    }

    #[tokio::test]
    async fn test_exhausted_budget_waits_for_reset() {
        let budget = RateBudget::unthrottled();
        budget
            .observe(BudgetHint {
                remaining: Some(0),
                reset_at: Some(Utc::now() + ChronoDuration::milliseconds(150)),
            })
            .await;

        let start = Instant::now();
        budget.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(budget.status().await.remaining, None);
    }

    #[tokio::test]
    async fn test_interval_spaces_requests() {
        let budget = RateBudget::with_interval(Duration::from_millis(40));
        let start = Instant::now();
        budget.acquire().await;
        budget.acquire().await;
        budget.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_pause_holds_back_next_acquire() {
        let budget = RateBudget::unthrottled();
        budget.pause_for(Duration::from_millis(60)).await;
        let start = Instant::now();
        budget.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_per_minute_interval() {
        let budget = RateBudget::per_minute(30);
        assert_eq!(budget.min_interval, Duration::from_secs(2));
    }
}
