use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RESTART_INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RESTART_MAX_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_DEGRADED_AFTER: u32 = 5;
pub const DEFAULT_STABLE_AFTER: Duration = Duration::from_secs(60);

/// Delay schedule applied between crash restarts of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed runs after which the unit is reported degraded.
    pub degraded_after: u32,
    /// A run lasting at least this long counts as healthy.
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_RESTART_INITIAL_DELAY,
            max_delay: DEFAULT_RESTART_MAX_DELAY,
            degraded_after: DEFAULT_DEGRADED_AFTER,
            stable_after: DEFAULT_STABLE_AFTER,
        }
    }
}

/// Per-run restart bookkeeping.
#[derive(Debug, Clone)]
pub struct RestartBackoff {
    policy: RestartPolicy,
    next_delay: Duration,
    consecutive_failures: u32,
}

impl RestartBackoff {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            next_delay: policy.initial_delay,
            consecutive_failures: 0,
        }
    }

    /// Records an unexpected exit after `run_time` and returns how long to
    /// wait before relaunching.
    pub fn record_exit(&mut self, run_time: Duration) -> Duration {
        if run_time >= self.policy.stable_after {
            self.consecutive_failures = 0;
            self.next_delay = self.policy.initial_delay;
        }
        self.record_failure()
    }

    /// Records a failed relaunch attempt.
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let delay = if self.is_degraded() {
            self.policy.max_delay
        } else {
            self.next_delay.min(self.policy.max_delay)
        };
        self.next_delay = next_backoff(self.next_delay, self.policy.max_delay);
        delay
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_degraded(&self) -> bool {
        self.policy.degraded_after > 0 && self.consecutive_failures >= self.policy.degraded_after
    }
}

/// Sleeps for `delay`; returns `false` when the token fired first.
pub async fn sleep_with_cancellation(delay: Duration, token: &CancellationToken) -> bool {
    if delay.is_zero() {
        yield_now().await;
        return !token.is_cancelled();
    }

    tokio::select! {
        _ = token.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
