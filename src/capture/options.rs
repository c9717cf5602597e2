use super::restart::RestartPolicy;
use super::storage::DEFAULT_ROLLOVER_CHECK_INTERVAL;
use crate::progress::StalenessPolicy;
use std::time::Duration;

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Supervision knobs shared by every unit of a fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitOptions {
    restart: RestartPolicy,
    stop_grace: Duration,
    rollover_check_interval: Duration,
    staleness: StalenessPolicy,
}

impl Default for UnitOptions {
    fn default() -> Self {
        Self {
            restart: RestartPolicy::default(),
            stop_grace: DEFAULT_STOP_GRACE,
            rollover_check_interval: DEFAULT_ROLLOVER_CHECK_INTERVAL,
            staleness: StalenessPolicy::default(),
        }
    }
}

impl UnitOptions {
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    /// How long a recorder may ignore SIGTERM before it is killed.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_rollover_check_interval(mut self, interval: Duration) -> Self {
        self.rollover_check_interval = interval;
        self
    }

    pub fn with_staleness(mut self, policy: StalenessPolicy) -> Self {
        self.staleness = policy;
        self
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        self.restart
    }

    pub fn stop_grace(&self) -> Duration {
        self.stop_grace
    }

    pub fn rollover_check_interval(&self) -> Duration {
        self.rollover_check_interval
    }

    pub fn staleness(&self) -> StalenessPolicy {
        self.staleness
    }
}
