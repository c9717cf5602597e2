use serde::Serialize;
use std::fmt;

/// Lifecycle state of a capture unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Starting,
    Running,
    Restarting,
    StopRequested,
    #[default]
    Stopped,
}

impl UnitState {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitState::Starting => "starting",
            UnitState::Running => "running",
            UnitState::Restarting => "restarting",
            UnitState::StopRequested => "stop_requested",
            UnitState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle summary published next to the statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitStatus {
    pub state: UnitState,
    /// Crash restarts since the unit was created.
    pub restarts: u64,
    pub consecutive_failures: u32,
    pub degraded: bool,
}
