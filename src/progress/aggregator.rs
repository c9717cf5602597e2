use super::parser::{ProgressKey, ProgressRecord};
use serde::{Deserialize, Serialize};

/// Number of decoded records folded into one snapshot.
pub const WINDOW_CAPACITY: usize = 60;

/// How cumulative counters are chosen when the last record of a window did
/// not report them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessPolicy {
    /// Take every counter from the last record, zero or not.
    #[default]
    LastSample,
    /// Take each counter from the newest record that reported it, falling
    /// back to the previously published value.
    CarryForward,
}

/// Statistics published for a unit after each window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub frame: u64,
    pub out_time_ms: u64,
    pub dup_frames: i64,
    pub drop_frames: i64,
    /// Mean fps over the window.
    pub fps: f32,
    /// Mean bitrate over the window, `-1` samples included.
    pub bitrate: i64,
}

/// Tumbling window over decoded progress records.
#[derive(Debug)]
pub struct TelemetryAggregator {
    window: Vec<ProgressRecord>,
    capacity: usize,
    policy: StalenessPolicy,
    published: StatsSnapshot,
}

impl TelemetryAggregator {
    pub fn new(policy: StalenessPolicy) -> Self {
        Self::with_capacity(WINDOW_CAPACITY, policy)
    }

    pub fn with_capacity(capacity: usize, policy: StalenessPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: Vec::with_capacity(capacity),
            capacity,
            policy,
            published: StatsSnapshot::default(),
        }
    }

    pub fn buffered(&self) -> usize {
        self.window.len()
    }

    pub fn latest(&self) -> StatsSnapshot {
        self.published
    }

    /// Sets the value carried forward before the first flush, e.g. the
    /// snapshot published by a previous run of the same unit.
    pub fn seed(&mut self, published: StatsSnapshot) {
        self.published = published;
    }

    /// Appends a record; returns the new snapshot when the window filled up.
    pub fn ingest(&mut self, record: ProgressRecord) -> Option<StatsSnapshot> {
        self.window.push(record);
        if self.window.len() >= self.capacity {
            return self.flush();
        }
        None
    }

    /// Folds the buffered window into a snapshot and clears it. Empty windows
    /// produce nothing.
    pub fn flush(&mut self) -> Option<StatsSnapshot> {
        let last = *self.window.last()?;
        let count = self.window.len();

        let fps_sum: f64 = self.window.iter().map(|record| f64::from(record.fps)).sum();
        let bitrate_sum: i64 = self
            .window
            .iter()
            .fold(0i64, |acc, record| acc.saturating_add(record.bitrate));

        let mut snapshot = StatsSnapshot {
            frame: last.frame,
            out_time_ms: last.out_time_ms,
            dup_frames: last.dup_frames,
            drop_frames: last.drop_frames,
            fps: (fps_sum / count as f64) as f32,
            bitrate: bitrate_sum / count as i64,
        };

        if self.policy == StalenessPolicy::CarryForward {
            snapshot.frame = self
                .newest_reported(ProgressKey::Frame, |record| record.frame)
                .unwrap_or(self.published.frame);
            snapshot.out_time_ms = self
                .newest_reported(ProgressKey::OutTimeMs, |record| record.out_time_ms)
                .unwrap_or(self.published.out_time_ms);
            snapshot.dup_frames = self
                .newest_reported(ProgressKey::DupFrames, |record| record.dup_frames)
                .unwrap_or(self.published.dup_frames);
            snapshot.drop_frames = self
                .newest_reported(ProgressKey::DropFrames, |record| record.drop_frames)
                .unwrap_or(self.published.drop_frames);
        }

        self.window.clear();
        self.published = snapshot;
        Some(snapshot)
    }

    fn newest_reported<T>(
        &self,
        key: ProgressKey,
        value: impl Fn(&ProgressRecord) -> T,
    ) -> Option<T> {
        self.window
            .iter()
            .rev()
            .find(|record| record.has(key))
            .map(value)
    }
}
