use super::aggregator::{StalenessPolicy, StatsSnapshot, TelemetryAggregator};
use super::decoder::{DecodeOutcome, ProgressDecoder};
use std::sync::Arc;
use tokio::sync::watch;

/// Shared sending half of a unit's snapshot channel.
pub type SnapshotPublisher = Arc<watch::Sender<StatsSnapshot>>;

/// Decoder and aggregator for one unit, publishing each flushed window.
#[derive(Debug)]
pub struct ProgressPipeline {
    decoder: ProgressDecoder,
    aggregator: TelemetryAggregator,
    publisher: SnapshotPublisher,
}

impl ProgressPipeline {
    pub fn new(
        unit: impl Into<String>,
        policy: StalenessPolicy,
        publisher: SnapshotPublisher,
    ) -> Self {
        Self::from_parts(
            ProgressDecoder::new(unit),
            TelemetryAggregator::new(policy),
            publisher,
        )
    }

    pub fn from_parts(
        decoder: ProgressDecoder,
        mut aggregator: TelemetryAggregator,
        publisher: SnapshotPublisher,
    ) -> Self {
        aggregator.seed(*publisher.borrow());
        Self {
            decoder,
            aggregator,
            publisher,
        }
    }

    /// Feeds one stdout line. Returns `false` when the line is not part of the
    /// progress protocol so the caller can forward it elsewhere.
    pub fn push_line(&mut self, line: &str) -> bool {
        match self.decoder.push_line(line) {
            DecodeOutcome::Buffered => true,
            DecodeOutcome::Record(record) => {
                if let Some(snapshot) = self.aggregator.ingest(record) {
                    self.publisher.send_replace(snapshot);
                }
                true
            }
            DecodeOutcome::Ignored => false,
        }
    }

    /// Drops a half-read block left behind by a process that exited.
    pub fn end_of_stream(&mut self) {
        self.decoder.reset();
    }

    pub fn buffered_records(&self) -> usize {
        self.aggregator.buffered()
    }
}
