//! Progress protocol decoding and windowed statistics for recorder output.

pub mod aggregator;
pub mod decoder;
pub mod parser;
pub mod pipeline;

pub use aggregator::{StalenessPolicy, StatsSnapshot, TelemetryAggregator, WINDOW_CAPACITY};
pub use decoder::{DecodeOutcome, ProgressDecoder, MAX_PENDING_LINES};
pub use parser::{
    classify_line, parse_field, FieldParseError, LineKind, ProgressField, ProgressKey,
    ProgressRecord,
};
pub use pipeline::{ProgressPipeline, SnapshotPublisher};
