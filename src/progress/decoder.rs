use super::parser::{classify_line, parse_field, LineKind, ProgressRecord};

/// Upper bound on field lines held while waiting for a terminator.
pub const MAX_PENDING_LINES: usize = 128;

/// Result of feeding one stdout line to the decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// Field line buffered until the next terminator.
    Buffered,
    /// Terminator seen; the buffered lines folded into a record.
    Record(ProgressRecord),
    /// Not part of the progress protocol.
    Ignored,
}

/// Accumulates progress field lines and folds them into records on each
/// `progress=` terminator.
#[derive(Debug)]
pub struct ProgressDecoder {
    unit: String,
    pending: Vec<String>,
    capacity: usize,
}

impl ProgressDecoder {
    pub fn new(unit: impl Into<String>) -> Self {
        Self::with_capacity(unit, MAX_PENDING_LINES)
    }

    pub fn with_capacity(unit: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            unit: unit.into(),
            pending: Vec::with_capacity(capacity.min(16)),
            capacity,
        }
    }

    pub fn pending_lines(&self) -> usize {
        self.pending.len()
    }

    /// Drops any partially accumulated block, e.g. after the process died mid-record.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    pub fn push_line(&mut self, line: &str) -> DecodeOutcome {
        match classify_line(line) {
            LineKind::Terminator => DecodeOutcome::Record(self.fold()),
            LineKind::Field { .. } => {
                if self.pending.len() >= self.capacity {
                    tracing::warn!(
                        unit = %self.unit,
                        discarded = self.pending.len(),
                        "progress block exceeded buffer without terminator; discarding"
                    );
                    self.pending.clear();
                }
                self.pending.push(line.trim().to_owned());
                DecodeOutcome::Buffered
            }
            LineKind::Other => DecodeOutcome::Ignored,
        }
    }

    fn fold(&mut self) -> ProgressRecord {
        let mut record = ProgressRecord::default();
        for line in self.pending.drain(..) {
            let LineKind::Field { key, value } = classify_line(&line) else {
                continue;
            };
            match parse_field(key, value) {
                Ok(field) => record.apply(field),
                Err(err) => {
                    tracing::warn!(unit = %self.unit, error = %err, "dropping progress field");
                }
            }
        }
        record
    }
}
