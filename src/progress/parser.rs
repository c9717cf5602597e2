//! Line grammar for the recorder's `-progress` output.
//!
//! The tool emits blocks of `key=value` lines, each block closed by a
//! `progress=continue` (or `progress=end`) line. Only a handful of keys are
//! interesting for statistics; everything else is classified as irrelevant
//! and left to the log forwarder.

use std::fmt;

/// Value the tool prints when it cannot compute a bitrate yet.
const BITRATE_UNAVAILABLE: &str = "N/A";
/// Bitrate stored when the tool reports [`BITRATE_UNAVAILABLE`].
pub const BITRATE_SENTINEL: i64 = -1;

const TERMINATOR_KEY: &str = "progress";

/// Keys of the progress protocol that feed the statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressKey {
    Frame,
    Fps,
    Bitrate,
    OutTimeMs,
    DupFrames,
    DropFrames,
}

impl ProgressKey {
    pub const ALL: [ProgressKey; 6] = [
        ProgressKey::Frame,
        ProgressKey::Fps,
        ProgressKey::Bitrate,
        ProgressKey::OutTimeMs,
        ProgressKey::DupFrames,
        ProgressKey::DropFrames,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProgressKey::Frame => "frame",
            ProgressKey::Fps => "fps",
            ProgressKey::Bitrate => "bitrate",
            ProgressKey::OutTimeMs => "out_time_ms",
            ProgressKey::DupFrames => "dup_frames",
            ProgressKey::DropFrames => "drop_frames",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == key)
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded field of the progress protocol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressField {
    Frame(u64),
    Fps(f32),
    Bitrate(i64),
    OutTimeMs(u64),
    DupFrames(i64),
    DropFrames(i64),
}

impl ProgressField {
    pub fn key(&self) -> ProgressKey {
        match self {
            ProgressField::Frame(_) => ProgressKey::Frame,
            ProgressField::Fps(_) => ProgressKey::Fps,
            ProgressField::Bitrate(_) => ProgressKey::Bitrate,
            ProgressField::OutTimeMs(_) => ProgressKey::OutTimeMs,
            ProgressField::DupFrames(_) => ProgressKey::DupFrames,
            ProgressField::DropFrames(_) => ProgressKey::DropFrames,
        }
    }
}

/// Classification of a single line of recorder stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// A recognised `key=value` line; the value is not decoded yet.
    Field { key: ProgressKey, value: &'a str },
    /// `progress=...`, closes the current record.
    Terminator,
    /// Anything else the tool printed.
    Other,
}

/// Splits a line on its first `=` and matches the key against the field table.
pub fn classify_line(line: &str) -> LineKind<'_> {
    let Some((key, value)) = line.trim().split_once('=') else {
        return LineKind::Other;
    };
    let key = key.trim();

    if key == TERMINATOR_KEY {
        return LineKind::Terminator;
    }

    match ProgressKey::from_key(key) {
        Some(key) => LineKind::Field {
            key,
            value: value.trim(),
        },
        None => LineKind::Other,
    }
}

/// Error produced when a recognised field carries an undecodable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldParseError {
    key: ProgressKey,
    raw: String,
    reason: String,
}

impl FieldParseError {
    fn new(key: ProgressKey, raw: &str, reason: impl fmt::Display) -> Self {
        Self {
            key,
            raw: raw.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub fn key(&self) -> ProgressKey {
        self.key
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for FieldParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to parse {} value \"{}\": {}",
            self.key, self.raw, self.reason
        )
    }
}

impl std::error::Error for FieldParseError {}

/// Decodes the value of a recognised field.
pub fn parse_field(key: ProgressKey, raw: &str) -> Result<ProgressField, FieldParseError> {
    let value = raw.trim();
    match key {
        ProgressKey::Frame => value
            .parse::<u64>()
            .map(ProgressField::Frame)
            .map_err(|err| FieldParseError::new(key, raw, err)),
        ProgressKey::OutTimeMs => value
            .parse::<u64>()
            .map(ProgressField::OutTimeMs)
            .map_err(|err| FieldParseError::new(key, raw, err)),
        ProgressKey::Fps => value
            .parse::<f32>()
            .map(ProgressField::Fps)
            .map_err(|err| FieldParseError::new(key, raw, err)),
        ProgressKey::Bitrate => parse_bitrate(value)
            .map(ProgressField::Bitrate)
            .map_err(|reason| FieldParseError::new(key, raw, reason)),
        ProgressKey::DupFrames => value
            .parse::<i64>()
            .map(ProgressField::DupFrames)
            .map_err(|err| FieldParseError::new(key, raw, err)),
        ProgressKey::DropFrames => value
            .parse::<i64>()
            .map(ProgressField::DropFrames)
            .map_err(|err| FieldParseError::new(key, raw, err)),
    }
}

/// `bitrate=1843.2kbits/s` keeps `1843`; `bitrate=N/A` becomes the sentinel.
fn parse_bitrate(value: &str) -> Result<i64, &'static str> {
    if value.contains(BITRATE_UNAVAILABLE) {
        return Ok(BITRATE_SENTINEL);
    }

    let integral = value.split('.').next().unwrap_or_default();
    let digits_end = integral
        .char_indices()
        .find(|&(idx, ch)| !(ch.is_ascii_digit() || (idx == 0 && ch == '-')))
        .map(|(idx, _)| idx)
        .unwrap_or(integral.len());

    integral[..digits_end]
        .parse::<i64>()
        .map_err(|_| "no integer portion")
}

/// Set of fields actually reported in a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldSet(u8);

impl FieldSet {
    pub fn insert(&mut self, key: ProgressKey) {
        self.0 |= key.bit();
    }

    pub fn contains(&self, key: ProgressKey) -> bool {
        self.0 & key.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// One complete progress block. Fields that were absent or failed to parse
/// keep their zero value and are missing from [`ProgressRecord::present`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressRecord {
    pub frame: u64,
    pub fps: f32,
    pub bitrate: i64,
    pub out_time_ms: u64,
    pub dup_frames: i64,
    pub drop_frames: i64,
    pub present: FieldSet,
}

impl ProgressRecord {
    pub fn apply(&mut self, field: ProgressField) {
        match field {
            ProgressField::Frame(value) => self.frame = value,
            ProgressField::Fps(value) => self.fps = value,
            ProgressField::Bitrate(value) => self.bitrate = value,
            ProgressField::OutTimeMs(value) => self.out_time_ms = value,
            ProgressField::DupFrames(value) => self.dup_frames = value,
            ProgressField::DropFrames(value) => self.drop_frames = value,
        }
        self.present.insert(field.key());
    }

    pub fn has(&self, key: ProgressKey) -> bool {
        self.present.contains(key)
    }
}
