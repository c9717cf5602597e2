use std::path::PathBuf;

/// Desired description of one capture unit. Two specs describe the same
/// running process only when every field matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSpec {
    pub name: String,
    pub executable: PathBuf,
    pub log_level: String,
    pub storage_path: PathBuf,
    pub segment_time: u64,
    pub url: String,
}

impl CaptureSpec {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executable: PathBuf::from(super::command::DEFAULT_EXECUTABLE),
            log_level: super::command::DEFAULT_LOG_LEVEL.to_owned(),
            storage_path: PathBuf::new(),
            segment_time: super::command::DEFAULT_SEGMENT_TIME_SECS,
            url: url.into(),
        }
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    pub fn with_segment_time(mut self, secs: u64) -> Self {
        self.segment_time = secs;
        self
    }

    /// Directory holding every day directory of this unit.
    pub fn unit_root(&self) -> PathBuf {
        self.storage_path.join(&self.name)
    }
}
