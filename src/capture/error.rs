use std::fmt;
use std::io;
use std::path::PathBuf;

/// Failures reported synchronously by [`CaptureUnit`](super::CaptureUnit)
/// operations. Anything that happens after a successful start is logged by
/// the unit itself.
#[derive(Debug)]
pub enum UnitError {
    /// The recorder could not be spawned.
    Launch { unit: String, source: io::Error },
    /// A day directory could not be created.
    Storage { path: PathBuf, source: io::Error },
    /// The running recorder could not be signalled.
    Stop { unit: String, source: nix::errno::Errno },
    /// `start` was called while a run is still active.
    AlreadyRunning { unit: String },
}

impl fmt::Display for UnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitError::Launch { unit, source } => {
                write!(f, "failed to launch recorder for {unit}: {source}")
            }
            UnitError::Storage { path, source } => {
                write!(f, "failed to create {}: {source}", path.display())
            }
            UnitError::Stop { unit, source } => {
                write!(f, "failed to signal recorder for {unit}: {source}")
            }
            UnitError::AlreadyRunning { unit } => write!(f, "unit {unit} is already running"),
        }
    }
}

impl std::error::Error for UnitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UnitError::Launch { source, .. } | UnitError::Storage { source, .. } => Some(source),
            UnitError::Stop { source, .. } => Some(source),
            UnitError::AlreadyRunning { .. } => None,
        }
    }
}
