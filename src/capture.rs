//! Recorder supervision: invocation, storage layout, restart policy and the
//! per-unit lifecycle.

pub mod command;
pub mod error;
pub mod options;
pub mod restart;
pub mod spec;
pub mod status;
pub mod storage;
pub mod unit;

pub use command::Invocation;
pub use error::UnitError;
pub use options::UnitOptions;
pub use restart::{RestartBackoff, RestartPolicy};
pub use spec::CaptureSpec;
pub use status::{UnitState, UnitStatus};
pub use unit::{CaptureUnit, UnitTelemetry};
