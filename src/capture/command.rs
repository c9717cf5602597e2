use super::spec::CaptureSpec;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

pub const DEFAULT_EXECUTABLE: &str = "ffmpeg";
pub const DEFAULT_LOG_LEVEL: &str = "repeat+level+error";
pub const DEFAULT_SEGMENT_TIME_SECS: u64 = 3600;

/// strftime pattern appended to the unit root; the recorder expands it per segment.
const SEGMENT_PATTERN: &str = "%Y-%m-%d/%Y-%m-%d_%H-%M-%S.mkv";

/// Program and argument vector used to launch the recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
}

impl Invocation {
    pub fn for_spec(spec: &CaptureSpec) -> Self {
        let output = spec.unit_root().join(SEGMENT_PATTERN);
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-nostdin",
            "-nostats",
            "-progress",
            "pipe:1",
            "-loglevel",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        args.push(spec.log_level.clone().into());
        args.push("-i".into());
        args.push(spec.url.clone().into());
        args.extend(
            ["-codec", "copy", "-f", "segment", "-segment_time"]
                .into_iter()
                .map(OsString::from),
        );
        args.push(spec.segment_time.to_string().into());
        args.extend(
            [
                "-reset_timestamps",
                "1",
                "-segment_atclocktime",
                "1",
                "-strftime",
                "1",
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(output.into_os_string());

        Self {
            program: spec.executable.clone(),
            args,
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Builds the child command: no stdin, both output streams piped, killed if
    /// the handle is dropped.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}
