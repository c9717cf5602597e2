//! Shell scripts standing in for the recorder. They are written once, before
//! any test spawns a process, so no script is ever executed while another
//! thread still holds it open for writing.

use once_cell::sync::Lazy;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Frames emitted by [`steady`]; two full statistics windows.
pub const STEADY_FRAMES: u64 = 120;

struct Recorders {
    _dir: TempDir,
    steady: PathBuf,
    crash: PathBuf,
    idle: PathBuf,
    stubborn: PathBuf,
}

static RECORDERS: Lazy<Recorders> = Lazy::new(|| {
    let dir = tempfile::tempdir().expect("recorder script dir");
    let steady = write_script(
        dir.path(),
        "steady.sh",
        &format!(
            r#"i=1
while [ $i -le {STEADY_FRAMES} ]; do
  echo "frame=$i"
  echo "fps=25.0"
  echo "bitrate=1000.0kbits/s"
  echo "out_time_ms=$((i * 40000))"
  echo "dup_frames=0"
  echo "drop_frames=1"
  echo "speed=1.00x"
  echo "progress=continue"
  i=$((i + 1))
done
echo "[info] stream opened" >&2
exec sleep 600
"#
        ),
    );
    let crash = write_script(dir.path(), "crash.sh", "echo \"[error] boom\" >&2\nexit 3\n");
    let idle = write_script(dir.path(), "idle.sh", "exec sleep 600\n");
    let stubborn = write_script(
        dir.path(),
        "stubborn.sh",
        "trap '' TERM\nwhile true; do sleep 1; done\n",
    );

    Recorders {
        _dir: dir,
        steady,
        crash,
        idle,
        stubborn,
    }
});

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write recorder script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod recorder script");
    path
}

/// Prints two windows of progress, then idles until signalled.
pub fn steady() -> PathBuf {
    RECORDERS.steady.clone()
}

/// Exits with status 3 immediately.
pub fn crash() -> PathBuf {
    RECORDERS.crash.clone()
}

/// Idles until signalled.
pub fn idle() -> PathBuf {
    RECORDERS.idle.clone()
}

/// Ignores SIGTERM.
pub fn stubborn() -> PathBuf {
    RECORDERS.stubborn.clone()
}

/// Forces script creation; call before spawning anything.
pub fn prepare() {
    Lazy::force(&RECORDERS);
}
