//! Advisory messages about kernel writeback settings. Long sequential
//! recordings benefit from letting dirty pages accumulate; the kernel defaults
//! flush early.

use std::path::Path;

/// A writeback sysctl and the kernel default worth mentioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritebackHint {
    pub sysctl: &'static str,
    pub path: &'static str,
    pub kernel_default: i64,
    pub message: &'static str,
}

pub const WRITEBACK_HINTS: [WritebackHint; 2] = [
    WritebackHint {
        sysctl: "vm.dirty_background_ratio",
        path: "/proc/sys/vm/dirty_background_ratio",
        kernel_default: 10,
        message: "vm.dirty_background_ratio is at its kernel default; it caps the share of \
                  memory holding dirty pages, and raising it lets background writeback merge \
                  more I/O",
    },
    WritebackHint {
        sysctl: "vm.dirty_expire_centisecs",
        path: "/proc/sys/vm/dirty_expire_centisecs",
        kernel_default: 3000,
        message: "vm.dirty_expire_centisecs is at its kernel default; it bounds how long a \
                  dirty page may wait before being written, and raising it lets background \
                  writeback merge more I/O",
    },
];

impl WritebackHint {
    /// `true` when the sysctl content equals the kernel default. Unparsable
    /// content never triggers the hint.
    pub fn applies_to(&self, content: &str) -> bool {
        content.trim().parse::<i64>().ok() == Some(self.kernel_default)
    }

    fn read_current(&self, root: &Path) -> Option<String> {
        let relative = self.path.trim_start_matches('/');
        std::fs::read_to_string(root.join(relative)).ok()
    }
}

/// Hints whose sysctl file under `root` holds the kernel default. Missing or
/// unreadable files are skipped.
pub fn applicable_hints(root: &Path) -> Vec<WritebackHint> {
    WRITEBACK_HINTS
        .iter()
        .filter(|hint| {
            hint.read_current(root)
                .is_some_and(|content| hint.applies_to(&content))
        })
        .copied()
        .collect()
}

/// Logs every applicable hint at info level.
pub fn log_writeback_hints() {
    for hint in applicable_hints(Path::new("/")) {
        tracing::info!(sysctl = hint.sysctl, "{}", hint.message);
    }
}
