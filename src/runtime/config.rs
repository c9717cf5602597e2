use crate::capture::command::{DEFAULT_EXECUTABLE, DEFAULT_LOG_LEVEL, DEFAULT_SEGMENT_TIME_SECS};
use crate::capture::options::DEFAULT_STOP_GRACE;
use crate::capture::restart::{
    DEFAULT_DEGRADED_AFTER, DEFAULT_RESTART_INITIAL_DELAY, DEFAULT_RESTART_MAX_DELAY,
    DEFAULT_STABLE_AFTER,
};
use crate::capture::storage::DEFAULT_ROLLOVER_CHECK_INTERVAL;
use crate::capture::{CaptureSpec, RestartPolicy, UnitOptions};
use crate::fleet::DesiredFleet;
use crate::progress::StalenessPolicy;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/cameraleech.toml";
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8080";

const RECORDER_FLAGS: [&str; 4] = ["repeat", "level", "time", "datetime"];
const RECORDER_LEVELS: [&str; 9] = [
    "quiet", "panic", "fatal", "error", "warning", "info", "verbose", "debug", "trace",
];

/// Supervisor log verbosity as written in the config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Fatal,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Filter directive handed to the tracing subscriber. There is no fatal
    /// level in tracing, so it shares `error`.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Fatal | LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "warn" => Ok(LogLevel::Warn),
            "fatal" => Ok(LogLevel::Fatal),
            "error" => Ok(LogLevel::Error),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => bail!("log_level \"{other}\" must be one of fatal, error, warn, info, debug"),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Fatal => "fatal",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    listen_address: Option<String>,
    log_level: Option<String>,
    disable_hints: bool,
    supervisor: RawSupervisor,
    defaults: RawCamera,
    cameras: BTreeMap<String, RawCamera>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawSupervisor {
    restart_initial_delay_ms: Option<u64>,
    restart_max_delay_ms: Option<u64>,
    degraded_after: Option<u32>,
    stable_after_secs: Option<u64>,
    stop_grace_secs: Option<u64>,
    rollover_check_secs: Option<u64>,
    metrics_interval_secs: Option<u64>,
    stale_counters: Option<StalenessPolicy>,
}

/// Shared by `[defaults]` and every `[cameras.<name>]` table.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawCamera {
    url: Option<String>,
    ffmpeg_path: Option<PathBuf>,
    ffmpeg_log_level: Option<String>,
    storage_path: Option<PathBuf>,
    segment_time: Option<u64>,
}

/// Validated configuration for the whole supervisor.
///
/// Only constructed through [`SupervisorConfig::from_toml`] or
/// [`SupervisorConfig::load`], so every accessor returns checked values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    listen_address: SocketAddr,
    log_level: LogLevel,
    hints_enabled: bool,
    unit_options: UnitOptions,
    metrics_interval: Duration,
    cameras: DesiredFleet,
}

impl SupervisorConfig {
    /// Reads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(text).context("failed to parse TOML")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let listen_address = parse_listen_address(
            raw.listen_address
                .as_deref()
                .unwrap_or(DEFAULT_LISTEN_ADDRESS),
        )?;
        let log_level = raw.log_level.as_deref().unwrap_or_default().parse()?;
        let (unit_options, metrics_interval) = supervisor_options(&raw.supervisor)?;

        let mut cameras = DesiredFleet::new();
        for (name, camera) in &raw.cameras {
            let spec = camera_spec(name, camera, &raw.defaults)
                .with_context(|| format!("camera {name}"))?;
            cameras.insert(name.clone(), spec);
        }

        Ok(Self {
            listen_address,
            log_level,
            hints_enabled: !raw.disable_hints,
            unit_options,
            metrics_interval,
            cameras,
        })
    }

    /// Address the HTTP stats server binds to.
    pub fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Whether kernel writeback hints are logged at startup.
    pub fn hints_enabled(&self) -> bool {
        self.hints_enabled
    }

    pub fn unit_options(&self) -> UnitOptions {
        self.unit_options
    }

    /// Interval of the periodic fleet report.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Desired fleet keyed by camera name.
    pub fn cameras(&self) -> &DesiredFleet {
        &self.cameras
    }
}

fn supervisor_options(raw: &RawSupervisor) -> Result<(UnitOptions, Duration)> {
    let initial_delay = raw
        .restart_initial_delay_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_RESTART_INITIAL_DELAY);
    let max_delay = raw
        .restart_max_delay_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_RESTART_MAX_DELAY);
    let stable_after = raw
        .stable_after_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_STABLE_AFTER);
    let stop_grace = raw
        .stop_grace_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_STOP_GRACE);
    let rollover = raw
        .rollover_check_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_ROLLOVER_CHECK_INTERVAL);
    let metrics_interval = raw
        .metrics_interval_secs
        .map(Duration::from_secs)
        .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL);

    ensure_positive(initial_delay, "supervisor.restart_initial_delay_ms")?;
    ensure_positive(stable_after, "supervisor.stable_after_secs")?;
    ensure_positive(stop_grace, "supervisor.stop_grace_secs")?;
    ensure_positive(rollover, "supervisor.rollover_check_secs")?;
    ensure_positive(metrics_interval, "supervisor.metrics_interval_secs")?;
    if max_delay < initial_delay {
        bail!("supervisor.restart_max_delay_ms must not be below restart_initial_delay_ms");
    }

    let restart = RestartPolicy {
        initial_delay,
        max_delay,
        degraded_after: raw.degraded_after.unwrap_or(DEFAULT_DEGRADED_AFTER),
        stable_after,
    };
    let options = UnitOptions::default()
        .with_restart_policy(restart)
        .with_stop_grace(stop_grace)
        .with_rollover_check_interval(rollover)
        .with_staleness(raw.stale_counters.unwrap_or_default());
    Ok((options, metrics_interval))
}

fn camera_spec(name: &str, camera: &RawCamera, defaults: &RawCamera) -> Result<CaptureSpec> {
    validate_camera_name(name)?;

    let url = camera
        .url
        .as_deref()
        .or(defaults.url.as_deref())
        .unwrap_or_default()
        .trim();
    ensure_not_empty(url, "url")?;

    let storage_path = camera
        .storage_path
        .clone()
        .or_else(|| defaults.storage_path.clone())
        .unwrap_or_default();
    ensure_not_empty(&storage_path.to_string_lossy(), "storage_path")?;

    let executable = camera
        .ffmpeg_path
        .clone()
        .or_else(|| defaults.ffmpeg_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_EXECUTABLE));
    ensure_not_empty(&executable.to_string_lossy(), "ffmpeg_path")?;

    let log_level = camera
        .ffmpeg_log_level
        .as_deref()
        .or(defaults.ffmpeg_log_level.as_deref())
        .map(str::trim)
        .filter(|level| !level.is_empty())
        .unwrap_or(DEFAULT_LOG_LEVEL);
    validate_recorder_log_level(log_level)?;

    let segment_time = camera
        .segment_time
        .or(defaults.segment_time)
        .unwrap_or(DEFAULT_SEGMENT_TIME_SECS);
    if segment_time == 0 {
        bail!("segment_time must be greater than 0");
    }

    Ok(CaptureSpec::new(name, url)
        .with_executable(executable)
        .with_log_level(log_level)
        .with_storage_path(storage_path)
        .with_segment_time(segment_time))
}

/// Names become a directory component and a URL path segment.
fn validate_camera_name(name: &str) -> Result<()> {
    ensure_not_empty(name, "camera name")?;
    if name.contains('/') || name == "." || name == ".." {
        bail!("camera name \"{name}\" must be a single path component");
    }
    Ok(())
}

/// Accepts the recorder's `-loglevel` syntax: `+`-joined flags, each optionally
/// prefixed with `-` to clear it, plus at most one level name or number.
fn validate_recorder_log_level(value: &str) -> Result<()> {
    let mut levels = 0;
    for token in value.split('+').filter(|token| !token.is_empty()) {
        let flag = token.strip_prefix('-').unwrap_or(token);
        if RECORDER_FLAGS.contains(&flag) {
            continue;
        }
        if RECORDER_LEVELS.contains(&token) || token.parse::<i32>().is_ok() {
            levels += 1;
            continue;
        }
        bail!("ffmpeg_log_level \"{value}\": unknown flag or level \"{token}\"");
    }
    if levels > 1 {
        bail!("ffmpeg_log_level \"{value}\" names more than one level");
    }
    Ok(())
}

/// `":8080"` binds every interface, as it does for most daemons.
fn parse_listen_address(value: &str) -> Result<SocketAddr> {
    let value = value.trim();
    let candidate = if value.starts_with(':') {
        format!("0.0.0.0{value}")
    } else {
        value.to_owned()
    };
    candidate
        .parse()
        .with_context(|| format!("listen_address \"{value}\" is not a socket address"))
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn ensure_positive(value: Duration, field: &str) -> Result<()> {
    if value.is_zero() {
        bail!("{field} must be greater than 0");
    }
    Ok(())
}
