use crate::capture::UnitState;
use crate::fleet::TelemetryQuery;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

pub const METRICS_TARGET: &str = "cameraleech::metrics";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the global tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to
/// `default_directive`. Calling this function multiple times is harmless; only the
/// first call decides the filter.
pub fn init_tracing(default_directive: &str) {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Fleet-wide counters derived from the live registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FleetSummary {
    pub units: usize,
    pub running: usize,
    pub restarting: usize,
    pub degraded: usize,
    pub restarts: u64,
}

impl FleetSummary {
    pub fn collect(query: &TelemetryQuery) -> Self {
        query
            .fleet()
            .into_iter()
            .fold(Self::default(), |mut summary, (_, _, status)| {
                summary.units += 1;
                match status.state {
                    UnitState::Running => summary.running += 1,
                    UnitState::Starting | UnitState::Restarting => summary.restarting += 1,
                    UnitState::StopRequested | UnitState::Stopped => {}
                }
                if status.degraded {
                    summary.degraded += 1;
                }
                summary.restarts = summary.restarts.saturating_add(status.restarts);
                summary
            })
    }
}

/// Spawns a background task that periodically logs a fleet summary plus one
/// line per unit at debug level.
pub fn spawn_metrics_reporter(
    query: TelemetryQuery,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: METRICS_TARGET, "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let summary = FleetSummary::collect(&query);
                    tracing::info!(
                        target: METRICS_TARGET,
                        units = summary.units,
                        running = summary.running,
                        restarting = summary.restarting,
                        degraded = summary.degraded,
                        restarts = summary.restarts,
                        "fleet metrics snapshot"
                    );

                    for (name, snapshot, status) in query.fleet() {
                        tracing::debug!(
                            target: METRICS_TARGET,
                            unit = %name,
                            state = %status.state,
                            frame = snapshot.frame,
                            fps = format!("{:.2}", snapshot.fps),
                            bitrate = snapshot.bitrate,
                            drop_frames = snapshot.drop_frames,
                            "unit metrics snapshot"
                        );
                    }
                }
            }
        }
    })
}
