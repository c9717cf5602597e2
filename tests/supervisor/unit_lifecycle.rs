use std::time::{Duration, Instant};

use crate::support::{
    helpers::{fast_options, init, spec, wait_until},
    recorders,
};
use anyhow::{Context, Result};
use cameraleech::{CaptureUnit, UnitError, UnitState};
use chrono::Local;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn steady_recorder_publishes_windowed_snapshot() -> Result<()> {
    init();
    let storage = tempfile::tempdir()?;
    let mut unit = CaptureUnit::new(
        spec("front", &recorders::steady(), storage.path()),
        fast_options(),
    );
    let telemetry = unit.telemetry();

    unit.start().await?;
    let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
    assert!(storage.path().join("front").join(today).is_dir());

    wait_until("second window flushed", Duration::from_secs(10), || {
        telemetry.snapshot().frame == recorders::STEADY_FRAMES
    })
    .await?;

    let snapshot = telemetry.snapshot();
    assert_eq!(snapshot.fps, 25.0);
    assert_eq!(snapshot.bitrate, 1000);
    assert_eq!(snapshot.out_time_ms, recorders::STEADY_FRAMES * 40_000);
    assert_eq!(snapshot.drop_frames, 1);
    assert_eq!(telemetry.status().state, UnitState::Running);

    unit.stop()?;
    timeout(Duration::from_secs(5), unit.wait_stopped())
        .await
        .context("unit should stop promptly")?;
    assert_eq!(telemetry.status().state, UnitState::Stopped);
    assert_eq!(telemetry.status().restarts, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crashing_recorder_is_restarted_until_stopped() -> Result<()> {
    init();
    let storage = tempfile::tempdir()?;
    let mut unit = CaptureUnit::new(
        spec("flaky", &recorders::crash(), storage.path()),
        fast_options(),
    );
    let telemetry = unit.telemetry();
    unit.start().await?;

    let mut saw_stopped = false;
    wait_until("two crash restarts", Duration::from_secs(10), || {
        let status = telemetry.status();
        saw_stopped |= status.state == UnitState::Stopped;
        status.restarts >= 2
    })
    .await?;
    assert!(!saw_stopped, "a crash must never pass through Stopped");

    wait_until("unit flagged degraded", Duration::from_secs(10), || {
        telemetry.status().degraded
    })
    .await?;
    assert!(telemetry.status().consecutive_failures >= 3);

    unit.stop()?;
    timeout(Duration::from_secs(5), unit.wait_stopped())
        .await
        .context("crash loop should end after stop")?;
    let restarts = telemetry.status().restarts;
    assert_eq!(telemetry.status().state, UnitState::Stopped);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(telemetry.status().restarts, restarts, "no restart after stop");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_start_is_rejected_while_running() -> Result<()> {
    init();
    let storage = tempfile::tempdir()?;
    let mut unit = CaptureUnit::new(
        spec("door", &recorders::idle(), storage.path()),
        fast_options(),
    );
    unit.start().await?;

    let err = unit.start().await.expect_err("run already active");
    assert!(matches!(err, UnitError::AlreadyRunning { .. }), "{err}");

    unit.stop()?;
    unit.start().await.context("a stopped unit can start a new run")?;
    assert_ne!(unit.status().state, UnitState::Stopped);

    unit.stop()?;
    unit.wait_stopped().await;
    assert_eq!(unit.status().state, UnitState::Stopped);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recorder_ignoring_sigterm_is_killed_after_grace() -> Result<()> {
    init();
    let storage = tempfile::tempdir()?;
    let options = fast_options().with_stop_grace(Duration::from_millis(500));
    let mut unit = CaptureUnit::new(
        spec("stubborn", &recorders::stubborn(), storage.path()),
        options,
    );
    unit.start().await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stop_started = Instant::now();
    unit.stop()?;
    timeout(Duration::from_secs(10), unit.wait_stopped())
        .await
        .context("stubborn recorder should be killed")?;

    assert!(stop_started.elapsed() >= Duration::from_millis(500));
    assert_eq!(unit.status().state, UnitState::Stopped);
    assert_eq!(unit.status().restarts, 0);
    Ok(())
}
