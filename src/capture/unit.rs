//! One supervised recorder process.
//!
//! Every successful [`CaptureUnit::start`] creates a *run*: a cancellation
//! token, a stop flag guarded by a mutex, a supervisor task that owns the child
//! process and a day-rollover task. Crash restarts stay inside the run. Once a
//! run's stop flag is set it is never cleared; a later `start` creates a new
//! run after the old one has been joined.

use super::command::Invocation;
use super::error::UnitError;
use super::options::UnitOptions;
use super::restart::{sleep_with_cancellation, RestartBackoff};
use super::spec::CaptureSpec;
use super::status::{UnitState, UnitStatus};
use super::storage;
use crate::progress::{ProgressPipeline, StatsSnapshot};
use chrono::Local;
use futures::FutureExt;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Split};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Log target for everything the recorder itself prints.
pub const RECORDER_TARGET: &str = "cameraleech::recorder";

/// How long output streams may stay open after the process exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

type StdoutLines = Split<BufReader<ChildStdout>>;

/// Read side of a unit: what the registry and queries hold on to.
#[derive(Debug, Clone)]
pub struct UnitTelemetry {
    name: String,
    snapshot: watch::Receiver<StatsSnapshot>,
    status: watch::Receiver<UnitStatus>,
}

impl UnitTelemetry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        *self.snapshot.borrow()
    }

    pub fn status(&self) -> UnitStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<UnitStatus> {
        self.status.clone()
    }
}

#[derive(Debug)]
struct UnitChannels {
    snapshot: Arc<watch::Sender<StatsSnapshot>>,
    status: watch::Sender<UnitStatus>,
}

impl UnitChannels {
    fn new() -> Self {
        let (snapshot, _) = watch::channel(StatsSnapshot::default());
        let (status, _) = watch::channel(UnitStatus::default());
        Self {
            snapshot: Arc::new(snapshot),
            status,
        }
    }

    /// Moves to `state` unless a stop is pending; only `Stopped` ends that.
    fn set_state(&self, state: UnitState) {
        self.status.send_if_modified(|status| {
            if status.state == state
                || (status.state == UnitState::StopRequested && state != UnitState::Stopped)
            {
                return false;
            }
            status.state = state;
            true
        });
    }

    fn request_stop(&self) {
        self.status.send_if_modified(|status| {
            if matches!(status.state, UnitState::Stopped | UnitState::StopRequested) {
                return false;
            }
            status.state = UnitState::StopRequested;
            true
        });
    }

    fn record_backoff(&self, backoff: &RestartBackoff, restarted: bool) {
        self.status.send_modify(|status| {
            if restarted {
                status.restarts = status.restarts.saturating_add(1);
            }
            status.consecutive_failures = backoff.consecutive_failures();
            status.degraded = backoff.is_degraded();
            if status.state != UnitState::StopRequested {
                status.state = UnitState::Restarting;
            }
        });
    }

    fn finish(&self) {
        self.status.send_modify(|status| status.state = UnitState::Stopped);
    }
}

#[derive(Debug, Default)]
struct RunControl {
    stop_requested: bool,
    pid: Option<u32>,
}

fn lock(control: &Mutex<RunControl>) -> MutexGuard<'_, RunControl> {
    control.lock().unwrap_or_else(PoisonError::into_inner)
}

struct UnitRun {
    token: CancellationToken,
    control: Arc<Mutex<RunControl>>,
    supervisor: JoinHandle<()>,
    rollover: JoinHandle<()>,
}

impl UnitRun {
    fn stop_requested(&self) -> bool {
        lock(&self.control).stop_requested
    }

    fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }
}

/// Owns one recorder process and its restart state machine.
pub struct CaptureUnit {
    spec: CaptureSpec,
    options: UnitOptions,
    channels: Arc<UnitChannels>,
    run: Option<UnitRun>,
}

impl CaptureUnit {
    pub fn new(spec: CaptureSpec, options: UnitOptions) -> Self {
        Self {
            spec,
            options,
            channels: Arc::new(UnitChannels::new()),
            run: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &CaptureSpec {
        &self.spec
    }

    pub fn status(&self) -> UnitStatus {
        *self.channels.status.borrow()
    }

    pub fn telemetry(&self) -> UnitTelemetry {
        UnitTelemetry {
            name: self.spec.name.clone(),
            snapshot: self.channels.snapshot.subscribe(),
            status: self.channels.status.subscribe(),
        }
    }

    /// Swaps the spec used by the next [`start`](Self::start). The current run,
    /// if any, keeps the spec it was launched with.
    pub fn replace_spec(&mut self, spec: CaptureSpec) {
        self.spec = spec;
    }

    /// Ensures today's directory, launches the recorder and spawns the run's
    /// tasks. Failures after this returns are handled by the run itself.
    pub async fn start(&mut self) -> Result<(), UnitError> {
        if let Some(run) = &self.run {
            if !run.stop_requested() && !run.is_finished() {
                return Err(UnitError::AlreadyRunning {
                    unit: self.spec.name.clone(),
                });
            }
        }
        self.wait_stopped().await;

        storage::ensure_today(&self.spec).await?;

        let token = CancellationToken::new();
        let control = Arc::new(Mutex::new(RunControl::default()));
        self.channels.set_state(UnitState::Starting);

        let child = {
            let mut guard = lock(&control);
            launch(&self.spec, &mut guard)
        };
        let child = match child {
            Ok(child) => child,
            Err(err) => {
                self.channels.finish();
                return Err(err);
            }
        };
        tracing::info!(unit = %self.spec.name, pid = ?child.id(), "recorder launched");

        let supervisor = RunSupervisor {
            spec: self.spec.clone(),
            options: self.options,
            channels: self.channels.clone(),
            control: control.clone(),
            token: token.clone(),
        };
        let channels = self.channels.clone();
        let unit = self.spec.name.clone();
        let supervisor = tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(supervisor.run(child)).catch_unwind().await {
                let panic_msg = panic_message(panic.as_ref());
                tracing::error!(unit = %unit, panic = %panic_msg, "unit supervisor panicked");
                channels.finish();
            }
        });
        let rollover = spawn_rollover_loop(
            self.spec.clone(),
            self.options.rollover_check_interval(),
            token.clone(),
        );

        self.run = Some(UnitRun {
            token,
            control,
            supervisor,
            rollover,
        });
        Ok(())
    }

    /// Marks the run as stopping, sends SIGTERM to the recorder and cancels
    /// the run's tasks. Does not wait for the process to exit; see
    /// [`wait_stopped`](Self::wait_stopped).
    pub fn stop(&mut self) -> Result<(), UnitError> {
        let Some(run) = &self.run else {
            return Ok(());
        };
        tracing::info!(unit = %self.spec.name, "stopping unit");

        let signalled = {
            let mut control = lock(&run.control);
            control.stop_requested = true;
            match control.pid {
                Some(pid) => signal_terminate(pid),
                None => Ok(()),
            }
        };
        self.channels.request_stop();
        run.token.cancel();

        signalled.map_err(|source| UnitError::Stop {
            unit: self.spec.name.clone(),
            source,
        })
    }

    #[cfg(test)]
    fn recorded_pid(&self) -> Option<u32> {
        self.run.as_ref().and_then(|run| lock(&run.control).pid)
    }

    /// Joins the current run. Only returns once the run ended, so callers
    /// must have called [`stop`](Self::stop) first.
    pub async fn wait_stopped(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };

        if let Err(err) = run.supervisor.await {
            tracing::warn!(unit = %self.spec.name, error = %err, "unit supervisor task failed");
        }
        run.token.cancel();
        if let Err(err) = run.rollover.await {
            tracing::warn!(unit = %self.spec.name, error = %err, "rollover task failed");
        }
    }
}

impl Drop for CaptureUnit {
    fn drop(&mut self) {
        if self.run.as_ref().is_some_and(|run| !run.stop_requested()) {
            if let Err(err) = self.stop() {
                tracing::warn!(
                    unit = %self.spec.name,
                    error = %err,
                    "failed to stop dropped unit"
                );
            }
        }
    }
}

struct RunSupervisor {
    spec: CaptureSpec,
    options: UnitOptions,
    channels: Arc<UnitChannels>,
    control: Arc<Mutex<RunControl>>,
    token: CancellationToken,
}

impl RunSupervisor {
    async fn run(self, mut child: Child) {
        let mut pipeline = ProgressPipeline::new(
            self.spec.name.clone(),
            self.options.staleness(),
            self.channels.snapshot.clone(),
        );
        let mut backoff = RestartBackoff::new(self.options.restart_policy());

        loop {
            let started = Instant::now();
            self.channels.set_state(UnitState::Running);

            let status = self.watch_process(&mut child, &mut pipeline).await;
            pipeline.end_of_stream();

            let restart_delay = {
                let control = lock(&self.control);
                if control.stop_requested {
                    None
                } else {
                    Some(backoff.record_exit(started.elapsed()))
                }
            };

            let Some(mut delay) = restart_delay else {
                tracing::info!(unit = %self.spec.name, status = ?status, "recorder stopped");
                self.channels.finish();
                return;
            };

            self.channels.record_backoff(&backoff, true);
            if backoff.is_degraded() {
                tracing::error!(
                    unit = %self.spec.name,
                    status = ?status,
                    failures = backoff.consecutive_failures(),
                    restart_in = ?delay,
                    "recorder keeps exiting; unit degraded"
                );
            } else {
                tracing::warn!(
                    unit = %self.spec.name,
                    status = ?status,
                    restart_in = ?delay,
                    "recorder exited unexpectedly; restarting"
                );
            }

            child = loop {
                if !sleep_with_cancellation(delay, &self.token).await {
                    self.channels.finish();
                    return;
                }

                match self.relaunch().await {
                    Ok(Some(child)) => break child,
                    Ok(None) => {
                        tracing::info!(unit = %self.spec.name, "stop requested before relaunch");
                        self.channels.finish();
                        return;
                    }
                    Err(err) => {
                        delay = backoff.record_failure();
                        self.channels.record_backoff(&backoff, false);
                        tracing::warn!(
                            unit = %self.spec.name,
                            error = %err,
                            retry_in = ?delay,
                            "failed to relaunch recorder"
                        );
                    }
                }
            };
        }
    }

    /// Relaunches unless a stop arrived; the flag is checked under the run
    /// lock right before spawning.
    async fn relaunch(&self) -> Result<Option<Child>, UnitError> {
        storage::ensure_today(&self.spec).await?;

        let mut control = lock(&self.control);
        if control.stop_requested {
            return Ok(None);
        }
        self.channels.set_state(UnitState::Starting);
        let child = launch(&self.spec, &mut control)?;
        tracing::info!(unit = %self.spec.name, pid = ?child.id(), "recorder relaunched");
        Ok(Some(child))
    }

    async fn watch_process(
        &self,
        child: &mut Child,
        pipeline: &mut ProgressPipeline,
    ) -> io::Result<ExitStatus> {
        let mut stdout = child
            .stdout
            .take()
            .map(|out| BufReader::new(out).split(b'\n'));
        let stderr = child
            .stderr
            .take()
            .map(|err| spawn_stderr_forwarder(self.spec.name.clone(), err));

        let status = tokio::select! {
            status = self.pump_until_exit(child, &mut stdout, pipeline) => status,
            _ = self.token.cancelled() => self.wait_with_grace(child, &mut stdout, pipeline).await,
        };
        lock(&self.control).pid = None;

        if let Some(lines) = stdout.take() {
            self.drain_stdout(lines, pipeline).await;
        }
        if let Some(handle) = stderr {
            self.join_forwarder(handle).await;
        }
        status
    }

    async fn pump_until_exit(
        &self,
        child: &mut Child,
        stdout: &mut Option<StdoutLines>,
        pipeline: &mut ProgressPipeline,
    ) -> io::Result<ExitStatus> {
        loop {
            let Some(lines) = stdout.as_mut() else {
                return child.wait().await;
            };

            tokio::select! {
                biased;
                segment = lines.next_segment() => {
                    if !self.consume_stdout(segment, pipeline) {
                        *stdout = None;
                    }
                }
                status = child.wait() => return status,
            }
        }
    }

    async fn wait_with_grace(
        &self,
        child: &mut Child,
        stdout: &mut Option<StdoutLines>,
        pipeline: &mut ProgressPipeline,
    ) -> io::Result<ExitStatus> {
        let grace = self.options.stop_grace();
        match timeout(grace, self.pump_until_exit(child, stdout, pipeline)).await {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(
                    unit = %self.spec.name,
                    grace = ?grace,
                    "recorder ignored SIGTERM; killing"
                );
                if let Err(err) = child.start_kill() {
                    tracing::debug!(unit = %self.spec.name, error = %err, "kill failed");
                }
                child.wait().await
            }
        }
    }

    async fn drain_stdout(&self, mut lines: StdoutLines, pipeline: &mut ProgressPipeline) {
        let drained = timeout(OUTPUT_DRAIN_TIMEOUT, async {
            loop {
                let segment = lines.next_segment().await;
                if !self.consume_stdout(segment, pipeline) {
                    break;
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::debug!(unit = %self.spec.name, "recorder stdout still open after exit");
        }
    }

    /// Returns `false` once the stream is exhausted.
    fn consume_stdout(
        &self,
        segment: io::Result<Option<Vec<u8>>>,
        pipeline: &mut ProgressPipeline,
    ) -> bool {
        match segment {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes);
                let line = line.trim_end();
                if !pipeline.push_line(line) && !line.is_empty() {
                    tracing::debug!(target: RECORDER_TARGET, unit = %self.spec.name, "{line}");
                }
                true
            }
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(
                    unit = %self.spec.name,
                    error = %err,
                    "failed to read recorder stdout"
                );
                false
            }
        }
    }

    async fn join_forwarder(&self, handle: JoinHandle<()>) {
        let abort = handle.abort_handle();
        match timeout(OUTPUT_DRAIN_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(
                    unit = %self.spec.name,
                    error = %err,
                    "stderr forwarder task failed"
                );
            }
            Err(_) => abort.abort(),
        }
    }
}

fn launch(spec: &CaptureSpec, control: &mut RunControl) -> Result<Child, UnitError> {
    let child = Invocation::for_spec(spec)
        .to_command()
        .spawn()
        .map_err(|source| UnitError::Launch {
            unit: spec.name.clone(),
            source,
        })?;
    control.pid = child.id();
    Ok(child)
}

/// A process that already exited is not an error.
fn signal_terminate(pid: u32) -> Result<(), Errno> {
    let pid = i32::try_from(pid).map_err(|_| Errno::EINVAL)?;
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(err),
    }
}

fn spawn_stderr_forwarder(unit: String, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).split(b'\n');
        loop {
            match lines.next_segment().await {
                Ok(Some(bytes)) => {
                    let line = String::from_utf8_lossy(&bytes);
                    let line = line.trim_end();
                    if !line.is_empty() {
                        tracing::info!(target: RECORDER_TARGET, unit = %unit, "{line}");
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(unit = %unit, error = %err, "failed to read recorder stderr");
                    break;
                }
            }
        }
    })
}

fn spawn_rollover_loop(
    spec: CaptureSpec,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match storage::prepare_rollover(&spec, Local::now().naive_local()).await {
                        Ok(Some(path)) => {
                            tracing::info!(
                                unit = %spec.name,
                                path = %path.display(),
                                "prepared next day directory"
                            );
                        }
                        Ok(None) => {}
                        Err(err) => {
                            tracing::error!(
                                unit = %spec.name,
                                error = %err,
                                "failed to prepare next day directory"
                            );
                        }
                    }
                }
            }
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
