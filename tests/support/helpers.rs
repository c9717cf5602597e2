use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use cameraleech::{CaptureSpec, RestartPolicy, UnitOptions};
use hyper::{Client, StatusCode, Uri};
use once_cell::sync::Lazy;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use super::recorders;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

/// Installs test logging and writes the recorder scripts.
pub fn init() {
    Lazy::force(&TRACING_SUBSCRIBER);
    recorders::prepare();
}

/// Restart schedule short enough for tests.
pub fn fast_options() -> UnitOptions {
    UnitOptions::default()
        .with_restart_policy(RestartPolicy {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            degraded_after: 3,
            stable_after: Duration::from_secs(60),
        })
        .with_stop_grace(Duration::from_secs(2))
}

pub fn spec(name: &str, recorder: &Path, storage: &Path) -> CaptureSpec {
    CaptureSpec::new(name, format!("rtsp://127.0.0.1/{name}"))
        .with_executable(recorder)
        .with_storage_path(storage)
}

/// Polls `check` every 25ms until it returns `true`.
pub async fn wait_until<F>(what: &str, timeout: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    loop {
        if check() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("{what} did not happen within {timeout:?}");
        }
        sleep(Duration::from_millis(25)).await;
    }
}

/// Like [`wait_until`] for async checks.
pub async fn wait_until_async<F, Fut>(what: &str, timeout: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    loop {
        if check().await {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("{what} did not happen within {timeout:?}");
        }
        sleep(Duration::from_millis(50)).await;
    }
}

pub async fn http_get(addr: SocketAddr, path: &str) -> Result<(StatusCode, String)> {
    let uri: Uri = format!("http://{addr}{path}")
        .parse()
        .context("invalid request uri")?;
    let response = Client::new()
        .get(uri)
        .await
        .with_context(|| format!("GET {path} failed"))?;
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body())
        .await
        .context("failed to read response body")?;
    Ok((status, String::from_utf8_lossy(&bytes).into_owned()))
}

/// TOML for a fleet of cameras all using `recorder`.
pub fn fleet_toml(recorder: &Path, storage: &Path, cameras: &[&str]) -> String {
    let mut text = format!(
        r#"listen_address = "127.0.0.1:0"
disable_hints = true

[supervisor]
restart_initial_delay_ms = 50
restart_max_delay_ms = 200
stop_grace_secs = 2

[defaults]
ffmpeg_path = "{}"
storage_path = "{}"
"#,
        recorder.display(),
        storage.display()
    );
    for camera in cameras {
        text.push_str(&format!(
            "\n[cameras.{camera}]\nurl = \"rtsp://127.0.0.1/{camera}\"\n"
        ));
    }
    text
}
