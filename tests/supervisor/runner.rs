use std::time::Duration;

use crate::support::{
    helpers::{fleet_toml, http_get, init, wait_until_async},
    recorders,
};
use anyhow::{Context, Result};
use cameraleech::{Runner, SupervisorConfig};
use hyper::StatusCode;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_serves_stats_and_reloads_fleet() -> Result<()> {
    init();
    let storage = tempfile::tempdir()?;
    let config_dir = tempfile::tempdir()?;
    let config_path = config_dir.path().join("cameraleech.toml");
    std::fs::write(
        &config_path,
        fleet_toml(&recorders::steady(), storage.path(), &["front"]),
    )?;

    let mut runner = Runner::load(&config_path)?;
    let report = runner.start().await?;
    assert_eq!(report.added, vec!["front"]);
    let addr = runner.stats_address().context("stats server bound")?;

    let (status, body) = http_get(addr, "/cameras.json").await?;
    assert_eq!(status, StatusCode::OK);
    let listing: serde_json::Value = serde_json::from_str(&body)?;
    assert_eq!(listing, serde_json::json!({"data": [{"{#CAMERA}": "front"}]}));

    wait_until_async("frame counter served", Duration::from_secs(10), || async move {
        matches!(http_get(addr, "/camera/front/frame").await, Ok((_, body)) if body == "120")
    })
    .await?;
    let (_, fps) = http_get(addr, "/camera/front/fps").await?;
    assert_eq!(fps, "25.000000");
    let (_, outtime) = http_get(addr, "/camera/front/outtime").await?;
    assert_eq!(outtime, "4");

    let (status, body) = http_get(addr, "/camera/back/frame").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "Didn't find camera \"back\"\n");

    std::fs::write(
        &config_path,
        fleet_toml(&recorders::idle(), storage.path(), &["back"]),
    )?;
    let report = runner.reload().await?;
    assert_eq!(report.removed, vec!["front"]);
    assert_eq!(report.added, vec!["back"]);
    assert_eq!(runner.query().list_unit_names(), vec!["back"]);

    std::fs::write(&config_path, "listen_address = [")?;
    assert!(runner.reload().await.is_err());
    assert_eq!(
        runner.query().list_unit_names(),
        vec!["back"],
        "a broken config keeps the fleet"
    );

    runner.shutdown().await;
    assert!(runner.query().list_unit_names().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_exits_when_token_cancelled() -> Result<()> {
    init();
    let storage = tempfile::tempdir()?;
    let config = SupervisorConfig::from_toml(&fleet_toml(
        &recorders::idle(),
        storage.path(),
        &["door", "yard"],
    ))?;

    let mut runner = Runner::new(storage.path().join("unused.toml"), config);
    let token = runner.cancellation_token();
    let query = runner.query();

    let handle = tokio::spawn(async move { runner.run_until_signalled().await });

    wait_until_async("fleet started", Duration::from_secs(10), || {
        let query = query.clone();
        async move { query.list_unit_names().len() == 2 }
    })
    .await?;

    token.cancel();
    timeout(Duration::from_secs(10), handle)
        .await
        .context("runner should exit after cancellation")???;
    assert!(query.list_unit_names().is_empty());
    Ok(())
}
