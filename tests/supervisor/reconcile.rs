use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{fast_options, init, spec, wait_until},
    recorders,
};
use anyhow::{Context, Result};
use cameraleech::{
    CaptureSpec, DesiredFleet, FleetReconciler, FleetRegistry, TelemetryQuery, UnitState,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn desired(specs: impl IntoIterator<Item = CaptureSpec>) -> DesiredFleet {
    specs
        .into_iter()
        .map(|spec| (spec.name.clone(), spec))
        .collect::<BTreeMap<_, _>>()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconcile_adds_updates_and_removes_units() -> Result<()> {
    init();
    let storage = tempfile::tempdir()?;
    let registry = Arc::new(FleetRegistry::new());
    let query = TelemetryQuery::new(registry.clone());
    let mut reconciler = FleetReconciler::new(registry.clone(), fast_options());

    let door = spec("door", &recorders::idle(), storage.path());
    let yard = spec("yard", &recorders::idle(), storage.path());

    let report = reconciler
        .reconcile(&desired([yard.clone(), door.clone()]))
        .await;
    assert_eq!(report.added, vec!["door", "yard"]);
    assert!(report.failed.is_empty());
    assert_eq!(query.list_unit_names(), vec!["door", "yard"]);

    let report = reconciler
        .reconcile(&desired([yard.clone(), door.clone()]))
        .await;
    assert!(report.is_noop(), "unchanged specs must not be touched: {report:?}");

    let door_hourly = door.clone().with_segment_time(600);
    let report = reconciler
        .reconcile(&desired([yard.clone(), door_hourly.clone()]))
        .await;
    assert_eq!(report.restarted, vec!["door"]);
    assert!(report.added.is_empty() && report.removed.is_empty());
    assert_eq!(query.list_unit_names(), vec!["door", "yard"]);
    assert_ne!(query.status("door")?.state, UnitState::Stopped);
    assert_eq!(query.status("door")?.restarts, 0, "spec changes are not crash restarts");

    let yard_status = query.status("yard")?;
    let report = reconciler.reconcile(&desired([yard.clone()])).await;
    assert_eq!(report.removed, vec!["door"]);
    assert_eq!(query.list_unit_names(), vec!["yard"]);
    assert!(query.snapshot("door").is_err());
    assert_eq!(query.status("yard")?, yard_status);

    reconciler.shutdown().await;
    assert!(registry.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn launch_failure_is_skipped_and_retried_next_pass() -> Result<()> {
    init();
    let storage = tempfile::tempdir()?;
    let registry = Arc::new(FleetRegistry::new());
    let mut reconciler = FleetReconciler::new(registry.clone(), fast_options());

    let broken = spec("gate", &storage.path().join("missing-recorder"), storage.path());
    let working = spec("door", &recorders::idle(), storage.path());

    let report = reconciler
        .reconcile(&desired([broken.clone(), working.clone()]))
        .await;
    assert_eq!(report.failed, vec!["gate"]);
    assert_eq!(report.added, vec!["door"]);
    assert_eq!(registry.names(), vec!["door"]);

    let fixed = broken.with_executable(recorders::idle());
    let report = reconciler
        .reconcile(&desired([fixed, working]))
        .await;
    assert_eq!(report.added, vec!["gate"]);
    assert_eq!(registry.names(), vec!["door", "gate"]);

    reconciler.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_restart_drops_unit_from_registry() -> Result<()> {
    init();
    let storage = tempfile::tempdir()?;
    let registry = Arc::new(FleetRegistry::new());
    let mut reconciler = FleetReconciler::new(registry.clone(), fast_options());

    let door = spec("door", &recorders::idle(), storage.path());
    reconciler.reconcile(&desired([door.clone()])).await;
    assert!(registry.contains("door"));

    let broken = door.with_executable(storage.path().join("missing-recorder"));
    let report = reconciler.reconcile(&desired([broken])).await;
    assert_eq!(report.failed, vec!["door"]);
    assert!(!registry.contains("door"));

    reconciler.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_drains_every_unit() -> Result<()> {
    init();
    let storage = tempfile::tempdir()?;
    let registry = Arc::new(FleetRegistry::new());
    let query = TelemetryQuery::new(registry.clone());
    let mut reconciler = FleetReconciler::new(registry.clone(), fast_options());

    let fleet = desired([
        spec("a", &recorders::steady(), storage.path()),
        spec("b", &recorders::crash(), storage.path()),
        spec("c", &recorders::idle(), storage.path()),
    ]);
    let report = reconciler.reconcile(&fleet).await;
    assert_eq!(report.added.len(), 3);

    wait_until("crashing unit restarted", Duration::from_secs(10), || {
        query.status("b").map(|status| status.restarts > 0).unwrap_or(false)
    })
    .await?;

    let waiter = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.wait_until_empty().await })
    };

    timeout(Duration::from_secs(10), reconciler.shutdown())
        .await
        .context("shutdown should drain the fleet")?;
    timeout(Duration::from_secs(1), waiter)
        .await
        .context("registry waiters should wake")??;
    assert!(query.list_unit_names().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queries_stay_consistent_while_fleet_changes() -> Result<()> {
    init();
    let storage = tempfile::tempdir()?;
    let registry = Arc::new(FleetRegistry::new());
    let query = TelemetryQuery::new(registry.clone());
    let mut reconciler = FleetReconciler::new(registry.clone(), fast_options());

    let stop = CancellationToken::new();
    let resolved = Arc::new(AtomicU64::new(0));
    let reader = {
        let query = query.clone();
        let stop = stop.clone();
        let resolved = resolved.clone();
        tokio::spawn(async move {
            while !stop.is_cancelled() {
                for name in query.list_unit_names() {
                    match (query.snapshot(&name), query.status(&name)) {
                        (Ok(_), Ok(_)) => {
                            resolved.fetch_add(1, Ordering::Relaxed);
                        }
                        (Err(missing), _) | (_, Err(missing)) => {
                            assert_eq!(missing.name(), name);
                        }
                    }
                }
                for (name, _, _) in query.fleet() {
                    assert!(!name.is_empty());
                }
                tokio::task::yield_now().await;
            }
        })
    };

    let specs: Vec<CaptureSpec> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|name| spec(name, &recorders::idle(), storage.path()))
        .collect();
    for pass in 0..6 {
        let fleet = if pass % 2 == 0 {
            desired(specs.clone())
        } else {
            desired(specs[..1].to_vec())
        };
        let report = reconciler.reconcile(&fleet).await;
        assert!(report.failed.is_empty(), "pass {pass}: {report:?}");
        assert_eq!(
            query.list_unit_names(),
            fleet.keys().cloned().collect::<Vec<_>>(),
            "pass {pass}"
        );
    }

    wait_until("reader resolved a unit", Duration::from_secs(5), || {
        resolved.load(Ordering::Relaxed) > 0
    })
    .await?;
    stop.cancel();
    timeout(Duration::from_secs(5), reader)
        .await
        .context("reader should stop once cancelled")??;

    reconciler.shutdown().await;
    assert!(registry.is_empty());
    Ok(())
}
