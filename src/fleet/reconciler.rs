use super::registry::FleetRegistry;
use crate::capture::{CaptureSpec, CaptureUnit, UnitOptions};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Desired fleet keyed by unit name.
pub type DesiredFleet = BTreeMap<String, CaptureSpec>;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub removed: Vec<String>,
    pub added: Vec<String>,
    pub restarted: Vec<String>,
    pub failed: Vec<String>,
}

impl ReconcileReport {
    /// `true` when the pass changed nothing and nothing failed.
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty()
            && self.added.is_empty()
            && self.restarted.is_empty()
            && self.failed.is_empty()
    }
}

/// Drives the live fleet towards a desired set of specs.
///
/// Every mutating method takes `&mut self`, so passes never overlap.
pub struct FleetReconciler {
    units: BTreeMap<String, CaptureUnit>,
    registry: Arc<FleetRegistry>,
    options: UnitOptions,
}

impl FleetReconciler {
    pub fn new(registry: Arc<FleetRegistry>, options: UnitOptions) -> Self {
        Self {
            units: BTreeMap::new(),
            registry,
            options,
        }
    }

    pub fn registry(&self) -> Arc<FleetRegistry> {
        self.registry.clone()
    }

    /// Options applied to units created from now on.
    pub fn set_options(&mut self, options: UnitOptions) {
        self.options = options;
    }

    /// Removes units missing from `desired`, starts new ones and restarts the
    /// ones whose spec changed. Per-unit failures are logged and reported;
    /// the pass always runs to completion.
    pub async fn reconcile(&mut self, desired: &DesiredFleet) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let stale: Vec<String> = self
            .units
            .keys()
            .filter(|name| !desired.contains_key(*name))
            .cloned()
            .collect();
        for name in stale {
            self.remove_unit(name, &mut report).await;
        }

        for (name, spec) in desired {
            if !self.units.contains_key(name) {
                self.add_unit(name, spec, &mut report).await;
            }
        }

        for (name, spec) in desired {
            if self.units.get(name).is_some_and(|unit| unit.spec() != spec) {
                self.restart_unit(name, spec, &mut report).await;
            }
        }

        tracing::info!(
            removed = report.removed.len(),
            added = report.added.len(),
            restarted = report.restarted.len(),
            failed = report.failed.len(),
            units = self.units.len(),
            "fleet reconciled"
        );
        report
    }

    async fn remove_unit(&mut self, name: String, report: &mut ReconcileReport) {
        let Some(unit) = self.units.get_mut(&name) else {
            return;
        };

        if let Err(err) = unit.stop() {
            tracing::error!(unit = %name, error = %err, "failed to stop removed unit");
            report.failed.push(name);
            return;
        }
        unit.wait_stopped().await;

        self.units.remove(&name);
        self.registry.remove(&name);
        tracing::info!(unit = %name, "unit removed");
        report.removed.push(name);
    }

    async fn add_unit(&mut self, name: &str, spec: &CaptureSpec, report: &mut ReconcileReport) {
        let mut unit = CaptureUnit::new(spec.clone(), self.options);
        if let Err(err) = unit.start().await {
            tracing::error!(unit = %name, error = %err, "failed to start unit");
            report.failed.push(name.to_owned());
            return;
        }

        self.registry.insert(unit.telemetry());
        self.units.insert(name.to_owned(), unit);
        tracing::info!(unit = %name, "unit added");
        report.added.push(name.to_owned());
    }

    async fn restart_unit(&mut self, name: &str, spec: &CaptureSpec, report: &mut ReconcileReport) {
        let Some(unit) = self.units.get_mut(name) else {
            return;
        };

        if let Err(err) = unit.stop() {
            tracing::error!(
                unit = %name,
                error = %err,
                "failed to stop changed unit; keeping old spec"
            );
            report.failed.push(name.to_owned());
            return;
        }
        unit.wait_stopped().await;
        unit.replace_spec(spec.clone());

        if let Err(err) = unit.start().await {
            tracing::error!(unit = %name, error = %err, "failed to restart changed unit");
            self.units.remove(name);
            self.registry.remove(name);
            report.failed.push(name.to_owned());
            return;
        }

        tracing::info!(unit = %name, "unit restarted with new spec");
        report.restarted.push(name.to_owned());
    }

    /// Stops every unit, joins them and empties the registry.
    pub async fn shutdown(&mut self) {
        for (name, unit) in self.units.iter_mut() {
            if let Err(err) = unit.stop() {
                tracing::warn!(unit = %name, error = %err, "failed to signal unit during shutdown");
            }
        }

        let units = std::mem::take(&mut self.units);
        let registry = self.registry.clone();
        join_all(units.into_iter().map(|(name, mut unit)| {
            let registry = registry.clone();
            async move {
                unit.wait_stopped().await;
                registry.remove(&name);
                tracing::debug!(unit = %name, "unit drained");
            }
        }))
        .await;

        self.registry.wait_until_empty().await;
        tracing::info!("all units stopped");
    }
}
