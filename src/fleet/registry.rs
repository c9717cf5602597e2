use crate::capture::UnitTelemetry;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Notify;

/// Live units by name. Written only by the reconciler; read concurrently by
/// queries.
#[derive(Debug, Default)]
pub struct FleetRegistry {
    units: RwLock<BTreeMap<String, UnitTelemetry>>,
    removed: Notify,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, telemetry: UnitTelemetry) {
        self.write().insert(telemetry.name().to_owned(), telemetry);
    }

    pub(crate) fn remove(&self, name: &str) -> Option<UnitTelemetry> {
        let removed = self.write().remove(name);
        self.removed.notify_waiters();
        removed
    }

    /// Names in identifier order.
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<UnitTelemetry> {
        self.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Resolves once no unit is registered. Re-checked after every removal.
    pub async fn wait_until_empty(&self) {
        loop {
            let notified = self.removed.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, UnitTelemetry>> {
        self.units.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, UnitTelemetry>> {
        self.units.write().unwrap_or_else(PoisonError::into_inner)
    }
}
