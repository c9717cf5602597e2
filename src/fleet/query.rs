use super::registry::FleetRegistry;
use crate::capture::{UnitStatus, UnitTelemetry};
use crate::progress::StatsSnapshot;
use std::fmt;
use std::sync::Arc;

/// Returned when a query names a unit that is not registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitNotFound {
    name: String,
}

impl UnitNotFound {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for UnitNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit \"{}\" is not registered", self.name)
    }
}

impl std::error::Error for UnitNotFound {}

/// Read-only view over the live registry.
#[derive(Debug, Clone)]
pub struct TelemetryQuery {
    registry: Arc<FleetRegistry>,
}

impl TelemetryQuery {
    pub fn new(registry: Arc<FleetRegistry>) -> Self {
        Self { registry }
    }

    pub fn list_unit_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn snapshot(&self, name: &str) -> Result<StatsSnapshot, UnitNotFound> {
        self.unit(name).map(|unit| unit.snapshot())
    }

    pub fn status(&self, name: &str) -> Result<UnitStatus, UnitNotFound> {
        self.unit(name).map(|unit| unit.status())
    }

    /// Every registered unit with its snapshot and status, in identifier order.
    pub fn fleet(&self) -> Vec<(String, StatsSnapshot, UnitStatus)> {
        self.registry
            .names()
            .into_iter()
            .filter_map(|name| {
                let unit = self.registry.get(&name)?;
                Some((name, unit.snapshot(), unit.status()))
            })
            .collect()
    }

    fn unit(&self, name: &str) -> Result<UnitTelemetry, UnitNotFound> {
        self.registry.get(name).ok_or_else(|| UnitNotFound {
            name: name.to_owned(),
        })
    }
}
