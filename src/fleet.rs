//! The live fleet: registry, reconciliation and read-only queries.

pub mod query;
pub mod reconciler;
pub mod registry;

pub use query::{TelemetryQuery, UnitNotFound};
pub use reconciler::{DesiredFleet, FleetReconciler, ReconcileReport};
pub use registry::FleetRegistry;
