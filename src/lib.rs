pub mod capture;
pub mod fleet;
pub mod http;
pub mod progress;
pub mod runtime;

pub use capture::{
    CaptureSpec, CaptureUnit, RestartPolicy, UnitError, UnitOptions, UnitState, UnitStatus,
    UnitTelemetry,
};
pub use fleet::{
    DesiredFleet, FleetReconciler, FleetRegistry, ReconcileReport, TelemetryQuery, UnitNotFound,
};
pub use http::StatsServer;
pub use progress::{StalenessPolicy, StatsSnapshot};
pub use runtime::config::{LogLevel, SupervisorConfig};
pub use runtime::runner::Runner;
pub use runtime::telemetry::init_tracing;
