//! Runtime glue: configuration, logging, kernel hints and the signal-driven
//! runner.

pub mod config;
pub mod hints;
pub mod runner;
pub mod telemetry;
