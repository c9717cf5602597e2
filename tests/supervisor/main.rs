#![cfg(unix)]

#[path = "../support/mod.rs"]
mod support;

mod reconcile;
mod runner;
mod unit_lifecycle;
