// Common library for the scan scheduler: store and queue gateways, the
// scheduling core, configuration and telemetry

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod queue;
pub mod scheduler;
pub mod telemetry;
