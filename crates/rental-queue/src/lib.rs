pub mod config;
pub mod error;
pub mod sessions;
pub mod telemetry;
pub mod workflows;
