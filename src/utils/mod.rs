//! Shared utilities.

mod telemetry;

pub use telemetry::{init_telemetry, init_telemetry_json, DEFAULT_LOG_FILTER};
