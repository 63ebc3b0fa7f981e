//! Error monitoring for headless operation.
//!
//! Failures that must not stop the queue (a log store that cannot write,
//! a re-run request for an unknown Action type) are reported here instead
//! of being propagated, so they stay visible without blocking anything.

pub mod monitor;

pub use monitor::{
    ErrorReporter, ErrorSeverity, HealthError, HealthMonitorConfig, SystemHealthMonitor,
};
