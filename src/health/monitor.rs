//! Bounded error history with tracing output.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// How bad a reported error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Worth recording, nothing failed.
    Info,
    /// Degraded but working.
    Warning,
    /// An operation failed.
    Error,
    /// The engine cannot do its job.
    Critical,
}

/// One reported error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthError {
    /// Component that reported it (e.g. `"action_log"`).
    pub source: String,
    /// How bad it is.
    pub severity: ErrorSeverity,
    /// What went wrong.
    pub message: String,
    /// When it was reported.
    pub timestamp: DateTime<Utc>,
}

/// Sink for non-fatal errors.
pub trait ErrorReporter: Send + Sync {
    /// Record one error from `source`.
    fn report(&self, source: &str, severity: ErrorSeverity, message: String);
}

/// Limits for [`SystemHealthMonitor`].
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Errors kept before the oldest are dropped.
    pub max_errors: usize,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self { max_errors: 256 }
    }
}

/// Keeps the most recent errors and logs each one as it arrives.
#[derive(Debug)]
pub struct SystemHealthMonitor {
    config: HealthMonitorConfig,
    errors: Mutex<VecDeque<HealthError>>,
}

impl Default for SystemHealthMonitor {
    fn default() -> Self {
        Self::new(HealthMonitorConfig::default())
    }
}

impl SystemHealthMonitor {
    /// A monitor holding at most `config.max_errors` errors.
    pub fn new(config: HealthMonitorConfig) -> Self {
        Self {
            errors: Mutex::new(VecDeque::with_capacity(config.max_errors.min(1024))),
            config,
        }
    }

    /// Most recent errors, oldest first.
    pub fn recent_errors(&self) -> Vec<HealthError> {
        self.errors.lock().iter().cloned().collect()
    }

    /// Number of errors held.
    pub fn error_count(&self) -> usize {
        self.errors.lock().len()
    }

    /// True if nothing at `Error` severity or above has been reported.
    pub fn is_healthy(&self) -> bool {
        self.errors
            .lock()
            .iter()
            .all(|e| e.severity < ErrorSeverity::Error)
    }

    /// Forget every held error.
    pub fn clear(&self) {
        self.errors.lock().clear();
    }
}

impl ErrorReporter for SystemHealthMonitor {
    fn report(&self, source: &str, severity: ErrorSeverity, message: String) {
        match severity {
            ErrorSeverity::Info => info!(source, %message, "Health report"),
            ErrorSeverity::Warning => warn!(source, %message, "Health warning"),
            ErrorSeverity::Error | ErrorSeverity::Critical => {
                error!(source, ?severity, %message, "Health error")
            }
        }
        let mut errors = self.errors.lock();
        if self.config.max_errors == 0 {
            return;
        }
        while errors.len() >= self.config.max_errors {
            errors.pop_front();
        }
        errors.push_back(HealthError {
            source: source.to_string(),
            severity,
            message,
            timestamp: Utc::now(),
        });
    }
}
