//! Descriptive metadata carried by every Action.

use serde::{Deserialize, Serialize};

/// Descriptive record of an Action.
///
/// The log stores a deep copy of this record, and the registry rebuilds an
/// Action from it, so `parameters` must hold everything a constructor needs
/// to recreate the work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInfo {
    /// Registry key naming the Action implementation (e.g. `"wait"`).
    #[serde(rename = "type")]
    pub type_name: String,
    /// One-line label shown in queues and logs.
    #[serde(default)]
    pub short_description: String,
    /// Free-form detail; empty if not given.
    #[serde(default)]
    pub long_description: String,
    /// Icon reference for presentation layers.
    #[serde(default)]
    pub icon: Option<String>,
    /// Expected duration in seconds, if known.
    #[serde(default)]
    pub expected_duration: Option<f64>,
    /// Implementation-specific parameters.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl ActionInfo {
    /// An info record with no parameters, icon or expected duration.
    pub fn new(type_name: impl Into<String>, short_description: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            short_description: short_description.into(),
            long_description: String::new(),
            icon: None,
            expected_duration: None,
            parameters: serde_json::Value::Null,
        }
    }

    /// Set the long description.
    pub fn with_long_description(mut self, text: impl Into<String>) -> Self {
        self.long_description = text.into();
        self
    }

    /// Set the icon name.
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Set the expected duration in seconds.
    pub fn with_expected_duration(mut self, seconds: f64) -> Self {
        self.expected_duration = Some(seconds);
        self
    }

    /// Replace the parameter map.
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Look up a numeric parameter.
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(|v| v.as_f64())
    }

    /// Look up an unsigned integer parameter.
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(|v| v.as_u64())
    }
}
