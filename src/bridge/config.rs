//! Bridge configuration.
//!
//! This module defines the settings shared by the host bridge and the script
//! runtime: the global name the script side is published under, value limits
//! enforced while decoding, and the optional correlation timeout.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::BridgeError;
use super::value::{MAX_VALUE_BYTES, MAX_VALUE_DEPTH};

/// Decoding limits handed to the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_depth: usize,
    pub max_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: MAX_VALUE_DEPTH,
            max_bytes: MAX_VALUE_BYTES,
        }
    }
}

/// Configuration for a single bridge session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Global name of the script-side bridge object (default: "Bridge")
    pub bridge_name: String,

    /// Maximum nesting depth accepted while decoding
    pub max_depth: usize,

    /// Maximum payload size in bytes accepted while decoding
    pub max_bytes: usize,

    /// Reject host->script promise calls that see no completion in time
    pub correlation_timeout_ms: Option<u64>,

    /// Warn about handles still registered when the session ends
    pub warn_on_leaks: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bridge_name: "Bridge".to_string(),
            max_depth: MAX_VALUE_DEPTH,
            max_bytes: MAX_VALUE_BYTES,
            correlation_timeout_ms: None,
            warn_on_leaks: true,
        }
    }
}

impl BridgeConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, BridgeError> {
        let config: BridgeConfig =
            serde_json::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_bridge_name(mut self, name: impl Into<String>) -> Self {
        self.bridge_name = name.into();
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_bytes(mut self, bytes: usize) -> Self {
        self.max_bytes = bytes;
        self
    }

    pub fn with_correlation_timeout(mut self, timeout: Duration) -> Self {
        self.correlation_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_leak_warnings(mut self, enabled: bool) -> Self {
        self.warn_on_leaks = enabled;
        self
    }

    /// Get the correlation timeout, if any.
    pub fn correlation_timeout(&self) -> Option<Duration> {
        self.correlation_timeout_ms.map(Duration::from_millis)
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_depth: self.max_depth,
            max_bytes: self.max_bytes,
        }
    }

    /// Check that the configuration can be used.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if !is_script_identifier(&self.bridge_name) {
            return Err(BridgeError::Config(format!(
                "Bridge name '{}' is not a valid script identifier",
                self.bridge_name
            )));
        }
        if self.max_depth == 0 {
            return Err(BridgeError::Config("max_depth must be positive".into()));
        }
        if self.max_bytes == 0 {
            return Err(BridgeError::Config("max_bytes must be positive".into()));
        }
        if self.correlation_timeout_ms == Some(0) {
            return Err(BridgeError::Config(
                "correlation timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn is_script_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
