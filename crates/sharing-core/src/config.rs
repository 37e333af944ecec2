//! JSON-backed configuration addressed by module, tag and key.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration root must be an object")]
    NotAnObject,
}

/// Configuration document shaped as `{ module: { tag: { key: value } } }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonConfig {
    root: Map<String, Value>,
}

impl JsonConfig {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an already parsed JSON value.
    ///
    /// # Errors
    /// Returns error if the value is not an object.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            _ => Err(ConfigError::NotAnObject),
        }
    }

    /// Parse from a JSON string.
    ///
    /// # Errors
    /// Returns error if the string is not a JSON object.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Load from a file on disk.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.display(), modules = config.root.len(), "Loaded configuration");
        Ok(config)
    }

    /// Get a raw value.
    #[must_use]
    pub fn get_value(&self, module: &str, tag: &str, key: &str) -> Option<&Value> {
        self.root.get(module)?.get(tag)?.get(key)
    }

    /// Get an `i32` value; out-of-range or non-integer values read as absent.
    #[must_use]
    pub fn get_i32(&self, module: &str, tag: &str, key: &str) -> Option<i32> {
        self.get_value(module, tag, key)?
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
    }

    /// Set a value, creating intermediate objects as needed.
    pub fn set_value(&mut self, module: &str, tag: &str, key: &str, value: Value) {
        let module = self
            .root
            .entry(module)
            .or_insert_with(|| Value::Object(Map::new()));
        if !module.is_object() {
            *module = Value::Object(Map::new());
        }
        let Value::Object(module) = module else {
            return;
        };
        let tag = module
            .entry(tag)
            .or_insert_with(|| Value::Object(Map::new()));
        if !tag.is_object() {
            *tag = Value::Object(Map::new());
        }
        if let Value::Object(tag) = tag {
            tag.insert(key.to_string(), value);
        }
    }

    /// Overlay another document on top of this one, tag by tag.
    pub fn merge(&mut self, other: &Self) {
        for (module, tags) in &other.root {
            let Value::Object(tags) = tags else { continue };
            for (tag, keys) in tags {
                let Value::Object(keys) = keys else { continue };
                for (key, value) in keys {
                    self.set_value(module, tag, key, value.clone());
                }
            }
        }
    }
}

/// Global agent and context quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLimits {
    pub max_context: u32,
    pub max_sink_agent: u32,
    pub max_src_agent: u32,
}

impl AgentLimits {
    pub const DEFAULT_MAX_CONTEXT: u32 = 10;
    pub const DEFAULT_MAX_SINK_AGENT: u32 = 10;
    pub const DEFAULT_MAX_SRC_AGENT: u32 = 20;

    /// Read `context.agentLimit.*`, falling back to defaults per key.
    #[must_use]
    pub fn from_config(config: &JsonConfig) -> Self {
        let read = |key: &str, fallback: u32| {
            config
                .get_i32("context", "agentLimit", key)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(fallback)
        };
        Self {
            max_context: read("maxContext", Self::DEFAULT_MAX_CONTEXT),
            max_sink_agent: read("maxSinkAgent", Self::DEFAULT_MAX_SINK_AGENT),
            max_src_agent: read("maxSrcAgent", Self::DEFAULT_MAX_SRC_AGENT),
        }
    }
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_context: Self::DEFAULT_MAX_CONTEXT,
            max_sink_agent: Self::DEFAULT_MAX_SINK_AGENT,
            max_src_agent: Self::DEFAULT_MAX_SRC_AGENT,
        }
    }
}

/// Read `network.networkLimit.logOn`; anything but `1` is off.
#[must_use]
pub fn network_log_on(config: &JsonConfig) -> Option<bool> {
    config
        .get_i32("network", "networkLimit", "logOn")
        .map(|v| v == 1)
}
