//! Engine and node configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GraphError, Result};

/// Engine-wide settings. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Samples per second.
    pub sample_rate: f32,
    /// Frames rendered per block.
    pub block_size: usize,
    /// Entries in each transfer table.
    pub table_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            block_size: 128,
            table_len: 44100,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(GraphError::InvalidConfig(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.block_size == 0 {
            return Err(GraphError::InvalidConfig("block_size must be non-zero".into()));
        }
        if self.table_len < 2 {
            return Err(GraphError::InvalidConfig(format!(
                "table_len must be at least 2, got {}",
                self.table_len
            )));
        }
        Ok(())
    }
}

/// Per-instance settings handed to a node factory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub label: Option<String>,
    pub settings: Map<String, Value>,
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// A numeric setting. Absent keys yield `None`; present but non-numeric
    /// values are an error.
    pub fn f32(&self, key: &str) -> Result<Option<f32>> {
        match self.settings.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_f64()
                .map(|v| Some(v as f32))
                .ok_or_else(|| invalid(key, "a number", value)),
        }
    }

    pub fn bool(&self, key: &str) -> Result<Option<bool>> {
        match self.settings.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_bool()
                .map(Some)
                .ok_or_else(|| invalid(key, "a boolean", value)),
        }
    }

    /// A list whose entries are strings or `null`.
    pub fn string_list(&self, key: &str) -> Result<Option<Vec<Option<String>>>> {
        let Some(value) = self.settings.get(key) else {
            return Ok(None);
        };
        let items = value
            .as_array()
            .ok_or_else(|| invalid(key, "an array", value))?;
        items
            .iter()
            .map(|item| match item {
                Value::Null => Ok(None),
                Value::String(text) => Ok(Some(text.clone())),
                other => Err(invalid(key, "strings or null", other)),
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}

fn invalid(key: &str, expected: &str, found: &Value) -> GraphError {
    GraphError::InvalidConfig(format!("setting '{key}' must be {expected}, got {found}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = EngineConfig::from_json(r#"{"block_size": 64}"#).unwrap();
        assert_eq!(config.block_size, 64);
        assert_eq!(config.sample_rate, 44100.0);
        assert_eq!(config.table_len, 44100);
    }

    #[test]
    fn invalid_engine_config() {
        assert!(matches!(
            EngineConfig::from_json(r#"{"table_len": 1}"#),
            Err(GraphError::InvalidConfig(_))
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{"sample_rate": -1}"#),
            Err(GraphError::InvalidConfig(_))
        ));
        assert!(matches!(
            EngineConfig::from_json("not json"),
            Err(GraphError::InvalidConfig(_))
        ));
    }

    #[test]
    fn node_settings_accessors() {
        let config = NodeConfig::from_json(
            r#"{"label": "sat", "settings": {"drive": 6, "keys": ["KeyA", null], "dedupe": false}}"#,
        )
        .unwrap();

        assert_eq!(config.label.as_deref(), Some("sat"));
        assert_eq!(config.f32("drive").unwrap(), Some(6.0));
        assert_eq!(config.f32("missing").unwrap(), None);
        assert_eq!(config.bool("dedupe").unwrap(), Some(false));
        assert_eq!(
            config.string_list("keys").unwrap(),
            Some(vec![Some("KeyA".to_string()), None])
        );
        assert!(config.f32("keys").is_err());
    }

    #[test]
    fn builder_settings() {
        let config = NodeConfig::new().with_label("g").with("gain", 0.5);
        assert_eq!(config.f32("gain").unwrap(), Some(0.5));
    }
}
