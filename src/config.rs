//! Application configuration loaded from TOML.
//!
//! ```toml
//! [engine]
//! max_firings = 10000
//! join_scope = "flow"
//! base_path = "/api"
//!
//! [engine.passthrough]
//! routes = ["/Sessioning/start"]
//!
//! [runtime]
//! workers = 4
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::runtime::RuntimeConfig;
use crate::engine::EngineConfig;
use crate::error::ValidationError;

/// Top-level configuration: every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// `[engine]` section.
    pub engine: EngineConfig,
    /// `[runtime]` section.
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ValidationError> {
        let config: Self = toml::from_str(text).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_toml_str(&text)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.engine.validate()?;
        self.runtime.validate()
    }
}
