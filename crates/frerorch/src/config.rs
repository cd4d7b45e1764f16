//! Daemon configuration file.
//!
//! YAML, default location `/etc/sonic/frerorchd.yaml`. Every section is
//! optional. The `instances` map is replayed with `conf_set` before the
//! engine is started, standing in for persisted configuration.
//!
//! ```yaml
//! heartbeat_interval_ms: 500
//! frer:
//!   default_stream_id_max: 127
//! sim:
//!   port_cnt: 8
//!   iflow_pop: true
//! instances:
//!   1:
//!     mode: recovery
//!     stream_ids: [3]
//!     egress_ports: [0, 1]
//!     admin_active: true
//! ```

use crate::frer::{FrerConf, FrerInstId, FrerOrchConfig};
use crate::sim::SimCapabilities;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/frerorchd.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

/// Top level daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default)]
    pub frer: FrerOrchConfig,

    /// Simulated switch the engine runs against.
    #[serde(default)]
    pub sim: SimCapabilities,

    /// Instance configurations applied at startup.
    #[serde(default)]
    pub instances: BTreeMap<FrerInstId, FrerConf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            frer: FrerOrchConfig::default(),
            sim: SimCapabilities::default(),
            instances: BTreeMap::new(),
        }
    }
}

impl DaemonConfig {
    pub fn from_yaml(yaml: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: DaemonConfig = serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Catches settings the engine would only reject much later, or not at
    /// all. Instance configurations are validated by the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat_interval_ms must be > 0".to_string()));
        }
        if self.sim.port_cnt == 0 {
            return Err(ConfigError::Invalid("sim.port_cnt must be > 0".to_string()));
        }
        if let Some(inst) = self.instances.keys().find(|&&inst| inst == 0) {
            return Err(ConfigError::Invalid(format!("instance id {} is out of range", inst)));
        }
        Ok(())
    }
}

/// Loads `path`.
pub fn load(path: impl AsRef<Path>) -> Result<DaemonConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    DaemonConfig::from_yaml(&content, &path.display().to_string())
}

/// Loads `path`, falling back to defaults if it does not exist.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<DaemonConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        log::info!("{} not found, using defaults", path.display());
        return Ok(DaemonConfig::default());
    }
    load(path)
}
