//! Control center configuration

use crate::{CcError, Result};
use dhpc_pulse::PulseConfig;
use dhpc_registry::RegistryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Configuration of the control center, read from `etc/cc.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CcConfig {
    /// Node config locations
    pub registry: RegistryConfig,

    /// Aliveness tracking
    pub pulse: PulseSource,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Where the aliveness tunables come from and how probes run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseSource {
    /// Tunables file; defaults apply when it does not exist
    pub config_file: PathBuf,

    /// Executable invoked as `<program> -c <count> <ip>`
    pub probe_program: String,
}

impl Default for PulseSource {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from("etc/pulse.yaml"),
            probe_program: "ping".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,

    /// Show target in logs
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            show_target: false,
        }
    }
}

impl CcConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CcError::Config(format!("Failed to read config file [{}]: {}", path.display(), e))
        })?;
        let config: CcConfig = serde_yaml::from_str(&content)
            .map_err(|e| CcError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| CcError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Root all relative paths at `base`
    pub fn rooted_at(mut self, base: &Path) -> Self {
        self.registry = self.registry.rooted_at(base);
        if self.pulse.config_file.is_relative() {
            self.pulse.config_file = base.join(&self.pulse.config_file);
        }
        self
    }

    /// Aliveness tunables, from the configured file when it exists
    pub fn load_pulse(&self) -> Result<PulseConfig> {
        let path = &self.pulse.config_file;
        if path.exists() {
            info!("Loading pulse config from [{}]", path.display());
            Ok(PulseConfig::from_file(path)?)
        } else {
            info!("No pulse config at [{}], using defaults", path.display());
            Ok(PulseConfig::default())
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.registry.validate()?;

        if self.pulse.probe_program.is_empty() {
            return Err(CcError::Config("Probe program cannot be empty".to_string()));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(CcError::Config(format!("Invalid log level: {}", other)));
            }
        }

        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(CcError::Config(format!("Invalid log format: {}", other)));
            }
        }

        Ok(())
    }
}
