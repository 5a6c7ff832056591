//! Registry locations

use crate::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the registry keeps node configs and the generation template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory holding one config file per node
    pub cnodes_dir: PathBuf,

    /// Template for generated configs, carrying the `autoip` directive
    pub template_path: PathBuf,

    /// Extension of config files, without the dot
    pub extension: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cnodes_dir: PathBuf::from("etc/cnodes"),
            template_path: PathBuf::from("etc/cnode.yaml"),
            extension: "yaml".to_string(),
        }
    }
}

impl RegistryConfig {
    pub fn new(cnodes_dir: impl Into<PathBuf>, template_path: impl Into<PathBuf>) -> Self {
        Self {
            cnodes_dir: cnodes_dir.into(),
            template_path: template_path.into(),
            ..Self::default()
        }
    }

    /// Root all relative locations at `base`
    pub fn rooted_at(mut self, base: &Path) -> Self {
        if self.cnodes_dir.is_relative() {
            self.cnodes_dir = base.join(&self.cnodes_dir);
        }
        if self.template_path.is_relative() {
            self.template_path = base.join(&self.template_path);
        }
        self
    }

    /// File a generated config for `mac` is written to
    pub fn canonical_path(&self, mac: &str) -> PathBuf {
        self.cnodes_dir
            .join(format!("{}.{}", mac.replace(':', "-"), self.extension))
    }

    pub fn validate(&self) -> Result<()> {
        if self.cnodes_dir.as_os_str().is_empty() {
            return Err(RegistryError::Validation(
                "cnodes_dir cannot be empty".to_string(),
            ));
        }
        if self.template_path.as_os_str().is_empty() {
            return Err(RegistryError::Validation(
                "template_path cannot be empty".to_string(),
            ));
        }
        if self.extension.is_empty() || self.extension.contains(['.', '/']) {
            return Err(RegistryError::Validation(format!(
                "invalid config file extension [{}]",
                self.extension
            )));
        }
        Ok(())
    }
}
