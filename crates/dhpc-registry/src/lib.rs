//! # dhpc-registry
//!
//! Registry of compute node boot configurations.
//!
//! Each node's config lives in one YAML file under the configs directory,
//! keyed by the node's MAC. The registry:
//! - scans the directory once and caches what it finds
//! - quarantines files that fail validation instead of aborting the scan
//! - generates a config from the template for a MAC it has never seen,
//!   picking an IP from the template's `autoip` pool
//! - reuses the longest-dead IP of the pool when no fresh one is left
//! - applies operator edits with optimistic concurrency
//!
//! ## Example
//!
//! ```rust,no_run
//! use dhpc_pulse::{AlivenessTracker, PingProber, PulseConfig};
//! use dhpc_registry::{NodeRegistry, RegistryConfig};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tracker = AlivenessTracker::new(PulseConfig::default(), Arc::new(PingProber::new()));
//! let registry = NodeRegistry::new(RegistryConfig::default(), tracker);
//!
//! let cfg = registry.resolve("52:54:00:12:34:56").await?;
//! println!("{} boots as {}", cfg.mac, cfg.ip);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use thiserror::Error;

use dhpc_core::ComputeNodeConfig;

pub mod autoip;
pub mod config;
pub mod registry;
pub mod store;

pub use autoip::{Assignment, AutoIp, Template};
pub use config::RegistryConfig;
pub use registry::NodeRegistry;
pub use store::{load_config, Quarantine};

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors raised by the registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No available IP in configured range, all {alive} occupied")]
    NotAssignable { alive: usize },

    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Aliveness error: {0}")]
    Pulse(#[from] dhpc_pulse::PulseError),

    #[error("Core error: {0}")]
    Core(#[from] dhpc_core::Error),
}

impl RegistryError {
    /// Create a template error
    pub fn template(msg: impl Into<String>) -> Self {
        RegistryError::Template(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        RegistryError::InvalidRequest(msg.into())
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            RegistryError::Io(_) => "io",
            RegistryError::Validation(_) | RegistryError::Yaml(_) | RegistryError::Core(_) => {
                "validation"
            }
            RegistryError::NotAssignable { .. } => "capacity",
            RegistryError::InvalidMac(_) | RegistryError::InvalidRequest(_) => "request",
            RegistryError::Template(_) => "template",
            RegistryError::Pulse(e) => e.category(),
        }
    }
}

/// Result of [`NodeRegistry::save_edit`]
#[derive(Debug, Clone)]
pub enum SaveOutcome {
    /// Written; holds the reloaded config, or `None` when the new content
    /// failed validation and the file was quarantined
    Saved(Option<Arc<ComputeNodeConfig>>),

    /// The file changed since the edit started; nothing was written
    Conflict {
        current_text: String,
        modified: String,
    },
}

impl SaveOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, SaveOutcome::Conflict { .. })
    }
}
