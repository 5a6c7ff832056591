//! # dhpc-cc
//!
//! Control center for different-hpc clusters.
//!
//! Wires the aliveness tracker and the compute node registry together and
//! exposes what the network-boot handler and the admin surface consume:
//! boot parameters per MAC, node listings and liveness listings.

pub mod center;
pub mod config;
pub mod output;

pub use center::{AlivenessView, ControlCenter, NodeView};
pub use config::{CcConfig, LoggingConfig, PulseSource};

#[derive(Debug, thiserror::Error)]
pub enum CcError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(#[from] dhpc_registry::RegistryError),

    #[error("Aliveness error: {0}")]
    Pulse(#[from] dhpc_pulse::PulseError),

    #[error("Core error: {0}")]
    Core(#[from] dhpc_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, CcError>;

/// Initialize logging; `RUST_LOG` overrides the configured level
pub fn init_logging(logging_config: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging_config.level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(logging_config.show_target)
        .with_writer(std::io::stderr);

    let installed = match logging_config.format.as_str() {
        "json" => subscriber.json().try_init(),
        _ => subscriber.try_init(),
    };
    installed.map_err(|e| CcError::Config(format!("Failed to initialize logging: {}", e)))
}
