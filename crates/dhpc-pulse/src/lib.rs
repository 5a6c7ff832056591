//! # dhpc-pulse
//!
//! IP aliveness tracking for compute nodes.
//!
//! The tracker keeps one [`IpAliveness`] record per IP that some compute node
//! config claims. A background loop drains a bounded probe queue and pings
//! each queued IP at most once per check interval. An IP assumed alive is
//! declared dead only after probes have kept failing for the death
//! confirmation delay, and a dead IP is dropped from tracking after the
//! forget delay.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dhpc_pulse::{AlivenessTracker, PingProber, PulseConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tracker = AlivenessTracker::new(PulseConfig::default(), Arc::new(PingProber::new()));
//!     let worker = tracker.start()?;
//!
//!     let check = tracker.check_alive("10.0.0.5").await?;
//!     println!("10.0.0.5 alive: {}", check.alive);
//!
//!     tracker.shutdown();
//!     worker.await?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

pub mod aliveness;
pub mod config;
pub mod probe;
pub mod tracker;

pub use aliveness::{IpAliveness, LivenessStatus};
pub use config::PulseConfig;
pub use probe::{PingProber, Prober};
pub use tracker::{AliveCheck, AlivenessTracker, CycleOutcome, TrackerStats};

#[cfg(any(test, feature = "mock"))]
pub use probe::MockProber;

/// Result type for aliveness operations
pub type Result<T> = std::result::Result<T, PulseError>;

/// Errors raised by aliveness tracking
#[derive(Error, Debug)]
pub enum PulseError {
    /// The probe could not be run at all, as opposed to the target not answering
    #[error("Probe process error: {0}")]
    ProbeProcess(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Tracker already started")]
    AlreadyStarted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PulseError {
    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            PulseError::ProbeProcess(_) => "probe",
            PulseError::Configuration(_) | PulseError::Yaml(_) => "configuration",
            PulseError::AlreadyStarted => "lifecycle",
            PulseError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(PulseError::ProbeProcess("x".into()).category(), "probe");
        assert_eq!(PulseError::AlreadyStarted.category(), "lifecycle");
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(PulseError::from(io).category(), "io");
    }
}
