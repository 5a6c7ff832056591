//! Reachability probes

use crate::{PulseError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

/// Probe that tells whether an IP answers
///
/// `Ok(false)` means the target did not answer. An `Err` means the probe
/// itself could not run, and says nothing about the target.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, ip: &str, count: u32) -> Result<bool>;
}

/// ICMP probe via the system `ping` utility
#[derive(Debug, Clone)]
pub struct PingProber {
    program: String,
}

impl PingProber {
    pub fn new() -> Self {
        Self::with_program("ping")
    }

    /// Use another executable, invoked as `<program> -c <count> <ip>`
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for PingProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, ip: &str, count: u32) -> Result<bool> {
        trace!("Pinging {} with {} requests", ip, count);

        let status = Command::new(&self.program)
            .arg("-c")
            .arg(count.to_string())
            .arg(ip)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| {
                PulseError::ProbeProcess(format!("failed to run {} for {}: {}", self.program, ip, e))
            })?;

        match status.code() {
            Some(0) => Ok(true),
            Some(code) => {
                debug!("{} did not answer, {} exited with {}", ip, self.program, code);
                Ok(false)
            }
            None => Err(PulseError::ProbeProcess(format!(
                "{} for {} terminated by signal",
                self.program, ip
            ))),
        }
    }
}

#[cfg(any(test, feature = "mock"))]
pub use mock::MockProber;

#[cfg(any(test, feature = "mock"))]
mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    /// Scripted prober: IPs answer only when marked alive
    #[derive(Debug, Default)]
    pub struct MockProber {
        alive: Mutex<HashSet<String>>,
        broken: Mutex<HashSet<String>>,
        probes: Mutex<HashMap<String, u64>>,
    }

    impl MockProber {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_alive(&self, ip: &str, alive: bool) {
            let mut set = self.alive.lock();
            if alive {
                set.insert(ip.to_string());
            } else {
                set.remove(ip);
            }
        }

        /// Make probes of `ip` fail to run at all
        pub fn set_broken(&self, ip: &str, broken: bool) {
            let mut set = self.broken.lock();
            if broken {
                set.insert(ip.to_string());
            } else {
                set.remove(ip);
            }
        }

        /// Number of probes issued for `ip`
        pub fn probe_count(&self, ip: &str) -> u64 {
            self.probes.lock().get(ip).copied().unwrap_or(0)
        }

        pub fn total_probes(&self) -> u64 {
            self.probes.lock().values().sum()
        }
    }

    #[async_trait]
    impl Prober for MockProber {
        async fn probe(&self, ip: &str, _count: u32) -> Result<bool> {
            *self.probes.lock().entry(ip.to_string()).or_insert(0) += 1;
            if self.broken.lock().contains(ip) {
                return Err(PulseError::ProbeProcess(format!("mock probe of {} broken", ip)));
            }
            Ok(self.alive.lock().contains(ip))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_prober() {
        let prober = MockProber::new();
        assert!(!prober.probe("10.0.0.1", 1).await.unwrap());

        prober.set_alive("10.0.0.1", true);
        assert!(prober.probe("10.0.0.1", 1).await.unwrap());

        prober.set_broken("10.0.0.1", true);
        assert!(matches!(
            prober.probe("10.0.0.1", 1).await,
            Err(PulseError::ProbeProcess(_))
        ));
        assert_eq!(prober.probe_count("10.0.0.1"), 3);
        assert_eq!(prober.total_probes(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ping_prober_exit_status() {
        // `true` and `false` ignore their arguments
        assert!(PingProber::with_program("true").probe("10.0.0.1", 1).await.unwrap());
        assert!(!PingProber::with_program("false").probe("10.0.0.1", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_ping_prober_missing_program() {
        let prober = PingProber::with_program("/nonexistent/dhpc-ping");
        let err = prober.probe("10.0.0.1", 1).await.unwrap_err();
        assert!(matches!(err, PulseError::ProbeProcess(_)));
    }
}
