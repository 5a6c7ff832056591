//! Configuration for aliveness tracking

use crate::{PulseError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables of the aliveness tracker, read from `etc/pulse.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseConfig {
    /// User name used in ssh urls shown for nodes
    pub ssh_user: String,

    /// Echo requests sent per probe
    pub ping_count: u32,

    /// Minimum time between two probes of the same IP
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,

    /// How long probes must keep failing before an assumed-alive IP is declared dead
    #[serde(with = "humantime_serde")]
    pub death_confirm: Duration,

    /// How long a dead IP is remembered before it is dropped from tracking
    #[serde(with = "humantime_serde")]
    pub forget_dead: Duration,

    /// Capacity of the probe queue
    pub queue_capacity: usize,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            ssh_user: "root".to_string(),
            ping_count: 3,
            check_interval: Duration::from_secs(60),
            death_confirm: Duration::from_secs(300),  // 5 minutes
            forget_dead: Duration::from_secs(86400), // 1 day
            queue_capacity: 500,
        }
    }
}

impl PulseConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PulseError::Configuration(format!(
                "Failed to read pulse config [{}]: {}",
                path.display(),
                e
            ))
        })?;
        let config: PulseConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Set the number of echo requests per probe
    pub fn with_ping_count(mut self, count: u32) -> Self {
        self.ping_count = count;
        self
    }

    /// Set the minimum interval between probes
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set the death confirmation delay
    pub fn with_death_confirm(mut self, delay: Duration) -> Self {
        self.death_confirm = delay;
        self
    }

    /// Set how long dead IPs are remembered
    pub fn with_forget_dead(mut self, delay: Duration) -> Self {
        self.forget_dead = delay;
        self
    }

    /// Set the probe queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ping_count == 0 {
            return Err(PulseError::Configuration(
                "pingCount must be greater than zero".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(PulseError::Configuration(
                "queueCapacity must be greater than zero".to_string(),
            ));
        }

        if self.ssh_user.is_empty() {
            return Err(PulseError::Configuration("sshUser cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Window before a due check in which a skipped probe is re-queued
    /// rather than dropped: roughly the time one probe round takes.
    pub fn recheck_window(&self) -> Duration {
        Duration::from_secs(u64::from(self.ping_count))
    }

    /// ssh url for logging into the node at `ip`
    pub fn ssh_url(&self, ip: &str) -> String {
        format!("ssh://{}@{}", self.ssh_user, ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = PulseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, 500);
        assert_eq!(config.recheck_window(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_human_durations() {
        let yaml = "\
sshUser: admin
pingCount: 2
checkInterval: 30s
deathConfirm: 2m
forgetDead: 1h 30m
";
        let config: PulseConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ssh_user, "admin");
        assert_eq!(config.ping_count, 2);
        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert_eq!(config.death_confirm, Duration::from_secs(120));
        assert_eq!(config.forget_dead, Duration::from_secs(5400));
        // absent keys keep their defaults
        assert_eq!(config.queue_capacity, 500);
    }

    #[test]
    fn test_config_validation() {
        assert!(PulseConfig::new().with_ping_count(0).validate().is_err());
        assert!(PulseConfig::new().with_queue_capacity(0).validate().is_err());

        let mut config = PulseConfig::default();
        config.ssh_user.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_operations() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pulse.yaml");

        let config = PulseConfig::new().with_check_interval(Duration::from_secs(15));
        config.to_file(&path).unwrap();

        let loaded = PulseConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);

        assert!(PulseConfig::from_file(temp_dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_ssh_url() {
        let config = PulseConfig::default();
        assert_eq!(config.ssh_url("10.0.0.5"), "ssh://root@10.0.0.5");
    }
}
