//! Control center service

use crate::config::CcConfig;
use crate::Result;
use chrono::{DateTime, Utc};
use dhpc_core::BootParams;
use dhpc_pulse::{AlivenessTracker, IpAliveness, PingProber, Prober, PulseConfig};
use dhpc_registry::NodeRegistry;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A compute node config joined with the liveness of its IP
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub mac: String,
    pub ip: String,
    pub status: String,
    pub last_alive: Option<DateTime<Utc>>,
    pub file: String,
    pub gui_type: Option<String>,
    pub gui_href: Option<String>,
    pub ssh: String,
}

/// One tracked IP
#[derive(Debug, Clone, Serialize)]
pub struct AlivenessView {
    pub ip: String,
    pub status: String,
    pub last_alive: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
    pub macs: Vec<String>,
}

impl From<&IpAliveness> for AlivenessView {
    fn from(state: &IpAliveness) -> Self {
        Self {
            ip: state.ip.clone(),
            status: state.status().to_string(),
            last_alive: state.last_alive,
            last_check: state.last_check,
            macs: state.bound_configs.iter().map(|c| c.mac.clone()).collect(),
        }
    }
}

/// Aliveness tracker and node registry of one control center
pub struct ControlCenter {
    config: CcConfig,
    tracker: AlivenessTracker,
    registry: NodeRegistry,
    worker: Option<JoinHandle<()>>,
}

impl ControlCenter {
    pub fn new(config: CcConfig, pulse: PulseConfig, prober: Arc<dyn Prober>) -> Self {
        let tracker = AlivenessTracker::new(pulse, prober);
        let registry = NodeRegistry::new(config.registry.clone(), tracker.clone());
        Self {
            config,
            tracker,
            registry,
            worker: None,
        }
    }

    /// Build from configuration, probing with the configured ping program
    pub fn from_config(config: CcConfig) -> Result<Self> {
        config.validate()?;
        let pulse = config.load_pulse()?;
        let prober = Arc::new(PingProber::with_program(config.pulse.probe_program.clone()));
        Ok(Self::new(config, pulse, prober))
    }

    pub fn config(&self) -> &CcConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &AlivenessTracker {
        &self.tracker
    }

    /// Start background probing
    pub fn start(&mut self) -> Result<()> {
        self.worker = Some(self.tracker.start()?);
        Ok(())
    }

    /// Stop background probing and wait for the prober to exit
    pub async fn stop(&mut self) -> Result<()> {
        self.tracker.shutdown();
        if let Some(worker) = self.worker.take() {
            worker.await?;
        }
        Ok(())
    }

    /// Scan the configs, probe in the background until `shutdown` completes
    pub async fn serve(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let nodes = self.registry.list_all().await?;
        info!("Serving {} compute nodes", nodes.len());

        self.start()?;
        shutdown.await;
        info!("Shutting down control center");
        self.stop().await
    }

    /// Boot parameters of the node with `mac`, assigning it a config if needed
    pub async fn boot_params(&self, mac: &str) -> Result<BootParams> {
        let cfg = self.registry.resolve(mac).await?;
        let params = BootParams::from_inflated(&cfg.inflate()?)?;
        debug!("Booting mac=[{}] with kernel [{}]", mac, params.kernel);
        Ok(params)
    }

    /// All known nodes, sorted by MAC
    pub async fn nodes(&self) -> Result<Vec<NodeView>> {
        let pulse = self.tracker.config();
        let cfgs = self.registry.list_all().await?;
        Ok(cfgs
            .iter()
            .map(|cfg| {
                let state = self.tracker.state_of(&cfg.ip);
                NodeView {
                    mac: cfg.mac.clone(),
                    ip: cfg.ip.clone(),
                    status: state
                        .as_ref()
                        .map(|s| s.status().to_string())
                        .unwrap_or_else(|| "untracked".to_string()),
                    last_alive: state.and_then(|s| s.last_alive),
                    file: cfg
                        .file_name()
                        .map(str::to_string)
                        .unwrap_or_else(|| cfg.file_path.display().to_string()),
                    gui_type: cfg.gui_type.clone(),
                    gui_href: cfg.gui_href.clone(),
                    ssh: pulse.ssh_url(&cfg.ip),
                }
            })
            .collect())
    }

    /// All tracked IPs, most recently alive first
    pub fn cared(&self) -> Vec<AlivenessView> {
        self.tracker
            .list_cared()
            .iter()
            .map(AlivenessView::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhpc_pulse::MockProber;
    use dhpc_registry::RegistryConfig;
    use std::fs;
    use tempfile::TempDir;

    fn center(dir: &TempDir) -> (ControlCenter, Arc<MockProber>) {
        let cnodes = dir.path().join("cnodes");
        fs::create_dir(&cnodes).unwrap();
        let template = dir.path().join("cnode.yaml");
        fs::write(
            &template,
            "autoip:\n  prefix: 10.0.0.\n  range: [100, 109]\nkernel: http://boot/vmlinuz\ninitrd: [http://boot/initrd.img]\ncmdline:\n  - 'ip={{ip}}'\n  - console=ttyS0\n",
        )
        .unwrap();

        let config = CcConfig {
            registry: RegistryConfig::new(cnodes, template),
            ..CcConfig::default()
        };
        let prober = Arc::new(MockProber::new());
        (
            ControlCenter::new(config, PulseConfig::default(), prober.clone()),
            prober,
        )
    }

    #[tokio::test]
    async fn test_boot_params_for_new_node() {
        let dir = TempDir::new().unwrap();
        let (center, _prober) = center(&dir);

        let params = center.boot_params("52:54:00:00:00:01").await.unwrap();
        assert_eq!(params.kernel, "http://boot/vmlinuz");
        assert_eq!(params.initrd, vec!["http://boot/initrd.img".to_string()]);
        assert_eq!(params.cmdline, "ip=10.0.0.100 console=ttyS0");
    }

    #[tokio::test]
    async fn test_boot_fails_without_kernel() {
        let dir = TempDir::new().unwrap();
        let (center, _prober) = center(&dir);
        fs::write(
            dir.path().join("cnodes/52-54-00-00-00-02.yaml"),
            "mac: 52:54:00:00:00:02\nip: 10.0.0.200\n",
        )
        .unwrap();

        assert!(center.boot_params("52:54:00:00:00:02").await.is_err());
    }

    #[tokio::test]
    async fn test_listings() {
        let dir = TempDir::new().unwrap();
        let (center, _prober) = center(&dir);
        center.boot_params("52:54:00:00:00:02").await.unwrap();
        center.boot_params("52:54:00:00:00:01").await.unwrap();

        let nodes = center.nodes().await.unwrap();
        let macs: Vec<_> = nodes.iter().map(|n| n.mac.as_str()).collect();
        assert_eq!(macs, vec!["52:54:00:00:00:01", "52:54:00:00:00:02"]);
        assert_eq!(nodes[0].ip, "10.0.0.101");
        assert_eq!(nodes[0].status, "assumed");
        assert_eq!(nodes[0].ssh, "ssh://root@10.0.0.101");
        assert_eq!(nodes[0].file, "52-54-00-00-00-01.yaml");

        let cared = center.cared();
        assert_eq!(cared.len(), 2);
        assert_eq!(cared[0].ip, "10.0.0.101");
        assert_eq!(cared[0].macs, vec!["52:54:00:00:00:01".to_string()]);
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let (mut center, _prober) = center(&dir);
        center.serve(async {}).await.unwrap();
        // the prober can only be started once
        assert!(center.start().is_err());
    }
}
