//! Compute node registry
//!
//! The config index is scanned from disk on first use and kept in memory
//! afterwards. Every operation holds the index lock for its whole duration,
//! including the liveness checks of IP assignment, so lookups of the same
//! MAC never race each other into generating two configs.

use crate::autoip::Template;
use crate::config::RegistryConfig;
use crate::store::{self, load_config, quarantine, write_atomic, Quarantine};
use crate::{RegistryError, Result, SaveOutcome};
use chrono::{Local, SecondsFormat};
use dhpc_core::{mac_key, ComputeNodeConfig, ConfigEntries};
use dhpc_pulse::AlivenessTracker;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

type ConfigIndex = HashMap<String, Arc<ComputeNodeConfig>>;

/// Registry of compute node configs, keyed by MAC
pub struct NodeRegistry {
    config: RegistryConfig,
    tracker: AlivenessTracker,
    index: Mutex<Option<ConfigIndex>>,
}

impl NodeRegistry {
    pub fn new(config: RegistryConfig, tracker: AlivenessTracker) -> Self {
        Self {
            config,
            tracker,
            index: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn tracker(&self) -> &AlivenessTracker {
        &self.tracker
    }

    /// All known configs, sorted by MAC
    pub async fn list_all(&self) -> Result<Vec<Arc<ComputeNodeConfig>>> {
        let mut slot = self.index.lock().await;
        let index = self.scanned(&mut *slot)?;
        let mut cfgs: Vec<_> = index.values().cloned().collect();
        cfgs.sort_by(|a, b| a.mac.cmp(&b.mac));
        Ok(cfgs)
    }

    /// Config of the node with `mac`, generating one if none exists yet.
    ///
    /// `:` and `-` separated spellings of a MAC resolve to the same node.
    pub async fn resolve(&self, mac: &str) -> Result<Arc<ComputeNodeConfig>> {
        let key = canonical_mac(mac)?;
        let mac = key.as_str();

        let mut slot = self.index.lock().await;
        let index = self.scanned(&mut *slot)?;

        let mut changed = None;
        if let Some(cached) = index.get(mac).cloned() {
            match fs::metadata(&cached.file_path) {
                Ok(meta) => {
                    if mac_key(&cached.mac) != mac {
                        error!(
                            "Config file [{}] contains invalid mac=[{}] vs [{}]",
                            cached.file_path.display(),
                            cached.mac,
                            mac
                        );
                        quarantine(&cached.file_path, Quarantine::Bogon)?;
                        index.remove(mac);
                        self.tracker.forget(&cached);
                        warn!("A new configuration will be generated for mac=[{}]", mac);
                    } else if meta.modified()? == cached.file_time {
                        return Ok(cached);
                    } else {
                        debug!("Config file [{}] changed, reloading", cached.file_path.display());
                        changed = Some(cached);
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(
                        "Config file [{}] for mac=[{}] deleted",
                        cached.file_path.display(),
                        mac
                    );
                    index.remove(mac);
                    self.tracker.forget(&cached);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let canonical = self.config.canonical_path(mac);
        let mut candidates = Vec::with_capacity(2);
        if let Some(prev) = &changed {
            candidates.push(prev.file_path.clone());
        }
        if !candidates.contains(&canonical) {
            candidates.push(canonical.clone());
        }

        for path in candidates {
            if let Some(cfg) = load_config(&path, Some(mac))? {
                let cfg = Arc::new(cfg);
                if let Some(prev) = &changed {
                    if prev.ip != cfg.ip {
                        info!("mac=[{}] moved from ip=[{}] to [{}]", mac, prev.ip, cfg.ip);
                        self.tracker.forget(prev);
                    }
                }
                index.insert(mac.to_string(), cfg.clone());
                self.tracker.care_about(&cfg.ip, true, cfg.clone());
                return Ok(cfg);
            }
        }

        // the changed file did not survive validation
        if let Some(prev) = changed {
            index.remove(mac);
            self.tracker.forget(&prev);
        }

        self.generate(mac, &canonical, index).await
    }

    /// Overwrite a config file with operator edited text.
    ///
    /// With a non-empty `expected_prior`, the file must still hold exactly
    /// that text, otherwise nothing is written and the current text is
    /// returned in a conflict. A file that vanished meanwhile is written anew.
    pub async fn save_edit(
        &self,
        path: &Path,
        new_text: &str,
        expected_prior: Option<&str>,
    ) -> Result<SaveOutcome> {
        let path = self.confine(path)?;

        let mut slot = self.index.lock().await;
        let index = self.scanned(&mut *slot)?;

        if let Some(prior) = expected_prior.filter(|p| !p.is_empty()) {
            let current_text = match fs::read_to_string(&path) {
                Ok(text) => Some(text),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!("Config file [{}] disappeared during edit, saving anyway", path.display());
                    None
                }
                Err(e) => return Err(e.into()),
            };
            if let Some(current_text) = current_text.filter(|text| text != prior) {
                warn!("Config file [{}] changed during edit, not saving", path.display());
                return Ok(SaveOutcome::Conflict {
                    current_text,
                    modified: new_text.to_string(),
                });
            }
        }

        write_atomic(&path, new_text)?;
        info!("Saved edited config file [{}]", path.display());

        let old_mac = index
            .iter()
            .find(|(_, cfg)| cfg.is_backed_by(&path))
            .map(|(mac, _)| mac.clone());
        if let Some(old) = old_mac.and_then(|mac| index.remove(&mac)) {
            self.tracker.forget(&old);
        }

        match load_config(&path, None)? {
            Some(cfg) => {
                let cfg = Arc::new(cfg);
                self.admit(index, cfg.clone());
                Ok(SaveOutcome::Saved(Some(cfg)))
            }
            None => Ok(SaveOutcome::Saved(None)),
        }
    }

    /// The index, scanning the configs directory if that has not happened yet
    fn scanned<'a>(&self, slot: &'a mut Option<ConfigIndex>) -> Result<&'a mut ConfigIndex> {
        if slot.is_none() {
            *slot = Some(self.scan()?);
        }
        Ok(slot.get_or_insert_with(ConfigIndex::new))
    }

    fn scan(&self) -> Result<ConfigIndex> {
        let dir = &self.config.cnodes_dir;
        info!("Scanning compute node configs in [{}]", dir.display());

        let mut index = ConfigIndex::new();
        for path in store::scan_dir(dir, &self.config.extension)? {
            match load_config(&path, None) {
                Ok(Some(cfg)) if cfg.mac.is_empty() => {
                    warn!("Config file [{}] declares no mac, ignoring it", path.display());
                }
                Ok(Some(cfg)) => self.admit(&mut index, Arc::new(cfg)),
                Ok(None) => {}
                Err(e) => error!("Failed loading config file [{}]: {}", path.display(), e),
            }
        }

        info!("Found {} compute node configs", index.len());
        Ok(index)
    }

    /// Index a freshly loaded config and take its IP as alive
    fn admit(&self, index: &mut ConfigIndex, cfg: Arc<ComputeNodeConfig>) {
        if let Some(prev) = index.insert(mac_key(&cfg.mac), cfg.clone()) {
            if !prev.is_backed_by(&cfg.file_path) {
                warn!(
                    "mac=[{}] is declared by both [{}] and [{}], using the latter",
                    cfg.mac,
                    prev.file_path.display(),
                    cfg.file_path.display()
                );
            }
            self.tracker.forget(&prev);
        }
        let ip = cfg.ip.clone();
        self.tracker.care_about(&ip, true, cfg);
    }

    async fn generate(
        &self,
        mac: &str,
        path: &Path,
        index: &mut ConfigIndex,
    ) -> Result<Arc<ComputeNodeConfig>> {
        info!("Generating config for compute node with mac=[{}]", mac);

        let template = Template::load(&self.config.template_path)?;
        let assignment = template.autoip.assign(&self.tracker).await?;

        // configs the tracker has already let go of may still claim the IP
        let mut displaced = assignment.displaced;
        for cfg in index.values() {
            if cfg.ip == assignment.ip
                && !displaced.iter().any(|d| mac_key(&d.mac) == mac_key(&cfg.mac))
            {
                displaced.push(cfg.clone());
            }
        }
        for old in &displaced {
            self.retire(old, index)?;
        }

        let mut head = ConfigEntries::new();
        head.push(
            "generated",
            Local::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        head.push("mac", mac);
        head.push("ip", assignment.ip.as_str());
        head.push("ipnum", u64::from(assignment.ipnum));
        let mut entries = template.inherited;
        entries.prepend(head);

        let text = entries.to_yaml()?;
        let file_time = write_atomic(path, &text)?;
        info!(
            "Configuration for compute node mac=[{}] written to file [{}]",
            mac,
            path.display()
        );

        let cfg = Arc::new(ComputeNodeConfig::from_text(path, file_time, text, Some(mac))?);
        index.insert(mac.to_string(), cfg.clone());
        // taken as alive even before the node boots
        self.tracker.care_about(&cfg.ip, true, cfg.clone());
        Ok(cfg)
    }

    /// Set aside a config whose IP is being handed to another node
    fn retire(&self, old: &Arc<ComputeNodeConfig>, index: &mut ConfigIndex) -> Result<()> {
        match quarantine(&old.file_path, Quarantine::Corpse) {
            Ok(target) => warn!(
                "Reusing ip=[{}] of mac=[{}], its config has been renamed to [{}]",
                old.ip,
                old.mac,
                target.display()
            ),
            Err(RegistryError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                debug!("Config file [{}] already gone", old.file_path.display())
            }
            Err(e) => return Err(e),
        }
        let key = mac_key(&old.mac);
        if index
            .get(&key)
            .is_some_and(|cfg| cfg.is_backed_by(&old.file_path))
        {
            index.remove(&key);
        }
        self.tracker.forget(old);
        Ok(())
    }

    /// Map an edit target onto the configs directory, refusing anything outside it
    fn confine(&self, path: &Path) -> Result<PathBuf> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| store::is_config_file_name(n, &self.config.extension))
            .ok_or_else(|| {
                RegistryError::invalid_request(format!(
                    "[{}] is not a compute node config file",
                    path.display()
                ))
            })?;

        let inside = match path.parent() {
            None => true,
            Some(parent) if parent.as_os_str().is_empty() => true,
            Some(parent) if parent == self.config.cnodes_dir => true,
            Some(parent) => match (parent.canonicalize(), self.config.cnodes_dir.canonicalize()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            },
        };
        if !inside {
            return Err(RegistryError::invalid_request(format!(
                "[{}] is outside the config directory [{}]",
                path.display(),
                self.config.cnodes_dir.display()
            )));
        }

        Ok(self.config.cnodes_dir.join(name))
    }
}

/// Accept six hex octets separated consistently by `:` or `-`, and
/// return the registry key of the MAC
fn canonical_mac(mac: &str) -> Result<String> {
    let sep = if mac.contains(':') { ':' } else { '-' };
    let octets: Vec<&str> = mac.split(sep).collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    if valid {
        Ok(mac_key(mac))
    } else {
        Err(RegistryError::InvalidMac(mac.to_string()))
    }
}
