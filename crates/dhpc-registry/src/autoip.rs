//! Automatic IP assignment from the template's `autoip` pool
//!
//! ```yaml
//! autoip:
//!   prefix: 10.0.0.
//!   range: [100, 199, 210, 219]   # or [[100, 199], [210, 219]]
//! ```

use crate::{RegistryError, Result};
use chrono::{DateTime, Utc};
use dhpc_core::{ComputeNodeConfig, ConfigEntries};
use dhpc_pulse::AlivenessTracker;
use serde_yaml::Value;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Address pool: `prefix` followed by each number of each inclusive range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoIp {
    pub prefix: String,
    pub ranges: Vec<(u32, u32)>,
}

/// IP picked for a new config
#[derive(Debug, Clone)]
pub struct Assignment {
    pub ip: String,
    pub ipnum: u32,
    /// Configs still claiming the IP, to be retired before reuse
    pub displaced: Vec<Arc<ComputeNodeConfig>>,
}

struct DeadCandidate {
    ip: String,
    ipnum: u32,
    last_alive: Option<DateTime<Utc>>,
    bound: Vec<Arc<ComputeNodeConfig>>,
}

impl AutoIp {
    /// Parse the value of an `autoip` entry
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_mapping()
            .ok_or_else(|| RegistryError::template("autoip must be a mapping"))?;

        let prefix = map
            .get("prefix")
            .and_then(Value::as_str)
            .ok_or_else(|| RegistryError::template("autoip.prefix must be a string"))?
            .to_string();

        let range = map
            .get("range")
            .and_then(Value::as_sequence)
            .ok_or_else(|| RegistryError::template("autoip.range must be a sequence"))?;

        let mut bounds = Vec::new();
        for item in range {
            match item {
                Value::Sequence(pair) => bounds.extend(pair.iter().map(range_bound)),
                other => bounds.push(range_bound(other)),
            }
        }
        let bounds = bounds.into_iter().collect::<Result<Vec<u32>>>()?;
        if bounds.is_empty() || bounds.len() % 2 != 0 {
            return Err(RegistryError::template(format!(
                "autoip.range needs start/end pairs, got {} numbers",
                bounds.len()
            )));
        }

        let mut ranges = Vec::with_capacity(bounds.len() / 2);
        for pair in bounds.chunks(2) {
            if pair[0] > pair[1] {
                return Err(RegistryError::template(format!(
                    "autoip range [{}, {}] is reversed",
                    pair[0], pair[1]
                )));
            }
            ranges.push((pair[0], pair[1]));
        }

        Ok(Self { prefix, ranges })
    }

    /// Every address of the pool with its number, in range order
    pub fn candidates(&self) -> impl Iterator<Item = (String, u32)> + '_ {
        self.ranges
            .iter()
            .flat_map(|&(start, end)| start..=end)
            .map(move |n| (format!("{}{}", self.prefix, n), n))
    }

    /// Pick an address for a new node.
    ///
    /// The first address never seen alive is taken right away. Failing that,
    /// the dead address with the earliest last sign of life is reused.
    /// Addresses assumed alive are never taken.
    pub async fn assign(&self, tracker: &AlivenessTracker) -> Result<Assignment> {
        let mut alive = 0;
        let mut dead = Vec::new();

        for (ip, ipnum) in self.candidates() {
            let check = tracker.check_alive(&ip).await?;
            if check.alive {
                alive += 1;
                continue;
            }
            if check.last_alive.is_none() {
                info!("Next available ip=[{}]", ip);
                return Ok(Assignment {
                    ip,
                    ipnum,
                    displaced: check.bound_configs,
                });
            }
            debug!("ip=[{}] dead since {:?}", ip, check.last_alive);
            dead.push(DeadCandidate {
                ip,
                ipnum,
                last_alive: check.last_alive,
                bound: check.bound_configs,
            });
        }

        // stable: equally old candidates keep range order
        dead.sort_by_key(|c| c.last_alive);
        match dead.into_iter().next() {
            Some(reuse) => {
                if reuse.bound.is_empty() {
                    warn!("Reusing ip=[{}], not bound to any known config", reuse.ip);
                } else {
                    info!(
                        "Reusing ip=[{}] of {} dead config(s)",
                        reuse.ip,
                        reuse.bound.len()
                    );
                }
                Ok(Assignment {
                    ip: reuse.ip,
                    ipnum: reuse.ipnum,
                    displaced: reuse.bound,
                })
            }
            None => Err(RegistryError::NotAssignable { alive }),
        }
    }
}

fn range_bound(value: &Value) -> Result<u32> {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| RegistryError::template(format!("invalid autoip range bound {:?}", value)))
}

/// Generation template: the address pool plus entries every generated
/// config inherits
#[derive(Debug, Clone)]
pub struct Template {
    pub autoip: AutoIp,
    pub inherited: ConfigEntries,
}

impl Template {
    pub fn parse(text: &str) -> Result<Self> {
        let mut inherited = ConfigEntries::parse(text)?;
        let directive = inherited
            .take_all("autoip")
            .pop()
            .ok_or_else(|| RegistryError::template("no autoip directive in template"))?;
        Ok(Self {
            autoip: AutoIp::from_value(&directive)?,
            inherited,
        })
    }

    /// Read and parse the template file. A missing template is a template
    /// error, any other read failure is an I/O error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RegistryError::template(format!(
                    "no template at [{}]",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        Self::parse(&text)
    }
}
