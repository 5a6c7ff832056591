//! Boot parameters read by the network-boot handler

use crate::inflate::{InflatedConfig, InflatedValue};
use crate::{Error, Result};
use serde::Serialize;

/// Kernel, initrd and command line resolved from an inflated config
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootParams {
    pub kernel: String,
    pub initrd: Vec<String>,
    pub cmdline: String,
}

impl BootParams {
    /// Extract boot parameters.
    ///
    /// `kernel` must be a non-empty string. `initrd` may be a string or a
    /// sequence and is always returned as a sequence. A `cmdline` sequence
    /// is joined with single spaces. Empty elements are dropped from both.
    pub fn from_inflated(cfg: &InflatedConfig) -> Result<Self> {
        let kernel = match cfg.get("kernel") {
            Some(InflatedValue::Text(k)) if !k.is_empty() => k.clone(),
            Some(other) => {
                return Err(Error::config(format!(
                    "kernel must be a non-empty string, got {:?}",
                    other
                )))
            }
            None => return Err(Error::config("no kernel configured")),
        };

        let initrd = match cfg.get("initrd") {
            Some(InflatedValue::Seq(items)) => non_empty(items),
            Some(InflatedValue::Text(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        };

        let cmdline = match cfg.get("cmdline") {
            Some(InflatedValue::Seq(items)) => non_empty(items).join(" "),
            Some(value) => value.render(),
            None => String::new(),
        };

        Ok(Self {
            kernel,
            initrd,
            cmdline,
        })
    }
}

fn non_empty(items: &[String]) -> Vec<String> {
    items.iter().filter(|s| !s.is_empty()).cloned().collect()
}
