//! Config value inflation
//!
//! Inflation walks the entries in file order and expands each string value
//! as a template against everything resolved before it, so a `cmdline`
//! entry can embed the node's own `ip`.

use crate::node::ConfigEntries;
use crate::template::expand;
use crate::Result;
use serde::Serialize;
use serde_yaml::Value;
use std::collections::HashMap;
use tracing::trace;

/// A resolved config value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InflatedValue {
    Text(String),
    Number(serde_yaml::Number),
    Bool(bool),
    Seq(Vec<String>),
}

impl InflatedValue {
    /// Text form used when the value is referenced from another template
    pub fn render(&self) -> String {
        match self {
            InflatedValue::Text(s) => s.clone(),
            InflatedValue::Number(n) => n.to_string(),
            InflatedValue::Bool(b) => b.to_string(),
            InflatedValue::Seq(items) => items.join(" "),
        }
    }
}

/// Resolved key to value context; a repeated key holds its last value
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct InflatedConfig {
    values: HashMap<String, InflatedValue>,
}

impl InflatedConfig {
    pub fn get(&self, key: &str) -> Option<&InflatedValue> {
        self.values.get(key)
    }

    /// Text value of `key`, if it resolved to a scalar string
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(InflatedValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Sequence value of `key`, if it resolved to a sequence
    pub fn seq(&self, key: &str) -> Option<&[String]> {
        match self.values.get(key) {
            Some(InflatedValue::Seq(items)) => Some(items),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: InflatedValue) {
        self.values.insert(key.into(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Inflate all entries
pub fn inflate(entries: &ConfigEntries) -> Result<InflatedConfig> {
    inflate_entries(entries.iter())
}

/// Inflate entries up to and including the last occurrence of `key`
pub(crate) fn inflate_until(entries: &ConfigEntries, key: &str) -> Result<InflatedConfig> {
    let stop = entries
        .iter()
        .enumerate()
        .filter(|(_, (k, _))| *k == key)
        .map(|(i, _)| i + 1)
        .last()
        .unwrap_or(0);
    inflate_entries(entries.iter().take(stop))
}

fn inflate_entries<'a>(
    entries: impl Iterator<Item = (&'a str, &'a Value)>,
) -> Result<InflatedConfig> {
    let mut ctx = InflatedConfig::default();
    for (key, value) in entries {
        let resolved = match value {
            Value::String(s) => InflatedValue::Text(expand(s, &ctx, key)?),
            Value::Number(n) => InflatedValue::Number(n.clone()),
            Value::Bool(b) => InflatedValue::Bool(*b),
            Value::Sequence(items) => {
                let mut strs = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::String(s) => {
                            strs.push(expand(s, &ctx, &format!("{}:{}", key, i + 1))?)
                        }
                        Value::Number(n) => strs.push(n.to_string()),
                        Value::Bool(b) => strs.push(b.to_string()),
                        other => trace!("Skipping non-scalar element {:?} of [{}]", other, key),
                    }
                }
                InflatedValue::Seq(strs)
            }
            _ => {
                trace!("Not inflating structured value of [{}]", key);
                continue;
            }
        };
        ctx.insert(key, resolved);
    }
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmdline_embeds_ip() {
        let entries = ConfigEntries::parse("ip: 10.0.0.5\ncmdline: 'root=nfs:{{ip}}'\n").unwrap();
        let inflated = inflate(&entries).unwrap();
        assert_eq!(inflated.text("cmdline"), Some("root=nfs:10.0.0.5"));
    }

    #[test]
    fn test_sequences_and_numbers() {
        let entries = ConfigEntries::parse(
            "ip: 10.0.0.5\nipnum: 5\ncmdline:\n  - 'ip={{ip}}'\n  - 'node{{ipnum}}'\n  - 3\n",
        )
        .unwrap();
        let inflated = inflate(&entries).unwrap();
        assert_eq!(inflated.get("ipnum"), Some(&InflatedValue::Number(5.into())));
        assert_eq!(
            inflated.seq("cmdline").unwrap(),
            &["ip=10.0.0.5".to_string(), "node5".to_string(), "3".to_string()]
        );
    }

    #[test]
    fn test_only_earlier_entries_are_visible() {
        let entries = ConfigEntries::parse("cmdline: 'ip={{ip}}'\nip: 10.0.0.5\n").unwrap();
        assert!(inflate(&entries).is_err());
    }

    #[test]
    fn test_duplicate_keys_resolve_positionally() {
        let entries =
            ConfigEntries::parse("v: one\nfirst: '{{v}}'\nv: two\nsecond: '{{v}}'\n").unwrap();
        let inflated = inflate(&entries).unwrap();
        assert_eq!(inflated.text("first"), Some("one"));
        assert_eq!(inflated.text("second"), Some("two"));
        assert_eq!(inflated.text("v"), Some("two"));
    }

    #[test]
    fn test_structured_values_are_skipped() {
        let entries = ConfigEntries::parse("autoip: {prefix: 10.0.0.}\nkernel: vmlinuz\n").unwrap();
        let inflated = inflate(&entries).unwrap();
        assert!(!inflated.contains_key("autoip"));
        assert_eq!(inflated.len(), 1);
    }

    #[test]
    fn test_inflate_until_stops_after_key() {
        let entries = ConfigEntries::parse("ip: 10.0.0.5\nbroken: '{{missing}}'\n").unwrap();
        let inflated = inflate_until(&entries, "ip").unwrap();
        assert_eq!(inflated.text("ip"), Some("10.0.0.5"));
        assert!(inflate(&entries).is_err());
    }
}
