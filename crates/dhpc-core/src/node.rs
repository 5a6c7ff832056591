//! Compute node configuration records
//!
//! A compute node's boot configuration is a YAML mapping whose entry order
//! matters: later string values may reference earlier keys during
//! inflation, and a key may legally appear more than once. [`ConfigEntries`]
//! keeps every entry positionally instead of collapsing into a map.

use crate::inflate::{inflate, inflate_until, InflatedConfig};
use crate::{Error, Result};
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_yaml::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::trace;

/// Ordered key/value entries of a config file, duplicates preserved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigEntries(Vec<(String, Value)>);

impl ConfigEntries {
    /// Create an empty entry sequence
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse YAML text into ordered entries
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Serialize back to YAML, in entry order
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Value of the last entry with this key, like a map lookup after a sequential load
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// String value of the last entry with this key
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Append an entry
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.push((key.into(), value.into()));
    }

    /// Put `head` in front of the existing entries
    pub fn prepend(&mut self, head: ConfigEntries) {
        let tail = std::mem::take(&mut self.0);
        self.0 = head.0;
        self.0.extend(tail);
    }

    /// Remove every entry with this key, returning their values in order
    pub fn take_all(&mut self, key: &str) -> Vec<Value> {
        let mut taken = Vec::new();
        self.0.retain(|(k, v)| {
            if k == key {
                taken.push(v.clone());
                false
            } else {
                true
            }
        });
        taken
    }

    /// Iterate entries in file order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ConfigEntries {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ConfigEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = ConfigEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of config entries")
            }

            fn visit_unit<E>(self) -> std::result::Result<ConfigEntries, E> {
                Ok(ConfigEntries::new())
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<ConfigEntries, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<Value, Value>()? {
                    match key {
                        Value::String(key) => entries.push((key, value)),
                        other => trace!("Ignoring config entry with non-string key {:?}", other),
                    }
                }
                Ok(ConfigEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

impl FromIterator<(String, Value)> for ConfigEntries {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Registry key of a hardware address: lowercase, `:` separated.
///
/// `52-54-00-AB-CD-EF` and `52:54:00:ab:cd:ef` name the same node.
pub fn mac_key(mac: &str) -> String {
    mac.trim().to_ascii_lowercase().replace('-', ":")
}

/// Boot configuration of one compute node, backed by one file
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeNodeConfig {
    /// Hardware address, the registry key
    pub mac: String,

    /// Assigned IP, with any template references already resolved
    pub ip: String,

    /// Display hint for the admin surface
    pub gui_type: Option<String>,

    /// Link hint for the admin surface
    pub gui_href: Option<String>,

    /// Backing file
    pub file_path: PathBuf,

    /// Modification time of the backing file when loaded
    pub file_time: SystemTime,

    /// Exact on-disk content, compared on edit to detect concurrent changes
    pub raw_text: String,

    /// Parsed entries in file order
    pub entries: ConfigEntries,
}

impl ComputeNodeConfig {
    /// Build a config from file content and validate it.
    ///
    /// With a non-empty `expected_mac` the file's `mac` entry must match it.
    /// The `ip` entry must be present and resolve to a non-empty string.
    pub fn from_text(
        file_path: impl Into<PathBuf>,
        file_time: SystemTime,
        raw_text: String,
        expected_mac: Option<&str>,
    ) -> Result<Self> {
        let file_path = file_path.into();
        let entries = ConfigEntries::parse(&raw_text)?;

        let mac = entries.get_str("mac").unwrap_or_default().to_string();
        if let Some(expected) = expected_mac.filter(|m| !m.is_empty()) {
            if mac_key(&mac) != mac_key(expected) {
                return Err(Error::config(format!(
                    "invalid mac=[{}] vs [{}] in config file [{}]",
                    mac,
                    expected,
                    file_path.display()
                )));
            }
        }

        if entries.get_str("ip").map_or(true, str::is_empty) {
            return Err(Error::config(format!(
                "no ip in config file [{}]",
                file_path.display()
            )));
        }
        // the ip may itself be templated against earlier entries
        let ip = inflate_until(&entries, "ip")?
            .text("ip")
            .unwrap_or_default()
            .to_string();
        if ip.is_empty() {
            return Err(Error::config(format!(
                "ip resolves to empty in config file [{}]",
                file_path.display()
            )));
        }

        let gui_type = entries.get_str("guiType").map(str::to_string);
        let gui_href = entries.get_str("guiHref").map(str::to_string);

        Ok(Self {
            mac,
            ip,
            gui_type,
            gui_href,
            file_path,
            file_time,
            raw_text,
            entries,
        })
    }

    /// Resolve every entry against the entries before it
    pub fn inflate(&self) -> Result<InflatedConfig> {
        inflate(&self.entries)
    }

    /// File name of the backing file
    pub fn file_name(&self) -> Option<&str> {
        self.file_path.file_name().and_then(|n| n.to_str())
    }

    /// Whether this config is backed by `path`
    pub fn is_backed_by(&self, path: &Path) -> bool {
        self.file_path == path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_YAML: &str = "\
generated: 2019-03-01T10:00:00+08:00
mac: 52:54:00:12:34:56
ip: 10.0.0.5
ipnum: 5
guiType: kvm
guiHref: http://kvm.local/5
kernel: vmlinuz
";

    #[test]
    fn test_entries_keep_order_and_duplicates() {
        let entries = ConfigEntries::parse("a: 1\nb: two\na: 3\n").unwrap();
        let keys: Vec<_> = entries.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "a"]);
        // lookups see the last occurrence
        assert_eq!(entries.get("a").and_then(Value::as_u64), Some(3));
    }

    #[test]
    fn test_entries_serialize_in_order() {
        let mut entries = ConfigEntries::new();
        entries.push("zeta", "last-alphabetically");
        entries.push("alpha", 1u64);
        let text = entries.to_yaml().unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
        assert_eq!(ConfigEntries::parse(&text).unwrap(), entries);
    }

    #[test]
    fn test_prepend_and_take_all() {
        let mut entries = ConfigEntries::parse("autoip: {prefix: 10.0.0.}\nkernel: vmlinuz\n").unwrap();
        let taken = entries.take_all("autoip");
        assert_eq!(taken.len(), 1);

        let mut head = ConfigEntries::new();
        head.push("mac", "aa:bb:cc:dd:ee:ff");
        entries.prepend(head);
        let keys: Vec<_> = entries.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["mac", "kernel"]);
    }

    #[test]
    fn test_non_mapping_is_rejected() {
        assert!(ConfigEntries::parse("- just\n- a list\n").is_err());
        assert!(ConfigEntries::parse("mac: [unterminated\n").is_err());
    }

    #[test]
    fn test_config_from_text() {
        let cfg = ComputeNodeConfig::from_text(
            "etc/cnodes/52-54-00-12-34-56.yaml",
            SystemTime::UNIX_EPOCH,
            NODE_YAML.to_string(),
            Some("52:54:00:12:34:56"),
        )
        .unwrap();
        assert_eq!(cfg.mac, "52:54:00:12:34:56");
        assert_eq!(cfg.ip, "10.0.0.5");
        assert_eq!(cfg.gui_type.as_deref(), Some("kvm"));
        assert_eq!(cfg.gui_href.as_deref(), Some("http://kvm.local/5"));
        assert_eq!(cfg.file_name(), Some("52-54-00-12-34-56.yaml"));
        assert_eq!(cfg.raw_text, NODE_YAML);
    }

    #[test]
    fn test_config_mac_mismatch() {
        let err = ComputeNodeConfig::from_text(
            "x.yaml",
            SystemTime::UNIX_EPOCH,
            NODE_YAML.to_string(),
            Some("52:54:00:00:00:01"),
        )
        .unwrap_err();
        assert!(err.is_content_error());
        assert!(err.to_string().contains("invalid mac"));

        // an empty expectation accepts whatever mac the file declares
        assert!(ComputeNodeConfig::from_text(
            "x.yaml",
            SystemTime::UNIX_EPOCH,
            NODE_YAML.to_string(),
            Some(""),
        )
        .is_ok());
    }

    #[test]
    fn test_mac_spellings_match() {
        assert_eq!(mac_key("52-54-00-AB-cd-EF"), "52:54:00:ab:cd:ef");
        assert_eq!(mac_key(" 52:54:00:ab:cd:ef\n"), "52:54:00:ab:cd:ef");

        let cfg = ComputeNodeConfig::from_text(
            "x.yaml",
            SystemTime::UNIX_EPOCH,
            NODE_YAML.to_string(),
            Some("52-54-00-12-34-56"),
        )
        .unwrap();
        // the file's own spelling is kept
        assert_eq!(cfg.mac, "52:54:00:12:34:56");
    }

    #[test]
    fn test_config_requires_ip() {
        let err = ComputeNodeConfig::from_text(
            "x.yaml",
            SystemTime::UNIX_EPOCH,
            "mac: 52:54:00:12:34:56\nip: ''\n".to_string(),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no ip"));
    }

    #[test]
    fn test_config_templated_ip() {
        let cfg = ComputeNodeConfig::from_text(
            "x.yaml",
            SystemTime::UNIX_EPOCH,
            "net: 10.1.2.\nmac: m\nip: '{{net}}7'\ncmdline: ['{{undefined}}']\n".to_string(),
            None,
        )
        .unwrap();
        // entries after ip are not needed to resolve it
        assert_eq!(cfg.ip, "10.1.2.7");
    }
}
