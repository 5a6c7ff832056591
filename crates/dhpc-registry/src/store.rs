//! Config file storage
//!
//! Invalid or superseded files are never deleted. They are renamed in place
//! to `~<name>.<marker>-<YYYYmmddHHMMSS>`, which also takes them out of
//! directory scans.

use crate::Result;
use chrono::Local;
use dhpc_core::ComputeNodeConfig;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Why a config file is being set aside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quarantine {
    /// Content failed validation
    Bogon,
    /// Its IP was handed to another node
    Corpse,
}

impl fmt::Display for Quarantine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quarantine::Bogon => write!(f, "bogon"),
            Quarantine::Corpse => write!(f, "corpse"),
        }
    }
}

/// Load and validate one config file.
///
/// A missing file yields `Ok(None)`. A file whose content fails validation
/// is quarantined as a bogon and also yields `Ok(None)`. Other IO failures
/// are returned.
pub fn load_config(path: &Path, expected_mac: Option<&str>) -> Result<Option<ComputeNodeConfig>> {
    let file_time = match fs::metadata(path) {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let raw_text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            warn!("Config file [{}] is not valid UTF-8", path.display());
            quarantine(path, Quarantine::Bogon)?;
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    match ComputeNodeConfig::from_text(path, file_time, raw_text, expected_mac) {
        Ok(cfg) => {
            debug!("Loaded config of mac=[{}] ip=[{}] from [{}]", cfg.mac, cfg.ip, path.display());
            Ok(Some(cfg))
        }
        Err(e) if e.is_content_error() => {
            warn!("Invalid config file [{}]: {}", path.display(), e);
            quarantine(path, Quarantine::Bogon)?;
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Path a quarantined file is renamed to, stamped with local time
pub fn quarantine_path(path: &Path, marker: Quarantine) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stamp = Local::now().format("%Y%m%d%H%M%S");
    path.with_file_name(format!("~{}.{}-{}", name, marker, stamp))
}

/// Rename `path` out of the way, returning where it went
pub fn quarantine(path: &Path, marker: Quarantine) -> Result<PathBuf> {
    let target = quarantine_path(path, marker);
    info!(
        "Renaming {} config file from [{}] to [{}]",
        marker,
        path.display(),
        target.display()
    );
    fs::rename(path, &target)?;
    Ok(target)
}

/// Replace the content of `path` atomically, returning the new modification time
pub fn write_atomic(path: &Path, content: &str) -> Result<SystemTime> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))?;
    }
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(fs::metadata(path)?.modified()?)
}

/// Whether a directory entry named `name` holds a node config
pub fn is_config_file_name(name: &str, extension: &str) -> bool {
    if name.starts_with(['.', '_', '~', '!']) {
        return false;
    }
    match name.strip_suffix(extension) {
        Some(stem) => stem.len() > 1 && stem.ends_with('.'),
        None => false,
    }
}

/// Config files directly under `dir`, sorted by name
pub fn scan_dir(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("Config directory [{}] does not exist", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        match name.to_str() {
            Some(name) if is_config_file_name(name, extension) => paths.push(entry.path()),
            _ => debug!("Ignoring [{}]", entry.path().display()),
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entries_of(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_config_file_names() {
        assert!(is_config_file_name("52-54-00-12-34-56.yaml", "yaml"));
        assert!(is_config_file_name("n.yaml", "yaml"));
        assert!(!is_config_file_name(".hidden.yaml", "yaml"));
        assert!(!is_config_file_name("_draft.yaml", "yaml"));
        assert!(!is_config_file_name("~n.yaml.bogon-20240101000000", "yaml"));
        assert!(!is_config_file_name("!off.yaml", "yaml"));
        assert!(!is_config_file_name("notes.txt", "yaml"));
        assert!(!is_config_file_name("yaml", "yaml"));
        assert!(!is_config_file_name(".yaml", "yaml"));
        assert!(!is_config_file_name("nodeyaml", "yaml"));
    }

    #[test]
    fn test_quarantine_path() {
        let target = quarantine_path(Path::new("/etc/cnodes/n1.yaml"), Quarantine::Corpse);
        let name = target.file_name().unwrap().to_str().unwrap();
        assert_eq!(target.parent(), Some(Path::new("/etc/cnodes")));
        assert!(name.starts_with("~n1.yaml.corpse-"));
        // YYYYmmddHHMMSS
        let stamp = name.rsplit('-').next().unwrap();
        assert_eq!(stamp.len(), 14);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(load_config(&dir.path().join("none.yaml"), None).unwrap().is_none());
    }

    #[test]
    fn test_load_valid_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("n1.yaml");
        fs::write(&path, "mac: 52:54:00:00:00:01\nip: 10.0.0.1\n").unwrap();

        let cfg = load_config(&path, Some("52:54:00:00:00:01")).unwrap().unwrap();
        assert_eq!(cfg.ip, "10.0.0.1");
        assert_eq!(cfg.file_time, fs::metadata(&path).unwrap().modified().unwrap());
    }

    #[test]
    fn test_invalid_config_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("n1.yaml");
        fs::write(&path, "mac: 52:54:00:00:00:01\n").unwrap();

        assert!(load_config(&path, None).unwrap().is_none());
        assert!(!path.exists());
        let names = entries_of(dir.path());
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("~n1.yaml.bogon-"));
    }

    #[test]
    fn test_mac_mismatch_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("n1.yaml");
        fs::write(&path, "mac: 52:54:00:00:00:01\nip: 10.0.0.1\n").unwrap();

        assert!(load_config(&path, Some("52:54:00:00:00:02")).unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_unparseable_config_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("n1.yaml");
        fs::write(&path, "mac: [unterminated\n").unwrap();

        assert!(load_config(&path, None).unwrap().is_none());
        assert!(entries_of(dir.path())[0].contains(".bogon-"));
    }

    #[test]
    fn test_write_atomic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("n1.yaml");
        fs::write(&path, "old").unwrap();

        let mtime = write_atomic(&path, "new content\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new content\n");
        assert_eq!(mtime, fs::metadata(&path).unwrap().modified().unwrap());
        // no temp file left behind
        assert_eq!(entries_of(dir.path()), vec!["n1.yaml".to_string()]);
    }

    #[test]
    fn test_scan_dir() {
        let dir = TempDir::new().unwrap();
        for name in ["b.yaml", "a.yaml", "_x.yaml", "~c.yaml.bogon-1", "notes.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("sub.yaml")).unwrap();

        let paths = scan_dir(dir.path(), "yaml").unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.yaml", "b.yaml"]);

        assert!(scan_dir(&dir.path().join("missing"), "yaml").unwrap().is_empty());
    }
}
