// remnant-common/src/config.rs
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::UserDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{RemnantError, Result};

/// Pseudo/virtual filesystems the set-subtraction walk must never enter.
pub const VIRTUAL_FS_ROOTS: [&str; 4] = ["/proc", "/sys", "/dev", "/run"];

const DEFAULT_STORE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_SUBTRACTION_DEPTH: usize = 3;

/// Stable identifier for each evidence collector the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorId {
    Windows,
    Bundle,
    PackageDb,
    Mobile,
    Keytrace,
}

impl CollectorId {
    pub const ALL: [CollectorId; 5] = [
        CollectorId::Windows,
        CollectorId::Bundle,
        CollectorId::PackageDb,
        CollectorId::Mobile,
        CollectorId::Keytrace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectorId::Windows => "windows",
            CollectorId::Bundle => "bundle",
            CollectorId::PackageDb => "package-db",
            CollectorId::Mobile => "mobile",
            CollectorId::Keytrace => "keytrace",
        }
    }
}

impl std::str::FromStr for CollectorId {
    type Err = RemnantError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "windows" => Ok(CollectorId::Windows),
            "bundle" | "macos" => Ok(CollectorId::Bundle),
            "package-db" | "package_db" | "pkgdb" | "linux" => Ok(CollectorId::PackageDb),
            "mobile" | "android" => Ok(CollectorId::Mobile),
            "keytrace" | "keychain" | "ios" => Ok(CollectorId::Keytrace),
            other => Err(RemnantError::Config(format!(
                "unknown collector '{other}' (expected one of: windows, bundle, package-db, mobile, keytrace)"
            ))),
        }
    }
}

impl std::fmt::Display for CollectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scan configuration: which collectors run, where they look, where the
/// alias database comes from, and the per-store timeout. Loadable from a
/// TOML file; every field has a usable default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Collectors to run. Empty means all.
    pub collectors: Vec<CollectorId>,
    /// Path to a curated alias/clutter database. None uses the embedded
    /// default.
    pub alias_db: Option<PathBuf>,
    /// Per-evidence-store timeout in seconds; a store that exceeds it is
    /// recorded as a recoverable skip.
    pub store_timeout_secs: u64,
    /// Roots for the Linux set-subtraction walk.
    pub subtraction_roots: Vec<PathBuf>,
    /// Maximum directory depth for the set-subtraction walk.
    pub subtraction_depth: usize,
    /// Override the scanned user home (fixture trees in tests).
    pub home_override: Option<PathBuf>,
    /// Structured per-package data area for the mobile collector.
    pub mobile_data_root: Option<PathBuf>,
    /// Arbitrary top-level storage area for the mobile collector.
    pub mobile_storage_root: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            collectors: Vec::new(),
            alias_db: None,
            store_timeout_secs: DEFAULT_STORE_TIMEOUT_SECS,
            subtraction_roots: vec![PathBuf::from("/usr/local"), PathBuf::from("/opt")],
            subtraction_depth: DEFAULT_SUBTRACTION_DEPTH,
            home_override: None,
            mobile_data_root: None,
            mobile_storage_root: None,
        }
    }
}

impl ScanConfig {
    /// Load from a TOML file, or defaults when `path` is None. Always
    /// validated; an invalid scope is operator misconfiguration and fails
    /// here, before any collector starts.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => {
                debug!("Loading scan configuration from {}", p.display());
                let raw = std::fs::read_to_string(p).map_err(|e| {
                    RemnantError::Config(format!("config file {} not readable: {e}", p.display()))
                })?;
                toml::from_str::<ScanConfig>(&raw)?
            }
            None => {
                debug!("No config file given, using defaults");
                ScanConfig::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_timeout_secs == 0 {
            return Err(RemnantError::Config(
                "store_timeout_secs must be greater than zero".into(),
            ));
        }
        for root in &self.subtraction_roots {
            if !root.is_absolute() {
                return Err(RemnantError::Config(format!(
                    "subtraction root {} must be absolute",
                    root.display()
                )));
            }
            if VIRTUAL_FS_ROOTS.iter().any(|v| root.starts_with(v)) {
                return Err(RemnantError::Config(format!(
                    "subtraction root {} is a virtual filesystem",
                    root.display()
                )));
            }
            if root.starts_with(self.home_dir()) {
                return Err(RemnantError::Config(format!(
                    "subtraction root {} is inside the user home tree",
                    root.display()
                )));
            }
        }
        if let Some(db) = &self.alias_db {
            if !db.is_file() {
                return Err(RemnantError::Config(format!(
                    "alias database {} does not exist",
                    db.display()
                )));
            }
        }
        Ok(())
    }

    /// Collectors selected for this scan, in declaration order.
    pub fn enabled_collectors(&self) -> Vec<CollectorId> {
        if self.collectors.is_empty() {
            CollectorId::ALL.to_vec()
        } else {
            self.collectors.clone()
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn home_dir(&self) -> PathBuf {
        if let Some(home) = &self.home_override {
            return home.clone();
        }
        UserDirs::new().map_or_else(|| PathBuf::from("/"), |ud| ud.home_dir().to_path_buf())
    }

    pub fn library_dir(&self) -> PathBuf {
        self.home_dir().join("Library")
    }

    pub fn applications_dirs(&self) -> Vec<PathBuf> {
        vec![
            PathBuf::from("/Applications"),
            self.home_dir().join("Applications"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ScanConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_virtual_fs_roots() {
        let config = ScanConfig {
            subtraction_roots: vec![PathBuf::from("/proc/self")],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RemnantError::Config(_))
        ));
    }

    #[test]
    fn rejects_home_tree_roots() {
        let config = ScanConfig {
            home_override: Some(PathBuf::from("/home/user")),
            subtraction_roots: vec![PathBuf::from("/home/user/stuff")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        let config = ScanConfig {
            store_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_collector_list_means_all() {
        assert_eq!(
            ScanConfig::default().enabled_collectors().len(),
            CollectorId::ALL.len()
        );
    }

    #[test]
    fn collector_id_parses_friendly_names() {
        assert_eq!(
            "pkgdb".parse::<CollectorId>().unwrap(),
            CollectorId::PackageDb
        );
        assert!("bogus".parse::<CollectorId>().is_err());
    }
}
