// remnant-common/src/model/identity.rs
use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Platform family an evidence store belongs to. Alias lookups and
/// collectors are scoped by this so a Windows folder name never matches
/// an alias curated for macOS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformFamily {
    Windows,
    #[serde(rename = "macos")]
    MacOs,
    Linux,
    Android,
    Ios,
}

impl PlatformFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformFamily::Windows => "windows",
            PlatformFamily::MacOs => "macos",
            PlatformFamily::Linux => "linux",
            PlatformFamily::Android => "android",
            PlatformFamily::Ios => "ios",
        }
    }
}

impl std::fmt::Display for PlatformFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A package known to currently exist on the system.
///
/// Built once per scan from the platform's package database, registry or
/// bundle store; immutable for the duration of the scan and rebuilt from
/// scratch on the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledIdentity {
    /// Platform-scoped unique key: bundle identifier, package name or
    /// product GUID, stored case-folded.
    pub canonical_key: String,
    /// Human-readable name when the store exposes one.
    pub display_name: Option<String>,
    /// Secondary strings (vendor, display name, historical folder names)
    /// usable for fuzzy matching. Case-folded.
    pub aliases: HashSet<String>,
    /// Filesystem/registry locations this identity currently owns.
    pub install_paths: HashSet<PathBuf>,
    pub platform: PlatformFamily,
}

impl InstalledIdentity {
    pub fn new(canonical_key: impl AsRef<str>, platform: PlatformFamily) -> Self {
        Self {
            canonical_key: canonical_key.as_ref().to_lowercase(),
            display_name: None,
            aliases: HashSet::new(),
            install_paths: HashSet::new(),
            platform,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.aliases.insert(name.to_lowercase());
        self.display_name = Some(name);
        self
    }

    pub fn with_alias(mut self, alias: impl AsRef<str>) -> Self {
        self.aliases.insert(alias.as_ref().to_lowercase());
        self
    }

    pub fn with_install_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.install_paths.insert(path.into());
        self
    }

    /// True when `name` (already case-folded by the caller) equals the
    /// canonical key or one of the declared aliases.
    pub fn answers_to(&self, name: &str) -> bool {
        self.canonical_key == name || self.aliases.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_is_case_folded() {
        let id = InstalledIdentity::new("Com.Vendor.App", PlatformFamily::MacOs);
        assert_eq!(id.canonical_key, "com.vendor.app");
    }

    #[test]
    fn answers_to_key_and_aliases() {
        let id = InstalledIdentity::new("com.vendor.app", PlatformFamily::MacOs)
            .with_display_name("Vendor App")
            .with_alias("VendorApp");
        assert!(id.answers_to("com.vendor.app"));
        assert!(id.answers_to("vendor app"));
        assert!(id.answers_to("vendorapp"));
        assert!(!id.answers_to("other"));
    }
}
