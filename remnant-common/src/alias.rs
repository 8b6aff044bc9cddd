// remnant-common/src/alias.rs
//
// Curated clutter/alias database: maps ambiguous on-disk names to canonical
// keys when structural matching fails, plus per-platform skip-prefix lists
// that suppress known-system noise. Versioned data, not code: loaded once
// per scan from a TOML file or from the embedded default.
use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{RemnantError, Result};
use crate::model::PlatformFamily;

const EMBEDDED_ALIASES: &str = include_str!("../data/aliases.toml");

#[derive(Debug, Deserialize)]
struct AliasEntry {
    platform: PlatformFamily,
    names: Vec<String>,
    key: String,
}

#[derive(Debug, Deserialize)]
struct SkipEntry {
    platform: PlatformFamily,
    area: String,
    prefixes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AliasFile {
    #[serde(default)]
    alias: Vec<AliasEntry>,
    #[serde(default)]
    skip: Vec<SkipEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct AliasDb {
    // (platform, case-folded name) -> canonical key
    entries: HashMap<(PlatformFamily, String), String>,
    // (platform, area) -> case-folded skip prefixes
    skips: HashMap<(PlatformFamily, String), Vec<String>>,
}

impl AliasDb {
    /// The curated database shipped with the scanner.
    pub fn embedded() -> Self {
        Self::parse(EMBEDDED_ALIASES).expect("embedded alias database must parse")
    }

    /// Load from an operator-supplied TOML file. A malformed or missing
    /// file is a configuration error: it fails the scan before any
    /// collector starts.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RemnantError::Config(format!(
                "alias database {} not readable: {e}",
                path.display()
            ))
        })?;
        let db = Self::parse(&raw)?;
        debug!(
            "Loaded alias database from {} ({} entries)",
            path.display(),
            db.entries.len()
        );
        Ok(db)
    }

    fn parse(raw: &str) -> Result<Self> {
        let file: AliasFile = toml::from_str(raw)?;
        let mut entries = HashMap::new();
        for e in file.alias {
            for name in e.names {
                entries.insert((e.platform, name.to_lowercase()), e.key.to_lowercase());
            }
        }
        let mut skips: HashMap<(PlatformFamily, String), Vec<String>> = HashMap::new();
        for s in file.skip {
            skips
                .entry((s.platform, s.area))
                .or_default()
                .extend(s.prefixes.into_iter().map(|p| p.to_lowercase()));
        }
        Ok(Self { entries, skips })
    }

    /// Resolve an observed name to a canonical key. Case-insensitive and
    /// platform-scoped; a miss is not an error, callers fall back to
    /// pattern matching.
    pub fn resolve(&self, name: &str, platform: PlatformFamily) -> Option<&str> {
        self.entries
            .get(&(platform, name.to_lowercase()))
            .map(String::as_str)
    }

    /// True when `name` starts with a known system prefix for the given
    /// platform and scan area (e.g. `com.apple.` under macOS preferences).
    pub fn is_system_noise(&self, name: &str, platform: PlatformFamily, area: &str) -> bool {
        let folded = name.to_lowercase();
        self.skips
            .get(&(platform, area.to_string()))
            .map(|prefixes| prefixes.iter().any(|p| folded.starts_with(p.as_str())))
            .unwrap_or(false)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_database_parses() {
        let db = AliasDb::embedded();
        assert!(db.entry_count() > 0);
    }

    #[test]
    fn resolve_is_case_insensitive_and_platform_scoped() {
        let db = AliasDb::parse(
            r#"
            [[alias]]
            platform = "windows"
            names = ["Tencent"]
            key = "com.tencent.mm"
            "#,
        )
        .unwrap();
        assert_eq!(
            db.resolve("TENCENT", PlatformFamily::Windows),
            Some("com.tencent.mm")
        );
        // Same name registered for a different platform must not match.
        assert_eq!(db.resolve("tencent", PlatformFamily::MacOs), None);
    }

    #[test]
    fn system_noise_prefixes_apply_per_area() {
        let db = AliasDb::parse(
            r#"
            [[skip]]
            platform = "macos"
            area = "preferences"
            prefixes = ["com.apple."]
            "#,
        )
        .unwrap();
        assert!(db.is_system_noise("com.apple.dock", PlatformFamily::MacOs, "preferences"));
        assert!(!db.is_system_noise("com.apple.dock", PlatformFamily::MacOs, "caches"));
        assert!(!db.is_system_noise("com.vendor.app", PlatformFamily::MacOs, "preferences"));
    }
}
