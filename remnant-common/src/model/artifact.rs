// remnant-common/src/model/artifact.rs
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform-typed location of a piece of evidence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Location {
    File { path: PathBuf },
    Directory { path: PathBuf },
    RegistryKey { key: String },
    KeychainGroup { group: String },
    /// A record inside an execution-trace or history store (prefetch entry,
    /// snapshot cache slot), identified by the store's own record name.
    TraceRecord { record: String },
}

impl Location {
    /// Filesystem path for locations that have one.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Location::File { path } | Location::Directory { path } => Some(path),
            _ => None,
        }
    }

    /// Stable string form used for deduplication and display.
    pub fn dedup_key(&self) -> String {
        match self {
            Location::File { path } | Location::Directory { path } => {
                path.to_string_lossy().into_owned()
            }
            Location::RegistryKey { key } => format!("registry:{key}"),
            Location::KeychainGroup { group } => format!("keychain:{group}"),
            Location::TraceRecord { record } => format!("trace:{record}"),
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dedup_key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    ConfigDirectory,
    RegistryKey,
    SharedLibraryRef,
    ServiceDefinition,
    ExecutionTrace,
    PackageReceipt,
    KeychainItem,
    Other,
}

/// Trust weight class of an evidence source. Structural stores (registry,
/// package database, receipts) prove ownership; correlational stores
/// (traces, caches, keychain) only prove that something once ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceWeight {
    Structural,
    Correlational,
}

/// Which collector sub-store produced a candidate. Determines the base
/// trust weight used by the confidence classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    // Windows family
    UninstallRegistry,
    SharedDllRegistry,
    ServiceRegistry,
    ExecutionTrace,
    // macOS family
    PackageReceipts,
    BundleDataScan,
    // Linux family
    PackageDatabase,
    FilesystemSubtraction,
    // Mobile family
    PackageRegistry,
    AppDataScan,
    StorageScan,
    // iOS-style secure stores
    Keychain,
    SnapshotCache,
}

impl EvidenceSource {
    pub fn weight(&self) -> SourceWeight {
        match self {
            EvidenceSource::UninstallRegistry
            | EvidenceSource::SharedDllRegistry
            | EvidenceSource::ServiceRegistry
            | EvidenceSource::PackageReceipts
            | EvidenceSource::PackageDatabase
            | EvidenceSource::PackageRegistry
            | EvidenceSource::AppDataScan => SourceWeight::Structural,
            EvidenceSource::ExecutionTrace
            | EvidenceSource::BundleDataScan
            | EvidenceSource::FilesystemSubtraction
            | EvidenceSource::StorageScan
            | EvidenceSource::Keychain
            | EvidenceSource::SnapshotCache => SourceWeight::Correlational,
        }
    }

    /// True for sources whose candidates are residual by construction
    /// (present in one store, absent from its counterpart: unclaimed disk
    /// paths, dangling references, traces of gone executables). When no
    /// identity can be attached, these fall through to a pattern-match
    /// orphan verdict instead of Ambiguous. The pure identity-feed stores
    /// (uninstall registry, receipts, package database/registry) never do:
    /// an unmatched name from them stays Ambiguous.
    pub fn pattern_fallback(&self) -> bool {
        !matches!(
            self,
            EvidenceSource::UninstallRegistry
                | EvidenceSource::PackageReceipts
                | EvidenceSource::PackageDatabase
                | EvidenceSource::PackageRegistry
        )
    }

    /// Platform family the source belongs to; scopes alias lookups.
    pub fn platform(&self) -> crate::model::PlatformFamily {
        use crate::model::PlatformFamily;
        match self {
            EvidenceSource::UninstallRegistry
            | EvidenceSource::SharedDllRegistry
            | EvidenceSource::ServiceRegistry
            | EvidenceSource::ExecutionTrace => PlatformFamily::Windows,
            EvidenceSource::PackageReceipts | EvidenceSource::BundleDataScan => {
                PlatformFamily::MacOs
            }
            EvidenceSource::PackageDatabase | EvidenceSource::FilesystemSubtraction => {
                PlatformFamily::Linux
            }
            EvidenceSource::PackageRegistry
            | EvidenceSource::AppDataScan
            | EvidenceSource::StorageScan => PlatformFamily::Android,
            EvidenceSource::Keychain | EvidenceSource::SnapshotCache => PlatformFamily::Ios,
        }
    }
}

/// One piece of raw evidence found outside the installed-paths set.
/// Created fresh each scan, never mutated, consumed exactly once by the
/// ownership matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCandidate {
    pub location: Location,
    pub kind: ArtifactKind,
    /// Raw string extracted from the location: folder name, key value,
    /// bundle-id fragment. Case-folded at construction.
    pub observed_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    pub source: EvidenceSource,
}

impl ArtifactCandidate {
    pub fn new(
        location: Location,
        kind: ArtifactKind,
        observed_name: impl AsRef<str>,
        source: EvidenceSource,
    ) -> Self {
        Self {
            location,
            kind,
            observed_name: observed_name.as_ref().to_lowercase(),
            size_bytes: None,
            last_modified: None,
            source,
        }
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }

    pub fn with_last_modified(mut self, when: DateTime<Utc>) -> Self {
        self.last_modified = Some(when);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observed_name_is_case_folded() {
        let c = ArtifactCandidate::new(
            Location::Directory {
                path: PathBuf::from("/tmp/Tencent"),
            },
            ArtifactKind::ConfigDirectory,
            "Tencent",
            EvidenceSource::FilesystemSubtraction,
        );
        assert_eq!(c.observed_name, "tencent");
    }

    #[test]
    fn dedup_keys_distinguish_location_types() {
        let file = Location::File {
            path: PathBuf::from("/etc/foo"),
        };
        let key = Location::RegistryKey {
            key: "/etc/foo".into(),
        };
        assert_ne!(file.dedup_key(), key.dedup_key());
    }
}
