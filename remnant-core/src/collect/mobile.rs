// remnant-core/src/collect/mobile.rs
//
// Mobile corpse-finder collector (Android-style): installed identities
// from the platform package registry; candidates from the structured
// per-package data area (folder name is the canonical key) and from
// arbitrary top-level storage folders, which fall through to alias
// lookup during matching.
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use remnant_common::alias::AliasDb;
use remnant_common::config::{CollectorId, ScanConfig};
use remnant_common::model::{
    ArtifactCandidate, ArtifactKind, EvidenceSource, InstalledIdentity, Location, PlatformFamily,
};
use tracing::debug;

use super::{dir_size, modified_time, CandidateBatch, Collector, ScanSignal, StoreError, StoreResult};

/// Read-only package registry capability.
pub trait PackageRegistryProvider: Send + Sync {
    fn installed_packages(&self) -> StoreResult<Vec<String>>;
}

/// System-backed registry: shells out to `pm list packages`.
#[derive(Debug, Default)]
pub struct SystemPackageManager;

impl PackageRegistryProvider for SystemPackageManager {
    fn installed_packages(&self) -> StoreResult<Vec<String>> {
        let output = Command::new("pm")
            .args(["list", "packages"])
            .output()
            .map_err(|e| StoreError::Unavailable(format!("pm not runnable: {e}")))?;
        if !output.status.success() {
            return Err(StoreError::Unavailable(format!(
                "pm list packages exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|l| l.trim().strip_prefix("package:"))
            .map(|s| s.to_string())
            .collect())
    }
}

pub struct MobileCollector<P = SystemPackageManager> {
    config: ScanConfig,
    alias: Arc<AliasDb>,
    provider: P,
}

impl MobileCollector<SystemPackageManager> {
    pub fn new(config: ScanConfig, alias: Arc<AliasDb>) -> Self {
        Self::with_provider(config, alias, SystemPackageManager)
    }
}

impl<P: PackageRegistryProvider> MobileCollector<P> {
    pub fn with_provider(config: ScanConfig, alias: Arc<AliasDb>, provider: P) -> Self {
        Self {
            config,
            alias,
            provider,
        }
    }

    fn data_root(&self) -> PathBuf {
        self.config
            .mobile_data_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("/data/data"))
    }

    fn storage_root(&self) -> PathBuf {
        self.config
            .mobile_storage_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("/sdcard"))
    }

    fn scan_folder_area(
        &self,
        batch: &mut CandidateBatch,
        root: &PathBuf,
        source: EvidenceSource,
        apply_noise_filter: bool,
        signal: &ScanSignal,
    ) {
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    let err = StoreError::Unavailable(e.to_string());
                    err.log(source, &root.display().to_string());
                    batch
                        .skips
                        .push(err.into_skip(source, &root.display().to_string()));
                } else {
                    debug!("Mobile area {} not present, skipping.", root.display());
                }
                return;
            }
        };
        for entry in entries.flatten() {
            if batch.interrupted(signal, source, &root.display().to_string()) {
                return;
            }
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if apply_noise_filter
                && self
                    .alias
                    .is_system_noise(&name, PlatformFamily::Android, "storage")
            {
                continue;
            }
            let size = dir_size(&path, signal);
            let mut candidate = ArtifactCandidate::new(
                Location::Directory { path: path.clone() },
                ArtifactKind::ConfigDirectory,
                name,
                source,
            )
            .with_size(size);
            if let Some(when) = modified_time(&path) {
                candidate = candidate.with_last_modified(when);
            }
            batch.push(candidate);
        }
    }
}

impl<P: PackageRegistryProvider> Collector for MobileCollector<P> {
    fn id(&self) -> CollectorId {
        CollectorId::Mobile
    }

    fn platform(&self) -> PlatformFamily {
        PlatformFamily::Android
    }

    fn source(&self) -> EvidenceSource {
        EvidenceSource::PackageRegistry
    }

    fn enumerate_installed(&self, _signal: &ScanSignal) -> StoreResult<Vec<InstalledIdentity>> {
        let data_root = self.data_root();
        let identities: Vec<InstalledIdentity> = self
            .provider
            .installed_packages()?
            .into_iter()
            .map(|pkg| {
                let data_dir = data_root.join(&pkg);
                let mut identity = InstalledIdentity::new(&pkg, PlatformFamily::Android);
                if data_dir.is_dir() {
                    identity = identity.with_install_path(data_dir);
                }
                identity
            })
            .collect();
        debug!(
            "Package registry reports {} installed packages",
            identities.len()
        );
        Ok(identities)
    }

    fn enumerate_candidates(&self, signal: &ScanSignal) -> StoreResult<CandidateBatch> {
        let mut batch = CandidateBatch::default();
        // Structured area: each folder is named by its owning package's
        // canonical key, so matching is exact-key equality.
        self.scan_folder_area(
            &mut batch,
            &self.data_root(),
            EvidenceSource::AppDataScan,
            false,
            signal,
        );
        // Arbitrary storage folders carry vendor-chosen names; these rely
        // on the curated alias table during matching.
        self.scan_folder_area(
            &mut batch,
            &self.storage_root(),
            EvidenceSource::StorageScan,
            true,
            signal,
        );
        debug!(
            "Mobile collector produced {} candidates ({} skips)",
            batch.candidates.len(),
            batch.skips.len()
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    struct FixtureRegistry(Vec<String>);

    impl PackageRegistryProvider for FixtureRegistry {
        fn installed_packages(&self) -> StoreResult<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn structured_and_storage_areas_emit_with_distinct_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        let storage = tmp.path().join("storage");
        fs::create_dir_all(data.join("com.gone.app")).unwrap();
        fs::write(data.join("com.gone.app/db"), b"x").unwrap();
        fs::create_dir_all(storage.join("Tencent")).unwrap();
        fs::write(storage.join("Tencent/msg.db"), b"x").unwrap();
        // Default storage noise (Android system folders) is filtered.
        fs::create_dir_all(storage.join("DCIM")).unwrap();

        let collector = MobileCollector::with_provider(
            ScanConfig {
                mobile_data_root: Some(data),
                mobile_storage_root: Some(storage),
                ..Default::default()
            },
            Arc::new(AliasDb::embedded()),
            FixtureRegistry(vec!["com.kept.app".into()]),
        );
        let batch = collector.enumerate_candidates(&ScanSignal::new()).unwrap();
        let sources: Vec<(String, EvidenceSource)> = batch
            .candidates
            .iter()
            .map(|c| (c.observed_name.clone(), c.source))
            .collect();
        assert!(sources.contains(&("com.gone.app".into(), EvidenceSource::AppDataScan)));
        assert!(sources.contains(&("tencent".into(), EvidenceSource::StorageScan)));
        assert!(!sources.iter().any(|(n, _)| n == "dcim"));
    }

    #[test]
    fn installed_identities_claim_their_data_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        fs::create_dir_all(data.join("com.kept.app")).unwrap();
        let collector = MobileCollector::with_provider(
            ScanConfig {
                mobile_data_root: Some(data.clone()),
                ..Default::default()
            },
            Arc::new(AliasDb::embedded()),
            FixtureRegistry(vec!["com.kept.app".into()]),
        );
        let identities = collector.enumerate_installed(&ScanSignal::new()).unwrap();
        assert_eq!(identities.len(), 1);
        assert!(identities[0]
            .install_paths
            .contains(&data.join("com.kept.app")));
    }
}
