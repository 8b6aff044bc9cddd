// remnant-core/src/collect/bundle.rs
//
// macOS-style collector: installed identities come from application
// bundles (Info.plist) and the package-receipt store; historical keys
// from the install-history log; candidates from the per-user Library
// data areas (containers, preferences, application support, caches,
// logs, launch agents).
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use remnant_common::alias::AliasDb;
use remnant_common::config::{CollectorId, ScanConfig};
use remnant_common::model::{
    ArtifactCandidate, ArtifactKind, EvidenceSource, InstalledIdentity, Location, PlatformFamily,
};
use tracing::{debug, warn};

use super::{dir_size, modified_time, CandidateBatch, Collector, ScanSignal, StoreError, StoreResult};

const INSTALL_HISTORY_PLIST: &str = "/Library/Receipts/InstallHistory.plist";

/// Read-only view of the receipt store. Opaque platform capability;
/// fallible by contract.
pub trait ReceiptProvider: Send + Sync {
    /// Receipt package identifiers for currently installed packages.
    fn receipt_ids(&self) -> StoreResult<Vec<String>>;
    /// Package identifiers recorded in the install-history log, whether
    /// or not the package still exists.
    fn history_ids(&self) -> StoreResult<Vec<String>>;
}

/// System-backed receipt store: shells out to `pkgutil` and parses the
/// install-history property list.
#[derive(Debug, Default)]
pub struct SystemReceipts;

impl ReceiptProvider for SystemReceipts {
    fn receipt_ids(&self) -> StoreResult<Vec<String>> {
        let output = Command::new("pkgutil")
            .arg("--pkgs")
            .output()
            .map_err(|e| StoreError::Unavailable(format!("pkgutil not runnable: {e}")))?;
        if !output.status.success() {
            return Err(StoreError::Unavailable(format!(
                "pkgutil --pkgs exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    fn history_ids(&self) -> StoreResult<Vec<String>> {
        let path = Path::new(INSTALL_HISTORY_PLIST);
        if !path.is_file() {
            return Err(StoreError::Unavailable(format!(
                "{INSTALL_HISTORY_PLIST} not present"
            )));
        }
        let value = plist::Value::from_file(path)
            .map_err(|e| StoreError::Corrupt(format!("install history unreadable: {e}")))?;
        let mut ids = Vec::new();
        if let plist::Value::Array(records) = value {
            for record in records {
                if let plist::Value::Dictionary(dict) = record {
                    if let Some(plist::Value::Array(pkgs)) = dict.get("packageIdentifiers") {
                        for pkg in pkgs {
                            if let plist::Value::String(id) = pkg {
                                ids.push(id.clone());
                            }
                        }
                    }
                }
            }
        }
        Ok(ids)
    }
}

pub struct BundleCollector<P = SystemReceipts> {
    config: ScanConfig,
    alias: Arc<AliasDb>,
    provider: P,
}

impl BundleCollector<SystemReceipts> {
    pub fn new(config: ScanConfig, alias: Arc<AliasDb>) -> Self {
        Self::with_provider(config, alias, SystemReceipts)
    }
}

impl<P: ReceiptProvider> BundleCollector<P> {
    pub fn with_provider(config: ScanConfig, alias: Arc<AliasDb>, provider: P) -> Self {
        Self {
            config,
            alias,
            provider,
        }
    }

    /// Identity for one `.app` bundle, if its Info.plist yields a bundle id.
    fn bundle_identity(app_path: &Path) -> Option<InstalledIdentity> {
        let info = app_path.join("Contents/Info.plist");
        let value = match plist::Value::from_file(&info) {
            Ok(v) => v,
            Err(e) => {
                debug!("Unreadable Info.plist at {}: {}", info.display(), e);
                return None;
            }
        };
        let dict = value.as_dictionary()?;
        let bundle_id = dict.get("CFBundleIdentifier")?.as_string()?;
        let mut identity = InstalledIdentity::new(bundle_id, PlatformFamily::MacOs)
            .with_install_path(app_path.to_path_buf());
        if let Some(name) = dict.get("CFBundleName").and_then(|v| v.as_string()) {
            identity = identity.with_display_name(name);
        }
        if let Some(stem) = app_path.file_stem().and_then(|s| s.to_str()) {
            identity = identity.with_alias(stem);
        }
        Some(identity)
    }

    /// Walk one Library data area of directories, emitting each non-system
    /// entry above the size floor as a candidate.
    fn scan_dir_area(
        &self,
        batch: &mut CandidateBatch,
        dir: &Path,
        area: &str,
        min_size: u64,
        strip_team_prefix: bool,
        signal: &ScanSignal,
    ) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Data area {} does not exist, skipping.", dir.display());
                return;
            }
            Err(e) => {
                StoreError::Unavailable(e.to_string())
                    .log(EvidenceSource::BundleDataScan, &dir.display().to_string());
                batch.skips.push(
                    StoreError::Unavailable(e.to_string())
                        .into_skip(EvidenceSource::BundleDataScan, &dir.display().to_string()),
                );
                return;
            }
        };
        for entry in entries.flatten() {
            if batch.interrupted(signal, EvidenceSource::BundleDataScan, area) {
                return;
            }
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let raw_name = entry.file_name().to_string_lossy().into_owned();
            if self
                .alias
                .is_system_noise(&raw_name, PlatformFamily::MacOs, area)
            {
                continue;
            }
            // Group containers are TEAMID.com.example.group; matching wants
            // the reverse-domain portion after the team id.
            let observed = if strip_team_prefix {
                raw_name
                    .split_once('.')
                    .map(|(_, rest)| rest.to_string())
                    .unwrap_or_else(|| raw_name.clone())
            } else {
                raw_name.clone()
            };
            let size = dir_size(&path, signal);
            if size < min_size {
                continue;
            }
            let mut candidate = ArtifactCandidate::new(
                Location::Directory { path: path.clone() },
                ArtifactKind::ConfigDirectory,
                observed,
                EvidenceSource::BundleDataScan,
            )
            .with_size(size);
            if let Some(when) = modified_time(&path) {
                candidate = candidate.with_last_modified(when);
            }
            batch.push(candidate);
        }
    }

    /// Walk an area of `.plist` files (preferences, launch agents).
    fn scan_plist_area(
        &self,
        batch: &mut CandidateBatch,
        dir: &Path,
        area: &str,
        kind: ArtifactKind,
        signal: &ScanSignal,
    ) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!("Data area {} not readable: {}", dir.display(), e);
                }
                return;
            }
        };
        for entry in entries.flatten() {
            if batch.interrupted(signal, EvidenceSource::BundleDataScan, area) {
                return;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("plist") || !path.is_file() {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            if self
                .alias
                .is_system_noise(&stem, PlatformFamily::MacOs, area)
            {
                continue;
            }
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            if size == 0 {
                continue;
            }
            let mut candidate = ArtifactCandidate::new(
                Location::File { path: path.clone() },
                kind,
                stem,
                EvidenceSource::BundleDataScan,
            )
            .with_size(size);
            if let Some(when) = modified_time(&path) {
                candidate = candidate.with_last_modified(when);
            }
            batch.push(candidate);
        }
    }

    fn library_dir(&self) -> PathBuf {
        self.config.library_dir()
    }
}

impl<P: ReceiptProvider> Collector for BundleCollector<P> {
    fn id(&self) -> CollectorId {
        CollectorId::Bundle
    }

    fn platform(&self) -> PlatformFamily {
        PlatformFamily::MacOs
    }

    fn source(&self) -> EvidenceSource {
        EvidenceSource::PackageReceipts
    }

    fn enumerate_installed(&self, signal: &ScanSignal) -> StoreResult<Vec<InstalledIdentity>> {
        let mut identities = Vec::new();

        match self.provider.receipt_ids() {
            Ok(ids) => {
                for id in ids {
                    identities.push(InstalledIdentity::new(id, PlatformFamily::MacOs));
                }
            }
            Err(e) => e.log(EvidenceSource::PackageReceipts, "pkgutil"),
        }

        for apps_dir in self.config.applications_dirs() {
            let entries = match std::fs::read_dir(&apps_dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(
                        "Applications directory {} not readable: {}",
                        apps_dir.display(),
                        e
                    );
                    continue;
                }
            };
            for entry in entries.flatten() {
                if signal.interruption().is_some() {
                    debug!("Bundle installed enumeration stopped early");
                    return Ok(identities);
                }
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("app") {
                    continue;
                }
                if let Some(identity) = Self::bundle_identity(&path) {
                    identities.push(identity);
                }
            }
        }

        debug!("Bundle collector found {} installed identities", identities.len());
        Ok(identities)
    }

    fn enumerate_historical(&self, _signal: &ScanSignal) -> StoreResult<Vec<String>> {
        self.provider.history_ids()
    }

    fn enumerate_candidates(&self, signal: &ScanSignal) -> StoreResult<CandidateBatch> {
        let mut batch = CandidateBatch::default();
        let library = self.library_dir();
        if !library.is_dir() {
            warn!(
                "User library {} not present; bundle data scan yields nothing",
                library.display()
            );
            return Err(StoreError::Unavailable(format!(
                "{} not present",
                library.display()
            )));
        }

        // Walks and size floors follow the original leftover scanner:
        // empty containers and sub-KiB noise are not worth reporting.
        self.scan_dir_area(&mut batch, &library.join("Containers"), "containers", 1, false, signal);
        self.scan_dir_area(
            &mut batch,
            &library.join("Group Containers"),
            "containers",
            1,
            true,
            signal,
        );
        self.scan_dir_area(
            &mut batch,
            &library.join("Application Support"),
            "app_support",
            1024,
            false,
            signal,
        );
        self.scan_dir_area(&mut batch, &library.join("Caches"), "caches", 10240, false, signal);
        self.scan_dir_area(&mut batch, &library.join("Logs"), "logs", 1024, false, signal);
        self.scan_plist_area(
            &mut batch,
            &library.join("Preferences"),
            "preferences",
            ArtifactKind::Other,
            signal,
        );
        self.scan_plist_area(
            &mut batch,
            &library.join("LaunchAgents"),
            "launch_agents",
            ArtifactKind::ServiceDefinition,
            signal,
        );
        self.scan_plist_area(
            &mut batch,
            Path::new("/Library/LaunchAgents"),
            "launch_agents",
            ArtifactKind::ServiceDefinition,
            signal,
        );

        debug!(
            "Bundle collector produced {} candidates ({} skips)",
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

    struct FixtureReceipts {
        installed: Vec<String>,
        history: Vec<String>,
    }

    impl ReceiptProvider for FixtureReceipts {
        fn receipt_ids(&self) -> StoreResult<Vec<String>> {
            Ok(self.installed.clone())
        }

        fn history_ids(&self) -> StoreResult<Vec<String>> {
            Ok(self.history.clone())
        }
    }

    fn collector_over(home: &Path) -> BundleCollector<FixtureReceipts> {
        let config = ScanConfig {
            home_override: Some(home.to_path_buf()),
            ..Default::default()
        };
        BundleCollector::with_provider(
            config,
            Arc::new(AliasDb::embedded()),
            FixtureReceipts {
                installed: vec!["com.vendor.pkg".into()],
                history: vec!["com.old.pkg".into()],
            },
        )
    }

    #[test]
    fn emits_container_and_preference_candidates() {
        let home = tempfile::tempdir().unwrap();
        let library = home.path().join("Library");
        let container = library.join("Containers/com.gone.app");
        fs::create_dir_all(&container).unwrap();
        fs::write(container.join("data.bin"), vec![0u8; 64]).unwrap();
        let prefs = library.join("Preferences");
        fs::create_dir_all(&prefs).unwrap();
        fs::write(prefs.join("com.gone.app.plist"), b"{}").unwrap();
        // System noise must be suppressed.
        fs::write(prefs.join("com.apple.dock.plist"), b"{}").unwrap();

        let collector = collector_over(home.path());
        let batch = collector.enumerate_candidates(&ScanSignal::new()).unwrap();
        let names: Vec<&str> = batch
            .candidates
            .iter()
            .map(|c| c.observed_name.as_str())
            .collect();
        assert!(names.contains(&"com.gone.app"));
        assert!(!names.iter().any(|n| n.starts_with("com.apple.")));
    }

    #[test]
    fn group_container_team_prefix_is_stripped() {
        let home = tempfile::tempdir().unwrap();
        let group = home
            .path()
            .join("Library/Group Containers/ABCDE12345.com.gone.group");
        fs::create_dir_all(&group).unwrap();
        fs::write(group.join("state"), b"x").unwrap();

        let collector = collector_over(home.path());
        let batch = collector.enumerate_candidates(&ScanSignal::new()).unwrap();
        assert!(batch
            .candidates
            .iter()
            .any(|c| c.observed_name == "com.gone.group"));
    }

    #[test]
    fn historical_comes_from_install_history() {
        let home = tempfile::tempdir().unwrap();
        fs::create_dir_all(home.path().join("Library")).unwrap();
        let collector = collector_over(home.path());
        let historical = collector.enumerate_historical(&ScanSignal::new()).unwrap();
        assert_eq!(historical, vec!["com.old.pkg".to_string()]);
    }

    #[test]
    fn missing_library_is_unavailable_not_fatal() {
        let home = tempfile::tempdir().unwrap();
        let collector = collector_over(home.path());
        assert!(matches!(
            collector.enumerate_candidates(&ScanSignal::new()),
            Err(StoreError::Unavailable(_))
        ));
    }
}
