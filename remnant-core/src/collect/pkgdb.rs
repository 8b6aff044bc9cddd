// remnant-core/src/collect/pkgdb.rs
//
// Linux-style collector: installed identities from the package manager's
// query interface, removed-not-purged residue from package status, and an
// unowned-file set computed by subtracting the claimed-path set from a
// walk of fixed system directories.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use remnant_common::alias::AliasDb;
use remnant_common::config::{CollectorId, ScanConfig, VIRTUAL_FS_ROOTS};
use remnant_common::model::{
    ArtifactCandidate, ArtifactKind, EvidenceSource, InstalledIdentity, Location, PlatformFamily,
};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{dir_size, modified_time, CandidateBatch, Collector, ScanSignal, StoreError, StoreResult};

const DPKG_INFO_DIR: &str = "/var/lib/dpkg/info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    Installed,
    /// Binaries removed, configuration residue retained
    /// (dpkg status `deinstall ok config-files`).
    RemovedConfigFiles,
}

#[derive(Debug, Clone)]
pub struct PackageRecord {
    pub name: String,
    pub state: PackageState,
}

/// Read-only package database capability.
pub trait PackageDbProvider: Send + Sync {
    fn package_records(&self) -> StoreResult<Vec<PackageRecord>>;
    /// Every filesystem path claimed by any package, installed or not.
    fn claimed_paths(&self) -> StoreResult<HashSet<PathBuf>>;
    /// Configuration paths recorded for a removed-not-purged package.
    fn config_residue(&self, package: &str) -> StoreResult<Vec<PathBuf>>;
}

/// dpkg-backed provider: `dpkg-query` for status, the dpkg info directory
/// for file lists and conffiles.
#[derive(Debug, Default)]
pub struct DpkgDatabase;

impl PackageDbProvider for DpkgDatabase {
    fn package_records(&self) -> StoreResult<Vec<PackageRecord>> {
        let output = Command::new("dpkg-query")
            .args(["-W", "-f", "${Package}\\t${Status}\\n"])
            .output()
            .map_err(|e| StoreError::Unavailable(format!("dpkg-query not runnable: {e}")))?;
        if !output.status.success() {
            return Err(StoreError::Unavailable(format!(
                "dpkg-query exited with {}",
                output.status
            )));
        }
        let mut records = Vec::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let Some((name, status)) = line.split_once('\t') else {
                continue;
            };
            let state = match status.trim() {
                "install ok installed" => PackageState::Installed,
                "deinstall ok config-files" => PackageState::RemovedConfigFiles,
                _ => continue,
            };
            records.push(PackageRecord {
                name: name.trim().to_string(),
                state,
            });
        }
        Ok(records)
    }

    fn claimed_paths(&self) -> StoreResult<HashSet<PathBuf>> {
        let info_dir = Path::new(DPKG_INFO_DIR);
        let entries = std::fs::read_dir(info_dir)
            .map_err(|e| StoreError::Unavailable(format!("{DPKG_INFO_DIR} not readable: {e}")))?;
        let mut claimed = HashSet::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("list") {
                continue;
            }
            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Unreadable package file list {}: {}", path.display(), e);
                    continue;
                }
            };
            for line in raw.lines() {
                let line = line.trim();
                if !line.is_empty() && line != "/." {
                    claimed.insert(PathBuf::from(line));
                }
            }
        }
        Ok(claimed)
    }

    fn config_residue(&self, package: &str) -> StoreResult<Vec<PathBuf>> {
        let conffiles = Path::new(DPKG_INFO_DIR).join(format!("{package}.conffiles"));
        let mut residue = Vec::new();
        match std::fs::read_to_string(&conffiles) {
            Ok(raw) => {
                for line in raw.lines() {
                    let line = line.trim();
                    if !line.is_empty() {
                        residue.push(PathBuf::from(line));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "{} not readable: {e}",
                    conffiles.display()
                )))
            }
        }
        // The package's /etc directory is residue too when it survives.
        let etc_dir = PathBuf::from("/etc").join(package);
        if etc_dir.is_dir() {
            residue.push(etc_dir);
        }
        Ok(residue)
    }
}

pub struct PackageDbCollector<P = DpkgDatabase> {
    config: ScanConfig,
    alias: Arc<AliasDb>,
    provider: P,
}

impl PackageDbCollector<DpkgDatabase> {
    pub fn new(config: ScanConfig, alias: Arc<AliasDb>) -> Self {
        Self::with_provider(config, alias, DpkgDatabase)
    }
}

impl<P: PackageDbProvider> PackageDbCollector<P> {
    pub fn with_provider(config: ScanConfig, alias: Arc<AliasDb>, provider: P) -> Self {
        Self { config, alias, provider }
    }

    /// True when `path` is claimed directly or sits under a claimed path.
    fn is_claimed(claimed: &HashSet<PathBuf>, path: &Path) -> bool {
        if claimed.contains(path) {
            return true;
        }
        path.ancestors().skip(1).any(|a| claimed.contains(a))
    }

    fn subtraction_walk(&self, batch: &mut CandidateBatch, claimed: &HashSet<PathBuf>, signal: &ScanSignal) {
        let home = self.config.home_dir();
        for root in &self.config.subtraction_roots {
            if VIRTUAL_FS_ROOTS.iter().any(|v| root.starts_with(v)) || root.starts_with(&home) {
                // Config validation rejects these; double-checked here since
                // the walk is the dangerous part.
                continue;
            }
            if !root.is_dir() {
                debug!("Subtraction root {} not present, skipping.", root.display());
                continue;
            }
            let mut walker = WalkDir::new(root)
                .min_depth(1)
                .max_depth(self.config.subtraction_depth)
                .into_iter();
            loop {
                if batch.interrupted(
                    signal,
                    EvidenceSource::FilesystemSubtraction,
                    &root.display().to_string(),
                ) {
                    return;
                }
                let entry = match walker.next() {
                    Some(Ok(entry)) => entry,
                    Some(Err(e)) => {
                        debug!("Walk error under {}: {}", root.display(), e);
                        continue;
                    }
                    None => break,
                };
                let path = entry.path();
                if Self::is_claimed(claimed, path) {
                    // Claimed directory: everything below it is accounted for.
                    if entry.file_type().is_dir() {
                        walker.skip_current_dir();
                    }
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if self
                    .alias
                    .is_system_noise(&name, PlatformFamily::Linux, "subtraction")
                {
                    if entry.file_type().is_dir() {
                        walker.skip_current_dir();
                    }
                    continue;
                }
                if entry.file_type().is_dir() {
                    // Report the topmost unclaimed directory, not its contents.
                    let size = dir_size(path, signal);
                    let mut candidate = ArtifactCandidate::new(
                        Location::Directory {
                            path: path.to_path_buf(),
                        },
                        ArtifactKind::ConfigDirectory,
                        name,
                        EvidenceSource::FilesystemSubtraction,
                    )
                    .with_size(size);
                    if let Some(when) = modified_time(path) {
                        candidate = candidate.with_last_modified(when);
                    }
                    batch.push(candidate);
                    walker.skip_current_dir();
                } else if entry.file_type().is_file() {
                    let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                    let mut candidate = ArtifactCandidate::new(
                        Location::File {
                            path: path.to_path_buf(),
                        },
                        ArtifactKind::Other,
                        name,
                        EvidenceSource::FilesystemSubtraction,
                    )
                    .with_size(size);
                    if let Some(when) = modified_time(path) {
                        candidate = candidate.with_last_modified(when);
                    }
                    batch.push(candidate);
                }
            }
        }
    }
}

impl<P: PackageDbProvider> Collector for PackageDbCollector<P> {
    fn id(&self) -> CollectorId {
        CollectorId::PackageDb
    }

    fn platform(&self) -> PlatformFamily {
        PlatformFamily::Linux
    }

    fn source(&self) -> EvidenceSource {
        EvidenceSource::PackageDatabase
    }

    fn enumerate_installed(&self, signal: &ScanSignal) -> StoreResult<Vec<InstalledIdentity>> {
        let mut identities = Vec::new();
        for record in self.provider.package_records()? {
            if signal.interruption().is_some() {
                break;
            }
            if record.state == PackageState::Installed {
                identities.push(InstalledIdentity::new(
                    &record.name,
                    PlatformFamily::Linux,
                ));
            }
        }
        debug!(
            "Package database reports {} installed packages",
            identities.len()
        );
        Ok(identities)
    }

    fn enumerate_historical(&self, _signal: &ScanSignal) -> StoreResult<Vec<String>> {
        Ok(self
            .provider
            .package_records()?
            .into_iter()
            .filter(|r| r.state == PackageState::RemovedConfigFiles)
            .map(|r| r.name)
            .collect())
    }

    fn enumerate_candidates(&self, signal: &ScanSignal) -> StoreResult<CandidateBatch> {
        let mut batch = CandidateBatch::default();

        // Removed-not-purged packages: their surviving configuration paths
        // are residue attributed to the package by name.
        match self.provider.package_records() {
            Ok(records) => {
                for record in records {
                    if batch.interrupted(signal, EvidenceSource::PackageDatabase, "status") {
                        return Ok(batch);
                    }
                    if record.state != PackageState::RemovedConfigFiles {
                        continue;
                    }
                    let residue = match self.provider.config_residue(&record.name) {
                        Ok(residue) => residue,
                        Err(e) => {
                            e.log(EvidenceSource::PackageDatabase, &record.name);
                            batch
                                .skips
                                .push(e.into_skip(EvidenceSource::PackageDatabase, &record.name));
                            continue;
                        }
                    };
                    for path in residue {
                        let exists_as_dir = path.is_dir();
                        if !exists_as_dir && !path.is_file() {
                            continue;
                        }
                        let location = if exists_as_dir {
                            Location::Directory { path: path.clone() }
                        } else {
                            Location::File { path: path.clone() }
                        };
                        let size = if exists_as_dir {
                            dir_size(&path, signal)
                        } else {
                            std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0)
                        };
                        let mut candidate = ArtifactCandidate::new(
                            location,
                            ArtifactKind::ConfigDirectory,
                            &record.name,
                            EvidenceSource::PackageDatabase,
                        )
                        .with_size(size);
                        if let Some(when) = modified_time(&path) {
                            candidate = candidate.with_last_modified(when);
                        }
                        batch.push(candidate);
                    }
                }
            }
            Err(e) => {
                e.log(EvidenceSource::PackageDatabase, "status");
                batch
                    .skips
                    .push(e.into_skip(EvidenceSource::PackageDatabase, "status"));
            }
        }

        // Unowned-file set: on disk, unclaimed by any package.
        match self.provider.claimed_paths() {
            Ok(claimed) => self.subtraction_walk(&mut batch, &claimed, signal),
            Err(e) => {
                e.log(EvidenceSource::FilesystemSubtraction, DPKG_INFO_DIR);
                batch
                    .skips
                    .push(e.into_skip(EvidenceSource::FilesystemSubtraction, DPKG_INFO_DIR));
            }
        }

        debug!(
            "Package-db collector produced {} candidates ({} skips)",
            batch.candidates.len(),
            batch.skips.len()
        );
        Ok(batch)
    }
}
