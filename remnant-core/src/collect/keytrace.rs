// remnant-core/src/collect/keytrace.rs
//
// Keychain/trace collector (iOS-style): access-group-scoped secure-store
// entries and visual-snapshot caches. The owning app's sandbox is already
// gone when these exist, so they virtually never resolve to Owned; they
// serve as historical proof with correlational weight, not as safety
// risks.
use std::process::Command;

use remnant_common::config::CollectorId;
use remnant_common::model::{
    ArtifactCandidate, ArtifactKind, EvidenceSource, InstalledIdentity, Location, PlatformFamily,
};
use tracing::debug;

use super::{CandidateBatch, Collector, ScanSignal, StoreError, StoreResult};

#[derive(Debug, Clone)]
pub struct KeychainEntry {
    /// Access group, usually TEAMID.bundle.id.
    pub access_group: String,
}

/// Read-only secure-store capability.
pub trait SecureStoreProvider: Send + Sync {
    fn keychain_entries(&self) -> StoreResult<Vec<KeychainEntry>>;
    /// Bundle identifiers recorded in the snapshot cache.
    fn snapshot_records(&self) -> StoreResult<Vec<String>>;
}

/// System-backed provider shelling out to the `security` tool. Snapshot
/// caches have no queryable system interface here, so that sub-store
/// reports unavailable.
#[derive(Debug, Default)]
pub struct SystemSecureStore;

impl SecureStoreProvider for SystemSecureStore {
    fn keychain_entries(&self) -> StoreResult<Vec<KeychainEntry>> {
        let output = Command::new("security")
            .args(["dump-keychain"])
            .output()
            .map_err(|e| StoreError::Unavailable(format!("security not runnable: {e}")))?;
        if !output.status.success() {
            return Err(StoreError::Unavailable(format!(
                "security dump-keychain exited with {}",
                output.status
            )));
        }
        let mut entries = Vec::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let trimmed = line.trim();
            // Dump lines of interest: "agrp"<blob>="TEAMID.com.example.app"
            if let Some(rest) = trimmed.strip_prefix("\"agrp\"") {
                if let Some(group) = rest.split('"').nth(1) {
                    entries.push(KeychainEntry {
                        access_group: group.to_string(),
                    });
                }
            }
        }
        Ok(entries)
    }

    fn snapshot_records(&self) -> StoreResult<Vec<String>> {
        Err(StoreError::Unavailable(
            "snapshot cache store not accessible from this host".into(),
        ))
    }
}

pub struct KeychainTraceCollector<P = SystemSecureStore> {
    provider: P,
}

impl KeychainTraceCollector<SystemSecureStore> {
    pub fn new() -> Self {
        Self::with_provider(SystemSecureStore)
    }
}

impl Default for KeychainTraceCollector<SystemSecureStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: SecureStoreProvider> KeychainTraceCollector<P> {
    pub fn with_provider(provider: P) -> Self {
        Self { provider }
    }

    /// Access groups are TEAMID.bundle.id; matching wants the bundle id.
    fn strip_team_prefix(group: &str) -> &str {
        match group.split_once('.') {
            Some((team, rest)) if team.len() == 10 && rest.contains('.') => rest,
            _ => group,
        }
    }
}

impl<P: SecureStoreProvider> Collector for KeychainTraceCollector<P> {
    fn id(&self) -> CollectorId {
        CollectorId::Keytrace
    }

    fn platform(&self) -> PlatformFamily {
        PlatformFamily::Ios
    }

    fn source(&self) -> EvidenceSource {
        EvidenceSource::Keychain
    }

    /// The sandbox of every app these stores describe is already deleted;
    /// this collector contributes no installed identities.
    fn enumerate_installed(&self, _signal: &ScanSignal) -> StoreResult<Vec<InstalledIdentity>> {
        Ok(Vec::new())
    }

    fn enumerate_candidates(&self, signal: &ScanSignal) -> StoreResult<CandidateBatch> {
        let mut batch = CandidateBatch::default();

        match self.provider.keychain_entries() {
            Ok(entries) => {
                for entry in entries {
                    if batch.interrupted(signal, EvidenceSource::Keychain, "keychain") {
                        return Ok(batch);
                    }
                    let observed = Self::strip_team_prefix(&entry.access_group).to_string();
                    batch.push(ArtifactCandidate::new(
                        Location::KeychainGroup {
                            group: entry.access_group.clone(),
                        },
                        ArtifactKind::KeychainItem,
                        observed,
                        EvidenceSource::Keychain,
                    ));
                }
            }
            Err(e) => {
                e.log(EvidenceSource::Keychain, "keychain");
                batch.skips.push(e.into_skip(EvidenceSource::Keychain, "keychain"));
            }
        }

        match self.provider.snapshot_records() {
            Ok(records) => {
                for record in records {
                    if batch.interrupted(signal, EvidenceSource::SnapshotCache, "snapshots") {
                        return Ok(batch);
                    }
                    batch.push(ArtifactCandidate::new(
                        Location::TraceRecord {
                            record: record.clone(),
                        },
                        ArtifactKind::Other,
                        record,
                        EvidenceSource::SnapshotCache,
                    ));
                }
            }
            Err(e) => {
                e.log(EvidenceSource::SnapshotCache, "snapshots");
                batch
                    .skips
                    .push(e.into_skip(EvidenceSource::SnapshotCache, "snapshots"));
            }
        }

        debug!(
            "Keychain/trace collector produced {} candidates ({} skips)",
            batch.candidates.len(),
            batch.skips.len()
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixtureStore {
        entries: Vec<KeychainEntry>,
        snapshots: StoreResult<Vec<String>>,
    }

    impl SecureStoreProvider for FixtureStore {
        fn keychain_entries(&self) -> StoreResult<Vec<KeychainEntry>> {
            Ok(self.entries.clone())
        }

        fn snapshot_records(&self) -> StoreResult<Vec<String>> {
            self.snapshots.clone()
        }
    }

    #[test]
    fn team_prefix_is_stripped_for_matching() {
        assert_eq!(
            KeychainTraceCollector::<SystemSecureStore>::strip_team_prefix(
                "ABCDE12345.com.gone.app"
            ),
            "com.gone.app"
        );
        // Plain bundle ids pass through.
        assert_eq!(
            KeychainTraceCollector::<SystemSecureStore>::strip_team_prefix("com.gone.app"),
            "com.gone.app"
        );
    }

    #[test]
    fn contributes_no_installed_identities() {
        let collector = KeychainTraceCollector::with_provider(FixtureStore {
            entries: vec![],
            snapshots: Ok(vec![]),
        });
        assert!(collector
            .enumerate_installed(&ScanSignal::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn snapshot_store_failure_degrades_to_skip() {
        let collector = KeychainTraceCollector::with_provider(FixtureStore {
            entries: vec![KeychainEntry {
                access_group: "ABCDE12345.com.gone.app".into(),
            }],
            snapshots: Err(StoreError::Unavailable("no snapshot store".into())),
        });
        let batch = collector.enumerate_candidates(&ScanSignal::new()).unwrap();
        assert_eq!(batch.candidates.len(), 1);
        assert_eq!(batch.candidates[0].observed_name, "com.gone.app");
        assert_eq!(batch.skips.len(), 1);
    }
}
