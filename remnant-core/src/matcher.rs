// remnant-core/src/matcher.rs
//
// Ownership matcher: merges every collector's installed-identity set into
// one canonical index (built only after all collectors finished their
// installed enumeration), then classifies each candidate with a fixed
// rule order. Exact structural evidence dominates fuzzy evidence; curated
// aliases rank below exact matches but above pure pattern matching, the
// noisiest signal.
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use remnant_common::alias::AliasDb;
use remnant_common::model::{
    ArtifactCandidate, InstalledIdentity, MatchResult, MatchStrength, PlatformFamily,
};
use tracing::debug;

#[derive(Debug)]
pub struct IdentityIndex {
    by_key: HashMap<String, Arc<InstalledIdentity>>,
    // identity-declared alias -> canonical key
    alias_keys: HashMap<(PlatformFamily, String), String>,
    install_paths: Vec<(PathBuf, String)>,
    historical: HashSet<String>,
    // paths claimed by two or more distinct still-installed identities
    shared_dirs: HashSet<PathBuf>,
    alias_db: Arc<AliasDb>,
}

impl IdentityIndex {
    /// Merge barrier product: every collector's installed set plus the
    /// union of historical keys, indexed once for the whole scan.
    pub fn build(
        identities: Vec<InstalledIdentity>,
        historical: Vec<String>,
        alias_db: Arc<AliasDb>,
    ) -> Self {
        let mut by_key: HashMap<String, Arc<InstalledIdentity>> = HashMap::new();
        let mut alias_keys = HashMap::new();
        let mut install_paths = Vec::new();
        let mut path_owners: HashMap<PathBuf, HashSet<String>> = HashMap::new();

        for identity in identities {
            let identity = Arc::new(identity);
            for alias in &identity.aliases {
                alias_keys.insert(
                    (identity.platform, alias.clone()),
                    identity.canonical_key.clone(),
                );
            }
            for path in &identity.install_paths {
                install_paths.push((path.clone(), identity.canonical_key.clone()));
                path_owners
                    .entry(path.clone())
                    .or_default()
                    .insert(identity.canonical_key.clone());
            }
            by_key.insert(identity.canonical_key.clone(), identity);
        }

        let shared_dirs = path_owners
            .into_iter()
            .filter(|(_, owners)| owners.len() > 1)
            .map(|(path, _)| path)
            .collect();

        let historical = historical.into_iter().map(|k| k.to_lowercase()).collect();

        let index = Self {
            by_key,
            alias_keys,
            install_paths,
            historical,
            shared_dirs,
            alias_db,
        };
        debug!(
            "Identity index: {} installed, {} historical, {} shared dirs",
            index.by_key.len(),
            index.historical.len(),
            index.shared_dirs.len()
        );
        index
    }

    pub fn installed(&self, key: &str) -> Option<&Arc<InstalledIdentity>> {
        self.by_key.get(key)
    }

    pub fn installed_count(&self) -> usize {
        self.by_key.len()
    }

    /// True when the path sits under a directory claimed by more than one
    /// still-installed identity. Such locations are never safe to delete.
    pub fn is_shared_location(&self, path: &Path) -> bool {
        self.shared_dirs.iter().any(|dir| path.starts_with(dir))
    }

    fn owner_of_path(&self, path: &Path) -> Option<&str> {
        self.install_paths
            .iter()
            .find(|(owned, _)| path.starts_with(owned))
            .map(|(_, key)| key.as_str())
    }

    /// Classify one candidate. Pure function of the index and the
    /// candidate: running it twice yields the same verdict. First match
    /// wins, in this order:
    ///
    /// 1. exact canonical-key equality against an installed identity
    /// 2. location containment under an installed identity's paths
    /// 3. exact match against a confirmed-gone (historical) key
    /// 4. curated-alias resolution
    /// 5. pattern fallback for subtraction-style sources
    /// 6. ambiguous
    pub fn match_candidate(&self, candidate: &ArtifactCandidate) -> MatchResult {
        let name = candidate.observed_name.as_str();
        let platform = candidate.source.platform();

        // 1. Exact key match against the current installed set.
        if self.by_key.contains_key(name) {
            return MatchResult::owned(name, MatchStrength::Exact);
        }

        // 2. Owned-path containment.
        if let Some(path) = candidate.location.as_path() {
            if let Some(key) = self.owner_of_path(path) {
                return MatchResult::owned(key, MatchStrength::Exact);
            }
        }

        // 3. Confirmed-gone exact match: the key existed (receipts log,
        // removed-not-purged record) and is absent from the installed set.
        if self.historical.contains(name) {
            return MatchResult::orphaned(Some(name.to_string()), MatchStrength::Exact);
        }

        // 4. Alias match: identity-declared aliases first, then the
        // curated table. Resolving to a still-installed key means owned;
        // a known key that is gone means orphaned.
        if let Some(key) = self.alias_keys.get(&(platform, name.to_string())) {
            return MatchResult::owned(key.clone(), MatchStrength::AliasMatch);
        }
        if let Some(key) = self.alias_db.resolve(name, platform) {
            return if self.by_key.contains_key(key) {
                MatchResult::owned(key, MatchStrength::AliasMatch)
            } else {
                MatchResult::orphaned(Some(key.to_string()), MatchStrength::AliasMatch)
            };
        }

        // 5. Set-subtraction pattern match: the candidate is residual by
        // construction but no identity attaches.
        if candidate.source.pattern_fallback() {
            return MatchResult::orphaned(None, MatchStrength::PatternMatch);
        }

        // 6. Cannot determine; surfaced for manual review, never guessed.
        MatchResult::ambiguous()
    }
}

#[cfg(test)]
mod tests {
    use remnant_common::model::{ArtifactKind, EvidenceSource, Location, Verdict};

    use super::*;

    fn index_with(
        identities: Vec<InstalledIdentity>,
        historical: Vec<String>,
    ) -> IdentityIndex {
        IdentityIndex::build(identities, historical, Arc::new(AliasDb::embedded()))
    }

    fn dir_candidate(path: &str, name: &str, source: EvidenceSource) -> ArtifactCandidate {
        ArtifactCandidate::new(
            Location::Directory { path: path.into() },
            ArtifactKind::ConfigDirectory,
            name,
            source,
        )
    }

    #[test]
    fn exact_key_match_is_owned() {
        let index = index_with(
            vec![InstalledIdentity::new("com.vendor.app", PlatformFamily::MacOs)],
            vec![],
        );
        let result = index.match_candidate(&dir_candidate(
            "/anywhere",
            "com.vendor.app",
            EvidenceSource::BundleDataScan,
        ));
        assert_eq!(result.verdict, Verdict::Owned);
        assert_eq!(result.strength, MatchStrength::Exact);
    }

    #[test]
    fn owned_path_containment() {
        // Scenario A: a cache under an installed identity's install path.
        let index = index_with(
            vec![InstalledIdentity::new("com.vendor.app", PlatformFamily::MacOs)
                .with_install_path("/Apps/Vendor/App")],
            vec![],
        );
        let result = index.match_candidate(&dir_candidate(
            "/Apps/Vendor/App/cache",
            "cache",
            EvidenceSource::BundleDataScan,
        ));
        assert_eq!(result.verdict, Verdict::Owned);
        assert_eq!(result.matched_key.as_deref(), Some("com.vendor.app"));
    }

    #[test]
    fn confirmed_gone_exact_match_is_orphaned() {
        let index = index_with(vec![], vec!["com.old.app".into()]);
        let result = index.match_candidate(&dir_candidate(
            "/data/com.old.app",
            "com.old.app",
            EvidenceSource::BundleDataScan,
        ));
        assert_eq!(result.verdict, Verdict::Orphaned);
        assert_eq!(result.strength, MatchStrength::Exact);
        assert_eq!(result.matched_key.as_deref(), Some("com.old.app"));
    }

    #[test]
    fn alias_match_against_empty_installed_set_is_orphaned() {
        // Scenario B: folder "Tencent" with the curated table mapping it
        // to com.tencent.mm, which is not installed.
        let index = index_with(vec![], vec![]);
        let result = index.match_candidate(&dir_candidate(
            "C:\\Users\\x\\Documents\\Tencent",
            "Tencent",
            EvidenceSource::SharedDllRegistry,
        ));
        assert_eq!(result.verdict, Verdict::Orphaned);
        assert_eq!(result.strength, MatchStrength::AliasMatch);
        assert_eq!(result.matched_key.as_deref(), Some("com.tencent.mm"));
    }

    #[test]
    fn alias_resolving_to_installed_key_is_owned() {
        let index = index_with(
            vec![InstalledIdentity::new("com.tencent.mm", PlatformFamily::Windows)],
            vec![],
        );
        let result = index.match_candidate(&dir_candidate(
            "C:\\Tencent",
            "Tencent",
            EvidenceSource::SharedDllRegistry,
        ));
        assert_eq!(result.verdict, Verdict::Owned);
        assert_eq!(result.strength, MatchStrength::AliasMatch);
    }

    #[test]
    fn alias_is_platform_scoped() {
        // "Tencent" is curated for windows/android, not linux; a linux
        // subtraction candidate falls through to pattern match.
        let index = index_with(vec![], vec![]);
        let result = index.match_candidate(&dir_candidate(
            "/opt/Tencent",
            "Tencent",
            EvidenceSource::FilesystemSubtraction,
        ));
        assert_eq!(result.verdict, Verdict::Orphaned);
        assert_eq!(result.strength, MatchStrength::PatternMatch);
        assert!(result.matched_key.is_none());
    }

    #[test]
    fn identity_feed_sources_stay_ambiguous_without_a_match() {
        let index = index_with(vec![], vec![]);
        let result = index.match_candidate(&dir_candidate(
            "/etc/unexplained",
            "unexplained",
            EvidenceSource::PackageDatabase,
        ));
        assert_eq!(result.verdict, Verdict::Ambiguous);
        assert_eq!(result.strength, MatchStrength::None);
    }

    #[test]
    fn matcher_is_idempotent() {
        let index = index_with(
            vec![InstalledIdentity::new("com.vendor.app", PlatformFamily::MacOs)
                .with_install_path("/Apps/Vendor/App")],
            vec!["com.old.app".into()],
        );
        let candidates = vec![
            dir_candidate("/Apps/Vendor/App/cache", "cache", EvidenceSource::BundleDataScan),
            dir_candidate("/data/com.old.app", "com.old.app", EvidenceSource::BundleDataScan),
            dir_candidate("/opt/random", "random", EvidenceSource::FilesystemSubtraction),
        ];
        let first: Vec<MatchResult> =
            candidates.iter().map(|c| index.match_candidate(c)).collect();
        let second: Vec<MatchResult> =
            candidates.iter().map(|c| index.match_candidate(c)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn shared_dirs_require_two_distinct_owners() {
        let index = index_with(
            vec![
                InstalledIdentity::new("com.a", PlatformFamily::Linux)
                    .with_install_path("/shared/libs"),
                InstalledIdentity::new("com.b", PlatformFamily::Linux)
                    .with_install_path("/shared/libs"),
                InstalledIdentity::new("com.c", PlatformFamily::Linux)
                    .with_install_path("/solo"),
            ],
            vec![],
        );
        assert!(index.is_shared_location(Path::new("/shared/libs/x.so")));
        assert!(!index.is_shared_location(Path::new("/solo/bin")));
    }
}
