// remnant-core/src/report.rs
//
// Report aggregation: collapse duplicate findings for the same location,
// group the survivors by the identity they trace back to, and order
// everything so the biggest reclaimable space surfaces first.
use std::collections::HashMap;

use remnant_common::model::{
    ClassifiedArtifact, ConfidenceTier, RecommendedAction, ScanReport, ScanSummary, StoreSkip,
    Verdict,
};
use tracing::debug;

#[derive(Debug, Default)]
pub struct ReportAggregator {
    by_location: HashMap<String, ClassifiedArtifact>,
    skips: Vec<StoreSkip>,
    stores_scanned: usize,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_store_scanned(&mut self) {
        self.stores_scanned += 1;
    }

    pub fn record_skip(&mut self, skip: StoreSkip) {
        self.skips.push(skip);
    }

    pub fn record_skips(&mut self, skips: impl IntoIterator<Item = StoreSkip>) {
        self.skips.extend(skips);
    }

    /// Fold one classified artifact in. Two collectors can report the same
    /// location (a keychain group and a data directory named alike, or an
    /// execution trace and its target); the report must list it once, under
    /// the verdict that is safest to trust:
    ///
    /// - an Owned finding always supersedes a non-owned one, so nothing a
    ///   live installation still uses is ever presented as deletable
    /// - otherwise the higher confidence tier wins
    pub fn add(&mut self, artifact: ClassifiedArtifact) {
        let key = artifact.candidate.location.dedup_key();
        match self.by_location.get_mut(&key) {
            None => {
                self.by_location.insert(key, artifact);
            }
            Some(existing) => {
                let existing_owned = existing.match_result.verdict == Verdict::Owned;
                let incoming_owned = artifact.match_result.verdict == Verdict::Owned;
                let replace = if existing_owned != incoming_owned {
                    incoming_owned
                } else {
                    artifact.tier > existing.tier
                };
                if replace {
                    debug!(
                        "Duplicate finding for {key}: keeping {} over {}",
                        artifact.tier.as_str(),
                        existing.tier.as_str()
                    );
                    *existing = artifact;
                }
            }
        }
    }

    /// Consume the aggregator and produce the final report. Artifacts are
    /// grouped by matched identity key, groups ordered by their total size
    /// descending (unattributed findings last), members likewise by size.
    pub fn finish(self) -> ScanReport {
        let mut groups: HashMap<Option<String>, Vec<ClassifiedArtifact>> = HashMap::new();
        for artifact in self.by_location.into_values() {
            groups
                .entry(artifact.match_result.matched_key.clone())
                .or_default()
                .push(artifact);
        }

        let mut ordered: Vec<(Option<String>, u64, Vec<ClassifiedArtifact>)> = groups
            .into_iter()
            .map(|(key, mut members)| {
                members.sort_by(|a, b| {
                    b.candidate
                        .size_bytes
                        .cmp(&a.candidate.size_bytes)
                        .then_with(|| {
                            a.candidate
                                .location
                                .dedup_key()
                                .cmp(&b.candidate.location.dedup_key())
                        })
                });
                let total: u64 = members
                    .iter()
                    .filter_map(|m| m.candidate.size_bytes)
                    .sum();
                (key, total, members)
            })
            .collect();
        ordered.sort_by(|a, b| {
            // Attributed groups before the unattributed remainder, then by
            // total size, then by key for a stable order.
            let rank = |k: &Option<String>| usize::from(k.is_none());
            rank(&a.0)
                .cmp(&rank(&b.0))
                .then(b.1.cmp(&a.1))
                .then_with(|| a.0.cmp(&b.0))
        });

        let artifacts: Vec<ClassifiedArtifact> = ordered
            .into_iter()
            .flat_map(|(_, _, members)| members)
            .collect();

        let mut summary = ScanSummary {
            stores_scanned: self.stores_scanned,
            stores_skipped: self.skips,
            candidate_count: artifacts.len(),
            ..ScanSummary::default()
        };
        for artifact in &artifacts {
            match artifact.tier {
                ConfidenceTier::Confirmed | ConfidenceTier::Orphan
                    if artifact.action != RecommendedAction::Ignore =>
                {
                    summary.orphan_count += 1;
                }
                _ => {}
            }
            // Counts undecidable ownership, not every low-tier artifact;
            // a shared-directory downgrade keeps its Orphaned verdict.
            if artifact.match_result.verdict == Verdict::Ambiguous {
                summary.ambiguous_count += 1;
            }
            if artifact.action != RecommendedAction::Ignore {
                summary.total_reclaimable_bytes += artifact.candidate.size_bytes.unwrap_or(0);
            }
        }

        ScanReport { artifacts, summary }
    }
}

#[cfg(test)]
mod tests {
    use remnant_common::model::{
        ArtifactCandidate, ArtifactKind, EvidenceSource, Location, MatchResult, MatchStrength,
    };

    use super::*;

    fn classified(
        path: &str,
        name: &str,
        source: EvidenceSource,
        result: MatchResult,
        tier: ConfidenceTier,
        action: RecommendedAction,
        size: u64,
    ) -> ClassifiedArtifact {
        ClassifiedArtifact {
            candidate: ArtifactCandidate::new(
                Location::Directory { path: path.into() },
                ArtifactKind::ConfigDirectory,
                name,
                source,
            )
            .with_size(size),
            match_result: result,
            tier,
            action,
            matched_identity: None,
        }
    }

    #[test]
    fn duplicate_locations_collapse_to_one() {
        let mut agg = ReportAggregator::new();
        agg.add(classified(
            "/data/app",
            "app",
            EvidenceSource::BundleDataScan,
            MatchResult::orphaned(Some("app".into()), MatchStrength::Exact),
            ConfidenceTier::Orphan,
            RecommendedAction::ReviewThenDelete,
            100,
        ));
        agg.add(classified(
            "/data/app",
            "app",
            EvidenceSource::ExecutionTrace,
            MatchResult::orphaned(None, MatchStrength::PatternMatch),
            ConfidenceTier::Heuristic,
            RecommendedAction::ManualReviewOnly,
            100,
        ));
        let report = agg.finish();
        assert_eq!(report.artifacts.len(), 1);
        // Higher tier wins.
        assert_eq!(report.artifacts[0].tier, ConfidenceTier::Orphan);
    }

    #[test]
    fn owned_supersedes_higher_tier_orphan() {
        let mut agg = ReportAggregator::new();
        agg.add(classified(
            "/data/app",
            "app",
            EvidenceSource::PackageDatabase,
            MatchResult::orphaned(Some("app".into()), MatchStrength::Exact),
            ConfidenceTier::Confirmed,
            RecommendedAction::SafeDelete,
            100,
        ));
        agg.add(classified(
            "/data/app",
            "app",
            EvidenceSource::BundleDataScan,
            MatchResult::owned("app", MatchStrength::Exact),
            ConfidenceTier::Confirmed,
            RecommendedAction::Ignore,
            100,
        ));
        let report = agg.finish();
        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(report.artifacts[0].action, RecommendedAction::Ignore);
        // Ignored findings never count toward reclaimable space.
        assert_eq!(report.summary.total_reclaimable_bytes, 0);
    }

    #[test]
    fn groups_order_by_total_size_desc() {
        let mut agg = ReportAggregator::new();
        agg.add(classified(
            "/a/one",
            "small",
            EvidenceSource::BundleDataScan,
            MatchResult::orphaned(Some("small".into()), MatchStrength::Exact),
            ConfidenceTier::Orphan,
            RecommendedAction::ReviewThenDelete,
            10,
        ));
        agg.add(classified(
            "/b/one",
            "big",
            EvidenceSource::BundleDataScan,
            MatchResult::orphaned(Some("big".into()), MatchStrength::Exact),
            ConfidenceTier::Orphan,
            RecommendedAction::ReviewThenDelete,
            500,
        ));
        agg.add(classified(
            "/b/two",
            "big",
            EvidenceSource::BundleDataScan,
            MatchResult::orphaned(Some("big".into()), MatchStrength::Exact),
            ConfidenceTier::Orphan,
            RecommendedAction::ReviewThenDelete,
            200,
        ));
        agg.add(classified(
            "/stray",
            "stray",
            EvidenceSource::FilesystemSubtraction,
            MatchResult::orphaned(None, MatchStrength::PatternMatch),
            ConfidenceTier::Heuristic,
            RecommendedAction::ManualReviewOnly,
            9999,
        ));
        let report = agg.finish();
        let names: Vec<&str> = report
            .artifacts
            .iter()
            .map(|a| a.candidate.observed_name.as_str())
            .collect();
        // "big" group (700 total) first, inside it the 500 B member first,
        // then "small", unattributed stray last despite its size.
        assert_eq!(names, vec!["big", "big", "small", "stray"]);
        assert_eq!(report.summary.candidate_count, 4);
        assert_eq!(report.summary.orphan_count, 3);
        assert_eq!(report.summary.total_reclaimable_bytes, 10 + 500 + 200 + 9999);
    }

    #[test]
    fn ambiguous_count_tracks_verdicts_not_tiers() {
        let mut agg = ReportAggregator::new();
        // Shared-directory downgrade: low tier, but ownership was decided.
        agg.add(classified(
            "/shared/common",
            "common",
            EvidenceSource::BundleDataScan,
            MatchResult::orphaned(Some("common".into()), MatchStrength::Exact),
            ConfidenceTier::LowConfidence,
            RecommendedAction::ManualReviewOnly,
            10,
        ));
        agg.add(classified(
            "/stray/unknown",
            "unknown",
            EvidenceSource::BundleDataScan,
            MatchResult::ambiguous(),
            ConfidenceTier::LowConfidence,
            RecommendedAction::ManualReviewOnly,
            10,
        ));
        let report = agg.finish();
        assert_eq!(report.summary.ambiguous_count, 1);
    }

    #[test]
    fn skips_survive_into_summary() {
        let mut agg = ReportAggregator::new();
        agg.record_store_scanned();
        agg.record_skip(StoreSkip {
            source: EvidenceSource::PackageReceipts,
            store: "pkgutil".into(),
            reason: remnant_common::model::SkipReason::Unavailable,
            detail: "pkgutil not found".into(),
        });
        let report = agg.finish();
        assert_eq!(report.summary.stores_scanned, 1);
        assert_eq!(report.summary.stores_skipped.len(), 1);
        assert_eq!(report.summary.candidate_count, 0);
    }
}
