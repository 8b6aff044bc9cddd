// remnant-common/src/model/report.rs
use serde::{Deserialize, Serialize};

use super::artifact::{ArtifactCandidate, EvidenceSource};
use super::identity::InstalledIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Owned,
    Orphaned,
    Ambiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrength {
    None,
    PatternMatch,
    AliasMatch,
    Exact,
}

/// The ownership matcher's verdict for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub verdict: Verdict,
    /// Present iff the verdict is Owned, or Orphaned with the gone identity
    /// confirmed by name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_key: Option<String>,
    pub strength: MatchStrength,
}

impl MatchResult {
    pub fn owned(key: impl Into<String>, strength: MatchStrength) -> Self {
        Self {
            verdict: Verdict::Owned,
            matched_key: Some(key.into()),
            strength,
        }
    }

    pub fn orphaned(key: Option<String>, strength: MatchStrength) -> Self {
        Self {
            verdict: Verdict::Orphaned,
            matched_key: key,
            strength,
        }
    }

    pub fn ambiguous() -> Self {
        Self {
            verdict: Verdict::Ambiguous,
            matched_key: None,
            strength: MatchStrength::None,
        }
    }
}

/// Certainty tier of a finding. Ordered so a higher tier always compares
/// greater; the aggregator relies on that for its supersede rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    LowConfidence,
    Heuristic,
    Orphan,
    Confirmed,
}

impl ConfidenceTier {
    /// One step up, capped at Confirmed. Used for corroboration upgrades.
    pub fn upgraded(self) -> Self {
        match self {
            ConfidenceTier::LowConfidence => ConfidenceTier::Heuristic,
            ConfidenceTier::Heuristic => ConfidenceTier::Orphan,
            ConfidenceTier::Orphan | ConfidenceTier::Confirmed => ConfidenceTier::Confirmed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::Confirmed => "confirmed",
            ConfidenceTier::Orphan => "orphan",
            ConfidenceTier::Heuristic => "heuristic",
            ConfidenceTier::LowConfidence => "low-confidence",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    SafeDelete,
    ReviewThenDelete,
    ManualReviewOnly,
    Ignore,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::SafeDelete => "safe-delete",
            RecommendedAction::ReviewThenDelete => "review-then-delete",
            RecommendedAction::ManualReviewOnly => "manual-review",
            RecommendedAction::Ignore => "ignore",
        }
    }
}

/// Final record exposed by the engine, one per candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedArtifact {
    pub candidate: ArtifactCandidate,
    pub match_result: MatchResult,
    pub tier: ConfidenceTier,
    pub action: RecommendedAction,
    /// Full identity record when the matcher could attach one and the
    /// identity is (or was) known to a structural store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_identity: Option<InstalledIdentity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Unavailable,
    Corrupt,
    TimedOut,
    Cancelled,
}

/// One evidence store the scan could not (fully) read. Recoverable by
/// definition; the report carries these so degraded coverage is visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSkip {
    pub source: EvidenceSource,
    pub store: String,
    pub reason: SkipReason,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    pub stores_scanned: usize,
    pub stores_skipped: Vec<StoreSkip>,
    pub candidate_count: usize,
    pub orphan_count: usize,
    pub ambiguous_count: usize,
    pub total_reclaimable_bytes: u64,
}

/// The engine's sole output: classified artifacts in presentation order
/// plus the coverage summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub artifacts: Vec<ClassifiedArtifact>,
    pub summary: ScanSummary,
}

/// Render a byte count the way humans read it (recovered from the
/// original tool's report output).
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering_matches_certainty() {
        assert!(ConfidenceTier::Confirmed > ConfidenceTier::Orphan);
        assert!(ConfidenceTier::Orphan > ConfidenceTier::Heuristic);
        assert!(ConfidenceTier::Heuristic > ConfidenceTier::LowConfidence);
    }

    #[test]
    fn upgrade_caps_at_confirmed() {
        assert_eq!(ConfidenceTier::Orphan.upgraded(), ConfidenceTier::Confirmed);
        assert_eq!(
            ConfidenceTier::Confirmed.upgraded(),
            ConfidenceTier::Confirmed
        );
    }

    #[test]
    fn human_size_rounds_sensibly() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
    }
}
