// remnant-core/src/classify.rs
//
// Confidence classifier: a pure function from (match strength, evidence
// source weight, corroborating signals) to a confidence tier and a
// recommended action. No accumulated state, so classification cannot
// depend on candidate order.
use std::collections::{HashMap, HashSet};

use remnant_common::model::{
    ArtifactCandidate, ClassifiedArtifact, ConfidenceTier, EvidenceSource, MatchResult,
    MatchStrength, RecommendedAction, SourceWeight, Verdict,
};
use tracing::debug;

use crate::matcher::IdentityIndex;

/// Which distinct evidence sources reported a non-owned match for each
/// canonical key. Two or more independent sources agreeing on the same
/// key corroborate each other and upgrade the tier one step.
#[derive(Debug, Default)]
pub struct CorroborationIndex {
    sources_by_key: HashMap<String, HashSet<EvidenceSource>>,
}

impl CorroborationIndex {
    pub fn build<'a>(
        matched: impl IntoIterator<Item = (&'a ArtifactCandidate, &'a MatchResult)>,
    ) -> Self {
        let mut sources_by_key: HashMap<String, HashSet<EvidenceSource>> = HashMap::new();
        for (candidate, result) in matched {
            if result.verdict == Verdict::Owned {
                continue;
            }
            if let Some(key) = &result.matched_key {
                sources_by_key
                    .entry(key.clone())
                    .or_default()
                    .insert(candidate.source);
            }
        }
        debug!(
            "Corroboration index covers {} canonical keys",
            sources_by_key.len()
        );
        Self { sources_by_key }
    }

    pub fn is_corroborated(&self, key: &str) -> bool {
        self.sources_by_key
            .get(key)
            .map(|sources| sources.len() >= 2)
            .unwrap_or(false)
    }
}

fn action_for(tier: ConfidenceTier) -> RecommendedAction {
    match tier {
        ConfidenceTier::Confirmed => RecommendedAction::SafeDelete,
        ConfidenceTier::Orphan => RecommendedAction::ReviewThenDelete,
        ConfidenceTier::Heuristic | ConfidenceTier::LowConfidence => {
            RecommendedAction::ManualReviewOnly
        }
    }
}

/// Classify one matched candidate.
pub fn classify(
    candidate: ArtifactCandidate,
    match_result: MatchResult,
    index: &IdentityIndex,
    corroboration: &CorroborationIndex,
) -> ClassifiedArtifact {
    // An owned path is never deletable, full stop.
    if match_result.verdict == Verdict::Owned {
        let matched_identity = match_result
            .matched_key
            .as_deref()
            .and_then(|key| index.installed(key))
            .map(|id| id.as_ref().clone());
        return ClassifiedArtifact {
            candidate,
            match_result,
            tier: ConfidenceTier::Confirmed,
            action: RecommendedAction::Ignore,
            matched_identity,
        };
    }

    // Hard safety override: anything under a directory still claimed by
    // more than one installed identity can never be SafeDelete, whatever
    // the evidence says.
    let shared = candidate
        .location
        .as_path()
        .map(|p| index.is_shared_location(p))
        .unwrap_or(false);
    if shared {
        return ClassifiedArtifact {
            candidate,
            match_result,
            tier: ConfidenceTier::LowConfidence,
            action: RecommendedAction::ManualReviewOnly,
            matched_identity: None,
        };
    }

    let base = match (match_result.verdict, match_result.strength) {
        (Verdict::Ambiguous, _) => ConfidenceTier::LowConfidence,
        (_, MatchStrength::Exact) => match candidate.source.weight() {
            SourceWeight::Structural => ConfidenceTier::Confirmed,
            SourceWeight::Correlational => ConfidenceTier::Orphan,
        },
        (_, MatchStrength::AliasMatch) => ConfidenceTier::Orphan,
        (_, MatchStrength::PatternMatch) => ConfidenceTier::Heuristic,
        (_, MatchStrength::None) => ConfidenceTier::LowConfidence,
    };

    let tier = match &match_result.matched_key {
        Some(key) if corroboration.is_corroborated(key) => base.upgraded(),
        _ => base,
    };

    ClassifiedArtifact {
        candidate,
        match_result,
        tier,
        action: action_for(tier),
        matched_identity: None,
    }
}
