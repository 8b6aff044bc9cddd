// remnant-common/src/model/mod.rs
pub mod artifact;
pub mod identity;
pub mod report;

pub use artifact::{ArtifactCandidate, ArtifactKind, EvidenceSource, Location, SourceWeight};
pub use identity::{InstalledIdentity, PlatformFamily};
pub use report::{
    human_size, ClassifiedArtifact, ConfidenceTier, MatchResult, MatchStrength, RecommendedAction,
    ScanReport, ScanSummary, SkipReason, StoreSkip, Verdict,
};
