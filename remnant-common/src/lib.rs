// remnant-common/src/lib.rs
pub mod alias;
pub mod config;
pub mod error;
pub mod model;

// Re-export key types
pub use alias::AliasDb;
pub use config::ScanConfig;
pub use error::{RemnantError, Result};
pub use model::{
    ArtifactCandidate, ClassifiedArtifact, InstalledIdentity, PlatformFamily, ScanReport,
};
