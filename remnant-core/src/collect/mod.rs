// remnant-core/src/collect/mod.rs
//
// Evidence collectors. Each platform family implements the two-method
// capability (installed enumeration + candidate enumeration) behind the
// `Collector` trait; the concrete OS query (registry read, package
// database, secure store) sits behind a per-collector provider trait so
// it stays a fallible capability, never a guaranteed-present API.
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use remnant_common::config::CollectorId;
use remnant_common::model::{
    ArtifactCandidate, EvidenceSource, InstalledIdentity, PlatformFamily, SkipReason, StoreSkip,
};
use thiserror::Error;
use tracing::{debug, warn};

pub mod bundle;
pub mod keytrace;
pub mod mobile;
pub mod pkgdb;
pub mod windows;

pub use bundle::BundleCollector;
pub use keytrace::KeychainTraceCollector;
pub use mobile::MobileCollector;
pub use pkgdb::PackageDbCollector;
pub use windows::WindowsCollector;

/// Non-fatal evidence-store failure. Both variants degrade coverage and
/// are reported as skips; neither ever aborts the scan.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn reason(&self) -> SkipReason {
        match self {
            StoreError::Unavailable(_) => SkipReason::Unavailable,
            StoreError::Corrupt(_) => SkipReason::Corrupt,
        }
    }

    /// Corrupt stores log at a higher severity than absent ones.
    pub fn log(&self, source: EvidenceSource, store: &str) {
        match self {
            StoreError::Unavailable(detail) => {
                debug!("Skipping {:?} store '{}': {}", source, store, detail)
            }
            StoreError::Corrupt(detail) => {
                warn!("Corrupt {:?} store '{}': {}", source, store, detail)
            }
        }
    }

    pub fn into_skip(self, source: EvidenceSource, store: &str) -> StoreSkip {
        StoreSkip {
            source,
            store: store.to_string(),
            reason: self.reason(),
            detail: self.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Shared cancellation flag plus an optional per-store deadline. Cloned
/// into every enumeration; loops check it and bail out cleanly with
/// whatever they already produced.
#[derive(Debug, Clone, Default)]
pub struct ScanSignal {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl ScanSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Same cancel flag, fresh deadline. The engine derives one of these
    /// per store run.
    pub fn with_deadline(&self, timeout: Duration) -> Self {
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Why enumeration should stop now, if it should.
    pub fn interruption(&self) -> Option<SkipReason> {
        if self.is_cancelled() {
            return Some(SkipReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(SkipReason::TimedOut),
            _ => None,
        }
    }
}

/// Candidates from one enumeration pass, plus any sub-stores that had to
/// be skipped along the way. Partial results under cancellation/timeout
/// are returned here with the interruption recorded as a skip.
#[derive(Debug, Default)]
pub struct CandidateBatch {
    pub candidates: Vec<ArtifactCandidate>,
    pub skips: Vec<StoreSkip>,
}

impl CandidateBatch {
    pub fn push(&mut self, candidate: ArtifactCandidate) {
        self.candidates.push(candidate);
    }

    pub fn skip(&mut self, source: EvidenceSource, store: &str, reason: SkipReason, detail: &str) {
        self.skips.push(StoreSkip {
            source,
            store: store.to_string(),
            reason,
            detail: detail.to_string(),
        });
    }

    /// Record an interruption of `store` and report whether one happened.
    pub fn interrupted(
        &mut self,
        signal: &ScanSignal,
        source: EvidenceSource,
        store: &str,
    ) -> bool {
        if let Some(reason) = signal.interruption() {
            debug!(
                "Enumeration of {:?} store '{}' stopped: {:?}",
                source, store, reason
            );
            self.skip(source, store, reason, "enumeration stopped early");
            true
        } else {
            false
        }
    }
}

/// One platform family's evidence collector. Implementations are
/// independent, run at most once per scan, and must not assume any
/// ordering relative to each other.
pub trait Collector: Send + Sync {
    fn id(&self) -> CollectorId;
    fn platform(&self) -> PlatformFamily;
    /// Primary evidence source tag, used when the whole store is skipped.
    fn source(&self) -> EvidenceSource;

    /// The installed-identity set this collector can see. Must complete
    /// before any candidate of any collector is classified.
    fn enumerate_installed(&self, signal: &ScanSignal) -> StoreResult<Vec<InstalledIdentity>>;

    /// Canonical keys known to have existed on this system in the past
    /// (receipt logs, removed-not-purged package records). Default: none.
    fn enumerate_historical(&self, _signal: &ScanSignal) -> StoreResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Raw artifact candidates. Finite, one pass, not restartable.
    fn enumerate_candidates(&self, signal: &ScanSignal) -> StoreResult<CandidateBatch>;
}

/// Total size of a directory tree, stopping early if the signal fires.
pub(crate) fn dir_size(path: &Path, signal: &ScanSignal) -> u64 {
    let mut total = 0u64;
    for entry in walkdir::WalkDir::new(path).into_iter().flatten() {
        if signal.interruption().is_some() {
            break;
        }
        if entry.file_type().is_file() {
            if let Ok(meta) = entry.metadata() {
                total += meta.len();
            }
        }
    }
    total
}

pub(crate) fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_cancel_propagates_to_clones() {
        let signal = ScanSignal::new();
        let clone = signal.with_deadline(Duration::from_secs(60));
        signal.cancel();
        assert_eq!(clone.interruption(), Some(SkipReason::Cancelled));
    }

    #[test]
    fn expired_deadline_reports_timeout() {
        let signal = ScanSignal::new().with_deadline(Duration::from_secs(0));
        assert_eq!(signal.interruption(), Some(SkipReason::TimedOut));
    }

    #[test]
    fn fresh_signal_is_quiet() {
        assert_eq!(ScanSignal::new().interruption(), None);
    }
}
