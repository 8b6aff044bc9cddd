// remnant-core/src/scan.rs
//
// Scan orchestrator. Collectors are blocking (shell-outs, directory
// walks), so each enumeration runs on the blocking pool; the engine
// joins all installed-identity futures before any candidate is matched,
// then fans out candidate enumeration the same way. Store failures and
// timeouts degrade coverage, never the scan.
use std::sync::Arc;

use futures::future::join_all;
use remnant_common::alias::AliasDb;
use remnant_common::config::{CollectorId, ScanConfig};
use remnant_common::model::{ArtifactCandidate, InstalledIdentity, MatchResult, ScanReport};
use remnant_common::{RemnantError, Result};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::classify::{classify, CorroborationIndex};
use crate::collect::{
    BundleCollector, CandidateBatch, Collector, KeychainTraceCollector, MobileCollector,
    PackageDbCollector, ScanSignal, StoreError, WindowsCollector,
};
use crate::matcher::IdentityIndex;
use crate::report::ReportAggregator;

pub struct ScanEngine {
    config: ScanConfig,
    alias: Arc<AliasDb>,
    collectors: Vec<Arc<dyn Collector>>,
}

impl ScanEngine {
    /// Build an engine from validated configuration, with the concrete
    /// OS-backed collector for each enabled family.
    pub fn new(config: ScanConfig) -> Result<Self> {
        config.validate()?;
        let alias = match &config.alias_db {
            Some(path) => Arc::new(AliasDb::load(path)?),
            None => Arc::new(AliasDb::embedded()),
        };
        let collectors = config
            .enabled_collectors()
            .into_iter()
            .map(|id| -> Arc<dyn Collector> {
                match id {
                    CollectorId::Windows => Arc::new(WindowsCollector::new()),
                    CollectorId::Bundle => {
                        Arc::new(BundleCollector::new(config.clone(), Arc::clone(&alias)))
                    }
                    CollectorId::PackageDb => {
                        Arc::new(PackageDbCollector::new(config.clone(), Arc::clone(&alias)))
                    }
                    CollectorId::Mobile => {
                        Arc::new(MobileCollector::new(config.clone(), Arc::clone(&alias)))
                    }
                    CollectorId::Keytrace => Arc::new(KeychainTraceCollector::new()),
                }
            })
            .collect();
        Ok(Self {
            config,
            alias,
            collectors,
        })
    }

    /// Engine over caller-supplied collectors and alias data. Fixture
    /// collectors in tests go through here.
    pub fn with_collectors(
        config: ScanConfig,
        alias: Arc<AliasDb>,
        collectors: Vec<Arc<dyn Collector>>,
    ) -> Self {
        Self {
            config,
            alias,
            collectors,
        }
    }

    /// Run one full scan. Two phases with a hard barrier between them:
    /// every collector's installed and historical enumeration completes
    /// (or is skipped) before any candidate is matched, so no candidate
    /// is ever classified against a partial identity set.
    pub async fn run(&self, signal: ScanSignal) -> Result<ScanReport> {
        if self.collectors.is_empty() {
            return Err(RemnantError::Scan("no collectors enabled".into()));
        }
        info!(
            "Scanning with {} collectors, {}s per-store timeout",
            self.collectors.len(),
            self.config.store_timeout_secs
        );
        let mut aggregator = ReportAggregator::new();

        // Phase 1: identity feeds. Installed and historical are independent
        // sub-stores; a failure in one must not discard the other, or
        // still-installed software turns into false orphans.
        type IdentityFeed = (
            crate::collect::StoreResult<Vec<InstalledIdentity>>,
            crate::collect::StoreResult<Vec<String>>,
        );
        let handles: Vec<JoinHandle<(usize, IdentityFeed)>> = self
            .collectors
            .iter()
            .enumerate()
            .map(|(i, collector)| {
                let collector = Arc::clone(collector);
                let store_signal = signal.with_deadline(self.config.store_timeout());
                tokio::task::spawn_blocking(move || {
                    let installed = collector.enumerate_installed(&store_signal);
                    let gone = collector.enumerate_historical(&store_signal);
                    (i, (installed, gone))
                })
            })
            .collect();

        let mut identities = Vec::new();
        let mut historical = Vec::new();
        for joined in join_all(handles).await {
            match joined {
                Ok((i, (installed, gone))) => {
                    let collector = &self.collectors[i];
                    match installed {
                        Ok(installed) => {
                            debug!(
                                "Collector {} reported {} installed",
                                collector.id(),
                                installed.len()
                            );
                            identities.extend(installed);
                        }
                        Err(err) => {
                            err.log(collector.source(), collector.id().as_str());
                            aggregator.record_skip(
                                err.into_skip(collector.source(), collector.id().as_str()),
                            );
                        }
                    }
                    match gone {
                        Ok(gone) => {
                            debug!(
                                "Collector {} reported {} historical",
                                collector.id(),
                                gone.len()
                            );
                            historical.extend(gone);
                        }
                        Err(err) => {
                            let store = format!("{}:history", collector.id().as_str());
                            err.log(collector.source(), &store);
                            aggregator.record_skip(err.into_skip(collector.source(), &store));
                        }
                    }
                }
                Err(join_err) => {
                    error!("Identity enumeration task failed: {join_err}");
                    aggregator.record_skip(
                        StoreError::Corrupt(join_err.to_string())
                            .into_skip(self.collectors[0].source(), "identity-feed"),
                    );
                }
            }
        }

        // Merge barrier: the index exists only once phase 1 is fully done.
        let index = IdentityIndex::build(identities, historical, Arc::clone(&self.alias));

        // Phase 2: candidate enumeration against the frozen index.
        let handles: Vec<JoinHandle<(usize, crate::collect::StoreResult<CandidateBatch>)>> = self
            .collectors
            .iter()
            .enumerate()
            .map(|(i, collector)| {
                let collector = Arc::clone(collector);
                let store_signal = signal.with_deadline(self.config.store_timeout());
                tokio::task::spawn_blocking(move || (i, collector.enumerate_candidates(&store_signal)))
            })
            .collect();

        let mut candidates: Vec<ArtifactCandidate> = Vec::new();
        for joined in join_all(handles).await {
            match joined {
                Ok((i, Ok(batch))) => {
                    debug!(
                        "Collector {} produced {} candidates, {} sub-store skips",
                        self.collectors[i].id(),
                        batch.candidates.len(),
                        batch.skips.len()
                    );
                    aggregator.record_store_scanned();
                    aggregator.record_skips(batch.skips);
                    candidates.extend(batch.candidates);
                }
                Ok((i, Err(err))) => {
                    let collector = &self.collectors[i];
                    err.log(collector.source(), collector.id().as_str());
                    aggregator
                        .record_skip(err.into_skip(collector.source(), collector.id().as_str()));
                }
                Err(join_err) => {
                    error!("Candidate enumeration task failed: {join_err}");
                    aggregator.record_skip(
                        StoreError::Corrupt(join_err.to_string())
                            .into_skip(self.collectors[0].source(), "candidate-feed"),
                    );
                }
            }
        }

        // Match, corroborate, classify, aggregate.
        let matched: Vec<(ArtifactCandidate, MatchResult)> = candidates
            .into_iter()
            .map(|c| {
                let result = index.match_candidate(&c);
                (c, result)
            })
            .collect();
        let corroboration = CorroborationIndex::build(matched.iter().map(|(c, m)| (c, m)));
        for (candidate, result) in matched {
            aggregator.add(classify(candidate, result, &index, &corroboration));
        }

        let report = aggregator.finish();
        info!(
            "Scan complete: {} findings, {} stores scanned, {} skipped",
            report.summary.candidate_count,
            report.summary.stores_scanned,
            report.summary.stores_skipped.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_collector_set_is_rejected() {
        let engine = ScanEngine::with_collectors(
            ScanConfig::default(),
            Arc::new(AliasDb::embedded()),
            Vec::new(),
        );
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let result = rt.block_on(engine.run(ScanSignal::new()));
        assert!(matches!(result, Err(RemnantError::Scan(_))));
    }

    #[test]
    fn default_config_builds_all_collectors() {
        let engine = ScanEngine::new(ScanConfig::default()).unwrap();
        assert_eq!(engine.collectors.len(), CollectorId::ALL.len());
    }
}
