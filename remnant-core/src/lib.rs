// remnant-core/src/lib.rs

// Declare the top-level modules within the library crate
pub mod classify;
pub mod collect;
pub mod matcher;
pub mod report;
pub mod scan;

// Re-export key types for easier use by the CLI crate
pub use collect::{CandidateBatch, Collector, ScanSignal, StoreError, StoreResult};
pub use matcher::IdentityIndex;
pub use report::ReportAggregator;
pub use scan::ScanEngine;
