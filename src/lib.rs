//! Full-text extraction for feed articles behind paywalls and bot walls.
//!
//! A per-site [`rules::RuleStore`] decides how each site is approached; the
//! [`orchestrator::ExtractionOrchestrator`] walks the fallback chain from a
//! plain shaped fetch through structured-data extraction, readability,
//! archive snapshots and headless rendering.

pub mod config;
pub mod dom;
pub mod extractor;
pub mod fetcher;
pub mod jobs;
pub mod orchestrator;
pub mod purifier;
pub mod render;
pub mod rules;
