//! Group analysis.
//!
//! Member scoring, fan-out, aggregation and caching of index and industry
//! summaries.

pub mod aggregator;
pub mod cache;
pub mod engine;
pub mod scorer;

pub use engine::{AggregationEngine, EngineConfig};
pub use scorer::{EntityAnalyzer, HistoryScorer};
