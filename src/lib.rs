//! Backtrans - Batch Translation with Back-Translation Scoring
//!
//! Translates a CSV column through one provider, back-translates the result
//! through a second one, scores the round trip and keeps a crash-resilient
//! backup of every row along the way.

pub mod cli;
pub mod config;
pub mod dataset;
pub mod languages;
pub mod backup;
pub mod providers;
pub mod pipeline;
pub mod workflow;
pub mod evaluation;
pub mod error;
