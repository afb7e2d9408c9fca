//! Core library for perceval: answer grading, pass@k and perception scoring
//! of sampled model generations.
//!
//! - [`config`]: Configuration loading and validation
//! - [`datasets`]: Metadata and sample loaders
//! - [`extract`] / [`math`] / [`grader`]: Final-answer extraction and grading
//! - [`judge`] / [`perception`]: Semantic judge and perception scoring
//! - [`passk`] / [`metrics`]: Pass@k estimation and score aggregation
//! - [`pipeline`]: Per-run evaluation entry point
//! - [`events`]: Event stream for progress reporting
//! - [`error`]: Unified error types
//!
//! # Architecture
//!
//! The pipeline checks whether a run's artifact already exists, loads ground
//! truth and samples, and fans one grading job and one perception job per
//! problem out to a worker pool. Results are joined by problem id, persisted
//! atomically, and aggregated into micro and macro scores.

// Foundation modules
pub mod error;
pub mod types;

// Core modules
pub mod config;
pub mod events;
pub mod retry;

// Data loading
pub mod datasets;

// Grading
pub mod extract;
pub mod grader;
pub mod judge;
pub mod math;
pub mod passk;
pub mod perception;

// Execution
pub mod metrics;
pub mod persistence;
pub mod pipeline;
pub mod reporter;
pub mod worker;

pub use config::{load_config, load_config_with_overrides, ConfigOverrides, EvalConfig};
pub use error::{PercevalError, Result};
pub use metrics::{aggregate_scores, AggregateScores};
pub use pipeline::{EvalPipeline, RunOutcome, RunReport};
