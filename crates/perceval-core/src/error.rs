//! Unified error types for perceval.

use crate::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PercevalError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Vectors or sample sequences that must be index-aligned are not.
    /// Never recovered: the run aborts and nothing is persisted.
    #[error("data integrity violation for problem {problem_id}: {message}")]
    Integrity { problem_id: String, message: String },

    #[error("judge error: {0}")]
    Judge(String),

    #[error("missing input: {0}")]
    MissingInput(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PercevalError {
    pub fn integrity(problem_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Integrity {
            problem_id: problem_id.into(),
            message: message.into(),
        }
    }

    pub fn judge(message: impl Into<String>) -> Self {
        Self::Judge(message.into())
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}

pub type Result<T> = std::result::Result<T, PercevalError>;
