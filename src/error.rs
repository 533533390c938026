//! Crate-level error type.
//!
//! Only `NoDataset`, `GenerationTransport` and `RateLimited` normally reach a
//! caller. `Execution` is folded into a reported message by the agent loop and
//! `Retrieval` never leaves the knowledge module.

use std::time::Duration;

/// Every failure the analysis pipeline can report.
#[derive(Debug, thiserror::Error)]
pub enum AnalystError {
    /// An operation needed tabular data but none has been uploaded.
    #[error("Dataset not loaded")]
    NoDataset,

    /// The dataset has none of the recognised failure label columns.
    #[error("No target column found")]
    NoTargetColumn,

    /// Generated analysis code failed or produced no result.
    #[error("{0}")]
    Execution(String),

    /// The text-generation backend could not be reached or answered badly.
    #[error("generation backend error: {0}")]
    GenerationTransport(String),

    /// A knowledge lookup failed. Absorbed inside the resolver chain.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// A chat request arrived inside the cooldown window.
    #[error("Rate limit exceeded. Please wait {} seconds.", .retry_after.as_millis().div_ceil(1000).max(1))]
    RateLimited { retry_after: Duration },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for AnalystError {
    fn from(e: reqwest::Error) -> Self {
        AnalystError::GenerationTransport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnalystError>;
