use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacktransError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backup storage error: {0}")]
    Storage(String),

    #[error("Pipeline aborted: {0}")]
    Pipeline(String),

    #[error("cancelled before row {row}")]
    Cancelled { row: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Language error: {0}")]
    Language(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// A run that failed after its backup session was opened
    #[error("{source}")]
    Aborted {
        session_dir: PathBuf,
        source: Box<BacktransError>,
    },
}

impl BacktransError {
    /// Errors that leave partial results in the backup store
    pub fn leaves_partial_backup(&self) -> bool {
        matches!(self, Self::Aborted { .. } | Self::Pipeline(_) | Self::Cancelled { .. })
    }

    /// Session directory holding the partial results of an aborted run
    pub fn session_dir(&self) -> Option<&Path> {
        match self {
            Self::Aborted { session_dir, .. } => Some(session_dir),
            _ => None,
        }
    }

    /// The underlying failure, looking through `Aborted`
    pub fn root_cause(&self) -> &BacktransError {
        match self {
            Self::Aborted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, BacktransError>;
