use std::path::PathBuf;

use thiserror::Error;

/// Every failure the pipeline can report.
///
/// `NotFound` is fatal for a session. `Schema` and `Validation` are local to the
/// operation that detected them; dashboard sections turn them into a
/// "cannot render" state without touching sibling sections. `EmptyGroup` is
/// the "no data" signal of a `MEAN` over nothing.
#[derive(Error, Debug)]
pub enum PanelError {
    #[error("data source not found or unreadable: {path}")]
    NotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("no values to reduce for group {0}")]
    EmptyGroup(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PanelError {
    pub fn schema(msg: impl Into<String>) -> Self {
        PanelError::Schema(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        PanelError::Validation(msg.into())
    }

    pub fn not_found(path: impl Into<PathBuf>, source: Option<std::io::Error>) -> Self {
        PanelError::NotFound {
            path: path.into(),
            source,
        }
    }

    /// Whether this error should short-circuit one chart section only.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            PanelError::Schema(_) | PanelError::Validation(_) | PanelError::EmptyGroup(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PanelError>;
