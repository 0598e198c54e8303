use thiserror::Error;

use crate::types::Landmark;

/// Tendon tracker error types
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Table {table} is missing columns: {columns:?}")]
    MissingColumns {
        table: String,
        columns: Vec<String>,
    },

    #[error("Innovation covariance is singular ({landmark} landmark, frame {frame})")]
    SingularInnovation { landmark: Landmark, frame: usize },

    #[error("Numeric degenerate: {0}")]
    NumericDegenerate(String),

    #[error("Empty series: {0}")]
    EmptySeries(&'static str),

    #[error("Length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for library operations
pub type Result<T> = std::result::Result<T, TrackerError>;
