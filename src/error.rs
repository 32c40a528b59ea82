/// LiveGrid error types
///
/// Every failure raised by the engine is a contract violation rather than an
/// expected runtime condition. Callers translate these into client-visible
/// failures or trigger a full resync.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridError {
    /// Operation is not valid in the current state (e.g. opening an open node)
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The requested combination of sort/filter is not handled incrementally
    #[error("unsupported combination: {0}")]
    UnsupportedCombination(String),

    /// A key or tree path could not be resolved
    #[error("not found: {0}")]
    NotFound(String),

    #[error("type mismatch for column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("column '{0}' not found")]
    ColumnNotFound(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("index {index} out of range [0, {len})")]
    OutOfRange { index: usize, len: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GridError {
    /// Returns true for the errors a view answers with a full resync
    pub fn is_unsupported(&self) -> bool {
        matches!(self, GridError::UnsupportedCombination(_))
    }
}

pub type Result<T> = std::result::Result<T, GridError>;
