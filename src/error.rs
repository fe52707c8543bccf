//! Error types for row unmarshaling.
//!
//! This module defines all error types using `thiserror`. Driver errors are
//! carried through untouched; everything else is raised by this crate while
//! mapping rows onto records.

use thiserror::Error;

/// Boxed error returned by post-unmarshal hooks.
pub type BoxDynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure to line up result columns with scan destinations.
#[derive(Error, Debug)]
pub enum MappingError {
    #[error(
        "Scan destination count mismatch: result has {columns} columns but {destinations} destinations were supplied"
    )]
    DestinationCount { columns: usize, destinations: usize },

    #[error("No field of {target} is tagged for column '{column}'")]
    UnknownColumn { target: &'static str, column: String },

    #[error("Column '{column}' appears more than once in the result set")]
    DuplicateColumn { column: String },

    #[error("{target} has no reflective mapping; implement FastScan or Tagged for it")]
    NotMappable { target: &'static str },
}

#[derive(Error, Debug)]
pub enum Error {
    /// Error raised by the underlying driver, passed through unchanged.
    #[error(transparent)]
    Driver(#[from] sqlx::Error),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Post-unmarshal hook failed on row {row_index} of {total_rows}")]
    PostProcess {
        row_index: usize,
        total_rows: usize,
        #[source]
        source: BoxDynError,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded during {operation}")]
    DeadlineExceeded { operation: String },

    #[error("Row cursor is closed")]
    CursorClosed,

    #[error("Scan called without a current row")]
    NoCurrentRow,

    #[error("Row limit of {limit} exceeded")]
    RowLimitExceeded { limit: usize },

    #[error("Expected exactly one row, got {count}")]
    TooManyRows { count: usize },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

/// Coarse classification of [`Error`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Driver,
    Mapping,
    PostProcess,
    Context,
    Usage,
}

impl Error {
    /// Create a post-process error for the hook that failed on `row_index`.
    pub fn post_process(row_index: usize, total_rows: usize, source: BoxDynError) -> Self {
        Self::PostProcess {
            row_index,
            total_rows,
            source,
        }
    }

    /// Create a deadline exceeded error.
    pub fn deadline_exceeded(operation: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            operation: operation.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Driver(_) => ErrorKind::Driver,
            Self::Mapping(_) => ErrorKind::Mapping,
            Self::PostProcess { .. } => ErrorKind::PostProcess,
            Self::Cancelled | Self::DeadlineExceeded { .. } => ErrorKind::Context,
            Self::CursorClosed
            | Self::NoCurrentRow
            | Self::RowLimitExceeded { .. }
            | Self::TooManyRows { .. }
            | Self::InvalidInput { .. } => ErrorKind::Usage,
        }
    }

    /// Whether the underlying driver reported that no row matched.
    pub fn is_row_not_found(&self) -> bool {
        matches!(self, Self::Driver(sqlx::Error::RowNotFound))
    }
}

/// Result type alias for unmarshaling operations.
pub type Result<T> = std::result::Result<T, Error>;
