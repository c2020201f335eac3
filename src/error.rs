//! Error types for the history-merge library.
//!
//! Errors fall into two classes. Access errors mean a database cannot be read
//! or written at all and abort the whole job. Insertion errors are scoped to a
//! single merge unit (one conversation or one contact batch) and are recorded
//! while the job moves on.

use thiserror::Error;

/// Errors that can occur while comparing or merging two databases.
#[derive(Error, Debug)]
pub enum MergeError {
    /// A database cannot be read or written (file locked, missing, corrupt)
    #[error("Cannot access database {database}: {reason}")]
    Access {
        /// Label of the database that failed
        database: String,
        /// Underlying failure
        reason: String,
    },

    /// A single insert failed during a merge
    #[error("Failed to insert {entity} into {database}: {reason}")]
    Insertion {
        /// Kind of record being inserted (chat, participant, message, ...)
        entity: &'static str,
        /// Label of the target database
        database: String,
        /// Underlying failure
        reason: String,
    },

    /// The job was cancelled by its owner
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation not allowed in the current session state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// A requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rejected user input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Raw SQLite errors outside of a classified operation
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Result with MergeError
pub type Result<T> = std::result::Result<T, MergeError>;

impl MergeError {
    /// Build an access error for the named database.
    pub fn access(database: impl Into<String>, reason: impl ToString) -> Self {
        Self::Access {
            database: database.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an insertion error for the named database.
    pub fn insertion(entity: &'static str, database: impl Into<String>, reason: impl ToString) -> Self {
        Self::Insertion {
            entity,
            database: database.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error leaves the job unable to make any further progress.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Access { .. } | Self::Database(_) | Self::Pool(_) | Self::Io(_))
    }

    /// Short kind label used for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Access { .. } | Self::Database(_) | Self::Pool(_) | Self::Io(_) => "access",
            Self::Insertion { .. } => "insertion",
            Self::Cancelled => "cancelled",
            Self::InvalidState(_) => "state",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) | Self::InvalidConfig(_) => "input",
            Self::Serialization(_) | Self::Other(_) => "other",
        }
    }
}

impl From<anyhow::Error> for MergeError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
