//! Error types for patch loading and application

use std::path::PathBuf;
use thiserror::Error;

use crate::patch::Direction;

/// Result type for patch operations
pub type PatchResult<T> = std::result::Result<T, PatchError>;

/// Result type for raw database operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors raised by a database backend
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Connection-related errors
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution errors
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction errors
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(_)
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StorageError::ConnectionFailed(err.to_string()),
            other => StorageError::QueryFailed(other.to_string()),
        }
    }
}

/// Errors raised while loading, planning or applying patches.
///
/// Every variant that can occur after the tracked level was read is reported
/// alongside the level actually reached, see [`crate::MigrationFailure`].
#[derive(Debug, Error)]
pub enum PatchError {
    /// The patch directory or one of its files could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file looks like a patch but its name does not follow `{level}-{direction}.sql`
    #[error("Malformed patch file name '{file_name}': {reason}")]
    MalformedPatchName { file_name: String, reason: String },

    /// Two files supply the same level in the same direction
    #[error("Duplicate {direction} patch for level {level}: '{first}' and '{second}'")]
    DuplicatePatch {
        level: u32,
        direction: Direction,
        first: String,
        second: String,
    },

    /// The plan needs a unit or direction the patch set does not have
    #[error("Missing {direction} patch for level {level}")]
    MissingPatch { level: u32, direction: Direction },

    /// The patch SQL failed; the step was rolled back
    #[error("The {direction} patch for level {level} failed: {source}")]
    Execution {
        level: u32,
        direction: Direction,
        #[source]
        source: StorageError,
    },

    /// Recording the new level failed; the step was rolled back
    #[error("Failed to record level {level}: {source}")]
    LevelWrite {
        level: u32,
        #[source]
        source: StorageError,
    },

    /// Commit failed after the step executed; the step was rolled back
    #[error("Commit of level {level} failed: {source}")]
    Commit {
        level: u32,
        #[source]
        source: StorageError,
    },

    /// A rollback failed, leaving the database in an unknown state
    #[error(
        "Rollback of the step to level {level} failed after: {cause}; rollback error: {source}. \
         The database needs manual inspection"
    )]
    Unrecoverable {
        level: u32,
        cause: String,
        #[source]
        source: StorageError,
    },

    /// The tracked level holds something other than a non-negative integer
    #[error("Tracked level '{value}' in {table}.{key} is not a non-negative integer")]
    CorruptLevel {
        table: String,
        key: String,
        value: String,
    },

    /// The tracked level table or key is unusable
    #[error("Invalid tracked level: {0}")]
    InvalidTrackedLevel(String),

    /// Any other database error
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PatchError {
    /// Whether the error leaves the database in a state that needs an operator
    pub fn is_fatal(&self) -> bool {
        matches!(self, PatchError::Unrecoverable { .. })
    }

    /// Get a stable error code for logs and exit reporting
    pub fn error_code(&self) -> &'static str {
        match self {
            PatchError::Io { .. } => "IO_ERROR",
            PatchError::MalformedPatchName { .. } => "MALFORMED_PATCH_NAME",
            PatchError::DuplicatePatch { .. } => "DUPLICATE_PATCH",
            PatchError::MissingPatch { .. } => "MISSING_PATCH",
            PatchError::Execution { .. } => "EXECUTION_ERROR",
            PatchError::LevelWrite { .. } => "LEVEL_WRITE_ERROR",
            PatchError::Commit { .. } => "COMMIT_ERROR",
            PatchError::Unrecoverable { .. } => "UNRECOVERABLE",
            PatchError::CorruptLevel { .. } => "CORRUPT_LEVEL",
            PatchError::InvalidTrackedLevel(_) => "INVALID_TRACKED_LEVEL",
            PatchError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PatchError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(file_name: &str, reason: impl Into<String>) -> Self {
        PatchError::MalformedPatchName {
            file_name: file_name.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unrecoverable_is_fatal() {
        let fatal = PatchError::Unrecoverable {
            level: 3,
            cause: "commit failed".to_string(),
            source: StorageError::TransactionFailed("connection reset".to_string()),
        };
        assert!(fatal.is_fatal());

        let commit = PatchError::Commit {
            level: 3,
            source: StorageError::TransactionFailed("disk full".to_string()),
        };
        assert!(!commit.is_fatal());
        assert!(!PatchError::MissingPatch {
            level: 2,
            direction: Direction::Reverse
        }
        .is_fatal());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            PatchError::malformed("x-forward.sql", "bad level").error_code(),
            "MALFORMED_PATCH_NAME"
        );
        assert_eq!(
            PatchError::MissingPatch {
                level: 1,
                direction: Direction::Forward
            }
            .error_code(),
            "MISSING_PATCH"
        );
        assert_eq!(
            PatchError::Storage(StorageError::QueryFailed("boom".to_string())).error_code(),
            "STORAGE_ERROR"
        );
    }

    #[test]
    fn test_messages_name_the_step() {
        let err = PatchError::MissingPatch {
            level: 4,
            direction: Direction::Reverse,
        };
        assert_eq!(err.to_string(), "Missing reverse patch for level 4");

        let err = PatchError::DuplicatePatch {
            level: 1,
            direction: Direction::Forward,
            first: "01-forward.sql".to_string(),
            second: "1-forward.sql".to_string(),
        };
        assert!(err.to_string().contains("'01-forward.sql' and '1-forward.sql'"));
    }
}
