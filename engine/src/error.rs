//! Error types for the transfer engine.
//!
//! `TransferError` is the job-level error recorded on an `Outcome`. Strategy
//! failures (`StrategyFailure`) are recovered inside the strategy chain and only
//! reach the caller wrapped in `TransferError::AllStrategiesExhausted`.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Which kind of filesystem entry a job expects at its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    File,
    Directory,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::File => write!(f, "file"),
            SourceKind::Directory => write!(f, "directory"),
        }
    }
}

/// Classification of a destination directory creation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirCreateFailure {
    Permission,
    PathNotFound,
    OsError,
}

impl DirCreateFailure {
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => DirCreateFailure::Permission,
            io::ErrorKind::NotFound => DirCreateFailure::PathNotFound,
            _ => DirCreateFailure::OsError,
        }
    }
}

impl fmt::Display for DirCreateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirCreateFailure::Permission => write!(f, "permission"),
            DirCreateFailure::PathNotFound => write!(f, "path_not_found"),
            DirCreateFailure::OsError => write!(f, "os_error"),
        }
    }
}

/// Errors that end a job (or prevent one from being created).
#[derive(Debug, Error)]
pub enum TransferError {
    /// Job could not be created from the given inputs
    #[error("Invalid input {}: {reason}", .path.display())]
    InvalidInput { path: PathBuf, reason: String },

    /// Source vanished or was never there
    #[error("Source not found: {}", .path.display())]
    SourceNotFound { path: PathBuf },

    /// Source exists but is the wrong kind of entry
    #[error("Source {} is not a {expected}", .path.display())]
    SourceKindMismatch { path: PathBuf, expected: SourceKind },

    /// Destination directory tree could not be created
    #[error("Failed to create destination directory {} ({reason})", .path.display())]
    DestinationDirCreateFailed {
        path: PathBuf,
        reason: DirCreateFailure,
        #[source]
        source: io::Error,
    },

    /// Every strategy in the chain failed
    #[error("All copy strategies failed ({})", summarize(.attempts))]
    AllStrategiesExhausted { attempts: Vec<StrategyFailure> },

    /// Move copied the data but the source could not be removed
    #[error("Copied to destination but failed to delete source {}", .path.display())]
    CopiedButNotDeleted {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Cancelled by the user
    #[error("Transfer cancelled")]
    Cancelled,

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl TransferError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::DestinationDirCreateFailed { source, .. }
            | Self::CopiedButNotDeleted { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Fatal errors stop the strategy chain without trying the next strategy.
    pub(crate) fn is_fatal_for_chain(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound { .. }
                | Self::SourceKindMismatch { .. }
                | Self::DestinationDirCreateFailed { .. }
                | Self::Cancelled
        )
    }
}

fn summarize(attempts: &[StrategyFailure]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a single strategy attempt did not succeed. Always triggers fallback.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StrategyFailure {
    #[error("{strategy}: {message}")]
    Execution {
        strategy: &'static str,
        message: String,
    },

    #[error("{strategy}: size validation failed (expected {expected}, found {actual})")]
    SizeValidation {
        strategy: &'static str,
        expected: u64,
        actual: u64,
    },

    #[error("{strategy}: cancelled")]
    Cancelled { strategy: &'static str },
}

impl StrategyFailure {
    pub fn execution(strategy: &'static str, message: impl Into<String>) -> Self {
        StrategyFailure::Execution {
            strategy,
            message: message.into(),
        }
    }

    pub fn strategy(&self) -> &'static str {
        match self {
            Self::Execution { strategy, .. }
            | Self::SizeValidation { strategy, .. }
            | Self::Cancelled { strategy } => strategy,
        }
    }
}

/// Configuration problems. These are programming or deployment errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_create_failure_classification() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        let other = io::Error::new(io::ErrorKind::Other, "boom");

        assert_eq!(DirCreateFailure::classify(&denied), DirCreateFailure::Permission);
        assert_eq!(DirCreateFailure::classify(&missing), DirCreateFailure::PathNotFound);
        assert_eq!(DirCreateFailure::classify(&other), DirCreateFailure::OsError);
    }

    #[test]
    fn test_exhausted_message_lists_attempts() {
        let err = TransferError::AllStrategiesExhausted {
            attempts: vec![
                StrategyFailure::execution("rsync", "exit status 23"),
                StrategyFailure::SizeValidation {
                    strategy: "cp",
                    expected: 10,
                    actual: 4,
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("rsync: exit status 23"));
        assert!(msg.contains("expected 10, found 4"));
    }

    #[test]
    fn test_fatal_errors_stop_chain() {
        assert!(TransferError::SourceNotFound { path: PathBuf::from("x") }.is_fatal_for_chain());
        assert!(TransferError::Cancelled.is_fatal_for_chain());
        assert!(!TransferError::AllStrategiesExhausted { attempts: vec![] }.is_fatal_for_chain());
    }
}
