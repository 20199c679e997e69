use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::service::LedgerState;

/// Failures a single row can have while being decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("expected at least 6 fields, found {0}")]
    TooFewFields(usize),
    #[error("expected at most 7 fields, found {0}")]
    TooManyFields(usize),
    #[error("unterminated quoted field")]
    UnterminatedQuote,
    #[error("invalid boolean in column {column}: {value:?}")]
    InvalidBool { column: &'static str, value: String },
    #[error("invalid due date {0:?} (expected YYYY-MM-DD)")]
    InvalidDate(String),
    #[error("invalid record id {0:?}")]
    InvalidId(String),
    #[error("unreadable row: {0}")]
    Unreadable(String),
}

/// Error taxonomy of the event ledger.
///
/// None of these are fatal: the service always stays usable, falling back
/// to the default record when storage cannot be read.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: CodecError },
    #[error("{0}")]
    ValidationError(String),
    #[error("no incomplete row matches event {name:?} due {due}")]
    NoMatchingRow { name: String, due: NaiveDate },
    #[error("{command} is not allowed while {state}")]
    InvalidState {
        command: &'static str,
        state: LedgerState,
    },
}

impl LedgerError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageUnavailable {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Warnings are recorded as the last diagnostic but do not fail a command.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::NoMatchingRow { .. } | Self::MalformedRecord { .. })
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
