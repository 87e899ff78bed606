//! Errors raised by the operation layer.

use thiserror::Error;
use xfer_core::{FsError, FsErrorKind};

#[derive(Debug, Clone, Error)]
pub enum OperationError {
    #[error("{0}")]
    Fs(#[from] FsError),

    #[error("operation aborted")]
    Aborted,

    /// Items still unresolved once every retry pass is spent or declined.
    #[error("{} item(s) could not be processed: {}", items.len(), items.join(", "))]
    Outstanding { items: Vec<String> },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation state: {0}")]
    Persistence(String),

    #[error("unknown file system '{0}'")]
    UnknownAdapter(String),
}

pub type OpResult<T> = Result<T, OperationError>;

impl OperationError {
    pub fn is_aborted(&self) -> bool {
        match self {
            OperationError::Aborted => true,
            OperationError::Fs(e) => e.is_aborted(),
            _ => false,
        }
    }

    /// Worth another attempt on the same item.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OperationError::Fs(e) if e.is_retryable())
    }

    /// The backend session should be rebuilt before the next attempt.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, OperationError::Fs(e) if e.is_connectivity())
    }

    pub fn fs_kind(&self) -> Option<FsErrorKind> {
        match self {
            OperationError::Fs(e) => Some(e.kind),
            OperationError::Conflict(_) => Some(FsErrorKind::Conflict),
            _ => None,
        }
    }
}

impl From<std::io::Error> for OperationError {
    fn from(e: std::io::Error) -> Self {
        OperationError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for OperationError {
    fn from(e: serde_json::Error) -> Self {
        OperationError::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outstanding_lists_items() {
        let e = OperationError::Outstanding {
            items: vec!["/a".into(), "/b".into()],
        };
        assert_eq!(e.to_string(), "2 item(s) could not be processed: /a, /b");
    }

    #[test]
    fn classification_follows_the_wrapped_error() {
        assert!(OperationError::from(FsError::aborted("x")).is_aborted());
        assert!(OperationError::from(FsError::timeout("x")).is_retryable());
        assert!(OperationError::from(FsError::disconnected("x")).is_connectivity());
        assert!(!OperationError::from(FsError::not_found("x")).is_retryable());
        assert_eq!(
            OperationError::Conflict("taken".into()).fs_kind(),
            Some(FsErrorKind::Conflict)
        );
    }
}
