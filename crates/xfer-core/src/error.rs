//! Backend-neutral error type shared by every file-system adapter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised file-system error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FsError {
    pub kind: FsErrorKind,
    pub message: String,
    /// Path the failing call was addressing, if known.
    pub path: Option<String>,
    /// Protocol status that triggered the error (FTP reply, HTTP status).
    pub code: Option<u16>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FsErrorKind {
    /// TCP / DNS / TLS failure while establishing a session or data channel.
    ConnectionFailed,
    /// Operation exceeded its deadline.
    Timeout,
    /// Session dropped underneath us.
    Disconnected,
    /// Wrong credentials.
    AuthFailed,
    PermissionDenied,
    NotFound,
    /// Target already exists, or is claimed by another operation.
    Conflict,
    /// Source and destination digests differ after a transfer.
    ChecksumMismatch,
    /// Cancelled through an abort token.
    Aborted,
    /// Unexpected or unparseable response.
    Protocol,
    /// Local I/O failure, or a server-side storage failure.
    Io,
    InvalidConfig,
    Unsupported,
    Unknown,
}

pub type FsResult<T> = Result<T, FsError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FsError {
    pub fn new(kind: FsErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            path: None,
            code: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach `path` unless a more specific one is already set.
    pub fn or_path(mut self, path: &str) -> Self {
        if self.path.is_none() {
            self.path = Some(path.to_string());
        }
        self
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FsErrorKind::ConnectionFailed, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FsErrorKind::Timeout, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(FsErrorKind::Disconnected, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(FsErrorKind::AuthFailed, msg)
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::new(FsErrorKind::PermissionDenied, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(FsErrorKind::NotFound, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(FsErrorKind::Conflict, msg)
    }

    pub fn checksum_mismatch(msg: impl Into<String>) -> Self {
        Self::new(FsErrorKind::ChecksumMismatch, msg)
    }

    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::new(FsErrorKind::Aborted, msg)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(FsErrorKind::Protocol, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(FsErrorKind::Io, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(FsErrorKind::InvalidConfig, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(FsErrorKind::Unsupported, msg)
    }

    // ── Classification ───────────────────────────────────────────

    /// The session itself is unusable and must be re-established.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self.kind,
            FsErrorKind::ConnectionFailed
                | FsErrorKind::Timeout
                | FsErrorKind::Disconnected
                | FsErrorKind::Io
        )
    }

    /// Worth another attempt on the same item. Integrity failures are not:
    /// only an operator-approved iteration pass rewrites a corrupted file.
    pub fn is_retryable(&self) -> bool {
        self.is_connectivity() || self.kind == FsErrorKind::Unknown
    }

    /// Abandons the current item without further attempts.
    pub fn is_fatal_for_item(&self) -> bool {
        !self.is_retryable()
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == FsErrorKind::NotFound
    }

    pub fn is_aborted(&self) -> bool {
        self.kind == FsErrorKind::Aborted
    }

    // ── Protocol mappings ────────────────────────────────────────

    /// Classify an FTP reply code into the most appropriate error kind.
    pub fn from_ftp_reply(code: u16, text: &str) -> Self {
        let kind = match code {
            421 => FsErrorKind::Disconnected,
            425 | 426 => FsErrorKind::ConnectionFailed,
            430 | 530 => FsErrorKind::AuthFailed,
            450 | 550 => {
                let lower = text.to_lowercase();
                if lower.contains("permission") || lower.contains("denied") {
                    FsErrorKind::PermissionDenied
                } else if lower.contains("exist") {
                    FsErrorKind::Conflict
                } else {
                    FsErrorKind::NotFound
                }
            }
            451 | 452 | 552 => FsErrorKind::Io,
            502 | 504 => FsErrorKind::Unsupported,
            _ if code >= 400 => FsErrorKind::Protocol,
            _ => FsErrorKind::Unknown,
        };
        Self::new(kind, text).with_code(code)
    }

    /// Classify a non-success HTTP status code.
    pub fn from_http_status(code: u16, text: &str) -> Self {
        let kind = match code {
            401 => FsErrorKind::AuthFailed,
            403 => FsErrorKind::PermissionDenied,
            404 | 410 => FsErrorKind::NotFound,
            405 | 409 | 412 => FsErrorKind::Conflict,
            408 | 504 => FsErrorKind::Timeout,
            501 => FsErrorKind::Unsupported,
            507 => FsErrorKind::Io,
            500..=599 => FsErrorKind::ConnectionFailed,
            _ => FsErrorKind::Protocol,
        };
        Self::new(kind, format!("HTTP {}: {}", code, text)).with_code(code)
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.path, self.code) {
            (Some(path), Some(code)) => write!(f, "[{:?} {}] {} ({})", self.kind, code, self.message, path),
            (Some(path), None) => write!(f, "[{:?}] {} ({})", self.kind, self.message, path),
            (None, Some(code)) => write!(f, "[{:?} {}] {}", self.kind, code, self.message),
            (None, None) => write!(f, "[{:?}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for FsError {}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => Self::not_found(e.to_string()),
            ErrorKind::PermissionDenied => Self::permission_denied(e.to_string()),
            ErrorKind::AlreadyExists => Self::conflict(e.to_string()),
            ErrorKind::TimedOut => Self::timeout(format!("I/O timeout: {}", e)),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Self::disconnected(e.to_string()),
            ErrorKind::ConnectionRefused => Self::connection_failed(e.to_string()),
            ErrorKind::Interrupted => Self::aborted(e.to_string()),
            _ => Self::io(e.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for FsError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("operation timed out")
    }
}

impl From<tokio::task::JoinError> for FsError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Self::aborted("background task cancelled")
        } else {
            Self::io(format!("background task failed: {}", e))
        }
    }
}
