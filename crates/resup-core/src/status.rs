//! Status codes and the crate-wide `Result` alias.
//!
//! Every boundary operation returns `Result<T>`. The error side carries a
//! canonical code, a retry classification and a message; the classification
//! is the only thing the retry executor looks at when deciding whether to try
//! again.

use std::fmt;
use std::io;

use crate::retry::classify_io_error;

/// Result of any operation that talks to the upload service.
pub type Result<T> = std::result::Result<T, Status>;

/// Canonical status codes reported by transports and by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl StatusCode {
    /// Default retry classification for this code.
    pub fn kind(self) -> ErrorKind {
        match self {
            StatusCode::DeadlineExceeded
            | StatusCode::ResourceExhausted
            | StatusCode::Unavailable
            | StatusCode::Internal => ErrorKind::Transient,
            StatusCode::Cancelled => ErrorKind::Cancelled,
            StatusCode::Unknown
            | StatusCode::InvalidArgument
            | StatusCode::NotFound
            | StatusCode::AlreadyExists
            | StatusCode::PermissionDenied
            | StatusCode::FailedPrecondition
            | StatusCode::Aborted
            | StatusCode::OutOfRange
            | StatusCode::Unimplemented
            | StatusCode::DataLoss
            | StatusCode::Unauthenticated => ErrorKind::Permanent,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::DataLoss => "DATA_LOSS",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// High-level classification of an error for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or server condition expected to clear (overload, timeout).
    Transient,
    /// The request cannot succeed as given (precondition failed, not found).
    Permanent,
    /// Aborted by the caller through a cancel token.
    Cancelled,
    /// Protocol misuse: write after close, chunk order violation, reused policy.
    InvalidState,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidState => "invalid state",
        };
        f.write_str(s)
    }
}

/// How a retried operation ended when it ended in error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryExit {
    /// Every attempt failed with a transient error and the policy ran out.
    TooManyFailures { attempts: u32 },
    /// An attempt failed with a non-transient error; no retry was made.
    PermanentFailure { attempts: u32 },
    /// The cancel token was set before the next attempt.
    Cancelled { attempts: u32 },
}

impl RetryExit {
    pub fn attempts(&self) -> u32 {
        match *self {
            RetryExit::TooManyFailures { attempts }
            | RetryExit::PermanentFailure { attempts }
            | RetryExit::Cancelled { attempts } => attempts,
        }
    }
}

/// Error half of [`Result`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Status {
    code: StatusCode,
    kind: ErrorKind,
    message: String,
    exit: Option<RetryExit>,
}

impl Status {
    /// New status classified by its code.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: code.kind(),
            message: message.into(),
            exit: None,
        }
    }

    /// Caller misuse of a stream, session or policy.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::FailedPrecondition,
            kind: ErrorKind::InvalidState,
            message: message.into(),
            exit: None,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, message)
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Set when the status was returned by the retry executor.
    pub fn retry_exit(&self) -> Option<RetryExit> {
        self.exit
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }

    /// A transient failure where the server may or may not have applied the
    /// request. Only explicit throttling is known to have been rejected.
    pub fn is_ambiguous(&self) -> bool {
        self.is_transient() && self.code != StatusCode::ResourceExhausted
    }

    /// Annotate with how the retry loop for `operation` ended.
    pub(crate) fn with_retry_exit(mut self, exit: RetryExit, operation: &str) -> Self {
        let attempts = exit.attempts();
        let plural = if attempts == 1 { "" } else { "s" };
        let prefix = match exit {
            RetryExit::TooManyFailures { .. } => format!(
                "retry policy exhausted in {operation} after {attempts} attempt{plural} (too many transient failures)"
            ),
            RetryExit::PermanentFailure { .. } => format!(
                "permanent failure in {operation} after {attempts} attempt{plural}"
            ),
            RetryExit::Cancelled { .. } => format!(
                "{operation} cancelled after {attempts} attempt{plural}"
            ),
        };
        self.message = format!("{prefix}: {}", self.message);
        self.exit = Some(exit);
        self
    }
}

impl From<io::Error> for Status {
    fn from(e: io::Error) -> Self {
        Status::new(classify_io_error(&e), e.to_string())
    }
}

impl From<Status> for io::Error {
    fn from(status: Status) -> Self {
        let kind = match status.code() {
            StatusCode::DeadlineExceeded => io::ErrorKind::TimedOut,
            StatusCode::NotFound => io::ErrorKind::NotFound,
            StatusCode::PermissionDenied | StatusCode::Unauthenticated => {
                io::ErrorKind::PermissionDenied
            }
            StatusCode::InvalidArgument => io::ErrorKind::InvalidInput,
            StatusCode::Cancelled => io::ErrorKind::Interrupted,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_codes() {
        for code in [
            StatusCode::DeadlineExceeded,
            StatusCode::ResourceExhausted,
            StatusCode::Unavailable,
            StatusCode::Internal,
        ] {
            assert_eq!(code.kind(), ErrorKind::Transient, "{code}");
        }
    }

    #[test]
    fn precondition_and_not_found_are_permanent() {
        assert_eq!(StatusCode::FailedPrecondition.kind(), ErrorKind::Permanent);
        assert_eq!(StatusCode::NotFound.kind(), ErrorKind::Permanent);
        assert_eq!(StatusCode::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn invalid_state_overrides_code_kind() {
        let s = Status::invalid_state("write after close");
        assert_eq!(s.code(), StatusCode::FailedPrecondition);
        assert_eq!(s.kind(), ErrorKind::InvalidState);
        assert!(!s.is_transient());
    }

    #[test]
    fn throttling_is_not_ambiguous() {
        assert!(!Status::new(StatusCode::ResourceExhausted, "429").is_ambiguous());
        assert!(Status::new(StatusCode::DeadlineExceeded, "timeout").is_ambiguous());
        assert!(!Status::new(StatusCode::NotFound, "gone").is_ambiguous());
    }

    #[test]
    fn retry_exit_annotation_keeps_code() {
        let s = Status::new(StatusCode::Unavailable, "try again")
            .with_retry_exit(RetryExit::TooManyFailures { attempts: 3 }, "upload chunk");
        assert_eq!(s.code(), StatusCode::Unavailable);
        assert_eq!(s.retry_exit(), Some(RetryExit::TooManyFailures { attempts: 3 }));
        assert!(s.message().contains("too many transient failures"));
        assert!(s.message().contains("3 attempts"));
        assert!(s.message().ends_with("try again"));
    }

    #[test]
    fn status_round_trips_through_io_error() {
        let s = Status::new(StatusCode::DeadlineExceeded, "slow");
        let e: io::Error = s.clone().into();
        assert_eq!(e.kind(), io::ErrorKind::TimedOut);
        let inner = e.get_ref().and_then(|i| i.downcast_ref::<Status>()).unwrap();
        assert_eq!(inner, &s);
    }
}
