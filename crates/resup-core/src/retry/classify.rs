//! Classify HTTP status codes and IO errors into canonical status codes.

use crate::status::StatusCode;
use std::io;

/// Classify an HTTP response status for retry decisions.
///
/// Only meaningful for error responses; callers handle 2xx and 308 themselves.
pub fn classify_http_status(code: u16) -> StatusCode {
    match code {
        408 | 504 => StatusCode::DeadlineExceeded,
        429 => StatusCode::ResourceExhausted,
        500 => StatusCode::Internal,
        502 | 503 => StatusCode::Unavailable,
        501 => StatusCode::Unimplemented,
        400 => StatusCode::InvalidArgument,
        401 => StatusCode::Unauthenticated,
        403 => StatusCode::PermissionDenied,
        404 => StatusCode::NotFound,
        409 => StatusCode::Aborted,
        412 => StatusCode::FailedPrecondition,
        416 => StatusCode::OutOfRange,
        400..=499 => StatusCode::InvalidArgument,
        500..=599 => StatusCode::Unavailable,
        _ => StatusCode::Unknown,
    }
}

/// Classify an IO error (local service, socket-level transports).
pub fn classify_io_error(e: &io::Error) -> StatusCode {
    match e.kind() {
        io::ErrorKind::TimedOut => StatusCode::DeadlineExceeded,
        io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => StatusCode::Unavailable,
        io::ErrorKind::NotFound => StatusCode::NotFound,
        io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        io::ErrorKind::AlreadyExists => StatusCode::AlreadyExists,
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => StatusCode::InvalidArgument,
        _ => StatusCode::Unknown,
    }
}
