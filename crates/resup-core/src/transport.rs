//! The capability the upload engine consumes from a transport.
//!
//! One method per request type, one call per attempt. Implementations must not
//! retry or back off internally; that is the job of [`crate::retry`]. They
//! must be safe to call from several threads at once for independent
//! sessions.
//!
//! Failures are reported as [`Status`](crate::status::Status) values, whose
//! code decides whether a call is retried. A transport speaking HTTP maps
//! response codes with [`classify_http_status`](crate::retry::classify_http_status).

use crate::object::{ObjectDestination, ObjectMetadata, WriteOptions};
use crate::status::Result;

/// Non-final chunks must end on a multiple of this many bytes (256 KiB).
pub const UPLOAD_QUANTUM: usize = 256 * 1024;

/// Start a new resumable upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSessionRequest {
    pub destination: ObjectDestination,
    pub options: WriteOptions,
}

/// Send `payload` starting at `offset` of the session's byte stream.
///
/// `total_size` is set only on the final chunk and finalizes the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadChunkRequest<'a> {
    pub session_id: &'a str,
    pub offset: u64,
    pub payload: &'a [u8],
    pub total_size: Option<u64>,
}

impl UploadChunkRequest<'_> {
    pub fn is_final(&self) -> bool {
        self.total_size.is_some()
    }

    /// Offset one past the last byte of this request.
    pub fn end(&self) -> u64 {
        self.offset + self.payload.len() as u64
    }
}

/// Server-side progress of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Bytes durably persisted by the server.
    pub committed_size: u64,
    /// Present once the upload is finalized.
    pub metadata: Option<ObjectMetadata>,
}

impl SessionStatus {
    pub fn in_progress(committed_size: u64) -> Self {
        Self {
            committed_size,
            metadata: None,
        }
    }

    pub fn done(metadata: ObjectMetadata) -> Self {
        Self {
            committed_size: metadata.size,
            metadata: Some(metadata),
        }
    }

    pub fn is_done(&self) -> bool {
        self.metadata.is_some()
    }
}

pub trait UploadTransport: Send + Sync {
    /// Returns the new session id.
    fn create_session(&self, request: &CreateSessionRequest) -> Result<String>;

    /// Current committed size of an existing session.
    fn query_session(&self, session_id: &str) -> Result<SessionStatus>;

    fn upload_chunk(&self, request: &UploadChunkRequest<'_>) -> Result<SessionStatus>;

    /// Alignment required for non-final chunks.
    fn chunk_alignment(&self) -> usize {
        UPLOAD_QUANTUM
    }
}

impl<T: UploadTransport + ?Sized> UploadTransport for std::sync::Arc<T> {
    fn create_session(&self, request: &CreateSessionRequest) -> Result<String> {
        (**self).create_session(request)
    }

    fn query_session(&self, session_id: &str) -> Result<SessionStatus> {
        (**self).query_session(session_id)
    }

    fn upload_chunk(&self, request: &UploadChunkRequest<'_>) -> Result<SessionStatus> {
        (**self).upload_chunk(request)
    }

    fn chunk_alignment(&self) -> usize {
        (**self).chunk_alignment()
    }
}
