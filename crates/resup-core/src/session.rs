//! Resumable upload session: server-side upload progress as seen by the client.
//!
//! The server is authoritative for the committed offset. A session is created
//! once, can be serialized as its id, and later reattached (`restore`) by a
//! different process. Chunks are committed strictly in order through the
//! retry executor; after an ambiguous failure (a timeout where the server may
//! or may not have persisted the bytes) the committed offset is queried before
//! anything is resent, so no byte is ever sent twice past the server's
//! acknowledged offset.

use crate::object::ObjectMetadata;
use crate::retry::Retrier;
use crate::status::{ErrorKind, Result, Status, StatusCode};
use crate::transport::{CreateSessionRequest, SessionStatus, UploadChunkRequest, UploadTransport};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session id obtained, nothing committed yet.
    Created,
    /// Accepting chunk commits.
    Active,
    /// The final chunk is in flight.
    Finalizing,
    /// The server returned the final object metadata.
    Done,
    /// A permanent error was encountered; the session cannot make progress.
    Failed,
}

/// A contiguous byte range of the upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub offset: u64,
    pub payload: &'a [u8],
}

impl<'a> Chunk<'a> {
    pub fn new(offset: u64, payload: &'a [u8]) -> Self {
        Self { offset, payload }
    }

    pub fn len(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn end(&self) -> u64 {
        self.offset + self.len()
    }
}

pub struct UploadSession {
    id: String,
    transport: Arc<dyn UploadTransport>,
    retrier: Retrier,
    committed: u64,
    total_size: Option<u64>,
    state: SessionState,
    last_status: Option<Status>,
    metadata: Option<ObjectMetadata>,
}

impl fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSession")
            .field("id", &self.id)
            .field("committed", &self.committed)
            .field("total_size", &self.total_size)
            .field("state", &self.state)
            .field("last_status", &self.last_status)
            .finish_non_exhaustive()
    }
}

impl UploadSession {
    /// Request a new session from the server.
    ///
    /// Fails with a permanent `FailedPrecondition` status when the request's
    /// preconditions do not hold.
    pub fn create(
        transport: Arc<dyn UploadTransport>,
        request: &CreateSessionRequest,
        retrier: Retrier,
    ) -> Result<Self> {
        let id = retrier.run("create upload session", || transport.create_session(request))?;
        tracing::info!(session_id = %id, destination = %request.destination, "created upload session");
        Ok(Self {
            id,
            transport,
            retrier,
            committed: 0,
            total_size: None,
            state: SessionState::Created,
            last_status: None,
            metadata: None,
        })
    }

    /// Reattach to an existing session. Local state is replaced by whatever
    /// the server reports.
    pub fn restore(
        transport: Arc<dyn UploadTransport>,
        session_id: impl Into<String>,
        retrier: Retrier,
    ) -> Result<Self> {
        let id = session_id.into();
        let status = retrier.run("query upload session", || transport.query_session(&id))?;
        let mut session = Self {
            id,
            transport,
            retrier,
            committed: 0,
            total_size: None,
            state: SessionState::Created,
            last_status: None,
            metadata: None,
        };
        session.apply(status);
        tracing::info!(
            session_id = %session.id,
            committed = session.committed,
            done = session.is_done(),
            "restored upload session"
        );
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bytes durably accepted by the server.
    pub fn committed_size(&self) -> u64 {
        self.committed
    }

    /// Known once the final chunk has been submitted.
    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == SessionState::Done
    }

    /// Error from the most recent failed commit, if the last commit failed.
    pub fn last_status(&self) -> Option<&Status> {
        self.last_status.as_ref()
    }

    pub fn metadata(&self) -> Option<&ObjectMetadata> {
        self.metadata.as_ref()
    }

    /// Alignment the transport requires for non-final chunks.
    pub fn chunk_alignment(&self) -> usize {
        self.transport.chunk_alignment().max(1)
    }

    /// Commit one chunk. It must start exactly at the committed offset, and
    /// unless `is_final` it must end on a multiple of the alignment.
    ///
    /// Returns the new committed offset.
    pub fn commit_chunk(&mut self, chunk: Chunk<'_>, is_final: bool) -> Result<u64> {
        match self.state {
            SessionState::Done => {
                return Err(Status::invalid_state(format!(
                    "upload session {} is already finalized",
                    self.id
                )))
            }
            SessionState::Failed => {
                return Err(self
                    .last_status
                    .clone()
                    .unwrap_or_else(|| Status::invalid_state("upload session failed")))
            }
            _ => {}
        }
        if chunk.offset != self.committed {
            return Err(Status::invalid_state(format!(
                "chunk at offset {} does not start at committed offset {}",
                chunk.offset, self.committed
            )));
        }
        let alignment = self.chunk_alignment() as u64;
        if !is_final && chunk.end() % alignment != 0 {
            return Err(Status::invalid_state(format!(
                "non-final chunk ending at {} is not aligned to {alignment}",
                chunk.end()
            )));
        }

        let start = chunk.offset;
        let end = chunk.end();
        let total_size = is_final.then_some(end);
        let previous_total = self.total_size;
        if is_final {
            self.state = SessionState::Finalizing;
            self.total_size = total_size;
        }

        let transport = &self.transport;
        let id = self.id.as_str();
        let mut requery = false;
        let mut send_from = start;

        let outcome = self.retrier.run("upload chunk", || {
            if requery {
                let status = transport.query_session(id)?;
                requery = false;
                if let Some(accepted) = reconcile(&status, start, end, is_final)? {
                    return Ok(accepted);
                }
                send_from = status.committed_size;
                tracing::debug!(session_id = id, offset = send_from, "resending from server offset");
            }

            let request = UploadChunkRequest {
                session_id: id,
                offset: send_from,
                payload: &chunk.payload[(send_from - start) as usize..],
                total_size,
            };
            let status = match transport.upload_chunk(&request) {
                Ok(status) => status,
                Err(e) => {
                    requery = e.is_ambiguous();
                    return Err(e);
                }
            };
            if let Some(accepted) = reconcile(&status, start, end, is_final)? {
                return Ok(accepted);
            }
            // Short write: the server kept part of the chunk, resend the rest.
            send_from = status.committed_size;
            Err(Status::new(
                StatusCode::Unavailable,
                format!(
                    "server persisted {} of {} bytes of the chunk",
                    send_from - start,
                    end - start
                ),
            ))
        });

        match outcome {
            Ok(status) => {
                self.apply(status);
                self.last_status = None;
                tracing::debug!(session_id = %self.id, committed = self.committed, is_final, "chunk committed");
                Ok(self.committed)
            }
            Err(e) => {
                self.committed = self.committed.max(send_from);
                self.total_size = previous_total;
                self.state = match e.kind() {
                    ErrorKind::Permanent | ErrorKind::InvalidState => SessionState::Failed,
                    ErrorKind::Transient | ErrorKind::Cancelled if self.committed == 0 => {
                        SessionState::Created
                    }
                    ErrorKind::Transient | ErrorKind::Cancelled => SessionState::Active,
                };
                tracing::warn!(
                    session_id = %self.id,
                    committed = self.committed,
                    state = ?self.state,
                    "chunk commit failed: {e}"
                );
                self.last_status = Some(e.clone());
                Err(e)
            }
        }
    }

    fn apply(&mut self, status: SessionStatus) {
        self.committed = self.committed.max(status.committed_size);
        match status.metadata {
            Some(metadata) => {
                self.total_size = Some(metadata.size);
                self.metadata = Some(metadata);
                self.state = SessionState::Done;
            }
            None if self.committed == 0 => self.state = SessionState::Created,
            None => self.state = SessionState::Active,
        }
    }
}

/// Compare a server report with the chunk `[start, end)`.
///
/// `Ok(Some(status))` means the chunk is fully accepted, `Ok(None)` means the
/// server holds a prefix of it and the rest must be sent again. A report that
/// is behind bytes already acknowledged, ahead of bytes ever sent, or
/// finalized at the wrong size is a permanent protocol failure.
fn reconcile(status: &SessionStatus, start: u64, end: u64, is_final: bool) -> Result<Option<SessionStatus>> {
    let committed = status.committed_size;
    if committed < start {
        return Err(Status::new(
            StatusCode::DataLoss,
            format!("server reports {committed} committed bytes, but {start} were already acknowledged"),
        ));
    }
    if committed > end {
        return Err(Status::new(
            StatusCode::DataLoss,
            format!("server reports {committed} committed bytes, but only {end} were sent"),
        ));
    }
    match &status.metadata {
        Some(_) if !is_final => Err(Status::new(
            StatusCode::DataLoss,
            "server finalized the upload before the final chunk",
        )),
        Some(_) if committed != end => Err(Status::new(
            StatusCode::DataLoss,
            format!("server finalized the object at {committed} bytes, expected {end}"),
        )),
        Some(_) => Ok(Some(status.clone())),
        None if !is_final && committed == end => Ok(Some(status.clone())),
        None => Ok(None),
    }
}
