//! Buffered, blocking object write stream on top of an upload session.
//!
//! Bytes are buffered until a full chunk is available; each full chunk is
//! committed before `write` returns. `close` sends whatever is left as the
//! final chunk and yields the object metadata. `suspend` abandons the local
//! stream while leaving the server session open; a new stream can pick it up
//! later from the session id.
//!
//! A stream that sees every byte of the object from offset 0 hashes it and
//! checks the digest the server reports at finalization.

use crate::object::ObjectMetadata;
use crate::session::{Chunk, SessionState, UploadSession};
use crate::status::{Result, Status, StatusCode};
use sha2::{Digest, Sha256};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Suspended,
    ClosedGood,
    ClosedBad,
}

#[derive(Debug)]
pub struct ObjectWriteStream {
    session: UploadSession,
    buffer: Vec<u8>,
    chunk_size: usize,
    state: StreamState,
    metadata: Option<Result<ObjectMetadata>>,
    /// Running digest of every byte written; `None` when the stream started
    /// after offset 0.
    hasher: Option<Sha256>,
}

/// Round `requested` up to a positive multiple of `alignment`.
pub fn align_chunk_size(requested: usize, alignment: usize) -> usize {
    let alignment = alignment.max(1);
    let chunks = requested.div_ceil(alignment).max(1);
    chunks.saturating_mul(alignment)
}

impl ObjectWriteStream {
    /// Bind a stream to `session`. A session that is already finalized yields
    /// a stream that is closed with its metadata available.
    pub fn new(session: UploadSession, chunk_size: usize) -> Self {
        let chunk_size = align_chunk_size(chunk_size, session.chunk_alignment());
        let (state, metadata) = match (session.state(), session.metadata()) {
            (SessionState::Done, Some(meta)) => (StreamState::ClosedGood, Some(Ok(meta.clone()))),
            _ => (StreamState::Open, None),
        };
        let hasher =
            (state == StreamState::Open && session.committed_size() == 0).then(Sha256::new);
        Self {
            session,
            buffer: Vec::with_capacity(if state == StreamState::Open { chunk_size } else { 0 }),
            chunk_size,
            state,
            metadata,
            hasher,
        }
    }

    /// Id to persist for resuming this upload from another stream.
    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == StreamState::Open
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Bytes the server has durably accepted.
    pub fn committed_size(&self) -> u64 {
        self.session.committed_size()
    }

    /// Offset of the next byte passed to `write`.
    pub fn next_expected_offset(&self) -> u64 {
        self.session.committed_size() + self.buffer.len() as u64
    }

    /// Final result; `None` until the stream is closed.
    pub fn metadata(&self) -> Option<&Result<ObjectMetadata>> {
        self.metadata.as_ref()
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    /// Buffer `data`, committing every chunk that fills up. Returns once all
    /// full chunks are durably committed.
    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        while !data.is_empty() {
            let target = self.chunk_target();
            let take = (target - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            if let Some(hasher) = &mut self.hasher {
                hasher.update(&data[..take]);
            }
            data = &data[take..];
            if self.buffer.len() == target {
                self.commit_buffer(false)?;
            }
        }
        Ok(())
    }

    /// Buffer length at which the next chunk is committed. Chunks end on
    /// multiples of the chunk size, so after a restore at an unaligned offset
    /// the first chunk is shorter.
    fn chunk_target(&self) -> usize {
        let into_chunk = (self.session.committed_size() % self.chunk_size as u64) as usize;
        self.chunk_size - into_chunk
    }

    /// Send the buffered tail as the final chunk and finalize the object.
    ///
    /// Closing an already closed stream returns the stored result.
    pub fn close(&mut self) -> Result<ObjectMetadata> {
        match self.state {
            StreamState::Open => {}
            StreamState::ClosedGood | StreamState::ClosedBad => return self.stored_result(),
            StreamState::Suspended => {
                return Err(Status::invalid_state("cannot close a suspended stream"))
            }
        }

        self.commit_buffer(true)?;
        let Some(meta) = self.session.metadata().cloned() else {
            let e = Status::new(
                StatusCode::Internal,
                "upload finalized without object metadata",
            );
            self.fail(e.clone());
            return Err(e);
        };
        if let Some(hasher) = self.hasher.take() {
            let local = hex::encode(hasher.finalize());
            if !meta.sha256.is_empty() && meta.sha256 != local {
                let e = Status::new(
                    StatusCode::DataLoss,
                    format!(
                        "object {}/{} has sha256 {}, but {local} was written",
                        meta.bucket, meta.name, meta.sha256
                    ),
                );
                tracing::error!(session_id = %self.session.id(), "{e}");
                self.fail(e.clone());
                return Err(e);
            }
        }
        tracing::info!(
            session_id = %self.session.id(),
            bucket = %meta.bucket,
            name = %meta.name,
            size = meta.size,
            generation = meta.generation,
            "upload finalized"
        );
        self.state = StreamState::ClosedGood;
        self.metadata = Some(Ok(meta.clone()));
        Ok(meta)
    }

    /// Stop using this stream without finalizing. Returns the session id to
    /// resume with. Buffered bytes that were not yet committed are dropped;
    /// resume from [`committed_size`](Self::committed_size).
    pub fn suspend(&mut self) -> Result<String> {
        if self.state != StreamState::Open {
            return Err(Status::invalid_state(format!(
                "cannot suspend a stream in state {:?}",
                self.state
            )));
        }
        if !self.buffer.is_empty() {
            tracing::warn!(
                session_id = %self.session.id(),
                dropped = self.buffer.len(),
                committed = self.session.committed_size(),
                "suspending with uncommitted buffered bytes"
            );
        }
        self.buffer = Vec::new();
        self.hasher = None;
        self.state = StreamState::Suspended;
        Ok(self.session.id().to_string())
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            StreamState::Open => Ok(()),
            StreamState::ClosedBad => self.stored_result().map(|_| ()),
            StreamState::ClosedGood => Err(Status::invalid_state("stream is closed")),
            StreamState::Suspended => Err(Status::invalid_state("stream is suspended")),
        }
    }

    fn stored_result(&self) -> Result<ObjectMetadata> {
        match &self.metadata {
            Some(result) => result.clone(),
            None => Err(Status::invalid_state("stream has no final result")),
        }
    }

    fn commit_buffer(&mut self, is_final: bool) -> Result<()> {
        let offset = self.session.committed_size();
        match self.session.commit_chunk(Chunk::new(offset, &self.buffer), is_final) {
            Ok(_) => {
                self.buffer.clear();
                Ok(())
            }
            Err(e) => {
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    fn fail(&mut self, status: Status) {
        self.state = StreamState::ClosedBad;
        self.buffer = Vec::new();
        self.metadata = Some(Err(status));
    }
}

impl io::Write for ObjectWriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ObjectWriteStream::write(self, buf)?;
        Ok(buf.len())
    }

    /// Only full chunks can be committed before close, so there is nothing
    /// to flush early.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ObjectWriteStream {
    fn drop(&mut self) {
        if self.state == StreamState::Open {
            tracing::warn!(
                session_id = %self.session.id(),
                committed = self.session.committed_size(),
                buffered = self.buffer.len(),
                "write stream dropped without close; upload session left open"
            );
        }
    }
}
