use crate::config::{UploadConfig, MAX_CHUNK_SIZE};
use crate::control::CancelToken;
use crate::object::{ObjectDestination, WriteOptions};
use crate::session::UploadSession;
use crate::status::Result;
use crate::stream::{align_chunk_size, ObjectWriteStream};
use crate::transport::{CreateSessionRequest, UploadTransport};
use std::sync::Arc;

/// Entry point for uploads: owns the transport and the retry configuration.
///
/// Cheap to clone; every stream gets its own retry budget.
#[derive(Clone)]
pub struct UploadClient {
    transport: Arc<dyn UploadTransport>,
    config: UploadConfig,
    cancel: Option<CancelToken>,
}

impl UploadClient {
    pub fn new(transport: Arc<dyn UploadTransport>, config: UploadConfig) -> Self {
        Self {
            transport,
            config,
            cancel: None,
        }
    }

    /// Streams created after this call stop retrying once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Configured chunk size, capped at [`MAX_CHUNK_SIZE`] and rounded up to
    /// the transport's alignment.
    pub fn chunk_size(&self) -> usize {
        let requested = self.config.chunk_size_bytes.min(MAX_CHUNK_SIZE);
        align_chunk_size(requested, self.transport.chunk_alignment())
    }

    /// Start a new resumable upload to `destination`.
    pub fn write_object(
        &self,
        destination: ObjectDestination,
        options: WriteOptions,
    ) -> Result<ObjectWriteStream> {
        let request = CreateSessionRequest {
            destination,
            options,
        };
        let session = UploadSession::create(
            Arc::clone(&self.transport),
            &request,
            self.config.build_retrier(self.cancel.clone()),
        )?;
        Ok(ObjectWriteStream::new(session, self.chunk_size()))
    }

    /// Continue an upload started elsewhere. The returned stream expects the
    /// next byte at [`ObjectWriteStream::next_expected_offset`]; a finalized
    /// session yields a closed stream with its metadata.
    pub fn restore_object_write(&self, session_id: &str) -> Result<ObjectWriteStream> {
        let session = UploadSession::restore(
            Arc::clone(&self.transport),
            session_id,
            self.config.build_retrier(self.cancel.clone()),
        )?;
        Ok(ObjectWriteStream::new(session, self.chunk_size()))
    }
}
