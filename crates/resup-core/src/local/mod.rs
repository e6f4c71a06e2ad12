//! Filesystem-backed object service implementing [`UploadTransport`].
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<bucket>/<name>                  object data
//! <root>/.metadata/<bucket>/<name>.json   object metadata
//! <root>/.uploads/<id>.json               upload session record
//! <root>/.uploads/<id>.part               bytes received so far
//! ```
//!
//! Session records live on disk, so a session created by one process can be
//! resumed by another. All requests are serialized by a single mutex per
//! service instance.

mod part;

use crate::checksum;
use crate::object::{ObjectDestination, ObjectMetadata, WriteOptions};
use crate::status::{Result, Status, StatusCode};
use crate::transport::{
    CreateSessionRequest, SessionStatus, UploadChunkRequest, UploadTransport, UPLOAD_QUANTUM,
};
use part::PartFile;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const UPLOADS_DIR: &str = ".uploads";
const METADATA_DIR: &str = ".metadata";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    id: String,
    destination: ObjectDestination,
    #[serde(default)]
    options: WriteOptions,
    created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    finalized: Option<ObjectMetadata>,
}

#[derive(Debug)]
pub struct LocalObjectService {
    root: PathBuf,
    alignment: usize,
    lock: Mutex<()>,
}

impl LocalObjectService {
    /// Open (creating if needed) a service rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(UPLOADS_DIR))?;
        fs::create_dir_all(root.join(METADATA_DIR))?;
        Ok(Self {
            root,
            alignment: UPLOAD_QUANTUM,
            lock: Mutex::new(()),
        })
    }

    /// Override the alignment required for non-final chunks.
    pub fn with_chunk_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current metadata of an object, `None` if it does not exist.
    pub fn object_metadata(&self, destination: &ObjectDestination) -> Result<Option<ObjectMetadata>> {
        let _guard = self.lock();
        self.load_object_metadata(destination)
    }

    /// Full contents of a finalized object.
    pub fn read_object(&self, destination: &ObjectDestination) -> Result<Vec<u8>> {
        let path = self.object_path(destination)?;
        let _guard = self.lock();
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Status::new(StatusCode::NotFound, format!("object {destination} not found"))
            }
            _ => Status::from(e),
        })
    }

    /// Ids of sessions that have not been finalized yet.
    pub fn pending_sessions(&self) -> Result<Vec<String>> {
        let _guard = self.lock();
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join(UPLOADS_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(record) = part::read_json::<SessionRecord>(&path)? else {
                continue;
            };
            if record.finalized.is_none() {
                ids.push(record.id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn object_path(&self, destination: &ObjectDestination) -> Result<PathBuf> {
        validate_destination(destination)?;
        Ok(self.root.join(&destination.bucket).join(&destination.name))
    }

    fn metadata_path(&self, destination: &ObjectDestination) -> Result<PathBuf> {
        validate_destination(destination)?;
        Ok(self
            .root
            .join(METADATA_DIR)
            .join(&destination.bucket)
            .join(format!("{}.json", destination.name)))
    }

    fn record_path(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.root.join(UPLOADS_DIR).join(format!("{session_id}.json")))
    }

    fn part_path(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.root.join(UPLOADS_DIR).join(format!("{session_id}.part")))
    }

    fn load_object_metadata(&self, destination: &ObjectDestination) -> Result<Option<ObjectMetadata>> {
        Ok(part::read_json(&self.metadata_path(destination)?)?)
    }

    fn load_record(&self, session_id: &str) -> Result<SessionRecord> {
        match part::read_json(&self.record_path(session_id)?)? {
            Some(record) => Ok(record),
            None => Err(Status::new(
                StatusCode::NotFound,
                format!("upload session {session_id} not found"),
            )),
        }
    }

    fn check_preconditions(&self, destination: &ObjectDestination, options: &WriteOptions) -> Result<Option<ObjectMetadata>> {
        let current = self.load_object_metadata(destination)?;
        let (generation, metageneration) = match &current {
            Some(meta) => (meta.generation, Some(meta.metageneration)),
            None => (0, None),
        };
        options.preconditions.check(generation, metageneration)?;
        Ok(current)
    }

    fn finalize(&self, record: &mut SessionRecord, part: PartFile, size: u64) -> Result<ObjectMetadata> {
        let current = self.check_preconditions(&record.destination, &record.options)?;
        let sha256 = checksum::sha256_reader(part.reader()?)?;
        let meta = ObjectMetadata {
            bucket: record.destination.bucket.clone(),
            name: record.destination.name.clone(),
            size,
            generation: current.map_or(1, |m| m.generation + 1),
            metageneration: 1,
            content_type: record.options.content_type.clone(),
            sha256,
            metadata: record.options.metadata.clone(),
            time_created: unix_now(),
        };

        part.finalize(&self.object_path(&record.destination)?)?;
        part::write_json(&self.metadata_path(&record.destination)?, &meta)?;
        record.finalized = Some(meta.clone());
        part::write_json(&self.record_path(&record.id)?, &*record)?;
        tracing::info!(
            session_id = %record.id,
            destination = %record.destination,
            size,
            generation = meta.generation,
            "object finalized"
        );
        Ok(meta)
    }
}

impl UploadTransport for LocalObjectService {
    fn create_session(&self, request: &CreateSessionRequest) -> Result<String> {
        validate_destination(&request.destination)?;
        let _guard = self.lock();
        self.check_preconditions(&request.destination, &request.options)?;

        let id = hex::encode(rand::random::<[u8; 16]>());
        PartFile::create(&self.part_path(&id)?)?;
        let record = SessionRecord {
            id: id.clone(),
            destination: request.destination.clone(),
            options: request.options.clone(),
            created_at: unix_now(),
            finalized: None,
        };
        part::write_json(&self.record_path(&id)?, &record)?;
        tracing::debug!(session_id = %id, destination = %request.destination, "session created");
        Ok(id)
    }

    fn query_session(&self, session_id: &str) -> Result<SessionStatus> {
        let _guard = self.lock();
        let record = self.load_record(session_id)?;
        if let Some(meta) = record.finalized {
            return Ok(SessionStatus::done(meta));
        }
        let part = PartFile::open_existing(&self.part_path(session_id)?)?;
        Ok(SessionStatus::in_progress(part.len()?))
    }

    fn upload_chunk(&self, request: &UploadChunkRequest<'_>) -> Result<SessionStatus> {
        let _guard = self.lock();
        let mut record = self.load_record(request.session_id)?;

        if let Some(meta) = &record.finalized {
            return match request.total_size {
                Some(total) if total == meta.size => Ok(SessionStatus::done(meta.clone())),
                _ => Err(Status::new(
                    StatusCode::FailedPrecondition,
                    format!("upload session {} is already finalized", record.id),
                )),
            };
        }

        let part = PartFile::open_existing(&self.part_path(&record.id)?)?;
        let committed = part.len()?;
        if request.offset > committed {
            return Err(Status::new(
                StatusCode::InvalidArgument,
                format!(
                    "chunk offset {} is beyond the committed size {committed}",
                    request.offset
                ),
            ));
        }
        match request.total_size {
            Some(total) if total != request.end() || total < committed => {
                return Err(Status::new(
                    StatusCode::InvalidArgument,
                    format!(
                        "total size {total} does not match the upload ({} bytes sent, {committed} committed)",
                        request.end()
                    ),
                ));
            }
            None if request.end() % self.alignment as u64 != 0 => {
                return Err(Status::new(
                    StatusCode::InvalidArgument,
                    format!(
                        "non-final chunk must end on a multiple of {} bytes",
                        self.alignment
                    ),
                ));
            }
            _ => {}
        }

        // Bytes before `committed` were already persisted by an earlier request.
        let skip = (committed - request.offset).min(request.payload.len() as u64) as usize;
        let fresh = &request.payload[skip..];
        if !fresh.is_empty() {
            part.write_at(committed, fresh)?;
            part.sync()?;
        }
        let committed = committed + fresh.len() as u64;

        match request.total_size {
            Some(total) => {
                let meta = self.finalize(&mut record, part, total)?;
                Ok(SessionStatus::done(meta))
            }
            None => Ok(SessionStatus::in_progress(committed)),
        }
    }

    fn chunk_alignment(&self) -> usize {
        self.alignment
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn validate_session_id(id: &str) -> Result<()> {
    if id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(Status::new(
            StatusCode::NotFound,
            format!("upload session {id:?} not found"),
        ))
    }
}

/// Buckets are a single path component; object names may contain `/` but
/// must stay below the bucket directory.
fn validate_destination(destination: &ObjectDestination) -> Result<()> {
    let invalid = |what: &str| {
        Status::new(
            StatusCode::InvalidArgument,
            format!("invalid {what} in {destination}"),
        )
    };
    let bucket = &destination.bucket;
    if bucket.is_empty() || bucket.starts_with('.') || bucket.contains(['/', '\\']) {
        return Err(invalid("bucket name"));
    }
    let segments_ok = destination
        .name
        .split(['/', '\\'])
        .all(|seg| !seg.is_empty() && seg != "." && seg != "..");
    if !segments_ok {
        return Err(invalid("object name"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Preconditions;

    const ALIGN: usize = 4;

    fn service(dir: &Path) -> LocalObjectService {
        LocalObjectService::open(dir).unwrap().with_chunk_alignment(ALIGN)
    }

    fn create(svc: &LocalObjectService, name: &str, options: WriteOptions) -> Result<String> {
        svc.create_session(&CreateSessionRequest {
            destination: ObjectDestination::new("bkt", name),
            options,
        })
    }

    fn chunk<'a>(id: &'a str, offset: u64, payload: &'a [u8], total: Option<u64>) -> UploadChunkRequest<'a> {
        UploadChunkRequest {
            session_id: id,
            offset,
            payload,
            total_size: total,
        }
    }

    #[test]
    fn upload_in_chunks_and_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let id = create(&svc, "dir/obj.txt", WriteOptions::default().with_content_type("text/plain")).unwrap();
        assert_eq!(id.len(), 32);
        assert_eq!(svc.query_session(&id).unwrap(), SessionStatus::in_progress(0));

        let s = svc.upload_chunk(&chunk(&id, 0, b"abcd", None)).unwrap();
        assert_eq!(s.committed_size, 4);
        let s = svc.upload_chunk(&chunk(&id, 4, b"ef", Some(6))).unwrap();
        let meta = s.metadata.unwrap();
        assert_eq!(meta.size, 6);
        assert_eq!(meta.generation, 1);
        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));
        assert_eq!(meta.sha256, checksum::sha256_bytes(b"abcdef"));

        let dest = ObjectDestination::new("bkt", "dir/obj.txt");
        assert_eq!(svc.read_object(&dest).unwrap(), b"abcdef");
        assert_eq!(svc.object_metadata(&dest).unwrap(), Some(meta.clone()));
        assert!(svc.query_session(&id).unwrap().is_done());
        assert!(svc.pending_sessions().unwrap().is_empty());
    }

    #[test]
    fn overlapping_prefix_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let id = create(&svc, "o", WriteOptions::default()).unwrap();
        svc.upload_chunk(&chunk(&id, 0, b"abcd", None)).unwrap();
        // Resend of the same chunk plus more.
        let s = svc.upload_chunk(&chunk(&id, 0, b"abcdefgh", None)).unwrap();
        assert_eq!(s.committed_size, 8);
        svc.upload_chunk(&chunk(&id, 8, b"", Some(8))).unwrap();
        assert_eq!(svc.read_object(&ObjectDestination::new("bkt", "o")).unwrap(), b"abcdefgh");
    }

    #[test]
    fn rejects_gaps_and_bad_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let id = create(&svc, "o", WriteOptions::default()).unwrap();

        let gap = svc.upload_chunk(&chunk(&id, 4, b"abcd", None)).unwrap_err();
        assert_eq!(gap.code(), StatusCode::InvalidArgument);
        let misaligned = svc.upload_chunk(&chunk(&id, 0, b"abc", None)).unwrap_err();
        assert_eq!(misaligned.code(), StatusCode::InvalidArgument);
        let wrong_total = svc.upload_chunk(&chunk(&id, 0, b"abc", Some(5))).unwrap_err();
        assert_eq!(wrong_total.code(), StatusCode::InvalidArgument);
        assert_eq!(svc.query_session(&id).unwrap().committed_size, 0);
    }

    #[test]
    fn repeated_final_chunk_returns_stored_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let id = create(&svc, "o", WriteOptions::default()).unwrap();
        let first = svc.upload_chunk(&chunk(&id, 0, b"xyz", Some(3))).unwrap();
        let again = svc.upload_chunk(&chunk(&id, 0, b"xyz", Some(3))).unwrap();
        assert_eq!(first, again);
        let late = svc.upload_chunk(&chunk(&id, 0, b"abcd", None)).unwrap_err();
        assert_eq!(late.code(), StatusCode::FailedPrecondition);
    }

    #[test]
    fn empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let id = create(&svc, "empty", WriteOptions::default()).unwrap();
        let meta = svc.upload_chunk(&chunk(&id, 0, b"", Some(0))).unwrap().metadata.unwrap();
        assert_eq!(meta.size, 0);
        assert!(svc.read_object(&ObjectDestination::new("bkt", "empty")).unwrap().is_empty());
    }

    #[test]
    fn generation_increments_on_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        for expected in 1..=2 {
            let id = create(&svc, "o", WriteOptions::default()).unwrap();
            let meta = svc.upload_chunk(&chunk(&id, 0, b"v", Some(1))).unwrap().metadata.unwrap();
            assert_eq!(meta.generation, expected);
        }
    }

    #[test]
    fn preconditions_checked_at_create_and_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let only_new = WriteOptions::default().with_preconditions(Preconditions::does_not_exist());

        let racer = create(&svc, "o", only_new.clone()).unwrap();
        let winner = create(&svc, "o", WriteOptions::default()).unwrap();
        svc.upload_chunk(&chunk(&winner, 0, b"first", Some(5))).unwrap();

        // The object appeared after the racer's session was created.
        let err = svc.upload_chunk(&chunk(&racer, 0, b"second", Some(6))).unwrap_err();
        assert_eq!(err.code(), StatusCode::FailedPrecondition);
        assert_eq!(svc.read_object(&ObjectDestination::new("bkt", "o")).unwrap(), b"first");

        let err = create(&svc, "o", only_new).unwrap_err();
        assert_eq!(err.code(), StatusCode::FailedPrecondition);
    }

    #[test]
    fn sessions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let svc = service(dir.path());
            let id = create(&svc, "o", WriteOptions::default()).unwrap();
            svc.upload_chunk(&chunk(&id, 0, b"abcd", None)).unwrap();
            id
        };
        let svc = service(dir.path());
        assert_eq!(svc.pending_sessions().unwrap(), vec![id.clone()]);
        assert_eq!(svc.query_session(&id).unwrap().committed_size, 4);
    }

    #[test]
    fn unknown_session_and_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let err = svc.query_session("0123456789abcdef0123456789abcdef").unwrap_err();
        assert_eq!(err.code(), StatusCode::NotFound);
        assert_eq!(svc.query_session("../../etc").unwrap_err().code(), StatusCode::NotFound);

        for (bucket, name) in [("", "o"), (".uploads", "o"), ("b/c", "o"), ("b", ""), ("b", "../o"), ("b", "/abs"), ("b", "a/./b")] {
            let err = svc
                .create_session(&CreateSessionRequest {
                    destination: ObjectDestination::new(bucket, name),
                    options: WriteOptions::default(),
                })
                .unwrap_err();
            assert_eq!(err.code(), StatusCode::InvalidArgument, "{bucket}/{name}");
        }
    }
}
