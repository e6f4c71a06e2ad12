//! In-memory upload service with scripted fault injection for integration tests.
//!
//! Behaves like a well-behaved resumable upload server (append-only sessions,
//! overlapping prefixes skipped, preconditions at create and finalize) until a
//! queued fault is popped for the next request of a given kind.

use resup_core::object::{ObjectDestination, ObjectMetadata, WriteOptions};
use resup_core::status::{Result, Status, StatusCode};
use resup_core::transport::{
    CreateSessionRequest, SessionStatus, UploadChunkRequest, UploadTransport,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Alignment used by the scripted server unless overridden.
pub const TEST_ALIGNMENT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail before touching any state.
    Reject(StatusCode),
    /// Persist the chunk, then report a failure (lost response).
    PersistThenFail(StatusCode),
    /// Persist only the first `n` new bytes and report the short offset.
    Partial(usize),
    /// Persist the chunk with its last byte flipped.
    Corrupt,
}

/// One upload request as received by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadCall {
    pub offset: u64,
    pub len: usize,
    pub is_final: bool,
}

#[derive(Debug)]
struct Session {
    destination: ObjectDestination,
    options: WriteOptions,
    data: Vec<u8>,
    finalized: Option<ObjectMetadata>,
}

#[derive(Debug, Default)]
struct State {
    sessions: HashMap<String, Session>,
    objects: HashMap<ObjectDestination, (ObjectMetadata, Vec<u8>)>,
    create_faults: VecDeque<Fault>,
    query_faults: VecDeque<Fault>,
    upload_faults: VecDeque<Fault>,
    uploads: Vec<UploadCall>,
    creates: usize,
    queries: usize,
    /// Payload bytes received that the server already held.
    duplicate_bytes: u64,
    next_id: u64,
}

#[derive(Debug)]
pub struct ScriptedServer {
    state: Mutex<State>,
    alignment: usize,
}

impl Default for ScriptedServer {
    fn default() -> Self {
        Self::new(TEST_ALIGNMENT)
    }
}

impl ScriptedServer {
    pub fn new(alignment: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            alignment,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn fail_creates(&self, faults: impl IntoIterator<Item = Fault>) {
        self.state().create_faults.extend(faults);
    }

    pub fn fail_queries(&self, faults: impl IntoIterator<Item = Fault>) {
        self.state().query_faults.extend(faults);
    }

    pub fn fail_uploads(&self, faults: impl IntoIterator<Item = Fault>) {
        self.state().upload_faults.extend(faults);
    }

    /// Store an object directly, as if another writer had uploaded it.
    pub fn put_object(&self, destination: &ObjectDestination, data: &[u8]) -> ObjectMetadata {
        let mut st = self.state();
        let generation = st.objects.get(destination).map_or(1, |(m, _)| m.generation + 1);
        let meta = metadata(destination, &WriteOptions::default(), data, generation);
        st.objects.insert(destination.clone(), (meta.clone(), data.to_vec()));
        meta
    }

    pub fn object(&self, destination: &ObjectDestination) -> Option<Vec<u8>> {
        self.state().objects.get(destination).map(|(_, d)| d.clone())
    }

    pub fn uploads(&self) -> Vec<UploadCall> {
        self.state().uploads.clone()
    }

    pub fn creates(&self) -> usize {
        self.state().creates
    }

    pub fn queries(&self) -> usize {
        self.state().queries
    }

    pub fn duplicate_bytes(&self) -> u64 {
        self.state().duplicate_bytes
    }

    pub fn committed(&self, session_id: &str) -> Option<u64> {
        self.state().sessions.get(session_id).map(|s| s.data.len() as u64)
    }
}

fn metadata(dest: &ObjectDestination, options: &WriteOptions, data: &[u8], generation: i64) -> ObjectMetadata {
    ObjectMetadata {
        bucket: dest.bucket.clone(),
        name: dest.name.clone(),
        size: data.len() as u64,
        generation,
        metageneration: 1,
        content_type: options.content_type.clone(),
        sha256: resup_core::checksum::sha256_bytes(data),
        metadata: options.metadata.clone(),
        time_created: 0,
    }
}

fn check_preconditions(st: &State, dest: &ObjectDestination, options: &WriteOptions) -> Result<i64> {
    let current = st.objects.get(dest).map(|(m, _)| m);
    let generation = current.map_or(0, |m| m.generation);
    options
        .preconditions
        .check(generation, current.map(|m| m.metageneration))?;
    Ok(generation)
}

impl UploadTransport for ScriptedServer {
    fn create_session(&self, request: &CreateSessionRequest) -> Result<String> {
        let mut st = self.state();
        st.creates += 1;
        match st.create_faults.pop_front() {
            Some(Fault::Reject(code)) => return Err(Status::new(code, "injected create failure")),
            Some(other) => panic!("unsupported create fault {other:?}"),
            None => {}
        }
        check_preconditions(&st, &request.destination, &request.options)?;
        st.next_id += 1;
        let id = format!("session-{}", st.next_id);
        st.sessions.insert(
            id.clone(),
            Session {
                destination: request.destination.clone(),
                options: request.options.clone(),
                data: Vec::new(),
                finalized: None,
            },
        );
        Ok(id)
    }

    fn query_session(&self, session_id: &str) -> Result<SessionStatus> {
        let mut st = self.state();
        st.queries += 1;
        match st.query_faults.pop_front() {
            Some(Fault::Reject(code)) => return Err(Status::new(code, "injected query failure")),
            Some(other) => panic!("unsupported query fault {other:?}"),
            None => {}
        }
        let Some(session) = st.sessions.get(session_id) else {
            return Err(Status::new(StatusCode::NotFound, "no such upload session"));
        };
        Ok(match &session.finalized {
            Some(meta) => SessionStatus::done(meta.clone()),
            None => SessionStatus::in_progress(session.data.len() as u64),
        })
    }

    fn upload_chunk(&self, request: &UploadChunkRequest<'_>) -> Result<SessionStatus> {
        let mut guard = self.state();
        let st = &mut *guard;
        st.uploads.push(UploadCall {
            offset: request.offset,
            len: request.payload.len(),
            is_final: request.is_final(),
        });
        let fault = st.upload_faults.pop_front();
        if let Some(Fault::Reject(code)) = fault {
            return Err(Status::new(code, "injected upload failure"));
        }

        let Some(session) = st.sessions.get_mut(request.session_id) else {
            return Err(Status::new(StatusCode::NotFound, "no such upload session"));
        };
        if let Some(meta) = &session.finalized {
            return Ok(SessionStatus::done(meta.clone()));
        }
        let committed = session.data.len() as u64;
        if request.offset > committed {
            return Err(Status::new(StatusCode::InvalidArgument, "offset beyond committed size"));
        }
        if !request.is_final() && request.end() % self.alignment as u64 != 0 {
            return Err(Status::new(StatusCode::InvalidArgument, "misaligned chunk"));
        }
        if matches!(request.total_size, Some(total) if total != request.end()) {
            return Err(Status::new(StatusCode::InvalidArgument, "total size mismatch"));
        }

        let skip = ((committed - request.offset) as usize).min(request.payload.len());
        st.duplicate_bytes += skip as u64;
        let mut fresh = &request.payload[skip..];
        if let Some(Fault::Partial(n)) = fault {
            fresh = &fresh[..n.min(fresh.len())];
        }
        session.data.extend_from_slice(fresh);
        if fault == Some(Fault::Corrupt) {
            if let Some(last) = session.data.last_mut() {
                *last ^= 0xff;
            }
        }
        let committed = session.data.len() as u64;

        let partial = matches!(fault, Some(Fault::Partial(_)));
        let status = match request.total_size {
            Some(total) if !partial && committed == total => {
                let dest = session.destination.clone();
                let options = session.options.clone();
                let generation = check_preconditions(st, &dest, &options)?;
                let session = st.sessions.get_mut(request.session_id).unwrap();
                let meta = metadata(&dest, &options, &session.data, generation + 1);
                session.finalized = Some(meta.clone());
                let data = session.data.clone();
                st.objects.insert(dest, (meta.clone(), data));
                SessionStatus::done(meta)
            }
            _ => SessionStatus::in_progress(committed),
        };

        match fault {
            Some(Fault::PersistThenFail(code)) => Err(Status::new(code, "injected failure after persist")),
            _ => Ok(status),
        }
    }

    fn chunk_alignment(&self) -> usize {
        self.alignment
    }
}
