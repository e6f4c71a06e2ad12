//! `resup upload <file> <bucket> [object]` – upload a file as a new object.

use anyhow::{Context, Result};
use resup_core::{ObjectDestination, ObjectWriteStream, UploadClient, WriteOptions};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: PathBuf,
    pub bucket: String,
    pub object: Option<String>,
    pub content_type: Option<String>,
    pub if_generation_match: Option<i64>,
    pub suspend_after: Option<u64>,
}

impl UploadRequest {
    fn object_name(&self) -> Result<String> {
        if let Some(name) = &self.object {
            return Ok(name.clone());
        }
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("cannot derive an object name from {}", self.file.display()))
    }

    fn write_options(&self) -> WriteOptions {
        let mut options = WriteOptions::default();
        if let Some(ct) = &self.content_type {
            options = options.with_content_type(ct.clone());
        }
        if let Some(generation) = self.if_generation_match {
            options = options.with_if_generation_match(generation);
        }
        options
    }
}

pub fn run_upload(client: &UploadClient, request: &UploadRequest) -> Result<()> {
    let file = File::open(&request.file)
        .with_context(|| format!("open {}", request.file.display()))?;
    let destination = ObjectDestination::new(request.bucket.clone(), request.object_name()?);
    let mut stream = client.write_object(destination.clone(), request.write_options())?;
    println!("session {}", stream.session_id());
    tracing::info!(session_id = %stream.session_id(), %destination, file = %request.file.display(), "upload started");

    finish(&mut stream, file, &request.file, request.suspend_after)
}

/// Copy `reader` into `stream`, then close it (or suspend once `suspend_after`
/// bytes are committed) and print the outcome.
pub(super) fn finish(
    stream: &mut ObjectWriteStream,
    mut reader: impl Read,
    path: &Path,
    suspend_after: Option<u64>,
) -> Result<()> {
    let mut buf = vec![0u8; stream.chunk_size()];
    loop {
        if matches!(suspend_after, Some(limit) if stream.committed_size() >= limit) {
            let committed = stream.committed_size();
            let id = stream.suspend()?;
            println!("suspended {id} at {committed} bytes");
            println!("continue with: resup resume {id} {}", path.display());
            return Ok(());
        }
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        stream.write(&buf[..n])?;
    }

    let meta = stream.close()?;
    println!("{}", serde_json::to_string_pretty(&meta)?);
    Ok(())
}
