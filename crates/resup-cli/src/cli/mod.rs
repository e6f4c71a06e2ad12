//! CLI for resup resumable uploads.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use resup_core::config;
use resup_core::local::LocalObjectService;
use resup_core::UploadClient;
use std::path::PathBuf;
use std::sync::Arc;

use commands::{run_checksum, run_resume, run_status, run_upload, UploadRequest};

/// Top-level CLI for resup.
#[derive(Debug, Parser)]
#[command(name = "resup")]
#[command(about = "resup: resumable, retrying object uploads", long_about = None)]
pub struct Cli {
    /// Root directory of the object store (default: config storage_root, then XDG data dir).
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Upload a file as a new object.
    Upload {
        /// File to upload.
        file: PathBuf,
        /// Destination bucket.
        bucket: String,
        /// Destination object name (default: the file name).
        object: Option<String>,
        #[arg(long)]
        content_type: Option<String>,
        /// Only succeed if the object's current generation matches (0 = must not exist).
        #[arg(long, value_name = "GEN")]
        if_generation_match: Option<i64>,
        /// Chunk size in bytes (rounded up to 256 KiB).
        #[arg(long, value_name = "BYTES")]
        chunk_size: Option<usize>,
        /// Suspend once at least this many bytes are committed and print the session id.
        #[arg(long, value_name = "BYTES")]
        suspend_after: Option<u64>,
    },

    /// Continue a suspended or interrupted upload from the same file.
    Resume {
        /// Session id printed by `upload`.
        session_id: String,
        /// File being uploaded; read from the committed offset.
        file: PathBuf,
        #[arg(long, value_name = "BYTES")]
        chunk_size: Option<usize>,
    },

    /// Show pending upload sessions, or one session's progress.
    Status {
        session_id: Option<String>,
    },

    /// Compute SHA-256 of a file (compare with an object's sha256).
    Checksum {
        /// Path to the file.
        path: PathBuf,
    },
}

impl CliCommand {
    pub fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let mut cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        let root = match cli.root.clone().or_else(|| cfg.storage_root.clone()) {
            Some(root) => root,
            None => config::default_storage_root()?,
        };
        let open_service = || -> Result<Arc<LocalObjectService>> {
            tracing::debug!(root = %root.display(), "opening object store");
            Ok(Arc::new(LocalObjectService::open(&root)?))
        };

        match cli.command {
            CliCommand::Upload {
                file,
                bucket,
                object,
                content_type,
                if_generation_match,
                chunk_size,
                suspend_after,
            } => {
                if let Some(size) = chunk_size {
                    cfg.chunk_size_bytes = size;
                }
                cfg.validate()?;
                let client = UploadClient::new(open_service()?, cfg);
                let request = UploadRequest {
                    file,
                    bucket,
                    object,
                    content_type,
                    if_generation_match,
                    suspend_after,
                };
                run_upload(&client, &request)?;
            }
            CliCommand::Resume {
                session_id,
                file,
                chunk_size,
            } => {
                if let Some(size) = chunk_size {
                    cfg.chunk_size_bytes = size;
                }
                cfg.validate()?;
                let client = UploadClient::new(open_service()?, cfg);
                run_resume(&client, &session_id, &file)?;
            }
            CliCommand::Status { session_id } => {
                run_status(open_service()?.as_ref(), session_id.as_deref())?
            }
            CliCommand::Checksum { path } => run_checksum(&path)?,
        }

        Ok(())
    }
}
