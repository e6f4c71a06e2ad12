//! `resup resume <session-id> <file>` – continue an interrupted upload.

use anyhow::{bail, Context, Result};
use resup_core::{StreamState, UploadClient};
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;

use super::upload::finish;

pub fn run_resume(client: &UploadClient, session_id: &str, path: &Path) -> Result<()> {
    let mut stream = client.restore_object_write(session_id)?;
    if stream.state() == StreamState::ClosedGood {
        let meta = stream.close()?;
        println!("already finalized");
        println!("{}", serde_json::to_string_pretty(&meta)?);
        return Ok(());
    }

    let offset = stream.next_expected_offset();
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = file.metadata()?.len();
    if len < offset {
        bail!(
            "{} has {len} bytes but the session already committed {offset}",
            path.display()
        );
    }
    file.seek(SeekFrom::Start(offset))?;
    println!("resuming {session_id} at {offset} of {len} bytes");
    tracing::info!(session_id, offset, file = %path.display(), "upload resumed");

    finish(&mut stream, file, path, None)
}
