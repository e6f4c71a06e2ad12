//! `resup status [session-id]` – show upload session progress.

use anyhow::Result;
use resup_core::local::LocalObjectService;
use resup_core::transport::UploadTransport;

pub fn run_status(svc: &LocalObjectService, session_id: Option<&str>) -> Result<()> {
    if let Some(id) = session_id {
        let status = svc.query_session(id)?;
        match status.metadata {
            Some(meta) => println!("{}", serde_json::to_string_pretty(&meta)?),
            None => println!("{id}  in progress, {} bytes committed", status.committed_size),
        }
        return Ok(());
    }

    let ids = svc.pending_sessions()?;
    if ids.is_empty() {
        println!("No pending upload sessions.");
        return Ok(());
    }
    println!("{:<34} {}", "SESSION", "COMMITTED");
    for id in ids {
        let status = svc.query_session(&id)?;
        println!("{:<34} {}", id, status.committed_size);
    }
    Ok(())
}
