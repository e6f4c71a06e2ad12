#![allow(dead_code)]

pub mod scripted_server;

use resup_core::config::{BackoffConfig, RetryConfig, UploadConfig};
use resup_core::UploadClient;
use scripted_server::ScriptedServer;
use std::sync::Arc;

/// Millisecond-scale backoff so retry tests stay fast.
pub fn fast_config(chunk_size: usize, max_attempts: u32) -> UploadConfig {
    UploadConfig {
        chunk_size_bytes: chunk_size,
        storage_root: None,
        retry: RetryConfig {
            max_attempts: Some(max_attempts),
            max_duration_secs: Some(30.0),
        },
        backoff: BackoffConfig {
            initial_delay_secs: 0.001,
            max_delay_secs: 0.01,
            scaling: 2.0,
            jitter: 0.0,
        },
    }
}

pub fn scripted_client(chunk_size: usize, max_attempts: u32) -> (Arc<ScriptedServer>, UploadClient) {
    let server = Arc::new(ScriptedServer::default());
    let client = UploadClient::new(server.clone(), fast_config(chunk_size, max_attempts));
    (server, client)
}

/// Deterministic, non-repeating-per-chunk test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}
