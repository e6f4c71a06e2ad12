pub mod checksum;
pub mod client;
pub mod config;
pub mod control;
pub mod local;
pub mod logging;
pub mod object;
pub mod retry;
pub mod session;
pub mod status;
pub mod stream;
pub mod transport;

pub use client::UploadClient;
pub use object::{ObjectDestination, ObjectMetadata, Preconditions, WriteOptions};
pub use status::{ErrorKind, Result, RetryExit, Status, StatusCode};
pub use stream::{ObjectWriteStream, StreamState};
