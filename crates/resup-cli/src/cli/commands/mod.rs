//! CLI command handlers, one file per command.

mod checksum;
mod resume;
mod status;
mod upload;

pub use checksum::run_checksum;
pub use resume::run_resume;
pub use status::run_status;
pub use upload::{run_upload, UploadRequest};
