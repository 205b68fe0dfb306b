// Library root
// -----------
// The binary (`main.rs`) is a thin wrapper around these modules.
//
// Module responsibilities:
// - `upload`: the resumable upload driver (retry loop, backoff, cancellation).
// - `api`: HTTP client and the resumable insert operation the driver pushes.
// - `metadata`: validation and shape of the video metadata body.
// - `auth`: finding the access token and building an authenticated client.
// - `config`: retry policy and endpoint settings.
// - `cli` / `ui`: flag parsing and the terminal flow around one upload.
pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod metadata;
pub mod ui;
pub mod upload;

pub use error::{ApiError, MetadataError, UploadError};
pub use upload::{Advance, CancelToken, UploadDriver, UploadOperation, UploadProgress, UploadedVideo};
