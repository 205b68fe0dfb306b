// Error types shared by the library modules. The binary wraps these in
// `anyhow` at the edges; inside the crate every failure stays typed so the
// upload driver can decide what is worth retrying.

use thiserror::Error;

use crate::config::RetryConfig;

/// Failure of a single request made by an upload operation.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error {status} occurred:\n{body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("access token contains characters not allowed in a header")]
    InvalidToken,

    #[error("{} changed size during upload", .0.display())]
    FileChanged(std::path::PathBuf),
}

impl ApiError {
    /// Whether retrying the same operation could plausibly succeed.
    ///
    /// Transport and I/O failures are retriable, except a request reqwest
    /// could not even build. A status error is
    /// retriable only when its code is listed in `config`. Everything else
    /// is fatal.
    pub fn is_retriable(&self, config: &RetryConfig) -> bool {
        match self {
            ApiError::Transport(e) => !e.is_builder(),
            ApiError::Io(_) => true,
            ApiError::Status { status, .. } => config.is_retriable_status(*status),
            ApiError::MalformedResponse(_)
            | ApiError::Json(_)
            | ApiError::InvalidToken
            | ApiError::FileChanged(_) => false,
        }
    }
}

/// Terminal failure of an upload driven by [`crate::upload::UploadDriver`].
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("no longer attempting to retry after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: ApiError },

    #[error(transparent)]
    Fatal(ApiError),

    #[error("the upload failed with an unexpected response: {0}")]
    UnexpectedResponse(serde_json::Value),

    #[error("upload cancelled")]
    Cancelled,
}

/// Rejections raised while building the metadata body.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MetadataError {
    #[error("invalid privacy status '{0}', expected one of: public, private, unlisted")]
    InvalidPrivacyStatus(String),

    #[error("category must be a numeric code, got '{0}'")]
    InvalidCategory(String),

    #[error("title cannot be empty")]
    EmptyTitle,
}
