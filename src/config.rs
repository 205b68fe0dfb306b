// Configuration values for the uploader. Retry behaviour is an explicit
// struct handed to the driver; endpoint and token locations come from the
// environment the same way the API client always has.

use std::path::PathBuf;
use std::time::Duration;

/// Default number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Server-side codes that usually clear up on their own.
pub const DEFAULT_RETRIABLE_STATUS_CODES: [u16; 4] = [500, 502, 503, 504];

/// Resumable chunks must be a multiple of this many bytes.
pub const CHUNK_GRANULARITY: u64 = 256 * 1024;

pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com";

const TOKEN_FILE_NAME: &str = ".video_upload_token";

/// Retry policy applied by [`crate::upload::UploadDriver`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Number of retries permitted; attempt `max_retries + 1` is never made.
    pub max_retries: u32,
    /// Status codes treated as transient.
    pub retriable_status_codes: Vec<u16>,
    /// Length of one backoff unit. The sleep before retry `n` is drawn from
    /// `[0, 2^n)` units.
    pub backoff_unit: Duration,
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_retriable_status(&self, status: u16) -> bool {
        self.retriable_status_codes.contains(&status)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retriable_status_codes: DEFAULT_RETRIABLE_STATUS_CODES.to_vec(),
            backoff_unit: Duration::from_secs(1),
        }
    }
}

/// Where the API lives and where the access token is kept.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
    pub token_path: PathBuf,
    /// Upper bound on a single request. `None` leaves requests unbounded,
    /// which a whole-file chunk on a slow link needs.
    pub request_timeout: Option<Duration>,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>, token_path: impl Into<PathBuf>) -> Self {
        let base_url = base_url.into();
        ApiConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            token_path: token_path.into(),
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Read `UPLOAD_API_BASE_URL`, `UPLOAD_TOKEN_FILE` and
    /// `UPLOAD_REQUEST_TIMEOUT_SECS`, falling back to the public endpoint, a
    /// dotfile in the home directory and no request timeout.
    pub fn from_env() -> Self {
        let base_url = std::env::var("UPLOAD_API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_API_BASE_URL.into());
        let token_path = std::env::var_os("UPLOAD_TOKEN_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(default_token_path);
        let request_timeout = std::env::var("UPLOAD_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|secs| secs.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        ApiConfig::new(base_url, token_path).with_request_timeout(request_timeout)
    }
}

fn default_token_path() -> PathBuf {
    let dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.join(TOKEN_FILE_NAME)
}

/// Check a user supplied chunk size against the protocol's granularity.
pub fn validate_chunk_size(chunk_size: u64) -> Result<u64, String> {
    if chunk_size == 0 || chunk_size % CHUNK_GRANULARITY != 0 {
        return Err(format!(
            "chunk size must be a positive multiple of {} bytes, got {}",
            CHUNK_GRANULARITY, chunk_size
        ));
    }
    Ok(chunk_size)
}
