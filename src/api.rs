// API client module: a small blocking HTTP client that talks to the video
// API with a bearer token, plus the resumable insert operation that the
// upload driver pushes forward one chunk at a time.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;
use std::path::{Path, PathBuf};

use reqwest::blocking::{Body, Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{redirect, Url};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::metadata::VideoMetadata;
use crate::upload::{Advance, UploadOperation, UploadProgress};

const INSERT_PATH: &str = "/upload/youtube/v3/videos";

/// Status the resumable protocol uses for "keep sending".
const RESUME_INCOMPLETE: u16 = 308;

/// Blocking client holding the base URL of the API and the access token
/// sent with every request.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: String,
    request_timeout: Option<Duration>,
}

impl ApiClient {
    /// Build a client for `config.base_url` that authenticates with `token`.
    ///
    /// Redirects are not followed: the resumable protocol answers `308` to
    /// every partial chunk and that answer must reach the caller. Requests
    /// only time out when `config.request_timeout` is set, since a single
    /// chunk may be the whole file.
    pub fn new(config: &ApiConfig, token: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(config.request_timeout)
            .build()?;
        Ok(ApiClient {
            client,
            base_url: config.base_url.clone(),
            token: token.to_string(),
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Helper to build the Authorization header map.
    fn auth_headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        let val = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|_| ApiError::InvalidToken)?;
        headers.insert(AUTHORIZATION, val);
        Ok(headers)
    }

    /// Prepare a resumable insert of `file_path`. No request is made until
    /// the returned operation is first advanced.
    pub fn insert_video(
        &self,
        file_path: &Path,
        metadata: &VideoMetadata,
        chunk_size: Option<u64>,
    ) -> Result<ResumableInsert, ApiError> {
        let file = File::open(file_path)?;
        let total_bytes = file.metadata()?.len();
        let body = serde_json::to_value(metadata)?;

        Ok(ResumableInsert {
            client: self.client.clone(),
            headers: self.auth_headers()?,
            init_url: format!(
                "{}{}?uploadType=resumable&part={}",
                self.base_url,
                INSERT_PATH,
                metadata.parts()
            ),
            metadata: body,
            path: file_path.to_path_buf(),
            file,
            mime_type: mime_type_for(file_path),
            total_bytes,
            chunk_size,
            offset: 0,
            session_uri: None,
            needs_resync: false,
        })
    }
}

/// One resumable insert in progress.
///
/// The first advance opens the upload session, every later one sends the
/// next chunk. After a failed advance the next one asks the server how many
/// bytes it already has, so only the missing tail is sent again.
pub struct ResumableInsert {
    client: Client,
    headers: HeaderMap,
    init_url: String,
    metadata: Value,
    path: PathBuf,
    file: File,
    mime_type: &'static str,
    total_bytes: u64,
    chunk_size: Option<u64>,
    offset: u64,
    session_uri: Option<String>,
    needs_resync: bool,
}

impl ResumableInsert {
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn session_uri(&self) -> Option<&str> {
        self.session_uri.as_deref()
    }

    fn step(&mut self) -> Result<Advance, ApiError> {
        let session = match &self.session_uri {
            Some(uri) => uri.clone(),
            None => {
                let uri = self.open_session()?;
                self.session_uri = Some(uri.clone());
                self.needs_resync = false;
                uri
            }
        };

        if self.needs_resync {
            if let Some(done) = self.query_status(&session)? {
                return Ok(done);
            }
            self.needs_resync = false;
        }

        self.send_chunk(&session)
    }

    fn open_session(&self) -> Result<String, ApiError> {
        info!(file = %self.path.display(), bytes = self.total_bytes, "opening upload session");
        let res = self
            .client
            .post(&self.init_url)
            .headers(self.headers.clone())
            .header("X-Upload-Content-Length", self.total_bytes.to_string())
            .header("X-Upload-Content-Type", self.mime_type)
            .json(&self.metadata)
            .send()?;
        let res = check_status(res)?;

        let location = res
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::MalformedResponse("upload session has no Location header".into()))?;
        session_url(&self.init_url, location).map(String::from)
    }

    /// Ask the server where it stands. Returns the final resource if the
    /// upload turned out to be complete already.
    fn query_status(&mut self, session: &str) -> Result<Option<Advance>, ApiError> {
        let res = self
            .client
            .put(session)
            .headers(self.headers.clone())
            .header(CONTENT_RANGE, format!("bytes */{}", self.total_bytes))
            .body(Vec::new())
            .send()?;

        match self.interpret(res)? {
            Advance::Progress(progress) => {
                debug!(offset = progress.bytes_sent, "resuming upload");
                Ok(None)
            }
            done @ Advance::Complete(_) => Ok(Some(done)),
        }
    }

    fn send_chunk(&mut self, session: &str) -> Result<Advance, ApiError> {
        let remaining = self.total_bytes - self.offset;
        let len = self.chunk_size.map_or(remaining, |size| size.min(remaining));

        if self.file.metadata()?.len() != self.total_bytes {
            return Err(ApiError::FileChanged(self.path.clone()));
        }
        let mut reader = self.file.try_clone()?;
        reader.seek(SeekFrom::Start(self.offset))?;
        let chunk = Body::sized(reader.take(len), len);

        let range = if len == 0 {
            format!("bytes */{}", self.total_bytes)
        } else {
            format!("bytes {}-{}/{}", self.offset, self.offset + len - 1, self.total_bytes)
        };
        debug!(content_range = %range, "sending chunk");

        let res = self
            .client
            .put(session)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, self.mime_type)
            .header(CONTENT_RANGE, range)
            .body(chunk)
            .send()?;
        self.interpret(res)
    }

    /// Turn a session response into progress or the final resource, moving
    /// `offset` to what the server acknowledged.
    fn interpret(&mut self, res: Response) -> Result<Advance, ApiError> {
        if res.status().as_u16() == RESUME_INCOMPLETE {
            let acknowledged = acknowledged_bytes(res.headers())?;
            if acknowledged > self.total_bytes {
                return Err(ApiError::MalformedResponse(format!(
                    "server acknowledged {} of {} bytes",
                    acknowledged, self.total_bytes
                )));
            }
            self.offset = acknowledged;
            return Ok(Advance::Progress(UploadProgress::new(self.offset, self.total_bytes)));
        }

        let res = check_status(res)?;
        let text = res.text()?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ApiError::MalformedResponse(format!("{}: {}", e, text)))?;
        self.offset = self.total_bytes;
        Ok(Advance::Complete(value))
    }
}

impl UploadOperation for ResumableInsert {
    fn advance(&mut self) -> Result<Advance, ApiError> {
        let result = self.step();
        if result.is_err() {
            self.needs_resync = self.session_uri.is_some();
        }
        result
    }
}

/// Resolve the `Location` of a new session. Absolute http(s) URLs are taken
/// as they are and absolute paths are joined onto the insert endpoint;
/// anything else cannot be sent to.
fn session_url(init_url: &str, location: &str) -> Result<Url, ApiError> {
    let malformed = || ApiError::MalformedResponse(format!("unusable session Location {:?}", location));
    let url = if location.starts_with('/') {
        Url::parse(init_url)
            .and_then(|base| base.join(location))
            .map_err(|_| malformed())?
    } else {
        Url::parse(location).map_err(|_| malformed())?
    };
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(malformed()),
    }
}

/// Map a non-success answer to [`ApiError::Status`] carrying the body.
fn check_status(res: Response) -> Result<Response, ApiError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Parse `Range: bytes=0-N` into the number of bytes the server holds.
/// A missing header means nothing has been stored yet.
fn acknowledged_bytes(headers: &HeaderMap) -> Result<u64, ApiError> {
    let Some(value) = headers.get(RANGE) else {
        return Ok(0);
    };
    let malformed = || ApiError::MalformedResponse(format!("unexpected Range header {:?}", value));
    let text = value.to_str().map_err(|_| malformed())?;
    let last = text
        .strip_prefix("bytes=0-")
        .and_then(|end| end.trim().parse::<u64>().ok())
        .ok_or_else(malformed)?;
    Ok(last + 1)
}

fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("flv") => "video/x-flv",
        Some("3gp") => "video/3gpp",
        Some("mpg") | Some("mpeg") => "video/mpeg",
        Some("wmv") => "video/x-ms-wmv",
        _ => "application/octet-stream",
    }
}

impl std::fmt::Debug for ResumableInsert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumableInsert")
            .field("path", &self.path)
            .field("total_bytes", &self.total_bytes)
            .field("offset", &self.offset)
            .field("session_uri", &self.session_uri)
            .finish()
    }
}
