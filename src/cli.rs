// Command line flags. Defaults match the long-standing upload sample so
// existing invocations keep working.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{validate_chunk_size, DEFAULT_MAX_RETRIES};

/// Upload a video file with a resumable transfer that retries transient
/// failures.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Video file to upload
    #[arg(long)]
    pub file: PathBuf,

    /// Video title
    #[arg(long, default_value = "Test Title")]
    pub title: String,

    /// Video description
    #[arg(long, default_value = "Test Description")]
    pub description: String,

    /// Numeric video category
    #[arg(long, default_value = "22")]
    pub category: String,

    /// Comma-separated video keywords
    #[arg(long, default_value = "")]
    pub keywords: String,

    /// Video privacy status: public, private or unlisted
    #[arg(long, alias = "privacyStatus", default_value = "public")]
    pub privacy_status: String,

    /// How many times a transient failure is retried before giving up
    #[arg(long, env = "UPLOAD_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Bytes per request, a multiple of 262144. Sends the whole file at once
    /// when omitted.
    #[arg(long, value_parser = parse_chunk_size)]
    pub chunk_size: Option<u64>,

    /// Abort the upload once this many seconds have passed. A backoff sleep
    /// ends early, but a request already in flight runs to completion first
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Never prompt for an access token
    #[arg(long)]
    pub no_prompt: bool,
}

fn parse_chunk_size(s: &str) -> Result<u64, String> {
    let size = s.parse::<u64>().map_err(|e| e.to_string())?;
    validate_chunk_size(size)
}
