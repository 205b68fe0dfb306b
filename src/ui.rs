// UI layer: checks the input, shows a progress bar while the driver pushes
// the file up and leaves the exit decision to `main`.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use crate::auth::authenticated_client;
use crate::cli::Args;
use crate::config::{ApiConfig, RetryConfig};
use crate::metadata::VideoMetadata;
use crate::upload::{cancellable_sleep, CancelToken, UploadDriver, UploadedVideo};

/// Run one upload described by `args`.
///
/// The file and the metadata are validated before any request is made.
pub fn run_upload(args: &Args) -> Result<UploadedVideo> {
    if !args.file.is_file() {
        anyhow::bail!("Please specify a valid file using the --file parameter.");
    }

    let metadata = VideoMetadata::build(
        &args.title,
        &args.description,
        &args.keywords,
        &args.category,
        &args.privacy_status,
    )?;

    let api = authenticated_client(&ApiConfig::from_env(), !args.no_prompt)?;
    let mut insert = api
        .insert_video(&args.file, &metadata, args.chunk_size)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;

    let bar = ProgressBar::new(insert.total_bytes());
    bar.set_style(ProgressStyle::with_template(
        "{spinner} {msg} [{bar:40}] {bytes}/{total_bytes} ({eta})",
    )?);
    bar.set_message("Uploading...");
    bar.enable_steady_tick(Duration::from_millis(120));

    let cancel = CancelToken::new();
    if let Some(secs) = args.deadline_secs {
        spawn_deadline(cancel.clone(), Duration::from_secs(secs));
    }

    let mut driver = UploadDriver::new(RetryConfig::default().with_max_retries(args.max_retries))
        .with_cancel_token(cancel.clone())
        .with_delay(cancellable_sleep(cancel));
    match driver.run(&mut insert, |progress| bar.set_position(progress.bytes_sent)) {
        Ok(video) => {
            bar.set_position(insert.total_bytes());
            bar.finish_with_message("Upload complete");
            Ok(video)
        }
        Err(e) => {
            bar.abandon_with_message("Upload failed");
            Err(e.into())
        }
    }
}

/// Cancel `token` once `after` has elapsed.
fn spawn_deadline(token: CancelToken, after: Duration) {
    thread::spawn(move || {
        thread::sleep(after);
        warn!(seconds = after.as_secs(), "deadline reached, cancelling upload");
        token.cancel();
    });
}
