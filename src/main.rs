// Entrypoint for the uploader.
// - Keeps `main` small: parse flags, run the upload, map the outcome to an
//   exit status.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use video_upload_cli::{cli::Args, ui::run_upload};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run_upload(&args) {
        Ok(video) => {
            println!("Video id '{}' was successfully uploaded.", video.id);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
