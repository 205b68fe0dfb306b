// Resumable upload driver: an `UploadOperation` pushes the next piece of a
// file to the server and `UploadDriver` keeps calling it until the server
// hands back the created resource, backing off with randomized exponential
// sleeps whenever a transient failure gets in the way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::ThreadRng;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::error::{ApiError, UploadError};

/// Bytes acknowledged by the server so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    pub fn new(bytes_sent: u64, total_bytes: u64) -> Self {
        Self {
            bytes_sent,
            total_bytes,
        }
    }

    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.bytes_sent as f64 / self.total_bytes as f64).min(1.0)
    }
}

/// Outcome of a single successful [`UploadOperation::advance`].
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// More chunks remain.
    Progress(UploadProgress),
    /// The server returned the final resource.
    Complete(Value),
}

/// A chunked transfer that can be pushed forward one step at a time.
pub trait UploadOperation {
    fn advance(&mut self) -> Result<Advance, ApiError>;
}

/// The resource created by a finished upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedVideo {
    pub id: String,
    pub response: Value,
}

/// Pause between retries. Any `FnMut(Duration)` qualifies, which lets tests
/// record the requested sleeps instead of waiting.
pub trait Delay {
    fn delay(&mut self, duration: Duration);
}

impl<F: FnMut(Duration)> Delay for F {
    fn delay(&mut self, duration: Duration) {
        self(duration)
    }
}

/// Shared flag used to abort an upload from another thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sleep that returns early once `token` is cancelled, checking it every
/// `CANCEL_POLL`.
pub fn cancellable_sleep(token: CancelToken) -> impl FnMut(Duration) {
    move |duration: Duration| {
        let deadline = Instant::now() + duration;
        while !token.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(CANCEL_POLL.min(deadline - now));
        }
    }
}

const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Drives an [`UploadOperation`] to completion under a [`RetryConfig`].
pub struct UploadDriver<D, R> {
    config: RetryConfig,
    delay: D,
    rng: R,
    cancel: CancelToken,
}

impl UploadDriver<fn(Duration), ThreadRng> {
    /// Driver that blocks the current thread while backing off.
    pub fn new(config: RetryConfig) -> Self {
        UploadDriver {
            config,
            delay: thread::sleep,
            rng: rand::thread_rng(),
            cancel: CancelToken::new(),
        }
    }
}

impl<D: Delay, R: Rng> UploadDriver<D, R> {
    pub fn with_delay<D2: Delay>(self, delay: D2) -> UploadDriver<D2, R> {
        UploadDriver {
            config: self.config,
            delay,
            rng: self.rng,
            cancel: self.cancel,
        }
    }

    pub fn with_rng<R2: Rng>(self, rng: R2) -> UploadDriver<D, R2> {
        UploadDriver {
            config: self.config,
            delay: self.delay,
            rng,
            cancel: self.cancel,
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Advance `operation` until it completes, fails fatally, runs out of
    /// retries or is cancelled.
    ///
    /// `on_progress` is called after every chunk the server accepted without
    /// finishing the upload. The retry counter is shared by the whole call:
    /// at most `max_retries` sleeps happen, and the failure that would need
    /// one more ends the upload with [`UploadError::RetriesExhausted`].
    pub fn run<O, P>(
        &mut self,
        operation: &mut O,
        mut on_progress: P,
    ) -> Result<UploadedVideo, UploadError>
    where
        O: UploadOperation + ?Sized,
        P: FnMut(&UploadProgress),
    {
        let mut retry: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            debug!(retry, "uploading file");
            match operation.advance() {
                Ok(Advance::Progress(progress)) => {
                    debug!(
                        bytes_sent = progress.bytes_sent,
                        total_bytes = progress.total_bytes,
                        "chunk accepted"
                    );
                    on_progress(&progress);
                }
                Ok(Advance::Complete(response)) => return finish(response),
                Err(error) if error.is_retriable(&self.config) => {
                    warn!(%error, "a retriable error occurred");
                    retry += 1;
                    if retry > self.config.max_retries {
                        return Err(UploadError::RetriesExhausted {
                            attempts: retry,
                            last_error: error,
                        });
                    }
                    if self.cancel.is_cancelled() {
                        return Err(UploadError::Cancelled);
                    }

                    let pause = self.backoff(retry);
                    info!(
                        retry,
                        sleep_seconds = pause.as_secs_f64(),
                        "sleeping before retrying"
                    );
                    self.delay.delay(pause);
                }
                Err(error) => return Err(UploadError::Fatal(error)),
            }
        }
    }

    /// Sleep before retry number `retry`, uniformly drawn from
    /// `[0, 2^retry)` backoff units.
    pub fn backoff(&mut self, retry: u32) -> Duration {
        let sample: f64 = self.rng.gen();
        backoff_interval(self.config.backoff_unit, retry, sample)
    }
}

/// `sample` is expected in `[0, 1)`. Intervals too large for a `Duration`
/// saturate.
pub fn backoff_interval(unit: Duration, retry: u32, sample: f64) -> Duration {
    let cap = 2f64.powi(retry.min(1023) as i32);
    Duration::try_from_secs_f64(unit.as_secs_f64() * cap * sample).unwrap_or(Duration::MAX)
}

fn finish(response: Value) -> Result<UploadedVideo, UploadError> {
    let id = response.get("id").and_then(Value::as_str).map(str::to_owned);
    match id {
        Some(id) => {
            info!(video_id = %id, "upload complete");
            Ok(UploadedVideo { id, response })
        }
        None => Err(UploadError::UnexpectedResponse(response)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Replays a fixed list of outcomes, one per call.
    struct ScriptedOperation {
        script: VecDeque<Result<Advance, ApiError>>,
        calls: usize,
    }

    impl ScriptedOperation {
        fn new(script: Vec<Result<Advance, ApiError>>) -> Self {
            Self {
                script: script.into(),
                calls: 0,
            }
        }
    }

    impl UploadOperation for ScriptedOperation {
        fn advance(&mut self) -> Result<Advance, ApiError> {
            self.calls += 1;
            self.script
                .pop_front()
                .expect("driver advanced past the end of the script")
        }
    }

    fn progress(sent: u64) -> Result<Advance, ApiError> {
        Ok(Advance::Progress(UploadProgress::new(sent, 300)))
    }

    fn complete(id: &str) -> Result<Advance, ApiError> {
        Ok(Advance::Complete(json!({ "id": id, "kind": "youtube#video" })))
    }

    fn status(code: u16) -> Result<Advance, ApiError> {
        Err(ApiError::Status {
            status: code,
            body: "{}".into(),
        })
    }

    fn io_error() -> Result<Advance, ApiError> {
        Err(ApiError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timed out",
        )))
    }

    fn recording_driver(
        max_retries: u32,
        sleeps: &mut Vec<Duration>,
    ) -> UploadDriver<impl FnMut(Duration) + '_, StdRng> {
        UploadDriver::new(RetryConfig::default().with_max_retries(max_retries))
            .with_rng(StdRng::seed_from_u64(7))
            .with_delay(move |d: Duration| sleeps.push(d))
    }

    #[test]
    fn test_multi_chunk_upload_without_failures() {
        let mut op = ScriptedOperation::new(vec![progress(100), progress(200), complete("abc123")]);
        let mut sleeps = Vec::new();
        let mut seen = Vec::new();

        let video = recording_driver(10, &mut sleeps)
            .run(&mut op, |p| seen.push(p.bytes_sent))
            .unwrap();

        assert_eq!(video.id, "abc123");
        assert_eq!(op.calls, 3);
        assert_eq!(seen, vec![100, 200]);
        assert!(sleeps.is_empty());
    }

    #[test]
    fn test_recovers_within_budget() {
        let mut op = ScriptedOperation::new(vec![
            status(503),
            io_error(),
            status(500),
            complete("xyz"),
        ]);
        let mut sleeps = Vec::new();

        let video = recording_driver(3, &mut sleeps).run(&mut op, |_| {}).unwrap();

        assert_eq!(video.id, "xyz");
        assert_eq!(op.calls, 4);
        assert_eq!(sleeps.len(), 3);
        for (i, sleep) in sleeps.iter().enumerate() {
            let cap = Duration::from_secs(1u64 << (i + 1));
            assert!(*sleep < cap, "sleep {} was {:?}, cap {:?}", i + 1, sleep, cap);
        }
    }

    #[test]
    fn test_exhausted_budget_stops_advancing() {
        let mut op = ScriptedOperation::new(vec![status(503), status(503), status(503), complete("never")]);
        let mut sleeps = Vec::new();

        let err = recording_driver(2, &mut sleeps).run(&mut op, |_| {}).unwrap_err();

        match err {
            UploadError::RetriesExhausted { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(matches!(last_error, ApiError::Status { status: 503, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(op.calls, 3);
        assert_eq!(sleeps.len(), 2);
    }

    #[test]
    fn test_zero_budget_fails_on_first_transient_error() {
        let mut op = ScriptedOperation::new(vec![io_error()]);
        let mut sleeps = Vec::new();

        let err = recording_driver(0, &mut sleeps).run(&mut op, |_| {}).unwrap_err();

        assert!(matches!(err, UploadError::RetriesExhausted { attempts: 1, .. }));
        assert!(sleeps.is_empty());
    }

    #[test]
    fn test_fatal_error_is_not_retried() {
        let mut op = ScriptedOperation::new(vec![status(503), status(404), complete("never")]);
        let mut sleeps = Vec::new();

        let err = recording_driver(10, &mut sleeps).run(&mut op, |_| {}).unwrap_err();

        assert!(matches!(err, UploadError::Fatal(ApiError::Status { status: 404, .. })));
        assert_eq!(op.calls, 2);
        assert_eq!(sleeps.len(), 1);
    }

    #[test]
    fn test_response_without_id_is_fatal() {
        let mut op = ScriptedOperation::new(vec![Ok(Advance::Complete(json!({ "error": "quota" })))]);
        let mut sleeps = Vec::new();

        let err = recording_driver(10, &mut sleeps).run(&mut op, |_| {}).unwrap_err();

        assert!(matches!(err, UploadError::UnexpectedResponse(_)));
    }

    #[test]
    fn test_cancelled_before_first_advance() {
        let mut op = ScriptedOperation::new(vec![complete("never")]);
        let driver = UploadDriver::new(RetryConfig::default()).with_delay(|_: Duration| {});
        driver.cancel_token().cancel();
        let mut driver = driver;

        let err = driver.run(&mut op, |_| {}).unwrap_err();

        assert!(matches!(err, UploadError::Cancelled));
        assert_eq!(op.calls, 0);
    }

    #[test]
    fn test_cancelled_during_backoff() {
        let mut op = ScriptedOperation::new(vec![status(502), complete("never")]);
        let cancel = CancelToken::new();
        let in_delay = cancel.clone();
        let mut driver = UploadDriver::new(RetryConfig::default())
            .with_cancel_token(cancel)
            .with_delay(move |_: Duration| in_delay.cancel());

        let err = driver.run(&mut op, |_| {}).unwrap_err();

        assert!(matches!(err, UploadError::Cancelled));
        assert_eq!(op.calls, 1);
    }

    #[test]
    fn test_cancellable_sleep_wakes_on_cancel() {
        let token = CancelToken::new();
        let mut sleep = cancellable_sleep(token.clone());

        let start = Instant::now();
        sleep(Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(20));

        let waker = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            waker.cancel();
        });
        let start = Instant::now();
        sleep(Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_backoff_interval_saturates() {
        assert_eq!(backoff_interval(Duration::from_secs(1), 3, 0.5), Duration::from_secs(4));
        assert_eq!(backoff_interval(Duration::from_secs(1), 5, 0.0), Duration::ZERO);
        assert_eq!(backoff_interval(Duration::from_secs(1), u32::MAX, 0.5), Duration::MAX);
    }

    proptest! {
        #[test]
        fn backoff_stays_below_cap(retry in 1u32..=30, sample in 0.0f64..0.999) {
            let pause = backoff_interval(Duration::from_millis(1), retry, sample);
            prop_assert!(pause < Duration::from_millis(1u64 << retry));
        }
    }
}
