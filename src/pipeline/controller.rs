//! Streaming generation controller.
//!
//! Drives one provider call for one unit:
//!
//! ```text
//! Idle ──▶ Streaming ──┬──▶ Completed     stream exhausted below threshold
//!                      ├──▶ StoppedEarly  card lines ≥ target + 2, stream dropped
//!                      ├──▶ Interrupted   cancellation token fired, partial text kept
//!                      └──▶ Failed        attempt budget spent, last error surfaced
//! ```
//!
//! Provider errors are retried with exponential backoff; every attempt starts
//! from an empty accumulator. Every provider call and every wait for the next
//! chunk is bounded by the request timeout. Dropping the chunk stream closes
//! the HTTP response, which is how early stop and interruption release the
//! connection.

use crate::config::GenerationConfig;
use crate::deck::{is_candidate_card_line, is_column_header};
use crate::error::{FlashdeckError, ProviderError};
use crate::provider::GenerationProvider;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Extra card lines streamed past the target before stopping, so a line
/// still being flushed does not leave the deck one card short.
pub const EARLY_STOP_BUFFER: usize = 2;

/// Upper bound on the wait between two attempts.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Wait before attempt `attempt` (1-based): `base_ms · 2^(attempt-2)`,
/// saturating at [`MAX_BACKOFF_MS`]. Zero for the first attempt.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    if attempt < 2 || base_ms == 0 {
        return Duration::ZERO;
    }
    let ms = 2u64
        .checked_pow(attempt - 2)
        .and_then(|m| base_ms.checked_mul(m))
        .map_or(MAX_BACKOFF_MS, |ms| ms.min(MAX_BACKOFF_MS));
    Duration::from_millis(ms)
}

/// Chunk observer: receives each raw chunk and the running card-line count.
pub type ChunkCallback<'a> = &'a (dyn Fn(&str, usize) + Send + Sync);

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Idle,
    Streaming,
    Completed,
    StoppedEarly,
    Interrupted,
    Failed,
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::StoppedEarly => "stopped early",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a successful generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamOutcome {
    Completed,
    StoppedEarly,
    /// Partial output; the caller should say so.
    Interrupted,
}

impl From<StreamOutcome> for GenerationState {
    fn from(o: StreamOutcome) -> Self {
        match o {
            StreamOutcome::Completed => Self::Completed,
            StreamOutcome::StoppedEarly => Self::StoppedEarly,
            StreamOutcome::Interrupted => Self::Interrupted,
        }
    }
}

/// Unnormalized provider output.
#[derive(Debug, Clone, PartialEq)]
pub struct RawGeneration {
    pub text: String,
    pub outcome: StreamOutcome,
    /// Card-line heuristic count at the end of the stream.
    pub card_lines: usize,
    /// Chunks received in the successful attempt.
    pub chunks: usize,
    /// 1-based attempt that produced this output.
    pub attempts: u32,
}

/// Incremental "looks like a card row" counter over streamed text.
///
/// Only newline-terminated lines are counted, so a row is counted once it is
/// complete. The column header row is not a card. The count is a progress
/// signal: it also matches rows with too many fields.
#[derive(Debug, Default)]
pub struct CardLineCounter {
    buf: String,
    scanned: usize,
    count: usize,
}

impl CardLineCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the updated count.
    pub fn push(&mut self, chunk: &str) -> usize {
        self.buf.push_str(chunk);
        while let Some(rel) = self.buf[self.scanned..].find('\n') {
            let end = self.scanned + rel;
            if counts_as_card(&self.buf[self.scanned..end]) {
                self.count += 1;
            }
            self.scanned = end + 1;
        }
        self.count
    }

    /// Count including a trailing unterminated line.
    pub fn finish(&self) -> usize {
        self.count + usize::from(counts_as_card(&self.buf[self.scanned..]))
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn text(&self) -> &str {
        &self.buf
    }

    pub fn into_text(self) -> String {
        self.buf
    }
}

fn counts_as_card(line: &str) -> bool {
    let line = line.trim_end_matches('\r');
    is_candidate_card_line(line) && !is_column_header(line)
}

/// Count card-like lines in a complete text.
pub fn count_card_lines(text: &str) -> usize {
    let mut counter = CardLineCounter::new();
    counter.push(text);
    counter.finish()
}

enum AttemptFailure {
    Provider(ProviderError),
    Interrupted,
}

impl From<ProviderError> for AttemptFailure {
    fn from(e: ProviderError) -> Self {
        Self::Provider(e)
    }
}

/// Runs generations against one provider with one set of limits.
pub struct GenerationController {
    provider: Arc<dyn GenerationProvider>,
    temperature: f32,
    max_attempts: u32,
    retry_backoff_ms: u64,
    request_timeout: Duration,
    stream: bool,
    cancellation: CancellationToken,
}

impl GenerationController {
    pub fn new(provider: Arc<dyn GenerationProvider>, config: &GenerationConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_attempts: config.max_attempts.max(1),
            retry_backoff_ms: config.retry_backoff_ms,
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            stream: config.stream,
            cancellation: config.cancellation.clone(),
        }
    }

    /// Generate raw deck text for `prompt`.
    ///
    /// Streams when `on_chunk` is given or streaming is enabled in the
    /// configuration; otherwise makes one blocking call with no early stop.
    ///
    /// # Errors
    /// [`FlashdeckError::Interrupted`] when cancelled before any text
    /// arrived; [`FlashdeckError::GenerationFailed`] when the attempt budget
    /// is spent or the error is not retryable.
    pub async fn generate(
        &self,
        prompt: &str,
        target_cards: usize,
        on_chunk: Option<ChunkCallback<'_>>,
    ) -> Result<RawGeneration, FlashdeckError> {
        let streaming = on_chunk.is_some() || self.stream;
        let mut last_err: Option<ProviderError> = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let backoff = backoff_delay(self.retry_backoff_ms, attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    self.provider.name(),
                    attempt,
                    self.max_attempts,
                    backoff.as_millis()
                );
                tokio::select! {
                    biased;
                    _ = self.cancellation.cancelled() => return Err(FlashdeckError::Interrupted),
                    _ = sleep(backoff) => {}
                }
            }

            let result = if streaming {
                self.stream_once(prompt, target_cards, on_chunk, attempt).await
            } else {
                self.call_once(prompt, attempt).await
            };

            match result {
                Ok(raw) => {
                    info!(
                        "{}/{}: {} after {} card line(s), {} chunk(s)",
                        self.provider.name(),
                        self.provider.model(),
                        GenerationState::from(raw.outcome),
                        raw.card_lines,
                        raw.chunks
                    );
                    return Ok(raw);
                }
                Err(AttemptFailure::Interrupted) => {
                    debug!("{}: {} with no output", self.provider.name(), GenerationState::Interrupted);
                    return Err(FlashdeckError::Interrupted);
                }
                Err(AttemptFailure::Provider(e)) => {
                    warn!("{}: attempt {} failed: {}", self.provider.name(), attempt, e);
                    if !e.is_retryable() {
                        return Err(FlashdeckError::GenerationFailed {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    last_err = Some(e);
                }
            }
        }

        debug!("{}: {}", self.provider.name(), GenerationState::Failed);
        Err(FlashdeckError::GenerationFailed {
            attempts: self.max_attempts,
            source: last_err.unwrap_or(ProviderError::Api("no attempt was made".into())),
        })
    }

    async fn stream_once(
        &self,
        prompt: &str,
        target_cards: usize,
        on_chunk: Option<ChunkCallback<'_>>,
        attempt: u32,
    ) -> Result<RawGeneration, AttemptFailure> {
        let threshold = target_cards + EARLY_STOP_BUFFER;
        let secs = self.request_timeout.as_secs();
        let mut state = GenerationState::Idle;
        debug!("{}: {} (attempt {})", self.provider.name(), state, attempt);

        let mut stream = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => return Err(AttemptFailure::Interrupted),
            r = timeout(self.request_timeout, self.provider.stream_generate(prompt, self.temperature)) => {
                r.map_err(|_| ProviderError::Timeout { secs })??
            }
        };
        state = GenerationState::Streaming;
        debug!("{}: {}", self.provider.name(), state);

        let mut counter = CardLineCounter::new();
        let mut chunks = 0usize;

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => None,
                r = timeout(self.request_timeout, stream.next()) => {
                    Some(r.map_err(|_| ProviderError::Timeout { secs })?)
                }
            };
            match next {
                None if counter.text().is_empty() => return Err(AttemptFailure::Interrupted),
                None => break StreamOutcome::Interrupted,
                Some(None) => break StreamOutcome::Completed,
                Some(Some(chunk)) => {
                    let chunk = chunk?;
                    chunks += 1;
                    let count = counter.push(&chunk);
                    if let Some(cb) = on_chunk {
                        cb(&chunk, count);
                    }
                    if count >= threshold {
                        break StreamOutcome::StoppedEarly;
                    }
                }
            }
        };
        drop(stream);

        let card_lines = counter.finish();
        Ok(RawGeneration {
            text: counter.into_text(),
            outcome,
            card_lines,
            chunks,
            attempts: attempt,
        })
    }

    async fn call_once(&self, prompt: &str, attempt: u32) -> Result<RawGeneration, AttemptFailure> {
        let secs = self.request_timeout.as_secs();
        let text = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => return Err(AttemptFailure::Interrupted),
            r = timeout(self.request_timeout, self.provider.generate(prompt, self.temperature)) => {
                r.map_err(|_| ProviderError::Timeout { secs })??
            }
        };
        Ok(RawGeneration {
            card_lines: count_card_lines(&text),
            text,
            outcome: StreamOutcome::Completed,
            chunks: 1,
            attempts: attempt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::header_block;
    use crate::provider::ChunkStream;
    use async_trait::async_trait;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    enum Script {
        /// Yield these chunks, then end.
        Chunks(Vec<String>),
        /// Yield these chunks, then never yield again.
        Stall(Vec<String>),
        /// Yield these chunks, then fail.
        FailAfter(Vec<String>, ProviderError),
        /// Fail at request time.
        Reject(ProviderError),
    }

    struct ScriptedProvider {
        scripts: Mutex<VecDeque<Script>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        fn model(&self) -> &str {
            "test"
        }
        async fn check_availability(&self) -> bool {
            true
        }
        async fn stream_generate(&self, _prompt: &str, _t: f32) -> Result<ChunkStream, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Chunks(Vec::new()));
            let ok = |v: Vec<String>| stream::iter(v.into_iter().map(Ok::<_, ProviderError>));
            let s: ChunkStream = match script {
                Script::Chunks(v) => Box::pin(ok(v)),
                Script::Stall(v) => Box::pin(ok(v).chain(stream::pending())),
                Script::FailAfter(v, e) => Box::pin(ok(v).chain(stream::iter([Err(e)]))),
                Script::Reject(e) => return Err(e),
            };
            Ok(s)
        }
        async fn context_length(&self) -> Option<usize> {
            None
        }
    }

    fn card(i: usize) -> String {
        format!("Question {i}?\tAnswer {i}.\tunit_1\n")
    }

    fn deck_chunks(cards: usize) -> Vec<String> {
        let mut v = vec![header_block()];
        v.extend((1..=cards).map(card));
        v
    }

    fn controller(provider: Arc<ScriptedProvider>, token: CancellationToken) -> GenerationController {
        let config = GenerationConfig::builder()
            .max_attempts(3)
            .retry_backoff_ms(1)
            .request_timeout_secs(1)
            .cancellation(token)
            .build()
            .unwrap();
        GenerationController::new(provider, &config)
    }

    #[test]
    fn counter_counts_only_completed_rows() {
        let mut c = CardLineCounter::new();
        assert_eq!(c.push("#separator:tab\nFront\tBack\tTags\n"), 0);
        assert_eq!(c.push("Q\tA\t"), 0);
        assert_eq!(c.push("tag\nQ2\tA2"), 1);
        assert_eq!(c.finish(), 1);
        assert_eq!(c.push("\tt\n"), 2);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_delay(500, 1), Duration::ZERO);
        assert_eq!(backoff_delay(500, 2), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 4), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(500, 30), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(1_000, 70), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(u64::MAX / 2, 4), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(0, u32::MAX), Duration::ZERO);
    }

    #[test]
    fn counter_matches_rows_with_extra_fields() {
        assert_eq!(count_card_lines("a\tb\tc\td\n\t\t\nplain\n"), 1);
    }

    #[tokio::test]
    async fn stops_early_exactly_at_target_plus_buffer() {
        let provider = ScriptedProvider::new(vec![Script::Chunks(deck_chunks(80))]);
        let seen = AtomicUsize::new(0);
        let cb = |_: &str, _: usize| {
            seen.fetch_add(1, Ordering::SeqCst);
        };
        let raw = controller(provider, CancellationToken::new())
            .generate("p", 60, Some(&cb))
            .await
            .unwrap();
        assert_eq!(raw.outcome, StreamOutcome::StoppedEarly);
        assert_eq!(raw.card_lines, 62);
        // header chunk + 62 card chunks, nothing after the 62nd row
        assert_eq!(seen.load(Ordering::SeqCst), 63);
        assert!(raw.text.ends_with(&card(62)));
    }

    #[tokio::test]
    async fn does_not_stop_before_the_62nd_row_completes() {
        let mut chunks = deck_chunks(61);
        chunks.push("Question 62?\tAnswer".into());
        chunks.push(" 62.\tunit_1".into());
        chunks.push("\n".into());
        chunks.push(card(63));
        let provider = ScriptedProvider::new(vec![Script::Chunks(chunks)]);
        let counts = Mutex::new(Vec::new());
        let cb = |_: &str, n: usize| counts.lock().unwrap().push(n);
        let raw = controller(provider, CancellationToken::new())
            .generate("p", 60, Some(&cb))
            .await
            .unwrap();
        assert_eq!(raw.outcome, StreamOutcome::StoppedEarly);
        assert_eq!(&counts.lock().unwrap()[62..], &[61, 61, 62]);
        assert!(!raw.text.contains("Question 63"));
    }

    #[tokio::test]
    async fn completes_below_threshold() {
        let provider = ScriptedProvider::new(vec![Script::Chunks(deck_chunks(10))]);
        let raw = controller(provider, CancellationToken::new())
            .generate("p", 60, None)
            .await
            .unwrap();
        assert_eq!(raw.outcome, StreamOutcome::Completed);
        assert_eq!(raw.card_lines, 10);
        assert_eq!(raw.attempts, 1);
    }

    #[tokio::test]
    async fn interruption_without_output_is_an_error() {
        let token = CancellationToken::new();
        token.cancel();
        let provider = ScriptedProvider::new(vec![Script::Stall(Vec::new())]);
        let err = controller(provider, token).generate("p", 60, None).await.unwrap_err();
        assert!(matches!(err, FlashdeckError::Interrupted));
    }

    #[tokio::test]
    async fn interruption_keeps_partial_output() {
        let token = CancellationToken::new();
        let provider = ScriptedProvider::new(vec![Script::Stall(deck_chunks(5))]);
        let trigger = token.clone();
        let cb = move |_: &str, n: usize| {
            if n == 5 {
                trigger.cancel();
            }
        };
        let raw = controller(provider, token).generate("p", 60, Some(&cb)).await.unwrap();
        assert_eq!(raw.outcome, StreamOutcome::Interrupted);
        assert_eq!(raw.card_lines, 5);
        assert!(raw.text.starts_with("#separator:tab"));
    }

    #[tokio::test]
    async fn retries_restart_from_empty_accumulator() {
        let provider = ScriptedProvider::new(vec![
            Script::FailAfter(deck_chunks(3), ProviderError::Transport("reset".into())),
            Script::Chunks(deck_chunks(4)),
        ]);
        let raw = controller(provider.clone(), CancellationToken::new())
            .generate("p", 60, None)
            .await
            .unwrap();
        assert_eq!(raw.attempts, 2);
        assert_eq!(raw.card_lines, 4);
        assert_eq!(raw.text.matches("#separator:tab").count(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fails_after_attempt_budget() {
        let e = || ProviderError::Http {
            status: 503,
            body: "overloaded".into(),
        };
        let provider = ScriptedProvider::new(vec![Script::Reject(e()), Script::Reject(e()), Script::Reject(e())]);
        let err = controller(provider.clone(), CancellationToken::new())
            .generate("p", 60, None)
            .await
            .unwrap_err();
        match err {
            FlashdeckError::GenerationFailed { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, ProviderError::Http { status: 503, .. }));
            }
            other => panic!("unexpected: {other}"),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let provider = ScriptedProvider::new(vec![Script::Reject(ProviderError::MissingCredentials("key".into()))]);
        let err = controller(provider.clone(), CancellationToken::new())
            .generate("p", 60, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FlashdeckError::GenerationFailed { attempts: 1, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stalled_stream_times_out_and_retries() {
        let provider = ScriptedProvider::new(vec![Script::Stall(deck_chunks(2)), Script::Chunks(deck_chunks(2))]);
        let raw = controller(provider, CancellationToken::new())
            .generate("p", 60, None)
            .await
            .unwrap();
        assert_eq!(raw.attempts, 2);
        assert_eq!(raw.outcome, StreamOutcome::Completed);
    }

    #[tokio::test]
    async fn blocking_path_skips_early_stop() {
        let provider = ScriptedProvider::new(vec![Script::Chunks(deck_chunks(70))]);
        let config = GenerationConfig::builder().stream(false).build().unwrap();
        let raw = GenerationController::new(provider, &config)
            .generate("p", 60, None)
            .await
            .unwrap();
        assert_eq!(raw.outcome, StreamOutcome::Completed);
        assert_eq!(raw.card_lines, 70);
    }
}
