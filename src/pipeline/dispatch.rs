//! Stream dispatch: send one batch to the backend and pull its fragments.
//!
//! A backend implements [`Transliterator`] and returns a [`FragmentStream`]:
//! a lazy, pull-based stream that only requests more data when polled.
//! [`DispatchStream`] wraps it for the controller:
//!
//! * the request is opened on the first pull (with optional retries)
//! * every pull races the backend against the run's [`RunSignal`], so a
//!   pause or stop takes effect at the next fragment boundary
//! * on interruption, error or completion the backend stream is dropped,
//!   which closes the underlying connection and stops the producer
//!
//! A stream that closes without producing any text is a dispatch error: a
//! non-empty batch always has something to transliterate.

use crate::config::PipelineConfig;
use crate::error::TranslitError;
use crate::pipeline::batch::BatchRange;
use crate::pipeline::extract::{UnitPayload, WorkUnit};
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, TRAILING_INSTRUCTION};
use crate::signal::{Interruption, RunSignal};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Text fragments of one response, in arrival order.
pub type FragmentStream = BoxStream<'static, Result<String, TranslitError>>;

/// One request to the remote capability.
#[derive(Debug, Clone)]
pub struct TransliterationRequest {
    pub system_prompt: String,
    /// Unit payloads in batch order.
    pub parts: Vec<UnitPayload>,
    /// Appended after the parts.
    pub trailing_instruction: String,
}

/// The remote transliteration capability.
///
/// Implementations must preserve part order in their output and surface
/// any failure, including a response that ends before the service signals
/// completion, as an `Err` item or an `Err` from this call.
#[async_trait]
pub trait Transliterator: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Open a response stream for `request`. Each call is a fresh request.
    async fn stream_transform(
        &self,
        request: &TransliterationRequest,
    ) -> Result<FragmentStream, TranslitError>;
}

/// Result of one pull on a [`DispatchStream`].
#[derive(Debug, PartialEq, Eq)]
pub enum StreamStep {
    /// A non-empty text fragment.
    Fragment(String),
    /// The backend closed the stream cleanly.
    Finished,
    /// A pause or abort was observed; the stream has been closed.
    Interrupted(Interruption),
}

/// Sends batches to a backend.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn Transliterator>,
    system_prompt: String,
    max_retries: u32,
    retry_backoff_ms: u64,
    fragment_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn Transliterator>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            fragment_timeout: config.fragment_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Prepare a stream for `units`. Nothing is sent until the first pull.
    pub fn dispatch(&self, range: BatchRange, units: Vec<WorkUnit>) -> DispatchStream {
        let request = TransliterationRequest {
            system_prompt: self.system_prompt.clone(),
            parts: units.into_iter().map(|u| u.payload).collect(),
            trailing_instruction: TRAILING_INSTRUCTION.to_string(),
        };
        DispatchStream {
            dispatcher: self.clone(),
            range,
            state: StreamState::Pending(request),
            received: 0,
        }
    }

    /// Open the backend stream, retrying request failures with exponential
    /// backoff. `Ok(None)` means the run was interrupted while opening.
    async fn open(
        &self,
        range: BatchRange,
        request: &TransliterationRequest,
        signal: &RunSignal,
    ) -> Result<Option<FragmentStream>, TranslitError> {
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Batch {}..{}: retry {}/{} after {}ms",
                    range.start, range.end, attempt, self.max_retries, backoff
                );
                tokio::select! {
                    biased;
                    _ = signal.interrupted() => return Ok(None),
                    _ = tokio::time::sleep(Duration::from_millis(backoff)) => {}
                }
            }

            let opened = tokio::select! {
                biased;
                _ = signal.interrupted() => return Ok(None),
                res = self.backend.stream_transform(request) => res,
            };

            match opened {
                Ok(stream) => return Ok(Some(stream)),
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    warn!("Batch {}..{}: open failed: {}", range.start, range.end, e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

enum StreamState {
    Pending(TransliterationRequest),
    Open(FragmentStream),
    Closed,
}

/// A cancellable, pull-based view of one batch's response.
pub struct DispatchStream {
    dispatcher: Dispatcher,
    range: BatchRange,
    state: StreamState,
    received: usize,
}

impl DispatchStream {
    /// Pull the next step. After `Finished`, `Interrupted` or an error the
    /// stream is closed and further pulls return `Finished`.
    pub async fn next_step(&mut self, signal: &RunSignal) -> Result<StreamStep, TranslitError> {
        if let Some(interruption) = signal.interruption() {
            return Ok(self.interrupt(interruption));
        }

        self.state = match std::mem::replace(&mut self.state, StreamState::Closed) {
            StreamState::Pending(request) => match self
                .dispatcher
                .open(self.range, &request, signal)
                .await?
            {
                Some(stream) => StreamState::Open(stream),
                None => {
                    let interruption = signal.interruption().unwrap_or(Interruption::Paused);
                    return Ok(StreamStep::Interrupted(interruption));
                }
            },
            other => other,
        };

        loop {
            let StreamState::Open(stream) = &mut self.state else {
                return Ok(StreamStep::Finished);
            };

            let pulled = tokio::select! {
                biased;
                interruption = signal.interrupted() => {
                    return Ok(self.interrupt(interruption));
                }
                item = next_with_timeout(stream, self.dispatcher.fragment_timeout) => item,
            };

            match pulled {
                Pull::Item(Ok(fragment)) if fragment.is_empty() => continue,
                Pull::Item(Ok(fragment)) => {
                    self.received += fragment.len();
                    return Ok(StreamStep::Fragment(fragment));
                }
                Pull::Item(Err(e)) => {
                    self.state = StreamState::Closed;
                    return Err(e);
                }
                Pull::TimedOut(secs) => {
                    self.state = StreamState::Closed;
                    return Err(TranslitError::FragmentTimeout {
                        start: self.range.start,
                        end: self.range.end,
                        secs,
                    });
                }
                Pull::End => {
                    self.state = StreamState::Closed;
                    if self.received == 0 {
                        return Err(TranslitError::EmptyResponse {
                            start: self.range.start,
                            end: self.range.end,
                        });
                    }
                    debug!(
                        "Batch {}..{} stream finished ({} bytes)",
                        self.range.start, self.range.end, self.received
                    );
                    return Ok(StreamStep::Finished);
                }
            }
        }
    }

    fn interrupt(&mut self, interruption: Interruption) -> StreamStep {
        self.state = StreamState::Closed;
        StreamStep::Interrupted(interruption)
    }

}

enum Pull {
    Item(Result<String, TranslitError>),
    TimedOut(u64),
    End,
}

async fn next_with_timeout(stream: &mut FragmentStream, timeout: Option<Duration>) -> Pull {
    let next = match timeout {
        Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
            Ok(next) => next,
            Err(_) => return Pull::TimedOut(limit.as_secs()),
        },
        None => stream.next().await,
    };
    match next {
        Some(item) => Pull::Item(item),
        None => Pull::End,
    }
}

fn is_retryable(e: &TranslitError) -> bool {
    !matches!(e, TranslitError::ProviderNotConfigured { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        fragments: Vec<&'static str>,
        open_failures: AtomicUsize,
        opens: AtomicUsize,
    }

    impl Scripted {
        fn new(fragments: Vec<&'static str>) -> Self {
            Self {
                fragments,
                open_failures: AtomicUsize::new(0),
                opens: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transliterator for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream_transform(
            &self,
            request: &TransliterationRequest,
        ) -> Result<FragmentStream, TranslitError> {
            assert_eq!(request.trailing_instruction, TRAILING_INSTRUCTION);
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.open_failures.load(Ordering::SeqCst) > 0 {
                self.open_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(TranslitError::ApiError {
                    message: "HTTP 503".into(),
                });
            }
            let items: Vec<Result<String, TranslitError>> =
                self.fragments.iter().map(|f| Ok(f.to_string())).collect();
            Ok(Box::pin(stream::iter(items)))
        }
    }

    fn range() -> BatchRange {
        BatchRange {
            start: 0,
            end: 1,
            stride: 1,
        }
    }

    fn unit() -> Vec<WorkUnit> {
        vec![WorkUnit {
            index: 0,
            payload: UnitPayload::Text("سلام".into()),
        }]
    }

    async fn drain(stream: &mut DispatchStream, signal: &RunSignal) -> Result<String, TranslitError> {
        let mut out = String::new();
        loop {
            match stream.next_step(signal).await? {
                StreamStep::Fragment(f) => out.push_str(&f),
                StreamStep::Finished => return Ok(out),
                StreamStep::Interrupted(i) => panic!("unexpected {i:?}"),
            }
        }
    }

    #[tokio::test]
    async fn fragments_arrive_in_order() {
        let backend = Arc::new(Scripted::new(vec!["sa", "", "laam"]));
        let d = Dispatcher::new(backend, &PipelineConfig::default());
        let signal = RunSignal::new();
        let mut s = d.dispatch(range(), unit());
        assert_eq!(drain(&mut s, &signal).await.unwrap(), "salaam");
    }

    #[tokio::test]
    async fn empty_response_is_an_error() {
        let backend = Arc::new(Scripted::new(vec![]));
        let d = Dispatcher::new(backend, &PipelineConfig::default());
        let mut s = d.dispatch(range(), unit());
        let err = drain(&mut s, &RunSignal::new()).await.unwrap_err();
        assert!(matches!(err, TranslitError::EmptyResponse { start: 0, end: 1 }));
    }

    #[tokio::test]
    async fn pause_stops_before_next_fragment() {
        let backend = Arc::new(Scripted::new(vec!["a", "b", "c"]));
        let d = Dispatcher::new(backend, &PipelineConfig::default());
        let signal = RunSignal::new();
        let mut s = d.dispatch(range(), unit());
        assert_eq!(s.next_step(&signal).await.unwrap(), StreamStep::Fragment("a".into()));
        signal.pause();
        assert_eq!(
            s.next_step(&signal).await.unwrap(),
            StreamStep::Interrupted(Interruption::Paused)
        );
        assert_eq!(s.next_step(&RunSignal::new()).await.unwrap(), StreamStep::Finished);
    }

    #[tokio::test]
    async fn open_failures_are_retried() {
        let backend = Arc::new(Scripted::new(vec!["ok"]));
        backend.open_failures.store(2, Ordering::SeqCst);
        let config = PipelineConfig::builder()
            .max_retries(2)
            .retry_backoff_ms(1)
            .build()
            .unwrap();
        let d = Dispatcher::new(backend.clone(), &config);
        let mut s = d.dispatch(range(), unit());
        assert_eq!(drain(&mut s, &RunSignal::new()).await.unwrap(), "ok");
        assert_eq!(backend.opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn no_retries_by_default() {
        let backend = Arc::new(Scripted::new(vec!["ok"]));
        backend.open_failures.store(1, Ordering::SeqCst);
        let d = Dispatcher::new(backend, &PipelineConfig::default());
        let mut s = d.dispatch(range(), unit());
        let err = drain(&mut s, &RunSignal::new()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Dispatch);
    }

    #[tokio::test]
    async fn silent_backend_times_out() {
        struct Silent;

        #[async_trait]
        impl Transliterator for Silent {
            fn name(&self) -> &str {
                "silent"
            }

            async fn stream_transform(
                &self,
                _request: &TransliterationRequest,
            ) -> Result<FragmentStream, TranslitError> {
                Ok(Box::pin(stream::pending()))
            }
        }

        tokio::time::pause();
        let config = PipelineConfig::builder().fragment_timeout_secs(5).build().unwrap();
        let d = Dispatcher::new(Arc::new(Silent), &config);
        let mut s = d.dispatch(range(), unit());
        let err = s.next_step(&RunSignal::new()).await.unwrap_err();
        assert!(matches!(err, TranslitError::FragmentTimeout { secs: 5, .. }));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn pulling_a_stream_can_cross_tasks() {
        let d = Dispatcher::new(
            Arc::new(Scripted::new(vec!["ok"])),
            &PipelineConfig::default(),
        );
        let mut s = d.dispatch(range(), unit());
        let signal = RunSignal::new();
        let pull = s.next_step(&signal);
        assert_send(&pull);
    }
}
