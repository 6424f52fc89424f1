//! OCR Session State Machine
//!
//! ```text
//! Idle
//!   ↓ run
//! Running ──abort──→ Cancelling ──→ Cancelled
//!   ↓ stream ends / error / repetition
//! Completed | Failed
//! ```
//!
//! Terminal states accept a new `run`. Calling `run` while another run is in
//! flight cancels the older one silently: its caller gets
//! `RunOutcome::Superseded` and no terminal event.

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ocrdesk_stream::{classify, NdjsonDecoder, RepetitionDetector, StreamEvent};

use crate::error::OcrError;
use crate::request::{GenerateRequest, OcrRequest, SessionConfig};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Cancelling => "cancelling",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Notification delivered to the caller of `run`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Newly generated text
    Chunk(String),
    Failed(OcrError),
    Completed,
    Cancelled,
}

/// How a run ended, with the text accumulated up to that point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { text: String },
    Failed { error: OcrError, text: String },
    Cancelled { text: String },
    /// A newer run took over; no terminal event was delivered
    Superseded,
}

/// How the read loop stopped when it did not fail
enum LoopExit {
    Finished,
    Cancelled,
}

struct ActiveRun {
    id: Uuid,
    token: CancellationToken,
    /// Closes once the run loop has dropped its transport stream
    finished: watch::Receiver<()>,
}

impl ActiveRun {
    async fn cancel_and_wait(mut self) {
        self.token.cancel();
        let _ = self.finished.changed().await;
    }
}

struct Inner {
    state: SessionState,
    active: Option<ActiveRun>,
}

/// Clears the active slot if a `run` future is dropped before it finishes
struct RunGuard<'a> {
    inner: &'a Mutex<Inner>,
    run_id: Uuid,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if inner.active.as_ref().is_some_and(|a| a.id == self.run_id) {
            inner.active = None;
            inner.state = SessionState::Cancelled;
            tracing::debug!(run_id = %self.run_id, "OCR run dropped before finishing");
        }
    }
}

pub struct OcrSession<T> {
    transport: Arc<T>,
    config: SessionConfig,
    detector: RepetitionDetector,
    inner: Arc<Mutex<Inner>>,
}

impl<T: Transport> OcrSession<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let detector = RepetitionDetector::new(config.repetition.clone());

        Self {
            transport: Arc::new(transport),
            config,
            detector,
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Idle,
                active: None,
            })),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Transcribe one image, streaming events to `emit`.
    ///
    /// `emit` receives zero or more `Chunk`s followed by exactly one terminal
    /// event, unless this run is superseded by a newer one, in which case it
    /// receives no terminal event at all.
    pub async fn run(
        &self,
        request: OcrRequest,
        mut emit: impl FnMut(SessionEvent) + Send,
    ) -> RunOutcome {
        let body = self.config.build_request(&request);
        let run_id = Uuid::new_v4();
        let token = CancellationToken::new();
        let (finished_tx, finished_rx) = watch::channel(());

        let previous = {
            let mut inner = self.inner.lock();
            inner.state = SessionState::Running;
            inner.active.replace(ActiveRun {
                id: run_id,
                token: token.clone(),
                finished: finished_rx,
            })
        };
        let _guard = RunGuard {
            inner: &self.inner,
            run_id,
        };

        if let Some(previous) = previous {
            tracing::info!(
                run_id = %run_id,
                superseded = %previous.id,
                "Cancelling in-flight OCR run"
            );
            previous.cancel_and_wait().await;
        }

        tracing::info!(run_id = %run_id, model = %body.model, "Starting OCR run");

        let mut text = String::new();
        let result = self.read_stream(&body, &token, &mut text, &mut emit).await;
        let outcome = self.finish(run_id, result, text, &mut emit);

        // Waiters in `abort` and superseding runs resume once this closes
        drop(finished_tx);
        outcome
    }

    /// Cancel the in-flight run, if any, and wait until its request is torn
    /// down. The run's caller receives a single `Cancelled` event.
    pub async fn abort(&self) {
        let active = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Running {
                return;
            }
            let Some(active) = inner.active.as_ref() else {
                return;
            };
            let active = ActiveRun {
                id: active.id,
                token: active.token.clone(),
                finished: active.finished.clone(),
            };
            inner.state = SessionState::Cancelling;
            active
        };

        tracing::info!(run_id = %active.id, "Aborting OCR run");
        active.cancel_and_wait().await;
    }

    async fn read_stream(
        &self,
        body: &GenerateRequest,
        token: &CancellationToken,
        text: &mut String,
        emit: &mut (dyn FnMut(SessionEvent) + Send),
    ) -> Result<LoopExit, OcrError> {
        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(LoopExit::Cancelled),
            opened = self.transport.open(body) => opened?,
        };

        let mut decoder = NdjsonDecoder::new();

        'read: loop {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(LoopExit::Cancelled),
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else {
                break;
            };

            for line in decoder.feed(&chunk?) {
                if token.is_cancelled() {
                    return Ok(LoopExit::Cancelled);
                }
                if self.accept_line(&line, text, emit)? {
                    break 'read;
                }
            }
        }

        // The stream is over; dropping it here releases the connection
        drop(stream);

        if let Some(line) = decoder.flush() {
            if token.is_cancelled() {
                return Ok(LoopExit::Cancelled);
            }
            match classify(&line) {
                Ok(Some(StreamEvent::TextDelta { text: delta })) => {
                    self.accept_delta(delta, text, emit)?;
                }
                Ok(Some(StreamEvent::ServerError { message })) => {
                    return Err(OcrError::Server(message));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring unparseable trailing fragment");
                }
            }
        }

        Ok(LoopExit::Finished)
    }

    /// Handle one complete line. Returns `true` when the server signalled the
    /// end of the generation.
    fn accept_line(
        &self,
        line: &str,
        text: &mut String,
        emit: &mut (dyn FnMut(SessionEvent) + Send),
    ) -> Result<bool, OcrError> {
        if line.trim().is_empty() {
            return Ok(false);
        }

        match classify(line) {
            Ok(Some(StreamEvent::TextDelta { text: delta })) => {
                self.accept_delta(delta, text, emit)?;
                Ok(false)
            }
            Ok(Some(StreamEvent::ServerError { message })) => Err(OcrError::Server(message)),
            Ok(Some(StreamEvent::EndOfStream)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed stream line");
                Ok(false)
            }
        }
    }

    /// Append a delta and forward it, unless it makes the text repetitive
    fn accept_delta(
        &self,
        delta: String,
        text: &mut String,
        emit: &mut (dyn FnMut(SessionEvent) + Send),
    ) -> Result<(), OcrError> {
        text.push_str(&delta);

        if let Some(reason) = self.detector.detect(text).reason {
            tracing::warn!(
                reason = %reason,
                chars = text.chars().count(),
                "Repetition detected, stopping generation"
            );
            return Err(OcrError::RepetitionDetected(reason));
        }

        emit(SessionEvent::Chunk(delta));
        Ok(())
    }

    fn finish(
        &self,
        run_id: Uuid,
        result: Result<LoopExit, OcrError>,
        text: String,
        emit: &mut (dyn FnMut(SessionEvent) + Send),
    ) -> RunOutcome {
        let (state, event, outcome) = {
            let mut inner = self.inner.lock();

            let is_current = inner.active.as_ref().is_some_and(|a| a.id == run_id);
            if !is_current {
                tracing::debug!(run_id = %run_id, "OCR run superseded");
                return RunOutcome::Superseded;
            }
            inner.active = None;

            // An abort that lands after the last cancellation check still wins
            let result = if inner.state == SessionState::Cancelling {
                Ok(LoopExit::Cancelled)
            } else {
                result
            };

            let (state, event, outcome) = match result {
                Ok(LoopExit::Finished) => (
                    SessionState::Completed,
                    SessionEvent::Completed,
                    RunOutcome::Completed { text },
                ),
                Ok(LoopExit::Cancelled) => (
                    SessionState::Cancelled,
                    SessionEvent::Cancelled,
                    RunOutcome::Cancelled { text },
                ),
                Err(error) => (
                    SessionState::Failed,
                    SessionEvent::Failed(error.clone()),
                    RunOutcome::Failed { error, text },
                ),
            };
            inner.state = state;
            (state, event, outcome)
        };

        match &outcome {
            RunOutcome::Failed { error, .. } => {
                tracing::warn!(run_id = %run_id, kind = error.kind().as_str(), error = %error, "OCR run failed");
            }
            _ => tracing::info!(run_id = %run_id, state = %state, "OCR run finished"),
        }

        emit(event);
        outcome
    }
}

impl<T> Clone for OcrSession<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            detector: self.detector.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ByteStream;
    use crate::Result;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    /// Hands out pre-arranged responses, one per `open`
    struct ScriptedTransport {
        responses: parking_lot::Mutex<VecDeque<Result<ByteStream>>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<ByteStream>>) -> Self {
            Self {
                responses: parking_lot::Mutex::new(responses.into()),
            }
        }
    }

    impl Transport for ScriptedTransport {
        async fn open(&self, _request: &GenerateRequest) -> Result<ByteStream> {
            self.responses
                .lock()
                .pop_front()
                .unwrap_or(Err(OcrError::Transport("no scripted response".to_string())))
        }
    }

    fn body(chunks: &[&str]) -> Result<ByteStream> {
        let chunks: Vec<Result<Bytes>> = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
            .collect();
        Ok(futures_util::stream::iter(chunks).boxed())
    }

    /// A body fed from the test; it stays open until the sender is dropped
    fn live_body() -> (mpsc::UnboundedSender<Result<Bytes>>, Result<ByteStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        (tx, Ok(stream.boxed()))
    }

    fn delta(text: &str) -> String {
        format!("{}\n", serde_json::json!({ "response": text, "done": false }))
    }

    fn request() -> OcrRequest {
        OcrRequest::new("aGVsbG8=", "deepseek-ocr:3b").unwrap()
    }

    async fn run_collect<T: Transport>(session: &OcrSession<T>) -> (RunOutcome, Vec<SessionEvent>) {
        let mut events = Vec::new();
        let outcome = session.run(request(), |e| events.push(e)).await;
        (outcome, events)
    }

    #[tokio::test]
    async fn test_streams_chunks_then_completes() {
        let first = delta("# Title");
        let second = delta("\nBody text");
        let (a, b) = first.split_at(7);
        let transport = ScriptedTransport::new(vec![body(&[
            a,
            b,
            &second,
            "\n",
            "{\"response\":\"\",\"done\":true}\n",
        ])]);
        let session = OcrSession::new(transport, SessionConfig::default());

        let (outcome, events) = run_collect(&session).await;

        assert_eq!(
            events,
            vec![
                SessionEvent::Chunk("# Title".to_string()),
                SessionEvent::Chunk("\nBody text".to_string()),
                SessionEvent::Completed,
            ]
        );
        assert_eq!(
            outcome,
            RunOutcome::Completed {
                text: "# Title\nBody text".to_string()
            }
        );
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_trailing_fragment_delivered_before_completion() {
        let transport = ScriptedTransport::new(vec![body(&[
            &delta("first"),
            "{\"response\":\"last\"}",
        ])]);
        let session = OcrSession::new(transport, SessionConfig::default());

        let (_, events) = run_collect(&session).await;

        assert_eq!(
            events,
            vec![
                SessionEvent::Chunk("first".to_string()),
                SessionEvent::Chunk("last".to_string()),
                SessionEvent::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let transport = ScriptedTransport::new(vec![body(&[
            "{not json}\n",
            &delta("kept"),
            "{\"response\": \"broken",
        ])]);
        let session = OcrSession::new(transport, SessionConfig::default());

        let (outcome, events) = run_collect(&session).await;

        assert_eq!(
            events,
            vec![SessionEvent::Chunk("kept".to_string()), SessionEvent::Completed]
        );
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_server_error_on_first_line() {
        let transport = ScriptedTransport::new(vec![body(&[
            "{\"response\":\"never shown\",\"error\":\"model runner has unexpectedly stopped\"}\n",
            &delta("after error"),
        ])]);
        let session = OcrSession::new(transport, SessionConfig::default());

        let (outcome, events) = run_collect(&session).await;

        let expected = OcrError::Server("model runner has unexpectedly stopped".to_string());
        assert_eq!(events, vec![SessionEvent::Failed(expected.clone())]);
        assert_eq!(
            outcome,
            RunOutcome::Failed {
                error: expected,
                text: String::new()
            }
        );
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_api_and_transport_errors() {
        let transport = ScriptedTransport::new(vec![
            Err(OcrError::Api {
                status: 404,
                body: "model not found".to_string(),
            }),
            Ok(futures_util::stream::iter(vec![
                Ok(Bytes::from(delta("partial"))),
                Err(OcrError::Transport("connection reset".to_string())),
            ])
            .boxed()),
        ]);
        let session = OcrSession::new(transport, SessionConfig::default());

        let (_, events) = run_collect(&session).await;
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Failed(OcrError::Api { status: 404, .. })]
        ));

        let (outcome, events) = run_collect(&session).await;
        assert_eq!(
            events,
            vec![
                SessionEvent::Chunk("partial".to_string()),
                SessionEvent::Failed(OcrError::Transport("connection reset".to_string())),
            ]
        );
        assert!(matches!(outcome, RunOutcome::Failed { text, .. } if text == "partial"));
    }

    #[tokio::test]
    async fn test_repetition_stops_generation() {
        let sentence = "The same sentence again. ";
        let chunks: Vec<String> = (0..6).map(|_| delta(sentence)).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let transport = ScriptedTransport::new(vec![body(&refs)]);
        let session = OcrSession::new(transport, SessionConfig::default());

        let (outcome, events) = run_collect(&session).await;

        // The third copy trips the detector and is not forwarded
        assert_eq!(
            events,
            vec![
                SessionEvent::Chunk(sentence.to_string()),
                SessionEvent::Chunk(sentence.to_string()),
                SessionEvent::Failed(OcrError::RepetitionDetected(
                    ocrdesk_stream::RepetitionReason::RepeatedSentence
                )),
            ]
        );
        assert!(matches!(outcome, RunOutcome::Failed { text, .. } if text == sentence.repeat(3)));
    }

    #[tokio::test]
    async fn test_trailing_fragment_is_checked_for_repetition() {
        let sentence = "The same sentence again. ";
        let fragment = serde_json::json!({ "response": sentence }).to_string();
        let transport = ScriptedTransport::new(vec![body(&[
            &delta(sentence),
            &delta(sentence),
            &fragment,
        ])]);
        let session = OcrSession::new(transport, SessionConfig::default());

        let (outcome, events) = run_collect(&session).await;

        assert_eq!(events.len(), 3);
        assert_eq!(
            events.last(),
            Some(&SessionEvent::Failed(OcrError::RepetitionDetected(
                ocrdesk_stream::RepetitionReason::RepeatedSentence
            )))
        );
        assert!(matches!(outcome, RunOutcome::Failed { .. }));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_abort_while_idle_is_noop() {
        let session = OcrSession::new(ScriptedTransport::new(vec![]), SessionConfig::default());
        session.abort().await;
        session.abort().await;
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_abort_while_running() {
        let (tx, live) = live_body();
        let session = OcrSession::new(ScriptedTransport::new(vec![live]), SessionConfig::default());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let runner = session.clone();
        let handle = tokio::spawn(async move {
            runner
                .run(request(), move |e| {
                    let _ = events_tx.send(e);
                })
                .await
        });

        tx.send(Ok(Bytes::from(delta("before abort")))).unwrap();
        assert_eq!(
            events_rx.recv().await,
            Some(SessionEvent::Chunk("before abort".to_string()))
        );
        assert!(session.is_running());

        session.abort().await;
        assert_eq!(session.state(), SessionState::Cancelled);

        // Data arriving after the abort is never delivered
        let _ = tx.send(Ok(Bytes::from(delta("after abort"))));

        let outcome = handle.await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Cancelled {
                text: "before abort".to_string()
            }
        );
        assert_eq!(events_rx.recv().await, Some(SessionEvent::Cancelled));
        assert_eq!(events_rx.recv().await, None);

        // A second abort is a no-op
        session.abort().await;
        assert_eq!(session.state(), SessionState::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abort_after_last_line_still_cancels() {
        let transport = ScriptedTransport::new(vec![body(&[
            &delta("first"),
            "{\"response\":\"last\"}",
        ])]);
        let session = OcrSession::new(transport, SessionConfig::default());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let runner = session.clone();
        let watcher = session.clone();
        let handle = tokio::spawn(async move {
            runner
                .run(request(), move |e| {
                    let hold = e == SessionEvent::Chunk("last".to_string());
                    let _ = events_tx.send(e);
                    // Keep the run inside its final emit until the abort has begun
                    while hold && watcher.state() != SessionState::Cancelling {
                        std::thread::yield_now();
                    }
                })
                .await
        });

        assert_eq!(events_rx.recv().await, Some(SessionEvent::Chunk("first".to_string())));
        assert_eq!(events_rx.recv().await, Some(SessionEvent::Chunk("last".to_string())));
        assert!(session.is_running());

        session.abort().await;
        assert_eq!(session.state(), SessionState::Cancelled);

        assert_eq!(
            handle.await.unwrap(),
            RunOutcome::Cancelled {
                text: "firstlast".to_string()
            }
        );
        assert_eq!(events_rx.recv().await, Some(SessionEvent::Cancelled));
        assert_eq!(events_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropped_run_releases_session() {
        let (tx, live) = live_body();
        let transport = ScriptedTransport::new(vec![live, body(&[&delta("next")])]);
        let session = OcrSession::new(transport, SessionConfig::default());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let runner = session.clone();
        let handle = tokio::spawn(async move {
            runner
                .run(request(), move |e| {
                    let _ = events_tx.send(e);
                })
                .await
        });

        tx.send(Ok(Bytes::from(delta("partial")))).unwrap();
        assert_eq!(
            events_rx.recv().await,
            Some(SessionEvent::Chunk("partial".to_string()))
        );

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(session.state(), SessionState::Cancelled);

        // Nothing is left running, so abort returns at once
        session.abort().await;
        assert_eq!(session.state(), SessionState::Cancelled);

        let (outcome, _) = run_collect(&session).await;
        assert_eq!(outcome, RunOutcome::Completed { text: "next".to_string() });
    }

    #[tokio::test]
    async fn test_new_run_supersedes_running_one() {
        let (first_tx, first_body) = live_body();
        let transport = ScriptedTransport::new(vec![
            first_body,
            body(&[&delta("second run"), "{\"done\":true}\n"]),
        ]);
        let session = OcrSession::new(transport, SessionConfig::default());
        let (events_tx, mut first_events) = mpsc::unbounded_channel();

        let runner = session.clone();
        let first = tokio::spawn(async move {
            runner
                .run(request(), move |e| {
                    let _ = events_tx.send(e);
                })
                .await
        });

        first_tx.send(Ok(Bytes::from(delta("first run")))).unwrap();
        assert_eq!(
            first_events.recv().await,
            Some(SessionEvent::Chunk("first run".to_string()))
        );

        let (outcome, events) = run_collect(&session).await;

        assert_eq!(first.await.unwrap(), RunOutcome::Superseded);
        assert_eq!(first_events.recv().await, None);
        assert_eq!(
            events,
            vec![
                SessionEvent::Chunk("second run".to_string()),
                SessionEvent::Completed
            ]
        );
        assert_eq!(
            outcome,
            RunOutcome::Completed {
                text: "second run".to_string()
            }
        );
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_session_restarts_after_failure() {
        let transport = ScriptedTransport::new(vec![
            Err(OcrError::Transport("connection refused".to_string())),
            body(&[&delta("ok")]),
        ]);
        let session = OcrSession::new(transport, SessionConfig::default());

        let (outcome, _) = run_collect(&session).await;
        assert!(matches!(outcome, RunOutcome::Failed { .. }));

        let (outcome, events) = run_collect(&session).await;
        assert_eq!(outcome, RunOutcome::Completed { text: "ok".to_string() });
        assert_eq!(events.last(), Some(&SessionEvent::Completed));
    }
}
