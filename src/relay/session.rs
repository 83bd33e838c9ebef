//! Relay session controller.
//!
//! Drives one upstream body through decode → reassemble → extract → emit,
//! owning the heartbeat and the outbound sink for the life of the exchange.
//! Whatever ends the session (upstream end, upstream error, caller
//! disconnect), the heartbeat is cancelled and the sink closed exactly once.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use super::adapter::{ChunkOrEnd, UpstreamStream};
use super::decoder::Utf8Decoder;
use super::emitter::{self, Heartbeat, RelaySink, DEFAULT_HEARTBEAT_INTERVAL};
use super::extract::extract_fragments;
use super::frames::{FrameReassembler, DEFAULT_MAX_FRAME_BYTES};
use crate::error::{Error, Result};

/// Default capacity of the outbound frame channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Per-session tunables.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub heartbeat_interval: Duration,
    pub channel_capacity: usize,
    /// Largest unterminated frame accepted before the stream is failed.
    pub max_frame_bytes: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Lifecycle of a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Streaming,
    Done,
    Errored,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Upstream ended normally; the done pair was sent.
    Completed { fragments: usize },
    /// Upstream failed mid-stream; an error event was sent.
    Failed { fragments: usize, message: String },
    /// The caller went away; nothing further was written.
    Disconnected { fragments: usize },
}

/// Result of pushing decoded text through to the sink.
enum Emit {
    Sent,
    Disconnected,
    Failed(String),
}

/// State for one in-flight relay.
pub struct RelaySession {
    upstream: UpstreamStream,
    decoder: Utf8Decoder,
    frames: FrameReassembler,
    state: SessionState,
    fragments: usize,
}

impl RelaySession {
    pub fn new(upstream: UpstreamStream) -> Self {
        Self::with_settings(upstream, &RelaySettings::default())
    }

    pub fn with_settings(upstream: UpstreamStream, settings: &RelaySettings) -> Self {
        Self {
            upstream,
            decoder: Utf8Decoder::new(),
            frames: FrameReassembler::with_limit(settings.max_frame_bytes),
            state: SessionState::Init,
            fragments: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Wait up to `window` for the first upstream event before anything is
    /// committed to the caller.
    ///
    /// An upstream error inside the window is returned as
    /// [`Error::TransportInterrupted`] so the caller gets a plain error
    /// status instead of an event stream. `Ok(None)` means upstream stayed
    /// silent for the whole window and the response should be committed.
    pub async fn prime(&mut self, window: Duration) -> Result<Option<ChunkOrEnd>> {
        match tokio::time::timeout(window, self.upstream.next()).await {
            Ok(ChunkOrEnd::Error(cause)) => {
                self.state = SessionState::Errored;
                tracing::warn!(error = %cause, "Upstream failed before streaming began");
                Err(Error::TransportInterrupted(cause))
            }
            Ok(event) => Ok(Some(event)),
            Err(_) => {
                tracing::debug!(
                    window_ms = window.as_millis() as u64,
                    "Upstream silent after headers, committing stream"
                );
                Ok(None)
            }
        }
    }

    /// Drive the session to completion, starting with the primed event if any.
    pub async fn run(
        mut self,
        first: Option<ChunkOrEnd>,
        sink: RelaySink,
        mut heartbeat: Heartbeat,
    ) -> SessionOutcome {
        self.state = SessionState::Streaming;
        let mut pending = first;

        let outcome = loop {
            let event = match pending.take() {
                Some(event) => event,
                None => {
                    let next = tokio::select! {
                        biased;
                        _ = sink.closed() => None,
                        next = self.upstream.next() => Some(next),
                    };
                    match next {
                        Some(next) => next,
                        None => break self.disconnected(),
                    }
                }
            };

            match event {
                ChunkOrEnd::Chunk(bytes) => {
                    let text = self.decoder.decode(&bytes);
                    match self.emit_text(&text, &sink).await {
                        Emit::Sent => {}
                        Emit::Disconnected => break self.disconnected(),
                        Emit::Failed(message) => {
                            break self.fail(message, &sink, &mut heartbeat).await
                        }
                    }
                }
                ChunkOrEnd::End => {
                    let tail = self.decoder.finish();
                    match self.emit_text(&tail, &sink).await {
                        Emit::Sent => {}
                        Emit::Disconnected => break self.disconnected(),
                        Emit::Failed(message) => {
                            break self.fail(message, &sink, &mut heartbeat).await
                        }
                    }
                    let trailing = std::mem::take(&mut self.frames).finish();
                    if !self.emit_frames(trailing, &sink).await {
                        break self.disconnected();
                    }

                    heartbeat.cancel();
                    sink.finish(emitter::done_event()).await;
                    self.state = SessionState::Done;
                    break SessionOutcome::Completed {
                        fragments: self.fragments,
                    };
                }
                ChunkOrEnd::Error(message) => {
                    break self.fail(message, &sink, &mut heartbeat).await;
                }
            }
        };

        if matches!(outcome, SessionOutcome::Disconnected { .. }) {
            heartbeat.cancel();
            sink.abandon().await;
        }
        outcome
    }

    async fn fail(
        &mut self,
        message: String,
        sink: &RelaySink,
        heartbeat: &mut Heartbeat,
    ) -> SessionOutcome {
        heartbeat.cancel();
        sink.finish(emitter::error_event(&message)).await;
        self.state = SessionState::Errored;
        SessionOutcome::Failed {
            fragments: self.fragments,
            message,
        }
    }

    fn disconnected(&mut self) -> SessionOutcome {
        self.state = SessionState::Errored;
        SessionOutcome::Disconnected {
            fragments: self.fragments,
        }
    }

    async fn emit_text(&mut self, text: &str, sink: &RelaySink) -> Emit {
        if text.is_empty() {
            return Emit::Sent;
        }
        let frames = match self.frames.push(text) {
            Ok(frames) => frames,
            Err(overflow) => return Emit::Failed(overflow.to_string()),
        };
        if self.emit_frames(frames, sink).await {
            Emit::Sent
        } else {
            Emit::Disconnected
        }
    }

    async fn emit_frames(&mut self, frames: Vec<String>, sink: &RelaySink) -> bool {
        for frame in frames {
            for fragment in extract_fragments(&frame) {
                if !sink.send(emitter::data_event(&fragment)).await {
                    return false;
                }
                self.fragments += 1;
            }
        }
        true
    }
}

/// Relay an upstream body to the caller as a normalized SSE response.
///
/// Waits at most one heartbeat interval for the first upstream event so an
/// immediate failure still becomes a plain error response. After that the
/// stream is committed: if upstream is still silent a ping goes out at once,
/// and the heartbeat keeps the connection alive from then on.
pub async fn relay(upstream: UpstreamStream, settings: &RelaySettings) -> Result<Response> {
    let mut session = RelaySession::with_settings(upstream, settings);
    let first = session.prime(settings.heartbeat_interval).await?;

    let (sink, rx) = RelaySink::channel(settings.channel_capacity);
    if first.is_none() {
        sink.send(emitter::heartbeat_event()).await;
    }
    let heartbeat = Heartbeat::spawn(sink.clone(), settings.heartbeat_interval);

    tokio::spawn(
        async move {
            match session.run(first, sink, heartbeat).await {
                SessionOutcome::Completed { fragments } => {
                    tracing::info!(fragments, "Relay completed");
                }
                SessionOutcome::Failed { fragments, message } => {
                    tracing::error!(fragments, error = %message, "Upstream failed mid-stream");
                }
                SessionOutcome::Disconnected { fragments } => {
                    tracing::info!(fragments, "Caller disconnected, relay abandoned");
                }
            }
        }
        .instrument(tracing::Span::current()),
    );

    sse_response(rx)
}

fn sse_response(rx: tokio::sync::mpsc::Receiver<bytes::Bytes>) -> Result<Response> {
    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|e| Error::Internal(format!("Failed to build SSE response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::adapter::{EmitterEvent, UpstreamBody};
    use bytes::Bytes;

    fn frame(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"candidates": [{"content": {"parts": [{"text": text}]}}]})
        )
    }

    fn chunk_stream(chunks: Vec<std::io::Result<Bytes>>) -> UpstreamStream {
        UpstreamStream::new(Some(UpstreamBody::chunks(futures::stream::iter(chunks)))).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_two_fragments_then_done() {
        let upstream = chunk_stream(vec![
            Ok(Bytes::from(frame("Hi"))),
            Ok(Bytes::from(frame(" there"))),
        ]);
        let response = relay(upstream, &RelaySettings::default()).await.unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        assert_eq!(
            body_text(response).await,
            "data: \"Hi\"\n\ndata: \" there\"\n\nevent: done\ndata: \"[DONE]\"\n\n"
        );
    }

    #[tokio::test]
    async fn test_frames_split_across_arbitrary_chunks() {
        let raw = format!("{}{}{}", frame("a"), frame("é✓"), frame("c"));
        let bytes = raw.as_bytes();
        let chunks = bytes
            .chunks(3)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let response = relay(chunk_stream(chunks), &RelaySettings::default())
            .await
            .unwrap();
        assert_eq!(
            body_text(response).await,
            "data: \"a\"\n\ndata: \"é✓\"\n\ndata: \"c\"\n\nevent: done\ndata: \"[DONE]\"\n\n"
        );
    }

    #[tokio::test]
    async fn test_missing_trailing_blank_line_recovered() {
        let raw = format!(
            "{}data: {}",
            frame("first"),
            serde_json::json!({"candidates": [{"content": {"parts": [{"text": "last"}]}}]})
        );
        let response = relay(
            chunk_stream(vec![Ok(Bytes::from(raw))]),
            &RelaySettings::default(),
        )
        .await
        .unwrap();
        assert_eq!(
            body_text(response).await,
            "data: \"first\"\n\ndata: \"last\"\n\nevent: done\ndata: \"[DONE]\"\n\n"
        );
    }

    #[tokio::test]
    async fn test_empty_upstream_still_terminates() {
        let response = relay(chunk_stream(vec![]), &RelaySettings::default())
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "event: done\ndata: \"[DONE]\"\n\n");
    }

    #[tokio::test]
    async fn test_error_before_first_byte_is_not_streamed() {
        let upstream = chunk_stream(vec![Err(std::io::Error::other("connection reset"))]);
        let err = relay(upstream, &RelaySettings::default()).await.unwrap_err();
        match err {
            Error::TransportInterrupted(msg) => assert!(msg.contains("connection reset")),
            other => panic!("expected TransportInterrupted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_mid_stream_emits_error_event() {
        let upstream = chunk_stream(vec![
            Ok(Bytes::from(frame("partial"))),
            Err(std::io::Error::other("connection reset")),
            Ok(Bytes::from(frame("never"))),
        ]);
        let response = relay(upstream, &RelaySettings::default()).await.unwrap();
        let body = body_text(response).await;
        assert_eq!(
            body,
            "data: \"partial\"\n\nevent: error\ndata: \"connection reset\"\n\n"
        );
        assert!(!body.contains("[DONE]"));
    }

    #[tokio::test]
    async fn test_run_outcomes() {
        let (sink, mut rx) = RelaySink::channel(8);
        let heartbeat = Heartbeat::spawn(sink.clone(), Duration::from_secs(15));
        let mut session = RelaySession::new(chunk_stream(vec![Ok(Bytes::from(frame("x")))]));
        assert_eq!(session.state(), SessionState::Init);

        let first = session.prime(Duration::from_secs(15)).await.unwrap();
        let outcome = session.run(first, sink.clone(), heartbeat).await;
        assert_eq!(outcome, SessionOutcome::Completed { fragments: 1 });
        assert!(sink.is_terminated().await);

        assert_eq!(rx.recv().await, Some(emitter::data_event("x")));
        assert_eq!(rx.recv().await, Some(emitter::done_event()));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_while_upstream_idle() {
        let (tx, body) = UpstreamBody::emitter(8);
        let upstream = UpstreamStream::new(Some(body)).unwrap();
        let (sink, mut rx) = RelaySink::channel(8);
        let heartbeat = Heartbeat::spawn(sink.clone(), Duration::from_secs(15));

        tx.send(EmitterEvent::Data(Bytes::from(frame("hello"))))
            .await
            .unwrap();
        let mut session = RelaySession::new(upstream);
        let first = session.prime(Duration::from_secs(15)).await.unwrap();
        let driver = tokio::spawn(session.run(first, sink, heartbeat));

        assert_eq!(rx.recv().await, Some(emitter::data_event("hello")));
        // Upstream is idle; paused time auto-advances to the next heartbeat.
        assert_eq!(rx.recv().await, Some(emitter::heartbeat_event()));
        assert_eq!(rx.recv().await, Some(emitter::heartbeat_event()));

        tx.send(EmitterEvent::End).await.unwrap();
        let mut rest = Vec::new();
        while let Some(frame) = rx.recv().await {
            rest.push(frame);
        }
        // A ping may already be queued ahead of the end signal; done is always last.
        assert_eq!(rest.last(), Some(&emitter::done_event()));
        assert!(rest[..rest.len() - 1]
            .iter()
            .all(|f| *f == emitter::heartbeat_event()));
        assert_eq!(
            driver.await.unwrap(),
            SessionOutcome::Completed { fragments: 1 }
        );
    }

    #[tokio::test]
    async fn test_disconnect_stops_reading_upstream() {
        let (tx, body) = UpstreamBody::emitter(8);
        let upstream = UpstreamStream::new(Some(body)).unwrap();
        let (sink, rx) = RelaySink::channel(8);
        let heartbeat = Heartbeat::spawn(sink.clone(), Duration::from_secs(15));

        let driver = tokio::spawn(RelaySession::new(upstream).run(
            Some(ChunkOrEnd::Chunk(Bytes::from(frame("one")))),
            sink.clone(),
            heartbeat,
        ));
        drop(rx);

        let outcome = driver.await.unwrap();
        assert!(matches!(outcome, SessionOutcome::Disconnected { .. }));
        assert!(sink.is_terminated().await);
        // The session dropped its end of the upstream emitter.
        assert!(tx.is_closed());
    }

    /// Every frame of a committed response, in order.
    async fn body_frames(response: Response) -> Vec<Bytes> {
        let mut body = response.into_body().into_data_stream();
        let mut frames = Vec::new();
        while let Some(frame) = body.next().await {
            frames.push(frame.unwrap());
        }
        frames
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_while_upstream_silent_before_first_chunk() {
        let (tx, body) = UpstreamBody::emitter(8);
        let upstream = UpstreamStream::new(Some(body)).unwrap();

        let response = tokio::time::timeout(
            Duration::from_secs(45),
            relay(upstream, &RelaySettings::default()),
        )
        .await
        .expect("response committed while upstream is silent")
        .unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let mut body = response.into_body().into_data_stream();
        assert_eq!(
            body.next().await.unwrap().unwrap(),
            emitter::heartbeat_event()
        );

        tx.send(EmitterEvent::Data(Bytes::from(frame("late"))))
            .await
            .unwrap();
        tx.send(EmitterEvent::End).await.unwrap();

        let mut rest = Vec::new();
        while let Some(frame) = body.next().await {
            let frame = frame.unwrap();
            if frame != emitter::heartbeat_event() {
                rest.push(frame);
            }
        }
        assert_eq!(rest, vec![emitter::data_event("late"), emitter::done_event()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_after_commit_is_sent_in_band() {
        let (tx, body) = UpstreamBody::emitter(8);
        let upstream = UpstreamStream::new(Some(body)).unwrap();
        let response = relay(upstream, &RelaySettings::default()).await.unwrap();

        tx.send(EmitterEvent::Error("provider went away".into()))
            .await
            .unwrap();
        assert_eq!(
            body_frames(response).await,
            vec![
                emitter::heartbeat_event(),
                emitter::error_event("provider went away"),
            ]
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_fails_stream() {
        let settings = RelaySettings {
            max_frame_bytes: 64,
            ..RelaySettings::default()
        };
        let huge = format!("data: {}", "x".repeat(100));
        let (a, b) = huge.split_at(50);
        let upstream = chunk_stream(vec![
            Ok(Bytes::from(frame("a"))),
            Ok(Bytes::from(a.to_string())),
            Ok(Bytes::from(b.to_string())),
            Ok(Bytes::from_static(b"\n\n")),
        ]);

        let response = relay(upstream, &settings).await.unwrap();
        let body = body_text(response).await;
        assert_eq!(
            body,
            "data: \"a\"\n\nevent: error\ndata: \"event frame exceeded 64 bytes without a delimiter\"\n\n"
        );
        assert!(!body.contains("[DONE]"));
    }

    #[tokio::test]
    async fn test_mebibyte_frame_relayed_intact() {
        let text = "y".repeat(1024 * 1024 + 10);
        let raw = frame(&text);
        let (a, b) = raw.split_at(raw.len() / 2);
        let upstream = chunk_stream(vec![
            Ok(Bytes::from(a.to_string())),
            Ok(Bytes::from(b.to_string())),
        ]);

        let response = relay(upstream, &RelaySettings::default()).await.unwrap();
        let expected = format!(
            "{}{}",
            String::from_utf8(emitter::data_event(&text).to_vec()).unwrap(),
            "event: done\ndata: \"[DONE]\"\n\n"
        );
        assert_eq!(body_text(response).await, expected);
    }
}
