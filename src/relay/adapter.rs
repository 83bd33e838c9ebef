//! Upstream body normalization.
//!
//! Provider bodies reach the relay in one of three shapes: a pull-based
//! [`AsyncRead`], a push-based event channel, or an async sequence of byte
//! chunks. [`UpstreamStream`] hides the difference behind one `next()` call
//! that yields [`ChunkOrEnd`].

use std::io;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Read size used for the pull-reader shape.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Event pushed by an emitter-shaped upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitterEvent {
    Data(Bytes),
    End,
    Error(String),
}

/// One step of an upstream stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOrEnd {
    /// A non-empty chunk of raw bytes.
    Chunk(Bytes),
    /// Normal end of stream.
    End,
    /// The upstream failed; the string is the cause.
    Error(String),
}

/// The three upstream body shapes the relay understands.
pub enum UpstreamBody {
    /// Readiness-based pull.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// Event-subscription push.
    Emitter(mpsc::Receiver<EmitterEvent>),
    /// Iteration over byte chunks.
    Chunks(BoxStream<'static, io::Result<Bytes>>),
}

impl std::fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = match self {
            UpstreamBody::Reader(_) => "Reader",
            UpstreamBody::Emitter(_) => "Emitter",
            UpstreamBody::Chunks(_) => "Chunks",
        };
        f.debug_tuple("UpstreamBody").field(&shape).finish()
    }
}

impl UpstreamBody {
    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        UpstreamBody::Reader(Box::new(reader))
    }

    pub fn chunks<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        UpstreamBody::Chunks(stream.boxed())
    }

    /// Create an emitter body and the sender its producer pushes into.
    pub fn emitter(capacity: usize) -> (mpsc::Sender<EmitterEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, UpstreamBody::Emitter(rx))
    }

    /// Wrap a provider response as a chunk sequence.
    ///
    /// Returns `None` when the declared content type is something the relay
    /// cannot reframe (audio, octet-stream, ...). A missing content type is
    /// accepted since some providers omit it on streamed bodies.
    pub fn from_response(response: reqwest::Response) -> Option<Self> {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase());

        if let Some(ct) = content_type.as_deref() {
            if !is_text_content_type(ct) {
                tracing::warn!(content_type = %ct, "Upstream body has unsupported content type");
                return None;
            }
        }

        Some(UpstreamBody::chunks(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(io::Error::other)),
        ))
    }
}

fn is_text_content_type(ct: &str) -> bool {
    ct.starts_with("text/event-stream") || ct.starts_with("application/json") || ct.starts_with("text/plain")
}

/// A lazy, finite, non-restartable sequence of upstream chunks.
pub struct UpstreamStream {
    body: Option<UpstreamBody>,
    read_buf: Vec<u8>,
}

impl std::fmt::Debug for UpstreamStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamStream")
            .field("body", &self.body)
            .finish()
    }
}

impl UpstreamStream {
    /// Wrap an upstream body. An absent body is rejected immediately.
    pub fn new(body: Option<UpstreamBody>) -> Result<Self> {
        let body = body.ok_or(Error::UnsupportedStreamShape)?;
        let read_buf = match body {
            UpstreamBody::Reader(_) => vec![0; READ_CHUNK_SIZE],
            _ => Vec::new(),
        };
        Ok(Self {
            body: Some(body),
            read_buf,
        })
    }

    /// Wait for the next chunk, the end signal, or an error.
    ///
    /// Empty chunks are skipped. Once `End` or `Error` has been returned the
    /// body is released and every further call returns `End`.
    pub async fn next(&mut self) -> ChunkOrEnd {
        let Some(body) = self.body.as_mut() else {
            return ChunkOrEnd::End;
        };

        let event = loop {
            let step = match body {
                UpstreamBody::Reader(reader) => match reader.read(&mut self.read_buf).await {
                    Ok(0) => ChunkOrEnd::End,
                    Ok(n) => ChunkOrEnd::Chunk(Bytes::copy_from_slice(&self.read_buf[..n])),
                    Err(e) => ChunkOrEnd::Error(e.to_string()),
                },
                UpstreamBody::Emitter(rx) => match rx.recv().await {
                    Some(EmitterEvent::Data(bytes)) => ChunkOrEnd::Chunk(bytes),
                    Some(EmitterEvent::End) => ChunkOrEnd::End,
                    Some(EmitterEvent::Error(cause)) => ChunkOrEnd::Error(cause),
                    None => ChunkOrEnd::Error("emitter closed without end signal".to_string()),
                },
                UpstreamBody::Chunks(stream) => match stream.next().await {
                    Some(Ok(bytes)) => ChunkOrEnd::Chunk(bytes),
                    Some(Err(e)) => ChunkOrEnd::Error(e.to_string()),
                    None => ChunkOrEnd::End,
                },
            };

            match step {
                ChunkOrEnd::Chunk(ref bytes) if bytes.is_empty() => continue,
                other => break other,
            }
        };

        if !matches!(event, ChunkOrEnd::Chunk(_)) {
            self.body = None;
        }
        event
    }
}
