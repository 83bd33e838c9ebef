//! Outbound SSE emission.
//!
//! - Wire encoders for data, heartbeat, done and error events
//! - [`RelaySink`]: the outbound channel behind a one-shot termination latch
//! - [`Heartbeat`]: periodic `: ping` task, cancelled exactly once

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Default interval between heartbeat comments.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Heartbeat comment frame.
pub const HEARTBEAT_FRAME: &[u8] = b": ping\n\n";

/// Terminal frame pair for a normally completed stream.
pub const DONE_FRAME: &[u8] = b"event: done\ndata: \"[DONE]\"\n\n";

/// Encode a text fragment as a JSON string so embedded newlines and quotes survive framing.
fn json_string(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

/// `data: "<fragment>"\n\n`
pub fn data_event(fragment: &str) -> Bytes {
    Bytes::from(format!("data: {}\n\n", json_string(fragment)))
}

/// `event: error\ndata: "<message>"\n\n`
pub fn error_event(message: &str) -> Bytes {
    Bytes::from(format!("event: error\ndata: {}\n\n", json_string(message)))
}

pub fn done_event() -> Bytes {
    Bytes::from_static(DONE_FRAME)
}

pub fn heartbeat_event() -> Bytes {
    Bytes::from_static(HEARTBEAT_FRAME)
}

/// Outbound SSE sink shared by the session driver and its heartbeat.
///
/// The sender lives in a `Mutex<Option<_>>`; taking it out is the
/// termination latch. Every write happens under the lock, so nothing can
/// land after the terminal frame, and dropping the taken sender closes the
/// response body.
#[derive(Clone)]
pub struct RelaySink {
    tx: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
}

impl RelaySink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Create a sink and the receiver the response body reads from.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Write a frame. Returns false once terminated or when the caller is gone.
    pub async fn send(&self, frame: Bytes) -> bool {
        let guard = self.tx.lock().await;
        match guard.as_ref() {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }

    /// Write the terminal frame and close the stream.
    ///
    /// Only the first terminal call (this or [`abandon`](Self::abandon)) has
    /// any effect; later calls return false.
    pub async fn finish(&self, frame: Bytes) -> bool {
        let mut guard = self.tx.lock().await;
        let Some(tx) = guard.take() else {
            return false;
        };
        tx.send(frame).await.is_ok()
    }

    /// Close the stream without a terminal frame (caller disconnected).
    pub async fn abandon(&self) -> bool {
        self.tx.lock().await.take().is_some()
    }

    pub async fn is_terminated(&self) -> bool {
        self.tx.lock().await.is_none()
    }

    /// Resolves once the downstream receiver has been dropped.
    ///
    /// Holds a sender clone while pending; callers must not keep this
    /// future alive past termination.
    pub async fn closed(&self) {
        let tx = self.tx.lock().await.clone();
        if let Some(tx) = tx {
            tx.closed().await;
        }
    }
}

/// Owner of the periodic heartbeat task.
pub struct Heartbeat {
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Start writing `: ping` every `interval`, first one after one full interval.
    pub fn spawn(sink: RelaySink, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !sink.send(heartbeat_event()).await {
                    break;
                }
            }
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Stop the heartbeat. Returns false if it was already cancelled.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel();
    }
}
