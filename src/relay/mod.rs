//! Streaming relay engine.
//!
//! Turns a provider's event-stream body into the normalized outbound SSE
//! stream:
//!
//! ```text
//! UpstreamStream -> Utf8Decoder -> FrameReassembler -> extract_fragments -> RelaySink
//! ```
//!
//! [`relay`] is the entry point used by the HTTP handlers.

pub mod adapter;
pub mod decoder;
pub mod emitter;
pub mod extract;
pub mod frames;
pub mod session;

pub use adapter::{ChunkOrEnd, EmitterEvent, UpstreamBody, UpstreamStream};
pub use decoder::Utf8Decoder;
pub use emitter::{Heartbeat, RelaySink};
pub use extract::{extract_fragments, fragments_from_value};
pub use frames::{FrameOverflow, FrameReassembler};
pub use session::{relay, RelaySession, RelaySettings, SessionOutcome, SessionState};
