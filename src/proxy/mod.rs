//! HTTP surface of the relay.
//!
//! Accepts prompt requests, gates them on the shared rate limiter, calls the
//! provider, and hands streaming bodies to the relay engine.

mod handlers;
mod server;
pub mod types;

pub use handlers::REQUEST_ID_HEADER;
pub use server::{create_router, run_server, AppState, RequestId};
pub use types::{GenerateRequest, GenerateResponse, RateLimitStatusBody, MAX_PROMPT_CHARS};
