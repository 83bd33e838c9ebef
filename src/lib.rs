//! genrelay - streaming relay for generative text providers
//!
//! This library provides the core functionality for the genrelay server:
//! configuration, the sliding-window rate limiter, the provider client, and
//! the streaming relay engine that normalizes provider event streams into
//! Server-Sent Events.

pub mod config;
pub mod error;
pub mod limiter;
pub mod provider;
pub mod proxy;
pub mod relay;

pub use config::Config;
pub use error::{Error, Result};
