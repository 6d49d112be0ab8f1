//! chat-relay - streaming chat relay with ordered model fallback
//!
//! This library provides the core functionality for the relay, including
//! configuration, request validation, model fallback and stream decoding.

pub mod config;
pub mod error;
pub mod proxy;
pub mod router;

pub use config::Config;
pub use error::{Error, Result};
