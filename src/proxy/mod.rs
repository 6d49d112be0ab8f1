//! HTTP relay module.
//!
//! This module accepts chat requests, validates them, relays them to the
//! upstream text-generation API and returns a batch reply or a token stream.

pub mod assemble;
pub mod extract;
mod handlers;
pub mod relay;
mod server;
pub mod stream;
pub mod types;
pub mod upstream;
pub mod validate;

pub use handlers::{RELAY_FALLBACKS_HEADER, RELAY_MODEL_HEADER, RELAY_REQUEST_ID_HEADER};
pub use relay::{Mode, Relay, RelayOutcome, RelayReply};
pub use server::{create_router, run_server, AppState, RequestId};
pub use stream::{FrameDecoder, Framing, StreamEvent};
pub use types::{ChatPayload, ChatReply, ChatRequest, Role, Turn};
pub use upstream::UpstreamClient;
pub use validate::validate_payload;
