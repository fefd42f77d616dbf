//! Chat Relay Gateway
//!
//! Stateless HTTP relay between browser clients and the LLM API. The server
//! holds the credentials, injects a default agent id on session create, and
//! passes upstream replies back buffered or streamed as the caller asked.
//!
//! # Architecture
//!
//! - `upstream` - credentialed LLM API connection with a response timeout
//! - `server` - axum router for chat relay, publish, presence and static files

mod server;
mod upstream;

pub use server::{AppState, router, serve};
pub use upstream::{JSON_API, LlmUpstream};
