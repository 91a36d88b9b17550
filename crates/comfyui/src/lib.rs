//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, the job-event view of the stream,
//! HTTP API wrappers, shared per-session WebSocket connections, and the
//! [`transport::Transport`] seam the orchestrator is written against.

pub mod api;
pub mod client;
pub mod events;
pub mod history;
pub mod messages;
pub mod session;
pub mod transport;
