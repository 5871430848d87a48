//! Network infrastructure for the server application.
//!
//! # Sub-modules
//!
//! - **`transport_server`** – Binds the TCP listener (with port fallback),
//!   runs the per-connection authentication state machine, and fans clipboard
//!   messages out to every authenticated client.

pub mod transport_server;

pub use transport_server::{
    process_frame, ClientId, FrameOutcome, ServerEvent, ServerStatus, TransportError,
    TransportServer,
};
