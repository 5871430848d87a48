//! Application layer use cases for the server application.
//!
//! # Sub-modules
//!
//! - **`hub_relay`** – Connects the clipboard watcher to the transport
//!   server: local changes are broadcast to every client, and a change
//!   received from one client is applied locally and relayed to the others.

pub mod hub_relay;
