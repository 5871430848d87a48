//! Infrastructure layer for the server application.
//!
//! Contains the OS-facing adapters: the TCP listener and its per-connection
//! tasks.  Discovery and the clipboard adapter live in `clipsync_core`.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `clipsync_core`, but MUST NOT be imported by `application` except for the
//! event types the use cases consume.

pub mod network;
