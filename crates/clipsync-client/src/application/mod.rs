//! Application layer for the client: use cases that orchestrate the
//! clipboard watcher and the transport.

pub mod peer_sync;
