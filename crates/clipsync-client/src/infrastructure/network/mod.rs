//! Network infrastructure for the client application.
//!
//! # Sub-modules
//!
//! - **`transport_client`** – Connects to the hub, sends `AUTH`, forwards
//!   inbound messages on an `mpsc` channel, and retries with a fixed delay up
//!   to `max_reconnect_attempts` times.

pub mod transport_client;

pub use transport_client::{
    ClientEvent, ClientNetworkError, ClientStatus, ConnectionPhase, ConnectionTarget,
    TransportClient,
};
