//! # clipsync-client
//!
//! Client side of clipsync: one connection to the hub, authenticated with the
//! shared password, reconnecting a bounded number of times when it drops.
//!
//! - **`application`** – [`application::peer_sync::PeerSync`], which sends
//!   local clipboard changes to the hub and applies the ones it relays back.
//! - **`infrastructure`** – the TCP [`infrastructure::network::TransportClient`].

pub mod application;
pub mod infrastructure;
