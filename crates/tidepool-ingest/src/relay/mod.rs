//! Relay connections and the fleet that manages them.
//!
//! - [`connection`]: the [`RelayConnection`] contract
//! - [`client`]: nostr-sdk implementation, one client per relay
//! - [`memory`]: in-process implementation for offline runs and tests
//! - [`fleet`]: concurrent fan-out over all connections
//! - [`url`]: URL normalization and blocklist

pub mod client;
pub mod connection;
pub mod fleet;
pub mod memory;
pub mod url;

pub use client::NostrConnection;
pub use connection::{ConnectionFactory, EventHandler, RelayConnection};
pub use fleet::{CUSTOM_PRESET, DEFAULT_PRESET, DEFAULT_RELAYS, PublishReport, RelayFleet};
pub use memory::MemoryConnection;
pub use url::{RelayUrlError, normalize_relay_url};
