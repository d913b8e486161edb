//! The sync + live-update client (C7): the library a consuming HTTP/TCP
//! router links against to build and maintain a local routing table from
//! this service's HTTP surface. See spec.md §4.7.

pub mod client;
pub mod transport;
pub mod trie;

pub use client::SyncClient;
pub use transport::{EventKind, SyncEvent, TokenFetcher, Transport, TransportError};
pub use trie::{Endpoint, Registry};
