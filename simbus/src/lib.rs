//! # simbus
//!
//! An in-process simulated RPC fabric for torturing replicated state
//! machines.
//!
//! Distributed-systems code is easy to get right on a friendly network and
//! very hard to get right on a real one. simbus hosts many logical servers
//! and client endpoints inside one process, routes calls between them by
//! dotted `Service.Method` names, and injects the unfriendliness on
//! purpose: random delays, dropped requests and replies, reordered
//! delivery, partitioned endpoints and servers that vanish mid-call, all
//! without touching a socket, and reproducibly when seeded.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Test code                        │
//! │   builds Services, Servers, ClientEnds; turns knobs  │
//! ├──────────────────────────────────────────────────────┤
//! │   Network (registry + pump + delivery state machine) │
//! │   • one delivery task per call                       │
//! │   • reliability / reordering / delay knobs           │
//! ├──────────────────────────────────────────────────────┤
//! │   Server → Service (frame-to-frame dispatch tables)  │
//! ├──────────────────────────────────────────────────────┤
//! │   simbus-codec (guarded JSON frames)                 │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`Network`] | The fabric: routing tables, fault knobs, delivery |
//! | [`Server`] | Named container of services with call counting |
//! | [`Service`] | Method table over a shared receiver object |
//! | [`ClientEnd`] | Named handle that originates calls |
//! | [`Persister`] | Opaque state/snapshot blob holder for peers |
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use simbus::{Network, Server, Service};
//!
//! struct Echo;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let net = Network::new();
//!
//! let server = Arc::new(Server::new());
//! server.add_service(
//!     Service::builder(Arc::new(Echo))
//!         .method("Upper", |_echo, s: String| async move { s.to_uppercase() })
//!         .build(),
//! );
//! net.add_server("srv0", server);
//!
//! let end = net.make_end("client0");
//! net.connect("client0", "srv0");
//! net.enable("client0", true);
//!
//! let mut reply = String::new();
//! assert!(end.call("Echo.Upper", &"hi".to_string(), &mut reply).await);
//! assert_eq!(reply, "HI");
//! # net.cleanup();
//! # }
//! ```
//!
//! ## Semantics worth knowing
//!
//! - A `call` returning `false` never says why. Partition, drop and
//!   teardown are indistinguishable by design.
//! - Counters: [`Network::total_count`] counts requests that entered the
//!   pump; [`Network::total_bytes`] counts request bytes at ingest and
//!   reply bytes at actual delivery.
//! - Unknown services and methods, duplicate endpoint names and
//!   undecodable replies panic: they are bugs in the test, not simulated
//!   network conditions.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod client;
mod message;
mod names;
mod network;
mod persist;
mod server;
mod service;

pub use client::ClientEnd;
pub use names::{EndpointName, ServerName};
pub use network::{FaultProfile, Network};
pub use persist::Persister;
pub use server::Server;
pub use service::{Service, ServiceBuilder};

// Payload helpers from the codec layer, re-exported so tests depending on
// simbus alone can register polymorphic payload types.
pub use simbus_codec::{GuardedCodec, JsonCodec, MessageCodec, Tagged, register, register_by_name};
