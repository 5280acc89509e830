//! # Server Discovery Registry
//!
//! This library implements the registry daemon that game server instances
//! ("hosts") register with and that matchmaking clients query for a filtered
//! list of currently live hosts.
//!
//! ## Core Responsibilities
//!
//! ### Host Registration
//! Hosts connect over TCP, register themselves with a signed JSON document,
//! and push status updates for the lifetime of the connection. A host exists
//! in the registry exactly as long as its connection does.
//!
//! ### Matchmaking Queries
//! Clients ask for hosts by game id, type, and mode. Hosts that opted into
//! skill matching are additionally filtered by an Elo window that widens per
//! querying address on every query that comes back empty.
//!
//! ### Message Continuity
//! Every message from a registered connection must carry the next value of a
//! deterministic challenge sequence seeded with a persisted secret. A
//! mismatch drops the connection and its registry entry. This filters
//! tampered and replayed messages; it is not cryptographic authentication.
//!
//! ## Architecture Design
//!
//! All registry and counter mutation happens in a single dispatch loop fed
//! by per-connection reader tasks over an event channel, so handlers never
//! race each other. Shared state sits behind `Arc` so the operator handle
//! and tests can observe it from outside the loop. A pulse arm of the same
//! loop broadcasts a zero-payload keep-alive to every connected peer.
//!
//! ## Module Organization
//!
//! - [`registry`] — the connection-keyed host table and its mutation rules
//! - [`query`] — host filtering and the per-address escalation counters
//! - [`network`] — TCP transport, protocol dispatch, and the liveness pulse
//! - [`config`] — the persisted signature seed
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::MasterServer;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let seed = server::config::get_or_create_seed("beacon.sig".as_ref())?;
//!     let server = MasterServer::bind("0.0.0.0:15940", seed, Duration::from_secs(30)).await?;
//!
//!     // Runs the dispatch loop: accepts connections, routes register/update/get
//!     // messages, prunes hosts on disconnect, and broadcasts keep-alives.
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod network;
pub mod query;
pub mod registry;
