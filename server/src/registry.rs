//! Host table management for the discovery registry
//!
//! This module owns the server-side record of every registered host:
//! - Host lifecycle (register, status update, removal on disconnect)
//! - The per-connection challenge sequence used to vet further messages
//! - Snapshots for the operator surface and the query engine
//!
//! The table is keyed by connection identity, so a host can exist only while
//! the connection that registered it is alive, and re-registering from the
//! same connection replaces the entry instead of duplicating it.

use log::info;
use shared::{ChallengeSequence, RegisterRequest, UpdateRequest};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

/// One registered game server instance.
///
/// Everything except the presentation fields touched by `update` is fixed at
/// registration time. `address` comes from the transport's view of the peer,
/// never from the payload, so a host cannot advertise an endpoint it does
/// not own.
#[derive(Debug, Clone)]
pub struct Host {
    pub name: String,
    /// Peer address as seen by the transport.
    pub address: IpAddr,
    pub port: u16,
    pub max_players: u32,
    pub player_count: u32,
    pub comment: String,
    pub game_id: String,
    pub game_type: String,
    pub mode: String,
    pub protocol: String,
    pub elo: i32,
    pub use_elo: bool,
    /// Challenge state advanced on every validated message from this
    /// connection. Private so nothing can peek ahead or rewind it.
    challenge: ChallengeSequence,
}

impl Host {
    /// Builds a host from a validated registration.
    ///
    /// The caller is expected to have drawn the first challenge value from
    /// `challenge` and matched it against the registration signature; the
    /// sequence is stored as-is, already advanced past that first draw.
    pub fn new(request: &RegisterRequest, address: IpAddr, challenge: ChallengeSequence) -> Self {
        Self {
            name: request.name.clone(),
            address,
            port: request.port,
            max_players: request.max_players,
            player_count: request.player_count,
            comment: request.comment.clone(),
            game_id: request.id.clone(),
            game_type: request.game_type.clone(),
            mode: request.mode.clone(),
            protocol: request.protocol.clone(),
            elo: request.elo,
            use_elo: request.use_elo,
            challenge,
        }
    }

    /// Next expected continuity signature. Drawing advances the sequence, so
    /// a value that was already presented once can never match again.
    pub fn next_signature(&mut self) -> i32 {
        self.challenge.draw()
    }
}

/// Registered hosts indexed by the identity of the owning connection.
#[derive(Debug, Default)]
pub struct HostRegistry {
    hosts: HashMap<u64, Host>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self {
            hosts: HashMap::new(),
        }
    }

    /// Inserts or replaces the host owned by `connection_id`.
    ///
    /// Re-registration from the same connection overwrites the previous
    /// entry, so the table size is invariant under repeated registrations.
    pub fn insert(&mut self, connection_id: u64, host: Host) {
        self.hosts.insert(connection_id, host);
    }

    pub fn get_mut(&mut self, connection_id: u64) -> Option<&mut Host> {
        self.hosts.get_mut(&connection_id)
    }

    pub fn contains(&self, connection_id: u64) -> bool {
        self.hosts.contains_key(&connection_id)
    }

    /// Removes the host owned by `connection_id`, if any.
    ///
    /// Returns true when an entry was removed. Exactly this one entry is
    /// affected; hosts owned by other connections are untouched.
    pub fn remove(&mut self, connection_id: u64) -> bool {
        if let Some(host) = self.hosts.remove(&connection_id) {
            info!(
                "Host [{}] on port [{}] unregistered",
                host.address, host.port
            );
            true
        } else {
            false
        }
    }

    /// Applies a status update to the host owned by `connection_id`.
    ///
    /// Only the mutable presentation fields change: comment, type, mode, and
    /// player count. `port` (and everything else fixed at registration) is
    /// left untouched even when the payload carries a value for it. Returns
    /// false when the connection owns no host; callers treat that as a
    /// silent no-op.
    pub fn apply_update(&mut self, connection_id: u64, update: &UpdateRequest) -> bool {
        match self.hosts.get_mut(&connection_id) {
            Some(host) => {
                host.comment = update.comment.clone();
                host.game_type = update.game_type.clone();
                host.mode = update.mode.clone();
                host.player_count = update.player_count;
                true
            }
            None => false,
        }
    }

    /// All registered hosts, in no particular order.
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// Advertised endpoints, for the operator `list` surface.
    pub fn endpoints(&self) -> Vec<SocketAddr> {
        self.hosts
            .values()
            .map(|host| SocketAddr::new(host.address, host.port))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
