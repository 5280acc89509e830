use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 15940;
pub const PING_INTERVAL_SECS: u64 = 30;

/// Wildcard game type accepted by `get` queries.
pub const TYPE_ANY: &str = "any";
/// Wildcard game mode accepted by `get` queries.
pub const MODE_ALL: &str = "all";

/// One request document on the wire. Exactly one of the three operation keys
/// is expected; a document carrying none of them (the keep-alive `{}`) is a
/// no-op for both sides. The optional top-level `sig` is the continuity
/// signature a registered connection must present with every message.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register: Option<RegisterRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get: Option<GetRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<i32>,
}

impl Envelope {
    /// The zero-payload keep-alive document, serialized as `{}`.
    pub fn keep_alive() -> Self {
        Self::default()
    }

    /// Continuity signature of this document. The top-level field wins;
    /// signatures embedded in the operation payloads are the fallback.
    pub fn signature(&self) -> Option<i32> {
        self.sig
            .or_else(|| self.register.as_ref().map(|r| r.sig))
            .or_else(|| self.get.as_ref().and_then(|g| g.sig))
    }

    pub fn is_empty(&self) -> bool {
        self.register.is_none() && self.update.is_none() && self.get.is_none()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub port: u16,
    pub max_players: u32,
    pub player_count: u32,
    pub comment: String,
    pub id: String,
    #[serde(rename = "type")]
    pub game_type: String,
    pub mode: String,
    pub protocol: String,
    pub elo: i32,
    pub use_elo: bool,
    pub sig: i32,
}

/// Status refresh for an already-registered host. `port` is carried on the
/// wire but ports cannot change after registration, so receivers ignore it.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateRequest {
    pub player_count: u32,
    pub comment: String,
    #[serde(rename = "type")]
    pub game_type: String,
    pub mode: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct GetRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub game_type: String,
    pub mode: String,
    pub elo: i32,
    /// Only meaningful when the requesting connection registered a host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<i32>,
}

/// One discovered host in a `get` response. `eloDelta` echoes the
/// requester's current escalation level.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub comment: String,
    #[serde(rename = "type")]
    pub game_type: String,
    pub mode: String,
    pub players: u32,
    pub max_players: u32,
    pub protocol: String,
    pub elo: i32,
    pub use_elo: bool,
    pub elo_delta: u32,
}

/// The `get` response document, sent only to the requester.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HostList {
    pub hosts: Vec<HostInfo>,
}

const CHALLENGE_MULTIPLIER: u64 = 0x5_DEEC_E66D;
const CHALLENGE_INCREMENT: u64 = 0xB;
const CHALLENGE_MASK: u64 = (1 << 48) - 1;

/// Deterministic pseudo-random sequence shared between a host and the
/// registry. Both sides seed an instance with the same persisted secret and
/// advance it one draw per message, so a stale or fabricated signature can
/// never match. This is an integrity filter, not cryptographic
/// authentication; it assumes the seed is not leaked.
#[derive(Debug, Clone)]
pub struct ChallengeSequence {
    state: u64,
}

impl ChallengeSequence {
    pub fn new(seed: i32) -> Self {
        Self {
            state: (seed as u32 as u64 ^ CHALLENGE_MULTIPLIER) & CHALLENGE_MASK,
        }
    }

    /// Next value of the sequence. Always non-negative; drawing advances the
    /// internal state, so each value can be presented at most once.
    pub fn draw(&mut self) -> i32 {
        self.state = self
            .state
            .wrapping_mul(CHALLENGE_MULTIPLIER)
            .wrapping_add(CHALLENGE_INCREMENT)
            & CHALLENGE_MASK;
        (self.state >> 17) as i32
    }
}
