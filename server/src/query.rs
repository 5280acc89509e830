//! Host filtering for `get` queries and the per-address escalation counters.

use crate::registry::Host;
use shared::{GetRequest, HostInfo, MODE_ALL, TYPE_ANY};
use std::collections::HashMap;
use std::net::IpAddr;

/// Miss counters per querying address.
///
/// A counter appears at 1 on an address's first query, grows by one on every
/// further query, and is dropped entirely the moment a query returns at
/// least one host. Absence is equivalent to zero attempts. Counters are
/// independent across addresses and survive the querying connection.
#[derive(Debug, Default)]
pub struct RequestTracker {
    attempts: HashMap<IpAddr, u32>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            attempts: HashMap::new(),
        }
    }

    /// Records a query from `address` and returns the resulting attempt
    /// count. Counting happens on receipt, before any filtering, so the
    /// value returned here is the delta echoed in the same response.
    pub fn bump(&mut self, address: IpAddr) -> u32 {
        let attempts = self.attempts.entry(address).or_insert(0);
        *attempts += 1;
        *attempts
    }

    /// Forgets the counter for `address`. Called when a query matched.
    pub fn reset(&mut self, address: &IpAddr) {
        self.attempts.remove(address);
    }

    pub fn attempts(&self, address: &IpAddr) -> u32 {
        self.attempts.get(address).copied().unwrap_or(0)
    }
}

/// Filters `hosts` against a query at the given escalation `delta`.
///
/// Narrowing only: the id filter selects the game, `type` and `mode` narrow
/// further unless they carry their wildcard values. Hosts that opted into
/// skill matching are dropped when full, and, while an Elo range is
/// configured, when the requester's rating falls strictly inside the window
/// `(host.elo - elo_range * delta, host.elo + elo_range * delta)`. The
/// window boundary itself is not excluded, and the inside-the-window
/// polarity matches the wire behavior deployed hosts expect.
pub fn select_hosts<'a>(
    hosts: impl Iterator<Item = &'a Host>,
    query: &GetRequest,
    elo_range: i32,
    delta: u32,
) -> Vec<HostInfo> {
    hosts
        .filter(|host| host.game_id == query.id)
        .filter(|host| query.game_type == TYPE_ANY || host.game_type == query.game_type)
        .filter(|host| query.mode == MODE_ALL || host.mode == query.mode)
        .filter(|host| !excluded_by_skill(host, query.elo, elo_range, delta))
        .map(|host| describe(host, delta))
        .collect()
}

fn excluded_by_skill(host: &Host, elo: i32, elo_range: i32, delta: u32) -> bool {
    if !host.use_elo {
        return false;
    }
    if host.player_count >= host.max_players {
        return true;
    }
    if elo_range == 0 {
        return false;
    }

    // Widened in i64 so large ranges at high deltas cannot wrap.
    let spread = elo_range as i64 * delta as i64;
    let elo = elo as i64;
    let host_elo = host.elo as i64;
    elo > host_elo - spread && elo < host_elo + spread
}

fn describe(host: &Host, delta: u32) -> HostInfo {
    HostInfo {
        name: host.name.clone(),
        address: host.address.to_string(),
        port: host.port,
        comment: host.comment.clone(),
        game_type: host.game_type.clone(),
        mode: host.mode.clone(),
        players: host.player_count,
        max_players: host.max_players,
        protocol: host.protocol.clone(),
        elo: host.elo,
        use_elo: host.use_elo,
        elo_delta: delta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{ChallengeSequence, RegisterRequest};

    fn host(id: &str, game_type: &str, mode: &str) -> Host {
        Host::new(
            &RegisterRequest {
                name: format!("{}-{}-{}", id, game_type, mode),
                port: 4000,
                max_players: 8,
                player_count: 2,
                comment: String::new(),
                id: id.into(),
                game_type: game_type.into(),
                mode: mode.into(),
                protocol: "1".into(),
                elo: 1000,
                use_elo: false,
                sig: 0,
            },
            "127.0.0.1".parse().unwrap(),
            ChallengeSequence::new(1),
        )
    }

    fn elo_host(elo: i32, player_count: u32, max_players: u32) -> Host {
        let mut host = host("pong", "ffa", "classic");
        host.elo = elo;
        host.use_elo = true;
        host.player_count = player_count;
        host.max_players = max_players;
        host
    }

    fn query(id: &str, game_type: &str, mode: &str, elo: i32) -> GetRequest {
        GetRequest {
            id: id.into(),
            game_type: game_type.into(),
            mode: mode.into(),
            elo,
            sig: None,
        }
    }

    #[test]
    fn game_id_selects_the_game() {
        let hosts = vec![host("pong", "ffa", "classic"), host("breakout", "ffa", "classic")];
        let found = select_hosts(hosts.iter(), &query("pong", TYPE_ANY, MODE_ALL, 0), 0, 1);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "pong-ffa-classic");
    }

    #[test]
    fn wildcards_are_identity_filters() {
        let hosts = vec![
            host("pong", "ffa", "classic"),
            host("pong", "teams", "ranked"),
        ];

        let all = select_hosts(hosts.iter(), &query("pong", TYPE_ANY, MODE_ALL, 0), 0, 1);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn type_and_mode_only_narrow() {
        let hosts = vec![
            host("pong", "ffa", "classic"),
            host("pong", "ffa", "ranked"),
            host("pong", "teams", "ranked"),
        ];

        let ffa = select_hosts(hosts.iter(), &query("pong", "ffa", MODE_ALL, 0), 0, 1);
        assert_eq!(ffa.len(), 2);

        let ffa_ranked = select_hosts(hosts.iter(), &query("pong", "ffa", "ranked", 0), 0, 1);
        assert_eq!(ffa_ranked.len(), 1);
        assert_eq!(ffa_ranked[0].mode, "ranked");

        let nothing = select_hosts(hosts.iter(), &query("pong", "coop", "ranked", 0), 0, 1);
        assert!(nothing.is_empty());
    }

    #[test]
    fn skill_window_boundary_is_open() {
        let hosts = vec![elo_host(1000, 1, 8)];

        // Inside (990, 1010): excluded.
        let inside = select_hosts(hosts.iter(), &query("pong", TYPE_ANY, MODE_ALL, 1005), 10, 1);
        assert!(inside.is_empty());

        // Exactly on the boundary: kept.
        let boundary = select_hosts(hosts.iter(), &query("pong", TYPE_ANY, MODE_ALL, 1010), 10, 1);
        assert_eq!(boundary.len(), 1);

        let low_boundary =
            select_hosts(hosts.iter(), &query("pong", TYPE_ANY, MODE_ALL, 990), 10, 1);
        assert_eq!(low_boundary.len(), 1);
    }

    #[test]
    fn delta_widens_the_window() {
        let hosts = vec![elo_host(1000, 1, 8)];
        let request = query("pong", TYPE_ANY, MODE_ALL, 1015);

        assert_eq!(select_hosts(hosts.iter(), &request, 10, 1).len(), 1);
        assert!(select_hosts(hosts.iter(), &request, 10, 2).is_empty());
    }

    #[test]
    fn zero_range_disables_skill_filtering() {
        let hosts = vec![elo_host(1000, 1, 8)];
        let found = select_hosts(hosts.iter(), &query("pong", TYPE_ANY, MODE_ALL, 1000), 0, 1);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn full_hosts_are_dropped_only_when_skill_matched() {
        let full_ranked = vec![elo_host(1000, 8, 8)];
        let found = select_hosts(
            full_ranked.iter(),
            &query("pong", TYPE_ANY, MODE_ALL, 5000),
            10,
            1,
        );
        assert!(found.is_empty());

        // A full host without skill matching is still listed; player counts
        // are informational there.
        let mut casual = host("pong", "ffa", "classic");
        casual.player_count = 8;
        let casual_hosts = vec![casual];
        let found = select_hosts(
            casual_hosts.iter(),
            &query("pong", TYPE_ANY, MODE_ALL, 0),
            10,
            1,
        );
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn response_echoes_delta_and_wire_fields() {
        let hosts = vec![elo_host(1200, 3, 8)];
        let found = select_hosts(hosts.iter(), &query("pong", TYPE_ANY, MODE_ALL, 0), 0, 4);

        assert_eq!(found.len(), 1);
        let info = &found[0];
        assert_eq!(info.elo_delta, 4);
        assert_eq!(info.address, "127.0.0.1");
        assert_eq!(info.players, 3);
        assert_eq!(info.max_players, 8);
        assert_eq!(info.elo, 1200);
        assert!(info.use_elo);
    }

    #[test]
    fn tracker_counts_per_address() {
        let mut tracker = RequestTracker::new();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert_eq!(tracker.bump(a), 1);
        assert_eq!(tracker.bump(a), 2);
        assert_eq!(tracker.bump(b), 1);
        assert_eq!(tracker.attempts(&a), 2);
        assert_eq!(tracker.attempts(&b), 1);
    }

    #[test]
    fn tracker_reset_drops_the_entry() {
        let mut tracker = RequestTracker::new();
        let a: IpAddr = "10.0.0.1".parse().unwrap();

        tracker.bump(a);
        tracker.bump(a);
        tracker.reset(&a);

        assert_eq!(tracker.attempts(&a), 0);
        // Counting starts over after a hit.
        assert_eq!(tracker.bump(a), 1);
    }
}
