//! Client side of the discovery protocol.
//!
//! A [`MasterClient`] speaks newline-delimited JSON to a registry over one
//! persistent TCP connection. Game servers use it to register themselves and
//! push status updates; matchmaking clients use it to query for hosts, with
//! or without ever registering. Once registered, the client mirrors the
//! registry's challenge sequence and attaches the next draw to every
//! message, since a message without the expected signature gets the
//! connection dropped.

use log::debug;
use shared::{ChallengeSequence, Envelope, GetRequest, HostInfo, HostList, RegisterRequest, UpdateRequest};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed server message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server closed the connection")]
    ConnectionClosed,
}

/// One persistent connection to a discovery registry.
pub struct MasterClient {
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    challenge: Option<ChallengeSequence>,
}

impl MasterClient {
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();

        Ok(MasterClient {
            reader: BufReader::new(reader).lines(),
            writer,
            challenge: None,
        })
    }

    /// Registers this connection as a host.
    ///
    /// A fresh challenge sequence is created from `seed` and its first draw
    /// overwrites `request.sig`; the registry performs the same first draw
    /// and rejects the registration on mismatch. Re-registering replaces the
    /// previous entry and additionally carries the continuity signature of
    /// the sequence being retired.
    pub async fn register(
        &mut self,
        seed: i32,
        mut request: RegisterRequest,
    ) -> Result<(), ClientError> {
        let mut challenge = ChallengeSequence::new(seed);
        request.sig = challenge.draw();

        let envelope = Envelope {
            register: Some(request),
            sig: self.next_signature(),
            ..Default::default()
        };
        self.send(&envelope).await?;

        self.challenge = Some(challenge);
        Ok(())
    }

    /// Pushes a status refresh for the registered host. Silently ignored by
    /// the registry when this connection never registered.
    pub async fn update(&mut self, request: UpdateRequest) -> Result<(), ClientError> {
        let envelope = Envelope {
            update: Some(request),
            sig: self.next_signature(),
            ..Default::default()
        };
        self.send(&envelope).await
    }

    /// Queries for hosts and waits for the reply.
    ///
    /// Keep-alive documents arriving in between are skipped. Pure
    /// matchmaking clients can call this without registering; no signature
    /// is attached or expected in that case.
    pub async fn request_hosts(&mut self, request: GetRequest) -> Result<Vec<HostInfo>, ClientError> {
        let envelope = Envelope {
            get: Some(request),
            sig: self.next_signature(),
            ..Default::default()
        };
        self.send(&envelope).await?;

        loop {
            let line = self
                .reader
                .next_line()
                .await?
                .ok_or(ClientError::ConnectionClosed)?;

            let value: serde_json::Value = serde_json::from_str(&line)?;
            if value.get("hosts").is_none() {
                debug!("Skipping non-response message: {}", line);
                continue;
            }

            let list: HostList = serde_json::from_value(value)?;
            return Ok(list.hosts);
        }
    }

    fn next_signature(&mut self) -> Option<i32> {
        self.challenge.as_mut().map(|challenge| challenge.draw())
    }

    async fn send(&mut self, envelope: &Envelope) -> Result<(), ClientError> {
        let text = serde_json::to_string(envelope)?;
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_test::assert_ok;

    const SEED: i32 = 31337;

    struct Peer {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    /// A listener standing in for the registry, plus a connected client.
    async fn connected_pair() -> (MasterClient, Peer) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let addr_str = addr.to_string();
        let (client, accepted) =
            tokio::join!(MasterClient::connect(&addr_str), listener.accept());
        let (stream, _) = accepted.unwrap();
        let (reader, writer) = stream.into_split();

        (
            client.unwrap(),
            Peer {
                lines: BufReader::new(reader).lines(),
                writer,
            },
        )
    }

    async fn read_envelope(peer: &mut Peer) -> Envelope {
        let line = peer.lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    fn pong_request() -> RegisterRequest {
        RegisterRequest {
            name: "arena".into(),
            port: 4000,
            max_players: 4,
            player_count: 1,
            comment: String::new(),
            id: "pong".into(),
            game_type: "ffa".into(),
            mode: "classic".into(),
            protocol: "1".into(),
            elo: 0,
            use_elo: false,
            sig: 0,
        }
    }

    #[tokio::test]
    async fn register_signs_with_the_first_draw() {
        let (mut client, mut peer) = connected_pair().await;

        assert_ok!(client.register(SEED, pong_request()).await);

        let envelope = read_envelope(&mut peer).await;
        let register = envelope.register.unwrap();
        assert_eq!(register.sig, ChallengeSequence::new(SEED).draw());
        // First registration on a fresh connection has no continuity value.
        assert_eq!(envelope.sig, None);
    }

    #[tokio::test]
    async fn later_messages_carry_continuity_signatures() {
        let (mut client, mut peer) = connected_pair().await;
        let mut mirror = ChallengeSequence::new(SEED);

        assert_ok!(client.register(SEED, pong_request()).await);
        assert_eq!(read_envelope(&mut peer).await.register.unwrap().sig, mirror.draw());

        assert_ok!(client.update(UpdateRequest::default()).await);
        assert_eq!(read_envelope(&mut peer).await.sig, Some(mirror.draw()));

        // The reply is written ahead so request_hosts can complete.
        peer.writer.write_all(b"{\"hosts\":[]}\n").await.unwrap();
        let hosts = assert_ok!(client.request_hosts(GetRequest::default()).await);
        assert!(hosts.is_empty());
        assert_eq!(read_envelope(&mut peer).await.sig, Some(mirror.draw()));
    }

    #[tokio::test]
    async fn reregistration_retires_the_old_sequence() {
        let (mut client, mut peer) = connected_pair().await;
        let mut mirror = ChallengeSequence::new(SEED);

        assert_ok!(client.register(SEED, pong_request()).await);
        read_envelope(&mut peer).await;
        mirror.draw();

        assert_ok!(client.register(SEED, pong_request()).await);
        let envelope = read_envelope(&mut peer).await;

        // Continuity from the retired sequence, fresh first draw inside.
        assert_eq!(envelope.sig, Some(mirror.draw()));
        assert_eq!(
            envelope.register.unwrap().sig,
            ChallengeSequence::new(SEED).draw()
        );
    }

    #[tokio::test]
    async fn unregistered_queries_are_unsigned() {
        let (mut client, mut peer) = connected_pair().await;

        peer.writer.write_all(b"{\"hosts\":[]}\n").await.unwrap();
        assert_ok!(client.request_hosts(GetRequest::default()).await);

        let envelope = read_envelope(&mut peer).await;
        assert_eq!(envelope.sig, None);
        assert!(envelope.get.is_some());
    }

    #[tokio::test]
    async fn request_hosts_skips_keep_alives() {
        let (mut client, mut peer) = connected_pair().await;

        peer.writer
            .write_all(b"{}\n{}\n{\"hosts\":[{\"name\":\"arena\",\"address\":\"10.0.0.1\",\"port\":4000,\"comment\":\"\",\"type\":\"ffa\",\"mode\":\"classic\",\"players\":1,\"maxPlayers\":4,\"protocol\":\"1\",\"elo\":0,\"useElo\":false,\"eloDelta\":1}]}\n")
            .await
            .unwrap();

        let hosts = assert_ok!(client.request_hosts(GetRequest::default()).await);
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, "arena");
        assert_eq!(hosts[0].elo_delta, 1);
    }

    #[tokio::test]
    async fn closed_connection_surfaces_as_an_error() {
        let (mut client, peer) = connected_pair().await;
        drop(peer);

        let result = client.request_hosts(GetRequest::default()).await;
        assert!(matches!(
            result,
            Err(ClientError::ConnectionClosed) | Err(ClientError::Io(_))
        ));
    }
}
