//! TCP transport, protocol dispatch, and the liveness pulse.

use crate::query::{self, RequestTracker};
use crate::registry::{Host, HostRegistry};
use log::{debug, error, info, warn};
use shared::{ChallengeSequence, Envelope, GetRequest, HostList, RegisterRequest, UpdateRequest};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};

/// Why a connection was judged hostile and dropped.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("malformed message: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("signature does not match the expected challenge value")]
    SignatureMismatch,
}

/// Events sent from per-connection tasks to the dispatch loop.
#[derive(Debug)]
enum ServerEvent {
    Connected {
        connection_id: u64,
        addr: SocketAddr,
        commands: mpsc::UnboundedSender<ConnectionCommand>,
    },
    Message {
        connection_id: u64,
        text: String,
    },
    Disconnected {
        connection_id: u64,
    },
}

/// Commands sent from the dispatch loop to a connection task.
#[derive(Debug)]
enum ConnectionCommand {
    Send(String),
    Close,
}

#[derive(Debug)]
struct Connection {
    addr: SocketAddr,
    commands: mpsc::UnboundedSender<ConnectionCommand>,
}

/// The discovery registry server.
///
/// Binds a TCP listener and, once [`run`](Self::run) is called, dispatches
/// newline-delimited JSON documents from every connection through a single
/// event loop. Registry state is shared behind `Arc` so a [`ServerHandle`]
/// can observe and tune it while the loop runs.
pub struct MasterServer {
    listener: TcpListener,
    seed: i32,
    ping_interval: Duration,
    registry: Arc<RwLock<HostRegistry>>,
    requests: Arc<RwLock<RequestTracker>>,
    elo_range: Arc<AtomicI32>,
}

/// Cloneable operator-facing view of a running server.
///
/// This is the seam the interactive console hangs off of: the Elo range can
/// be retuned at any time and is read atomically once per query.
#[derive(Clone)]
pub struct ServerHandle {
    registry: Arc<RwLock<HostRegistry>>,
    elo_range: Arc<AtomicI32>,
}

impl ServerHandle {
    /// Sets the Elo tolerance window. Zero disables skill filtering.
    pub fn set_elo_range(&self, range: i32) {
        self.elo_range.store(range, Ordering::Relaxed);
    }

    pub fn elo_range(&self) -> i32 {
        self.elo_range.load(Ordering::Relaxed)
    }

    pub async fn host_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Advertised endpoints of all registered hosts.
    pub async fn endpoints(&self) -> Vec<SocketAddr> {
        self.registry.read().await.endpoints()
    }
}

impl MasterServer {
    /// Binds the listening endpoint. Failing to bind is fatal for the
    /// process; callers propagate the error instead of retrying.
    pub async fn bind(
        addr: &str,
        seed: i32,
        ping_interval: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Registry listening on {}", listener.local_addr()?);

        Ok(MasterServer {
            listener,
            seed,
            ping_interval,
            registry: Arc::new(RwLock::new(HostRegistry::new())),
            requests: Arc::new(RwLock::new(RequestTracker::new())),
            elo_range: Arc::new(AtomicI32::new(0)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            registry: Arc::clone(&self.registry),
            elo_range: Arc::clone(&self.elo_range),
        }
    }

    /// Runs the accept loop, the dispatch loop, and the liveness pulse until
    /// the process is torn down.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let MasterServer {
            listener,
            seed,
            ping_interval,
            registry,
            requests,
            elo_range,
        } = self;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        spawn_acceptor(listener, event_tx);

        let mut dispatcher = Dispatcher {
            seed,
            registry,
            requests,
            elo_range,
            connections: HashMap::new(),
        };

        let keep_alive =
            serde_json::to_string(&Envelope::keep_alive()).unwrap_or_else(|_| String::from("{}"));

        let mut pulse = interval(ping_interval);
        pulse.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first tick since it fires immediately.
        pulse.tick().await;

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(ServerEvent::Connected { connection_id, addr, commands }) => {
                            debug!("Connection {} opened from {}", connection_id, addr);
                            dispatcher
                                .connections
                                .insert(connection_id, Connection { addr, commands });
                        }
                        Some(ServerEvent::Message { connection_id, text }) => {
                            dispatcher.handle_message(connection_id, &text).await;
                        }
                        Some(ServerEvent::Disconnected { connection_id }) => {
                            dispatcher.finish_connection(connection_id).await;
                        }
                        None => break,
                    }
                }

                _ = pulse.tick() => {
                    dispatcher.broadcast(&keep_alive);
                }
            }
        }

        Ok(())
    }
}

/// Accepts connections and hands each one its own reader/writer task.
fn spawn_acceptor(listener: TcpListener, events: mpsc::UnboundedSender<ServerEvent>) {
    tokio::spawn(async move {
        let mut next_connection_id: u64 = 1;

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let connection_id = next_connection_id;
                    next_connection_id += 1;
                    tokio::spawn(connection_task(connection_id, stream, addr, events.clone()));
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    });
}

/// Owns one peer socket: forwards inbound lines as events and executes
/// write/close commands from the dispatch loop. Per-connection message order
/// is preserved because this task is the only reader of the socket and the
/// only producer of this connection's events.
async fn connection_task(
    connection_id: u64,
    stream: TcpStream,
    addr: SocketAddr,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let (command_tx, mut command_rx) = mpsc::unbounded_channel();

    if events
        .send(ServerEvent::Connected {
            connection_id,
            addr,
            commands: command_tx,
        })
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) => {
                        if events
                            .send(ServerEvent::Message { connection_id, text })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("Read error on connection {}: {}", connection_id, e);
                        break;
                    }
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(ConnectionCommand::Send(text)) => {
                        if write_line(&mut writer, &text).await.is_err() {
                            break;
                        }
                    }
                    Some(ConnectionCommand::Close) | None => break,
                }
            }
        }
    }

    let _ = events.send(ServerEvent::Disconnected { connection_id });
}

async fn write_line(writer: &mut OwnedWriteHalf, text: &str) -> std::io::Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

/// Routes parsed documents to the register/update/get handlers. All state
/// mutation funnels through here, on the single dispatch-loop task.
struct Dispatcher {
    seed: i32,
    registry: Arc<RwLock<HostRegistry>>,
    requests: Arc<RwLock<RequestTracker>>,
    elo_range: Arc<AtomicI32>,
    connections: HashMap<u64, Connection>,
}

impl Dispatcher {
    async fn handle_message(&mut self, connection_id: u64, text: &str) {
        // Messages can still be queued behind a forced drop; once the
        // connection is gone they are discarded unprocessed.
        let Some(addr) = self.connections.get(&connection_id).map(|c| c.addr) else {
            return;
        };

        if let Err(e) = self.dispatch(connection_id, addr, text).await {
            warn!("Dropping connection {} ({}): {}", connection_id, addr, e);
            self.force_disconnect(connection_id).await;
        }
    }

    async fn dispatch(
        &mut self,
        connection_id: u64,
        addr: SocketAddr,
        text: &str,
    ) -> Result<(), HandlerError> {
        let envelope: Envelope = serde_json::from_str(text)?;

        {
            let mut registry = self.registry.write().await;
            if let Some(host) = registry.get_mut(connection_id) {
                // A connection that registered a host must present the next
                // undrawn challenge value with every message. Drawing
                // advances the sequence, so a replayed value cannot match.
                if envelope.signature() != Some(host.next_signature()) {
                    return Err(HandlerError::SignatureMismatch);
                }
            }
        }

        if let Some(register) = envelope.register {
            self.handle_register(connection_id, addr, register).await
        } else if let Some(update) = envelope.update {
            self.handle_update(connection_id, update).await;
            Ok(())
        } else if let Some(get) = envelope.get {
            self.handle_get(connection_id, addr, get).await;
            Ok(())
        } else {
            // Documents without an operation key (keep-alive echoes) are a
            // silent no-op.
            Ok(())
        }
    }

    async fn handle_register(
        &mut self,
        connection_id: u64,
        addr: SocketAddr,
        request: RegisterRequest,
    ) -> Result<(), HandlerError> {
        // The first draw of a fresh sequence is the registration signature.
        let mut challenge = ChallengeSequence::new(self.seed);
        if challenge.draw() != request.sig {
            return Err(HandlerError::SignatureMismatch);
        }

        info!(
            "Host [{}] registered on port [{}] with name [{}]",
            addr.ip(),
            request.port,
            request.name
        );

        let host = Host::new(&request, addr.ip(), challenge);
        self.registry.write().await.insert(connection_id, host);
        Ok(())
    }

    async fn handle_update(&mut self, connection_id: u64, update: UpdateRequest) {
        if !self.registry.write().await.apply_update(connection_id, &update) {
            debug!(
                "Ignoring update from connection {} with no registered host",
                connection_id
            );
        }
    }

    async fn handle_get(&mut self, connection_id: u64, addr: SocketAddr, request: GetRequest) {
        // Counted on receipt, so the delta echoed below reflects this very
        // call even when the response ends up empty.
        let delta = self.requests.write().await.bump(addr.ip());
        let elo_range = self.elo_range.load(Ordering::Relaxed);

        let hosts = {
            let registry = self.registry.read().await;
            query::select_hosts(registry.hosts(), &request, elo_range, delta)
        };

        debug!(
            "Query from {} for [{}] matched {} host(s) at delta {}",
            addr,
            request.id,
            hosts.len(),
            delta
        );

        if !hosts.is_empty() {
            self.requests.write().await.reset(&addr.ip());
        }

        match serde_json::to_string(&HostList { hosts }) {
            Ok(text) => self.send(connection_id, text),
            Err(e) => warn!("Failed to serialize host list: {}", e),
        }
    }

    fn send(&self, connection_id: u64, text: String) {
        if let Some(connection) = self.connections.get(&connection_id) {
            let _ = connection.commands.send(ConnectionCommand::Send(text));
        }
    }

    fn broadcast(&self, text: &str) {
        for connection in self.connections.values() {
            let _ = connection
                .commands
                .send(ConnectionCommand::Send(text.to_string()));
        }
    }

    /// Drops a hostile connection and its registry entry immediately.
    /// Queued messages from it die in `handle_message`, and the eventual
    /// `Disconnected` event is a no-op.
    async fn force_disconnect(&mut self, connection_id: u64) {
        if let Some(connection) = self.connections.remove(&connection_id) {
            let _ = connection.commands.send(ConnectionCommand::Close);
        }
        self.registry.write().await.remove(connection_id);
    }

    async fn finish_connection(&mut self, connection_id: u64) {
        self.connections.remove(&connection_id);
        self.registry.write().await.remove(connection_id);
    }
}
