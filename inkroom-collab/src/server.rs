//! WebSocket relay with room-based routing.
//!
//! ```text
//! Client A ──┐                          ┌──▶ Client B
//!            ├── session ── RoomStore ──┤
//! Client C ──┘      │      (log, peers) └──▶ Client C
//!                   └── replies (roomCreated, joinResult, canvasState, pong)
//! ```
//!
//! One task per connection. Draws and erases are applied to the room log and
//! broadcast under the same store write lock, so every peer sees a room's
//! operations in log order. A sender never receives its own operation back.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use inkroom_core::{EraseOp, RoomCode, StrokeOp, StrokeRecord, WireFormat};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{PeerId, RelayReceiver, Relayed};
use crate::protocol::{frame_payload, ClientMessage, JoinReply, ServerMessage};
use crate::store::RoomStore;

pub type SharedStore = Arc<RwLock<RoomStore>>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum peers per room
    pub max_peers_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// WebSocket ping interval in seconds
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
            heartbeat_interval_secs: 25,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
    pub draws_relayed: u64,
    pub erases_relayed: u64,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    store: SharedStore,
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let store = RoomStore::new(config.broadcast_capacity, config.max_peers_per_room);
        Self::with_store(config, Arc::new(RwLock::new(store)))
    }

    /// Serve an existing store. Its capacity and peer limit take precedence
    /// over the config's.
    pub fn with_store(config: ServerConfig, store: SharedStore) -> Self {
        Self {
            config,
            store,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind and serve forever.
    pub async fn run(&self) -> Result<(), BoxError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Bind and serve until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), BoxError>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.config.bind_addr);
        self.serve(listener, shutdown).await
    }

    /// Accept connections on `listener` until `shutdown` completes. Sessions
    /// already running are left to finish on their own.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), BoxError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Relay shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            log::warn!("Accept failed: {e}");
                            continue;
                        }
                    };
                    log::debug!("New TCP connection from {addr}");

                    let store = self.store.clone();
                    let stats = self.stats.clone();
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, addr, store, stats, config).await {
                            log::error!("Connection error from {addr}: {e}");
                        }
                    });
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        store: SharedStore,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut session = Session::new(addr, store, stats.clone());
        let heartbeat = Duration::from_secs(config.heartbeat_interval_secs.max(1));
        let result = session.pump(ws_stream, heartbeat).await;
        session.leave().await;

        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::info!("Connection closed from {addr}");
        result
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}

enum SessionState {
    Idle,
    Joined(RoomCode),
}

/// One peer connection.
struct Session {
    peer: PeerId,
    addr: SocketAddr,
    /// Encoding of the last frame received; replies and relays use it.
    format: WireFormat,
    state: SessionState,
    relay_rx: Option<RelayReceiver>,
    store: SharedStore,
    stats: Arc<RwLock<ServerStats>>,
}

async fn next_relayed(rx: &mut Option<RelayReceiver>) -> Result<Arc<Relayed>, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Session {
    fn new(addr: SocketAddr, store: SharedStore, stats: Arc<RwLock<ServerStats>>) -> Self {
        Self {
            peer: Uuid::new_v4(),
            addr,
            format: WireFormat::default(),
            state: SessionState::Idle,
            relay_rx: None,
            store,
            stats,
        }
    }

    async fn pump(
        &mut self,
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        heartbeat: Duration,
    ) -> Result<(), BoxError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let mut ping = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);

        loop {
            tokio::select! {
                frame = ws_receiver.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            log::warn!("WebSocket error from {}: {e}", self.addr);
                            return Ok(());
                        }
                        None => return Ok(()),
                    };

                    if let Some((format, payload)) = frame_payload(&frame) {
                        {
                            let mut s = self.stats.write().await;
                            s.total_messages += 1;
                            s.total_bytes += payload.len() as u64;
                        }
                        self.format = format;
                        match ClientMessage::decode(payload, format) {
                            Ok(msg) => {
                                log::trace!("{} from {}", msg.kind(), self.addr);
                                for reply in self.handle(msg).await {
                                    ws_sender.send(reply.to_frame(self.format)?).await?;
                                }
                            }
                            Err(e) => log::warn!("Failed to decode message from {}: {e}", self.addr),
                        }
                        continue;
                    }

                    match &frame {
                        Message::Ping(data) => ws_sender.send(Message::Pong(data.clone())).await?,
                        Message::Close(_) => return Ok(()),
                        _ => {}
                    }
                }

                relayed = next_relayed(&mut self.relay_rx) => {
                    match relayed {
                        Ok(relayed) => {
                            if relayed.is_for(self.peer) {
                                ws_sender.send(relayed.message.to_frame(self.format)?).await?;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            log::warn!("Peer {} lagged by {n} messages, resending canvas", self.addr);
                            for reply in self.resync().await {
                                ws_sender.send(reply.to_frame(self.format)?).await?;
                            }
                        }
                        Err(RecvError::Closed) => self.relay_rx = None,
                    }
                }

                _ = ping.tick() => {
                    ws_sender.send(Message::Ping(Vec::new().into())).await?;
                }
            }
        }
    }

    /// Applies one client message and returns the replies for this peer.
    async fn handle(&mut self, msg: ClientMessage) -> Vec<ServerMessage> {
        match msg {
            ClientMessage::CreateRoom {
                width,
                height,
                canvas_color,
            } => self.create_room(width, height, canvas_color).await,
            ClientMessage::JoinRoom { room_code } => self.join_room(room_code).await,
            ClientMessage::Draw { room_code, stroke } => {
                self.draw(room_code, stroke).await;
                Vec::new()
            }
            ClientMessage::Erase { room_code, erase } => {
                let op = match EraseOp::try_from(erase.clone()) {
                    Ok(op) => op,
                    Err(e) => {
                        log::warn!("Rejected erase from {}: {e}", self.addr);
                        return Vec::new();
                    }
                };
                let store = self.store.clone();
                let mut store = store.write().await;
                if store.append_erase(&room_code, op).is_none() {
                    log::debug!("Dropping erase for unknown room {room_code}");
                    return Vec::new();
                }
                store.broadcast(&room_code, self.peer, ServerMessage::Erase(erase));
                drop(store);
                self.stats.write().await.erases_relayed += 1;
                Vec::new()
            }
            ClientMessage::Ping => vec![ServerMessage::Pong],
        }
    }

    async fn create_room(&mut self, width: u32, height: u32, color: String) -> Vec<ServerMessage> {
        let store = self.store.clone();
        let mut store = store.write().await;
        let code = match store.create_room(width, height, color) {
            Ok(code) => code,
            Err(e) => {
                log::error!("Could not create room for {}: {e}", self.addr);
                return vec![ServerMessage::CreateFailed {
                    message: e.to_string(),
                }];
            }
        };
        match store.add_peer(&code, self.peer) {
            Ok(rx) => self.enter(&mut store, code.clone(), rx),
            Err(e) => log::warn!("Creator {} could not join {code}: {e}", self.addr),
        }
        let rooms = store.room_count();
        drop(store);
        self.stats.write().await.active_rooms = rooms;

        vec![ServerMessage::RoomCreated { room_code: code }]
    }

    async fn join_room(&mut self, code: RoomCode) -> Vec<ServerMessage> {
        let store = self.store.clone();
        let mut store = store.write().await;
        let joined = match store.join_room(&code) {
            Ok(snapshot) => store.add_peer(&code, self.peer).map(|rx| (snapshot, rx)),
            Err(e) => Err(e),
        };

        match joined {
            Ok((snapshot, rx)) => {
                self.enter(&mut store, code.clone(), rx);
                drop(store);
                log::info!("Peer {} joined room {code}", self.addr);

                vec![
                    ServerMessage::JoinResult(JoinReply::accepted(&snapshot.info)),
                    ServerMessage::CanvasState(canvas_records(&code, &snapshot.log)),
                ]
            }
            Err(e) => {
                log::info!("Peer {} could not join {code}: {e}", self.addr);
                vec![ServerMessage::JoinResult(JoinReply::rejected(e.join_message()))]
            }
        }
    }

    async fn draw(&mut self, code: RoomCode, record: StrokeRecord) {
        let op = match StrokeOp::try_from(record.clone()) {
            Ok(op) => op,
            Err(e) => {
                log::warn!("Rejected draw from {}: {e}", self.addr);
                return;
            }
        };
        let store = self.store.clone();
        let mut store = store.write().await;
        if store.append_draw(&code, op).is_none() {
            log::debug!("Dropping draw for unknown room {code}");
            return;
        }
        store.broadcast(&code, self.peer, ServerMessage::Draw(record));
        drop(store);
        self.stats.write().await.draws_relayed += 1;
    }

    /// Swaps a lagged subscription for one at the channel tail and returns
    /// the room log it follows on from.
    async fn resync(&mut self) -> Vec<ServerMessage> {
        let SessionState::Joined(code) = &self.state else {
            return Vec::new();
        };
        // Relays are sent under the write lock, so nothing lands between
        // the snapshot and the new subscription.
        let store = self.store.clone();
        let store = store.read().await;
        let Some(log) = store.log(code) else {
            return Vec::new();
        };
        self.relay_rx = self.relay_rx.as_ref().map(|rx| rx.resubscribe());
        vec![ServerMessage::CanvasState(canvas_records(code, log))]
    }

    /// Switches this session to `code`, leaving the previous room.
    fn enter(&mut self, store: &mut RoomStore, code: RoomCode, rx: RelayReceiver) {
        if let SessionState::Joined(previous) = &self.state {
            if *previous != code {
                store.remove_peer(previous, &self.peer);
            }
        }
        self.state = SessionState::Joined(code);
        self.relay_rx = Some(rx);
    }

    async fn leave(&mut self) {
        if let SessionState::Joined(code) = &self.state {
            self.store.write().await.remove_peer(code, &self.peer);
            log::debug!("Peer {} left room {code}", self.addr);
        }
        self.relay_rx = None;
    }
}

fn canvas_records(code: &RoomCode, log: &[StrokeOp]) -> Vec<StrokeRecord> {
    log.iter()
        .filter_map(|op| match StrokeRecord::try_from(op) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping unencodable stroke in {code}: {e}");
                None
            }
        })
        .collect()
}
