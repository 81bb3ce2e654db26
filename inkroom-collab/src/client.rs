//! WebSocket client for the relay.
//!
//! Provides:
//! - Connection lifecycle with a bounded reconnect policy
//! - `createRoom` / `joinRoom` as request/reply with a timeout
//! - Fire-and-forget draw and erase submission ([`OpSink`])
//! - Remote operations delivered as [`ClientEvent`]s
//!
//! Nothing is queued while offline and nothing is resynced after a reconnect;
//! the application re-joins explicitly.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use inkroom_core::{EraseOp, RoomCode, StrokeOp, WireFormat};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::protocol::{frame_payload, ClientMessage, ProtocolError, RoomInfo, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingReplies = Arc<Mutex<VecDeque<oneshot::Sender<ServerMessage>>>>;

const CHANNEL_CAPACITY: usize = 256;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    Reconnecting { attempt: u32 },
    /// Full room log, received once after a successful join.
    CanvasState(Vec<StrokeOp>),
    RemoteDraw(StrokeOp),
    RemoteErase(EraseOp),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
    pub format: WireFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3000".to_string(),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            format: WireFormat::Binary,
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }
}

/// Where finished local operations go.
pub trait OpSink {
    fn is_connected(&self) -> bool;

    /// Hands `message` to the transport without waiting for delivery.
    fn submit(&self, message: ClientMessage) -> Result<(), ProtocolError>;
}

/// The relay client.
pub struct RelayClient {
    config: ClientConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    outgoing_tx: mpsc::Sender<ClientMessage>,
    /// Owned by the driver while one runs; handed back when it stops.
    outgoing_rx: Option<mpsc::Receiver<ClientMessage>>,
    pending: PendingReplies,
    request_order: Mutex<()>,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    driver: Option<JoinHandle<mpsc::Receiver<ClientMessage>>>,
}

impl RelayClient {
    pub fn new(config: ClientConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            config,
            state_tx: Arc::new(state_tx),
            state_rx,
            outgoing_tx,
            outgoing_rx: Some(outgoing_rx),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            request_order: Mutex::new(()),
            event_tx,
            event_rx: Some(event_rx),
            driver: None,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connects, retrying per the reconnect policy, and spawns the driver
    /// that keeps the connection alive afterwards.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        if let Some(driver) = self.driver.take() {
            if !driver.is_finished() {
                self.driver = Some(driver);
                return Ok(());
            }
            self.outgoing_rx = driver.await.ok();
        }
        let outgoing_rx = match self.outgoing_rx.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
                self.outgoing_tx = tx;
                rx
            }
        };

        self.state_tx.send_replace(ConnectionState::Connecting);
        let ws = match open_with_retry(&self.config, &self.state_tx, &self.event_tx).await {
            Ok(ws) => ws,
            Err(e) => {
                self.outgoing_rx = Some(outgoing_rx);
                self.state_tx.send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        self.state_tx.send_replace(ConnectionState::Connected);
        let _ = self.event_tx.send(ClientEvent::Connected).await;
        log::info!("Connected to {}", self.config.server_url);

        let driver = Driver {
            config: self.config.clone(),
            state_tx: self.state_tx.clone(),
            event_tx: self.event_tx.clone(),
            pending: self.pending.clone(),
            outgoing_rx,
        };
        self.driver = Some(tokio::spawn(driver.run(ws)));
        Ok(())
    }

    /// Creates a room; the server auto-joins this client to it.
    pub async fn create_room(
        &self,
        width: u32,
        height: u32,
        canvas_color: impl Into<String>,
    ) -> Result<RoomCode, ProtocolError> {
        let reply = self
            .request(ClientMessage::CreateRoom {
                width,
                height,
                canvas_color: canvas_color.into(),
            })
            .await?;
        match reply {
            ServerMessage::RoomCreated { room_code } => Ok(room_code),
            ServerMessage::CreateFailed { message } => Err(ProtocolError::CreateFailed(message)),
            other => Err(ProtocolError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Joins the room named by user input. Malformed input is rejected
    /// before anything is sent. On success the room log follows as a
    /// [`ClientEvent::CanvasState`].
    pub async fn join_room(&self, input: &str) -> Result<(RoomCode, RoomInfo), ProtocolError> {
        let code = RoomCode::parse(input)?;
        let reply = self
            .request(ClientMessage::JoinRoom {
                room_code: code.clone(),
            })
            .await?;
        match reply {
            ServerMessage::JoinResult(result) => match result.room_info() {
                Some(info) => Ok((code, info)),
                None => Err(ProtocolError::JoinRejected(
                    result.message.unwrap_or_else(|| "Room not found".to_string()),
                )),
            },
            other => Err(ProtocolError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Queues a message for sending.
    pub async fn send(&self, message: ClientMessage) -> Result<(), ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.outgoing_tx
            .send(message)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    async fn request(&self, message: ClientMessage) -> Result<ServerMessage, ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            // Waiters must queue in the order their requests hit the wire.
            let _order = self.request_order.lock().await;
            self.pending.lock().await.push_back(reply_tx);
            self.outgoing_tx
                .send(message)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }

        match tokio::time::timeout(self.config.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => Err(ProtocolError::Timeout),
        }
    }

    /// Stops the driver and drops the connection.
    pub fn disconnect(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }
}

impl OpSink for RelayClient {
    fn is_connected(&self) -> bool {
        *self.state_rx.borrow() == ConnectionState::Connected
    }

    fn submit(&self, message: ClientMessage) -> Result<(), ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.outgoing_tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ProtocolError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ProtocolError::ConnectionClosed,
        })
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

async fn open(url: &str) -> Result<WsStream, ProtocolError> {
    let (ws, _) = tokio_tungstenite::connect_async(url).await?;
    Ok(ws)
}

/// First attempt plus up to `reconnect_attempts` retries.
async fn open_with_retry(
    config: &ClientConfig,
    state_tx: &watch::Sender<ConnectionState>,
    event_tx: &mpsc::Sender<ClientEvent>,
) -> Result<WsStream, ProtocolError> {
    let mut last_err = match open(&config.server_url).await {
        Ok(ws) => return Ok(ws),
        Err(e) => e,
    };
    for attempt in 1..=config.reconnect_attempts {
        log::debug!("Connect to {} failed ({last_err}), retry {attempt}", config.server_url);
        state_tx.send_replace(ConnectionState::Reconnecting);
        let _ = event_tx.send(ClientEvent::Reconnecting { attempt }).await;
        tokio::time::sleep(config.reconnect_delay).await;
        match open(&config.server_url).await {
            Ok(ws) => return Ok(ws),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

/// Background task owning the socket.
struct Driver {
    config: ClientConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    event_tx: mpsc::Sender<ClientEvent>,
    pending: PendingReplies,
    outgoing_rx: mpsc::Receiver<ClientMessage>,
}

enum SessionEnd {
    /// The client handle was dropped.
    Closed,
    /// The socket went away.
    Lost,
}

impl Driver {
    /// Runs until the client is dropped or reconnecting fails, then hands
    /// the outgoing queue back.
    async fn run(mut self, mut ws: WsStream) -> mpsc::Receiver<ClientMessage> {
        loop {
            match self.session(ws).await {
                SessionEnd::Closed => break,
                SessionEnd::Lost => {}
            }

            self.state_tx.send_replace(ConnectionState::Disconnected);
            self.pending.lock().await.clear();
            let _ = self.event_tx.send(ClientEvent::Disconnected).await;
            log::warn!("Lost connection to {}", self.config.server_url);

            ws = match self.reconnect().await {
                Some(ws) => ws,
                None => {
                    log::warn!(
                        "Giving up on {} after {} attempts",
                        self.config.server_url,
                        self.config.reconnect_attempts
                    );
                    self.state_tx.send_replace(ConnectionState::Disconnected);
                    return self.outgoing_rx;
                }
            };

            // Anything submitted while offline is stale.
            while self.outgoing_rx.try_recv().is_ok() {}
            self.state_tx.send_replace(ConnectionState::Connected);
            let _ = self.event_tx.send(ClientEvent::Connected).await;
            log::info!("Reconnected to {}", self.config.server_url);
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
        self.outgoing_rx
    }

    async fn reconnect(&mut self) -> Option<WsStream> {
        for attempt in 1..=self.config.reconnect_attempts {
            self.state_tx.send_replace(ConnectionState::Reconnecting);
            let _ = self.event_tx.send(ClientEvent::Reconnecting { attempt }).await;
            tokio::time::sleep(self.config.reconnect_delay).await;
            match open(&self.config.server_url).await {
                Ok(ws) => return Some(ws),
                Err(e) => log::debug!("Reconnect attempt {attempt} failed: {e}"),
            }
        }
        None
    }

    async fn session(&mut self, ws: WsStream) -> SessionEnd {
        let (mut ws_writer, mut ws_reader) = ws.split();
        let format = self.config.format;

        loop {
            tokio::select! {
                outgoing = self.outgoing_rx.recv() => {
                    let Some(message) = outgoing else {
                        let _ = ws_writer.close().await;
                        return SessionEnd::Closed;
                    };
                    let frame = match message.to_frame(format) {
                        Ok(frame) => frame,
                        Err(e) => {
                            log::warn!("Dropping unencodable {}: {e}", message.kind());
                            continue;
                        }
                    };
                    if let Err(e) = ws_writer.send(frame).await {
                        log::warn!("Send failed: {e}");
                        return SessionEnd::Lost;
                    }
                }

                incoming = ws_reader.next() => {
                    let frame = match incoming {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            log::warn!("WebSocket error: {e}");
                            return SessionEnd::Lost;
                        }
                        None => return SessionEnd::Lost,
                    };
                    if let Some((format, payload)) = frame_payload(&frame) {
                        match ServerMessage::decode(payload, format) {
                            Ok(message) => self.dispatch(message).await,
                            Err(e) => log::warn!("Failed to decode server message: {e}"),
                        }
                    } else if frame.is_close() {
                        return SessionEnd::Lost;
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, message: ServerMessage) {
        if message.is_reply() {
            let mut pending = self.pending.lock().await;
            // One reply per request, in request order. A waiter that timed
            // out still owns its reply.
            match pending.pop_front() {
                Some(waiter) => {
                    if waiter.send(message).is_err() {
                        log::debug!("Late reply dropped");
                    }
                }
                None => log::debug!("Unsolicited reply dropped"),
            }
            return;
        }

        let event = match message {
            ServerMessage::CanvasState(records) => {
                let ops = records
                    .into_iter()
                    .filter_map(|record| match StrokeOp::try_from(record) {
                        Ok(op) => Some(op),
                        Err(e) => {
                            log::warn!("Skipping invalid stroke in canvas state: {e}");
                            None
                        }
                    })
                    .collect();
                ClientEvent::CanvasState(ops)
            }
            ServerMessage::Draw(record) => match StrokeOp::try_from(record) {
                Ok(op) => ClientEvent::RemoteDraw(op),
                Err(e) => {
                    log::warn!("Ignoring invalid remote draw: {e}");
                    return;
                }
            },
            ServerMessage::Erase(record) => match EraseOp::try_from(record) {
                Ok(op) => ClientEvent::RemoteErase(op),
                Err(e) => {
                    log::warn!("Ignoring invalid remote erase: {e}");
                    return;
                }
            },
            ServerMessage::Pong => {
                log::trace!("pong");
                return;
            }
            ServerMessage::RoomCreated { .. }
            | ServerMessage::CreateFailed { .. }
            | ServerMessage::JoinResult(_) => return,
        };
        let _ = self.event_tx.send(event).await;
    }
}
