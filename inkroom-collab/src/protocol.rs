//! Relay wire protocol.
//!
//! Every WebSocket data frame carries exactly one message. Binary frames are
//! bincode-encoded, text frames are JSON; both encode the same enums:
//!
//! ```text
//! client → server                     server → client
//! ───────────────────────────────     ─────────────────────────────────────
//! createRoom {width,height,color}     roomCreated {roomCode}      (reply)
//! joinRoom   {roomCode}               joinResult  {success,…}     (reply)
//! draw       {roomCode, stroke}       canvasState [stroke…]       (joiner only)
//! erase      {roomCode, erase}        draw  stroke                (peers, not sender)
//! ping                                erase erase                 (peers, not sender)
//!                                     pong
//! ```
//!
//! In JSON a message is `{"draw": {"roomCode": "abc123", "stroke": {…}}}`.

use inkroom_core::{CodecError, EraseRecord, RoomCode, RoomCodeError, StrokeRecord, WireFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;

/// Canvas dimensions and background of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub width: u32,
    pub height: u32,
    pub canvas_color: String,
}

/// Reply to `joinRoom`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinReply {
    pub success: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub canvas_color: Option<String>,
    pub message: Option<String>,
}

impl JoinReply {
    pub fn accepted(info: &RoomInfo) -> Self {
        Self {
            success: true,
            width: Some(info.width),
            height: Some(info.height),
            canvas_color: Some(info.canvas_color.clone()),
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            width: None,
            height: None,
            canvas_color: None,
            message: Some(message.into()),
        }
    }

    /// Room info of a successful reply.
    pub fn room_info(&self) -> Option<RoomInfo> {
        if !self.success {
            return None;
        }
        Some(RoomInfo {
            width: self.width?,
            height: self.height?,
            canvas_color: self.canvas_color.clone()?,
        })
    }
}

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        width: u32,
        height: u32,
        canvas_color: String,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_code: RoomCode },
    #[serde(rename_all = "camelCase")]
    Draw {
        room_code: RoomCode,
        stroke: StrokeRecord,
    },
    #[serde(rename_all = "camelCase")]
    Erase {
        room_code: RoomCode,
        erase: EraseRecord,
    },
    Ping,
}

/// Messages sent by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    RoomCreated { room_code: RoomCode },
    /// Reply to `createRoom` when no room could be made.
    #[serde(rename_all = "camelCase")]
    CreateFailed { message: String },
    JoinResult(JoinReply),
    /// Full operation log, in order. Sent once, to a joiner.
    CanvasState(Vec<StrokeRecord>),
    Draw(StrokeRecord),
    Erase(EraseRecord),
    Pong,
}

/// Protocol errors.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("invalid room code: {0}")]
    RoomCode(#[from] RoomCodeError),
    #[error("join rejected: {0}")]
    JoinRejected(String),
    #[error("room creation failed: {0}")]
    CreateFailed(String),
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("outgoing queue full")]
    QueueFull,
    #[error("request timed out")]
    Timeout,
    #[error("websocket error: {0}")]
    WebSocket(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ProtocolError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ProtocolError::WebSocket(e.to_string())
    }
}

/// Payload of a data frame and the encoding it implies. `None` for control
/// frames.
pub fn frame_payload(frame: &Message) -> Option<(WireFormat, &[u8])> {
    match frame {
        Message::Binary(data) => Some((WireFormat::Binary, data.as_ref())),
        Message::Text(text) => Some((WireFormat::Json, text.as_str().as_bytes())),
        _ => None,
    }
}

fn to_frame<T: Serialize>(value: &T, format: WireFormat) -> Result<Message, ProtocolError> {
    let bytes = format.encode(value)?;
    Ok(match format {
        WireFormat::Binary => Message::Binary(bytes.into()),
        WireFormat::Json => {
            let text = String::from_utf8(bytes)
                .map_err(|e| CodecError::Serialization(e.to_string()))?;
            Message::Text(text.into())
        }
    })
}

impl ClientMessage {
    pub fn encode(&self, format: WireFormat) -> Result<Vec<u8>, ProtocolError> {
        Ok(format.encode(self)?)
    }

    pub fn decode(bytes: &[u8], format: WireFormat) -> Result<Self, ProtocolError> {
        Ok(format.decode(bytes)?)
    }

    pub fn to_frame(&self, format: WireFormat) -> Result<Message, ProtocolError> {
        to_frame(self, format)
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::CreateRoom { .. } => "createRoom",
            ClientMessage::JoinRoom { .. } => "joinRoom",
            ClientMessage::Draw { .. } => "draw",
            ClientMessage::Erase { .. } => "erase",
            ClientMessage::Ping => "ping",
        }
    }
}

impl ServerMessage {
    pub fn encode(&self, format: WireFormat) -> Result<Vec<u8>, ProtocolError> {
        Ok(format.encode(self)?)
    }

    pub fn decode(bytes: &[u8], format: WireFormat) -> Result<Self, ProtocolError> {
        Ok(format.decode(bytes)?)
    }

    pub fn to_frame(&self, format: WireFormat) -> Result<Message, ProtocolError> {
        to_frame(self, format)
    }

    /// Whether this message answers a pending request.
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            ServerMessage::RoomCreated { .. }
                | ServerMessage::CreateFailed { .. }
                | ServerMessage::JoinResult(_)
        )
    }
}
