//! Volatile room store: canvas settings, the operation log and peer
//! membership of every room.
//!
//! The log is the room's only authoritative state. Draws append, erases
//! filter by geometry key; replaying the log in order onto a blank canvas
//! reproduces what every connected peer sees.

use std::collections::HashMap;

use inkroom_core::{EraseOp, RoomCode, StrokeOp};
use thiserror::Error;

use crate::broadcast::{BroadcastGroup, BroadcastStats, PeerId, RelayReceiver};
use crate::protocol::{RoomInfo, ServerMessage};

/// Attempts at finding an unused code before giving up.
const MAX_CODE_ATTEMPTS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("room not found: {0}")]
    RoomNotFound(RoomCode),
    #[error("room {code} is full ({max} peers)")]
    RoomFull { code: RoomCode, max: usize },
    #[error("no unused room code after {0} attempts")]
    CodesExhausted(usize),
}

impl StoreError {
    /// Message shown to a peer whose join was refused.
    pub fn join_message(&self) -> &'static str {
        match self {
            StoreError::RoomNotFound(_) => "Room not found",
            StoreError::RoomFull { .. } => "Room is full",
            StoreError::CodesExhausted(_) => "Room unavailable",
        }
    }
}

/// What a joiner needs to mirror a room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub info: RoomInfo,
    pub log: Vec<StrokeOp>,
}

/// A single room.
pub struct Room {
    info: RoomInfo,
    log: Vec<StrokeOp>,
    group: BroadcastGroup,
}

impl Room {
    fn new(info: RoomInfo, broadcast_capacity: usize) -> Self {
        Self {
            info,
            log: Vec::new(),
            group: BroadcastGroup::new(broadcast_capacity),
        }
    }

    pub fn info(&self) -> &RoomInfo {
        &self.info
    }

    pub fn log(&self) -> &[StrokeOp] {
        &self.log
    }

    pub fn peer_count(&self) -> usize {
        self.group.peer_count()
    }

    pub fn broadcast_stats(&self) -> BroadcastStats {
        self.group.stats()
    }
}

type CodeSource = Box<dyn FnMut() -> RoomCode + Send + Sync>;

/// All rooms of one relay process. Rooms live until the process exits.
pub struct RoomStore {
    rooms: HashMap<RoomCode, Room>,
    broadcast_capacity: usize,
    max_peers_per_room: usize,
    next_code: CodeSource,
}

impl RoomStore {
    pub fn new(broadcast_capacity: usize, max_peers_per_room: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            broadcast_capacity,
            max_peers_per_room,
            next_code: Box::new(RoomCode::generate),
        }
    }

    /// Replace the random code generator, e.g. with a fixed sequence in tests.
    pub fn with_code_source<F>(mut self, source: F) -> Self
    where
        F: FnMut() -> RoomCode + Send + Sync + 'static,
    {
        self.next_code = Box::new(source);
        self
    }

    /// Creates an empty room under a code no other room uses.
    pub fn create_room(
        &mut self,
        width: u32,
        height: u32,
        background_color: impl Into<String>,
    ) -> Result<RoomCode, StoreError> {
        let code = self.unused_code()?;
        let info = RoomInfo {
            width,
            height,
            canvas_color: background_color.into(),
        };
        log::info!("Room {code} created ({width}x{height}, {})", info.canvas_color);
        self.rooms
            .insert(code.clone(), Room::new(info, self.broadcast_capacity));
        Ok(code)
    }

    fn unused_code(&mut self) -> Result<RoomCode, StoreError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = (self.next_code)();
            if !self.rooms.contains_key(&code) {
                return Ok(code);
            }
            log::debug!("Room code {code} already taken, regenerating");
        }
        Err(StoreError::CodesExhausted(MAX_CODE_ATTEMPTS))
    }

    /// Settings and full log of a room.
    pub fn join_room(&self, code: &RoomCode) -> Result<RoomSnapshot, StoreError> {
        let room = self
            .rooms
            .get(code)
            .ok_or_else(|| StoreError::RoomNotFound(code.clone()))?;
        Ok(RoomSnapshot {
            info: room.info.clone(),
            log: room.log.clone(),
        })
    }

    /// Appends a draw. `None` when the room does not exist.
    pub fn append_draw(&mut self, code: &RoomCode, op: StrokeOp) -> Option<StrokeOp> {
        let room = self.rooms.get_mut(code)?;
        room.log.push(op.clone());
        Some(op)
    }

    /// Removes every logged stroke whose geometry matches an erased path, on
    /// any layer. The op comes back whether or not anything matched; `None`
    /// only when the room does not exist.
    pub fn append_erase(&mut self, code: &RoomCode, op: EraseOp) -> Option<EraseOp> {
        let room = self.rooms.get_mut(code)?;
        let keys = op.keys();
        let before = room.log.len();
        room.log.retain(|stroke| !keys.contains(&stroke.key()));
        log::debug!(
            "Room {code}: erase removed {} of {before} strokes",
            before - room.log.len()
        );
        Some(op)
    }

    /// Subscribes `peer` to a room's broadcasts.
    pub fn add_peer(&mut self, code: &RoomCode, peer: PeerId) -> Result<RelayReceiver, StoreError> {
        let max = self.max_peers_per_room;
        let room = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| StoreError::RoomNotFound(code.clone()))?;
        if !room.group.has_peer(&peer) && room.group.peer_count() >= max {
            return Err(StoreError::RoomFull {
                code: code.clone(),
                max,
            });
        }
        Ok(room.group.add_peer(peer))
    }

    pub fn remove_peer(&mut self, code: &RoomCode, peer: &PeerId) -> bool {
        self.rooms
            .get_mut(code)
            .is_some_and(|room| room.group.remove_peer(peer))
    }

    pub fn peer_count(&self, code: &RoomCode) -> usize {
        self.rooms.get(code).map_or(0, Room::peer_count)
    }

    /// Relays `message` to every peer of the room except `origin`.
    /// Returns the receiver count, `None` when the room does not exist.
    pub fn broadcast(
        &mut self,
        code: &RoomCode,
        origin: PeerId,
        message: ServerMessage,
    ) -> Option<usize> {
        let room = self.rooms.get_mut(code)?;
        Some(room.group.broadcast(origin, message))
    }

    pub fn room(&self, code: &RoomCode) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn log(&self, code: &RoomCode) -> Option<&[StrokeOp]> {
        self.rooms.get(code).map(Room::log)
    }

    pub fn contains(&self, code: &RoomCode) -> bool {
        self.rooms.contains_key(code)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
