//! # inkroom-core — shared whiteboard model
//!
//! Everything both sides of a room agree on, with no I/O:
//!
//! - [`stroke`]: `StrokeOp` / `EraseOp` and structural stroke identity
//! - [`codec`]: transport-safe records and their binary/JSON encodings
//! - [`document`]: the client-side layer stack
//! - [`erase`]: eraser hit testing (proximity and outline policies)
//! - [`room`]: room codes

pub mod codec;
pub mod document;
pub mod erase;
pub mod room;
pub mod stroke;

pub use codec::{CodecError, EraseRecord, PathRecord, PathTag, StrokeRecord, WireFormat};
pub use document::{Layer, LayerStack};
pub use erase::{EraseMatcher, ErasePolicy};
pub use room::{RoomCode, RoomCodeError, ROOM_CODE_LEN};
pub use stroke::{
    EraseOp, Geometry, GeometryKey, LineCap, LineJoin, PathCommand, Point, StrokeOp, StrokeStyle,
};
