//! Stroke codec: [`StrokeOp`] / [`EraseOp`] ⇄ transport-safe records.
//!
//! Records mirror the shape browser canvases already produce: a path is a
//! list of `["M", x, y]` / `["L", x, y]` triples and style fields use the
//! canvas property names. Decoding a record into the model validates it, so
//! nothing malformed ever reaches a layer or a room log.
//!
//! Records travel either as bincode (binary frames) or JSON (text frames),
//! see [`WireFormat`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stroke::{EraseOp, Geometry, LineCap, LineJoin, PathCommand, Point, StrokeOp, StrokeStyle};

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("stroke path is empty")]
    EmptyPath,
    #[error("stroke path must start with a move-to command")]
    MissingMoveTo,
    #[error("non-finite coordinate at path index {0}")]
    NonFiniteCoordinate(usize),
    #[error("invalid stroke width: {0}")]
    InvalidWidth(f64),
    #[error("opacity {0} outside [0, 1]")]
    InvalidOpacity(f64),
    #[error("invalid dash pattern")]
    InvalidDashPattern,
    #[error("layer index {0} does not fit the wire format")]
    LayerOverflow(usize),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// Path command tag on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathTag {
    #[serde(rename = "M")]
    MoveTo,
    #[serde(rename = "L")]
    LineTo,
}

/// `[tag, x, y]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathRecord(pub PathTag, pub f64, pub f64);

/// Wire form of a [`StrokeOp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeRecord {
    pub layer: u32,
    pub path: Vec<PathRecord>,
    pub stroke: String,
    pub stroke_width: f64,
    pub stroke_line_cap: LineCap,
    pub stroke_line_join: LineJoin,
    pub stroke_dash_array: Option<Vec<f64>>,
    pub opacity: f64,
}

/// Wire form of an [`EraseOp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EraseRecord {
    pub layer: u32,
    pub erased_paths: Vec<Vec<PathRecord>>,
}

fn layer_to_wire(layer: usize) -> Result<u32, CodecError> {
    u32::try_from(layer).map_err(|_| CodecError::LayerOverflow(layer))
}

/// Converts a model geometry into wire triples.
pub fn path_to_records(geometry: &Geometry) -> Vec<PathRecord> {
    geometry
        .commands()
        .iter()
        .map(|cmd| match cmd {
            PathCommand::MoveTo(p) => PathRecord(PathTag::MoveTo, p.x, p.y),
            PathCommand::LineTo(p) => PathRecord(PathTag::LineTo, p.x, p.y),
        })
        .collect()
}

/// Validates wire triples and builds a geometry.
pub fn path_from_records(path: &[PathRecord]) -> Result<Geometry, CodecError> {
    match path.first() {
        None => return Err(CodecError::EmptyPath),
        Some(PathRecord(PathTag::LineTo, _, _)) => return Err(CodecError::MissingMoveTo),
        Some(_) => {}
    }

    let mut commands = Vec::with_capacity(path.len());
    for (i, PathRecord(tag, x, y)) in path.iter().enumerate() {
        if !x.is_finite() || !y.is_finite() {
            return Err(CodecError::NonFiniteCoordinate(i));
        }
        let p = Point::new(*x, *y);
        commands.push(match tag {
            PathTag::MoveTo => PathCommand::MoveTo(p),
            PathTag::LineTo => PathCommand::LineTo(p),
        });
    }
    Ok(Geometry::new(commands))
}

fn validate_style(style: &StrokeStyle) -> Result<(), CodecError> {
    if !style.width.is_finite() || style.width < 0.0 {
        return Err(CodecError::InvalidWidth(style.width));
    }
    if !(0.0..=1.0).contains(&style.opacity) {
        return Err(CodecError::InvalidOpacity(style.opacity));
    }
    if let Some(dashes) = &style.dash_pattern {
        if dashes.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(CodecError::InvalidDashPattern);
        }
    }
    Ok(())
}

impl TryFrom<&StrokeOp> for StrokeRecord {
    type Error = CodecError;

    fn try_from(op: &StrokeOp) -> Result<Self, Self::Error> {
        let style = op.style();
        Ok(Self {
            layer: layer_to_wire(op.layer())?,
            path: path_to_records(op.geometry()),
            stroke: style.color.clone(),
            stroke_width: style.width,
            stroke_line_cap: style.line_cap,
            stroke_line_join: style.line_join,
            stroke_dash_array: style.dash_pattern.clone(),
            opacity: style.opacity,
        })
    }
}

impl TryFrom<StrokeRecord> for StrokeOp {
    type Error = CodecError;

    fn try_from(record: StrokeRecord) -> Result<Self, Self::Error> {
        let geometry = path_from_records(&record.path)?;
        let style = StrokeStyle {
            color: record.stroke,
            width: record.stroke_width,
            line_cap: record.stroke_line_cap,
            line_join: record.stroke_line_join,
            dash_pattern: record.stroke_dash_array,
            opacity: record.opacity,
        };
        validate_style(&style)?;
        Ok(StrokeOp::new(record.layer as usize, geometry, style))
    }
}

impl TryFrom<&EraseOp> for EraseRecord {
    type Error = CodecError;

    fn try_from(op: &EraseOp) -> Result<Self, Self::Error> {
        Ok(Self {
            layer: layer_to_wire(op.layer())?,
            erased_paths: op.erased().iter().map(path_to_records).collect(),
        })
    }
}

impl TryFrom<EraseRecord> for EraseOp {
    type Error = CodecError;

    fn try_from(record: EraseRecord) -> Result<Self, Self::Error> {
        let erased = record
            .erased_paths
            .iter()
            .map(|p| path_from_records(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EraseOp::new(record.layer as usize, erased))
    }
}

/// Frame encoding used on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// bincode, standard config
    #[default]
    Binary,
    /// JSON text
    Json,
}

impl WireFormat {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            WireFormat::Binary => bincode::serde::encode_to_vec(value, bincode::config::standard())
                .map_err(|e| CodecError::Serialization(e.to_string())),
            WireFormat::Json => {
                serde_json::to_vec(value).map_err(|e| CodecError::Serialization(e.to_string()))
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            WireFormat::Binary => {
                let (value, _) =
                    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                        .map_err(|e| CodecError::Deserialization(e.to_string()))?;
                Ok(value)
            }
            WireFormat::Json => serde_json::from_slice(bytes)
                .map_err(|e| CodecError::Deserialization(e.to_string())),
        }
    }
}

/// Encodes a stroke as a standalone record.
pub fn encode_stroke(op: &StrokeOp, format: WireFormat) -> Result<Vec<u8>, CodecError> {
    format.encode(&StrokeRecord::try_from(op)?)
}

/// Decodes and validates a standalone stroke record.
pub fn decode_stroke(bytes: &[u8], format: WireFormat) -> Result<StrokeOp, CodecError> {
    let record: StrokeRecord = format.decode(bytes)?;
    StrokeOp::try_from(record)
}
