//! Stroke model shared by the relay and its clients.
//!
//! A [`StrokeOp`] is one finished drawing gesture: the path it traced, the
//! style it was drawn with and the index of the layer it targets. Strokes
//! carry no identifier; two strokes are the same stroke when their
//! geometries serialize to the same text (see [`GeometryKey`]).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 2D position in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// One command of a stroke path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PathCommand {
    MoveTo(Point),
    LineTo(Point),
}

impl PathCommand {
    /// The end point of the command.
    pub fn point(&self) -> Point {
        match self {
            PathCommand::MoveTo(p) | PathCommand::LineTo(p) => *p,
        }
    }
}

/// Ordered path commands of a stroke.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Geometry(Vec<PathCommand>);

impl Geometry {
    pub fn new(commands: Vec<PathCommand>) -> Self {
        Self(commands)
    }

    /// A polyline: move to the first point, line to every following one.
    pub fn polyline<I>(points: I) -> Self
    where
        I: IntoIterator<Item = Point>,
    {
        let commands = points
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                if i == 0 {
                    PathCommand::MoveTo(p)
                } else {
                    PathCommand::LineTo(p)
                }
            })
            .collect();
        Self(commands)
    }

    pub fn commands(&self) -> &[PathCommand] {
        &self.0
    }

    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        self.0.iter().map(PathCommand::point)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Structural identity of this geometry.
    pub fn key(&self) -> GeometryKey {
        // Tags and plain numbers always serialize.
        GeometryKey(serde_json::to_string(&self.0).unwrap_or_default())
    }
}

/// Serialized form of a [`Geometry`], used to match strokes for erasure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryKey(String);

impl GeometryKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineCap {
    Butt,
    #[default]
    Round,
    Square,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineJoin {
    Miter,
    #[default]
    Round,
    Bevel,
}

/// Rendering style of a stroke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    /// CSS color string, e.g. `#1e88e5`
    pub color: String,
    pub width: f64,
    pub line_cap: LineCap,
    pub line_join: LineJoin,
    pub dash_pattern: Option<Vec<f64>>,
    /// Opacity in [0, 1]
    pub opacity: f64,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            color: "#000000".to_string(),
            width: 1.0,
            line_cap: LineCap::Round,
            line_join: LineJoin::Round,
            dash_pattern: None,
            opacity: 1.0,
        }
    }
}

/// An immutable, completed stroke targeting a layer by stack position.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeOp {
    layer: usize,
    geometry: Geometry,
    style: StrokeStyle,
}

impl StrokeOp {
    pub fn new(layer: usize, geometry: Geometry, style: StrokeStyle) -> Self {
        Self {
            layer,
            geometry,
            style,
        }
    }

    pub fn layer(&self) -> usize {
        self.layer
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn style(&self) -> &StrokeStyle {
        &self.style
    }

    pub fn key(&self) -> GeometryKey {
        self.geometry.key()
    }

    /// Copy of this stroke rendered at a different opacity.
    pub fn with_opacity(&self, opacity: f64) -> Self {
        let mut style = self.style.clone();
        style.opacity = opacity;
        Self {
            layer: self.layer,
            geometry: self.geometry.clone(),
            style,
        }
    }
}

/// Logical removal of strokes from one layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EraseOp {
    layer: usize,
    erased: Vec<Geometry>,
}

impl EraseOp {
    pub fn new(layer: usize, erased: Vec<Geometry>) -> Self {
        Self { layer, erased }
    }

    /// Erase exactly the given strokes.
    pub fn of_strokes<'a, I>(layer: usize, strokes: I) -> Self
    where
        I: IntoIterator<Item = &'a StrokeOp>,
    {
        Self {
            layer,
            erased: strokes.into_iter().map(|s| s.geometry.clone()).collect(),
        }
    }

    pub fn layer(&self) -> usize {
        self.layer
    }

    pub fn erased(&self) -> &[Geometry] {
        &self.erased
    }

    pub fn is_empty(&self) -> bool {
        self.erased.is_empty()
    }

    /// Keys of every erased geometry.
    pub fn keys(&self) -> HashSet<GeometryKey> {
        self.erased.iter().map(Geometry::key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry {
        Geometry::polyline([Point::new(x0, y0), Point::new(x1, y1)])
    }

    #[test]
    fn test_polyline_commands() {
        let g = Geometry::polyline([Point::new(0.0, 0.0), Point::new(1.0, 1.0), Point::new(2.0, 0.0)]);
        assert_eq!(g.len(), 3);
        assert!(matches!(g.commands()[0], PathCommand::MoveTo(_)));
        assert!(matches!(g.commands()[1], PathCommand::LineTo(_)));
        assert!(matches!(g.commands()[2], PathCommand::LineTo(_)));
    }

    #[test]
    fn test_geometry_key_structural() {
        let a = StrokeOp::new(0, line(1.0, 2.0, 3.0, 4.0), StrokeStyle::default());
        let b = StrokeOp::new(
            3,
            line(1.0, 2.0, 3.0, 4.0),
            StrokeStyle {
                color: "#ff0000".into(),
                width: 12.0,
                ..StrokeStyle::default()
            },
        );
        // Layer and style do not take part in identity.
        assert_eq!(a.key(), b.key());

        let c = StrokeOp::new(0, line(1.0, 2.0, 3.0, 4.5), StrokeStyle::default());
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_key_distinguishes_command_tags() {
        let moves = Geometry::new(vec![
            PathCommand::MoveTo(Point::new(0.0, 0.0)),
            PathCommand::MoveTo(Point::new(5.0, 5.0)),
        ]);
        assert_ne!(moves.key(), line(0.0, 0.0, 5.0, 5.0).key());
    }

    #[test]
    fn test_with_opacity_keeps_identity() {
        let s = StrokeOp::new(1, line(0.0, 0.0, 10.0, 10.0), StrokeStyle::default());
        let faded = s.with_opacity(0.25);
        assert_eq!(faded.style().opacity, 0.25);
        assert_eq!(faded.layer(), 1);
        assert_eq!(faded.key(), s.key());
    }

    #[test]
    fn test_erase_op_keys() {
        let s1 = StrokeOp::new(0, line(0.0, 0.0, 1.0, 1.0), StrokeStyle::default());
        let s2 = StrokeOp::new(0, line(2.0, 2.0, 3.0, 3.0), StrokeStyle::default());
        let erase = EraseOp::of_strokes(0, [&s1, &s2]);
        let keys = erase.keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&s1.key()));
        assert!(keys.contains(&s2.key()));
    }

    #[test]
    fn test_point_distance() {
        assert_eq!(Point::new(0.0, 0.0).distance(&Point::new(3.0, 4.0)), 5.0);
    }
}
