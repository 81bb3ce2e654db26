//! Erase matching: which strokes of a layer does an eraser gesture remove?
//!
//! Two policies are supported:
//!
//! - [`ErasePolicy::Proximity`]: a stroke is hit when any point of the eraser
//!   path lies within the eraser radius of any point of the stroke path.
//!   O(E·S) point pairs.
//! - [`ErasePolicy::Outline`]: a stroke is hit when its outline (convex hull
//!   of its points grown by half its width) intersects the eraser outline
//!   (hull grown by the radius). Convex polygons are tested with the
//!   separating axis theorem.

use crate::document::Layer;
use crate::stroke::{Geometry, Point, StrokeOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErasePolicy {
    #[default]
    Proximity,
    Outline,
}

/// Selects strokes hit by an eraser path.
#[derive(Debug, Clone, Copy, Default)]
pub struct EraseMatcher {
    policy: ErasePolicy,
}

impl EraseMatcher {
    pub fn new(policy: ErasePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ErasePolicy {
        self.policy
    }

    /// Whether the eraser path hits `stroke`.
    pub fn hits(&self, eraser: &Geometry, radius: f64, stroke: &StrokeOp) -> bool {
        match self.policy {
            ErasePolicy::Proximity => within_radius(eraser, stroke.geometry(), radius),
            ErasePolicy::Outline => {
                let eraser_outline = outline(eraser, radius);
                let stroke_outline = outline(stroke.geometry(), stroke.style().width / 2.0);
                convex_intersect(&eraser_outline, &stroke_outline)
            }
        }
    }

    /// Positions of every stroke of `layer` hit by the eraser path.
    pub fn select(&self, eraser: &Geometry, radius: f64, layer: &Layer) -> Vec<usize> {
        if eraser.is_empty() {
            return Vec::new();
        }
        let hits: Vec<usize> = match self.policy {
            ErasePolicy::Proximity => layer
                .strokes()
                .iter()
                .enumerate()
                .filter(|(_, s)| within_radius(eraser, s.geometry(), radius))
                .map(|(i, _)| i)
                .collect(),
            ErasePolicy::Outline => {
                let eraser_outline = outline(eraser, radius);
                layer
                    .strokes()
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| {
                        convex_intersect(&eraser_outline, &outline(s.geometry(), s.style().width / 2.0))
                    })
                    .map(|(i, _)| i)
                    .collect()
            }
        };
        log::trace!("{:?} eraser hit {} of {} strokes", self.policy, hits.len(), layer.len());
        hits
    }
}

fn within_radius(eraser: &Geometry, stroke: &Geometry, radius: f64) -> bool {
    eraser
        .points()
        .any(|e| stroke.points().any(|p| e.distance(&p) <= radius))
}

/// Convex outline of a path grown by `inflate` (octagonal approximation).
pub fn outline(geometry: &Geometry, inflate: f64) -> Vec<Point> {
    let inflate = if inflate.is_finite() { inflate.max(0.0) } else { 0.0 };
    let mut points: Vec<Point> = Vec::with_capacity(geometry.len() * 8);
    for p in geometry.points() {
        if inflate == 0.0 {
            points.push(p);
            continue;
        }
        for k in 0..8 {
            let angle = std::f64::consts::FRAC_PI_4 * k as f64;
            points.push(Point::new(p.x + inflate * angle.cos(), p.y + inflate * angle.sin()));
        }
    }
    convex_hull(points)
}

fn cross(o: &Point, a: &Point, b: &Point) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Andrew's monotone chain; counter-clockwise, no repeated end point.
pub fn convex_hull(mut points: Vec<Point>) -> Vec<Point> {
    points.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    points.dedup();
    if points.len() < 3 {
        return points;
    }

    let mut lower: Vec<Point> = Vec::new();
    for p in &points {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<Point> = Vec::new();
    for p in points.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(*p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

fn edge_normals(poly: &[Point]) -> impl Iterator<Item = Point> + '_ {
    let n = poly.len();
    let edges = if n < 2 { 0 } else if n == 2 { 1 } else { n };
    (0..edges).filter_map(move |i| {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        let (dx, dy) = (b.x - a.x, b.y - a.y);
        if dx == 0.0 && dy == 0.0 {
            None
        } else {
            Some(Point::new(-dy, dx))
        }
    })
}

fn project(poly: &[Point], axis: &Point) -> (f64, f64) {
    poly.iter()
        .map(|p| p.x * axis.x + p.y * axis.y)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), d| (lo.min(d), hi.max(d)))
}

fn centroid(poly: &[Point]) -> Point {
    let n = poly.len() as f64;
    let (sx, sy) = poly.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point::new(sx / n, sy / n)
}

/// Separating-axis test for two convex polygons (points and segments allowed).
pub fn convex_intersect(a: &[Point], b: &[Point]) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }

    // Centre-to-centre axis separates the degenerate point/segment cases.
    let (ca, cb) = (centroid(a), centroid(b));
    let between = Point::new(cb.x - ca.x, cb.y - ca.y);
    let extra = (between.x != 0.0 || between.y != 0.0).then_some(between);

    for axis in edge_normals(a).chain(edge_normals(b)).chain(extra) {
        let (a_lo, a_hi) = project(a, &axis);
        let (b_lo, b_hi) = project(b, &axis);
        if a_hi < b_lo || b_hi < a_lo {
            return false;
        }
    }
    true
}
