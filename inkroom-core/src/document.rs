//! Client-side layered drawing document.
//!
//! Layers are addressed by their position in the stack (index 0 is the
//! bottom layer). Positions are local: peers never exchange layer ids, so an
//! incoming operation is routed through [`LayerStack::resolve_mut`], which
//! falls back to the bottom layer when the index does not exist here.

use std::collections::HashSet;

use crate::stroke::{GeometryKey, StrokeOp};

/// An opacity-scoped, ordered group of strokes.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    name: String,
    opacity: f64,
    strokes: Vec<StrokeOp>,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opacity: 1.0,
            strokes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    pub fn strokes(&self) -> &[StrokeOp] {
        &self.strokes
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn push(&mut self, stroke: StrokeOp) {
        self.strokes.push(stroke);
    }

    /// Removes every stroke whose geometry key is in `keys`.
    pub fn remove_matching(&mut self, keys: &HashSet<GeometryKey>) -> Vec<StrokeOp> {
        if keys.is_empty() {
            return Vec::new();
        }
        let (removed, kept): (Vec<StrokeOp>, Vec<StrokeOp>) = std::mem::take(&mut self.strokes)
            .into_iter()
            .partition(|s| keys.contains(&s.key()));
        self.strokes = kept;
        removed
    }

    pub fn clear(&mut self) -> Vec<StrokeOp> {
        std::mem::take(&mut self.strokes)
    }

    /// Sets the layer opacity (clamped to [0, 1]) and re-tints its strokes.
    pub fn set_opacity(&mut self, opacity: f64) {
        let opacity = opacity.clamp(0.0, 1.0);
        self.opacity = opacity;
        for stroke in &mut self.strokes {
            *stroke = stroke.with_opacity(opacity);
        }
    }
}

/// Ordered layer stack with one active layer. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStack {
    layers: Vec<Layer>,
    active: usize,
}

impl Default for LayerStack {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerStack {
    /// A stack holding a single empty layer.
    pub fn new() -> Self {
        Self {
            layers: vec![Layer::new("Layer 1")],
            active: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Always false: the stack keeps at least one layer.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_layer(&self) -> &Layer {
        &self.layers[self.active]
    }

    pub fn active_layer_mut(&mut self) -> &mut Layer {
        &mut self.layers[self.active]
    }

    /// Appends a new top layer and makes it active.
    pub fn add_layer(&mut self) -> usize {
        let name = format!("Layer {}", self.layers.len() + 1);
        self.layers.push(Layer::new(name));
        self.active = self.layers.len() - 1;
        self.active
    }

    /// Deletes the active layer unless it is the last one; the bottom layer
    /// becomes active.
    pub fn delete_active_layer(&mut self) -> Option<Layer> {
        if self.layers.len() <= 1 {
            return None;
        }
        let removed = self.layers.remove(self.active);
        self.active = 0;
        Some(removed)
    }

    /// Swaps the active layer with the one above it.
    pub fn move_active_up(&mut self) -> bool {
        if self.active + 1 >= self.layers.len() {
            return false;
        }
        self.layers.swap(self.active, self.active + 1);
        self.active += 1;
        true
    }

    /// Swaps the active layer with the one below it.
    pub fn move_active_down(&mut self) -> bool {
        if self.active == 0 {
            return false;
        }
        self.layers.swap(self.active, self.active - 1);
        self.active -= 1;
        true
    }

    pub fn set_active(&mut self, index: usize) -> bool {
        if index >= self.layers.len() {
            return false;
        }
        self.active = index;
        true
    }

    /// Position an incoming op lands on: `index` if it exists, else 0.
    pub fn resolve_index(&self, index: usize) -> usize {
        if index < self.layers.len() {
            index
        } else {
            0
        }
    }

    pub fn resolve_mut(&mut self, index: usize) -> &mut Layer {
        let index = self.resolve_index(index);
        &mut self.layers[index]
    }

    /// Drops every layer and starts over with a single empty one.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Empties every layer, keeping the stack structure.
    pub fn clear_strokes(&mut self) {
        for layer in &mut self.layers {
            layer.clear();
        }
    }

    pub fn stroke_count(&self) -> usize {
        self.layers.iter().map(Layer::len).sum()
    }

    /// Geometry keys per layer, in draw order.
    pub fn visible_keys(&self) -> Vec<Vec<GeometryKey>> {
        self.layers
            .iter()
            .map(|l| l.strokes().iter().map(StrokeOp::key).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::{Geometry, Point, StrokeStyle};

    fn stroke(layer: usize, x: f64) -> StrokeOp {
        StrokeOp::new(
            layer,
            Geometry::polyline([Point::new(x, 0.0), Point::new(x, 10.0)]),
            StrokeStyle::default(),
        )
    }

    #[test]
    fn test_new_stack_has_one_active_layer() {
        let stack = LayerStack::new();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.active_index(), 0);
        assert_eq!(stack.active_layer().name(), "Layer 1");
    }

    #[test]
    fn test_add_layer_becomes_active() {
        let mut stack = LayerStack::new();
        assert_eq!(stack.add_layer(), 1);
        assert_eq!(stack.add_layer(), 2);
        assert_eq!(stack.active_layer().name(), "Layer 3");
    }

    #[test]
    fn test_delete_keeps_last_layer() {
        let mut stack = LayerStack::new();
        assert!(stack.delete_active_layer().is_none());

        stack.add_layer();
        let removed = stack.delete_active_layer().unwrap();
        assert_eq!(removed.name(), "Layer 2");
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.active_index(), 0);
    }

    #[test]
    fn test_move_active_follows_layer() {
        let mut stack = LayerStack::new();
        stack.add_layer();
        stack.set_active(0);
        assert!(stack.move_active_up());
        assert_eq!(stack.active_index(), 1);
        assert_eq!(stack.active_layer().name(), "Layer 1");
        assert!(!stack.move_active_up());

        assert!(stack.move_active_down());
        assert!(!stack.move_active_down());
        assert_eq!(stack.layer(1).unwrap().name(), "Layer 2");
    }

    #[test]
    fn test_resolve_falls_back_to_bottom() {
        let mut stack = LayerStack::new();
        stack.add_layer();
        assert_eq!(stack.resolve_index(1), 1);
        assert_eq!(stack.resolve_index(2), 0);
        assert_eq!(stack.resolve_index(usize::MAX), 0);

        stack.resolve_mut(7).push(stroke(7, 1.0));
        assert_eq!(stack.layer(0).unwrap().len(), 1);
        assert!(stack.layer(1).unwrap().is_empty());
    }

    #[test]
    fn test_remove_matching_removes_duplicates() {
        let mut layer = Layer::new("L");
        layer.push(stroke(0, 1.0));
        layer.push(stroke(0, 2.0));
        layer.push(stroke(0, 1.0));

        let keys: HashSet<_> = [stroke(0, 1.0).key()].into_iter().collect();
        let removed = layer.remove_matching(&keys);
        assert_eq!(removed.len(), 2);
        assert_eq!(layer.len(), 1);

        // Absent geometry is a no-op.
        assert!(layer.remove_matching(&keys).is_empty());
        assert_eq!(layer.len(), 1);
    }

    #[test]
    fn test_set_opacity_retints_strokes() {
        let mut layer = Layer::new("L");
        layer.push(stroke(0, 1.0));
        layer.set_opacity(1.7);
        assert_eq!(layer.opacity(), 1.0);
        layer.set_opacity(0.3);
        assert_eq!(layer.strokes()[0].style().opacity, 0.3);
    }

    #[test]
    fn test_reset_and_clear() {
        let mut stack = LayerStack::new();
        stack.add_layer();
        stack.active_layer_mut().push(stroke(1, 1.0));
        stack.clear_strokes();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.stroke_count(), 0);

        stack.reset();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.active_index(), 0);
    }
}
