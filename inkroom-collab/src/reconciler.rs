//! Client-side reconciliation of local gestures and remote operations.
//!
//! Local gestures are applied immediately and then handed to an [`OpSink`];
//! there is no pending or acknowledged state. Remote operations are applied
//! as they arrive, routed to a layer by stack position with a fallback to
//! the bottom layer.

use std::collections::HashSet;

use inkroom_core::{
    CodecError, EraseMatcher, EraseOp, EraseRecord, ErasePolicy, Geometry, LayerStack, LineCap,
    LineJoin, RoomCode, StrokeOp, StrokeRecord, StrokeStyle,
};

use crate::client::{ClientEvent, OpSink};
use crate::protocol::{ClientMessage, RoomInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolMode {
    #[default]
    Pencil,
    Brush,
    Eraser,
}

/// Current drawing tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSettings {
    pub mode: ToolMode,
    pub size: f64,
    pub color: String,
    pub line_cap: LineCap,
    pub line_join: LineJoin,
    pub dash_pattern: Option<Vec<f64>>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            mode: ToolMode::Pencil,
            size: 5.0,
            color: "#000000".to_string(),
            line_cap: LineCap::Round,
            line_join: LineJoin::Round,
            dash_pattern: None,
        }
    }
}

impl ToolSettings {
    /// Line width of a drawn stroke. Brushes paint twice as wide.
    pub fn stroke_width(&self) -> f64 {
        match self.mode {
            ToolMode::Brush => self.size * 2.0,
            ToolMode::Pencil | ToolMode::Eraser => self.size,
        }
    }

    pub fn eraser_radius(&self) -> f64 {
        self.size
    }

    fn style(&self, opacity: f64) -> StrokeStyle {
        StrokeStyle {
            color: self.color.clone(),
            width: self.stroke_width(),
            line_cap: self.line_cap,
            line_join: self.line_join,
            dash_pattern: self.dash_pattern.clone(),
            opacity,
        }
    }
}

/// What happened to a finished local operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Applied locally and handed to the transport.
    Sent,
    /// Applied locally; the transport was down so nobody else will see it.
    Offline,
    /// Applied locally; not in a room.
    LocalOnly,
    /// Nothing to apply (empty path, eraser missed, empty layer).
    Discarded,
}

/// One client's view of a room.
#[derive(Debug, Clone)]
pub struct Reconciler {
    layers: LayerStack,
    tool: ToolSettings,
    matcher: EraseMatcher,
    room: Option<RoomCode>,
    info: Option<RoomInfo>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            layers: LayerStack::new(),
            tool: ToolSettings::default(),
            matcher: EraseMatcher::default(),
            room: None,
            info: None,
        }
    }

    pub fn with_erase_policy(mut self, policy: ErasePolicy) -> Self {
        self.matcher = EraseMatcher::new(policy);
        self
    }

    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    /// Layer management (add, delete, reorder, select, opacity) is local
    /// and never synchronized.
    pub fn layers_mut(&mut self) -> &mut LayerStack {
        &mut self.layers
    }

    pub fn tool(&self) -> &ToolSettings {
        &self.tool
    }

    pub fn tool_mut(&mut self) -> &mut ToolSettings {
        &mut self.tool
    }

    pub fn room(&self) -> Option<&RoomCode> {
        self.room.as_ref()
    }

    pub fn room_info(&self) -> Option<&RoomInfo> {
        self.info.as_ref()
    }

    /// Starts mirroring `code`: a single fresh layer, the room's canvas.
    pub fn enter_room(&mut self, code: RoomCode, info: RoomInfo) {
        log::info!("Entering room {code} ({}x{})", info.width, info.height);
        self.layers.reset();
        self.room = Some(code);
        self.info = Some(info);
    }

    /// Completes a pointer gesture with the current tool.
    pub fn finish_gesture<S: OpSink + ?Sized>(&mut self, path: Geometry, sink: &S) -> Delivery {
        if path.is_empty() {
            return Delivery::Discarded;
        }
        match self.tool.mode {
            ToolMode::Pencil | ToolMode::Brush => {
                let active = self.layers.active_index();
                let opacity = self.layers.active_layer().opacity();
                let op = StrokeOp::new(active, path, self.tool.style(opacity));
                self.layers.active_layer_mut().push(op.clone());
                self.transmit(sink, |room| {
                    Ok(ClientMessage::Draw {
                        room_code: room,
                        stroke: StrokeRecord::try_from(&op)?,
                    })
                })
            }
            ToolMode::Eraser => {
                let hits = self.matcher.select(
                    &path,
                    self.tool.eraser_radius(),
                    self.layers.active_layer(),
                );
                if hits.is_empty() {
                    return Delivery::Discarded;
                }
                self.erase_positions(&hits, sink)
            }
        }
    }

    /// Erases every stroke of the active layer.
    pub fn clear_active_layer<S: OpSink + ?Sized>(&mut self, sink: &S) -> Delivery {
        let all: Vec<usize> = (0..self.layers.active_layer().len()).collect();
        if all.is_empty() {
            return Delivery::Discarded;
        }
        self.erase_positions(&all, sink)
    }

    fn erase_positions<S: OpSink + ?Sized>(&mut self, positions: &[usize], sink: &S) -> Delivery {
        let active = self.layers.active_index();
        let layer = self.layers.active_layer_mut();
        // Peers and the room log erase by geometry, so every stroke sharing a
        // hit stroke's path goes too.
        let mut seen = HashSet::new();
        let erased: Vec<Geometry> = positions
            .iter()
            .filter_map(|&i| layer.strokes().get(i))
            .filter(|s| seen.insert(s.key()))
            .map(|s| s.geometry().clone())
            .collect();
        let erase = EraseOp::new(active, erased);
        layer.remove_matching(&erase.keys());
        self.transmit(sink, |room| {
            Ok(ClientMessage::Erase {
                room_code: room,
                erase: EraseRecord::try_from(&erase)?,
            })
        })
    }

    fn transmit<S, F>(&self, sink: &S, build: F) -> Delivery
    where
        S: OpSink + ?Sized,
        F: FnOnce(RoomCode) -> Result<ClientMessage, CodecError>,
    {
        let Some(room) = self.room.clone() else {
            return Delivery::LocalOnly;
        };
        if !sink.is_connected() {
            log::warn!("Lost connection to server. Your changes won't be saved.");
            return Delivery::Offline;
        }
        let message = match build(room) {
            Ok(message) => message,
            Err(e) => {
                log::error!("Could not encode local operation: {e}");
                return Delivery::LocalOnly;
            }
        };
        match sink.submit(message) {
            Ok(()) => Delivery::Sent,
            Err(e) => {
                log::warn!("Lost connection to server. Your changes won't be saved. ({e})");
                Delivery::Offline
            }
        }
    }

    pub fn apply_remote_draw(&mut self, op: StrokeOp) {
        self.layers.resolve_mut(op.layer()).push(op);
    }

    /// Returns how many strokes were removed.
    pub fn apply_remote_erase(&mut self, erase: &EraseOp) -> usize {
        self.layers
            .resolve_mut(erase.layer())
            .remove_matching(&erase.keys())
            .len()
    }

    /// Replaces every layer's strokes with a replay of `log`.
    pub fn apply_canvas_state(&mut self, log: Vec<StrokeOp>) {
        self.layers.clear_strokes();
        for op in log {
            self.apply_remote_draw(op);
        }
    }

    pub fn apply_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::CanvasState(log) => self.apply_canvas_state(log),
            ClientEvent::RemoteDraw(op) => self.apply_remote_draw(op),
            ClientEvent::RemoteErase(erase) => {
                self.apply_remote_erase(&erase);
            }
            ClientEvent::Connected => log::debug!("Transport connected"),
            ClientEvent::Disconnected => log::warn!("Transport disconnected"),
            ClientEvent::Reconnecting { attempt } => log::debug!("Reconnecting ({attempt})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolError;
    use inkroom_core::Point;
    use std::cell::RefCell;

    struct MockSink {
        connected: bool,
        sent: RefCell<Vec<ClientMessage>>,
    }

    impl MockSink {
        fn online() -> Self {
            Self {
                connected: true,
                sent: RefCell::new(Vec::new()),
            }
        }

        fn offline() -> Self {
            Self {
                connected: false,
                sent: RefCell::new(Vec::new()),
            }
        }
    }

    impl OpSink for MockSink {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn submit(&self, message: ClientMessage) -> Result<(), ProtocolError> {
            self.sent.borrow_mut().push(message);
            Ok(())
        }
    }

    fn line(x: f64) -> Geometry {
        Geometry::polyline([Point::new(x, 0.0), Point::new(x, 10.0), Point::new(x, 20.0)])
    }

    fn in_room() -> Reconciler {
        let mut r = Reconciler::new();
        r.enter_room(
            RoomCode::parse("abc123").unwrap(),
            RoomInfo {
                width: 800,
                height: 600,
                canvas_color: "#fff".into(),
            },
        );
        r
    }

    #[test]
    fn test_local_draw_is_sent() {
        let mut r = in_room();
        let sink = MockSink::online();
        r.layers_mut().add_layer();
        r.layers_mut().active_layer_mut().set_opacity(0.5);

        assert_eq!(r.finish_gesture(line(1.0), &sink), Delivery::Sent);
        assert_eq!(r.layers().layer(1).unwrap().len(), 1);

        let sent = sink.sent.borrow();
        match sent.as_slice() {
            [ClientMessage::Draw { room_code, stroke }] => {
                assert_eq!(room_code.as_str(), "abc123");
                assert_eq!(stroke.layer, 1);
                assert_eq!(stroke.opacity, 0.5);
                assert_eq!(stroke.stroke_width, 5.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_brush_doubles_width() {
        let mut r = in_room();
        r.tool_mut().mode = ToolMode::Brush;
        r.tool_mut().size = 3.0;
        r.finish_gesture(line(1.0), &MockSink::online());
        assert_eq!(r.layers().active_layer().strokes()[0].style().width, 6.0);
    }

    #[test]
    fn test_offline_draw_applies_locally() {
        let mut r = in_room();
        let sink = MockSink::offline();
        assert_eq!(r.finish_gesture(line(1.0), &sink), Delivery::Offline);
        assert_eq!(r.layers().stroke_count(), 1);
        assert!(sink.sent.borrow().is_empty());
    }

    #[test]
    fn test_draw_outside_room() {
        let mut r = Reconciler::new();
        let sink = MockSink::online();
        assert_eq!(r.finish_gesture(line(1.0), &sink), Delivery::LocalOnly);
        assert_eq!(r.layers().stroke_count(), 1);
        assert!(sink.sent.borrow().is_empty());
    }

    #[test]
    fn test_empty_gesture_discarded() {
        let mut r = in_room();
        let sink = MockSink::online();
        assert_eq!(r.finish_gesture(Geometry::default(), &sink), Delivery::Discarded);
        assert_eq!(r.layers().stroke_count(), 0);
    }

    #[test]
    fn test_eraser_removes_and_emits_exact_geometry() {
        let mut r = in_room();
        let sink = MockSink::online();
        r.finish_gesture(line(0.0), &sink);
        r.finish_gesture(line(100.0), &sink);

        r.tool_mut().mode = ToolMode::Eraser;
        r.tool_mut().size = 4.0;
        assert_eq!(
            r.finish_gesture(Geometry::polyline([Point::new(2.0, 10.0)]), &sink),
            Delivery::Sent
        );
        assert_eq!(r.layers().active_layer().len(), 1);

        let sent = sink.sent.borrow();
        match sent.last() {
            Some(ClientMessage::Erase { erase, .. }) => {
                let op = EraseOp::try_from(erase.clone()).unwrap();
                assert_eq!(op.erased(), &[line(0.0)]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_outline_erase_matches_peer_view() {
        let wide = StrokeOp::new(
            0,
            Geometry::polyline([Point::new(0.0, 0.0), Point::new(100.0, 0.0)]),
            StrokeStyle {
                width: 40.0,
                ..StrokeStyle::default()
            },
        );
        let thin = StrokeOp::new(
            0,
            wide.geometry().clone(),
            StrokeStyle {
                width: 2.0,
                ..StrokeStyle::default()
            },
        );

        let mut author = in_room().with_erase_policy(ErasePolicy::Outline);
        let mut peer = in_room();
        for r in [&mut author, &mut peer] {
            r.apply_remote_draw(wide.clone());
            r.apply_remote_draw(thin.clone());
        }

        let sink = MockSink::online();
        author.tool_mut().mode = ToolMode::Eraser;
        author.tool_mut().size = 1.0;
        let eraser = Geometry::polyline([Point::new(50.0, 15.0)]);
        assert_eq!(author.finish_gesture(eraser, &sink), Delivery::Sent);

        let sent = sink.sent.borrow();
        let erase = match sent.last() {
            Some(ClientMessage::Erase { erase, .. }) => EraseOp::try_from(erase.clone()).unwrap(),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(erase.erased().len(), 1);
        assert_eq!(peer.apply_remote_erase(&erase), 2);
        assert_eq!(author.layers().stroke_count(), 0);
        assert_eq!(peer.layers().stroke_count(), author.layers().stroke_count());
    }

    #[test]
    fn test_eraser_miss_sends_nothing() {
        let mut r = in_room();
        let sink = MockSink::online();
        r.finish_gesture(line(0.0), &sink);
        r.tool_mut().mode = ToolMode::Eraser;

        let eraser = Geometry::polyline([Point::new(500.0, 500.0)]);
        assert_eq!(r.finish_gesture(eraser, &sink), Delivery::Discarded);
        assert_eq!(sink.sent.borrow().len(), 1);
    }

    #[test]
    fn test_remote_draw_falls_back_to_bottom_layer() {
        let mut r = in_room();
        r.apply_remote_draw(StrokeOp::new(7, line(0.0), StrokeStyle::default()));
        assert_eq!(r.layers().layer(0).unwrap().len(), 1);
    }

    #[test]
    fn test_remote_erase_is_idempotent() {
        let mut r = in_room();
        let op = StrokeOp::new(0, line(0.0), StrokeStyle::default());
        r.apply_remote_draw(op.clone());
        let erase = EraseOp::of_strokes(0, [&op]);

        assert_eq!(r.apply_remote_erase(&erase), 1);
        assert_eq!(r.apply_remote_erase(&erase), 0);
        assert_eq!(r.layers().stroke_count(), 0);
    }

    #[test]
    fn test_canvas_state_replaces_content() {
        let mut r = in_room();
        r.finish_gesture(line(50.0), &MockSink::online());
        r.layers_mut().add_layer();

        let log = vec![
            StrokeOp::new(0, line(0.0), StrokeStyle::default()),
            StrokeOp::new(1, line(1.0), StrokeStyle::default()),
        ];
        r.apply_event(ClientEvent::CanvasState(log));

        assert_eq!(r.layers().len(), 2);
        assert_eq!(r.layers().layer(0).unwrap().strokes()[0].geometry(), &line(0.0));
        assert_eq!(r.layers().layer(1).unwrap().strokes()[0].geometry(), &line(1.0));
        assert_eq!(r.layers().stroke_count(), 2);
    }

    #[test]
    fn test_clear_active_layer() {
        let mut r = in_room();
        let sink = MockSink::online();
        r.finish_gesture(line(0.0), &sink);
        r.finish_gesture(line(10.0), &sink);

        assert_eq!(r.clear_active_layer(&sink), Delivery::Sent);
        assert_eq!(r.layers().stroke_count(), 0);
        match sink.sent.borrow().last() {
            Some(ClientMessage::Erase { erase, .. }) => assert_eq!(erase.erased_paths.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(r.clear_active_layer(&sink), Delivery::Discarded);
    }

    #[test]
    fn test_enter_room_resets_layers() {
        let mut r = in_room();
        r.layers_mut().add_layer();
        r.finish_gesture(line(0.0), &MockSink::online());

        r.enter_room(
            RoomCode::parse("xyz789").unwrap(),
            RoomInfo {
                width: 10,
                height: 10,
                canvas_color: "#000".into(),
            },
        );
        assert_eq!(r.layers().len(), 1);
        assert_eq!(r.layers().stroke_count(), 0);
        assert_eq!(r.room().unwrap().as_str(), "xyz789");
        assert_eq!(r.room_info().unwrap().width, 10);
    }
}
