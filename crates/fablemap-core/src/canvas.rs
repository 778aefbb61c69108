//! Interactive canvas controller.
//!
//! Turns pointer, wheel and key events into map instructions. Rendering is
//! left to the host; the controller only tracks the camera, the active
//! gesture and a draft copy of the map while something is being dragged.
//! The committed snapshot is never touched mid-gesture. On drop the draft is
//! diffed against the snapshot taken at drag start and the resulting
//! instructions are returned (and applied locally through the engine).

use std::collections::HashSet;

use crate::engine::apply;
use crate::geometry::{orthogonal_path, rect_port, PathShape, Point, Rect};
use crate::{
    Changes, Direction, ElementKind, Instruction, MapEdge, MapViewData, PathSpec, ScopeLayer,
    NODE_HEIGHT, NODE_WIDTH,
};

/// Screen distance a press must travel before it becomes a drag.
pub const DRAG_THRESHOLD_PX: f64 = 5.0;
/// Screen radius around a port that still counts as a hit.
pub const PORT_HIT_RADIUS_PX: f64 = 10.0;
/// Half size of the square resize grip on a scope's bottom-right corner.
pub const RESIZE_HANDLE_PX: f64 = 12.0;
/// Fraction of the overlap depth a sibling scope is pushed per move.
pub const PUSH_STRENGTH: f64 = 0.5;
pub const ZOOM_MIN: f64 = 0.1;
pub const ZOOM_MAX: f64 = 4.0;
pub const ZOOM_FACTOR: f64 = 1.1;

/// Pan/zoom state. Screen = world * zoom + pan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub pan_x: f64,
    pub pan_y: f64,
    pub zoom: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            pan_x: 0.0,
            pan_y: 0.0,
            zoom: 1.0,
        }
    }
}

impl Camera {
    pub fn screen_to_world(&self, p: Point) -> Point {
        Point::new((p.x - self.pan_x) / self.zoom, (p.y - self.pan_y) / self.zoom)
    }

    pub fn world_to_screen(&self, p: Point) -> Point {
        Point::new(p.x * self.zoom + self.pan_x, p.y * self.zoom + self.pan_y)
    }

    /// Zoom by `factor`, keeping the world point under `screen` fixed.
    pub fn zoom_at(&mut self, screen: Point, factor: f64) {
        let zoom = (self.zoom * factor).clamp(ZOOM_MIN, ZOOM_MAX);
        let ratio = zoom / self.zoom;
        self.pan_x = screen.x - ratio * (screen.x - self.pan_x);
        self.pan_y = screen.y - ratio * (screen.y - self.pan_y);
        self.zoom = zoom;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Primary,
    Middle,
    Secondary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub meta: bool,
}

/// What lies under a world point, in priority order.
#[derive(Debug, Clone, PartialEq)]
pub enum Hit {
    Node(String),
    Port { id: String, port: Direction },
    ScopeResize(String),
    Scope(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DragTarget {
    Node(String),
    Scope(String),
}

/// Gesture state machine.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Gesture {
    #[default]
    Idle,
    Panning {
        last_screen: Point,
    },
    PotentialDrag {
        target: DragTarget,
        start_screen: Point,
        start_world: Point,
    },
    DraggingNode {
        id: String,
        last_world: Point,
    },
    DraggingScope {
        id: String,
        last_world: Point,
    },
    ResizingScope {
        id: String,
        start_world: Point,
        orig: Rect,
    },
    Connecting {
        source: String,
        port: Direction,
        cursor: Point,
    },
    BoxSelecting {
        start: Point,
        current: Point,
    },
}

/// Output of an input handler, for the host to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    RenderNeeded,
    /// Instructions to feed into the map store. Already applied locally.
    Commit(Vec<Instruction>),
    SelectionChanged(Vec<String>),
    FocusChanged(Option<String>),
}

/// Item a context menu was opened on.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextTarget {
    Node(String),
    Scope(String),
    Edge { source: String, target: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextAction {
    Delete,
    Disconnect,
    ToggleFuzzy,
    SetFocus,
}

#[derive(Debug, Clone)]
struct Draft {
    before: MapViewData,
    working: MapViewData,
}

#[derive(Debug, Clone, Default)]
pub struct CanvasController {
    map: MapViewData,
    draft: Option<Draft>,
    pub camera: Camera,
    gesture: Gesture,
    selection: Vec<String>,
}

impl CanvasController {
    pub fn new(map: MapViewData) -> Self {
        Self {
            map,
            ..Default::default()
        }
    }

    /// Replace the committed snapshot, e.g. after the store applied an AI
    /// batch. An active drag keeps its draft; its diff is taken against the
    /// drag-start snapshot and lands on top of this one.
    pub fn load(&mut self, map: MapViewData) {
        self.map = map;
        self.selection.retain(|id| self.map.contains_id(id));
    }

    /// The map as it should be drawn right now.
    pub fn view(&self) -> &MapViewData {
        self.draft.as_ref().map_or(&self.map, |d| &d.working)
    }

    /// The last committed snapshot.
    pub fn committed(&self) -> &MapViewData {
        &self.map
    }

    pub fn gesture(&self) -> &Gesture {
        &self.gesture
    }

    pub fn selection(&self) -> &[String] {
        &self.selection
    }

    // --- Hit testing ---

    pub fn hit_test(&self, world: Point) -> Hit {
        let map = self.view();

        if let Some(node) = map.nodes.iter().rev().find(|n| n.rect().contains_point(world)) {
            return Hit::Node(node.id.clone());
        }

        let radius = PORT_HIT_RADIUS_PX / self.camera.zoom;
        let port_at = |id: &str, rect: Rect| {
            Direction::PORTS
                .iter()
                .find(|p| rect_port(&rect, **p).distance(world) <= radius)
                .map(|p| Hit::Port {
                    id: id.to_string(),
                    port: *p,
                })
        };
        for node in map.nodes.iter().rev() {
            if let Some(hit) = port_at(&node.id, node.rect()) {
                return hit;
            }
        }

        let grip = RESIZE_HANDLE_PX / self.camera.zoom;
        for scope in map.scopes.iter().rev() {
            let r = scope.rect();
            if (world.x - r.right()).abs() <= grip && (world.y - r.bottom()).abs() <= grip {
                return Hit::ScopeResize(scope.id.clone());
            }
        }

        for scope in map.scopes.iter().rev() {
            if let Some(hit) = port_at(&scope.id, scope.rect()) {
                return hit;
            }
        }

        for layer in [ScopeLayer::Region, ScopeLayer::World] {
            if let Some(scope) = map
                .scopes
                .iter()
                .rev()
                .find(|s| s.layer == layer && s.rect().contains_point(world))
            {
                return Hit::Scope(scope.id.clone());
            }
        }

        Hit::Empty
    }

    // --- Input ---

    pub fn on_pointer_down(&mut self, screen: Point, button: Button, modifiers: Modifiers) -> Vec<Action> {
        let world = self.camera.screen_to_world(screen);

        if button == Button::Middle {
            self.gesture = Gesture::Panning { last_screen: screen };
            return Vec::new();
        }
        if button != Button::Primary {
            return Vec::new();
        }

        let mut actions = Vec::new();
        match self.hit_test(world) {
            Hit::Node(id) => {
                self.select(&id, modifiers.shift, &mut actions);
                self.gesture = Gesture::PotentialDrag {
                    target: DragTarget::Node(id),
                    start_screen: screen,
                    start_world: world,
                };
            }
            Hit::Scope(id) => {
                self.select(&id, modifiers.shift, &mut actions);
                self.gesture = Gesture::PotentialDrag {
                    target: DragTarget::Scope(id),
                    start_screen: screen,
                    start_world: world,
                };
            }
            Hit::Port { id, port } => {
                self.gesture = Gesture::Connecting {
                    source: id,
                    port,
                    cursor: world,
                };
            }
            Hit::ScopeResize(id) => {
                if let Some(orig) = self.map.scope(&id).map(|s| s.rect()) {
                    self.begin_draft();
                    self.gesture = Gesture::ResizingScope {
                        id,
                        start_world: world,
                        orig,
                    };
                }
            }
            Hit::Empty => {
                if modifiers.shift {
                    self.gesture = Gesture::BoxSelecting {
                        start: world,
                        current: world,
                    };
                } else {
                    if !self.selection.is_empty() {
                        self.selection.clear();
                        actions.push(Action::SelectionChanged(Vec::new()));
                    }
                    self.gesture = Gesture::Panning { last_screen: screen };
                }
            }
        }
        actions.push(Action::RenderNeeded);
        actions
    }

    pub fn on_pointer_move(&mut self, screen: Point) -> Vec<Action> {
        let world = self.camera.screen_to_world(screen);

        match std::mem::take(&mut self.gesture) {
            Gesture::Idle => Vec::new(),
            Gesture::Panning { last_screen } => {
                self.camera.pan_x += screen.x - last_screen.x;
                self.camera.pan_y += screen.y - last_screen.y;
                self.gesture = Gesture::Panning { last_screen: screen };
                vec![Action::RenderNeeded]
            }
            Gesture::PotentialDrag {
                target,
                start_screen,
                start_world,
            } => {
                if start_screen.distance(screen) <= DRAG_THRESHOLD_PX {
                    self.gesture = Gesture::PotentialDrag {
                        target,
                        start_screen,
                        start_world,
                    };
                    return Vec::new();
                }
                self.begin_draft();
                let (dx, dy) = (world.x - start_world.x, world.y - start_world.y);
                self.gesture = match target {
                    DragTarget::Node(id) => {
                        self.with_working(|map| move_node(map, &id, dx, dy));
                        Gesture::DraggingNode { id, last_world: world }
                    }
                    DragTarget::Scope(id) => {
                        self.with_working(|map| {
                            translate_subtree(map, &id, dx, dy);
                            push_apart(map, &id);
                        });
                        Gesture::DraggingScope { id, last_world: world }
                    }
                };
                vec![Action::RenderNeeded]
            }
            Gesture::DraggingNode { id, last_world } => {
                let (dx, dy) = (world.x - last_world.x, world.y - last_world.y);
                self.with_working(|map| move_node(map, &id, dx, dy));
                self.gesture = Gesture::DraggingNode { id, last_world: world };
                vec![Action::RenderNeeded]
            }
            Gesture::DraggingScope { id, last_world } => {
                let (dx, dy) = (world.x - last_world.x, world.y - last_world.y);
                self.with_working(|map| {
                    translate_subtree(map, &id, dx, dy);
                    push_apart(map, &id);
                });
                self.gesture = Gesture::DraggingScope { id, last_world: world };
                vec![Action::RenderNeeded]
            }
            Gesture::ResizingScope {
                id,
                start_world,
                orig,
            } => {
                let w = (orig.w + world.x - start_world.x).max(NODE_WIDTH);
                let h = (orig.h + world.y - start_world.y).max(NODE_HEIGHT);
                self.with_working(|map| {
                    if let Some(scope) = map.scopes.iter_mut().find(|s| s.id == id) {
                        scope.w = w;
                        scope.h = h;
                    }
                });
                self.gesture = Gesture::ResizingScope {
                    id,
                    start_world,
                    orig,
                };
                vec![Action::RenderNeeded]
            }
            Gesture::Connecting { source, port, .. } => {
                self.gesture = Gesture::Connecting {
                    source,
                    port,
                    cursor: world,
                };
                vec![Action::RenderNeeded]
            }
            Gesture::BoxSelecting { start, .. } => {
                self.gesture = Gesture::BoxSelecting {
                    start,
                    current: world,
                };
                vec![Action::RenderNeeded]
            }
        }
    }

    pub fn on_pointer_up(&mut self, screen: Point) -> Vec<Action> {
        let world = self.camera.screen_to_world(screen);

        match std::mem::take(&mut self.gesture) {
            Gesture::Idle | Gesture::Panning { .. } => Vec::new(),
            Gesture::PotentialDrag { .. } => vec![Action::RenderNeeded],
            Gesture::DraggingNode { id, .. } => self.commit_draft(Some(DragTarget::Node(id))),
            Gesture::DraggingScope { id, .. } => self.commit_draft(Some(DragTarget::Scope(id))),
            Gesture::ResizingScope { .. } => self.commit_draft(None),
            Gesture::Connecting { source, port, .. } => {
                let target = match self.hit_test(world) {
                    Hit::Node(id) | Hit::Scope(id) | Hit::ScopeResize(id) => Some(id),
                    Hit::Port { id, .. } => Some(id),
                    Hit::Empty => None,
                };
                match target {
                    Some(target) if target != source => {
                        let ins = Instruction::BuildPath(PathSpec {
                            source,
                            target,
                            direction: (port != Direction::Unknown).then_some(port),
                            ..Default::default()
                        });
                        self.commit(vec![ins])
                    }
                    _ => vec![Action::RenderNeeded],
                }
            }
            Gesture::BoxSelecting { start, .. } => {
                let area = Rect::from_corners(start, world);
                self.selection = self
                    .map
                    .nodes
                    .iter()
                    .filter(|n| n.rect().intersects(&area))
                    .map(|n| n.id.clone())
                    .collect();
                vec![
                    Action::SelectionChanged(self.selection.clone()),
                    Action::RenderNeeded,
                ]
            }
        }
    }

    /// Ctrl/meta + wheel zooms toward the cursor; plain wheel pans.
    pub fn on_wheel(&mut self, screen: Point, dx: f64, dy: f64, modifiers: Modifiers) -> Vec<Action> {
        if modifiers.ctrl || modifiers.meta {
            let factor = if dy < 0.0 { ZOOM_FACTOR } else { 1.0 / ZOOM_FACTOR };
            self.camera.zoom_at(screen, factor);
        } else {
            self.camera.pan_x -= dx;
            self.camera.pan_y -= dy;
        }
        vec![Action::RenderNeeded]
    }

    pub fn on_key_down(&mut self, key: &str) -> Vec<Action> {
        match key {
            "Escape" => {
                if self.gesture != Gesture::Idle || self.draft.is_some() {
                    self.cancel();
                    vec![Action::RenderNeeded]
                } else if !self.selection.is_empty() {
                    self.selection.clear();
                    vec![Action::SelectionChanged(Vec::new()), Action::RenderNeeded]
                } else {
                    Vec::new()
                }
            }
            "Delete" | "Backspace" if self.gesture == Gesture::Idle => {
                let ins: Vec<Instruction> = self
                    .selection
                    .iter()
                    .filter_map(|id| {
                        if self.map.node(id).is_some() {
                            Some(Instruction::delete(ElementKind::Node, id.clone()))
                        } else if self.map.scope(id).is_some() {
                            Some(Instruction::delete(ElementKind::Scope, id.clone()))
                        } else {
                            None
                        }
                    })
                    .collect();
                if ins.is_empty() {
                    return Vec::new();
                }
                self.selection.clear();
                let mut actions = self.commit(ins);
                actions.push(Action::SelectionChanged(Vec::new()));
                actions
            }
            _ => Vec::new(),
        }
    }

    /// Abort the active gesture and throw the draft away.
    pub fn cancel(&mut self) {
        self.gesture = Gesture::Idle;
        self.draft = None;
    }

    // --- Context menu ---

    pub fn context_action(&mut self, target: &ContextTarget, action: ContextAction) -> Vec<Action> {
        let ins = match (action, target) {
            (ContextAction::Delete, ContextTarget::Node(id)) => {
                vec![Instruction::delete(ElementKind::Node, id.clone())]
            }
            (ContextAction::Delete, ContextTarget::Scope(id)) => {
                vec![Instruction::delete(ElementKind::Scope, id.clone())]
            }
            (ContextAction::Delete | ContextAction::Disconnect, ContextTarget::Edge { source, target }) => {
                vec![delete_edge(source, target)]
            }
            (ContextAction::Disconnect, ContextTarget::Node(id) | ContextTarget::Scope(id)) => self
                .map
                .edges
                .iter()
                .filter(|e| e.source == *id || e.target == *id)
                .map(|e| delete_edge(&e.source, &e.target))
                .collect(),
            (ContextAction::ToggleFuzzy, ContextTarget::Node(id)) => match self.map.node(id) {
                Some(node) => vec![Instruction::update(
                    id.clone(),
                    Changes {
                        is_fuzzy: Some(!node.is_fuzzy),
                        ..Default::default()
                    },
                )],
                None => Vec::new(),
            },
            (ContextAction::SetFocus, ContextTarget::Node(id) | ContextTarget::Scope(id)) => {
                if !self.map.contains_id(id) {
                    return Vec::new();
                }
                self.map.focus_id = Some(id.clone());
                return vec![Action::FocusChanged(Some(id.clone())), Action::RenderNeeded];
            }
            _ => Vec::new(),
        };
        if ins.is_empty() {
            return Vec::new();
        }
        self.commit(ins)
    }

    // --- Drawing helpers ---

    /// The rubber-band line while connecting.
    pub fn connection_preview(&self) -> Option<PathShape> {
        let Gesture::Connecting { source, port, cursor } = &self.gesture else {
            return None;
        };
        let from = rect_port(&self.view().item_rect(source)?, *port);
        Some(orthogonal_path(from.x, from.y, cursor.x, cursor.y, *port))
    }

    /// The box-select rectangle while selecting.
    pub fn selection_box(&self) -> Option<Rect> {
        match self.gesture {
            Gesture::BoxSelecting { start, current } => Some(Rect::from_corners(start, current)),
            _ => None,
        }
    }

    // --- Internals ---

    fn select(&mut self, id: &str, additive: bool, actions: &mut Vec<Action>) {
        if additive {
            if let Some(i) = self.selection.iter().position(|s| s == id) {
                self.selection.remove(i);
            } else {
                self.selection.push(id.to_string());
            }
        } else if self.selection.len() == 1 && self.selection[0] == id {
            return;
        } else {
            self.selection = vec![id.to_string()];
        }
        actions.push(Action::SelectionChanged(self.selection.clone()));
    }

    fn begin_draft(&mut self) {
        self.draft = Some(Draft {
            before: self.map.clone(),
            working: self.map.clone(),
        });
    }

    fn with_working(&mut self, f: impl FnOnce(&mut MapViewData)) {
        if let Some(draft) = self.draft.as_mut() {
            f(&mut draft.working);
        }
    }

    fn commit_draft(&mut self, dragged: Option<DragTarget>) -> Vec<Action> {
        let Some(draft) = self.draft.take() else {
            return Vec::new();
        };
        let mut ins = diff_snapshots(&draft.before, &draft.working);

        if let Some(reparent) = dragged.and_then(|t| reparent_for(&draft.working, &t)) {
            // Carry the new parent on the dragged item's own update so the
            // destination, not the old container, grows around it.
            if let Instruction::Reparent {
                target_id,
                new_parent_id,
            } = &reparent
            {
                for i in ins.iter_mut() {
                    if let Instruction::UpdateState { target_id: t, changes } = i {
                        if t == target_id {
                            changes.parent_id = Some(new_parent_id.clone());
                        }
                    }
                }
            }
            ins.push(reparent);
        }

        if ins.is_empty() {
            return vec![Action::RenderNeeded];
        }
        self.commit(ins)
    }

    fn commit(&mut self, ins: Vec<Instruction>) -> Vec<Action> {
        self.map = apply(&self.map, &ins);
        vec![Action::Commit(ins), Action::RenderNeeded]
    }
}

/// Path for an edge between the ports implied by its direction.
pub fn edge_path(map: &MapViewData, edge: &MapEdge) -> Option<PathShape> {
    let from = rect_port(&map.item_rect(&edge.source)?, edge.direction);
    let to = rect_port(&map.item_rect(&edge.target)?, edge.direction.opposite());
    Some(orthogonal_path(from.x, from.y, to.x, to.y, edge.direction))
}

/// One UPDATE_STATE per spot or scope whose geometry differs between the two
/// snapshots. Scopes come first, outermost first, then spots, so expansion
/// runs against containers that are already in their final place.
pub fn diff_snapshots(before: &MapViewData, after: &MapViewData) -> Vec<Instruction> {
    let mut scopes: Vec<(usize, Instruction)> = after
        .scopes
        .iter()
        .filter_map(|scope| {
            let old = before.scope(&scope.id)?.rect();
            let new = scope.rect();
            if old == new {
                return None;
            }
            let changes = if old.w == new.w && old.h == new.h {
                Changes::position(new.x, new.y)
            } else {
                Changes::geometry(new.x, new.y, new.w, new.h)
            };
            Some((depth(after, &scope.id), Instruction::update(scope.id.clone(), changes)))
        })
        .collect();
    scopes.sort_by_key(|(d, _)| *d);

    let nodes = after.nodes.iter().filter_map(|node| {
        let old = before.node(&node.id)?;
        (old.x != node.x || old.y != node.y)
            .then(|| Instruction::update(node.id.clone(), Changes::position(node.x, node.y)))
    });

    scopes.into_iter().map(|(_, ins)| ins).chain(nodes).collect()
}

/// REPARENT for a dropped item that now sits in a different container.
///
/// Spots go to the topmost REGION containing their center; REGION scopes to
/// the topmost WORLD fully containing them. The current container wins when
/// it still qualifies. WORLD scopes never reparent.
pub fn reparent_for(map: &MapViewData, target: &DragTarget) -> Option<Instruction> {
    let (id, current, found) = match target {
        DragTarget::Node(id) => {
            let node = map.node(id)?;
            let center = node.rect().center();
            let fits = |s: &&crate::Scope| s.layer == ScopeLayer::Region && s.rect().contains_point(center);
            let current = node.parent_id.as_deref();
            if current.and_then(|p| map.scope(p)).filter(fits).is_some() {
                return None;
            }
            (id, current, map.scopes.iter().rev().find(fits)?)
        }
        DragTarget::Scope(id) => {
            let scope = map.scope(id)?;
            if scope.layer != ScopeLayer::Region {
                return None;
            }
            let rect = scope.rect();
            let fits = |s: &&crate::Scope| {
                s.layer == ScopeLayer::World && s.id != *id && s.rect().contains_rect(&rect)
            };
            let current = scope.parent_id.as_deref();
            if current.and_then(|p| map.scope(p)).filter(fits).is_some() {
                return None;
            }
            (id, current, map.scopes.iter().rev().find(fits)?)
        }
    };
    if current == Some(found.id.as_str()) {
        return None;
    }
    Some(Instruction::reparent(id.clone(), Some(found.id.clone())))
}

fn delete_edge(source: &str, target: &str) -> Instruction {
    Instruction::DeleteElement {
        element_type: ElementKind::Edge,
        id: crate::make_edge_id(source, target),
        source: Some(source.to_string()),
        target: Some(target.to_string()),
    }
}

fn move_node(map: &mut MapViewData, id: &str, dx: f64, dy: f64) {
    if let Some(node) = map.nodes.iter_mut().find(|n| n.id == id) {
        node.x += dx;
        node.y += dy;
    }
}

/// Move a scope together with every spot and scope nested under it.
fn translate_subtree(map: &mut MapViewData, root: &str, dx: f64, dy: f64) {
    let mut stack = vec![root.to_string()];
    let mut seen = HashSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        for scope in map.scopes.iter_mut() {
            if scope.id == id {
                scope.x += dx;
                scope.y += dy;
            } else if scope.parent_id.as_deref() == Some(id.as_str()) {
                stack.push(scope.id.clone());
            }
        }
        for node in map.nodes.iter_mut() {
            if node.parent_id.as_deref() == Some(id.as_str()) {
                node.x += dx;
                node.y += dy;
            }
        }
    }
}

/// Soft repulsion: siblings of the same layer and parent that overlap the
/// dragged scope move out along the shallower axis by a share of the overlap.
fn push_apart(map: &mut MapViewData, id: &str) {
    let Some(dragged) = map.scope(id).cloned() else {
        return;
    };
    let rect = dragged.rect();
    let pushes: Vec<(String, f64, f64)> = map
        .scopes
        .iter()
        .filter(|s| s.id != id && s.layer == dragged.layer && s.parent_id == dragged.parent_id)
        .filter_map(|s| {
            let other = s.rect();
            let (ox, oy) = rect.overlap(&other);
            if ox <= 0.0 || oy <= 0.0 {
                return None;
            }
            let (c, o) = (rect.center(), other.center());
            if ox < oy {
                let sign = if o.x >= c.x { 1.0 } else { -1.0 };
                Some((s.id.clone(), sign * ox * PUSH_STRENGTH, 0.0))
            } else {
                let sign = if o.y >= c.y { 1.0 } else { -1.0 };
                Some((s.id.clone(), 0.0, sign * oy * PUSH_STRENGTH))
            }
        })
        .collect();
    for (sibling, dx, dy) in pushes {
        translate_subtree(map, &sibling, dx, dy);
    }
}

/// Nesting depth of a scope, with a cycle guard.
fn depth(map: &MapViewData, id: &str) -> usize {
    let mut seen = HashSet::new();
    let mut current = map.scope(id).and_then(|s| s.parent_id.as_deref());
    let mut d = 0;
    while let Some(p) = current {
        if !seen.insert(p) {
            break;
        }
        d += 1;
        current = map.scope(p).and_then(|s| s.parent_id.as_deref());
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MapNode, Scope};

    // World W holds regions A and B side by side; n1 in A, n2 in B.
    fn fixture() -> MapViewData {
        let w = Scope::new("W", ScopeLayer::World, Rect::new(0.0, 0.0, 1000.0, 600.0));
        let mut a = Scope::new("A", ScopeLayer::Region, Rect::new(40.0, 80.0, 300.0, 200.0));
        a.parent_id = Some("W".into());
        let mut b = Scope::new("B", ScopeLayer::Region, Rect::new(500.0, 80.0, 300.0, 200.0));
        b.parent_id = Some("W".into());
        let mut n1 = MapNode::new("n1", 100.0, 150.0);
        n1.parent_id = Some("A".into());
        let mut n2 = MapNode::new("n2", 560.0, 150.0);
        n2.parent_id = Some("B".into());
        MapViewData {
            scopes: vec![w, a, b],
            nodes: vec![n1, n2],
            ..Default::default()
        }
    }

    fn p(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    fn committed(actions: &[Action]) -> Vec<Instruction> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Commit(ins) => Some(ins.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn drag(c: &mut CanvasController, from: Point, to: Point) -> Vec<Action> {
        c.on_pointer_down(from, Button::Primary, Modifiers::default());
        c.on_pointer_move(to);
        c.on_pointer_up(to)
    }

    #[test]
    fn camera_round_trips_and_zooms_about_cursor() {
        let mut cam = Camera {
            pan_x: 30.0,
            pan_y: -10.0,
            zoom: 2.0,
        };
        let world = p(12.0, 7.0);
        assert_eq!(cam.screen_to_world(cam.world_to_screen(world)), world);

        let cursor = p(200.0, 100.0);
        let before = cam.screen_to_world(cursor);
        cam.zoom_at(cursor, 1.5);
        let after = cam.screen_to_world(cursor);
        assert!(before.distance(after) < 1e-9);
        cam.zoom_at(cursor, 100.0);
        assert_eq!(cam.zoom, ZOOM_MAX);
    }

    #[test]
    fn hit_priority() {
        let c = CanvasController::new(fixture());
        assert_eq!(c.hit_test(p(150.0, 170.0)), Hit::Node("n1".into()));
        // n1 centre is (170, 180); its UP port sits above the body.
        assert_eq!(
            c.hit_test(p(170.0, 127.0)),
            Hit::Port {
                id: "n1".into(),
                port: Direction::Up
            }
        );
        assert_eq!(c.hit_test(p(338.0, 279.0)), Hit::ScopeResize("A".into()));
        assert_eq!(c.hit_test(p(60.0, 250.0)), Hit::Scope("A".into()));
        assert_eq!(c.hit_test(p(450.0, 400.0)), Hit::Scope("W".into()));
        assert_eq!(c.hit_test(p(2000.0, 2000.0)), Hit::Empty);
    }

    #[test]
    fn short_press_is_a_click_not_a_drag() {
        let mut c = CanvasController::new(fixture());
        let down = c.on_pointer_down(p(150.0, 170.0), Button::Primary, Modifiers::default());
        assert!(down.contains(&Action::SelectionChanged(vec!["n1".into()])));
        c.on_pointer_move(p(152.0, 171.0));
        assert!(matches!(c.gesture(), Gesture::PotentialDrag { .. }));
        let up = c.on_pointer_up(p(152.0, 171.0));
        assert!(committed(&up).is_empty());
        assert_eq!(c.committed(), &fixture());
    }

    #[test]
    fn dropping_a_spot_in_another_region_reparents_it() {
        let mut c = CanvasController::new(fixture());
        let up = drag(&mut c, p(150.0, 170.0), p(600.0, 190.0));
        let ins = committed(&up);
        assert_eq!(
            ins,
            vec![
                Instruction::update(
                    "n1",
                    Changes {
                        x: Some(550.0),
                        y: Some(170.0),
                        parent_id: Some(Some("B".into())),
                        ..Default::default()
                    }
                ),
                Instruction::reparent("n1", Some("B".into())),
            ]
        );
        let n1 = c.committed().node("n1").unwrap();
        assert_eq!(n1.parent_id.as_deref(), Some("B"));
        assert_eq!(c.committed().scope("A").unwrap().rect(), Rect::new(40.0, 80.0, 300.0, 200.0));
    }

    #[test]
    fn moving_within_the_same_region_does_not_reparent() {
        let mut c = CanvasController::new(fixture());
        let ins = committed(&drag(&mut c, p(150.0, 170.0), p(170.0, 180.0)));
        assert_eq!(ins.len(), 1);
        assert_eq!(ins[0].op_code(), "UPDATE_STATE");
    }

    #[test]
    fn dragging_a_scope_carries_its_children() {
        let mut c = CanvasController::new(fixture());
        let ins = committed(&drag(&mut c, p(60.0, 250.0), p(60.0, 300.0)));
        assert!(ins.contains(&Instruction::update("A", Changes::position(40.0, 130.0))));
        assert!(ins.contains(&Instruction::update("n1", Changes::position(100.0, 200.0))));
        // Scope updates precede spot updates.
        assert_eq!(ins[0], Instruction::update("A", Changes::position(40.0, 130.0)));
    }

    #[test]
    fn overlapping_siblings_are_pushed_away() {
        let mut c = CanvasController::new(fixture());
        // Drag A 300 to the right so it overlaps B by 140 horizontally.
        c.on_pointer_down(p(60.0, 250.0), Button::Primary, Modifiers::default());
        c.on_pointer_move(p(360.0, 250.0));
        let a = c.view().scope("A").unwrap().rect();
        let b = c.view().scope("B").unwrap().rect();
        assert_eq!(a.x, 340.0);
        assert!(b.x > 500.0);
        // B's spot moved with it.
        assert_eq!(c.view().node("n2").unwrap().x - 560.0, b.x - 500.0);
        let ins = committed(&c.on_pointer_up(p(360.0, 250.0)));
        assert!(ins.iter().any(|i| matches!(i, Instruction::UpdateState { target_id, .. } if target_id == "B")));
    }

    #[test]
    fn resize_emits_geometry() {
        let mut c = CanvasController::new(fixture());
        let ins = committed(&drag(&mut c, p(340.0, 280.0), p(400.0, 300.0)));
        assert_eq!(
            ins,
            vec![Instruction::update("A", Changes::geometry(40.0, 80.0, 360.0, 220.0))]
        );
    }

    #[test]
    fn resize_is_clamped_to_a_spot_footprint() {
        let mut c = CanvasController::new(fixture());
        c.on_pointer_down(p(340.0, 280.0), Button::Primary, Modifiers::default());
        c.on_pointer_move(p(-500.0, -500.0));
        let a = c.view().scope("A").unwrap().rect();
        assert_eq!((a.w, a.h), (NODE_WIDTH, NODE_HEIGHT));
    }

    #[test]
    fn connecting_from_a_port_builds_a_path() {
        let mut c = CanvasController::new(fixture());
        // n1 east port at (240, 180) lies on the body edge, so use n1's UP port.
        c.on_pointer_down(p(170.0, 126.0), Button::Primary, Modifiers::default());
        assert!(matches!(c.gesture(), Gesture::Connecting { .. }));
        c.on_pointer_move(p(600.0, 170.0));
        assert!(c.connection_preview().is_some());
        let ins = committed(&c.on_pointer_up(p(600.0, 170.0)));
        assert_eq!(
            ins,
            vec![Instruction::BuildPath(PathSpec {
                source: "n1".into(),
                target: "n2".into(),
                direction: Some(Direction::Up),
                ..Default::default()
            })]
        );
        assert!(c.committed().edge("n1", "n2").is_some());
    }

    #[test]
    fn connecting_to_nothing_or_self_is_dropped() {
        let mut c = CanvasController::new(fixture());
        c.on_pointer_down(p(170.0, 126.0), Button::Primary, Modifiers::default());
        assert!(committed(&c.on_pointer_up(p(150.0, 170.0))).is_empty());
        c.on_pointer_down(p(170.0, 126.0), Button::Primary, Modifiers::default());
        assert!(committed(&c.on_pointer_up(p(5000.0, 5000.0))).is_empty());
    }

    #[test]
    fn escape_discards_the_draft() {
        let mut c = CanvasController::new(fixture());
        c.on_pointer_down(p(150.0, 170.0), Button::Primary, Modifiers::default());
        c.on_pointer_move(p(600.0, 190.0));
        assert_ne!(c.view(), c.committed());
        c.on_key_down("Escape");
        assert_eq!(c.view(), c.committed());
        assert!(committed(&c.on_pointer_up(p(600.0, 190.0))).is_empty());
        assert_eq!(c.committed(), &fixture());
    }

    #[test]
    fn box_select_uses_aabb() {
        let mut c = CanvasController::new(fixture());
        let shift = Modifiers {
            shift: true,
            ..Default::default()
        };
        c.on_pointer_down(p(2000.0, 2000.0), Button::Primary, shift);
        c.on_pointer_move(p(200.0, 200.0));
        assert!(c.selection_box().is_some());
        c.on_pointer_up(p(200.0, 200.0));
        assert_eq!(c.selection().to_vec(), vec!["n1".to_string(), "n2".to_string()]);
    }

    #[test]
    fn delete_key_removes_selection() {
        let mut c = CanvasController::new(fixture());
        c.on_pointer_down(p(150.0, 170.0), Button::Primary, Modifiers::default());
        c.on_pointer_up(p(150.0, 170.0));
        let ins = committed(&c.on_key_down("Delete"));
        assert_eq!(ins, vec![Instruction::delete(ElementKind::Node, "n1")]);
        assert!(c.committed().node("n1").is_none());
        assert!(c.selection().is_empty());
    }

    #[test]
    fn context_actions() {
        let mut map = fixture();
        map.edges.push(MapEdge::new("n1", "n2"));
        let mut c = CanvasController::new(map);

        let ins = committed(&c.context_action(&ContextTarget::Node("n1".into()), ContextAction::ToggleFuzzy));
        assert_eq!(ins.len(), 1);
        assert!(c.committed().node("n1").unwrap().is_fuzzy);

        let actions = c.context_action(&ContextTarget::Scope("B".into()), ContextAction::SetFocus);
        assert!(actions.contains(&Action::FocusChanged(Some("B".into()))));
        assert_eq!(c.committed().focus_id.as_deref(), Some("B"));

        c.context_action(&ContextTarget::Node("n2".into()), ContextAction::Disconnect);
        assert!(c.committed().edges.is_empty());
        assert!(c.committed().node("n2").is_some());
    }

    #[test]
    fn load_during_drag_keeps_remote_changes() {
        let mut c = CanvasController::new(fixture());
        c.on_pointer_down(p(150.0, 170.0), Button::Primary, Modifiers::default());
        c.on_pointer_move(p(170.0, 180.0));

        let mut remote = fixture();
        remote.nodes.push(MapNode::new("n3", 700.0, 400.0));
        c.load(remote);

        c.on_pointer_up(p(170.0, 180.0));
        let map = c.committed();
        assert!(map.node("n3").is_some());
        assert_eq!(map.node("n1").unwrap().x, 120.0);
    }

    #[test]
    fn edge_paths_follow_direction_ports() {
        let map = fixture();
        let mut e = MapEdge::new("n1", "n2");
        e.direction = Direction::E;
        let path = edge_path(&map, &e).unwrap();
        let pts = path.points();
        assert_eq!(pts[0], Point::new(240.0, 180.0));
        assert_eq!(*pts.last().unwrap(), Point::new(560.0, 180.0));
    }
}
