//! Instruction execution: the single mutation surface for story maps.
//!
//! [`apply`] clones the incoming snapshot and runs each instruction against the
//! copy in order, so every instruction sees the effects of the ones before it.
//! Lookups are find-or-skip: a dangling reference drops that one instruction
//! and the batch carries on.

use serde_json::Value;
use tracing::{debug, info};

use crate::expand::{expand, ITEM_PADDING, HEADER_OFFSET};
use crate::geometry::{Point, Rect};
use crate::instruction::{instruction_list, parse_instructions};
use crate::{
    make_edge_id, next_id, Changes, Direction, ElementKind, Instruction, MapEdge, MapNode,
    MapViewData, PathSpec, PathType, Scope, ScopeLayer, ScopeSpec, SpotSpec,
};

/// Where an unpositioned spot lands before jitter.
pub const DEFAULT_SPOT_POSITION: (f64, f64) = (100.0, 100.0);
/// Jitter range (±) for unpositioned spots, so they don't stack exactly.
pub const SPOT_JITTER: f64 = 30.0;
/// Offset of a new child scope from its parent's corner.
pub const CHILD_SCOPE_OFFSET: (f64, f64) = (ITEM_PADDING, ITEM_PADDING + 20.0);

/// Apply `instructions` to a copy of `snapshot` and return the copy.
pub fn apply(snapshot: &MapViewData, instructions: &[Instruction]) -> MapViewData {
    let mut exec = Executor::new(snapshot.clone());
    for ins in instructions {
        exec.run(ins);
    }
    info!(
        count = instructions.len(),
        nodes = exec.map.nodes.len(),
        scopes = exec.map.scopes.len(),
        edges = exec.map.edges.len(),
        "applied map instructions"
    );
    exec.map
}

/// Apply a raw wire payload. A payload without an instruction list leaves the
/// snapshot unchanged.
pub fn apply_payload(snapshot: &MapViewData, payload: &Value) -> MapViewData {
    if instruction_list(payload).is_none() {
        debug!("payload carries no instruction list");
        return snapshot.clone();
    }
    apply(snapshot, &parse_instructions(payload))
}

/// Deterministic ±[`SPOT_JITTER`] offset for a spot id.
///
/// xorshift64 seeded from an FNV-1a hash of the id: stable across runs,
/// different between ids.
pub fn jitter_for(id: &str) -> (f64, f64) {
    let mut state = id
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        })
        .wrapping_add(1);
    let span = (SPOT_JITTER as u64) * 2 + 1;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % span) as f64 - SPOT_JITTER
    };
    let dx = next();
    let dy = next();
    (dx, dy)
}

struct Executor {
    map: MapViewData,
}

impl Executor {
    fn new(mut map: MapViewData) -> Self {
        for edge in &mut map.edges {
            if edge.id.is_empty() {
                edge.id = make_edge_id(&edge.source, &edge.target);
            }
        }
        Self { map }
    }

    fn run(&mut self, ins: &Instruction) {
        match ins {
            Instruction::CreateScope(spec) => self.create_scope(spec),
            Instruction::CreateSpot(spec) => self.create_spot(spec),
            Instruction::BuildPath(spec) => self.build_path(spec),
            Instruction::UpdateState { target_id, changes } => self.update_state(target_id, changes),
            Instruction::RenameId { old_id, new_id } => self.rename(old_id, new_id),
            Instruction::DeleteElement {
                element_type,
                id,
                source,
                target,
            } => self.delete(*element_type, id, source.as_deref(), target.as_deref()),
            Instruction::Reparent {
                target_id,
                new_parent_id,
            } => self.reparent(target_id, new_parent_id.as_deref()),
        }
    }

    fn grow(&mut self, parent_id: &str, item: Rect) {
        let grown = expand(parent_id, item, &mut self.map.scopes);
        if !grown.is_empty() {
            debug!(?grown, "expanded containers");
        }
    }

    fn create_scope(&mut self, spec: &ScopeSpec) {
        let id = spec
            .id
            .clone()
            .unwrap_or_else(|| next_id(&self.map, "scope"));

        if let Some(scope) = self.map.scopes.iter_mut().find(|s| s.id == id) {
            if let Some(label) = &spec.label {
                scope.label = label.clone();
            }
            if let Some(layer) = spec.layer {
                scope.layer = layer;
            }
            if let Some(parent) = &spec.parent_id {
                scope.parent_id = Some(parent.clone());
            }
            if let Some(desc) = &spec.desc {
                scope.desc = Some(desc.clone());
            }
            let mut moved = false;
            for (field, value) in [
                (&mut scope.x, spec.x),
                (&mut scope.y, spec.y),
                (&mut scope.w, spec.w),
                (&mut scope.h, spec.h),
            ] {
                if let Some(v) = value {
                    moved |= *field != v;
                    *field = v;
                }
            }
            let rect = scope.rect();
            let parent = scope.parent_id.clone();
            if moved || spec.parent_id.is_some() {
                if let Some(parent) = parent {
                    self.grow(&parent, rect);
                }
            }
            return;
        }

        let layer = spec.layer.unwrap_or_default();
        let (dw, dh) = layer.default_size();
        let parent = spec
            .parent_id
            .as_deref()
            .and_then(|p| self.map.scope(p))
            .map(|p| (p.id.clone(), p.x, p.y));
        let (px, py) = parent
            .as_ref()
            .map(|(_, x, y)| (x + CHILD_SCOPE_OFFSET.0, y + CHILD_SCOPE_OFFSET.1))
            .unwrap_or((0.0, 0.0));

        let rect = Rect::new(
            spec.x.unwrap_or(px),
            spec.y.unwrap_or(py),
            spec.w.unwrap_or(dw),
            spec.h.unwrap_or(dh),
        );
        let mut scope = Scope::new(id, layer, rect);
        if let Some(label) = &spec.label {
            scope.label = label.clone();
        }
        scope.parent_id = spec.parent_id.clone();
        scope.desc = spec.desc.clone();
        self.map.scopes.push(scope);

        if let Some((parent_id, _, _)) = parent {
            self.grow(&parent_id, rect);
        }
    }

    fn create_spot(&mut self, spec: &SpotSpec) {
        let id = spec
            .id
            .clone()
            .unwrap_or_else(|| next_id(&self.map, "spot"));

        if let Some(node) = self.map.nodes.iter_mut().find(|n| n.id == id) {
            if let Some(label) = &spec.label {
                node.label = label.clone();
            }
            if let Some(t) = spec.node_type {
                node.node_type = t;
            }
            if let Some(fuzzy) = spec.is_fuzzy {
                node.is_fuzzy = fuzzy;
            }
            if let Some(desc) = &spec.desc {
                node.desc = Some(desc.clone());
            }
            if let Some(status) = &spec.status {
                node.status = Some(status.clone());
            }
            if let Some(parent) = &spec.parent_id {
                node.parent_id = Some(parent.clone());
            }
            let mut moved = false;
            if let Some(x) = spec.x {
                moved |= node.x != x;
                node.x = x;
            }
            if let Some(y) = spec.y {
                moved |= node.y != y;
                node.y = y;
            }
            let rect = node.rect();
            if let (true, Some(parent)) = (moved || spec.parent_id.is_some(), node.parent_id.clone()) {
                self.grow(&parent, rect);
            }
            return;
        }

        let (jx, jy) = if spec.x.is_none() || spec.y.is_none() {
            jitter_for(&id)
        } else {
            (0.0, 0.0)
        };
        let x = spec.x.unwrap_or(DEFAULT_SPOT_POSITION.0 + jx);
        let y = spec.y.unwrap_or(DEFAULT_SPOT_POSITION.1 + jy);

        let mut node = MapNode::new(id, x, y);
        if let Some(label) = &spec.label {
            node.label = label.clone();
        }
        node.node_type = spec.node_type.unwrap_or_default();
        node.is_fuzzy = spec.is_fuzzy.unwrap_or(false);
        node.desc = spec.desc.clone();
        node.status = spec.status.clone();

        let parent = match &spec.parent_id {
            Some(parent) => parent.clone(),
            None => self.containing_region(Point::new(x, y)).unwrap_or_else(|| {
                let label = node.label.clone();
                self.synthesize_region(x, y, &label)
            }),
        };
        node.parent_id = Some(parent.clone());
        let rect = node.rect();
        self.map.nodes.push(node);
        self.grow(&parent, rect);
    }

    /// First REGION scope whose rectangle contains `p`.
    fn containing_region(&self, p: Point) -> Option<String> {
        self.map
            .scopes
            .iter()
            .find(|s| s.layer == ScopeLayer::Region && s.rect().contains_point(p))
            .map(|s| s.id.clone())
    }

    /// Create a WORLD + REGION pair around a spot placed at `(x, y)` and
    /// return the region id.
    fn synthesize_region(&mut self, x: f64, y: f64, near: &str) -> String {
        let (rw, rh) = ScopeLayer::Region.default_size();
        let region_rect = Rect::new(
            x - ITEM_PADDING - 20.0,
            y - ITEM_PADDING - HEADER_OFFSET - 20.0,
            rw,
            rh,
        );
        let (ww, wh) = ScopeLayer::World.default_size();
        let world_rect = Rect::new(
            region_rect.x - ITEM_PADDING,
            region_rect.y - ITEM_PADDING - HEADER_OFFSET,
            ww,
            wh,
        );

        let world_id = next_id(&self.map, "world");
        let mut world = Scope::new(world_id.clone(), ScopeLayer::World, world_rect);
        world.label = "Uncharted World".to_string();
        self.map.scopes.push(world);

        let region_id = next_id(&self.map, "region");
        let mut region = Scope::new(region_id.clone(), ScopeLayer::Region, region_rect);
        region.label = format!("Around {}", near);
        region.parent_id = Some(world_id);
        self.map.scopes.push(region);

        debug!(region = %region_id, "synthesized region for uncontained spot");
        region_id
    }

    fn build_path(&mut self, spec: &PathSpec) {
        if !self.map.contains_id(&spec.source) || !self.map.contains_id(&spec.target) {
            debug!(source = %spec.source, target = %spec.target, "path endpoint not found");
            return;
        }
        if let Some(edge) = self
            .map
            .edges
            .iter_mut()
            .find(|e| e.source == spec.source && e.target == spec.target)
        {
            if let Some(label) = &spec.label {
                edge.label = Some(label.clone());
            }
            if let Some(direction) = spec.direction {
                edge.direction = direction;
            }
            return;
        }

        let mut edge = MapEdge::new(spec.source.clone(), spec.target.clone());
        edge.direction = spec.direction.unwrap_or(Direction::Unknown);
        edge.path_type = spec.path_type.unwrap_or(PathType::Road);
        edge.is_fuzzy = spec.is_fuzzy.unwrap_or(false);
        edge.label = spec.label.clone();
        self.map.edges.push(edge);
    }

    fn update_state(&mut self, target_id: &str, changes: &Changes) {
        let reparented = matches!(changes.parent_id, Some(Some(_)));
        if let Some(node) = self.map.nodes.iter_mut().find(|n| n.id == target_id) {
            let before = (node.x, node.y);
            apply_node_changes(node, changes);
            let moved = before != (node.x, node.y) || reparented;
            let rect = node.rect();
            if let (true, Some(parent)) = (moved, node.parent_id.clone()) {
                self.grow(&parent, rect);
            }
            return;
        }
        if let Some(scope) = self.map.scopes.iter_mut().find(|s| s.id == target_id) {
            let before = scope.rect();
            apply_scope_changes(scope, changes);
            let rect = scope.rect();
            if let (true, Some(parent)) = (before != rect || reparented, scope.parent_id.clone()) {
                self.grow(&parent, rect);
            }
            return;
        }
        debug!(target = %target_id, "UPDATE_STATE target not found");
    }

    fn rename(&mut self, old_id: &str, new_id: &str) {
        if old_id.is_empty() || new_id.is_empty() || old_id == new_id {
            return;
        }
        if self.map.contains_id(new_id) {
            debug!(old = %old_id, new = %new_id, "RENAME_ID target id already taken");
            return;
        }
        let swap = |slot: &mut String| {
            if slot == old_id {
                *slot = new_id.to_string();
            }
        };
        let swap_opt = |slot: &mut Option<String>| {
            if slot.as_deref() == Some(old_id) {
                *slot = Some(new_id.to_string());
            }
        };

        for node in &mut self.map.nodes {
            swap(&mut node.id);
            swap_opt(&mut node.parent_id);
        }
        for scope in &mut self.map.scopes {
            swap(&mut scope.id);
            swap_opt(&mut scope.parent_id);
        }
        for edge in &mut self.map.edges {
            let touched = edge.source == old_id || edge.target == old_id;
            swap(&mut edge.source);
            swap(&mut edge.target);
            if touched {
                edge.id = make_edge_id(&edge.source, &edge.target);
            }
        }
        swap_opt(&mut self.map.focus_id);
    }

    fn delete(&mut self, kind: ElementKind, id: &str, source: Option<&str>, target: Option<&str>) {
        match kind {
            ElementKind::Node => {
                let before = self.map.nodes.len();
                self.map.nodes.retain(|n| n.id != id);
                if self.map.nodes.len() == before {
                    debug!(id, "DELETE_ELEMENT node not found");
                    return;
                }
                self.map.edges.retain(|e| e.source != id && e.target != id);
                self.clear_focus(id);
            }
            ElementKind::Edge => match find_edge(&self.map.edges, id, source, target) {
                Some(index) => {
                    self.map.edges.remove(index);
                }
                None => debug!(id, "DELETE_ELEMENT edge not found"),
            },
            ElementKind::Scope => {
                let before = self.map.scopes.len();
                self.map.scopes.retain(|s| s.id != id);
                if self.map.scopes.len() == before {
                    debug!(id, "DELETE_ELEMENT scope not found");
                    return;
                }
                for node in &mut self.map.nodes {
                    if node.parent_id.as_deref() == Some(id) {
                        node.parent_id = None;
                    }
                }
                for scope in &mut self.map.scopes {
                    if scope.parent_id.as_deref() == Some(id) {
                        scope.parent_id = None;
                    }
                }
                self.clear_focus(id);
            }
        }
    }

    fn clear_focus(&mut self, id: &str) {
        if self.map.focus_id.as_deref() == Some(id) {
            self.map.focus_id = None;
        }
    }

    fn reparent(&mut self, target_id: &str, new_parent_id: Option<&str>) {
        if new_parent_id == Some(target_id) {
            debug!(target = %target_id, "refusing to parent an item to itself");
            return;
        }
        let parent = new_parent_id.map(str::to_string);
        let rect = if let Some(node) = self.map.nodes.iter_mut().find(|n| n.id == target_id) {
            node.parent_id = parent.clone();
            node.rect()
        } else if let Some(scope) = self.map.scopes.iter_mut().find(|s| s.id == target_id) {
            scope.parent_id = parent.clone();
            scope.rect()
        } else {
            debug!(target = %target_id, "REPARENT target not found");
            return;
        };
        if let Some(parent) = parent {
            self.grow(&parent, rect);
        }
    }
}

/// Edge lookup for DELETE_ELEMENT, most specific match first: explicit
/// source/target, exact id, legacy `source-target` string, then source alone.
fn find_edge(edges: &[MapEdge], id: &str, source: Option<&str>, target: Option<&str>) -> Option<usize> {
    if let (Some(s), Some(t)) = (source, target) {
        return edges.iter().position(|e| e.source == s && e.target == t);
    }
    edges
        .iter()
        .position(|e| e.id == id)
        .or_else(|| {
            edges
                .iter()
                .position(|e| format!("{}-{}", e.source, e.target) == id)
        })
        .or_else(|| edges.iter().position(|e| e.source == id))
}

fn apply_node_changes(node: &mut MapNode, changes: &Changes) {
    if let Some(label) = &changes.label {
        node.label = label.clone();
    }
    if let Some(t) = changes.node_type {
        node.node_type = t;
    }
    if let Some(parent) = &changes.parent_id {
        node.parent_id = parent.clone();
    }
    if let Some(x) = changes.x {
        node.x = x;
    }
    if let Some(y) = changes.y {
        node.y = y;
    }
    if let Some(fuzzy) = changes.is_fuzzy {
        node.is_fuzzy = fuzzy;
    }
    if let Some(desc) = &changes.desc {
        node.desc = Some(desc.clone());
    }
    if let Some(status) = &changes.status {
        node.status = Some(status.clone());
    }
}

fn apply_scope_changes(scope: &mut Scope, changes: &Changes) {
    if let Some(label) = &changes.label {
        scope.label = label.clone();
    }
    if let Some(layer) = changes.layer {
        scope.layer = layer;
    }
    if let Some(parent) = &changes.parent_id {
        scope.parent_id = parent.clone();
    }
    if let Some(x) = changes.x {
        scope.x = x;
    }
    if let Some(y) = changes.y {
        scope.y = y;
    }
    if let Some(w) = changes.w {
        scope.w = w;
    }
    if let Some(h) = changes.h {
        scope.h = h;
    }
    if let Some(desc) = &changes.desc {
        scope.desc = Some(desc.clone());
    }
}
