//! Deterministic grid auto-layout.
//!
//! Spots are placed on a coarse grid by breadth-first traversal of each
//! connected component, stepping along edge directions. Scopes are then
//! re-fitted bottom-up around their (new) children. The result is a list of
//! UPDATE_STATE instructions; nothing is mutated here.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::geometry::Rect;
use crate::{Changes, Direction, Instruction, MapEdge, MapNode, Scope, NODE_HEIGHT, NODE_WIDTH};

/// One grid cell: node footprint plus room for connectors.
pub const CELL_WIDTH: f64 = 280.0;
pub const CELL_HEIGHT: f64 = 200.0;
/// Padding between a scope's children and its fitted border.
pub const SCOPE_PADDING: f64 = 60.0;
/// Extra room above the children for the scope header.
pub const SCOPE_HEADER: f64 = 40.0;
/// How far the spiral search looks before the emergency fallback.
pub const SPIRAL_RADIUS: i64 = 20;
/// Column step between component roots.
pub const ROOT_STEP: i64 = 2;

const EPSILON: f64 = 1e-6;

type Cell = (i64, i64);

fn cell_of(gx: f64, gy: f64) -> Cell {
    (gx.round() as i64, gy.round() as i64)
}

/// Unit step along one axis; zero stays zero (`f64::signum` maps 0.0 to 1.0).
fn step(d: f64) -> i64 {
    if d > 0.0 {
        1
    } else if d < 0.0 {
        -1
    } else {
        0
    }
}

impl Direction {
    /// Grid step taken when following an edge in this direction.
    ///
    /// UP/DOWN use a half diagonal so vertical links stay distinguishable on
    /// the flat grid. Unknown directions continue eastward.
    pub fn grid_offset(&self) -> (f64, f64) {
        match self {
            Direction::N => (0.0, -1.0),
            Direction::S => (0.0, 1.0),
            Direction::E | Direction::Unknown => (1.0, 0.0),
            Direction::W => (-1.0, 0.0),
            Direction::NE => (1.0, -1.0),
            Direction::NW => (-1.0, -1.0),
            Direction::SE => (1.0, 1.0),
            Direction::SW => (-1.0, 1.0),
            Direction::Up => (0.5, -0.5),
            Direction::Down => (-0.5, 0.5),
        }
    }
}

/// Compute a non-overlapping placement for every spot and re-fit every scope.
///
/// Emits one UPDATE_STATE per spot whose position changes and one per scope
/// whose rectangle changes. Identical input always yields identical output.
pub fn compute_layout(nodes: &[MapNode], scopes: &[Scope], edges: &[MapEdge]) -> Vec<Instruction> {
    let positions = place_nodes(nodes, edges);

    let mut out = Vec::new();
    for (node, &(gx, gy)) in nodes.iter().zip(&positions) {
        let x = gx * CELL_WIDTH;
        let y = gy * CELL_HEIGHT;
        if (node.x - x).abs() > EPSILON || (node.y - y).abs() > EPSILON {
            out.push(Instruction::update(node.id.clone(), Changes::position(x, y)));
        }
    }

    let node_rects: HashMap<&str, Rect> = nodes
        .iter()
        .zip(&positions)
        .map(|(n, &(gx, gy))| {
            (
                n.id.as_str(),
                Rect::new(gx * CELL_WIDTH, gy * CELL_HEIGHT, NODE_WIDTH, NODE_HEIGHT),
            )
        })
        .collect();
    let fitted = ScopeFitter::new(nodes, scopes, node_rects).fit_all();
    for (scope, rect) in scopes.iter().zip(&fitted) {
        if scope.rect() != *rect {
            out.push(Instruction::update(
                scope.id.clone(),
                Changes::geometry(rect.x, rect.y, rect.w, rect.h),
            ));
        }
    }

    debug!(updates = out.len(), "computed layout");
    out
}

/// Grid coordinate of every node, in input order.
pub fn place_nodes(nodes: &[MapNode], edges: &[MapEdge]) -> Vec<(f64, f64)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, n) in nodes.iter().enumerate() {
        index.entry(n.id.as_str()).or_insert(i);
    }

    let mut adjacency: Vec<Vec<(usize, (f64, f64))>> = vec![Vec::new(); nodes.len()];
    for edge in edges {
        let (Some(&s), Some(&t)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str()))
        else {
            continue;
        };
        if s == t {
            continue;
        }
        adjacency[s].push((t, edge.direction.grid_offset()));
        adjacency[t].push((s, edge.direction.opposite().grid_offset()));
    }

    let mut grid = Grid::default();
    let mut placed: Vec<Option<(f64, f64)>> = vec![None; nodes.len()];
    let mut queued = vec![false; nodes.len()];

    for start in 0..nodes.len() {
        if queued[start] {
            continue;
        }
        let mut root_x = 0;
        while grid.is_occupied((root_x, 0)) {
            root_x += ROOT_STEP;
        }

        let mut queue = VecDeque::new();
        queue.push_back((start, root_x as f64, 0.0, None));
        queued[start] = true;

        while let Some((i, gx, gy, arrival)) = queue.pop_front() {
            if placed[i].is_some() {
                continue;
            }
            let (fx, fy) = grid.find_free_spot(gx, gy, arrival);
            grid.occupy(cell_of(fx, fy));
            placed[i] = Some((fx, fy));

            for &(j, (ox, oy)) in &adjacency[i] {
                if !queued[j] {
                    queued[j] = true;
                    queue.push_back((j, fx + ox, fy + oy, Some((ox, oy))));
                }
            }
        }
    }

    placed.into_iter().map(|p| p.unwrap_or((0.0, 0.0))).collect()
}

#[derive(Default)]
struct Grid {
    occupied: HashSet<Cell>,
}

impl Grid {
    fn is_occupied(&self, cell: Cell) -> bool {
        self.occupied.contains(&cell)
    }

    fn occupy(&mut self, cell: Cell) {
        self.occupied.insert(cell);
    }

    /// Resolve a wanted grid position to a free one.
    ///
    /// Order: the wanted cell, the two cells lateral to the arrival
    /// direction, a square spiral out to [`SPIRAL_RADIUS`], then straight
    /// down past the spiral until something is free.
    fn find_free_spot(&self, gx: f64, gy: f64, arrival: Option<(f64, f64)>) -> (f64, f64) {
        let wanted = cell_of(gx, gy);
        if !self.is_occupied(wanted) {
            return (gx, gy);
        }

        if let Some((dx, dy)) = arrival {
            let (sx, sy) = (step(dx), step(dy));
            if sx != 0 || sy != 0 {
                for lateral in [(wanted.0 - sy, wanted.1 + sx), (wanted.0 + sy, wanted.1 - sx)] {
                    if !self.is_occupied(lateral) {
                        return (lateral.0 as f64, lateral.1 as f64);
                    }
                }
            }
        }

        for r in 1..=SPIRAL_RADIUS {
            if let Some(c) = ring(wanted, r).into_iter().find(|c| !self.is_occupied(*c)) {
                return (c.0 as f64, c.1 as f64);
            }
        }

        let mut k = SPIRAL_RADIUS + 1;
        loop {
            let c = (wanted.0, wanted.1 + k);
            if !self.is_occupied(c) {
                return (c.0 as f64, c.1 as f64);
            }
            k += 1;
        }
    }
}

/// Cells at Chebyshev distance `r` from `center`, clockwise from the top-left corner.
fn ring(center: Cell, r: i64) -> Vec<Cell> {
    let (cx, cy) = center;
    let mut cells = Vec::with_capacity((8 * r) as usize);
    for x in (cx - r)..=(cx + r) {
        cells.push((x, cy - r));
    }
    for y in (cy - r + 1)..=(cy + r) {
        cells.push((cx + r, y));
    }
    for x in ((cx - r)..(cx + r)).rev() {
        cells.push((x, cy + r));
    }
    for y in ((cy - r + 1)..(cy + r)).rev() {
        cells.push((cx - r, y));
    }
    cells
}

/// Bottom-up, memoized bounding boxes for scopes.
struct ScopeFitter<'a> {
    scopes: &'a [Scope],
    node_rects: HashMap<&'a str, Rect>,
    child_nodes: HashMap<&'a str, Vec<&'a str>>,
    child_scopes: HashMap<&'a str, Vec<usize>>,
    memo: HashMap<usize, Rect>,
    in_progress: HashSet<usize>,
}

impl<'a> ScopeFitter<'a> {
    fn new(nodes: &'a [MapNode], scopes: &'a [Scope], node_rects: HashMap<&'a str, Rect>) -> Self {
        let mut child_nodes: HashMap<&str, Vec<&str>> = HashMap::new();
        for n in nodes {
            if let Some(p) = n.parent_id.as_deref() {
                child_nodes.entry(p).or_default().push(n.id.as_str());
            }
        }
        let mut child_scopes: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, s) in scopes.iter().enumerate() {
            if let Some(p) = s.parent_id.as_deref() {
                child_scopes.entry(p).or_default().push(i);
            }
        }
        Self {
            scopes,
            node_rects,
            child_nodes,
            child_scopes,
            memo: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    /// Fitted rectangle for every scope, in input order. Roots go first,
    /// then anything a root walk never reached.
    fn fit_all(mut self) -> Vec<Rect> {
        let ids: HashSet<&str> = self.scopes.iter().map(|s| s.id.as_str()).collect();
        for i in 0..self.scopes.len() {
            let is_root = self.scopes[i]
                .parent_id
                .as_deref()
                .map_or(true, |p| !ids.contains(p));
            if is_root {
                self.fit(i);
            }
        }
        for i in 0..self.scopes.len() {
            self.fit(i);
        }
        (0..self.scopes.len())
            .map(|i| self.memo.get(&i).copied().unwrap_or_else(|| self.scopes[i].rect()))
            .collect()
    }

    fn fit(&mut self, i: usize) -> Rect {
        if let Some(r) = self.memo.get(&i) {
            return *r;
        }
        let scope = &self.scopes[i];
        if !self.in_progress.insert(i) {
            return scope.rect();
        }

        let mut bounds: Option<Rect> = None;
        let id = scope.id.as_str();
        let nodes = self.child_nodes.get(id).cloned().unwrap_or_default();
        for n in nodes {
            if let Some(r) = self.node_rects.get(n).copied() {
                bounds = Some(bounds.map_or(r, |b| b.union(&r)));
            }
        }
        let children = self.child_scopes.get(id).cloned().unwrap_or_default();
        for c in children {
            let r = self.fit(c);
            bounds = Some(bounds.map_or(r, |b| b.union(&r)));
        }

        let rect = match bounds {
            None => scope.rect(),
            Some(b) => Rect::new(
                b.x - SCOPE_PADDING,
                b.y - SCOPE_PADDING - SCOPE_HEADER,
                b.w + SCOPE_PADDING * 2.0,
                b.h + SCOPE_PADDING * 2.0 + SCOPE_HEADER,
            ),
        };
        self.in_progress.remove(&i);
        self.memo.insert(i, rect);
        rect
    }
}
