//! Property-based invariant tests for the engine and the layout pass.
//!
//! 1. Spots stay inside their container (with padding) after any sequence of
//!    spot creation, moves and reparenting, and every ancestor of that
//!    container encloses it too, even when the world started out elsewhere.
//! 2. BUILD_PATH never produces two edges for the same (source, target).
//! 3. RENAME_ID leaves no reference to the old id and moves every one of them.
//! 4. compute_layout is deterministic.
//! 5. Laid-out spots never share a grid cell or overlap, and the re-fitted
//!    scopes enclose their children.

use std::collections::HashSet;

use fablemap_core::expand::padded;
use fablemap_core::geometry::Rect;
use fablemap_core::layout::{CELL_HEIGHT, CELL_WIDTH};
use fablemap_core::{
    apply, compute_layout, Changes, Direction, Instruction, MapEdge, MapNode, MapViewData,
    PathSpec, Scope, ScopeLayer, SpotSpec,
};
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────────

const SPOT_IDS: [&str; 5] = ["a", "b", "c", "d", "e"];
const REGION_IDS: [&str; 2] = ["r1", "r2"];

/// Two regions in one world. A stale world sits far away from its regions.
fn base_map(stale_world: bool) -> MapViewData {
    let world_rect = if stale_world {
        Rect::new(5000.0, 5000.0, 600.0, 400.0)
    } else {
        Rect::new(-100.0, -100.0, 1400.0, 600.0)
    };
    let world = Scope::new("w", ScopeLayer::World, world_rect);
    let mut r1 = Scope::new("r1", ScopeLayer::Region, Rect::new(0.0, 0.0, 300.0, 200.0));
    r1.parent_id = Some("w".into());
    let mut r2 = Scope::new("r2", ScopeLayer::Region, Rect::new(800.0, 0.0, 300.0, 200.0));
    r2.parent_id = Some("w".into());
    MapViewData {
        scopes: vec![world, r1, r2],
        ..Default::default()
    }
}

fn coord() -> impl Strategy<Value = f64> {
    (-2000i32..2000).prop_map(f64::from)
}

fn direction_strategy() -> impl Strategy<Value = Direction> {
    prop::sample::select(Direction::PORTS.to_vec())
}

fn containment_op() -> impl Strategy<Value = Instruction> {
    let spot = prop::sample::select(SPOT_IDS.to_vec());
    let region = prop::sample::select(REGION_IDS.to_vec());
    prop_oneof![
        (spot.clone(), coord(), coord(), prop::option::of(region.clone())).prop_map(
            |(id, x, y, parent)| Instruction::CreateSpot(SpotSpec {
                id: Some(id.into()),
                x: Some(x),
                y: Some(y),
                parent_id: parent.map(str::to_string),
                ..Default::default()
            })
        ),
        (spot.clone(), coord(), coord())
            .prop_map(|(id, x, y)| Instruction::update(id, Changes::position(x, y))),
        (spot, region).prop_map(|(id, r)| Instruction::reparent(id, Some(r.to_string()))),
    ]
}

fn path_op() -> impl Strategy<Value = Instruction> {
    let spot = prop::sample::select(SPOT_IDS.to_vec());
    (spot.clone(), spot, prop::option::of(direction_strategy())).prop_map(|(s, t, d)| {
        Instruction::BuildPath(PathSpec {
            source: s.into(),
            target: t.into(),
            direction: d,
            ..Default::default()
        })
    })
}

fn all_spots() -> Vec<Instruction> {
    SPOT_IDS
        .iter()
        .enumerate()
        .map(|(i, id)| {
            Instruction::CreateSpot(SpotSpec {
                id: Some(id.to_string()),
                x: Some(i as f64 * 300.0),
                y: Some(0.0),
                ..Default::default()
            })
        })
        .collect()
}

fn references(map: &MapViewData, id: &str) -> usize {
    let nodes = map
        .nodes
        .iter()
        .map(|n| usize::from(n.id == id) + usize::from(n.parent_id.as_deref() == Some(id)))
        .sum::<usize>();
    let scopes = map
        .scopes
        .iter()
        .map(|s| usize::from(s.id == id) + usize::from(s.parent_id.as_deref() == Some(id)))
        .sum::<usize>();
    let edges = map
        .edges
        .iter()
        .map(|e| usize::from(e.source == id) + usize::from(e.target == id))
        .sum::<usize>();
    nodes + scopes + edges
}

/// Walk up from `scope_id`, checking each link of the containment chain.
fn assert_chain_contained(map: &MapViewData, scope_id: &str) -> Result<(), TestCaseError> {
    let mut seen = HashSet::new();
    let mut current = map.scope(scope_id);
    while let Some(child) = current {
        if !seen.insert(child.id.clone()) {
            break;
        }
        let Some(parent) = child.parent_id.as_deref().and_then(|p| map.scope(p)) else {
            break;
        };
        prop_assert!(
            parent.rect().contains_rect(&padded(&child.rect())),
            "{} {:?} escapes {} {:?}",
            child.id, child.rect(), parent.id, parent.rect()
        );
        current = Some(parent);
    }
    Ok(())
}

type Graph = (Vec<MapNode>, Vec<Scope>, Vec<MapEdge>);

/// Spots, a scope forest and edges. Scope `i` only nests inside an earlier
/// scope, so parents always precede their children.
fn graph_strategy() -> impl Strategy<Value = Graph> {
    (1usize..12, 0usize..5).prop_flat_map(|(n, k)| {
        let edges = prop::collection::vec((0..n, 0..n, direction_strategy()), 0..(n * 2));
        let scope_parents: Vec<_> = (0..k)
            .map(|i| prop::option::of(0..i.max(1)).prop_map(move |p| p.filter(|&p| p < i)))
            .collect();
        let node_parents = prop::collection::vec(prop::option::of(0..k.max(1)), n);
        (Just((n, k)), edges, scope_parents, node_parents).prop_map(
            |((n, k), raw, scope_parents, node_parents)| {
                let nodes: Vec<MapNode> = (0..n)
                    .map(|i| {
                        let mut node = MapNode::new(format!("n{}", i), i as f64 * 7.0, 3.0);
                        node.parent_id = node_parents[i]
                            .filter(|&p| p < k)
                            .map(|p| format!("s{}", p));
                        node
                    })
                    .collect();
                let scopes: Vec<Scope> = scope_parents
                    .into_iter()
                    .enumerate()
                    .map(|(i, parent)| {
                        let layer = if parent.is_some() {
                            ScopeLayer::Region
                        } else {
                            ScopeLayer::World
                        };
                        let rect = Rect::new(i as f64 * 90.0, -50.0, 120.0, 80.0);
                        let mut scope = Scope::new(format!("s{}", i), layer, rect);
                        scope.parent_id = parent.map(|p| format!("s{}", p));
                        scope
                    })
                    .collect();
                let edges = raw
                    .into_iter()
                    .map(|(s, t, d)| {
                        let mut e = MapEdge::new(format!("n{}", s), format!("n{}", t));
                        e.direction = d;
                        e
                    })
                    .collect();
                (nodes, scopes, edges)
            },
        )
    })
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Containment
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn spots_stay_inside_their_container(
        stale_world in any::<bool>(),
        ops in prop::collection::vec(containment_op(), 1..30),
    ) {
        let map = apply(&base_map(stale_world), &ops);
        for node in &map.nodes {
            let Some(parent) = node.parent_id.as_deref().and_then(|p| map.scope(p)) else {
                continue;
            };
            let scope = parent.rect();
            prop_assert!(
                scope.contains_rect(&padded(&node.rect())),
                "{} at ({}, {}) escapes {} {:?}",
                node.id, node.x, node.y, parent.id, scope
            );
            prop_assert!(node.x >= scope.x - 40.0 && node.x <= scope.right() + 40.0);
            prop_assert!(node.y >= scope.y - 40.0 && node.y <= scope.bottom() + 40.0);
            assert_chain_contained(&map, &parent.id)?;
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Edge uniqueness
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn one_edge_per_pair(paths in prop::collection::vec(path_op(), 0..40)) {
        let map = apply(&MapViewData::default(), &all_spots());
        let map = apply(&map, &paths);
        let mut seen = HashSet::new();
        for edge in &map.edges {
            prop_assert!(
                seen.insert((edge.source.clone(), edge.target.clone())),
                "duplicate edge {} -> {}", edge.source, edge.target
            );
            prop_assert_eq!(&edge.id, &format!("{}->{}", edge.source, edge.target));
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Rename atomicity
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn rename_moves_every_reference(
        paths in prop::collection::vec(path_op(), 0..20),
        old in prop::sample::select(vec!["a", "b", "c", "region-1", "world-1", "missing"]),
    ) {
        let map = apply(&MapViewData::default(), &all_spots());
        let map = apply(&map, &paths);
        let before = references(&map, old);

        let renamed = apply(&map, &[Instruction::RenameId {
            old_id: old.to_string(),
            new_id: "zz".to_string(),
        }]);

        prop_assert_eq!(references(&renamed, old), 0);
        prop_assert_eq!(references(&renamed, "zz"), before);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Layout determinism
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn layout_is_deterministic((nodes, scopes, edges) in graph_strategy()) {
        let first = compute_layout(&nodes, &scopes, &edges);
        let second = compute_layout(&nodes, &scopes, &edges);
        prop_assert_eq!(first, second);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Layout non-overlap
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn laid_out_spots_do_not_collide((nodes, scopes, edges) in graph_strategy()) {
        let map = MapViewData { nodes, scopes, edges, ..Default::default() };
        let ins = compute_layout(&map.nodes, &map.scopes, &map.edges);
        let map = apply(&map, &ins);

        let mut cells = HashSet::new();
        for node in &map.nodes {
            let cell = ((node.x / CELL_WIDTH).round() as i64, (node.y / CELL_HEIGHT).round() as i64);
            prop_assert!(cells.insert(cell), "{} shares cell {:?}", node.id, cell);
        }
        for (i, a) in map.nodes.iter().enumerate() {
            for b in &map.nodes[i + 1..] {
                prop_assert_eq!(a.rect().overlap(&b.rect()), (0.0, 0.0), "{} overlaps {}", a.id, b.id);
            }
        }
        for node in &map.nodes {
            if let Some(parent) = node.parent_id.as_deref().and_then(|p| map.scope(p)) {
                prop_assert!(
                    parent.rect().contains_rect(&padded(&node.rect())),
                    "{} escapes {}", node.id, parent.id
                );
            }
        }
        for scope in &map.scopes {
            assert_chain_contained(&map, &scope.id)?;
        }
    }
}
