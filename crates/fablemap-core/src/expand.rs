//! Containment expansion: grow a scope (and its ancestors) so a child item
//! stays inside it.

use std::collections::HashSet;

use tracing::debug;

use crate::geometry::Rect;
use crate::Scope;

/// Margin kept between a child item and its container on every side.
pub const ITEM_PADDING: f64 = 40.0;
/// Extra room above a child for the container's header band.
pub const HEADER_OFFSET: f64 = 40.0;

/// The area a container must cover for `item` to count as contained.
pub fn padded(item: &Rect) -> Rect {
    Rect::new(
        item.x - ITEM_PADDING,
        item.y - ITEM_PADDING - HEADER_OFFSET,
        item.w + ITEM_PADDING * 2.0,
        item.h + ITEM_PADDING * 2.0 + HEADER_OFFSET,
    )
}

/// Grow scope `scope_id` until it contains `item` plus padding, then repeat
/// for its parent with the grown rectangle, walking up the containment chain.
///
/// Growth is monotonic (the new rectangle is the union of the old one and the
/// padded item). A scope that already fits is left alone but its parent is
/// still checked, so a stale ancestor gets fixed too. Unknown ids end the
/// walk silently. Returns the ids of the scopes that grew.
pub fn expand(scope_id: &str, item: Rect, scopes: &mut [Scope]) -> Vec<String> {
    let mut grown = Vec::new();
    let mut visited = HashSet::new();
    let mut current = scope_id.to_string();
    let mut item = item;

    loop {
        if !visited.insert(current.clone()) {
            debug!(scope = %current, "containment cycle, stopping expansion");
            break;
        }
        let Some(scope) = scopes.iter_mut().find(|s| s.id == current) else {
            break;
        };
        let need = padded(&item);
        let mut rect = scope.rect();
        if !rect.contains_rect(&need) {
            rect = rect.union(&need);
            scope.set_rect(rect);
            grown.push(scope.id.clone());
        }

        match scope.parent_id.clone() {
            Some(parent) => {
                current = parent;
                item = rect;
            }
            None => break,
        }
    }

    grown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScopeLayer;

    fn scope(id: &str, parent: Option<&str>, rect: Rect) -> Scope {
        let mut s = Scope::new(id, ScopeLayer::Region, rect);
        s.parent_id = parent.map(str::to_string);
        s
    }

    #[test]
    fn contained_item_leaves_scope_untouched() {
        let mut scopes = vec![scope("r", None, Rect::new(0.0, 0.0, 400.0, 400.0))];
        let grown = expand("r", Rect::new(100.0, 100.0, 140.0, 60.0), &mut scopes);
        assert!(grown.is_empty());
        assert_eq!(scopes[0].rect(), Rect::new(0.0, 0.0, 400.0, 400.0));
    }

    #[test]
    fn grows_to_padded_union() {
        let mut scopes = vec![scope("r", None, Rect::new(0.0, 0.0, 300.0, 200.0))];
        expand("r", Rect::new(250.0, 10.0, 140.0, 60.0), &mut scopes);
        let r = scopes[0].rect();
        assert_eq!(r.x, 0.0);
        assert_eq!(r.y, 10.0 - ITEM_PADDING - HEADER_OFFSET);
        assert_eq!(r.right(), 250.0 + 140.0 + ITEM_PADDING);
        assert_eq!(r.bottom(), 200.0);
    }

    #[test]
    fn never_shrinks() {
        let mut scopes = vec![scope("r", None, Rect::new(-500.0, -500.0, 100.0, 100.0))];
        expand("r", Rect::new(0.0, 0.0, 10.0, 10.0), &mut scopes);
        let r = scopes[0].rect();
        assert_eq!((r.x, r.y), (-500.0, -500.0));
        assert!(r.contains_rect(&padded(&Rect::new(0.0, 0.0, 10.0, 10.0))));
    }

    #[test]
    fn growth_propagates_to_ancestors() {
        let mut scopes = vec![
            scope("w", None, Rect::new(0.0, 0.0, 600.0, 400.0)),
            scope("r", Some("w"), Rect::new(40.0, 80.0, 300.0, 200.0)),
        ];
        let grown = expand("r", Rect::new(900.0, 100.0, 140.0, 60.0), &mut scopes);
        assert_eq!(grown, vec!["r".to_string(), "w".to_string()]);
        let world = scopes[0].rect();
        assert!(world.contains_rect(&padded(&scopes[1].rect())));
    }

    #[test]
    fn fitting_scope_still_fixes_stale_ancestor() {
        let mut scopes = vec![
            scope("r", Some("w"), Rect::new(0.0, 0.0, 300.0, 200.0)),
            scope("w", None, Rect::new(5000.0, 5000.0, 600.0, 400.0)),
        ];
        let grown = expand("r", Rect::new(50.0, 90.0, 140.0, 60.0), &mut scopes);
        assert_eq!(grown, vec!["w".to_string()]);
        assert_eq!(scopes[0].rect(), Rect::new(0.0, 0.0, 300.0, 200.0));
        assert!(scopes[1].rect().contains_rect(&padded(&scopes[0].rect())));
    }

    #[test]
    fn cyclic_parents_terminate() {
        let mut scopes = vec![
            scope("a", Some("b"), Rect::new(0.0, 0.0, 10.0, 10.0)),
            scope("b", Some("a"), Rect::new(0.0, 0.0, 10.0, 10.0)),
        ];
        let grown = expand("a", Rect::new(100.0, 100.0, 10.0, 10.0), &mut scopes);
        assert!(grown.len() <= 2);
    }

    #[test]
    fn unknown_scope_is_ignored() {
        let mut scopes = Vec::new();
        assert!(expand("nope", Rect::new(0.0, 0.0, 1.0, 1.0), &mut scopes).is_empty());
    }
}
