use std::collections::HashSet;

use fablemap_core::{MapViewData, Scope, ScopeLayer};

/// Longest description echoed back to the model, in characters.
const DESC_LIMIT: usize = 80;

fn label_of<'a>(id: &'a str, map: &'a MapViewData) -> &'a str {
    map.node(id)
        .map(|n| n.label.as_str())
        .or_else(|| map.scope(id).map(|s| s.label.as_str()))
        .unwrap_or(id)
}

fn push_desc(out: &mut String, desc: Option<&str>) {
    let Some(desc) = desc.filter(|d| !d.is_empty()) else {
        return;
    };
    out.push_str(" | \"");
    if desc.chars().count() > DESC_LIMIT {
        out.extend(desc.chars().take(DESC_LIMIT));
        out.push_str("...");
    } else {
        out.push_str(desc);
    }
    out.push('"');
}

/// Convert a story map to a compact text representation for LLM consumption.
pub fn serialize_map(map: &MapViewData) -> String {
    let mut out = String::with_capacity(2048);

    out.push_str("SCOPES:\n");
    let ids: HashSet<&str> = map.scopes.iter().map(|s| s.id.as_str()).collect();
    let mut seen = HashSet::new();
    for scope in &map.scopes {
        let is_root = scope.parent_id.as_deref().map_or(true, |p| !ids.contains(p));
        if is_root {
            serialize_scope(&mut out, map, scope, 0, &mut seen);
        }
    }
    // Scopes only reachable through a parent cycle.
    for scope in &map.scopes {
        if !seen.contains(scope.id.as_str()) {
            serialize_scope(&mut out, map, scope, 0, &mut seen);
        }
    }

    out.push_str("SPOTS:\n");
    for node in &map.nodes {
        out.push('[');
        out.push_str(node.node_type.as_str());
        out.push_str("] ");
        out.push_str(&node.id);
        out.push_str(" \"");
        out.push_str(&node.label);
        out.push('"');
        let mut flags = Vec::new();
        if let Some(pid) = &node.parent_id {
            flags.push(format!("in={}", pid));
        }
        if node.is_fuzzy {
            flags.push("fuzzy".to_string());
        }
        if !flags.is_empty() {
            out.push_str(" (");
            out.push_str(&flags.join(","));
            out.push(')');
        }
        if let Some(status) = node.status.as_deref().filter(|s| !s.is_empty()) {
            out.push_str(" status=");
            out.push_str(status);
        }
        push_desc(&mut out, node.desc.as_deref());
        out.push('\n');
    }

    out.push_str("PATHS:\n");
    for edge in &map.edges {
        out.push_str(&edge.source);
        out.push_str(" \"");
        out.push_str(label_of(&edge.source, map));
        out.push_str("\" --");
        out.push_str(edge.direction.as_str());
        out.push('/');
        out.push_str(edge.path_type.as_str());
        out.push_str("--> ");
        out.push_str(&edge.target);
        out.push_str(" \"");
        out.push_str(label_of(&edge.target, map));
        out.push('"');
        if edge.is_fuzzy {
            out.push_str(" (fuzzy)");
        }
        if let Some(label) = edge.label.as_deref().filter(|l| !l.is_empty()) {
            out.push_str(" | \"");
            out.push_str(label);
            out.push('"');
        }
        out.push('\n');
    }

    if let Some(focus) = &map.focus_id {
        out.push_str("FOCUS: ");
        out.push_str(focus);
        out.push_str(" \"");
        out.push_str(label_of(focus, map));
        out.push_str("\"\n");
    }

    out
}

fn serialize_scope<'a>(
    out: &mut String,
    map: &'a MapViewData,
    scope: &'a Scope,
    indent: usize,
    seen: &mut HashSet<&'a str>,
) {
    if !seen.insert(scope.id.as_str()) {
        return;
    }
    out.push_str(&" ".repeat(indent));
    out.push_str(match scope.layer {
        ScopeLayer::World => "[W] ",
        ScopeLayer::Region => "[R] ",
    });
    out.push_str(&scope.id);
    out.push_str(" \"");
    out.push_str(&scope.label);
    out.push('"');
    push_desc(out, scope.desc.as_deref());
    out.push('\n');

    for child in map
        .scopes
        .iter()
        .filter(|s| s.parent_id.as_deref() == Some(scope.id.as_str()))
    {
        serialize_scope(out, map, child, indent + 2, seen);
    }
}

pub fn system_prompt() -> String {
    format!(
        "You are a cartographer for interactive fiction. You read a passage of story and keep a \
spatial map of it up to date: worlds, regions inside them, spots (rooms, landmarks, transit points) \
inside regions, and the paths between spots.\n\n\
Focus on:\n\
- Places the characters are in, arrive at, or clearly see\n\
- How places connect, and in which compass direction one lies from another\n\
- Vertical links (stairs, ladders, shafts) as UP or DOWN\n\
- Renaming fuzzy placeholders once the story names them\n\n\
Do NOT:\n\
- Invent places the story does not mention or imply\n\
- Move or re-create things already on the map unless the story contradicts them\n\
- Set coordinates; the map lays itself out\n\n\
## Protocol\n{}\n\n\
Output ONLY the JSON object, nothing else.",
        fablemap_core::protocol::PROTOCOL
    )
}

pub fn user_message(map: &MapViewData, narrative: &str) -> String {
    let mut out = String::new();
    if map.is_empty() {
        out.push_str("CURRENT MAP: (empty)\n");
    } else {
        out.push_str("CURRENT MAP:\n");
        out.push_str(&serialize_map(map));
    }
    out.push_str("\nSTORY:\n");
    out.push_str(narrative.trim());
    out.push('\n');
    out
}
