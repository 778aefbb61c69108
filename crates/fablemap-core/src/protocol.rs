/// Map instruction protocol: single source of truth for AI prompts and MCP instructions.
pub const PROTOCOL: &str = "\
Respond with a JSON object of the form {\"instructions\": [ ... ]}. Each entry has an \"op_code\" \
and the fields listed for it. Unknown fields are ignored; entries that cannot be understood are skipped.\n\
\n\
CREATE_SCOPE {id, label, layer, parentId?, desc?, x?, y?, w?, h?}\n\
  Create a container. layer is WORLD or REGION (default REGION). A REGION normally sits inside a WORLD \
via parentId. Sending CREATE_SCOPE for an existing id updates only the fields you supply.\n\
CREATE_SPOT {id, label, type, parentId?, isFuzzy?, desc?, status?, x?, y?}\n\
  Create a location. type is room, landmark, transit or unknown. Omit x/y to let the map place it. \
Omit parentId to put it in the region under its position; a region and world are created if none exists.\n\
BUILD_PATH {source, target, direction, type?, label?, isFuzzy?}\n\
  Connect two spots or scopes. direction is N, S, E, W, NE, NW, SE, SW, UP or DOWN, read as \
\"target lies <direction> of source\". type is road, door, portal or stairs. Only one path exists per \
(source, target) pair; repeating BUILD_PATH updates its label and direction.\n\
UPDATE_STATE {target_id, changes: {label?, type?, layer?, parentId?, x?, y?, w?, h?, isFuzzy?, desc?, status?}}\n\
  Change fields on a spot or scope.\n\
RENAME_ID {oldId, newId}\n\
  Give an item a new id. Every reference to the old id follows. Use this to confirm a fuzzy placeholder.\n\
DELETE_ELEMENT {element_type, id, source?, target?}\n\
  element_type is node, edge or scope. Deleting a node also deletes its paths. Deleting a scope keeps \
its children, which become top-level. For edges prefer source and target over id.\n\
REPARENT {targetId, newParentId}\n\
  Move a spot or scope into another container.\n\
\n\
Rules:\n\
1. Reuse ids already on the map. Never invent a new id for a place that already exists.\n\
2. Use isFuzzy: true for places or paths the story only hints at.\n\
3. One path per connection. Do not add a reverse path for the way back.\n\
4. Spots belong in REGIONs and REGIONs belong in WORLDs.\n\
5. Only describe changes. Do not repeat items that are already correct.\n";

#[cfg(test)]
mod tests {
    use super::PROTOCOL;

    #[test]
    fn lists_every_op_code() {
        for op in [
            "CREATE_SCOPE",
            "CREATE_SPOT",
            "BUILD_PATH",
            "UPDATE_STATE",
            "RENAME_ID",
            "DELETE_ELEMENT",
            "REPARENT",
        ] {
            assert!(PROTOCOL.contains(op), "{op} missing");
        }
    }
}
