//! The map mutation protocol.
//!
//! Raw instruction objects come from a language model or from the canvas and
//! use inconsistent key spellings. They are normalized here, once, into the
//! closed [`Instruction`] enum; nothing downstream sees raw JSON.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{Direction, PathType, ScopeLayer, SpotType};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<ScopeLayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<SpotType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_fuzzy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSpec {
    pub source: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub path_type: Option<PathType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_fuzzy: Option<bool>,
}

/// Partial update carried by UPDATE_STATE. Only supplied fields are applied.
/// `parent_id: Some(None)` clears the parent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Changes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<SpotType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<ScopeLayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_fuzzy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Changes {
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Default::default()
        }
    }

    pub fn geometry(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            w: Some(w),
            h: Some(h),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Changes::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Node,
    Edge,
    Scope,
}

impl ElementKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "node" | "spot" => Some(ElementKind::Node),
            "edge" | "path" => Some(ElementKind::Edge),
            "scope" | "region" | "world" => Some(ElementKind::Scope),
            _ => None,
        }
    }
}

/// One typed map mutation. Serializes to the canonical wire form.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op_code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Instruction {
    CreateScope(ScopeSpec),
    CreateSpot(SpotSpec),
    BuildPath(PathSpec),
    UpdateState {
        target_id: String,
        changes: Changes,
    },
    RenameId {
        #[serde(rename = "oldId")]
        old_id: String,
        #[serde(rename = "newId")]
        new_id: String,
    },
    DeleteElement {
        element_type: ElementKind,
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    Reparent {
        #[serde(rename = "targetId")]
        target_id: String,
        #[serde(rename = "newParentId")]
        new_parent_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MalformedInstruction {
    #[error("instruction is not an object")]
    NotAnObject,
    #[error("instruction has no op_code")]
    MissingOpCode,
    #[error("unknown op_code {0:?}")]
    UnknownOpCode(String),
    #[error("{op} is missing required field {field}")]
    MissingField {
        op: &'static str,
        field: &'static str,
    },
    #[error("{0:?} is not a known element_type")]
    UnknownElementType(String),
}

impl Instruction {
    pub fn op_code(&self) -> &'static str {
        match self {
            Instruction::CreateScope(_) => "CREATE_SCOPE",
            Instruction::CreateSpot(_) => "CREATE_SPOT",
            Instruction::BuildPath(_) => "BUILD_PATH",
            Instruction::UpdateState { .. } => "UPDATE_STATE",
            Instruction::RenameId { .. } => "RENAME_ID",
            Instruction::DeleteElement { .. } => "DELETE_ELEMENT",
            Instruction::Reparent { .. } => "REPARENT",
        }
    }

    pub fn update(target_id: impl Into<String>, changes: Changes) -> Self {
        Instruction::UpdateState {
            target_id: target_id.into(),
            changes,
        }
    }

    pub fn reparent(target_id: impl Into<String>, new_parent_id: Option<String>) -> Self {
        Instruction::Reparent {
            target_id: target_id.into(),
            new_parent_id,
        }
    }

    pub fn delete(element_type: ElementKind, id: impl Into<String>) -> Self {
        Instruction::DeleteElement {
            element_type,
            id: id.into(),
            source: None,
            target: None,
        }
    }

    /// Normalize one raw instruction object.
    pub fn from_value(value: &Value) -> Result<Self, MalformedInstruction> {
        let obj = value.as_object().ok_or(MalformedInstruction::NotAnObject)?;
        let f = Fields(obj);
        let op = f
            .string(&["op_code", "opCode", "op"])
            .ok_or(MalformedInstruction::MissingOpCode)?;

        match op.trim().to_ascii_uppercase().as_str() {
            "CREATE_SCOPE" | "DEFINE_SCOPE" => Ok(Instruction::CreateScope(ScopeSpec {
                id: f.string(&["id"]),
                label: f.string(&["label", "name"]),
                layer: f.string(&["layer"]).and_then(|s| ScopeLayer::parse(&s)),
                parent_id: f.string(&["parentId", "parent_id"]),
                desc: f.string(&["desc", "description"]),
                x: f.number(&["x"]),
                y: f.number(&["y"]),
                w: f.number(&["w", "width"]),
                h: f.number(&["h", "height"]),
            })),
            "CREATE_SPOT" => Ok(Instruction::CreateSpot(SpotSpec {
                id: f.string(&["id"]),
                label: f.string(&["label", "name"]),
                node_type: f
                    .string(&["type", "nodeType", "node_type"])
                    .map(|s| SpotType::parse(&s)),
                is_fuzzy: f.boolean(&["isFuzzy", "is_fuzzy"]),
                parent_id: f.string(&["parentId", "parent_id"]),
                x: f.number(&["x"]),
                y: f.number(&["y"]),
                desc: f.string(&["desc", "description"]),
                status: f.string(&["status"]),
            })),
            "BUILD_PATH" => {
                let source = f.string(&["source"]).ok_or(MalformedInstruction::MissingField {
                    op: "BUILD_PATH",
                    field: "source",
                })?;
                let target = f.string(&["target"]).ok_or(MalformedInstruction::MissingField {
                    op: "BUILD_PATH",
                    field: "target",
                })?;
                Ok(Instruction::BuildPath(PathSpec {
                    source,
                    target,
                    direction: f.string(&["direction"]).map(|s| Direction::parse(&s)),
                    label: f.string(&["label", "pathInfo", "path_info"]),
                    path_type: f
                        .string(&["type", "pathType", "path_type"])
                        .map(|s| PathType::parse(&s)),
                    is_fuzzy: f.boolean(&["isFuzzy", "is_fuzzy"]),
                }))
            }
            "UPDATE_STATE" => {
                let target_id = f.string(&["target_id", "targetId", "id"]).ok_or(
                    MalformedInstruction::MissingField {
                        op: "UPDATE_STATE",
                        field: "target_id",
                    },
                )?;
                let changes = match f.get(&["changes"]).and_then(Value::as_object) {
                    Some(raw) => parse_changes(raw),
                    None => {
                        return Err(MalformedInstruction::MissingField {
                            op: "UPDATE_STATE",
                            field: "changes",
                        })
                    }
                };
                Ok(Instruction::UpdateState { target_id, changes })
            }
            "RENAME_ID" => {
                let old_id = f.string(&["oldId", "old_id"]).ok_or(
                    MalformedInstruction::MissingField {
                        op: "RENAME_ID",
                        field: "oldId",
                    },
                )?;
                let new_id = f.string(&["newId", "new_id"]).ok_or(
                    MalformedInstruction::MissingField {
                        op: "RENAME_ID",
                        field: "newId",
                    },
                )?;
                Ok(Instruction::RenameId { old_id, new_id })
            }
            "DELETE_ELEMENT" => {
                let raw_kind = f.string(&["element_type", "elementType", "type"]).ok_or(
                    MalformedInstruction::MissingField {
                        op: "DELETE_ELEMENT",
                        field: "element_type",
                    },
                )?;
                let element_type = ElementKind::parse(&raw_kind)
                    .ok_or(MalformedInstruction::UnknownElementType(raw_kind))?;
                let source = f.string(&["source"]);
                let target = f.string(&["target"]);
                let id = match f.string(&["id"]) {
                    Some(id) => id,
                    None if source.is_some() && target.is_some() => String::new(),
                    None => {
                        return Err(MalformedInstruction::MissingField {
                            op: "DELETE_ELEMENT",
                            field: "id",
                        })
                    }
                };
                Ok(Instruction::DeleteElement {
                    element_type,
                    id,
                    source,
                    target,
                })
            }
            "REPARENT" => {
                let target_id = f.string(&["targetId", "target_id", "id"]).ok_or(
                    MalformedInstruction::MissingField {
                        op: "REPARENT",
                        field: "targetId",
                    },
                )?;
                let new_parent_id = f.string(&["newParentId", "new_parent_id", "parentId", "parent_id"]);
                Ok(Instruction::Reparent {
                    target_id,
                    new_parent_id,
                })
            }
            _ => Err(MalformedInstruction::UnknownOpCode(op)),
        }
    }

    /// Canonical wire form of this instruction.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Normalize a payload: `{ "instructions": [...] }` or a bare array.
///
/// Anything else yields an empty list. Malformed entries are dropped and the
/// rest of the batch is kept.
pub fn parse_instructions(payload: &Value) -> Vec<Instruction> {
    let Some(list) = instruction_list(payload) else {
        debug!("instruction payload is not a list, ignoring");
        return Vec::new();
    };
    list.iter()
        .enumerate()
        .filter_map(|(index, raw)| match Instruction::from_value(raw) {
            Ok(ins) => Some(ins),
            Err(reason) => {
                debug!(index, %reason, "dropping malformed instruction");
                None
            }
        })
        .collect()
}

/// The raw instruction array inside a payload, if it has one.
pub fn instruction_list(payload: &Value) -> Option<&Vec<Value>> {
    match payload {
        Value::Array(list) => Some(list),
        Value::Object(obj) => obj.get("instructions").and_then(Value::as_array),
        _ => None,
    }
}

fn parse_changes(raw: &Map<String, Value>) -> Changes {
    let f = Fields(raw);
    Changes {
        label: f.string(&["label", "name"]),
        node_type: f
            .string(&["type", "nodeType", "node_type"])
            .map(|s| SpotType::parse(&s)),
        layer: f.string(&["layer"]).and_then(|s| ScopeLayer::parse(&s)),
        parent_id: f.nullable_string(&["parentId", "parent_id"]),
        x: f.number(&["x"]),
        y: f.number(&["y"]),
        w: f.number(&["w", "width"]),
        h: f.number(&["h", "height"]),
        is_fuzzy: f.boolean(&["isFuzzy", "is_fuzzy"]),
        desc: f.string(&["desc", "description"]),
        status: f.string(&["status"]),
    }
}

/// Key lookup over a raw object, trying each spelling in order.
struct Fields<'a>(&'a Map<String, Value>);

impl Fields<'_> {
    /// First non-null value among `keys`.
    fn get(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter()
            .find_map(|k| self.0.get(*k).filter(|v| !v.is_null()))
    }

    fn string(&self, keys: &[&str]) -> Option<String> {
        match self.get(keys)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn number(&self, keys: &[&str]) -> Option<f64> {
        let n = match self.get(keys)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        n.is_finite().then_some(n)
    }

    fn boolean(&self, keys: &[&str]) -> Option<bool> {
        match self.get(keys)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
            Value::Number(n) => n.as_f64().map(|v| v != 0.0),
            _ => None,
        }
    }

    /// Like `string`, but an explicit `null` on the first present key reads
    /// as `Some(None)` so callers can clear a reference.
    fn nullable_string(&self, keys: &[&str]) -> Option<Option<String>> {
        let present = keys.iter().find_map(|k| self.0.get(*k))?;
        match present {
            Value::Null => Some(None),
            Value::String(s) if s.trim().is_empty() => Some(None),
            Value::String(s) => Some(Some(s.clone())),
            Value::Number(n) => Some(Some(n.to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn camel_case_wins_over_snake_case() {
        let ins = Instruction::from_value(&json!({
            "op_code": "CREATE_SPOT",
            "id": "n1",
            "parentId": "r1",
            "parent_id": "r2",
            "is_fuzzy": true,
        }))
        .unwrap();
        let Instruction::CreateSpot(spec) = ins else {
            panic!("expected CREATE_SPOT");
        };
        assert_eq!(spec.parent_id.as_deref(), Some("r1"));
        assert_eq!(spec.is_fuzzy, Some(true));
    }

    #[test]
    fn snake_case_is_a_fallback_when_camel_is_null() {
        let ins = Instruction::from_value(&json!({
            "op_code": "CREATE_SPOT",
            "parentId": null,
            "parent_id": "r2",
        }))
        .unwrap();
        let Instruction::CreateSpot(spec) = ins else {
            panic!("expected CREATE_SPOT");
        };
        assert_eq!(spec.parent_id.as_deref(), Some("r2"));
    }

    #[test]
    fn define_scope_is_create_scope() {
        let ins = Instruction::from_value(&json!({"op_code": "define_scope", "id": "w", "layer": "world"}))
            .unwrap();
        assert_eq!(ins.op_code(), "CREATE_SCOPE");
        let Instruction::CreateScope(spec) = ins else {
            panic!("expected CREATE_SCOPE");
        };
        assert_eq!(spec.layer, Some(ScopeLayer::World));
    }

    #[test]
    fn path_aliases_are_normalized() {
        let ins = Instruction::from_value(&json!({
            "op_code": "BUILD_PATH",
            "source": "a",
            "target": "b",
            "path_info": "old bridge",
            "path_type": "Stairs",
            "direction": "north",
        }))
        .unwrap();
        assert_eq!(
            ins,
            Instruction::BuildPath(PathSpec {
                source: "a".into(),
                target: "b".into(),
                direction: Some(Direction::N),
                label: Some("old bridge".into()),
                path_type: Some(PathType::Stairs),
                is_fuzzy: None,
            })
        );
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let ins = Instruction::from_value(&json!({
            "op_code": "UPDATE_STATE",
            "target_id": "n1",
            "changes": {"x": "12.5", "y": 3, "parent_id": null}
        }))
        .unwrap();
        let Instruction::UpdateState { changes, .. } = ins else {
            panic!("expected UPDATE_STATE");
        };
        assert_eq!(changes.x, Some(12.5));
        assert_eq!(changes.y, Some(3.0));
        assert_eq!(changes.parent_id, Some(None));
    }

    #[test]
    fn malformed_entries_report_why() {
        assert_eq!(
            Instruction::from_value(&json!({"op_code": "TELEPORT"})),
            Err(MalformedInstruction::UnknownOpCode("TELEPORT".into()))
        );
        assert_eq!(
            Instruction::from_value(&json!({"op_code": "BUILD_PATH", "source": "a"})),
            Err(MalformedInstruction::MissingField {
                op: "BUILD_PATH",
                field: "target"
            })
        );
        assert_eq!(
            Instruction::from_value(&json!("CREATE_SPOT")),
            Err(MalformedInstruction::NotAnObject)
        );
    }

    #[test]
    fn batch_keeps_valid_entries() {
        let payload = json!({"instructions": [
            {"op_code": "CREATE_SPOT", "id": "a"},
            {"op_code": "NOPE"},
            42,
            {"op_code": "RENAME_ID", "old_id": "a", "new_id": "b"},
        ]});
        let list = parse_instructions(&payload);
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].op_code(), "RENAME_ID");
    }

    #[test]
    fn non_list_payload_is_empty() {
        assert!(parse_instructions(&json!({"instructions": "soon"})).is_empty());
        assert!(parse_instructions(&json!(null)).is_empty());
    }

    #[test]
    fn serializes_to_canonical_wire_form() {
        let v = Instruction::update("n1", Changes::position(1.0, 2.0)).to_value();
        assert_eq!(
            v,
            json!({"op_code": "UPDATE_STATE", "target_id": "n1", "changes": {"x": 1.0, "y": 2.0}})
        );
        let v = Instruction::reparent("n1", Some("r1".into())).to_value();
        assert_eq!(
            v,
            json!({"op_code": "REPARENT", "targetId": "n1", "newParentId": "r1"})
        );
    }

    #[test]
    fn wire_form_parses_back() {
        let original = Instruction::CreateSpot(SpotSpec {
            id: Some("n1".into()),
            label: Some("Inn".into()),
            node_type: Some(SpotType::Room),
            parent_id: Some("r1".into()),
            x: Some(10.0),
            ..Default::default()
        });
        assert_eq!(Instruction::from_value(&original.to_value()).unwrap(), original);
    }
}
