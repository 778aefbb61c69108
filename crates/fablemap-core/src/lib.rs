pub mod canvas;
pub mod engine;
pub mod expand;
pub mod geometry;
pub mod instruction;
pub mod layout;
pub mod protocol;
pub mod store;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use geometry::Rect;

pub use engine::{apply, apply_payload};
pub use instruction::{Changes, ElementKind, Instruction, PathSpec, ScopeSpec, SpotSpec};
pub use layout::compute_layout;
pub use store::{HistoryEntry, MapStore, Origin};

/// Footprint used for spots in containment and layout math.
pub const NODE_WIDTH: f64 = 140.0;
pub const NODE_HEIGHT: f64 = 60.0;

// --- Types (matching the map view JSON) ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpotType {
    Room,
    Landmark,
    Transit,
    #[default]
    #[serde(other)]
    Unknown,
}

impl SpotType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "room" => SpotType::Room,
            "landmark" => SpotType::Landmark,
            "transit" => SpotType::Transit,
            _ => SpotType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpotType::Room => "room",
            SpotType::Landmark => "landmark",
            SpotType::Transit => "transit",
            SpotType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScopeLayer {
    World,
    #[default]
    Region,
}

impl ScopeLayer {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WORLD" => Some(ScopeLayer::World),
            "REGION" => Some(ScopeLayer::Region),
            _ => None,
        }
    }

    /// Size given to a freshly created scope when the instruction omits one.
    pub fn default_size(&self) -> (f64, f64) {
        match self {
            ScopeLayer::World => (600.0, 400.0),
            ScopeLayer::Region => (300.0, 200.0),
        }
    }
}

/// Compass direction of a path, also used as a port id on node/scope perimeters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    N,
    S,
    E,
    W,
    NE,
    NW,
    SE,
    SW,
    Up,
    Down,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Direction {
    /// The ten attachment ports, in rendering order.
    pub const PORTS: [Direction; 10] = [
        Direction::N,
        Direction::NE,
        Direction::E,
        Direction::SE,
        Direction::S,
        Direction::SW,
        Direction::W,
        Direction::NW,
        Direction::Up,
        Direction::Down,
    ];

    /// Lenient parse: accepts abbreviations and full compass words in any case.
    pub fn parse(s: &str) -> Self {
        let norm: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_uppercase();
        match norm.as_str() {
            "N" | "NORTH" => Direction::N,
            "S" | "SOUTH" => Direction::S,
            "E" | "EAST" => Direction::E,
            "W" | "WEST" => Direction::W,
            "NE" | "NORTHEAST" => Direction::NE,
            "NW" | "NORTHWEST" => Direction::NW,
            "SE" | "SOUTHEAST" => Direction::SE,
            "SW" | "SOUTHWEST" => Direction::SW,
            "UP" | "U" | "ABOVE" => Direction::Up,
            "DOWN" | "D" | "BELOW" => Direction::Down,
            _ => Direction::Unknown,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::N => Direction::S,
            Direction::S => Direction::N,
            Direction::E => Direction::W,
            Direction::W => Direction::E,
            Direction::NE => Direction::SW,
            Direction::NW => Direction::SE,
            Direction::SE => Direction::NW,
            Direction::SW => Direction::NE,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Unknown => Direction::Unknown,
        }
    }

    pub fn is_vertical(&self) -> bool {
        matches!(self, Direction::Up | Direction::Down)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::N => "N",
            Direction::S => "S",
            Direction::E => "E",
            Direction::W => "W",
            Direction::NE => "NE",
            Direction::NW => "NW",
            Direction::SE => "SE",
            Direction::SW => "SW",
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    Door,
    Portal,
    Stairs,
    #[default]
    #[serde(other)]
    Road,
}

impl PathType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "door" => PathType::Door,
            "portal" => PathType::Portal,
            "stairs" | "stair" | "staircase" => PathType::Stairs,
            _ => PathType::Road,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PathType::Road => "road",
            PathType::Door => "door",
            PathType::Portal => "portal",
            PathType::Stairs => "stairs",
        }
    }
}

/// A point location ("spot") on the story map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MapNode {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub node_type: SpotType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub is_fuzzy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl MapNode {
    pub fn new(id: impl Into<String>, x: f64, y: f64) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            node_type: SpotType::Unknown,
            parent_id: None,
            x,
            y,
            is_fuzzy: false,
            desc: None,
            status: None,
        }
    }

    /// Bounding box, with `x`/`y` as the top-left corner.
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, NODE_WIDTH, NODE_HEIGHT)
    }
}

/// A hierarchical spatial container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub layer: ScopeLayer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub w: f64,
    #[serde(default)]
    pub h: f64,
}

impl Scope {
    pub fn new(id: impl Into<String>, layer: ScopeLayer, rect: Rect) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            layer,
            parent_id: None,
            desc: None,
            x: rect.x,
            y: rect.y,
            w: rect.w,
            h: rect.h,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.w, self.h)
    }

    pub fn set_rect(&mut self, rect: Rect) {
        self.x = rect.x;
        self.y = rect.y;
        self.w = rect.w;
        self.h = rect.h;
    }
}

/// A directed connection between two map items (spots or scopes).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MapEdge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(rename = "type", default)]
    pub path_type: PathType,
    #[serde(default)]
    pub is_fuzzy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl MapEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: make_edge_id(&source, &target),
            source,
            target,
            direction: Direction::Unknown,
            path_type: PathType::Road,
            is_fuzzy: false,
            label: None,
        }
    }
}

/// Edge identity is the ordered (source, target) pair; this is its string form.
pub fn make_edge_id(source: &str, target: &str) -> String {
    format!("{}->{}", source, target)
}

/// The aggregate root of one story map.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MapViewData {
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub nodes: Vec<MapNode>,
    #[serde(default)]
    pub edges: Vec<MapEdge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_id: Option<String>,
}

impl MapViewData {
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty() && self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&MapNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn scope(&self, id: &str) -> Option<&Scope> {
        self.scopes.iter().find(|s| s.id == id)
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&MapEdge> {
        self.edges
            .iter()
            .find(|e| e.source == source && e.target == target)
    }

    /// True when a spot or a scope carries this id.
    pub fn contains_id(&self, id: &str) -> bool {
        self.node(id).is_some() || self.scope(id).is_some()
    }

    /// Geometry of a spot or scope by id (spots first).
    pub fn item_rect(&self, id: &str) -> Option<Rect> {
        self.node(id)
            .map(MapNode::rect)
            .or_else(|| self.scope(id).map(Scope::rect))
    }

    pub fn parent_of(&self, id: &str) -> Option<&str> {
        self.node(id)
            .and_then(|n| n.parent_id.as_deref())
            .or_else(|| self.scope(id).and_then(|s| s.parent_id.as_deref()))
    }
}

/// Generate the next id for `prefix` by scanning spots and scopes.
/// Follows the pattern "{prefix}-{N}" with N incrementing.
pub fn next_id(map: &MapViewData, prefix: &str) -> String {
    let lead = format!("{}-", prefix);
    let max = map
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .chain(map.scopes.iter().map(|s| s.id.as_str()))
        .filter_map(|id| id.strip_prefix(lead.as_str()).and_then(|s| s.parse::<u64>().ok()))
        .max()
        .unwrap_or(0);
    let mut n = max.saturating_add(1);
    loop {
        let id = format!("{}-{}", prefix, n);
        if !map.contains_id(&id) {
            return id;
        }
        n = n.wrapping_add(1);
    }
}

// --- Errors ---

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

// --- AI Settings ---

/// Resolve the Fablemap home directory: `$FABLEMAP_HOME`, else `~/.fablemap/`.
pub fn home_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("FABLEMAP_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fablemap")
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiSettings {
    pub provider: String,
    pub api_key: String,
    pub model: String,
}

fn settings_path() -> PathBuf {
    home_dir().join("settings.json")
}

pub fn read_settings() -> AiSettings {
    let path = settings_path();
    if !path.exists() {
        return AiSettings::default();
    }
    fs::read_to_string(&path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

pub fn write_settings(settings: &AiSettings) -> Result<(), MapError> {
    let dir = home_dir();
    fs::create_dir_all(&dir).map_err(|source| MapError::Io {
        path: dir.clone(),
        source,
    })?;
    let json = serde_json::to_string_pretty(settings)?;
    let path = settings_path();
    fs::write(&path, json).map_err(|source| MapError::Io { path, source })
}

pub fn ai_configured(settings: &AiSettings) -> bool {
    !settings.provider.is_empty()
        && !settings.model.is_empty()
        && (settings.provider == "ollama" || !settings.api_key.is_empty())
}
