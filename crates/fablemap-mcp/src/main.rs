use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use fablemap_core::instruction::{instruction_list, parse_instructions};
use fablemap_core::{protocol::PROTOCOL, AiSettings, MapStore, MapViewData, Origin};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Map names: 1-64 chars of [a-zA-Z0-9_-].
fn is_valid_map_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn name_error(name: &str) -> CallToolResult {
    CallToolResult::error(vec![Content::text(format!(
        "Invalid map name '{}'. Use 1-64 letters, digits, '-' or '_'.",
        name
    ))])
}

fn missing_map(name: &str) -> CallToolResult {
    CallToolResult::error(vec![Content::text(format!(
        "No map named '{}'. Use list_maps to see open maps, or create_map to start one.",
        name
    ))])
}

fn pretty(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("Serialization error: {}", e))
}

/// Show only the tail of a key so it can be recognised but not reused.
fn mask_key(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if key.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("****{}", tail)
    }
}

fn history_summary(store: &MapStore) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = store
        .history()
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            serde_json::json!({
                "index": index,
                "origin": entry.origin,
                "appliedAtMs": entry.applied_at_ms,
                "instructionCount": entry.instruction_count,
                "spots": entry.snapshot.nodes.len(),
                "scopes": entry.snapshot.scopes.len(),
                "paths": entry.snapshot.edges.len(),
            })
        })
        .collect();
    serde_json::Value::Array(entries)
}

fn map_summary(map: &MapViewData) -> String {
    format!(
        "{} spots, {} scopes, {} paths",
        map.nodes.len(),
        map.scopes.len(),
        map.edges.len()
    )
}

// --- Request types ---

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct MapRequest {
    /// Name of the map
    name: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct CreateMapRequest {
    /// Name of the map to create or overwrite
    name: String,
    /// Optional initial snapshot as a JSON string: {scopes, nodes, edges, focusId?}. See get_map output for the exact schema. Omit to start empty.
    data: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ApplyInstructionsRequest {
    /// Name of the map
    name: String,
    /// Instruction payload as a JSON string: either {"instructions": [...]} or a bare array. See get_protocol for the op codes.
    payload: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct RestoreHistoryRequest {
    /// Name of the map
    name: String,
    /// History index from get_history (0 = most recent)
    index: usize,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SetFocusRequest {
    /// Name of the map
    name: String,
    /// Spot or scope id to focus; omit to clear focus
    id: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct GenerateRequest {
    /// Name of the map to update
    name: String,
    /// Story passage to read
    narrative: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SaveAiSettingsRequest {
    /// One of: openai, anthropic, google, ollama, groq, mistral, deepseek
    provider: String,
    /// Model name for the provider
    model: String,
    /// API key. Omit to keep the stored key.
    api_key: Option<String>,
}

// --- Server ---

#[derive(Clone)]
pub struct FablemapServer {
    maps: Arc<Mutex<HashMap<String, MapStore>>>,
    tool_router: ToolRouter<Self>,
}

impl FablemapServer {
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, MapStore>> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[tool_router]
impl FablemapServer {
    pub fn new() -> Self {
        Self {
            maps: Arc::new(Mutex::new(HashMap::new())),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "List the story maps open in this session")]
    fn list_maps(&self) -> Result<CallToolResult, McpError> {
        let maps = self.sessions();
        let text = if maps.is_empty() {
            "No maps open. Use create_map to start one.".to_string()
        } else {
            let mut names: Vec<String> = maps
                .iter()
                .map(|(name, store)| format!("{} ({})", name, map_summary(store.current())))
                .collect();
            names.sort();
            names.join("\n")
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(
        description = "Get the full JSON snapshot of a map: {scopes: [{id, label, layer, x, y, w, h, parentId?, desc?}], nodes: [{id, label, x, y, type, parentId?, isFuzzy, desc?, status?}], edges: [{id, source, target, direction, type, isFuzzy, label?}], focusId?}"
    )]
    fn get_map(&self, Parameters(req): Parameters<MapRequest>) -> Result<CallToolResult, McpError> {
        let maps = self.sessions();
        match maps.get(&req.name) {
            Some(store) => Ok(CallToolResult::success(vec![Content::text(pretty(
                store.current(),
            ))])),
            None => Ok(missing_map(&req.name)),
        }
    }

    #[tool(
        description = "Create a map, optionally from a JSON snapshot. An existing map with the same name is replaced and the old snapshot kept in its history."
    )]
    fn create_map(
        &self,
        Parameters(req): Parameters<CreateMapRequest>,
    ) -> Result<CallToolResult, McpError> {
        if !is_valid_map_name(&req.name) {
            return Ok(name_error(&req.name));
        }
        let snapshot = match req.data.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(data) => match serde_json::from_str::<MapViewData>(data) {
                Ok(map) => map,
                Err(e) => {
                    return Ok(CallToolResult::error(vec![Content::text(format!(
                        "Invalid map JSON: {}",
                        e
                    ))]))
                }
            },
            None => MapViewData::default(),
        };
        let summary = map_summary(&snapshot);

        let mut maps = self.sessions();
        let verb = match maps.get_mut(&req.name) {
            Some(store) => {
                store.reset(snapshot);
                "Replaced"
            }
            None => {
                maps.insert(req.name.clone(), MapStore::new(snapshot));
                "Created"
            }
        };
        info!(map = %req.name, verb, "map opened");
        Ok(CallToolResult::success(vec![Content::text(format!(
            "{} map '{}' ({})",
            verb, req.name, summary
        ))]))
    }

    #[tool(
        description = "Apply a batch of map instructions (CREATE_SCOPE, CREATE_SPOT, BUILD_PATH, UPDATE_STATE, REPARENT, RENAME_ID, DELETE_ELEMENT). Malformed entries are skipped; the rest still apply. Call get_protocol for the exact format."
    )]
    fn apply_instructions(
        &self,
        Parameters(req): Parameters<ApplyInstructionsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let payload: serde_json::Value = match serde_json::from_str(&req.payload) {
            Ok(v) => v,
            Err(e) => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Invalid payload JSON: {}",
                    e
                ))]))
            }
        };
        let Some(entries) = instruction_list(&payload).map(Vec::len) else {
            return Ok(CallToolResult::error(vec![Content::text(
                "Payload must be {\"instructions\": [...]} or a bare array of instructions.",
            )]));
        };
        let instructions = parse_instructions(&payload);
        let skipped = entries - instructions.len();

        let mut maps = self.sessions();
        let Some(store) = maps.get_mut(&req.name) else {
            return Ok(missing_map(&req.name));
        };
        let changed = store.apply(&instructions, Origin::User);
        let mut text = format!(
            "Applied {} instruction(s) to '{}'",
            instructions.len(),
            req.name
        );
        if skipped > 0 {
            text.push_str(&format!(", skipped {} malformed", skipped));
        }
        if !changed {
            text.push_str(". Nothing changed.");
        } else {
            text.push_str(&format!(". Now {}.", map_summary(store.current())));
        }
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "Lay the whole map out on a grid following path directions, then fit every scope around its contents")]
    fn auto_layout(&self, Parameters(req): Parameters<MapRequest>) -> Result<CallToolResult, McpError> {
        let mut maps = self.sessions();
        let Some(store) = maps.get_mut(&req.name) else {
            return Ok(missing_map(&req.name));
        };
        let text = if store.auto_layout() {
            format!("Laid out '{}'", req.name)
        } else {
            format!("'{}' is already laid out", req.name)
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(
        description = "List the undo history of a map, most recent first. Each entry holds the snapshot from before a change and what caused the change (user, ai, layout, reset, restore)."
    )]
    fn get_history(&self, Parameters(req): Parameters<MapRequest>) -> Result<CallToolResult, McpError> {
        let maps = self.sessions();
        match maps.get(&req.name) {
            Some(store) => Ok(CallToolResult::success(vec![Content::text(pretty(
                &history_summary(store),
            ))])),
            None => Ok(missing_map(&req.name)),
        }
    }

    #[tool(description = "Return a map to the snapshot stored at a history index. The state being left is recorded, so this can be undone too.")]
    fn restore_history(
        &self,
        Parameters(req): Parameters<RestoreHistoryRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut maps = self.sessions();
        let Some(store) = maps.get_mut(&req.name) else {
            return Ok(missing_map(&req.name));
        };
        match store.restore(req.index) {
            Some(map) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Restored '{}' to history entry {} ({})",
                req.name,
                req.index,
                map_summary(map)
            ))])),
            None => Ok(CallToolResult::error(vec![Content::text(format!(
                "No history entry {} for '{}'",
                req.index, req.name
            ))])),
        }
    }

    #[tool(description = "Set or clear the focused spot or scope. Focus is view state and does not enter history.")]
    fn set_focus(&self, Parameters(req): Parameters<SetFocusRequest>) -> Result<CallToolResult, McpError> {
        let mut maps = self.sessions();
        let Some(store) = maps.get_mut(&req.name) else {
            return Ok(missing_map(&req.name));
        };
        if let Some(id) = req.id.as_deref().filter(|id| !store.current().contains_id(id)) {
            return Ok(CallToolResult::error(vec![Content::text(format!(
                "No spot or scope '{}' in '{}'",
                id, req.name
            ))]));
        }
        let text = match &req.id {
            Some(id) => format!("Focused '{}'", id),
            None => "Focus cleared".to_string(),
        };
        store.set_focus(req.id);
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "Close a map and drop its history")]
    fn delete_map(&self, Parameters(req): Parameters<MapRequest>) -> Result<CallToolResult, McpError> {
        match self.sessions().remove(&req.name) {
            Some(_) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Deleted map '{}'",
                req.name
            ))])),
            None => Ok(missing_map(&req.name)),
        }
    }

    #[tool(description = "Get the instruction protocol: op codes, fields and the rules maps follow")]
    fn get_protocol(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(PROTOCOL)]))
    }

    #[tool(
        description = "Read a story passage with the configured AI model and apply the instructions it suggests. The batch lands on the map as it is when the reply arrives, so edits made meanwhile are kept."
    )]
    async fn generate(
        &self,
        Parameters(req): Parameters<GenerateRequest>,
    ) -> Result<CallToolResult, McpError> {
        if req.narrative.trim().is_empty() {
            return Ok(CallToolResult::error(vec![Content::text(
                "Narrative is empty.",
            )]));
        }
        let snapshot = {
            let maps = self.sessions();
            match maps.get(&req.name) {
                Some(store) => store.current().clone(),
                None => return Ok(missing_map(&req.name)),
            }
        };
        let settings = fablemap_core::read_settings();

        let instructions =
            match fablemap_suggest::generate_instructions(&snapshot, &req.narrative, &settings)
                .await
            {
                Ok(ins) => ins,
                Err(e) => {
                    warn!(map = %req.name, error = %e, "generation failed");
                    return Ok(CallToolResult::error(vec![Content::text(format!(
                        "Generation failed: {}",
                        e
                    ))]));
                }
            };

        let mut maps = self.sessions();
        let Some(store) = maps.get_mut(&req.name) else {
            return Ok(CallToolResult::error(vec![Content::text(format!(
                "Map '{}' was deleted while generating",
                req.name
            ))]));
        };
        let changed = store.apply(&instructions, Origin::Ai);
        let ops: Vec<&str> = instructions.iter().map(|i| i.op_code()).collect();
        let text = if changed {
            format!(
                "Applied {} AI instruction(s) [{}]. Now {}.",
                ops.len(),
                ops.join(", "),
                map_summary(store.current())
            )
        } else {
            "The AI suggested no changes.".to_string()
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "Show the AI provider settings (the API key is masked)")]
    fn get_ai_settings(&self) -> Result<CallToolResult, McpError> {
        let settings = fablemap_core::read_settings();
        let view = serde_json::json!({
            "provider": settings.provider,
            "model": settings.model,
            "apiKey": mask_key(&settings.api_key),
            "configured": fablemap_core::ai_configured(&settings),
        });
        Ok(CallToolResult::success(vec![Content::text(pretty(&view))]))
    }

    #[tool(description = "Save the AI provider settings used by generate")]
    fn save_ai_settings(
        &self,
        Parameters(req): Parameters<SaveAiSettingsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let api_key = match req.api_key {
            Some(key) => key,
            None => fablemap_core::read_settings().api_key,
        };
        let settings = AiSettings {
            provider: req.provider.trim().to_lowercase(),
            api_key,
            model: req.model.trim().to_string(),
        };
        match fablemap_core::write_settings(&settings) {
            Ok(()) => {
                let note = if fablemap_core::ai_configured(&settings) {
                    ""
                } else {
                    " (incomplete: provider, model and an API key are needed, except for ollama)"
                };
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "Saved AI settings for {}/{}{}",
                    settings.provider, settings.model, note
                ))]))
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Failed to save settings: {}",
                e
            ))])),
        }
    }
}

#[tool_handler]
impl ServerHandler for FablemapServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = format!("{}\n\n## Protocol\n{}", INSTRUCTIONS, PROTOCOL);
        ServerInfo {
            instructions: Some(instructions.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

const INSTRUCTIONS: &str = r#"Fablemap keeps spatial maps of stories: worlds, regions inside them, spots inside regions, and directed paths between spots.

Maps live for the length of this session. Typical flow:
1. `create_map` (empty, or from a saved snapshot).
2. `generate` with a story passage, or `apply_instructions` with a hand-written batch.
3. `auto_layout` to tidy positions.
4. `get_map` to read the result; `get_history` / `restore_history` to undo.

Every change goes through the same instruction batch. Positions are optional: the engine places new spots near their container and grows containers to fit."#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle `fablemap-mcp init` subcommand
    if std::env::args().nth(1).as_deref() == Some("init") {
        return init_project();
    }

    // stdout is the MCP transport.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(
            EnvFilter::try_from_env("FABLEMAP_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let service = FablemapServer::new()
        .serve(rmcp::transport::io::stdio())
        .await
        .inspect_err(|e| tracing::error!("MCP server error: {}", e))?;
    service.waiting().await?;
    Ok(())
}

/// Write project-scoped MCP config files in the current directory so that
/// Claude Code and/or Codex discover fablemap-mcp when working in this project.
/// Only writes config for tools that are actually installed.
fn init_project() -> Result<(), Box<dyn std::error::Error>> {
    let binary_path = std::env::current_exe()?
        .canonicalize()?
        .to_string_lossy()
        .to_string();

    let cwd = std::env::current_dir()?;

    let has_claude = which("claude");
    let has_codex = which("codex");

    if !has_claude && !has_codex {
        eprintln!("Neither `claude` nor `codex` found in PATH.");
        eprintln!("Install Claude Code or OpenAI Codex first, then re-run `fablemap-mcp init`.");
        std::process::exit(1);
    }

    if has_claude {
        init_claude_code(&cwd, &binary_path)?;
    }
    if has_codex {
        init_codex(&cwd, &binary_path)?;
    }

    let tools: Vec<&str> = [
        has_claude.then_some("Claude Code"),
        has_codex.then_some("Codex"),
    ]
    .into_iter()
    .flatten()
    .collect();
    eprintln!("\nDone. {} will use fablemap in this project.", tools.join(" and "));

    Ok(())
}

fn which(name: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| {
                dir.join(name).is_file() || dir.join(format!("{name}.exe")).is_file()
            })
        })
        .unwrap_or(false)
}

fn claude_config(existing: Option<&str>, binary_path: &str) -> serde_json::Value {
    let mut root: serde_json::Value = existing
        .and_then(|s| serde_json::from_str(s).ok())
        .filter(|v: &serde_json::Value| v.is_object())
        .unwrap_or_else(|| serde_json::json!({}));

    if !root.get("mcpServers").is_some_and(|v| v.is_object()) {
        root["mcpServers"] = serde_json::json!({});
    }
    root["mcpServers"]["fablemap"] = serde_json::json!({
        "type": "stdio",
        "command": binary_path,
        "args": [],
    });
    root
}

fn codex_config(existing: Option<&str>, binary_path: &str) -> toml_edit::DocumentMut {
    let mut doc: toml_edit::DocumentMut = existing
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();

    if !doc.contains_table("mcp_servers") {
        doc["mcp_servers"] = toml_edit::Item::Table(toml_edit::Table::new());
    }

    let mut server = toml_edit::Table::new();
    server.insert("command", toml_edit::value(binary_path));
    server.insert("args", toml_edit::value(toml_edit::Array::new()));
    doc["mcp_servers"]["fablemap"] = toml_edit::Item::Table(server);
    doc
}

/// Write .mcp.json for Claude Code, merging with any existing config.
fn init_claude_code(
    cwd: &std::path::Path,
    binary_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mcp_json_path = cwd.join(".mcp.json");
    let existing = std::fs::read_to_string(&mcp_json_path).ok();
    let root = claude_config(existing.as_deref(), binary_path);

    std::fs::write(&mcp_json_path, serde_json::to_string_pretty(&root)?)?;
    eprintln!("Wrote {}", mcp_json_path.display());
    Ok(())
}

/// Write .codex/config.toml for OpenAI Codex, merging with any existing config.
fn init_codex(
    cwd: &std::path::Path,
    binary_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let codex_dir = cwd.join(".codex");
    let config_toml_path = codex_dir.join("config.toml");
    let existing = std::fs::read_to_string(&config_toml_path).ok();
    let doc = codex_config(existing.as_deref(), binary_path);

    std::fs::create_dir_all(&codex_dir)?;
    std::fs::write(&config_toml_path, doc.to_string())?;
    eprintln!("Wrote {}", config_toml_path.display());
    Ok(())
}
