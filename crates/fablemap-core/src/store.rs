//! Holds the current map snapshot and a short audit trail of prior ones.
//!
//! Every mutation goes through [`MapStore::apply`], so local edits and AI
//! batches are serialized through one entry point. History is capped and
//! is not an undo log: entries are snapshots you can jump back to.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{compute_layout, engine, Instruction, MapViewData};

pub const HISTORY_LIMIT: usize = 15;

/// Who produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    User,
    Ai,
    Layout,
    Reset,
    Restore,
}

/// The snapshot as it was *before* a change, plus what caused the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub origin: Origin,
    pub applied_at_ms: u64,
    pub instruction_count: usize,
    pub snapshot: MapViewData,
}

#[derive(Debug, Clone, Default)]
pub struct MapStore {
    current: MapViewData,
    history: VecDeque<HistoryEntry>,
}

impl MapStore {
    pub fn new(initial: MapViewData) -> Self {
        Self {
            current: initial,
            history: VecDeque::new(),
        }
    }

    pub fn current(&self) -> &MapViewData {
        &self.current
    }

    /// Most recent first.
    pub fn history(&self) -> Vec<&HistoryEntry> {
        self.history.iter().collect()
    }

    /// Run a batch through the engine. Returns true when the map changed;
    /// batches that change nothing leave no history entry.
    pub fn apply(&mut self, instructions: &[Instruction], origin: Origin) -> bool {
        let next = engine::apply(&self.current, instructions);
        if next == self.current {
            return false;
        }
        self.replace(next, origin, instructions.len());
        true
    }

    /// Lay the whole map out again.
    pub fn auto_layout(&mut self) -> bool {
        let ins = compute_layout(&self.current.nodes, &self.current.scopes, &self.current.edges);
        self.apply(&ins, Origin::Layout)
    }

    /// Swap in a whole new snapshot.
    pub fn reset(&mut self, snapshot: MapViewData) {
        if snapshot != self.current {
            self.replace(snapshot, Origin::Reset, 0);
        }
    }

    /// Jump back to history entry `index` (0 = most recent). The state being
    /// left behind is itself recorded, so a restore can be undone the same way.
    pub fn restore(&mut self, index: usize) -> Option<&MapViewData> {
        let snapshot = self.history.get(index)?.snapshot.clone();
        self.replace(snapshot, Origin::Restore, 0);
        Some(&self.current)
    }

    /// Focus is view state and does not enter history.
    pub fn set_focus(&mut self, id: Option<String>) {
        self.current.focus_id = id.filter(|id| self.current.contains_id(id));
    }

    fn replace(&mut self, next: MapViewData, origin: Origin, instruction_count: usize) {
        let previous = std::mem::replace(&mut self.current, next);
        self.history.push_front(HistoryEntry {
            origin,
            applied_at_ms: now_ms(),
            instruction_count,
            snapshot: previous,
        });
        self.history.truncate(HISTORY_LIMIT);
        info!(?origin, instruction_count, history = self.history.len(), "map updated");
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
