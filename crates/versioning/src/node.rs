//! Snapshot node types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use labtrace_core::{ProcessingType, ProjectId};

/// Identifier of a snapshot node, assigned monotonically by the store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(pub i64);

impl core::fmt::Display for StateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A snapshot waiting to be persisted (no `state_id` or `version_number` yet).
///
/// The store assigns `state_id` during insert; the tree manager computes the
/// parent and version number. `data` is the full serialized project state and
/// is opaque to this crate — corrections always create new nodes, never edit
/// an existing `data` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSnapshot {
    pub project_id: ProjectId,
    pub parent_state_id: Option<StateId>,
    pub version_number: u32,
    pub processing_type: ProcessingType,
    pub data: JsonValue,
    pub description: Option<String>,
}

/// A persisted node in a project's version tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStateNode {
    pub state_id: StateId,
    pub project_id: ProjectId,
    /// `None` only for a project's root node.
    pub parent_state_id: Option<StateId>,
    /// Per-project counter (display metadata; no invariant depends on it).
    pub version_number: u32,
    pub processing_type: ProcessingType,
    pub data: JsonValue,
    pub timestamp: DateTime<Utc>,
    pub description: Option<String>,
    /// Exactly one node per project is active at any time.
    pub is_active: bool,
}

impl ProjectStateNode {
    pub fn is_root(&self) -> bool {
        self.parent_state_id.is_none()
    }
}
