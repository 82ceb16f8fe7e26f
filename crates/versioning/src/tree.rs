//! Version tree manager.
//!
//! Sole writer of snapshot nodes. Callers that mutate the same project must
//! serialize externally (the worker pool holds a per-project lock); the
//! manager does not re-derive that lock.

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, info};

use labtrace_core::{ProcessingType, ProjectId};

use crate::node::{NewSnapshot, ProjectStateNode, StateId};
use crate::store::{SnapshotStore, SnapshotStoreError};

/// Version tree operation error.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("state {state_id} not found for project {project_id}")]
    NotFound {
        project_id: ProjectId,
        state_id: StateId,
    },

    /// Tree corruption (two active nodes, a cycle in parent pointers). The
    /// operation aborts without partial writes; never silently repaired.
    #[error("version tree invariant violated: {0}")]
    Invariant(String),

    #[error("snapshot storage failed: {0}")]
    Storage(String),
}

impl From<SnapshotStoreError> for TreeError {
    fn from(err: SnapshotStoreError) -> Self {
        match err {
            SnapshotStoreError::NotFound {
                project_id,
                state_id,
            } => TreeError::NotFound {
                project_id,
                state_id,
            },
            SnapshotStoreError::Corruption(msg) => TreeError::Invariant(msg),
            SnapshotStoreError::Storage(msg) => TreeError::Storage(msg),
        }
    }
}

/// Manages a project's branching snapshot history on top of a [`SnapshotStore`].
#[derive(Debug, Clone)]
pub struct VersionTree<S> {
    store: S,
}

impl<S: SnapshotStore> VersionTree<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Append a new snapshot under the project's current active node.
    ///
    /// The new node becomes active; the previous active node (its parent) is
    /// deactivated in the same atomic store operation. If the active node was
    /// checked out mid-history, the new node is a sibling branch of that
    /// node's existing children.
    pub async fn append(
        &self,
        project_id: ProjectId,
        processing_type: ProcessingType,
        data: JsonValue,
        description: Option<String>,
    ) -> Result<ProjectStateNode, TreeError> {
        let parent = self.store.active(project_id).await.map_err(|e| {
            let e = TreeError::from(e);
            if matches!(e, TreeError::Invariant(_)) {
                error!(%project_id, error = %e, "refusing append on corrupted tree");
            }
            e
        })?;

        // Per-project counter across all branches (display metadata only).
        let next_version = self
            .store
            .list(project_id)
            .await?
            .iter()
            .map(|n| n.version_number)
            .max()
            .unwrap_or(0)
            + 1;

        let node = self
            .store
            .insert(NewSnapshot {
                project_id,
                parent_state_id: parent.map(|p| p.state_id),
                version_number: next_version,
                processing_type,
                data,
                description,
            })
            .await?;

        info!(
            %project_id,
            state_id = %node.state_id,
            version = node.version_number,
            processing_type = %processing_type,
            "appended snapshot"
        );

        Ok(node)
    }

    /// Make an existing node the active one. No new node is created; the next
    /// `append` will branch from here.
    pub async fn checkout(
        &self,
        project_id: ProjectId,
        state_id: StateId,
    ) -> Result<ProjectStateNode, TreeError> {
        let node = self
            .store
            .get(project_id, state_id)
            .await?
            .ok_or(TreeError::NotFound {
                project_id,
                state_id,
            })?;

        self.store.activate(project_id, state_id).await?;

        info!(%project_id, %state_id, version = node.version_number, "checked out snapshot");

        Ok(ProjectStateNode {
            is_active: true,
            ..node
        })
    }

    /// Ancestor path from the root to the active node (inclusive).
    ///
    /// Walks parent pointers over an id index; a visited-set guards against
    /// cycles, which are reported as invariant violations rather than looping.
    pub async fn history(&self, project_id: ProjectId) -> Result<Vec<ProjectStateNode>, TreeError> {
        let Some(active) = self.store.active(project_id).await? else {
            return Ok(Vec::new());
        };

        let index: HashMap<StateId, ProjectStateNode> = self
            .store
            .list(project_id)
            .await?
            .into_iter()
            .map(|n| (n.state_id, n))
            .collect();

        let mut path = Vec::new();
        let mut visited = std::collections::HashSet::new();
        let mut cursor = Some(active.state_id);

        while let Some(state_id) = cursor {
            if !visited.insert(state_id) {
                return Err(TreeError::Invariant(format!(
                    "cycle in parent pointers at state {state_id} for project {project_id}"
                )));
            }
            let node = index.get(&state_id).ok_or_else(|| {
                TreeError::Invariant(format!(
                    "dangling parent pointer to state {state_id} for project {project_id}"
                ))
            })?;
            cursor = node.parent_state_id;
            path.push(node.clone());
        }

        path.reverse();
        Ok(path)
    }

    /// The project's active node. `Ok(None)` when the project has no nodes yet.
    pub async fn active(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<ProjectStateNode>, TreeError> {
        Ok(self.store.active(project_id).await?)
    }

    /// All nodes for a project in `state_id` order, enough to render the
    /// branch graph client-side.
    pub async fn list(&self, project_id: ProjectId) -> Result<Vec<ProjectStateNode>, TreeError> {
        Ok(self.store.list(project_id).await?)
    }
}
