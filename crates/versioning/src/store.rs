//! Durable snapshot storage abstraction.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use labtrace_core::ProjectId;

use crate::node::{NewSnapshot, ProjectStateNode, StateId};

/// Snapshot store error.
#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    #[error("snapshot not found: project {project_id} state {state_id}")]
    NotFound {
        project_id: ProjectId,
        state_id: StateId,
    },

    /// Persisted tree state contradicts an invariant (e.g. two active nodes).
    /// Never repaired by the store; surfaced for operator attention.
    #[error("snapshot store corruption: {0}")]
    Corruption(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Append-only storage of project snapshot nodes.
///
/// Implementations must provide two atomic operations:
///
/// - `insert`: assign the next `state_id`, persist the node with
///   `is_active = true`, and clear the previous active flag for the project in
///   the same atomic step — no observer may ever see zero or two active nodes.
/// - `activate`: flip the active flag from the current node to the target in
///   one atomic step.
///
/// Nodes are never mutated or deleted after insert; corrections are always
/// expressed as new nodes. Tree semantics (parent selection, branch creation,
/// invariant checks) belong to [`crate::tree::VersionTree`], not here.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a new node, assigning its `state_id` and making it the
    /// project's active node atomically.
    async fn insert(&self, snapshot: NewSnapshot) -> Result<ProjectStateNode, SnapshotStoreError>;

    /// Atomically make `state_id` the project's active node.
    async fn activate(
        &self,
        project_id: ProjectId,
        state_id: StateId,
    ) -> Result<(), SnapshotStoreError>;

    /// Fetch one node. `Ok(None)` if the node does not exist *for this
    /// project* (a node belonging to another project is not visible).
    async fn get(
        &self,
        project_id: ProjectId,
        state_id: StateId,
    ) -> Result<Option<ProjectStateNode>, SnapshotStoreError>;

    /// The project's active node, if the project has any nodes.
    /// Fails with `Corruption` if more than one node is flagged active.
    async fn active(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<ProjectStateNode>, SnapshotStoreError>;

    /// All nodes for a project, ordered by `state_id`.
    async fn list(&self, project_id: ProjectId)
    -> Result<Vec<ProjectStateNode>, SnapshotStoreError>;
}

#[async_trait]
impl<S> SnapshotStore for Arc<S>
where
    S: SnapshotStore + ?Sized,
{
    async fn insert(&self, snapshot: NewSnapshot) -> Result<ProjectStateNode, SnapshotStoreError> {
        (**self).insert(snapshot).await
    }

    async fn activate(
        &self,
        project_id: ProjectId,
        state_id: StateId,
    ) -> Result<(), SnapshotStoreError> {
        (**self).activate(project_id, state_id).await
    }

    async fn get(
        &self,
        project_id: ProjectId,
        state_id: StateId,
    ) -> Result<Option<ProjectStateNode>, SnapshotStoreError> {
        (**self).get(project_id, state_id).await
    }

    async fn active(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<ProjectStateNode>, SnapshotStoreError> {
        (**self).active(project_id).await
    }

    async fn list(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<ProjectStateNode>, SnapshotStoreError> {
        (**self).list(project_id).await
    }
}
