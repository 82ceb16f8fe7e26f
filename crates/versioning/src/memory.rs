//! In-memory snapshot store.
//!
//! Intended for tests/dev. Not optimized for performance.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use labtrace_core::ProjectId;

use crate::node::{NewSnapshot, ProjectStateNode, StateId};
use crate::store::{SnapshotStore, SnapshotStoreError};

#[derive(Debug, Default)]
struct Inner {
    // Nodes are kept per project, ordered by insertion (state_id order).
    projects: HashMap<ProjectId, Vec<ProjectStateNode>>,
    next_state_id: i64,
}

/// In-memory implementation of [`SnapshotStore`].
#[derive(Debug)]
pub struct InMemorySnapshotStore {
    inner: RwLock<Inner>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                projects: HashMap::new(),
                next_state_id: 1,
            }),
        }
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_poisoned() -> SnapshotStoreError {
    SnapshotStoreError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn insert(&self, snapshot: NewSnapshot) -> Result<ProjectStateNode, SnapshotStoreError> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;

        let state_id = StateId(inner.next_state_id);
        inner.next_state_id += 1;

        let nodes = inner.projects.entry(snapshot.project_id).or_default();

        // Flip the previous active flag and insert in the same lock section:
        // no reader ever observes zero or two active nodes.
        for node in nodes.iter_mut() {
            node.is_active = false;
        }

        let node = ProjectStateNode {
            state_id,
            project_id: snapshot.project_id,
            parent_state_id: snapshot.parent_state_id,
            version_number: snapshot.version_number,
            processing_type: snapshot.processing_type,
            data: snapshot.data,
            timestamp: Utc::now(),
            description: snapshot.description,
            is_active: true,
        };
        nodes.push(node.clone());

        Ok(node)
    }

    async fn activate(
        &self,
        project_id: ProjectId,
        state_id: StateId,
    ) -> Result<(), SnapshotStoreError> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;

        let nodes = inner
            .projects
            .get_mut(&project_id)
            .ok_or(SnapshotStoreError::NotFound {
                project_id,
                state_id,
            })?;

        if !nodes.iter().any(|n| n.state_id == state_id) {
            return Err(SnapshotStoreError::NotFound {
                project_id,
                state_id,
            });
        }

        for node in nodes.iter_mut() {
            node.is_active = node.state_id == state_id;
        }

        Ok(())
    }

    async fn get(
        &self,
        project_id: ProjectId,
        state_id: StateId,
    ) -> Result<Option<ProjectStateNode>, SnapshotStoreError> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;

        Ok(inner
            .projects
            .get(&project_id)
            .and_then(|nodes| nodes.iter().find(|n| n.state_id == state_id))
            .cloned())
    }

    async fn active(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<ProjectStateNode>, SnapshotStoreError> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;

        let Some(nodes) = inner.projects.get(&project_id) else {
            return Ok(None);
        };

        let mut actives = nodes.iter().filter(|n| n.is_active);
        let first = actives.next();
        if actives.next().is_some() {
            return Err(SnapshotStoreError::Corruption(format!(
                "project {project_id} has more than one active node"
            )));
        }

        Ok(first.cloned())
    }

    async fn list(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<ProjectStateNode>, SnapshotStoreError> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;

        Ok(inner.projects.get(&project_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labtrace_core::ProcessingType;
    use serde_json::json;

    fn snapshot(project_id: ProjectId, parent: Option<StateId>, version: u32) -> NewSnapshot {
        NewSnapshot {
            project_id,
            parent_state_id: parent,
            version_number: version,
            processing_type: ProcessingType::Import,
            data: json!({"rows": []}),
            description: None,
        }
    }

    #[tokio::test]
    async fn insert_assigns_monotonic_ids_and_flips_active() {
        let store = InMemorySnapshotStore::new();
        let project = ProjectId::new();

        let a = store.insert(snapshot(project, None, 1)).await.unwrap();
        let b = store
            .insert(snapshot(project, Some(a.state_id), 2))
            .await
            .unwrap();

        assert!(a.state_id < b.state_id);

        let nodes = store.list(project).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes.iter().filter(|n| n.is_active).count(), 1);
        assert_eq!(store.active(project).await.unwrap().unwrap().state_id, b.state_id);
    }

    #[tokio::test]
    async fn activate_moves_the_active_flag() {
        let store = InMemorySnapshotStore::new();
        let project = ProjectId::new();

        let a = store.insert(snapshot(project, None, 1)).await.unwrap();
        let b = store
            .insert(snapshot(project, Some(a.state_id), 2))
            .await
            .unwrap();

        store.activate(project, a.state_id).await.unwrap();

        let active = store.active(project).await.unwrap().unwrap();
        assert_eq!(active.state_id, a.state_id);
        assert!(!store.get(project, b.state_id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn activate_unknown_state_is_not_found() {
        let store = InMemorySnapshotStore::new();
        let project = ProjectId::new();
        store.insert(snapshot(project, None, 1)).await.unwrap();

        let err = store.activate(project, StateId(999)).await.unwrap_err();
        assert!(matches!(err, SnapshotStoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn nodes_are_scoped_to_their_project() {
        let store = InMemorySnapshotStore::new();
        let p1 = ProjectId::new();
        let p2 = ProjectId::new();

        let a = store.insert(snapshot(p1, None, 1)).await.unwrap();

        assert!(store.get(p2, a.state_id).await.unwrap().is_none());
        assert!(store.active(p2).await.unwrap().is_none());
    }
}
