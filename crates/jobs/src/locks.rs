//! Per-project execution locks.
//!
//! Guarantees at most one job mutates a given project's version tree at a
//! time. The busy set is consulted during claim (under the pool's claim
//! mutex), so two workers can never hold jobs for the same project.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use labtrace_core::ProjectId;

/// Registry of projects currently being worked on.
#[derive(Debug, Clone, Default)]
pub struct ProjectLocks {
    busy: Arc<Mutex<HashSet<ProjectId>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of busy projects, for the claim query.
    pub fn busy_projects(&self) -> Vec<ProjectId> {
        self.busy
            .lock()
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Mark a project busy for the lifetime of the returned guard.
    ///
    /// Jobs without a project (first import) are exempt: `acquire(None)`
    /// returns a no-op guard. Returns `None` if the project is already busy,
    /// which callers treat as "someone else claimed it first".
    pub fn acquire(&self, project_id: Option<ProjectId>) -> Option<ProjectLockGuard> {
        let Some(project_id) = project_id else {
            return Some(ProjectLockGuard {
                busy: self.busy.clone(),
                project_id: None,
            });
        };

        let mut busy = self.busy.lock().ok()?;
        if !busy.insert(project_id) {
            return None;
        }

        Some(ProjectLockGuard {
            busy: self.busy.clone(),
            project_id: Some(project_id),
        })
    }
}

/// Releases the project on drop.
#[derive(Debug)]
pub struct ProjectLockGuard {
    busy: Arc<Mutex<HashSet<ProjectId>>>,
    project_id: Option<ProjectId>,
}

impl Drop for ProjectLockGuard {
    fn drop(&mut self) {
        if let Some(project_id) = self.project_id {
            if let Ok(mut busy) = self.busy.lock() {
                busy.remove(&project_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_released() {
        let locks = ProjectLocks::new();
        let project = ProjectId::new();

        let guard = locks.acquire(Some(project)).unwrap();
        assert!(locks.acquire(Some(project)).is_none());
        assert_eq!(locks.busy_projects(), vec![project]);

        drop(guard);
        assert!(locks.acquire(Some(project)).is_some());
    }

    #[test]
    fn projectless_jobs_are_exempt() {
        let locks = ProjectLocks::new();
        let a = locks.acquire(None).unwrap();
        let b = locks.acquire(None).unwrap();
        drop((a, b));
        assert!(locks.busy_projects().is_empty());
    }

    #[test]
    fn distinct_projects_do_not_contend() {
        let locks = ProjectLocks::new();
        let g1 = locks.acquire(Some(ProjectId::new())).unwrap();
        let g2 = locks.acquire(Some(ProjectId::new())).unwrap();
        assert_eq!(locks.busy_projects().len(), 2);
        drop((g1, g2));
    }
}
