//! `labtrace-versioning` — the per-project snapshot version tree.
//!
//! Every processing step appends an immutable snapshot node; nodes form a tree
//! connected by parent references, with exactly one active node per project.
//! The [`VersionTree`] manager owns the tree invariants; [`SnapshotStore`] is
//! dumb durable storage with two atomic primitives (insert, activate).

pub mod memory;
pub mod node;
pub mod store;
pub mod tree;

pub use memory::InMemorySnapshotStore;
pub use node::{NewSnapshot, ProjectStateNode, StateId};
pub use store::{SnapshotStore, SnapshotStoreError};
pub use tree::{TreeError, VersionTree};
