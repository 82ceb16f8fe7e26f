//! `labtrace-core` — shared domain primitives.
//!
//! Strongly-typed identifiers, the domain error model, and the closed set of
//! processing types. No infrastructure concerns live here.

pub mod error;
pub mod id;
pub mod processing;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, OperationId, ProjectId};
pub use processing::ProcessingType;
