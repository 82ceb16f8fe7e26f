//! Infrastructure layer: Postgres-backed job and snapshot stores.
//!
//! The in-memory stores live next to their traits (`labtrace-jobs`,
//! `labtrace-versioning`); this crate provides the durable adapters used in
//! production deployments.

pub mod postgres;
