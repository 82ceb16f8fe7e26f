//! `labtrace-processing` — measurement tables, correction calculators, and the
//! job executors that wire them into the queue.
//!
//! Snapshot payloads are measurement tables in the instrument export shape:
//! metadata columns (`Solution Label`, `Type`, `Act Wgt`, `Act Vol`, `DF`)
//! plus one numeric column per reported element. Calculators are pure
//! functions over [`Table`]; all I/O lives in the executors.

pub mod corrections;
pub mod error;
pub mod executors;
pub mod parser;
pub mod table;

pub use corrections::{
    CrmCheckParams, DfParams, DriftParams, EditParams, ManualEdit, OptimizationParams,
    VolumeParams, WeightParams,
};
pub use error::ProcessingError;
pub use executors::{standard_registry, CorrectionExecutor, ImportExecutor};
pub use parser::{JsonLinesParser, RowParser};
pub use table::{columns, Row, Table};
