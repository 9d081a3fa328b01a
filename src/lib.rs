//! Tallykit - formula and report execution engine for dynamic inventory fields
//!
//! This library provides the calculation core of a forms-driven inventory
//! tracker: a formula expression engine over user-defined `{field_id}`
//! references, and a report execution engine that compiles a declarative
//! report configuration into queries over several data sources, runs them
//! with bounded parallelism, derives computed columns, and caches the
//! merged results under a memory budget.
//!
//! # Features
//!
//! - Arithmetic formulas with `{field_id}` references and a whitelisted
//!   function library (no host code execution)
//! - Keystroke-friendly validation: errors are values, returned inline
//! - Declarative filter/sort rules compiled per data source
//! - Chunked parallel fan-out (max 3 in-flight sources) with per-source
//!   failure isolation
//! - Derived columns: formula, percentage, difference, running total
//! - TTL- and size-bounded result cache keyed by a canonical config hash
//!
//! # Example
//!
//! ```
//! use tallykit::formula::{evaluate, Bindings};
//! use serde_json::json;
//!
//! let mut bindings = Bindings::new();
//! bindings.insert("Drum_Inches".to_string(), json!(12));
//! bindings.insert("Conversion_Rate".to_string(), json!(2.5));
//!
//! let gallons = evaluate("{Drum_Inches} * {Conversion_Rate}", &bindings)?;
//! assert_eq!(gallons, 30.0);
//! # Ok::<(), tallykit::formula::EvalError>(())
//! ```

pub mod error;
pub mod formula;
pub mod report;
pub mod types;

// Re-export commonly used types
pub use error::{EngineError, EngineResult};
pub use formula::{evaluate, extract_references, validate, Bindings, EvalError};
pub use report::{CacheConfig, DataSource, MemorySource, ReportEngine};
pub use types::{
    ExecuteOptions, ExecutionStats, OrgContext, ReportConfig, ReportRef, ReportResult, Row,
};
