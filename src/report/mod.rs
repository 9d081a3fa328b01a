//! Report execution engine
//!
//! Compiles a declarative report configuration into queries over several
//! heterogeneous data sources, runs them with bounded parallelism, applies
//! derived-column calculations, and caches results under a memory budget
//! with TTL- and size-based eviction.

pub mod aggregator;
pub mod cache;
pub mod calc;
pub mod compiler;
pub mod executor;
pub mod source;

pub use aggregator::{AggregatedRows, SourceRegistry, MAX_CONCURRENT_SOURCES};
pub use cache::{cache_key, CacheConfig, ReportCache};
pub use compiler::{compile, CompiledQuery, SourcePredicate, SourceSort};
pub use executor::ReportEngine;
pub use source::{DataSource, MemorySource, SourceQuery, SourceQueryError};
