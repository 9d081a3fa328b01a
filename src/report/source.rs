//! Data source contract
//!
//! The report engine has no wire protocol of its own; it consumes an
//! external tabular store through this narrow per-source contract. The only
//! capability required of a source is answering a compiled, org-scoped,
//! optionally sliced query with rows.

use super::compiler::CompiledQuery;
use crate::types::{OrgContext, Row};
use async_trait::async_trait;

/// One query against one data source: the compiled predicate/sort set for
/// that source, optional asset-type restriction, optional offset/limit
/// slice, and the organization scope.
#[derive(Debug, Clone)]
pub struct SourceQuery {
    pub query: CompiledQuery,
    pub asset_types: Option<Vec<String>>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub org: OrgContext,
}

/// A data source failed; isolated per source, never aborts siblings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQueryError {
    pub source: String,
    pub message: String,
}

impl SourceQueryError {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SourceQueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Source '{}' failed: {}", self.source, self.message)
    }
}

impl std::error::Error for SourceQueryError {}

/// A named, queryable collection of rows.
///
/// Implementations must not share mutable state with the engine: each call
/// is an independent unit of work that a harness can wrap in a timeout
/// without corrupting anything.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Answer a filtered/sorted/sliced query with bare-keyed rows.
    /// Namespacing and source tagging happen in the aggregator.
    async fn query(&self, request: &SourceQuery) -> Result<Vec<Row>, SourceQueryError>;
}

/// In-memory data source backed by a fixed row set.
///
/// Applies the compiled predicates, asset-type restriction, sorts, and
/// slice locally. Used in tests and by embedders that load rows themselves.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    rows: Vec<Row>,
    /// Row key holding the asset-type id, if this source supports the
    /// asset-type restriction
    asset_type_field: Option<String>,
    /// Row key holding the organization id; rows are org-filtered when set
    org_field: Option<String>,
}

impl MemorySource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            asset_type_field: None,
            org_field: None,
        }
    }

    pub fn with_asset_type_field(mut self, field: impl Into<String>) -> Self {
        self.asset_type_field = Some(field.into());
        self
    }

    pub fn with_org_field(mut self, field: impl Into<String>) -> Self {
        self.org_field = Some(field.into());
        self
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn query(&self, request: &SourceQuery) -> Result<Vec<Row>, SourceQueryError> {
        let mut rows: Vec<Row> = self
            .rows
            .iter()
            .filter(|row| {
                if let Some(org_field) = &self.org_field {
                    let matches_org = row
                        .get(org_field)
                        .and_then(|v| v.as_str())
                        .is_some_and(|id| id == request.org.organization_id);
                    if !matches_org {
                        return false;
                    }
                }
                if let (Some(type_field), Some(allowed)) =
                    (&self.asset_type_field, &request.asset_types)
                {
                    let matches_type = row
                        .get(type_field)
                        .and_then(|v| v.as_str())
                        .is_some_and(|id| allowed.iter().any(|a| a == id));
                    if !matches_type {
                        return false;
                    }
                }
                request.query.matches(row)
            })
            .cloned()
            .collect();

        request.query.sort_rows(&mut rows);

        if let Some(offset) = request.offset {
            rows = rows.into_iter().skip(offset).collect();
        }
        if let Some(limit) = request.limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }
}
