//! Parallel data aggregator
//!
//! Fans out to the configured data sources with bounded concurrency, merges
//! their rows into one tabular shape tagged by source. Sources are queried
//! in chunks of at most three in-flight queries; a chunk must fully settle
//! before the next begins, bounding peak load on the external store.
//!
//! Failure policy: a failing source contributes zero rows and is logged; it
//! never aborts siblings. The merged result is a best-effort union.
//!
//! Ordering: within a chunk, queries complete in any order, but results are
//! concatenated in source-list order after the chunk settles, so repeated
//! runs of the same config produce the same row ordering before any
//! explicit sort.

use super::compiler::compile;
use super::source::{DataSource, SourceQuery};
use crate::error::EngineResult;
use crate::types::{OrgContext, ReportConfig, Row};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Maximum in-flight source queries per chunk
pub const MAX_CONCURRENT_SOURCES: usize = 3;

struct RegisteredSource {
    label: String,
    source: Arc<dyn DataSource>,
}

/// Named data sources available to the engine
#[derive(Default)]
pub struct SourceRegistry {
    entries: HashMap<String, RegisteredSource>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under `name` with a human-readable `label` used
    /// for the `record_source` tag
    pub fn register(
        &mut self,
        name: impl Into<String>,
        label: impl Into<String>,
        source: Arc<dyn DataSource>,
    ) {
        self.entries.insert(
            name.into(),
            RegisteredSource {
                label: label.into(),
                source,
            },
        );
    }

    fn get(&self, name: &str) -> Option<&RegisteredSource> {
        self.entries.get(name)
    }
}

/// The merged pre-calculation row set
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRows {
    pub rows: Vec<Row>,
    pub processing_time_ms: u64,
}

/// Query every configured source and merge the rows.
///
/// `push_pagination` forwards the config's offset/limit slice to each
/// source; the executor enables it only when the result will not be cached
/// (a cached result must be the pre-pagination superset).
pub async fn fetch_all(
    registry: &SourceRegistry,
    config: &ReportConfig,
    org: &OrgContext,
    push_pagination: bool,
) -> EngineResult<AggregatedRows> {
    let start = Instant::now();

    // Compile every source's query up front so configuration errors surface
    // before anything executes
    let mut pending = Vec::with_capacity(config.data_sources.len());
    for name in &config.data_sources {
        let compiled = compile(config, name)?;
        let (offset, limit) = match (push_pagination, &config.pagination) {
            (true, Some(p)) => (Some((p.page.saturating_sub(1)) * p.limit), Some(p.limit)),
            _ => (None, None),
        };
        pending.push((
            name.clone(),
            SourceQuery {
                query: compiled,
                asset_types: config.asset_types.clone(),
                offset,
                limit,
                org: org.clone(),
            },
        ));
    }

    let mut rows = Vec::new();
    for chunk in pending.chunks(MAX_CONCURRENT_SOURCES) {
        // Spawn the whole chunk, then settle it completely before the next
        let mut handles = Vec::with_capacity(chunk.len());
        for (name, request) in chunk {
            let handle = match registry.get(name) {
                Some(registered) => {
                    let source = Arc::clone(&registered.source);
                    let label = registered.label.clone();
                    let request = request.clone();
                    Some((
                        label,
                        tokio::spawn(async move { source.query(&request).await }),
                    ))
                }
                None => {
                    warn!(source = %name, "unknown data source, contributing zero rows");
                    None
                }
            };
            handles.push((name.clone(), handle));
        }

        // Await in source-list order; completion order does not matter
        for (name, handle) in handles {
            let Some((label, handle)) = handle else { continue };
            match handle.await {
                Ok(Ok(source_rows)) => {
                    debug!(source = %name, rows = source_rows.len(), "source query complete");
                    rows.extend(
                        source_rows
                            .into_iter()
                            .map(|row| tag_row(row, &name, &label)),
                    );
                }
                Ok(Err(err)) => {
                    warn!(source = %name, error = %err, "source query failed");
                }
                Err(err) => {
                    warn!(source = %name, error = %err, "source task panicked");
                }
            }
        }
    }

    Ok(AggregatedRows {
        rows,
        processing_time_ms: start.elapsed().as_millis() as u64,
    })
}

/// Tag a row with its source and namespace its column keys so rows from
/// different sources merge without collisions. Keys that already carry a
/// namespace (e.g. joined `asset_types.name` columns) are kept as-is.
fn tag_row(row: Row, source: &str, label: &str) -> Row {
    let mut tagged = Row::new();
    tagged.insert(
        "record_source".to_string(),
        Value::String(label.to_string()),
    );
    for (key, value) in row {
        let namespaced = if key.contains('.') {
            key
        } else {
            format!("{}.{}", source, key)
        };
        tagged.insert(namespaced, value);
    }
    tagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::source::{MemorySource, SourceQueryError};
    use async_trait::async_trait;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn config(sources: &[&str]) -> ReportConfig {
        ReportConfig {
            data_sources: sources.iter().map(|s| s.to_string()).collect(),
            columns: vec![],
            filters: vec![],
            sorts: vec![],
            asset_types: None,
            aggregations: None,
            calculations: None,
            pagination: None,
            caching: None,
        }
    }

    struct FailingSource;

    #[async_trait]
    impl DataSource for FailingSource {
        async fn query(&self, request: &SourceQuery) -> Result<Vec<Row>, SourceQueryError> {
            Err(SourceQueryError::new(
                request.query.source.clone(),
                "connection refused",
            ))
        }
    }

    /// Completes after a delay, to exercise out-of-order completion
    struct SlowSource {
        rows: Vec<Row>,
        delay_ms: u64,
    }

    #[async_trait]
    impl DataSource for SlowSource {
        async fn query(&self, _request: &SourceQuery) -> Result<Vec<Row>, SourceQueryError> {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            Ok(self.rows.clone())
        }
    }

    #[tokio::test]
    async fn test_fetch_all_tags_and_namespaces() {
        let mut registry = SourceRegistry::new();
        registry.register(
            "assets",
            "Assets",
            Arc::new(MemorySource::new(vec![row(&[("name", json!("Drum A"))])])),
        );

        let result = fetch_all(&registry, &config(&["assets"]), &OrgContext::new("org-1"), false)
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0]["record_source"], json!("Assets"));
        assert_eq!(result.rows[0]["assets.name"], json!("Drum A"));
    }

    #[tokio::test]
    async fn test_fetch_all_preserves_existing_namespaces() {
        let mut registry = SourceRegistry::new();
        registry.register(
            "assets",
            "Assets",
            Arc::new(MemorySource::new(vec![row(&[
                ("name", json!("Drum A")),
                ("asset_types.name", json!("Drums")),
            ])])),
        );

        let result = fetch_all(&registry, &config(&["assets"]), &OrgContext::new("org-1"), false)
            .await
            .unwrap();
        assert_eq!(result.rows[0]["asset_types.name"], json!("Drums"));
    }

    #[tokio::test]
    async fn test_fetch_all_stable_source_order() {
        // The slow source finishes last but its rows come first because it
        // is listed first
        let mut registry = SourceRegistry::new();
        registry.register(
            "slow",
            "Slow",
            Arc::new(SlowSource {
                rows: vec![row(&[("id", json!(1))])],
                delay_ms: 50,
            }),
        );
        registry.register(
            "fast",
            "Fast",
            Arc::new(MemorySource::new(vec![row(&[("id", json!(2))])])),
        );

        let result = fetch_all(
            &registry,
            &config(&["slow", "fast"]),
            &OrgContext::new("org-1"),
            false,
        )
        .await
        .unwrap();
        assert_eq!(result.rows[0]["record_source"], json!("Slow"));
        assert_eq!(result.rows[1]["record_source"], json!("Fast"));
    }

    #[tokio::test]
    async fn test_fetch_all_isolates_source_failure() {
        let mut registry = SourceRegistry::new();
        registry.register(
            "a",
            "A",
            Arc::new(MemorySource::new(vec![row(&[("id", json!(1))])])),
        );
        registry.register("b", "B", Arc::new(FailingSource));
        registry.register(
            "c",
            "C",
            Arc::new(MemorySource::new(vec![row(&[("id", json!(3))])])),
        );

        let result = fetch_all(
            &registry,
            &config(&["a", "b", "c"]),
            &OrgContext::new("org-1"),
            false,
        )
        .await
        .unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0]["a.id"], json!(1));
        assert_eq!(result.rows[1]["c.id"], json!(3));
    }

    #[tokio::test]
    async fn test_fetch_all_unknown_source_contributes_zero_rows() {
        let mut registry = SourceRegistry::new();
        registry.register(
            "assets",
            "Assets",
            Arc::new(MemorySource::new(vec![row(&[("id", json!(1))])])),
        );

        let result = fetch_all(
            &registry,
            &config(&["assets", "nonexistent"]),
            &OrgContext::new("org-1"),
            false,
        )
        .await
        .unwrap();
        assert_eq!(result.rows.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_all_more_sources_than_chunk_size() {
        let mut registry = SourceRegistry::new();
        for name in ["s1", "s2", "s3", "s4", "s5"] {
            registry.register(
                name,
                name.to_uppercase(),
                Arc::new(MemorySource::new(vec![row(&[("id", json!(name))])])),
            );
        }

        let result = fetch_all(
            &registry,
            &config(&["s1", "s2", "s3", "s4", "s5"]),
            &OrgContext::new("org-1"),
            false,
        )
        .await
        .unwrap();
        assert_eq!(result.rows.len(), 5);
        // Concatenation follows source-list order across chunk boundaries
        let sources: Vec<_> = result
            .rows
            .iter()
            .map(|r| r["record_source"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(sources, vec!["S1", "S2", "S3", "S4", "S5"]);
    }
}
