//! Report execution engine
//!
//! Compiles a report configuration into source queries, fans out with
//! bounded parallelism, applies derived-column calculations, and caches the
//! merged pre-pagination result. Per execution the flow is: cache check
//! (unless force-refreshed), then fetch, calculate, cache, and finally the
//! caller-facing pagination/limit slice on top of the full result.

use super::aggregator::{fetch_all, SourceRegistry};
use super::cache::{cache_key, CacheConfig, ReportCache};
use super::calc;
use super::source::DataSource;
use crate::error::EngineResult;
use crate::types::{
    ExecuteOptions, ExecutionStats, OrgContext, PageInfo, QueryComplexity, ReportRef,
    ReportResult, Row,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// The report execution engine: a source registry plus one process-wide
/// result cache. Construct one per process/service.
pub struct ReportEngine {
    registry: SourceRegistry,
    cache: ReportCache,
}

impl ReportEngine {
    pub fn new(cache_config: CacheConfig) -> Self {
        Self {
            registry: SourceRegistry::new(),
            cache: ReportCache::new(cache_config),
        }
    }

    /// Register a data source under `name`; `label` becomes the
    /// `record_source` tag on its rows
    pub fn register_source(
        &mut self,
        name: impl Into<String>,
        label: impl Into<String>,
        source: Arc<dyn DataSource>,
    ) {
        self.registry.register(name, label, source);
    }

    /// The engine's result cache, exposed for invalidation and monitoring
    pub fn cache(&self) -> &ReportCache {
        &self.cache
    }

    /// Execute a report: fetch, calculate, cache, paginate.
    ///
    /// Partial source failures are absorbed (best-effort union); only a
    /// configuration error fails the call.
    pub async fn execute(
        &self,
        report: &ReportRef,
        org: &OrgContext,
        options: &ExecuteOptions,
    ) -> EngineResult<ReportResult> {
        let start = Instant::now();
        let config = &report.config;

        let key = cache_key(config, org)?;
        let mut cache_hit = false;
        let mut rows: Option<Vec<Row>> = None;

        if options.use_cache && !options.force_refresh {
            debug!(report_id = %report.id, "cache check");
            if let Some(cached) = self.cache.get(&key) {
                debug!(report_id = %report.id, rows = cached.len(), "cache hit");
                cache_hit = true;
                rows = Some(cached);
            }
        }

        let full_rows = match rows {
            Some(rows) => rows,
            None => {
                debug!(report_id = %report.id, "fetching");
                // Pagination is pushed down to the sources only when the
                // result will not be cached; a cached result must be the
                // pre-pagination superset
                let fetched =
                    fetch_all(&self.registry, config, org, !options.use_cache).await?;

                debug!(
                    report_id = %report.id,
                    rows = fetched.rows.len(),
                    processing_time_ms = fetched.processing_time_ms,
                    "calculating"
                );
                let calculated = match &config.calculations {
                    Some(calcs) => calc::apply(fetched.rows, calcs),
                    None => fetched.rows,
                };

                if options.use_cache {
                    debug!(report_id = %report.id, "caching");
                    let ttl = config.caching.as_ref().map(|c| c.ttl);
                    self.cache.set(&key, &calculated, ttl);
                }
                calculated
            }
        };

        // Pagination and limit apply on top of the full result
        let total_count = full_rows.len();
        let mut data = full_rows;
        let mut page = None;

        if let Some(p) = &config.pagination {
            // When the slice was pushed down to the sources the full result
            // set was never materialized, so no honest totals exist and no
            // page info is attached
            if options.use_cache {
                let offset = p.page.saturating_sub(1) * p.limit;
                data = data.into_iter().skip(offset).take(p.limit).collect();
                page = Some(PageInfo {
                    page: p.page,
                    limit: p.limit,
                    total_count,
                    has_next_page: p.page * p.limit < total_count,
                });
            }
        }
        if let Some(limit) = options.limit {
            data.truncate(limit);
        }

        let bytes_processed = serde_json::to_vec(&data).map(|b| b.len()).unwrap_or(0);
        let stats = ExecutionStats {
            execution_time_ms: start.elapsed().as_millis() as u64,
            row_count: data.len(),
            cache_hit,
            query_complexity: QueryComplexity::estimate(config),
            data_sources_used: config.data_sources.clone(),
            bytes_processed,
            parallelism_used: config.data_sources.len() > 1,
        };

        // Append-only execution-log record, never read back by the engine
        info!(
            report_id = %report.id,
            row_count = stats.row_count,
            execution_time_ms = stats.execution_time_ms,
            cache_hit = stats.cache_hit,
            bytes_processed = stats.bytes_processed,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "report execution complete"
        );

        Ok(ReportResult { data, stats, page })
    }
}
