use serde::{Deserialize, Serialize};
use serde_json::Value;

//==============================================================================
// Fields
//==============================================================================

/// The type of a user-defined field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Number,
    Text,
    Date,
    Boolean,
    Select,
}

/// A dynamic, user-defined field addressable inside a formula
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

//==============================================================================
// Report Configuration
//==============================================================================

/// Immutable description of what to fetch, filter, sort, compute, and cache.
///
/// Never mutated after construction; a new config is a new cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(rename = "dataSources")]
    pub data_sources: Vec<String>,
    pub columns: Vec<String>,
    #[serde(default)]
    pub filters: Vec<FilterRule>,
    #[serde(default)]
    pub sorts: Vec<SortRule>,
    /// Optional restriction to a set of asset-type ids
    #[serde(rename = "assetTypes", skip_serializing_if = "Option::is_none")]
    pub asset_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<Vec<AggregationSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculations: Option<Vec<CalculationSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caching: Option<CachingConfig>,
}

/// Filter operators supported by the filter/sort compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    Between,
    IsNull,
    IsNotNull,
}

/// A declarative filter rule; `field` is namespaced as `"<source>.<field>"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(rename = "secondValue", skip_serializing_if = "Option::is_none")]
    pub second_value: Option<Value>,
    #[serde(rename = "caseSensitive", skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A declarative sort rule; rules apply in array order (stable multi-key)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortRule {
    pub field: String,
    pub direction: SortDirection,
    #[serde(rename = "nullsFirst", skip_serializing_if = "Option::is_none")]
    pub nulls_first: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationType {
    Formula,
    Percentage,
    Difference,
    RunningTotal,
}

/// A derived-column definition applied to the merged row set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationSpec {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub expression: String,
    #[serde(rename = "type")]
    pub calc_type: CalculationType,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationFunction {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    Median,
    Stddev,
}

/// Aggregation request carried by the config (hashed and complexity-scored)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub field: String,
    pub function: AggregationFunction,
    pub alias: String,
    #[serde(rename = "groupBy", skip_serializing_if = "Option::is_none")]
    pub group_by: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationConfig {
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachingConfig {
    pub enabled: bool,
    /// Time-to-live in seconds
    pub ttl: u64,
}

//==============================================================================
// Execution
//==============================================================================

/// Organization scope applied to every data-source query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgContext {
    pub organization_id: String,
}

impl OrgContext {
    pub fn new(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
        }
    }
}

/// Identifies a report execution (config plus the id used in the run log)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRef {
    pub id: String,
    pub config: ReportConfig,
}

/// Per-call execution options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecuteOptions {
    /// Truncate the returned rows to at most this many
    pub limit: Option<usize>,
    pub use_cache: bool,
    /// Skip the cache check and fetch fresh (result is still cached)
    pub force_refresh: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            limit: None,
            use_cache: true,
            force_refresh: false,
        }
    }
}

/// A merged result row: namespaced column keys plus `record_source`
pub type Row = serde_json::Map<String, Value>;

/// Heuristic complexity score over a report configuration's shape.
///
/// Observability only; never changes execution behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryComplexity {
    Low,
    Medium,
    High,
    Extreme,
}

impl QueryComplexity {
    pub fn estimate(config: &ReportConfig) -> Self {
        let mut score = config.data_sources.len() * 10;
        score += config.columns.len() * 2;
        score += config.filters.len() * 5;
        score += config.sorts.len() * 3;
        score += config.aggregations.as_ref().map_or(0, |a| a.len()) * 15;
        score += config.calculations.as_ref().map_or(0, |c| c.len()) * 10;

        match score {
            0..=29 => QueryComplexity::Low,
            30..=69 => QueryComplexity::Medium,
            70..=149 => QueryComplexity::High,
            _ => QueryComplexity::Extreme,
        }
    }
}

/// Produced once per execution and attached to the result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    #[serde(rename = "executionTimeMs")]
    pub execution_time_ms: u64,
    #[serde(rename = "rowCount")]
    pub row_count: usize,
    #[serde(rename = "cacheHit")]
    pub cache_hit: bool,
    #[serde(rename = "queryComplexity")]
    pub query_complexity: QueryComplexity,
    #[serde(rename = "dataSourcesUsed")]
    pub data_sources_used: Vec<String>,
    #[serde(rename = "bytesProcessed")]
    pub bytes_processed: usize,
    #[serde(rename = "parallelismUsed")]
    pub parallelism_used: bool,
}

/// Pagination info attached to a paginated result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub page: usize,
    pub limit: usize,
    #[serde(rename = "totalCount")]
    pub total_count: usize,
    #[serde(rename = "hasNextPage")]
    pub has_next_page: bool,
}

/// The outcome of one report execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportResult {
    pub data: Vec<Row>,
    pub stats: ExecutionStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<PageInfo>,
}

//==============================================================================
// Value coercion
//==============================================================================

/// Coerce a cell value to a number: numbers pass through, numeric-looking
/// strings parse, booleans map to 1/0, everything else (including null and
/// missing) is 0.
pub fn coerce_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Render a cell value as plain text (strings unquoted) for substring and
/// equality filter tests
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
