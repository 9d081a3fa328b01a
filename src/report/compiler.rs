//! Filter/sort compiler
//!
//! Translates the ordered declarative filter/sort rules of a report
//! configuration into a per-source compiled predicate set. Each source
//! compiles only the rules namespaced to it (`"<source>.<field>"`); rules
//! for other sources are ignored by this source's compiler.
//!
//! Configuration errors (a `between` without its second bound, an `in` with
//! a non-array value) surface here, before any query executes.

use crate::error::{EngineError, EngineResult};
use crate::types::{
    coerce_number, value_text, FilterOperator, FilterRule, ReportConfig, Row, SortDirection,
    SortRule,
};
use serde_json::Value;
use std::cmp::Ordering;

/// A single source-query primitive. Field names are bare (source prefix
/// stripped) because the predicate runs inside that source's query.
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePredicate {
    Eq { field: String, value: Value },
    NotEq { field: String, value: Value },
    Gt { field: String, value: Value },
    Lt { field: String, value: Value },
    Contains { field: String, pattern: String, case_sensitive: bool },
    NotContains { field: String, pattern: String, case_sensitive: bool },
    StartsWith { field: String, pattern: String, case_sensitive: bool },
    EndsWith { field: String, pattern: String, case_sensitive: bool },
    In { field: String, values: Vec<Value> },
    NotIn { field: String, values: Vec<Value> },
    Between { field: String, low: Value, high: Value },
    IsNull { field: String },
    IsNotNull { field: String },
}

/// A compiled sort key, applied in rule order (stable multi-key)
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSort {
    pub field: String,
    pub descending: bool,
    /// Per-rule override of the source's default null ordering
    pub nulls_first: Option<bool>,
}

/// The compiled filter/sort set for one data source
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub source: String,
    pub predicates: Vec<SourcePredicate>,
    pub sorts: Vec<SourceSort>,
}

/// Compile the rules relevant to `source` out of a report configuration
pub fn compile(config: &ReportConfig, source: &str) -> EngineResult<CompiledQuery> {
    let prefix = format!("{}.", source);

    let mut predicates = Vec::new();
    for rule in &config.filters {
        if let Some(field) = rule.field.strip_prefix(&prefix) {
            predicates.push(compile_filter(rule, field)?);
        }
    }

    let sorts = config
        .sorts
        .iter()
        .filter_map(|rule| compile_sort(rule, &prefix))
        .collect();

    Ok(CompiledQuery {
        source: source.to_string(),
        predicates,
        sorts,
    })
}

fn compile_filter(rule: &FilterRule, field: &str) -> EngineResult<SourcePredicate> {
    let field = field.to_string();
    let case_sensitive = rule.case_sensitive.unwrap_or(false);
    let pattern = || value_text(&rule.value);

    let predicate = match rule.operator {
        FilterOperator::Equals => SourcePredicate::Eq {
            field,
            value: rule.value.clone(),
        },
        FilterOperator::NotEquals => SourcePredicate::NotEq {
            field,
            value: rule.value.clone(),
        },
        FilterOperator::GreaterThan => SourcePredicate::Gt {
            field,
            value: rule.value.clone(),
        },
        FilterOperator::LessThan => SourcePredicate::Lt {
            field,
            value: rule.value.clone(),
        },
        FilterOperator::Contains => SourcePredicate::Contains {
            field,
            pattern: pattern(),
            case_sensitive,
        },
        FilterOperator::NotContains => SourcePredicate::NotContains {
            field,
            pattern: pattern(),
            case_sensitive,
        },
        FilterOperator::StartsWith => SourcePredicate::StartsWith {
            field,
            pattern: pattern(),
            case_sensitive,
        },
        FilterOperator::EndsWith => SourcePredicate::EndsWith {
            field,
            pattern: pattern(),
            case_sensitive,
        },
        FilterOperator::In | FilterOperator::NotIn => {
            let values = match &rule.value {
                Value::Array(values) => values.clone(),
                _ => {
                    return Err(EngineError::Config(format!(
                        "Filter on '{}': '{}' requires an array value",
                        rule.field,
                        operator_name(rule.operator)
                    )))
                }
            };
            if rule.operator == FilterOperator::In {
                SourcePredicate::In { field, values }
            } else {
                SourcePredicate::NotIn { field, values }
            }
        }
        FilterOperator::Between => {
            let high = rule.second_value.clone().ok_or_else(|| {
                EngineError::Config(format!(
                    "Filter on '{}': 'between' requires secondValue",
                    rule.field
                ))
            })?;
            SourcePredicate::Between {
                field,
                low: rule.value.clone(),
                high,
            }
        }
        FilterOperator::IsNull => SourcePredicate::IsNull { field },
        FilterOperator::IsNotNull => SourcePredicate::IsNotNull { field },
    };

    Ok(predicate)
}

fn operator_name(op: FilterOperator) -> &'static str {
    match op {
        FilterOperator::In => "in",
        FilterOperator::NotIn => "not_in",
        _ => "filter",
    }
}

fn compile_sort(rule: &SortRule, prefix: &str) -> Option<SourceSort> {
    rule.field.strip_prefix(prefix).map(|field| SourceSort {
        field: field.to_string(),
        descending: rule.direction == SortDirection::Desc,
        nulls_first: rule.nulls_first,
    })
}

impl CompiledQuery {
    /// Evaluate every predicate against a row (conjunction).
    ///
    /// This is the in-memory semantics; a remote source maps each predicate
    /// onto its own query primitives instead.
    pub fn matches(&self, row: &Row) -> bool {
        self.predicates.iter().all(|p| p.matches(row))
    }

    /// Stable multi-key sort of rows by the compiled sort rules
    pub fn sort_rows(&self, rows: &mut [Row]) {
        if self.sorts.is_empty() {
            return;
        }
        rows.sort_by(|a, b| {
            for sort in &self.sorts {
                let ordering = sort.compare(a, b);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }
}

impl SourcePredicate {
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            SourcePredicate::Eq { field, value } => {
                cell(row, field).is_some_and(|c| loose_eq(c, value))
            }
            SourcePredicate::NotEq { field, value } => {
                !cell(row, field).is_some_and(|c| loose_eq(c, value))
            }
            SourcePredicate::Gt { field, value } => cell(row, field)
                .and_then(|c| compare_values(c, value))
                .is_some_and(|o| o == Ordering::Greater),
            SourcePredicate::Lt { field, value } => cell(row, field)
                .and_then(|c| compare_values(c, value))
                .is_some_and(|o| o == Ordering::Less),
            SourcePredicate::Contains {
                field,
                pattern,
                case_sensitive,
            } => text_test(row, field, pattern, *case_sensitive, |text, pat| {
                text.contains(pat)
            }),
            SourcePredicate::NotContains {
                field,
                pattern,
                case_sensitive,
            } => !text_test(row, field, pattern, *case_sensitive, |text, pat| {
                text.contains(pat)
            }),
            SourcePredicate::StartsWith {
                field,
                pattern,
                case_sensitive,
            } => text_test(row, field, pattern, *case_sensitive, |text, pat| {
                text.starts_with(pat)
            }),
            SourcePredicate::EndsWith {
                field,
                pattern,
                case_sensitive,
            } => text_test(row, field, pattern, *case_sensitive, |text, pat| {
                text.ends_with(pat)
            }),
            SourcePredicate::In { field, values } => cell(row, field)
                .is_some_and(|c| values.iter().any(|v| loose_eq(c, v))),
            SourcePredicate::NotIn { field, values } => !cell(row, field)
                .is_some_and(|c| values.iter().any(|v| loose_eq(c, v))),
            SourcePredicate::Between { field, low, high } => {
                let Some(c) = cell(row, field) else { return false };
                let ge = compare_values(c, low)
                    .is_some_and(|o| o != Ordering::Less);
                let le = compare_values(c, high)
                    .is_some_and(|o| o != Ordering::Greater);
                ge && le
            }
            SourcePredicate::IsNull { field } => {
                cell(row, field).map_or(true, |c| c.is_null())
            }
            SourcePredicate::IsNotNull { field } => {
                cell(row, field).is_some_and(|c| !c.is_null())
            }
        }
    }
}

impl SourceSort {
    fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let va = cell(a, &self.field).filter(|v| !v.is_null());
        let vb = cell(b, &self.field).filter(|v| !v.is_null());

        match (va, vb) {
            (None, None) => Ordering::Equal,
            // Default null ordering follows the direction (nulls last when
            // ascending, first when descending) unless overridden
            (None, Some(_)) => {
                if self.nulls_first.unwrap_or(self.descending) {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (Some(_), None) => {
                if self.nulls_first.unwrap_or(self.descending) {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (Some(va), Some(vb)) => {
                let ordering = compare_values(va, vb).unwrap_or(Ordering::Equal);
                if self.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            }
        }
    }
}

fn cell<'a>(row: &'a Row, field: &str) -> Option<&'a Value> {
    row.get(field)
}

/// Equality with text fallback so `12` matches `"12"`
fn loose_eq(a: &Value, b: &Value) -> bool {
    a == b || value_text(a) == value_text(b)
}

/// Ordering across value types: numeric when both sides look numeric,
/// lexicographic text otherwise. Nulls never compare.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    let numeric = |v: &Value| matches!(v, Value::Number(_))
        || matches!(v, Value::String(s) if s.trim().parse::<f64>().is_ok());
    if numeric(a) && numeric(b) {
        coerce_number(a).partial_cmp(&coerce_number(b))
    } else {
        Some(value_text(a).cmp(&value_text(b)))
    }
}

fn text_test(
    row: &Row,
    field: &str,
    pattern: &str,
    case_sensitive: bool,
    test: impl Fn(&str, &str) -> bool,
) -> bool {
    let Some(value) = cell(row, field) else { return false };
    if value.is_null() {
        return false;
    }
    let text = value_text(value);
    if case_sensitive {
        test(&text, pattern)
    } else {
        test(&text.to_lowercase(), &pattern.to_lowercase())
    }
}
