//! Calculation engine
//!
//! Applies derived-column definitions to the merged row set. A failure in
//! one calculation for one row yields null for that cell and never aborts
//! other rows or specs.

use crate::formula::{evaluate, Bindings};
use crate::types::{coerce_number, CalculationSpec, CalculationType, Row};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Apply every calculation spec to every row, in row order.
///
/// `running_total` needs the ordered row context, which is why this runs
/// over the whole row set sequentially rather than per-row in parallel.
pub fn apply(rows: Vec<Row>, calculations: &[CalculationSpec]) -> Vec<Row> {
    if calculations.is_empty() {
        return rows;
    }

    // One accumulator per running-total spec, keyed by spec id
    let mut running: HashMap<&str, f64> = HashMap::new();

    rows.into_iter()
        .map(|mut row| {
            for calc in calculations {
                let cell = evaluate_calculation(calc, &row, &mut running);
                row.insert(calc.id.clone(), cell);
            }
            row
        })
        .collect()
}

// The accumulator map borrows its keys from the spec slice, so the spec
// reference must carry the map's key lifetime
fn evaluate_calculation<'a>(
    calc: &'a CalculationSpec,
    row: &Row,
    running: &mut HashMap<&'a str, f64>,
) -> Value {
    match calc.calc_type {
        CalculationType::Formula => {
            let bindings: Bindings = row
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            match evaluate(&calc.expression, &bindings) {
                Ok(n) => number(n),
                Err(err) => {
                    debug!(calculation = %calc.id, error = %err, "formula cell failed");
                    Value::Null
                }
            }
        }

        CalculationType::Percentage => {
            let num = dependency(calc, row, 0);
            let denom = dependency(calc, row, 1);
            if denom == 0.0 {
                number(0.0)
            } else {
                number((num / denom) * 100.0)
            }
        }

        CalculationType::Difference => {
            number(dependency(calc, row, 0) - dependency(calc, row, 1))
        }

        CalculationType::RunningTotal => {
            let total = running.entry(calc.id.as_str()).or_insert(0.0);
            *total += dependency(calc, row, 0);
            number(*total)
        }
    }
}

/// Resolve the Nth dependency column for a row, coerced to a number.
/// Missing dependency names and non-numeric cells coerce to 0.
fn dependency(calc: &CalculationSpec, row: &Row, index: usize) -> f64 {
    calc.dependencies
        .get(index)
        .and_then(|name| row.get(name))
        .map(coerce_number)
        .unwrap_or(0.0)
}

/// f64 -> JSON number; non-finite results become null
fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
