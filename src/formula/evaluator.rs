//! Formula evaluator
//!
//! Evaluates a parsed formula AST against a set of variable bindings to
//! produce an IEEE-754 double. The bindings are the entire environment:
//! no host code execution, no reflection, nothing outside the supplied map.
//! Formula text is user-authored and may be shared across organizations, so
//! this closed grammar is a security boundary.

use super::parser::{parse, Expr};
use super::tokenizer::tokenize;
use crate::types::coerce_number;
use serde_json::Value;
use std::collections::HashMap;

/// Runtime values supplied for field references during evaluation.
///
/// Coercion rule: numbers pass through, numeric-looking strings parse,
/// booleans map to 1/0, everything else (including a missing key) is 0.
pub type Bindings = HashMap<String, Value>;

/// Error during evaluation.
///
/// These are values, not crashes: a formula that divides by zero or calls
/// sqrt on a negative number yields an error marker for that cell only.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Malformed formula (tokenize or parse failure)
    Syntax { message: String, position: usize },
    /// Division or modulo by zero
    DivisionByZero,
    /// Out-of-domain numeric input (e.g., sqrt of a negative)
    NumericDomain(String),
    /// Function name not in the whitelist
    UnknownFunction(String),
    /// Wrong number of arguments for a whitelisted function
    BadArity {
        function: String,
        expected: &'static str,
        got: usize,
    },
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Syntax { message, position } => {
                write!(f, "Syntax error at position {}: {}", position, message)
            }
            EvalError::DivisionByZero => write!(f, "Division by zero"),
            EvalError::NumericDomain(msg) => write!(f, "Numeric domain error: {}", msg),
            EvalError::UnknownFunction(name) => write!(f, "Unknown function: {}", name),
            EvalError::BadArity {
                function,
                expected,
                got,
            } => write!(
                f,
                "Function {} expects {} arguments, got {}",
                function, expected, got
            ),
        }
    }
}

impl std::error::Error for EvalError {}

/// Evaluate a formula string against the given bindings.
///
/// An empty or whitespace-only formula evaluates to 0 so partially typed
/// forms stay computable. Missing field references also resolve to 0
/// (availability over strictness).
pub fn evaluate(formula: &str, bindings: &Bindings) -> Result<f64, EvalError> {
    if formula.trim().is_empty() {
        return Ok(0.0);
    }

    let tokens = tokenize(formula).map_err(|e| EvalError::Syntax {
        message: e.message,
        position: e.position,
    })?;
    if tokens.is_empty() {
        return Ok(0.0);
    }

    let expr = parse(tokens).map_err(|e| EvalError::Syntax {
        message: e.message,
        position: e.position,
    })?;

    evaluate_expr(&expr, bindings)
}

/// Evaluate an already-parsed expression
pub fn evaluate_expr(expr: &Expr, bindings: &Bindings) -> Result<f64, EvalError> {
    match expr {
        Expr::Number(n) => Ok(*n),

        Expr::FieldRef(id) => Ok(resolve_field(id, bindings)),

        Expr::Negate(operand) => Ok(-evaluate_expr(operand, bindings)?),

        Expr::BinaryOp { op, left, right } => {
            let a = evaluate_expr(left, bindings)?;
            let b = evaluate_expr(right, bindings)?;
            apply_operator(*op, a, b)
        }

        Expr::FunctionCall { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate_expr(arg, bindings)?);
            }
            apply_function(name, &values)
        }
    }
}

/// Resolve a field reference against the bindings.
///
/// `{mapped.name}` tries the full key first, then falls back to the bare
/// name. Absent or non-numeric values substitute 0.
fn resolve_field(id: &str, bindings: &Bindings) -> f64 {
    if let Some(value) = bindings.get(id) {
        return coerce_number(value);
    }
    if let Some(bare) = id.strip_prefix("mapped.") {
        if let Some(value) = bindings.get(bare) {
            return coerce_number(value);
        }
    }
    0.0
}

fn apply_operator(op: char, a: f64, b: f64) -> Result<f64, EvalError> {
    match op {
        '+' => Ok(a + b),
        '-' => Ok(a - b),
        '*' => Ok(a * b),
        '/' => {
            if b == 0.0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(a / b)
            }
        }
        '%' => {
            if b == 0.0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(a % b)
            }
        }
        '^' => finite_power(a, b),
        // Tokenizer only emits the six operators above
        other => Err(EvalError::Syntax {
            message: format!("Unsupported operator: {}", other),
            position: 0,
        }),
    }
}

/// Exponentiation that never leaks Infinity or NaN (`0 ^ -1`,
/// `(-2) ^ 0.5`) into downstream arithmetic
fn finite_power(base: f64, exponent: f64) -> Result<f64, EvalError> {
    let result = base.powf(exponent);
    if result.is_finite() {
        Ok(result)
    } else {
        Err(EvalError::NumericDomain(format!(
            "{} ^ {} is not a finite number",
            base, exponent
        )))
    }
}

/// True if `name` is in the function whitelist
pub fn is_function(name: &str) -> bool {
    matches!(
        name,
        "sum"
            | "avg"
            | "count"
            | "median"
            | "min"
            | "max"
            | "round"
            | "floor"
            | "ceil"
            | "abs"
            | "sqrt"
            | "pow"
            | "clamp"
            | "if"
            | "percent_of"
            | "percent_change"
            | "markup"
            | "margin"
            | "discount"
            | "gallons_from_inches"
            | "volume_cylinder"
            | "volume_rectangle"
            | "inches_to_feet"
            | "feet_to_inches"
            | "gallons_to_liters"
            | "liters_to_gallons"
            | "pounds_to_kg"
            | "kg_to_pounds"
    )
}

const GALLONS_PER_LITER: f64 = 1.0 / 3.78541;
const KG_PER_POUND: f64 = 0.453592;

fn apply_function(name: &str, args: &[f64]) -> Result<f64, EvalError> {
    let arity = |expected: &'static str, ok: bool| -> Result<(), EvalError> {
        if ok {
            Ok(())
        } else {
            Err(EvalError::BadArity {
                function: name.to_string(),
                expected,
                got: args.len(),
            })
        }
    };

    match name {
        // Variadic statistics (at least one argument)
        "sum" => {
            arity("1+", !args.is_empty())?;
            Ok(args.iter().sum())
        }
        "avg" => {
            arity("1+", !args.is_empty())?;
            Ok(args.iter().sum::<f64>() / args.len() as f64)
        }
        "count" => {
            arity("1+", !args.is_empty())?;
            Ok(args.len() as f64)
        }
        "median" => {
            arity("1+", !args.is_empty())?;
            let mut sorted = args.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 1 {
                Ok(sorted[mid])
            } else {
                Ok((sorted[mid - 1] + sorted[mid]) / 2.0)
            }
        }
        "min" => {
            arity("1+", !args.is_empty())?;
            Ok(args.iter().copied().fold(f64::INFINITY, f64::min))
        }
        "max" => {
            arity("1+", !args.is_empty())?;
            Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max))
        }

        // round(x) or round(x, precision) - precision is decimal digits
        "round" => {
            arity("1-2", args.len() == 1 || args.len() == 2)?;
            if args.len() == 1 {
                Ok(args[0].round())
            } else {
                let factor = 10f64.powi(args[1] as i32);
                Ok((args[0] * factor).round() / factor)
            }
        }
        "floor" => {
            arity("1", args.len() == 1)?;
            Ok(args[0].floor())
        }
        "ceil" => {
            arity("1", args.len() == 1)?;
            Ok(args[0].ceil())
        }
        "abs" => {
            arity("1", args.len() == 1)?;
            Ok(args[0].abs())
        }
        "sqrt" => {
            arity("1", args.len() == 1)?;
            if args[0] < 0.0 {
                Err(EvalError::NumericDomain(format!(
                    "sqrt of negative number: {}",
                    args[0]
                )))
            } else {
                Ok(args[0].sqrt())
            }
        }
        // Kept distinct from the ^ operator for explicitness
        "pow" => {
            arity("2", args.len() == 2)?;
            finite_power(args[0], args[1])
        }

        // Utility
        "clamp" => {
            arity("3", args.len() == 3)?;
            Ok(args[0].max(args[1]).min(args[2]))
        }
        "if" => {
            arity("3", args.len() == 3)?;
            Ok(if args[0] > 0.0 { args[1] } else { args[2] })
        }

        // Percentages - zero denominators yield 0 to keep formulas total
        "percent_of" => {
            arity("2", args.len() == 2)?;
            if args[1] == 0.0 {
                Ok(0.0)
            } else {
                Ok((args[0] / args[1]) * 100.0)
            }
        }
        "percent_change" => {
            arity("2", args.len() == 2)?;
            if args[0] == 0.0 {
                Ok(0.0)
            } else {
                Ok(((args[1] - args[0]) / args[0]) * 100.0)
            }
        }

        // Financial
        "markup" => {
            arity("2", args.len() == 2)?;
            Ok(args[0] * (1.0 + args[1] / 100.0))
        }
        "margin" => {
            arity("2", args.len() == 2)?;
            if args[0] == 0.0 {
                Ok(0.0)
            } else {
                Ok(((args[0] - args[1]) / args[0]) * 100.0)
            }
        }
        "discount" => {
            arity("2", args.len() == 2)?;
            Ok(args[0] * (1.0 - args[1] / 100.0))
        }

        // Industrial / inventory measurements
        "gallons_from_inches" => {
            arity("2", args.len() == 2)?;
            Ok(args[0] * args[1])
        }
        "volume_cylinder" => {
            arity("2", args.len() == 2)?;
            Ok(std::f64::consts::PI * args[0] * args[0] * args[1])
        }
        "volume_rectangle" => {
            arity("3", args.len() == 3)?;
            Ok(args[0] * args[1] * args[2])
        }

        // Unit conversions
        "inches_to_feet" => {
            arity("1", args.len() == 1)?;
            Ok(args[0] / 12.0)
        }
        "feet_to_inches" => {
            arity("1", args.len() == 1)?;
            Ok(args[0] * 12.0)
        }
        "gallons_to_liters" => {
            arity("1", args.len() == 1)?;
            Ok(args[0] * 3.78541)
        }
        "liters_to_gallons" => {
            arity("1", args.len() == 1)?;
            Ok(args[0] * GALLONS_PER_LITER)
        }
        "pounds_to_kg" => {
            arity("1", args.len() == 1)?;
            Ok(args[0] * KG_PER_POUND)
        }
        "kg_to_pounds" => {
            arity("1", args.len() == 1)?;
            Ok(args[0] / KG_PER_POUND)
        }

        other => Err(EvalError::UnknownFunction(other.to_string())),
    }
}

/// Documentation entry for one whitelisted function, for formula-builder UIs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionDoc {
    pub name: &'static str,
    pub description: &'static str,
    pub example: &'static str,
}

/// All whitelisted functions with descriptions and usage examples
pub fn available_functions() -> &'static [FunctionDoc] {
    &[
        FunctionDoc { name: "sum", description: "Sum of values", example: "sum(1, 2, 3, 4)" },
        FunctionDoc { name: "avg", description: "Average of values", example: "avg(1, 2, 3, 4)" },
        FunctionDoc { name: "count", description: "Count of values", example: "count(1, 2, 3)" },
        FunctionDoc { name: "median", description: "Median value", example: "median(1, 2, 3, 4, 5)" },
        FunctionDoc { name: "min", description: "Minimum value", example: "min(5, 10, 3)" },
        FunctionDoc { name: "max", description: "Maximum value", example: "max(5, 10, 3)" },
        FunctionDoc { name: "round", description: "Round, optionally to N decimal digits", example: "round(3.456, 2)" },
        FunctionDoc { name: "floor", description: "Round down", example: "floor(3.7)" },
        FunctionDoc { name: "ceil", description: "Round up", example: "ceil(3.2)" },
        FunctionDoc { name: "abs", description: "Absolute value", example: "abs(-5)" },
        FunctionDoc { name: "sqrt", description: "Square root", example: "sqrt(16)" },
        FunctionDoc { name: "pow", description: "Power function", example: "pow(2, 3)" },
        FunctionDoc { name: "clamp", description: "Clamp value between min/max", example: "clamp({value}, 0, 100)" },
        FunctionDoc { name: "if", description: "Conditional value (condition > 0 picks the first branch)", example: "if({quantity}, {price}, 0)" },
        FunctionDoc { name: "percent_of", description: "Value as percent of total", example: "percent_of(25, 200)" },
        FunctionDoc { name: "percent_change", description: "Percent change old to new", example: "percent_change(100, 125)" },
        FunctionDoc { name: "markup", description: "Apply markup percentage", example: "markup(100, 20)" },
        FunctionDoc { name: "margin", description: "Margin percentage", example: "margin(120, 100)" },
        FunctionDoc { name: "discount", description: "Apply discount percentage", example: "discount(100, 10)" },
        FunctionDoc { name: "gallons_from_inches", description: "Convert tank inches to gallons", example: "gallons_from_inches({tank_inches}, {conversion_rate})" },
        FunctionDoc { name: "volume_cylinder", description: "Cylindrical volume", example: "volume_cylinder(2, 10)" },
        FunctionDoc { name: "volume_rectangle", description: "Rectangular volume", example: "volume_rectangle(2, 3, 4)" },
        FunctionDoc { name: "inches_to_feet", description: "Convert inches to feet", example: "inches_to_feet(24)" },
        FunctionDoc { name: "feet_to_inches", description: "Convert feet to inches", example: "feet_to_inches(2)" },
        FunctionDoc { name: "gallons_to_liters", description: "Convert gallons to liters", example: "gallons_to_liters(5)" },
        FunctionDoc { name: "liters_to_gallons", description: "Convert liters to gallons", example: "liters_to_gallons(20)" },
        FunctionDoc { name: "pounds_to_kg", description: "Convert pounds to kilograms", example: "pounds_to_kg(10)" },
        FunctionDoc { name: "kg_to_pounds", description: "Convert kilograms to pounds", example: "kg_to_pounds(5)" },
    ]
}
