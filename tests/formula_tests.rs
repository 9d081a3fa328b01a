//! Formula engine integration tests
//!
//! Exercises the public formula surface: evaluation, validation, and field
//! reference extraction, the way the authoring UI drives them.

use serde_json::json;
use tallykit::formula::{
    available_functions, evaluate, extract_references, validate, Bindings, EvalError,
    ValidationError,
};

fn bindings(pairs: &[(&str, serde_json::Value)]) -> Bindings {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// EVALUATION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_operator_precedence() {
    let b = Bindings::new();
    assert_eq!(evaluate("2 + 3 * 4", &b).unwrap(), 14.0);
    assert_eq!(evaluate("(2 + 3) * 4", &b).unwrap(), 20.0);
    assert_eq!(evaluate("2 ^ 3 ^ 2", &b).unwrap(), 512.0);
    assert_eq!(evaluate("10 % 3", &b).unwrap(), 1.0);
}

#[test]
fn test_drum_conversion_end_to_end() {
    let b = bindings(&[("Drum_Inches", json!(12)), ("Conversion_Rate", json!(2.5))]);
    assert_eq!(
        evaluate("{Drum_Inches} * {Conversion_Rate}", &b).unwrap(),
        30.0
    );
}

#[test]
fn test_round_with_precision_end_to_end() {
    let b = bindings(&[("x", json!(7)), ("y", json!(3))]);
    assert_eq!(evaluate("round({x} / {y}, 2)", &b).unwrap(), 2.33);
}

#[test]
fn test_missing_binding_is_zero_not_error() {
    let b = bindings(&[("a", json!(3))]);
    assert_eq!(evaluate("{a} * {b}", &b).unwrap(), 0.0);
}

#[test]
fn test_division_by_zero_is_error_marker() {
    let b = bindings(&[("a", json!(5)), ("b", json!(0))]);
    let result = evaluate("{a} / {b}", &b);
    assert_eq!(result, Err(EvalError::DivisionByZero));
}

#[test]
fn test_partially_filled_form_stays_computable() {
    // A form with only one of three fields filled in still evaluates
    let b = bindings(&[("width", json!(4))]);
    assert_eq!(
        evaluate("{width} * {height} + {depth}", &b).unwrap(),
        0.0
    );
}

#[test]
fn test_evaluation_is_deterministic() {
    let b = bindings(&[("a", json!(7.25)), ("b", json!(3))]);
    let formula = "round(sqrt({a} ^ 2 + {b} ^ 2), 4)";
    let first = evaluate(formula, &b).unwrap();
    for _ in 0..50 {
        assert_eq!(evaluate(formula, &b).unwrap(), first);
    }
}

#[test]
fn test_nested_function_composition() {
    let b = bindings(&[("a", json!(2)), ("b", json!(8))]);
    assert_eq!(
        evaluate("max(min({a}, {b}), avg({a}, {b}, 2))", &b).unwrap(),
        4.0
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// VALIDATION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_validation_rejects_unknown_field() {
    let result = validate("{ghost}", &ids(&["a", "b"]), &[]);
    assert_eq!(result, Err(ValidationError::UnknownField("ghost".into())));
}

#[test]
fn test_validation_accepts_constant_formula() {
    assert_eq!(validate("1 + 2 * 3", &[], &[]), Ok(()));
}

#[test]
fn test_validation_surfaces_syntax_errors_as_values() {
    // These come back as values for inline display, never as panics
    for bad in ["{a} +", "* 2", "({a}", "{a})", "{unterminated", "{}"] {
        let result = validate(bad, &ids(&["a"]), &[]);
        assert!(
            matches!(result, Err(ValidationError::Syntax(_))),
            "expected syntax error for {:?}, got {:?}",
            bad,
            result
        );
    }
}

#[test]
fn test_validation_rejects_unknown_function() {
    let result = validate("eval({a})", &ids(&["a"]), &[]);
    assert_eq!(result, Err(ValidationError::UnknownFunction("eval".into())));
}

#[test]
fn test_every_documented_function_validates() {
    let fields = ids(&["quantity", "price", "value", "tank_inches", "conversion_rate"]);
    for doc in available_functions() {
        assert_eq!(
            validate(doc.example, &fields, &[]),
            Ok(()),
            "example for {} failed validation",
            doc.name
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// REFERENCE EXTRACTION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_extraction_round_trip() {
    let refs = extract_references("{a} + {b} * {a} - {mapped.rate}").unwrap();
    assert_eq!(refs.fields, vec!["a", "b"]);
    assert_eq!(refs.mapped_fields, vec!["rate"]);
}

#[test]
fn test_extraction_case_sensitive_dedup() {
    let refs = extract_references("{Qty} + {qty} + {Qty}").unwrap();
    assert_eq!(refs.fields, vec!["Qty", "qty"]);
}

#[test]
fn test_extraction_reports_malformed_braces() {
    assert!(extract_references("{open").is_err());
    assert!(extract_references("{a} {open").is_err());
}

#[test]
fn test_extraction_and_evaluation_agree() {
    // Every extracted reference, when bound, changes the result
    let formula = "{a} + {b} * 2";
    let refs = extract_references(formula).unwrap();
    assert_eq!(refs.fields.len(), 2);

    let unbound = evaluate(formula, &Bindings::new()).unwrap();
    assert_eq!(unbound, 0.0);

    let b = bindings(&[("a", json!(1)), ("b", json!(1))]);
    assert_eq!(evaluate(formula, &b).unwrap(), 3.0);
}
