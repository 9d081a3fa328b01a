//! Field reference resolver
//!
//! Extracts and validates `{field_id}` tokens from raw formula text against
//! a known field set. Runs on every keystroke in the authoring UI, so it is
//! a single scan plus a dry parse: pure, no shared state, sub-millisecond
//! for realistic formula lengths.

use super::evaluator::is_function;
use super::parser::parse;
use super::tokenizer::{tokenize, Token};

/// Field references extracted from a formula, deduplicated, in first-seen
/// order. Mapped references (`{mapped.name}`) are listed separately with the
/// `mapped.` prefix stripped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldReferences {
    pub fields: Vec<String>,
    pub mapped_fields: Vec<String>,
}

impl FieldReferences {
    /// Regular and mapped references combined
    pub fn all(&self) -> Vec<String> {
        let mut all = self.fields.clone();
        all.extend(self.mapped_fields.iter().cloned());
        all
    }
}

/// Why a formula failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Malformed formula: unbalanced braces/parens, dangling operators
    Syntax(String),
    /// References a field id absent from the known set
    UnknownField(String),
    /// Calls a function outside the whitelist
    UnknownFunction(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Syntax(msg) => write!(f, "Syntax error: {}", msg),
            ValidationError::UnknownField(id) => write!(f, "Unknown field reference: {}", id),
            ValidationError::UnknownFunction(name) => write!(f, "Unknown function: {}", name),
        }
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

/// Scan a formula for `{...}` tokens.
///
/// Duplicates collapse; an unterminated `{` is a syntax error, not silently
/// dropped.
pub fn extract_references(formula: &str) -> Result<FieldReferences, ValidationError> {
    let mut refs = FieldReferences::default();
    let mut chars = formula.chars();

    while let Some(c) = chars.next() {
        if c != '{' {
            continue;
        }
        let mut id = String::new();
        let mut terminated = false;
        for inner in chars.by_ref() {
            if inner == '}' {
                terminated = true;
                break;
            }
            if inner == '{' {
                return Err(ValidationError::Syntax(
                    "Nested '{' inside field reference".to_string(),
                ));
            }
            id.push(inner);
        }
        if !terminated {
            return Err(ValidationError::Syntax(
                "Unterminated field reference: missing '}'".to_string(),
            ));
        }
        if id.trim().is_empty() {
            return Err(ValidationError::Syntax("Empty field reference".to_string()));
        }

        if let Some(bare) = id.strip_prefix("mapped.") {
            if !refs.mapped_fields.iter().any(|f| f == bare) {
                refs.mapped_fields.push(bare.to_string());
            }
        } else if !refs.fields.iter().any(|f| f == &id) {
            refs.fields.push(id);
        }
    }

    Ok(refs)
}

/// Validate a formula against the known field sets.
///
/// Succeeds for a pure constant formula with zero references. Empty input is
/// valid (it evaluates to 0).
pub fn validate(
    formula: &str,
    known_fields: &[String],
    known_mapped_fields: &[String],
) -> ValidationResult {
    if formula.trim().is_empty() {
        return Ok(());
    }

    // Balanced parentheses first: cheapest check, clearest message
    let mut depth: i32 = 0;
    for c in formula.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return Err(ValidationError::Syntax("Unbalanced parentheses".to_string()));
        }
    }
    if depth != 0 {
        return Err(ValidationError::Syntax("Unbalanced parentheses".to_string()));
    }

    // Field references must all be known
    let refs = extract_references(formula)?;
    for id in &refs.fields {
        if !known_fields.iter().any(|f| f == id) {
            return Err(ValidationError::UnknownField(id.clone()));
        }
    }
    for name in &refs.mapped_fields {
        if !known_mapped_fields.iter().any(|f| f == name) {
            return Err(ValidationError::UnknownField(format!("mapped.{}", name)));
        }
    }

    // Dry parse catches dangling operators, misplaced commas, and the like
    let tokens =
        tokenize(formula).map_err(|e| ValidationError::Syntax(e.message))?;
    if tokens.is_empty() {
        return Ok(());
    }

    // Function names must be whitelisted; checked on tokens as well as the
    // parsed tree so the error names the function rather than the parse
    // failure around it
    for pair in tokens.windows(2) {
        if let [Token::Identifier(name), Token::OpenParen] = pair {
            if !is_function(name) {
                return Err(ValidationError::UnknownFunction(name.clone()));
            }
        }
    }

    let expr = parse(tokens).map_err(|e| ValidationError::Syntax(e.message))?;

    let mut unknown = None;
    expr.walk_functions(&mut |name| {
        if unknown.is_none() && !is_function(name) {
            unknown = Some(name.to_string());
        }
    });
    if let Some(name) = unknown {
        return Err(ValidationError::UnknownFunction(name));
    }

    Ok(())
}
