//! Formula expression engine
//!
//! Parses and evaluates user-authored arithmetic formulas with `{field_id}`
//! references, the six arithmetic operators, and a whitelisted function
//! library. Invalidity is a value, not a crash: authoring-time errors are
//! returned inline for display while the user types.

pub mod evaluator;
pub mod fields;
pub mod parser;
pub mod tokenizer;

pub use evaluator::{available_functions, evaluate, is_function, Bindings, EvalError, FunctionDoc};
pub use fields::{extract_references, validate, FieldReferences, ValidationError, ValidationResult};
pub use parser::Expr;
