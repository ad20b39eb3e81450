//! The expression-evaluator contract. The engine never implements a full
//! expression language itself — see the specification's design notes and
//! `engine::expression::mini` for the reference implementation used by
//! this crate's own test suite.

use crate::domain::errors::ExpressionError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Extra values bound into scope alongside the root record, at minimum
/// `.item` when evaluating inside an `items_to_parse` split.
pub type Bindings = BTreeMap<String, Value>;

/// A compiled expression, opaque to callers.
pub trait CompiledExpr: Send + Sync {
    /// Evaluate against a root record and bindings.
    fn eval(&self, root: &Value, bindings: &Bindings) -> Result<Value, ExpressionError>;
}

/// Compiles and evaluates selector/mapping expressions.
///
/// Implementations are expected to support at least: field/path access,
/// arithmetic, string concatenation, map/filter-style list comprehension,
/// boolean combinators, comparison operators, and date/time handling.
pub trait ExpressionEngine: Send + Sync {
    fn compile(&self, expr: &str) -> Result<Box<dyn CompiledExpr>, ExpressionError>;

    /// Convenience: compile and evaluate in one step.
    fn eval(&self, expr: &str, root: &Value, bindings: &Bindings) -> Result<Value, ExpressionError> {
        self.compile(expr)?.eval(root, bindings)
    }
}
