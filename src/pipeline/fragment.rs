//! Structured code fragments produced by step emitters.
//!
//! A fragment is a list of one-line statements of the generated program. Each
//! statement is a sequence of segments, so the compiler can tell literal code
//! apart from references to "the current dataset" without matching text:
//!
//! - [`Segment::Text`] is emitted verbatim and never rewritten.
//! - [`Segment::Dataset`] is the current dataset; it is bound to a concrete
//!   identifier only when the fragment is rendered.
//! - [`Segment::Ident`] is a fixed identifier (branch results, temporaries).
//! - [`Segment::Expr`] is opaque expression text supplied by the pipeline
//!   author. Whole-token references to the global dataset identifier inside it
//!   are rebound on render, see [`super::scope::rewrite_token`].

use super::scope::{GLOBAL_DATASET, rewrite_token};
use crate::error::{PipelineError, Result, StepLocation};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Expr(String),
    Dataset,
    Ident(String),
}

/// One line of generated code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statement {
    segments: Vec<Segment>,
}

impl Statement {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.segments.push(Segment::Text(text.into()));
        self
    }

    #[must_use]
    pub fn expr(mut self, expr: impl Into<String>) -> Self {
        self.segments.push(Segment::Expr(expr.into()));
        self
    }

    #[must_use]
    pub fn dataset(mut self) -> Self {
        self.segments.push(Segment::Dataset);
        self
    }

    #[must_use]
    pub fn ident(mut self, ident: impl Into<String>) -> Self {
        self.segments.push(Segment::Ident(ident.into()));
        self
    }

    fn render(&self, dataset: &str) -> String {
        let mut line = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => line.push_str(text),
                Segment::Expr(expr) => line.push_str(&rewrite_token(expr, GLOBAL_DATASET, dataset)),
                Segment::Dataset => line.push_str(dataset),
                Segment::Ident(ident) => line.push_str(ident),
            }
        }
        line
    }
}

/// Ordered statements emitted for one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    statements: Vec<Statement>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(statement: Statement) -> Self {
        Self {
            statements: vec![statement],
        }
    }

    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    /// Pin every current-dataset reference to `ident`.
    ///
    /// Used when one emitter reuses another's output under a different name.
    pub fn bind_dataset(&mut self, ident: &str) {
        for statement in &mut self.statements {
            for segment in &mut statement.segments {
                if matches!(segment, Segment::Dataset) {
                    *segment = Segment::Ident(ident.to_owned());
                }
            }
        }
    }

    /// Render to lines with the current dataset bound to `dataset`.
    pub fn render(&self, dataset: &str) -> Vec<String> {
        self.statements.iter().map(|s| s.render(dataset)).collect()
    }
}

/// Python string literal for `value`.
///
/// JSON string escapes are a subset of Python's, so the JSON encoding is a
/// valid Python literal.
pub fn py_str(value: &str) -> String {
    Value::String(value.to_owned()).to_string()
}

/// Python list of string literals.
pub fn py_str_list(values: &[String]) -> String {
    let items: Vec<String> = values.iter().map(|v| py_str(v)).collect();
    format!("[{}]", items.join(", "))
}

/// Python literal for a JSON scalar or array.
pub fn py_literal(value: &Value, location: &StepLocation) -> Result<String> {
    match value {
        Value::Null => Ok("None".to_owned()),
        Value::Bool(true) => Ok("True".to_owned()),
        Value::Bool(false) => Ok("False".to_owned()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(py_str(s)),
        Value::Array(items) => {
            let rendered = items
                .iter()
                .map(|item| py_literal(item, location))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("[{}]", rendered.join(", ")))
        }
        Value::Object(_) => Err(PipelineError::invalid_step(
            location,
            "objects cannot be used as literal values",
        )),
    }
}
