//! Filter compilation and evaluation.
//!
//! The archive consumes filters through a two-step contract: compile the
//! user-supplied text once per request, then evaluate the compiled program
//! against each decoded entry. The environment is built once at startup and
//! shared read-only across request handlers.

mod parser;

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::ResultEntry;
use parser::{parse, roots, BinOp, Expr};

#[derive(Debug, Error)]
pub enum FilterError {
    /// The filter text does not parse or references unknown bindings.
    #[error("filter compile error: {message}")]
    Compile { message: String },
    /// The filter parses but is semantically incompatible with a record.
    #[error("filter evaluation error: {message}")]
    Eval { message: String },
    /// A stored execution payload could not be decoded into bindings.
    #[error("cannot bind execution payload `{type_url}`: {source}")]
    Binding {
        type_url: String,
        source: serde_json::Error,
    },
}

fn eval_error(message: impl Into<String>) -> FilterError {
    FilterError::Eval {
        message: message.into(),
    }
}

/// Process-wide filter environment: the set of execution-type binding names
/// programs may reference.
#[derive(Debug, Clone)]
pub struct FilterEnv {
    kinds: Vec<String>,
}

impl FilterEnv {
    pub fn new() -> Self {
        Self::with_kinds(["taskrun", "pipelinerun"])
    }

    pub fn with_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }

    pub fn kinds(&self) -> &[String] {
        &self.kinds
    }

    /// Compiles `text` into a program. The empty filter compiles to a
    /// program that matches everything.
    pub fn compile(&self, text: &str) -> Result<FilterProgram, FilterError> {
        if text.trim().is_empty() {
            return Ok(FilterProgram {
                expr: None,
                kinds: self.kinds.clone(),
            });
        }
        let expr = parse(text)?;
        for root in roots(&expr) {
            if !self.kinds.iter().any(|kind| kind == root) {
                return Err(FilterError::Compile {
                    message: format!(
                        "unknown identifier `{root}`; expected one of: {}",
                        self.kinds.join(", ")
                    ),
                });
            }
        }
        Ok(FilterProgram {
            expr: Some(expr),
            kinds: self.kinds.clone(),
        })
    }
}

impl Default for FilterEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// A compiled predicate. Evaluation is pure; the same bindings always yield
/// the same verdict.
#[derive(Debug, Clone)]
pub struct FilterProgram {
    expr: Option<Expr>,
    kinds: Vec<String>,
}

impl FilterProgram {
    /// True when the program was compiled from the empty filter.
    pub fn matches_all(&self) -> bool {
        self.expr.is_none()
    }

    /// Evaluates the program against one set of bindings.
    pub fn evaluate(&self, bindings: &BTreeMap<String, Value>) -> Result<bool, FilterError> {
        let Some(expr) = &self.expr else {
            return Ok(true);
        };
        match eval(expr, bindings)? {
            Value::Bool(verdict) => Ok(verdict),
            other => Err(eval_error(format!(
                "filter must evaluate to a boolean, got {other}"
            ))),
        }
    }

    /// An entry matches iff any of its execution payloads evaluates to true.
    ///
    /// Every binding name is populated for every evaluation; payloads absent
    /// from an execution bind as zero-valued (empty) objects so predicates
    /// like `field.x == ""` never raise. An entry with no executions matches
    /// no non-empty filter.
    pub fn matches_entry(&self, entry: &ResultEntry) -> Result<bool, FilterError> {
        if self.matches_all() {
            return Ok(true);
        }
        for execution in &entry.executions {
            let mut bindings: BTreeMap<String, Value> = self
                .kinds
                .iter()
                .map(|kind| (kind.clone(), Value::Object(Default::default())))
                .collect();
            let kind = execution.kind();
            if bindings.contains_key(&kind) {
                let payload: Value = serde_json::from_slice(&execution.value).map_err(|source| {
                    FilterError::Binding {
                        type_url: execution.type_url.clone(),
                        source,
                    }
                })?;
                bindings.insert(kind, payload);
            }
            if self.evaluate(&bindings)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn eval(expr: &Expr, bindings: &BTreeMap<String, Value>) -> Result<Value, FilterError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Binding(name) => Ok(bindings.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Member(base, field) => match eval(base, bindings)? {
            Value::Null => Ok(Value::Null),
            Value::Object(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
            other => Err(eval_error(format!(
                "cannot access field `{field}` on {}",
                type_name(&other)
            ))),
        },
        Expr::Index(base, index) => match eval(base, bindings)? {
            Value::Null => Ok(Value::Null),
            Value::Array(items) => {
                let slot = usize::try_from(*index).ok().and_then(|i| items.get(i));
                Ok(slot.cloned().unwrap_or(Value::Null))
            }
            other => Err(eval_error(format!(
                "cannot index into {}",
                type_name(&other)
            ))),
        },
        Expr::Not(operand) => match eval(operand, bindings)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(eval_error(format!(
                "`!` requires a boolean operand, got {}",
                type_name(&other)
            ))),
        },
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, bindings),
    }
}

fn eval_binary(
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    bindings: &BTreeMap<String, Value>,
) -> Result<Value, FilterError> {
    match op {
        BinOp::And | BinOp::Or => {
            let left = require_bool(eval(lhs, bindings)?, op)?;
            // Short-circuit before touching the right operand.
            if (op == BinOp::And && !left) || (op == BinOp::Or && left) {
                return Ok(Value::Bool(left));
            }
            let right = require_bool(eval(rhs, bindings)?, op)?;
            Ok(Value::Bool(right))
        }
        BinOp::Eq => Ok(Value::Bool(loose_eq(
            &eval(lhs, bindings)?,
            &eval(rhs, bindings)?,
        ))),
        BinOp::Ne => Ok(Value::Bool(!loose_eq(
            &eval(lhs, bindings)?,
            &eval(rhs, bindings)?,
        ))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let left = eval(lhs, bindings)?;
            let right = eval(rhs, bindings)?;
            let ordering = compare(&left, &right)?;
            let verdict = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(verdict))
        }
    }
}

fn require_bool(value: Value, op: BinOp) -> Result<bool, FilterError> {
    let symbol = if op == BinOp::And { "&&" } else { "||" };
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(eval_error(format!(
            "`{symbol}` requires boolean operands, got {}",
            type_name(&other)
        ))),
    }
}

/// Equality with numeric coercion: `1 == 1.0` holds.
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering, FilterError> {
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return a
            .partial_cmp(&b)
            .ok_or_else(|| eval_error("cannot order NaN"));
    }
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return Ok(a.cmp(b));
    }
    Err(eval_error(format!(
        "cannot order {} against {}",
        type_name(left),
        type_name(right)
    )))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AnyData;

    fn entry_with_taskrun(payload: &str) -> ResultEntry {
        ResultEntry {
            executions: vec![AnyData::new(
                "type.example.dev/pipeline.v1.TaskRun",
                payload.as_bytes().to_vec(),
            )],
            ..ResultEntry::default()
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let program = FilterEnv::new().compile("  ").expect("compiles");
        assert!(program.matches_all());
        assert!(program.matches_entry(&ResultEntry::default()).expect("eval"));
    }

    #[test]
    fn condition_predicate_matches_succeeded_taskrun() {
        let program = FilterEnv::new()
            .compile(r#"taskrun.status.conditions[0].type == "Succeeded""#)
            .expect("compiles");
        let matched = entry_with_taskrun(r#"{"status":{"conditions":[{"type":"Succeeded"}]}}"#);
        let unmatched = entry_with_taskrun(r#"{"status":{"conditions":[{"type":"Running"}]}}"#);
        assert!(program.matches_entry(&matched).expect("eval"));
        assert!(!program.matches_entry(&unmatched).expect("eval"));
    }

    #[test]
    fn absent_payload_binds_zero_value_without_raising() {
        let program = FilterEnv::new()
            .compile(r#"pipelinerun.metadata.name == """#)
            .expect("compiles");
        // The entry only carries a taskrun; pipelinerun binds as {} and the
        // missing-field chain folds to null, which is simply unequal.
        let entry = entry_with_taskrun("{}");
        assert!(!program.matches_entry(&entry).expect("eval"));
    }

    #[test]
    fn entry_without_executions_never_matches_nonempty_filter() {
        let program = FilterEnv::new()
            .compile(r#"taskrun.metadata.name != "x""#)
            .expect("compiles");
        assert!(!program.matches_entry(&ResultEntry::default()).expect("eval"));
    }

    #[test]
    fn any_execution_matching_is_enough() {
        let program = FilterEnv::new()
            .compile(r#"taskrun.step == 2"#)
            .expect("compiles");
        let entry = ResultEntry {
            executions: vec![
                AnyData::new("TaskRun", br#"{"step":1}"#.to_vec()),
                AnyData::new("TaskRun", br#"{"step":2}"#.to_vec()),
            ],
            ..ResultEntry::default()
        };
        assert!(program.matches_entry(&entry).expect("eval"));
    }

    #[test]
    fn unknown_binding_is_a_compile_error() {
        let err = FilterEnv::new()
            .compile(r#"cronjob.name == "x""#)
            .expect_err("rejects");
        assert!(matches!(err, FilterError::Compile { .. }));
    }

    #[test]
    fn type_confusion_is_an_eval_error() {
        let program = FilterEnv::new()
            .compile(r#"taskrun.metadata.name[0] == "x""#)
            .expect("compiles");
        let entry = entry_with_taskrun(r#"{"metadata":{"name":"build"}}"#);
        assert!(matches!(
            program.matches_entry(&entry),
            Err(FilterError::Eval { .. })
        ));
    }

    #[test]
    fn numeric_comparisons_coerce_int_and_float() {
        let program = FilterEnv::new()
            .compile("taskrun.attempts >= 2")
            .expect("compiles");
        assert!(program
            .matches_entry(&entry_with_taskrun(r#"{"attempts":2.5}"#))
            .expect("eval"));
        assert!(!program
            .matches_entry(&entry_with_taskrun(r#"{"attempts":1}"#))
            .expect("eval"));
    }

    #[test]
    fn evaluation_is_pure() {
        let program = FilterEnv::new()
            .compile(r#"taskrun.status.phase == "done" || taskrun.retries > 3"#)
            .expect("compiles");
        let entry = entry_with_taskrun(r#"{"status":{"phase":"done"},"retries":0}"#);
        for _ in 0..3 {
            assert!(program.matches_entry(&entry).expect("eval"));
        }
    }

    #[test]
    fn undecodable_payload_is_a_binding_error() {
        let program = FilterEnv::new()
            .compile(r#"taskrun.x == 1"#)
            .expect("compiles");
        let entry = entry_with_taskrun("{broken");
        assert!(matches!(
            program.matches_entry(&entry),
            Err(FilterError::Binding { .. })
        ));
    }
}
