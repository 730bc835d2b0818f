//! Expression sandbox
//!
//! Compiles textual boolean/numeric expressions into immutable programs
//! evaluated over a closed environment (`workload`, `policy`, `cluster`,
//! `time`). Programs are pure: no I/O, no state, safe to share across
//! threads with per-call contexts. The unsafe-construct checks run at
//! compile time so a stored policy can never smuggle a dangerous
//! expression past validation.

mod lexer;
mod parser;
mod value;

pub use value::{ClusterResources, EvalContext, Value};

use parser::{BinOp, Expr, Parser, UnaryOp};

use crate::errors::{EngineError, Result};

/// Identifiers rejected at compile time
const FORBIDDEN_IDENTIFIERS: &[&str] = &[
    "exec", "system", "eval", "import", "os", "sys", "runtime", "panic", "recover", "defer",
];

/// Roots an expression must reference at least one of
const REQUIRED_ROOTS: &[&str] = &["workload", "policy", "cluster", "time"];

/// A compiled, immutable expression program
#[derive(Debug, Clone)]
pub struct Program {
    source: String,
    ast: Expr,
}

impl Program {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a context, producing a raw value
    pub fn eval(&self, ctx: &EvalContext) -> Result<Value> {
        eval_expr(&self.ast, ctx)
    }

    /// Evaluate a condition expression; non-boolean results are a runtime
    /// error
    pub fn eval_condition(&self, ctx: &EvalContext) -> Result<bool> {
        match self.eval(ctx)? {
            Value::Bool(b) => Ok(b),
            other => Err(EngineError::ExpressionRuntime(format!(
                "condition {:?} evaluated to {}, expected bool",
                self.source,
                other.type_name()
            ))),
        }
    }

    /// Evaluate a scoring expression; the result is clamped to [0, 100]
    pub fn eval_score(&self, ctx: &EvalContext) -> Result<f64> {
        match self.eval(ctx)? {
            Value::Num(n) => Ok(n.clamp(0.0, 100.0)),
            other => Err(EngineError::ExpressionRuntime(format!(
                "score {:?} evaluated to {}, expected number",
                self.source,
                other.type_name()
            ))),
        }
    }
}

/// Compile an expression, running all safety checks
pub fn compile(source: &str) -> Result<Program> {
    let source = source.trim();
    if source.is_empty() {
        return Err(EngineError::InvalidExpression("expression is empty".into()));
    }

    check_balanced(source)?;

    let tokens = lexer::tokenize(source)?;

    for token in &tokens {
        if let lexer::Token::Ident(name) = token {
            if name.contains("__") || FORBIDDEN_IDENTIFIERS.contains(&name.as_str()) {
                return Err(EngineError::InvalidExpression(format!(
                    "expression contains forbidden identifier {name:?}"
                )));
            }
        }
    }

    let ast = Parser::new(tokens).parse()?;

    let mut roots = Vec::new();
    parser::root_identifiers(&ast, &mut roots);
    if !roots.iter().any(|r| REQUIRED_ROOTS.contains(&r.as_str())) {
        return Err(EngineError::InvalidExpression(
            "expression must reference at least one of: workload, policy, cluster, time".into(),
        ));
    }

    Ok(Program {
        source: source.to_string(),
        ast,
    })
}

/// Quick delimiter scan, independent of the parser, so the error message
/// names the imbalance rather than a downstream parse failure
fn check_balanced(source: &str) -> Result<()> {
    let mut parens = 0i32;
    let mut brackets = 0i32;
    for c in source.chars() {
        match c {
            '(' => parens += 1,
            ')' => parens -= 1,
            '[' => brackets += 1,
            ']' => brackets -= 1,
            _ => {}
        }
        if parens < 0 {
            return Err(EngineError::InvalidExpression(
                "expression has unbalanced parentheses".into(),
            ));
        }
        if brackets < 0 {
            return Err(EngineError::InvalidExpression(
                "expression has unbalanced brackets".into(),
            ));
        }
    }
    if parens != 0 {
        return Err(EngineError::InvalidExpression(
            "expression has unbalanced parentheses".into(),
        ));
    }
    if brackets != 0 {
        return Err(EngineError::InvalidExpression(
            "expression has unbalanced brackets".into(),
        ));
    }
    Ok(())
}

fn eval_expr(expr: &Expr, ctx: &EvalContext) -> Result<Value> {
    match expr {
        Expr::Number(n) => Ok(Value::Num(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval_expr(item, ctx)?);
            }
            Ok(Value::List(values))
        }
        Expr::Ident(name) => ctx.get(name).cloned().ok_or_else(|| {
            EngineError::ExpressionRuntime(format!("unknown identifier {name:?}"))
        }),
        Expr::Field(base, field) => {
            let base = eval_expr(base, ctx)?;
            match base {
                Value::Map(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
                other => Err(EngineError::ExpressionRuntime(format!(
                    "cannot access field {field:?} on {}",
                    other.type_name()
                ))),
            }
        }
        Expr::Index(base, index) => {
            let base = eval_expr(base, ctx)?;
            let index = eval_expr(index, ctx)?;
            match (base, index) {
                (Value::Map(map), Value::Str(key)) => {
                    Ok(map.get(&key).cloned().unwrap_or(Value::Null))
                }
                (Value::List(items), Value::Num(i)) => {
                    let i = i as usize;
                    Ok(items.get(i).cloned().unwrap_or(Value::Null))
                }
                (base, index) => Err(EngineError::ExpressionRuntime(format!(
                    "cannot index {} with {}",
                    base.type_name(),
                    index.type_name()
                ))),
            }
        }
        Expr::Call(name, args) => eval_call(name, args, ctx),
        Expr::Unary(op, operand) => {
            let operand = eval_expr(operand, ctx)?;
            match (op, operand) {
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Neg, Value::Num(n)) => Ok(Value::Num(-n)),
                (op, operand) => Err(EngineError::ExpressionRuntime(format!(
                    "cannot apply {op:?} to {}",
                    operand.type_name()
                ))),
            }
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, ctx),
    }
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, ctx: &EvalContext) -> Result<Value> {
    // Short-circuit boolean operators before evaluating the right side
    if matches!(op, BinOp::And | BinOp::Or) {
        let lhs = expect_bool(eval_expr(lhs, ctx)?)?;
        return match (op, lhs) {
            (BinOp::And, false) => Ok(Value::Bool(false)),
            (BinOp::Or, true) => Ok(Value::Bool(true)),
            _ => Ok(Value::Bool(expect_bool(eval_expr(rhs, ctx)?)?)),
        };
    }

    let lhs = eval_expr(lhs, ctx)?;
    let rhs = eval_expr(rhs, ctx)?;

    match op {
        BinOp::Eq => Ok(Value::Bool(values_equal(&lhs, &rhs)?)),
        BinOp::NotEq => Ok(Value::Bool(!values_equal(&lhs, &rhs)?)),
        BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => compare_ordered(op, &lhs, &rhs),
        BinOp::In => Ok(Value::Bool(membership(&lhs, &rhs)?)),
        BinOp::NotIn => Ok(Value::Bool(!membership(&lhs, &rhs)?)),
        BinOp::Add => match (&lhs, &rhs) {
            (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            _ => Err(type_mismatch("+", &lhs, &rhs)),
        },
        BinOp::Sub => numeric(op, &lhs, &rhs, |a, b| a - b),
        BinOp::Mul => numeric(op, &lhs, &rhs, |a, b| a * b),
        BinOp::Div => match (&lhs, &rhs) {
            (Value::Num(_), Value::Num(b)) if *b == 0.0 => {
                Err(EngineError::ExpressionRuntime("division by zero".into()))
            }
            (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a / b)),
            _ => Err(type_mismatch("/", &lhs, &rhs)),
        },
        BinOp::Mod => match (&lhs, &rhs) {
            (Value::Num(_), Value::Num(b)) if *b == 0.0 => {
                Err(EngineError::ExpressionRuntime("modulo by zero".into()))
            }
            (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a % b)),
            _ => Err(type_mismatch("%", &lhs, &rhs)),
        },
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

fn eval_call(name: &str, args: &[Expr], ctx: &EvalContext) -> Result<Value> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval_expr(arg, ctx)?);
    }

    let two_strings = |values: &[Value]| -> Result<(String, String)> {
        match values {
            [Value::Str(a), Value::Str(b)] => Ok((a.clone(), b.clone())),
            _ => Err(EngineError::ExpressionRuntime(format!(
                "{name} expects two string arguments"
            ))),
        }
    };

    match name {
        "contains" => match values.as_slice() {
            [Value::Str(haystack), Value::Str(needle)] => {
                Ok(Value::Bool(haystack.contains(needle.as_str())))
            }
            [Value::List(items), needle] => Ok(Value::Bool(items.contains(needle))),
            _ => Err(EngineError::ExpressionRuntime(
                "contains expects (string, string) or (list, value)".into(),
            )),
        },
        "startsWith" => {
            let (haystack, prefix) = two_strings(&values)?;
            Ok(Value::Bool(haystack.starts_with(&prefix)))
        }
        "endsWith" => {
            let (haystack, suffix) = two_strings(&values)?;
            Ok(Value::Bool(haystack.ends_with(&suffix)))
        }
        "matches" => {
            let (subject, pattern) = two_strings(&values)?;
            let re = regex::Regex::new(&pattern).map_err(|e| {
                EngineError::ExpressionRuntime(format!("invalid regex {pattern:?}: {e}"))
            })?;
            Ok(Value::Bool(re.is_match(&subject)))
        }
        _ => Err(EngineError::ExpressionRuntime(format!(
            "unknown function {name:?}"
        ))),
    }
}

fn expect_bool(value: Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        EngineError::ExpressionRuntime(format!(
            "boolean operator applied to {}",
            value.type_name()
        ))
    })
}

fn values_equal(lhs: &Value, rhs: &Value) -> Result<bool> {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => Ok(true),
        (Value::Null, _) | (_, Value::Null) => Ok(false),
        (a, b) if a.type_name() == b.type_name() => Ok(a == b),
        (a, b) => Err(type_mismatch("==", a, b)),
    }
}

fn compare_ordered(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    let ordering = match (lhs, rhs) {
        (Value::Num(a), Value::Num(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => return Err(type_mismatch("comparison", lhs, rhs)),
    };
    let ordering = ordering
        .ok_or_else(|| EngineError::ExpressionRuntime("incomparable values".into()))?;
    let result = match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::LtEq => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        BinOp::GtEq => ordering.is_ge(),
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn membership(lhs: &Value, rhs: &Value) -> Result<bool> {
    match rhs {
        Value::List(items) => Ok(items.contains(lhs)),
        Value::Map(map) => match lhs {
            Value::Str(key) => Ok(map.contains_key(key)),
            other => Err(EngineError::ExpressionRuntime(format!(
                "map membership requires a string key, got {}",
                other.type_name()
            ))),
        },
        Value::Str(haystack) => match lhs {
            Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(EngineError::ExpressionRuntime(format!(
                "string membership requires a string, got {}",
                other.type_name()
            ))),
        },
        other => Err(EngineError::ExpressionRuntime(format!(
            "'in' requires a list, map or string on the right, got {}",
            other.type_name()
        ))),
    }
}

fn numeric(op: BinOp, lhs: &Value, rhs: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value> {
    match (lhs, rhs) {
        (Value::Num(a), Value::Num(b)) => Ok(Value::Num(f(*a, *b))),
        _ => Err(type_mismatch(&format!("{op:?}"), lhs, rhs)),
    }
}

fn type_mismatch(op: &str, lhs: &Value, rhs: &Value) -> EngineError {
    EngineError::ExpressionRuntime(format!(
        "type mismatch for {op}: {} vs {}",
        lhs.type_name(),
        rhs.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Objective, Policy, PolicyKind, PolicyMetadata, PolicySpec, PolicyStatus, Requirements,
        TargetSelector, Workload, WorkloadKind, WorkloadMetrics, WorkloadStatus,
    };
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn workload_with_cpu(usage: f64) -> Workload {
        let now = Utc::now();
        Workload {
            id: "w1".into(),
            name: "api-server".into(),
            namespace: "default".into(),
            kind: WorkloadKind::Deployment,
            status: WorkloadStatus::Running,
            labels: HashMap::from([("env".to_string(), "production".to_string())]),
            requirements: Requirements::default(),
            metrics: Some(WorkloadMetrics {
                cpu_usage: usage,
                cpu_limit: 2.0,
                memory_usage: 0.5,
                memory_limit: 1024.0,
                ..Default::default()
            }),
            created_at: now,
            updated_at: now,
        }
    }

    fn policy() -> Policy {
        Policy {
            id: "pol-1".into(),
            kind: PolicyKind::CostOptimization,
            metadata: PolicyMetadata::new("cost-p"),
            spec: PolicySpec {
                priority: 100,
                target: TargetSelector::default(),
                objectives: vec![Objective {
                    objective_type: "cost-reduction".into(),
                    weight: 1.0,
                    target: None,
                }],
                constraints: Default::default(),
                rules: vec![],
            },
            status: PolicyStatus::Active,
        }
    }

    fn ctx(cpu_usage: f64) -> EvalContext {
        EvalContext::new()
            .with_workload(&workload_with_cpu(cpu_usage))
            .with_policy(&policy())
            .with_cluster(&ClusterResources {
                cpu: 64.0,
                memory: 512.0,
                storage: 4096.0,
            })
    }

    #[test]
    fn test_condition_true_false() {
        let program = compile("workload.cpu.usage > 0.8").unwrap();
        assert!(program.eval_condition(&ctx(0.9)).unwrap());
        assert!(!program.eval_condition(&ctx(0.5)).unwrap());
    }

    #[test]
    fn test_percent_literal_condition() {
        let program = compile("workload.cpu.usage < 50%").unwrap();
        assert!(program.eval_condition(&ctx(0.3)).unwrap());
        assert!(!program.eval_condition(&ctx(0.7)).unwrap());
    }

    #[test]
    fn test_label_access() {
        let program = compile("workload.labels['env'] == 'production'").unwrap();
        assert!(program.eval_condition(&ctx(0.1)).unwrap());
    }

    #[test]
    fn test_membership() {
        let program = compile("workload.namespace in ['default', 'staging']").unwrap();
        assert!(program.eval_condition(&ctx(0.1)).unwrap());
        let program = compile("workload.namespace not in ['kube-system']").unwrap();
        assert!(program.eval_condition(&ctx(0.1)).unwrap());
    }

    #[test]
    fn test_string_functions() {
        let program = compile("startsWith(workload.name, 'api')").unwrap();
        assert!(program.eval_condition(&ctx(0.1)).unwrap());
        let program = compile("matches(workload.name, '^api-.*$')").unwrap();
        assert!(program.eval_condition(&ctx(0.1)).unwrap());
    }

    #[test]
    fn test_boolean_combinators() {
        let program =
            compile("workload.cpu.usage > 0.8 && policy.priority >= 100").unwrap();
        assert!(program.eval_condition(&ctx(0.9)).unwrap());
        assert!(!program.eval_condition(&ctx(0.1)).unwrap());
    }

    #[test]
    fn test_time_context() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 22, 0, 0).unwrap();
        let ctx = EvalContext::new()
            .with_workload(&workload_with_cpu(0.1))
            .with_time(at);
        let program = compile("time.hour >= 20 || time.dayOfWeek == 0").unwrap();
        assert!(program.eval_condition(&ctx).unwrap());
    }

    #[test]
    fn test_score_clamped() {
        let program = compile("workload.cpu.usage * 1000").unwrap();
        assert_eq!(program.eval_score(&ctx(0.9)).unwrap(), 100.0);
        let program = compile("workload.cpu.usage - 10").unwrap();
        assert_eq!(program.eval_score(&ctx(0.9)).unwrap(), 0.0);
    }

    #[test]
    fn test_condition_must_be_boolean() {
        let program = compile("workload.cpu.usage + 1").unwrap();
        assert!(matches!(
            program.eval_condition(&ctx(0.5)),
            Err(EngineError::ExpressionRuntime(_))
        ));
    }

    #[test]
    fn test_forbidden_identifiers() {
        for source in [
            "exec('rm') && workload.cpu.usage > 0",
            "os.getenv == workload.name",
            "workload.__class__ == 'x'",
            "system(workload.name)",
        ] {
            assert!(
                matches!(compile(source), Err(EngineError::InvalidExpression(_))),
                "expected {source:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_must_reference_known_root() {
        assert!(matches!(
            compile("1 + 1 == 2"),
            Err(EngineError::InvalidExpression(_))
        ));
        assert!(compile("time.hour > 5").is_ok());
    }

    #[test]
    fn test_unbalanced_delimiters() {
        assert!(compile("(workload.cpu.usage > 1").is_err());
        assert!(compile("workload.labels['env' == 'x'").is_err());
    }

    #[test]
    fn test_division_by_zero() {
        let program = compile("workload.cpu.usage / 0").unwrap();
        assert!(matches!(
            program.eval(&ctx(0.5)),
            Err(EngineError::ExpressionRuntime(_))
        ));
    }

    #[test]
    fn test_missing_field_is_null_not_error() {
        let program = compile("workload.labels['missing'] == 'x'").unwrap();
        assert!(!program.eval_condition(&ctx(0.5)).unwrap());
    }

    #[test]
    fn test_shared_program_distinct_contexts() {
        use std::sync::Arc;
        let program = Arc::new(compile("workload.cpu.usage > 0.8").unwrap());
        let mut handles = Vec::new();
        for i in 0..8 {
            let program = Arc::clone(&program);
            handles.push(std::thread::spawn(move || {
                let usage = if i % 2 == 0 { 0.9 } else { 0.1 };
                let ctx = EvalContext::new().with_workload(&workload_with_cpu(usage));
                program.eval_condition(&ctx).unwrap() == (i % 2 == 0)
            }));
        }
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
