//! Tree-walking evaluator plus the C1-aligned typecast step (§4.6: "a
//! non-null result is typecast via the same rules as C1").

use crate::parser::{BinOp, Expr, UnOp};
use crate::Context;
use edge_model::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    Parse(String),
    Type(String),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Parse(s) => write!(f, "parse error: {s}"),
            EvalError::Type(s) => write!(f, "type error: {s}"),
        }
    }
}

impl std::error::Error for EvalError {}

#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl EvalResult {
    fn as_f64(&self) -> Option<f64> {
        match self {
            EvalResult::Num(n) => Some(*n),
            EvalResult::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            EvalResult::Str(s) => s.trim().parse().ok(),
            EvalResult::Null => None,
        }
    }

    fn truthy(&self) -> bool {
        match self {
            EvalResult::Bool(b) => *b,
            EvalResult::Num(n) => *n != 0.0,
            EvalResult::Str(s) => !s.is_empty(),
            EvalResult::Null => false,
        }
    }

    fn display(&self) -> String {
        match self {
            EvalResult::Num(n) => n.to_string(),
            EvalResult::Str(s) => s.clone(),
            EvalResult::Bool(b) => b.to_string(),
            EvalResult::Null => String::new(),
        }
    }
}

pub fn eval(expr: &Expr, ctx: &Context) -> Result<EvalResult, EvalError> {
    match expr {
        Expr::Num(n) => Ok(EvalResult::Num(*n)),
        Expr::Str(s) => Ok(EvalResult::Str(s.clone())),
        Expr::Bool(b) => Ok(EvalResult::Bool(*b)),
        Expr::Path(segments) => Ok(resolve_path(segments, ctx)),
        Expr::Unary(op, inner) => {
            let v = eval(inner, ctx)?;
            match op {
                UnOp::Neg => v.as_f64().map(|n| EvalResult::Num(-n)).ok_or_else(|| EvalError::Type("cannot negate a non-numeric value".into())),
                UnOp::Not => Ok(EvalResult::Bool(!v.truthy())),
            }
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(op, eval(lhs, ctx)?, eval(rhs, ctx)?),
        Expr::Ternary(cond, then_branch, else_branch) => {
            if eval(cond, ctx)?.truthy() {
                eval(then_branch, ctx)
            } else {
                eval(else_branch, ctx)
            }
        }
    }
}

fn eval_binary(op: &BinOp, lhs: EvalResult, rhs: EvalResult) -> Result<EvalResult, EvalError> {
    use BinOp::*;
    match op {
        Add | Sub | Mul | Div => {
            let (a, b) = (lhs.as_f64(), rhs.as_f64());
            let (a, b) = match (a, b) {
                (Some(a), Some(b)) => (a, b),
                _ => return Ok(EvalResult::Null),
            };
            Ok(EvalResult::Num(match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                Div if b == 0.0 => return Ok(EvalResult::Null),
                Div => a / b,
                _ => unreachable!(),
            }))
        }
        Lt | Le | Gt | Ge => {
            let (a, b) = match (lhs.as_f64(), rhs.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Ok(EvalResult::Null),
            };
            Ok(EvalResult::Bool(match op {
                Lt => a < b,
                Le => a <= b,
                Gt => a > b,
                Ge => a >= b,
                _ => unreachable!(),
            }))
        }
        Eq | Ne => {
            let equal = match (lhs.as_f64(), rhs.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => lhs.display() == rhs.display(),
            };
            Ok(EvalResult::Bool(if *op == Eq { equal } else { !equal }))
        }
        And => Ok(EvalResult::Bool(lhs.truthy() && rhs.truthy())),
        Or => Ok(EvalResult::Bool(lhs.truthy() || rhs.truthy())),
    }
}

/// `devices.<id>.<var>`: the only root namespace the grammar exposes
/// (§4.6's example). Any unresolvable segment yields null rather than an
/// error — a reading that hasn't arrived yet is routine, not exceptional.
fn resolve_path(segments: &[String], ctx: &Context) -> EvalResult {
    if segments.len() != 3 || segments[0] != "devices" {
        return EvalResult::Null;
    }
    let Some(device) = ctx.devices.get(&segments[1]) else {
        return EvalResult::Null;
    };
    match device.fields.get(&segments[2]) {
        Some(Value::Int(i)) => EvalResult::Num(*i as f64),
        Some(Value::Float(f)) => EvalResult::Num(*f),
        Some(Value::Str(s)) => EvalResult::Str(s.clone()),
        Some(Value::Bool(b)) => EvalResult::Bool(*b),
        None => EvalResult::Null,
    }
}

/// Typecast the evaluated result the same way C1 typecasts a coerced
/// reading. `None` means "drop this output" — either the result was
/// null, or the requested typecast doesn't apply to it.
pub fn typecast(result: EvalResult, typecast: Option<&str>) -> Option<Value> {
    if result == EvalResult::Null {
        return None;
    }
    match typecast {
        Some("int") => result.as_f64().map(|f| Value::Int(f as i64)),
        Some("float") => result.as_f64().map(Value::Float),
        Some("str") => Some(Value::Str(result.display())),
        Some("bool") => Some(Value::Bool(result.truthy())),
        Some(_) => None,
        None => match result {
            EvalResult::Num(n) => Some(Value::Float(n)),
            EvalResult::Str(s) => Some(Value::Str(s)),
            EvalResult::Bool(b) => Some(Value::Bool(b)),
            EvalResult::Null => None,
        },
    }
}
