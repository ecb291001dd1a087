//! Tree-walking evaluator with strict null propagation.
//!
//! A null operand makes comparisons false and arithmetic null, so rules
//! referencing absent fields degrade to "did not fire" instead of erroring
//! (the one genuine error source left is an invalid regex in `matches`).

use super::ast::{BinaryOp, Expr, Func, Literal, Side, UnaryOp};
use crate::value::{format_num, CellValue};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashMap;

type Row = HashMap<String, CellValue>;

/// Runtime value produced while walking the AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Date(NaiveDate),
}

impl Value {
    fn from_cell(cell: &CellValue) -> Self {
        match cell {
            CellValue::Null => Self::Null,
            CellValue::Num(n) => Self::Num(*n),
            CellValue::Str(s) => Self::Str(s.clone()),
            CellValue::Date(d) => Self::Date(*d),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn as_num(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    fn display(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Num(n) => format_num(*n),
            Self::Str(s) => s.clone(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Rows visible to an expression. Either side may be absent for orphan
/// candidates; every reference through an absent side is null.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext<'a> {
    pub business: Option<&'a Row>,
    pub finance: Option<&'a Row>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub message: String,
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EvalError {}

/// Final coercion of an expression result to a predicate outcome.
/// Only a literal true fires a rule; null and non-boolean values do not.
pub fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

pub fn eval(expr: &Expr, ctx: &EvalContext<'_>) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Num(n) => Value::Num(*n),
            Literal::Str(s) => Value::Str(s.clone()),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
        }),
        Expr::FieldRef { side, field } => {
            let row = match side {
                Side::Business => ctx.business,
                Side::Finance => ctx.finance,
            };
            Ok(row
                .and_then(|r| r.get(field))
                .map(Value::from_cell)
                .unwrap_or(Value::Null))
        }
        Expr::Unary { op, expr } => {
            let value = eval(expr, ctx)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!truthy(&value)),
                UnaryOp::Neg => match value.as_num() {
                    Some(n) => Value::Num(-n),
                    None => Value::Null,
                },
            })
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, ctx),
        Expr::Call { func, args } => eval_call(*func, args, ctx),
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &EvalContext<'_>,
) -> Result<Value, EvalError> {
    // Logic operators short-circuit and never propagate null.
    match op {
        BinaryOp::And => {
            let l = eval(lhs, ctx)?;
            if !truthy(&l) {
                return Ok(Value::Bool(false));
            }
            let r = eval(rhs, ctx)?;
            return Ok(Value::Bool(truthy(&r)));
        }
        BinaryOp::Or => {
            let l = eval(lhs, ctx)?;
            if truthy(&l) {
                return Ok(Value::Bool(true));
            }
            let r = eval(rhs, ctx)?;
            return Ok(Value::Bool(truthy(&r)));
        }
        _ => {}
    }

    let l = eval(lhs, ctx)?;
    let r = eval(rhs, ctx)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(equals(&l, &r))),
        BinaryOp::Ne => {
            // Both-null and one-null comparisons are false either way.
            if l.is_null() || r.is_null() {
                Ok(Value::Bool(false))
            } else {
                Ok(Value::Bool(!equals(&l, &r)))
            }
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Bool(false));
            }
            let ordering = compare(&l, &r);
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == std::cmp::Ordering::Less,
                BinaryOp::Le => ordering != std::cmp::Ordering::Greater,
                BinaryOp::Gt => ordering == std::cmp::Ordering::Greater,
                BinaryOp::Ge => ordering != std::cmp::Ordering::Less,
                _ => unreachable!(),
            }))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let (Some(a), Some(b)) = (l.as_num(), r.as_num()) else {
                return Ok(Value::Null);
            };
            Ok(match op {
                BinaryOp::Add => Value::Num(a + b),
                BinaryOp::Sub => Value::Num(a - b),
                BinaryOp::Mul => Value::Num(a * b),
                BinaryOp::Div => {
                    if b == 0.0 {
                        Value::Null
                    } else {
                        Value::Num(a / b)
                    }
                }
                _ => unreachable!(),
            })
        }
        BinaryOp::Contains => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(l.display().contains(&r.display())))
        }
        BinaryOp::Matches => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Bool(false));
            }
            let pattern = r.display();
            let regex = Regex::new(&pattern).map_err(|e| EvalError {
                message: format!("invalid regex '{pattern}': {e}"),
            })?;
            Ok(Value::Bool(regex.is_match(&l.display())))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

/// Equality: both-null is true, one-null is false, numbers compare
/// numerically when both sides coerce, everything else as strings.
fn equals(l: &Value, r: &Value) -> bool {
    if l.is_null() && r.is_null() {
        return true;
    }
    if l.is_null() || r.is_null() {
        return false;
    }
    if let (Value::Bool(a), Value::Bool(b)) = (l, r) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (l.as_num(), r.as_num()) {
        return a == b;
    }
    l.display() == r.display()
}

fn compare(l: &Value, r: &Value) -> std::cmp::Ordering {
    if let (Value::Date(a), Value::Date(b)) = (l, r) {
        return a.cmp(b);
    }
    if let (Some(a), Some(b)) = (l.as_num(), r.as_num()) {
        return a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal);
    }
    l.display().cmp(&r.display())
}

fn eval_call(func: Func, args: &[Expr], ctx: &EvalContext<'_>) -> Result<Value, EvalError> {
    match func {
        Func::Abs => {
            let value = eval(&args[0], ctx)?;
            Ok(match value.as_num() {
                Some(n) => Value::Num(n.abs()),
                None => Value::Null,
            })
        }
        Func::Num => {
            let value = eval(&args[0], ctx)?;
            Ok(match value.as_num() {
                Some(n) => Value::Num(n),
                None => Value::Null,
            })
        }
        Func::Date => {
            let value = eval(&args[0], ctx)?;
            let format = eval(&args[1], ctx)?;
            if value.is_null() || format.is_null() {
                return Ok(Value::Null);
            }
            if let Value::Date(d) = value {
                return Ok(Value::Date(d));
            }
            Ok(
                match NaiveDate::parse_from_str(value.display().trim(), &format.display()) {
                    Ok(d) => Value::Date(d),
                    Err(_) => Value::Null,
                },
            )
        }
    }
}
