//! Safe predicate language for validation rules.
//!
//! Rule conditions are parsed once (at schema validation) into a small AST
//! and interpreted per candidate. No host code is ever executed, which is
//! what makes user-supplied schemas safe to run.
//!
//! # Syntax
//!
//! - Value references: `business.<role>`, `finance.<role>`,
//!   `business["<header>"]`, `finance["<header>"]`. Missing values are null.
//! - Literals: decimal numbers, single-quoted strings, `true`, `false`,
//!   `null`.
//! - Operators: `== != < <= > >= && || !`, arithmetic `+ - * /`,
//!   `contains`, `matches` (regex).
//! - Functions: `abs(x)`, `num(x)`, `date(x, fmt)`.
//!
//! # Null handling
//!
//! Nulls propagate strictly: a null operand makes comparisons and
//! arithmetic yield false/null instead of erroring, with two exceptions
//! spelled out in the evaluator: `null == null` is true and `null != null`
//! is false.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use ast::{BinaryOp, Expr, Func, Literal, UnaryOp};
pub use eval::{eval, truthy, EvalContext, EvalError, Value};
pub use lexer::{LexError, Lexer, Token};
pub use parser::{parse, ParseError};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CellValue;
    use std::collections::HashMap;

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, CellValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), CellValue::Str(v.to_string())))
            .collect()
    }

    fn eval_bool(expr: &str, business: &[(&str, &str)], finance: &[(&str, &str)]) -> bool {
        let parsed = parse(expr).unwrap();
        let b = row(business);
        let f = row(finance);
        let ctx = EvalContext {
            business: Some(&b),
            finance: Some(&f),
        };
        truthy(&eval(&parsed, &ctx).unwrap())
    }

    #[test]
    fn end_to_end_amount_rule() {
        let fired = eval_bool(
            "abs(num(business.amount) - num(finance.amount)) > 1.0",
            &[("amount", "100.00")],
            &[("amount", "98.00")],
        );
        assert!(fired);
    }

    #[test]
    fn missing_role_is_null_and_false() {
        assert!(!eval_bool("business.missing > 1", &[], &[]));
        assert!(!eval_bool("business.missing == 'x'", &[], &[]));
        assert!(eval_bool("business.missing == null", &[], &[]));
    }

    #[test]
    fn bracket_reference_reaches_unclaimed_headers() {
        assert!(eval_bool(
            "business[\"原始列\"] == 'v'",
            &[("原始列", "v")],
            &[],
        ));
    }

    #[test]
    fn logic_and_string_operators() {
        assert!(eval_bool(
            "business.customer == 'TEST' && finance.state != 'done'",
            &[("customer", "TEST")],
            &[("state", "open")],
        ));
        assert!(eval_bool(
            "business.memo contains 'ref' || false",
            &[("memo", "wire refund")],
            &[],
        ));
        assert!(eval_bool(
            "business.order_id matches '^A[0-9]+$'",
            &[("order_id", "A001")],
            &[],
        ));
    }
}
