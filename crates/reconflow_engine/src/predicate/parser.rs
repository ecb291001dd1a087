//! Recursive-descent parser for predicate expressions.
//!
//! Precedence, loosest first: `||`, `&&`, comparison (`== != < <= > >=
//! contains matches`), additive (`+ -`), multiplicative (`* /`), unary
//! (`! -`), primary. Comparisons do not chain (`a < b < c` is an error).

use super::ast::{BinaryOp, Expr, Func, Literal, Side, UnaryOp};
use super::lexer::{Lexer, Token};

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

impl From<super::lexer::LexError> for ParseError {
    fn from(e: super::lexer::LexError) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

/// Parse an expression string into an AST.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    parser.expect(Token::Eof)?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        let got = self.bump();
        if got == expected {
            Ok(())
        } else {
            Err(ParseError {
                message: format!("expected {expected}, found {got}"),
            })
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.and_expr()?;
        while *self.peek() == Token::OrOr {
            self.bump();
            let rhs = self.and_expr()?;
            lhs = Expr::binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.comparison()?;
        while *self.peek() == Token::AndAnd {
            self.bump();
            let rhs = self.comparison()?;
            lhs = Expr::binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Token::EqEq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            Token::Contains => BinaryOp::Contains,
            Token::Matches => BinaryOp::Matches,
            _ => return Ok(lhs),
        };
        self.bump();
        let rhs = self.additive()?;
        Ok(Expr::binary(op, lhs, rhs))
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.multiplicative()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.unary()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Token::Bang => {
                self.bump();
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(self.unary()?),
                })
            }
            Token::Minus => {
                self.bump();
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(self.unary()?),
                })
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.bump() {
            Token::Number(n) => Ok(Expr::Literal(Literal::Num(n))),
            Token::Str(s) => Ok(Expr::Literal(Literal::Str(s))),
            Token::True => Ok(Expr::Literal(Literal::Bool(true))),
            Token::False => Ok(Expr::Literal(Literal::Bool(false))),
            Token::Null => Ok(Expr::Literal(Literal::Null)),
            Token::LParen => {
                let expr = self.or_expr()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::Ident(name) => self.ident_tail(name),
            other => Err(ParseError {
                message: format!("expected a value, found {other}"),
            }),
        }
    }

    /// An identifier continues as a function call, a dotted field reference
    /// or a bracketed field reference.
    fn ident_tail(&mut self, name: String) -> Result<Expr, ParseError> {
        match self.peek() {
            Token::LParen => {
                self.bump();
                let func = match name.as_str() {
                    "abs" => Func::Abs,
                    "num" => Func::Num,
                    "date" => Func::Date,
                    other => {
                        return Err(ParseError {
                            message: format!("unknown function '{other}'"),
                        })
                    }
                };
                let mut args = Vec::new();
                if *self.peek() != Token::RParen {
                    loop {
                        args.push(self.or_expr()?);
                        if *self.peek() == Token::Comma {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RParen)?;
                if args.len() != func.arity() {
                    return Err(ParseError {
                        message: format!(
                            "{}() takes {} argument(s), got {}",
                            func.name(),
                            func.arity(),
                            args.len()
                        ),
                    });
                }
                Ok(Expr::Call { func, args })
            }
            Token::Dot => {
                let side = self.side(&name)?;
                self.bump();
                match self.bump() {
                    Token::Ident(field) => Ok(Expr::field(side, field)),
                    other => Err(ParseError {
                        message: format!("expected a field name after '.', found {other}"),
                    }),
                }
            }
            Token::LBracket => {
                let side = self.side(&name)?;
                self.bump();
                let field = match self.bump() {
                    Token::Str(s) => s,
                    other => {
                        return Err(ParseError {
                            message: format!("expected a quoted header inside [], found {other}"),
                        })
                    }
                };
                self.expect(Token::RBracket)?;
                Ok(Expr::field(side, field))
            }
            _ => Err(ParseError {
                message: format!(
                    "bare identifier '{name}': use business.<role> or finance.<role>"
                ),
            }),
        }
    }

    fn side(&self, name: &str) -> Result<Side, ParseError> {
        match name {
            "business" => Ok(Side::Business),
            "finance" => Ok(Side::Finance),
            other => Err(ParseError {
                message: format!("unknown reference '{other}': expected business or finance"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_precedence() {
        let expr = parse("1 + 2 * 3 == 7 && !false").unwrap();
        // (((1 + (2 * 3)) == 7) && (!false))
        match expr {
            Expr::Binary { op: BinaryOp::And, lhs, .. } => match *lhs {
                Expr::Binary { op: BinaryOp::Eq, .. } => {}
                other => panic!("unexpected lhs {other:?}"),
            },
            other => panic!("unexpected root {other:?}"),
        }
    }

    #[test]
    fn parses_field_refs_and_calls() {
        let expr = parse("abs(num(business.amount) - num(finance.amount)) > 1.0").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Gt, .. }));

        let expr = parse("date(business.date, '%Y-%m-%d') == date(finance.date, '%Y-%m-%d')");
        assert!(expr.is_ok());
    }

    #[test]
    fn rejects_unknown_side() {
        let err = parse("ledger.amount > 0").unwrap_err();
        assert!(err.message.contains("unknown reference"));
    }

    #[test]
    fn rejects_unknown_function_and_bad_arity() {
        assert!(parse("sqrt(4)").is_err());
        let err = parse("abs(1, 2)").unwrap_err();
        assert!(err.message.contains("argument"));
        assert!(parse("date(business.date)").is_err());
    }

    #[test]
    fn rejects_trailing_tokens_and_dangling_operator() {
        assert!(parse("business.a == 1 extra").is_err());
        assert!(parse("business.amount >").is_err());
    }

    #[test]
    fn parses_bracket_access() {
        let expr = parse("business[\"对方户名\"] contains '公司'").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Contains, .. }));
    }

    #[test]
    fn unary_minus_binds_tighter_than_compare() {
        let expr = parse("-business.amount < 0").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Lt, .. }));
    }
}
