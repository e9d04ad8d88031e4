use super::Parser;
use crate::ast::*;
use crate::error::{Error, Result};
use crate::tokenizer::Token;
use crate::value::Value;

// Precedence, loosest first:
//   condition   := unary_cond (AND|OR condition)?     right-recursive
//   unary_cond  := NOT unary_cond | predicate
//   predicate   := additive (cmp additive | [NOT] BETWEEN | [NOT] LIKE | [NOT] IN | IS [NOT] NULL)?
//   additive    := multiplicative ((+|-) multiplicative)*
//   multiplicative := unary ((*|/) unary)*
//   unary       := - unary | primary
impl Parser {
    pub(super) fn parse_expression(&mut self) -> Result<Expr> {
        let left = self.parse_unary_condition()?;
        let op = match self.current_token() {
            Token::And => LogicalOp::And,
            Token::Or => LogicalOp::Or,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_expression()?;
        Ok(Expr::Logical {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn parse_unary_condition(&mut self) -> Result<Expr> {
        if self.eat_if(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.parse_unary_condition()?)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr> {
        let left = self.parse_additive()?;

        let op = match self.current_token() {
            Token::Equal => Some(ComparisonOp::Eq),
            Token::NotEqual => Some(ComparisonOp::NotEq),
            Token::Lower => Some(ComparisonOp::Lt),
            Token::LowerEqual => Some(ComparisonOp::LtEq),
            Token::Greater => Some(ComparisonOp::Gt),
            Token::GreaterEqual => Some(ComparisonOp::GtEq),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_additive()?;
            return Ok(Expr::Comparison {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }

        match self.current_token() {
            Token::IsNull | Token::IsNotNull => {
                let negated = self.check(&Token::IsNotNull);
                self.advance();
                Ok(Expr::IsNull {
                    expr: Box::new(left),
                    negated,
                })
            }
            Token::Is => Err(self.error("expected NULL or NOT NULL after IS")),
            Token::Not if matches!(self.peek_token(1), Token::Between | Token::Like | Token::In) => {
                self.advance();
                self.parse_postfix_test(left, true)
            }
            Token::Between | Token::Like | Token::In => self.parse_postfix_test(left, false),
            _ => Ok(left),
        }
    }

    /// BETWEEN, LIKE or IN following `expr`.
    fn parse_postfix_test(&mut self, expr: Expr, negated: bool) -> Result<Expr> {
        let expr = Box::new(expr);
        match self.current_token() {
            Token::Between => {
                self.advance();
                let low = self.parse_additive()?;
                self.consume(Token::And)?;
                let high = self.parse_additive()?;
                Ok(Expr::Between {
                    expr,
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                })
            }
            Token::Like => {
                self.advance();
                let pattern = self.parse_additive()?;
                Ok(Expr::Like {
                    expr,
                    pattern: Box::new(pattern),
                    negated,
                })
            }
            _ => {
                self.consume(Token::In)?;
                self.consume(Token::LeftParen)?;
                if matches!(self.current_token(), Token::Select | Token::With) {
                    return Err(self.error("subqueries are not supported in IN lists"));
                }
                let list = self.parse_expression_list()?;
                self.consume(Token::RightParen)?;
                Ok(Expr::InList {
                    expr,
                    list,
                    negated,
                })
            }
        }
    }

    pub(super) fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current_token() {
                Token::Plus => ArithmeticOp::Add,
                Token::Minus => ArithmeticOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current_token() {
                Token::Star => ArithmeticOp::Mul,
                Token::Slash => ArithmeticOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat_if(&Token::Minus) {
            return Ok(Expr::Negate(Box::new(self.parse_unary()?)));
        }
        if self.eat_if(&Token::Plus) {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let literal = match self.current_token() {
            Token::Number(n) => Some(Value::Int(*n)),
            Token::FloatNumber(f) => Some(Value::Float(*f)),
            Token::String(s) => Some(Value::text(s)),
            Token::True => Some(Value::Bool(true)),
            Token::False => Some(Value::Bool(false)),
            Token::Null => Some(Value::Null),
            _ => None,
        };
        if let Some(value) = literal {
            self.advance();
            return Ok(Expr::Literal(value));
        }

        match self.current_token().clone() {
            Token::LeftParen => {
                self.advance();
                if matches!(self.current_token(), Token::Select | Token::With) {
                    return Err(self.error("scalar subqueries are not supported"));
                }
                let expr = self.parse_expression()?;
                self.consume(Token::RightParen)?;
                Ok(expr)
            }
            Token::Case => self.parse_case(),
            Token::Cast => {
                self.advance();
                self.consume(Token::LeftParen)?;
                let expr = self.parse_expression()?;
                self.consume(Token::As)?;
                let data_type = self.consume_data_type()?;
                self.consume(Token::RightParen)?;
                Ok(Expr::Cast {
                    expr: Box::new(expr),
                    data_type,
                })
            }
            Token::Extract => {
                self.advance();
                self.consume(Token::LeftParen)?;
                let position = self.current_position();
                let field = self.consume_ident()?;
                let field = field
                    .parse::<DateField>()
                    .map_err(|_| Error::syntax(format!("unknown EXTRACT field {field}"), Some(position)))?;
                self.consume(Token::From)?;
                let expr = self.parse_expression()?;
                self.consume(Token::RightParen)?;
                Ok(Expr::Extract {
                    field,
                    expr: Box::new(expr),
                })
            }
            Token::Replace => {
                self.advance();
                let mut args = self.parse_call_args("REPLACE", 3, 3)?.into_iter();
                match (args.next(), args.next(), args.next()) {
                    (Some(expr), Some(from), Some(to)) => Ok(Expr::Replace {
                        expr: Box::new(expr),
                        from: Box::new(from),
                        to: Box::new(to),
                    }),
                    _ => Err(self.error("REPLACE expects 3 arguments")),
                }
            }
            Token::Ident(name) => {
                self.advance();
                if self.check(&Token::LeftParen) {
                    return self.parse_function(&name);
                }
                match name.parse::<ScalarFunc>() {
                    Ok(func) if func.is_niladic_keyword() => Ok(Expr::Function {
                        func,
                        args: Vec::new(),
                    }),
                    _ => Ok(Expr::Column(ColumnRef::new(name))),
                }
            }
            Token::QualifiedIdent { table, column } => {
                self.advance();
                Ok(Expr::Column(ColumnRef::qualified(table, column)))
            }
            _ => Err(self.unexpected("where an expression was expected")),
        }
    }

    fn parse_expression_list(&mut self) -> Result<Vec<Expr>> {
        let mut list = vec![self.parse_expression()?];
        while self.eat_if(&Token::Comma) {
            list.push(self.parse_expression()?);
        }
        Ok(list)
    }

    /// `( args )` with an arity check.
    fn parse_call_args(&mut self, name: &str, min: usize, max: usize) -> Result<Vec<Expr>> {
        let position = self.current_position();
        self.consume(Token::LeftParen)?;
        let args = if self.check(&Token::RightParen) {
            Vec::new()
        } else {
            self.parse_expression_list()?
        };
        self.consume(Token::RightParen)?;
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                min.to_string()
            } else if max == usize::MAX {
                format!("at least {min}")
            } else {
                format!("{min} to {max}")
            };
            return Err(Error::syntax(
                format!("{name} expects {expected} arguments, got {}", args.len()),
                Some(position),
            ));
        }
        Ok(args)
    }

    fn parse_function(&mut self, name: &str) -> Result<Expr> {
        let upper = name.to_ascii_uppercase();
        if let Ok(func) = upper.parse::<AggregateFunc>() {
            return self.parse_aggregate(func);
        }
        match upper.as_str() {
            "COALESCE" => Ok(Expr::Coalesce(self.parse_call_args(&upper, 1, usize::MAX)?)),
            "CONCAT" => Ok(Expr::Concat(self.parse_call_args(&upper, 1, usize::MAX)?)),
            "NULLIF" => {
                let mut args = self.parse_call_args(&upper, 2, 2)?.into_iter();
                match (args.next(), args.next()) {
                    (Some(left), Some(right)) => Ok(Expr::NullIf {
                        left: Box::new(left),
                        right: Box::new(right),
                    }),
                    _ => Err(self.error("NULLIF expects 2 arguments")),
                }
            }
            _ => {
                let func = upper
                    .parse::<ScalarFunc>()
                    .map_err(|_| self.error(format!("unknown function {name}")))?;
                let (min, max) = func.arity();
                let args = self.parse_call_args(&upper, min, max)?;
                Ok(Expr::Function { func, args })
            }
        }
    }

    fn parse_aggregate(&mut self, func: AggregateFunc) -> Result<Expr> {
        self.consume(Token::LeftParen)?;
        let distinct = self.eat_if(&Token::Distinct);
        let arg = if self.check(&Token::Star) {
            if distinct {
                return Err(self.error(format!("{func}(DISTINCT *) is not allowed")));
            }
            if func != AggregateFunc::Count {
                return Err(self.error(format!("{func}(*) is not allowed, only COUNT(*)")));
            }
            self.advance();
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.consume(Token::RightParen)?;
        Ok(Expr::Aggregate {
            func,
            arg,
            distinct,
        })
    }

    fn parse_case(&mut self) -> Result<Expr> {
        self.consume(Token::Case)?;
        let operand = if self.check(&Token::When) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };

        let mut branches = Vec::new();
        while self.eat_if(&Token::When) {
            let condition = self.parse_expression()?;
            self.consume(Token::Then)?;
            let result = self.parse_expression()?;
            branches.push(WhenClause { condition, result });
        }
        if branches.is_empty() {
            return Err(self.error("CASE requires at least one WHEN branch"));
        }

        let else_result = if self.eat_if(&Token::Else) {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        self.consume(Token::End)?;
        Ok(Expr::Case {
            operand,
            branches,
            else_result,
        })
    }
}
