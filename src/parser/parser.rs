//! Recursive-descent parser
//!
//! Operator precedence, lowest first:
//! `OR`, `AND`, `NOT`, relational / `IN` / `BETWEEN`, `|`, `&`,
//! `<<` `>>`, `+` `-`, `*` `/` `%`, unary `-` `+` `~`.

use super::ast::{
    BinaryOp, ColumnRef, Expr, JobQueryAst, JoinAst, JoinCondition, LiteralTuple, NamedExpr, OrderItem,
    Projection, QueryAst, TableRef, TotalsMode, UnaryOp,
};
use super::lexer::{syntax_error, tokenize, Keyword, Token, TokenKind};
use super::placeholders::Placeholders;
use crate::planner::errors::{PrepareError, PrepareResult};
use crate::value::Value;

/// Parses a full query
pub fn parse_query(source: &str, placeholders: &Placeholders, max_depth: usize) -> PrepareResult<QueryAst> {
    let tokens = tokenize(source, placeholders)?;
    let mut parser = Parser::new(source, tokens, max_depth);
    let query = parser.query()?;
    parser.expect_end()?;
    Ok(query)
}

/// Parses `<projection> [WHERE <predicate>]`
pub fn parse_job_query(source: &str, max_depth: usize) -> PrepareResult<JobQueryAst> {
    let tokens = tokenize(source, &Placeholders::empty())?;
    let mut parser = Parser::new(source, tokens, max_depth);
    let projection = parser.projection()?;
    let where_clause = if parser.eat_keyword(Keyword::Where) {
        Some(parser.expr()?)
    } else {
        None
    };
    parser.expect_end()?;
    Ok(JobQueryAst {
        projection,
        where_clause,
    })
}

/// Parses a standalone expression, e.g. a computed column definition
pub fn parse_expression(source: &str, max_depth: usize) -> PrepareResult<Expr> {
    let tokens = tokenize(source, &Placeholders::empty())?;
    let mut parser = Parser::new(source, tokens, max_depth);
    let expr = parser.expr()?;
    parser.expect_end()?;
    Ok(expr)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: Vec<Token>, max_depth: usize) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
            depth: 0,
            max_depth,
        }
    }

    fn current(&self) -> &Token {
        // the lexer always terminates the list with `End`
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, expecting: &str) -> PrepareError {
        let token = self.current();
        let found = if token.kind == TokenKind::End {
            "end of input".to_string()
        } else {
            format!("\"{}\"", &self.source[token.start..token.end])
        };
        syntax_error(
            self.source,
            token.start,
            token.end,
            &format!("unexpected {}, expecting {}", found, expecting),
        )
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, expecting: &str) -> PrepareResult<Token> {
        if self.kind() == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expecting))
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        self.eat(&TokenKind::Keyword(keyword))
    }

    fn expect_keyword(&mut self, keyword: Keyword, expecting: &str) -> PrepareResult<()> {
        self.expect(&TokenKind::Keyword(keyword), expecting).map(|_| ())
    }

    fn expect_end(&self) -> PrepareResult<()> {
        if *self.kind() == TokenKind::End {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }

    fn identifier(&mut self, expecting: &str) -> PrepareResult<String> {
        match self.kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(expecting)),
        }
    }

    fn enter(&mut self) -> PrepareResult<()> {
        if self.depth >= self.max_depth {
            return Err(PrepareError::expression_too_complex(self.max_depth).with_position(self.current().start));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ---- clauses ----

    fn query(&mut self) -> PrepareResult<QueryAst> {
        let projection = self.projection()?;
        self.expect_keyword(Keyword::From, "FROM")?;
        let from = self.table_ref()?;

        let mut joins = Vec::new();
        loop {
            let is_left = if self.eat_keyword(Keyword::Left) {
                self.expect_keyword(Keyword::Join, "JOIN")?;
                true
            } else if self.eat_keyword(Keyword::Join) {
                false
            } else {
                break;
            };
            joins.push(self.join(is_left)?);
        }

        let where_clause = if self.eat_keyword(Keyword::Where) {
            Some(self.expr()?)
        } else {
            None
        };

        let mut group_by = None;
        let mut totals = TotalsMode::None;
        let mut having = None;
        if self.eat_keyword(Keyword::Group) {
            self.expect_keyword(Keyword::By, "BY")?;
            group_by = Some(self.named_list()?);
            if self.with_totals()? {
                totals = TotalsMode::BeforeHaving;
            }
            if self.eat_keyword(Keyword::Having) {
                having = Some(self.expr()?);
                if totals == TotalsMode::None && self.with_totals()? {
                    totals = TotalsMode::AfterHaving;
                }
            }
        }

        let mut order_by = Vec::new();
        if self.eat_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By, "BY")?;
            loop {
                let expr = self.expr()?;
                let descending = if self.eat_keyword(Keyword::Desc) {
                    true
                } else {
                    self.eat_keyword(Keyword::Asc);
                    false
                };
                order_by.push(OrderItem { expr, descending });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }

        let offset = if self.eat_keyword(Keyword::Offset) {
            Some(self.count()?)
        } else {
            None
        };
        let limit = if self.eat_keyword(Keyword::Limit) {
            Some(self.count()?)
        } else {
            None
        };

        Ok(QueryAst {
            projection,
            from,
            joins,
            where_clause,
            group_by,
            totals,
            having,
            order_by,
            offset,
            limit,
        })
    }

    fn with_totals(&mut self) -> PrepareResult<bool> {
        if self.eat_keyword(Keyword::With) {
            self.expect_keyword(Keyword::Totals, "TOTALS")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn count(&mut self) -> PrepareResult<u64> {
        match self.kind().clone() {
            TokenKind::Literal(Value::Int64(v)) if v >= 0 => {
                self.advance();
                Ok(v as u64)
            }
            TokenKind::Literal(Value::Uint64(v)) => {
                self.advance();
                Ok(v)
            }
            _ => Err(self.unexpected("non-negative integer")),
        }
    }

    fn projection(&mut self) -> PrepareResult<Projection> {
        if self.eat(&TokenKind::Star) {
            return Ok(Projection::Star);
        }
        Ok(Projection::Items(self.named_list()?))
    }

    fn named_list(&mut self) -> PrepareResult<Vec<NamedExpr>> {
        let mut items = Vec::new();
        loop {
            let expr = self.expr()?;
            let alias = if self.eat_keyword(Keyword::As) {
                Some(self.identifier("alias")?)
            } else {
                None
            };
            items.push(NamedExpr { expr, alias });
            if !self.eat(&TokenKind::Comma) {
                return Ok(items);
            }
        }
    }

    fn table_ref(&mut self) -> PrepareResult<TableRef> {
        let position = self.current().start;
        let path = match self.kind().clone() {
            TokenKind::TablePath(path) => {
                self.advance();
                path
            }
            _ => return Err(self.unexpected("table path")),
        };
        let alias = if self.eat_keyword(Keyword::As) {
            Some(self.identifier("table alias")?)
        } else if let TokenKind::Identifier(name) = self.kind().clone() {
            self.advance();
            Some(name)
        } else {
            None
        };
        Ok(TableRef { path, alias, position })
    }

    fn join(&mut self, is_left: bool) -> PrepareResult<JoinAst> {
        let table = self.table_ref()?;
        let condition = if self.eat_keyword(Keyword::Using) {
            let mut columns = vec![self.identifier("column name")?];
            while self.eat(&TokenKind::Comma) {
                columns.push(self.identifier("column name")?);
            }
            JoinCondition::Using(columns)
        } else if self.eat_keyword(Keyword::On) {
            JoinCondition::On(self.expr()?)
        } else {
            return Err(self.unexpected("USING or ON"));
        };
        Ok(JoinAst {
            is_left,
            table,
            condition,
        })
    }

    // ---- expressions ----

    fn expr(&mut self) -> PrepareResult<Expr> {
        self.enter()?;
        let result = self.or_expr();
        self.leave();
        result
    }

    fn or_expr(&mut self) -> PrepareResult<Expr> {
        let mut lhs = self.and_expr()?;
        while self.eat_keyword(Keyword::Or) {
            let rhs = self.and_expr()?;
            lhs = Expr::binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> PrepareResult<Expr> {
        let mut lhs = self.not_expr()?;
        while self.eat_keyword(Keyword::And) {
            let rhs = self.not_expr()?;
            lhs = Expr::binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> PrepareResult<Expr> {
        if self.eat_keyword(Keyword::Not) {
            self.enter()?;
            let operand = self.not_expr();
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand?),
            });
        }
        self.relational()
    }

    fn relational(&mut self) -> PrepareResult<Expr> {
        let lhs = self.bit_or()?;
        let op = match self.kind() {
            TokenKind::Equal => Some(BinaryOp::Equal),
            TokenKind::NotEqual => Some(BinaryOp::NotEqual),
            TokenKind::Less => Some(BinaryOp::Less),
            TokenKind::LessOrEqual => Some(BinaryOp::LessOrEqual),
            TokenKind::Greater => Some(BinaryOp::Greater),
            TokenKind::GreaterOrEqual => Some(BinaryOp::GreaterOrEqual),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let rhs = self.bit_or()?;
            return Ok(Expr::binary(op, lhs, rhs));
        }

        let negated = matches!(
            (self.kind(), self.tokens.get(self.pos + 1).map(|t| &t.kind)),
            (
                TokenKind::Keyword(Keyword::Not),
                Some(TokenKind::Keyword(Keyword::In | Keyword::Between))
            )
        );
        if negated {
            self.advance();
        }

        let expr = if self.eat_keyword(Keyword::In) {
            Expr::In {
                args: lhs.into_items(),
                values: self.in_values()?,
            }
        } else if self.eat_keyword(Keyword::Between) {
            Expr::Between {
                args: lhs.into_items(),
                ranges: self.between_ranges()?,
            }
        } else {
            return Ok(lhs);
        };

        Ok(if negated {
            Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(expr),
            }
        } else {
            expr
        })
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> PrepareResult<Expr>,
        ops: &[(TokenKind, BinaryOp)],
    ) -> PrepareResult<Expr> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (kind, op) in ops {
                if self.kind() == kind {
                    self.advance();
                    let rhs = next(self)?;
                    lhs = Expr::binary(*op, lhs, rhs);
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn bit_or(&mut self) -> PrepareResult<Expr> {
        self.binary_level(Self::bit_and, &[(TokenKind::Pipe, BinaryOp::BitOr)])
    }

    fn bit_and(&mut self) -> PrepareResult<Expr> {
        self.binary_level(Self::shift, &[(TokenKind::Ampersand, BinaryOp::BitAnd)])
    }

    fn shift(&mut self) -> PrepareResult<Expr> {
        self.binary_level(
            Self::additive,
            &[
                (TokenKind::LeftShift, BinaryOp::LeftShift),
                (TokenKind::RightShift, BinaryOp::RightShift),
            ],
        )
    }

    fn additive(&mut self) -> PrepareResult<Expr> {
        self.binary_level(
            Self::multiplicative,
            &[(TokenKind::Plus, BinaryOp::Plus), (TokenKind::Minus, BinaryOp::Minus)],
        )
    }

    fn multiplicative(&mut self) -> PrepareResult<Expr> {
        self.binary_level(
            Self::unary,
            &[
                (TokenKind::Star, BinaryOp::Multiply),
                (TokenKind::Slash, BinaryOp::Divide),
                (TokenKind::Percent, BinaryOp::Modulo),
            ],
        )
    }

    fn unary(&mut self) -> PrepareResult<Expr> {
        let op = match self.kind() {
            TokenKind::Minus => UnaryOp::Minus,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Tilde => UnaryOp::BitNot,
            _ => return self.primary(),
        };
        self.advance();
        self.enter()?;
        let operand = self.unary();
        self.leave();
        let operand = operand?;
        Ok(match (op, operand) {
            (UnaryOp::Minus, Expr::Literal(value)) => match negate_literal(&value) {
                Some(negated) => Expr::Literal(negated),
                None => Expr::Unary {
                    op,
                    operand: Box::new(Expr::Literal(value)),
                },
            },
            (UnaryOp::Plus, Expr::Literal(value)) if value.value_type().is_numeric() => Expr::Literal(value),
            (op, operand) => Expr::Unary {
                op,
                operand: Box::new(operand),
            },
        })
    }

    fn primary(&mut self) -> PrepareResult<Expr> {
        match self.kind().clone() {
            TokenKind::Literal(value) => {
                self.advance();
                Ok(Expr::Literal(value))
            }
            TokenKind::LeftParen => {
                self.advance();
                let items = self.expr_list(&TokenKind::RightParen)?;
                self.expect(&TokenKind::RightParen, "\")\"")?;
                match items.len() {
                    0 => Err(self.unexpected("expression")),
                    1 => Ok(items.into_iter().next().unwrap_or(Expr::Literal(Value::Null))),
                    _ => Ok(Expr::Tuple(items)),
                }
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if self.eat(&TokenKind::Dot) {
                    let column = self.identifier("column name")?;
                    return Ok(Expr::Reference(ColumnRef::new(Some(&name), &column)));
                }
                if self.eat(&TokenKind::LeftParen) {
                    let args = self.expr_list(&TokenKind::RightParen)?;
                    self.expect(&TokenKind::RightParen, "\")\"")?;
                    let name = name.to_ascii_lowercase();
                    if name == "transform" {
                        return self.transform(args);
                    }
                    return Ok(Expr::Function { name, args });
                }
                Ok(Expr::Reference(ColumnRef::new(None, &name)))
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    /// Comma-separated expressions up to (not including) `close`; may be empty
    fn expr_list(&mut self, close: &TokenKind) -> PrepareResult<Vec<Expr>> {
        let mut items = Vec::new();
        if self.kind() == close {
            return Ok(items);
        }
        loop {
            items.push(self.expr()?);
            if !self.eat(&TokenKind::Comma) {
                return Ok(items);
            }
        }
    }

    fn literal_error(&self, start: usize) -> PrepareError {
        let end = self.tokens[self.pos.saturating_sub(1)].end.max(start);
        syntax_error(self.source, start, end, "expected literal value")
    }

    /// `( item, ... )` where every item is a literal or a tuple of literals
    fn in_values(&mut self) -> PrepareResult<Vec<LiteralTuple>> {
        let start = self.current().start;
        self.expect(&TokenKind::LeftParen, "\"(\"")?;
        let items = self.expr_list(&TokenKind::RightParen)?;
        self.expect(&TokenKind::RightParen, "\")\"")?;
        items
            .into_iter()
            .map(|item| literal_tuple(item).ok_or_else(|| self.literal_error(start)))
            .collect()
    }

    fn bound_tuple(&mut self) -> PrepareResult<LiteralTuple> {
        let start = self.current().start;
        let expr = self.unary_or_parenthesized()?;
        literal_tuple(expr).ok_or_else(|| self.literal_error(start))
    }

    fn unary_or_parenthesized(&mut self) -> PrepareResult<Expr> {
        self.enter()?;
        let result = self.unary();
        self.leave();
        result
    }

    /// `lower AND upper` or `( lower AND upper, ... )`
    fn between_ranges(&mut self) -> PrepareResult<Vec<(LiteralTuple, LiteralTuple)>> {
        if *self.kind() == TokenKind::LeftParen {
            let saved = self.pos;
            if let Ok(ranges) = self.between_list() {
                return Ok(ranges);
            }
            self.pos = saved;
        }
        let lower = self.bound_tuple()?;
        self.expect_keyword(Keyword::And, "AND")?;
        let upper = self.bound_tuple()?;
        Ok(vec![(lower, upper)])
    }

    fn between_list(&mut self) -> PrepareResult<Vec<(LiteralTuple, LiteralTuple)>> {
        self.expect(&TokenKind::LeftParen, "\"(\"")?;
        let mut ranges = Vec::new();
        loop {
            let lower = self.bound_tuple()?;
            self.expect_keyword(Keyword::And, "AND")?;
            let upper = self.bound_tuple()?;
            ranges.push((lower, upper));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RightParen, "\")\"")?;
        Ok(ranges)
    }

    /// `transform(args, (from, ...), (to, ...) [, default])`
    fn transform(&mut self, args: Vec<Expr>) -> PrepareResult<Expr> {
        let start = self.tokens[self.pos.saturating_sub(1)].start;
        if args.len() < 3 || args.len() > 4 {
            return Err(syntax_error(
                self.source,
                start,
                start + 1,
                "transform expects 3 or 4 arguments",
            ));
        }
        let mut args = args.into_iter();
        let (Some(source), Some(from), Some(to)) = (args.next(), args.next(), args.next()) else {
            return Err(self.literal_error(start));
        };
        let default = args.next().map(Box::new);
        let source = source.into_items();

        let from_items = match from {
            Expr::Tuple(items) if source.len() > 1 && items.iter().all(|i| matches!(i, Expr::Literal(_))) => {
                vec![Expr::Tuple(items)]
            }
            other => other.into_items(),
        };
        let from = from_items
            .into_iter()
            .map(|item| literal_tuple(item).ok_or_else(|| self.literal_error(start)))
            .collect::<PrepareResult<Vec<_>>>()?;
        let to = to
            .into_items()
            .into_iter()
            .map(|item| match item {
                Expr::Literal(value) => Ok(value),
                _ => Err(self.literal_error(start)),
            })
            .collect::<PrepareResult<Vec<_>>>()?;

        Ok(Expr::Transform {
            args: source,
            from,
            to,
            default,
        })
    }
}

fn negate_literal(value: &Value) -> Option<Value> {
    match value {
        Value::Int64(v) => v.checked_neg().map(Value::Int64),
        Value::Uint64(v) if *v == 1u64 << 63 => Some(Value::Int64(i64::MIN)),
        Value::Double(d) => Some(Value::Double(-d)),
        _ => None,
    }
}

fn literal_tuple(expr: Expr) -> Option<LiteralTuple> {
    match expr {
        Expr::Literal(value) => Some(vec![value]),
        Expr::Tuple(items) => items
            .into_iter()
            .map(|item| match item {
                Expr::Literal(value) => Some(value),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}
