//! Query language front end
//!
//! - `lexer`: tokens, placeholder substitution, positioned syntax errors
//! - `parser`: full query grammar, job predicates and standalone expressions
//! - `ast`: untyped syntax tree handed to the preparer

pub mod ast;
mod lexer;
#[allow(clippy::module_inception)]
mod parser;
mod placeholders;

pub use ast::{
    BinaryOp, ColumnRef, Expr, JobQueryAst, JoinAst, JoinCondition, LiteralTuple, NamedExpr, OrderItem, Projection,
    QueryAst, TableRef, TotalsMode, UnaryOp,
};
pub use lexer::{syntax_error, tokenize, Keyword, Token, TokenKind};
pub use parser::{parse_expression, parse_job_query, parse_query};
pub use placeholders::Placeholders;
