//! Query syntax tree

use std::fmt;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Plus,
    Minus,
    BitNot,
    Not,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
            UnaryOp::BitNot => "~",
            UnaryOp::Not => "not",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    LeftShift,
    RightShift,
    BitAnd,
    BitOr,
    And,
    Or,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::LeftShift => "<<",
            BinaryOp::RightShift => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Equal => "=",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessOrEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterOrEqual => ">=",
        }
    }

    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::Less
                | BinaryOp::LessOrEqual
                | BinaryOp::Greater
                | BinaryOp::GreaterOrEqual
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            BinaryOp::Modulo | BinaryOp::LeftShift | BinaryOp::RightShift | BinaryOp::BitAnd | BinaryOp::BitOr
        )
    }

    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            BinaryOp::Plus
                | BinaryOp::Multiply
                | BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Equal
                | BinaryOp::NotEqual
        )
    }

    /// Operator with swapped operands: `a < b` is `b > a`
    pub fn reversed(&self) -> Self {
        match self {
            BinaryOp::Less => BinaryOp::Greater,
            BinaryOp::LessOrEqual => BinaryOp::GreaterOrEqual,
            BinaryOp::Greater => BinaryOp::Less,
            BinaryOp::GreaterOrEqual => BinaryOp::LessOrEqual,
            other => *other,
        }
    }
}

/// Possibly qualified column reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn new(table: Option<&str>, name: &str) -> Self {
        Self {
            table: table.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Qualified display form, `t.a` or `a`
    pub fn display_name(&self) -> String {
        match &self.table {
            Some(table) => format!("{}.{}", table, self.name),
            None => self.name.clone(),
        }
    }
}

/// Tuple of literals, as used by IN, BETWEEN and transform
pub type LiteralTuple = Vec<Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Reference(ColumnRef),
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Parenthesized list of two or more expressions
    Tuple(Vec<Expr>),
    In {
        args: Vec<Expr>,
        values: Vec<LiteralTuple>,
    },
    /// Each range holds lower and upper bound tuples, both inclusive.
    /// A bound shorter than `args` constrains a prefix only.
    Between {
        args: Vec<Expr>,
        ranges: Vec<(LiteralTuple, LiteralTuple)>,
    },
    Transform {
        args: Vec<Expr>,
        from: Vec<LiteralTuple>,
        to: Vec<Value>,
        default: Option<Box<Expr>>,
    },
}

impl Expr {
    /// Flattens a tuple into its items; a scalar is a one-item list
    pub fn into_items(self) -> Vec<Expr> {
        match self {
            Expr::Tuple(items) => items,
            other => vec![other],
        }
    }

    pub fn reference(name: &str) -> Self {
        Expr::Reference(ColumnRef::new(None, name))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_tuple(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    if items.len() == 1 {
        return write!(f, "{}", items[0]);
    }
    write!(f, "(")?;
    write_list(f, items)?;
    write!(f, ")")
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
    match expr {
        Expr::Binary { .. } | Expr::In { .. } | Expr::Between { .. } => write!(f, "({})", expr),
        other => write!(f, "{}", other),
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    if args.len() == 1 {
        return write_operand(f, &args[0]);
    }
    write!(f, "(")?;
    write_list(f, args)?;
    write!(f, ")")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::Reference(column) => write!(f, "{}", column.display_name()),
            Expr::Function { name, args } => {
                write!(f, "{}(", name)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::Unary { op: UnaryOp::Not, operand } => {
                write!(f, "not ")?;
                write_operand(f, operand)
            }
            Expr::Unary { op, operand } => {
                write!(f, "{}", op.symbol())?;
                write_operand(f, operand)
            }
            Expr::Binary { op, lhs, rhs } => {
                write_operand(f, lhs)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, rhs)
            }
            Expr::Tuple(items) => {
                write!(f, "(")?;
                write_list(f, items)?;
                write!(f, ")")
            }
            Expr::In { args, values } => {
                write_args(f, args)?;
                write!(f, " in (")?;
                for (index, tuple) in values.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write_tuple(f, tuple)?;
                }
                write!(f, ")")
            }
            Expr::Between { args, ranges } => {
                write_args(f, args)?;
                write!(f, " between (")?;
                for (index, (lower, upper)) in ranges.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write_tuple(f, lower)?;
                    write!(f, " and ")?;
                    write_tuple(f, upper)?;
                }
                write!(f, ")")
            }
            Expr::Transform { args, from, to, default } => {
                write!(f, "transform(")?;
                write_args(f, args)?;
                write!(f, ", (")?;
                for (index, tuple) in from.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write_tuple(f, tuple)?;
                }
                write!(f, "), (")?;
                write_list(f, to)?;
                write!(f, ")")?;
                if let Some(default) = default {
                    write!(f, ", {}", default)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Expression with optional output name
#[derive(Debug, Clone, PartialEq)]
pub struct NamedExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl NamedExpr {
    /// Output column name: the alias, else the formatted expression
    pub fn output_name(&self) -> String {
        match (&self.alias, &self.expr) {
            (Some(alias), _) => alias.clone(),
            (None, Expr::Reference(column)) => column.display_name(),
            (None, expr) => expr.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Star,
    Items(Vec<NamedExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub path: String,
    pub alias: Option<String>,
    /// Byte offset of the table token
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinCondition {
    Using(Vec<String>),
    /// Equalities (and any residual conjuncts) between the sides
    On(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinAst {
    pub is_left: bool,
    pub table: TableRef,
    pub condition: JoinCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalsMode {
    #[default]
    None,
    /// WITH TOTALS written before HAVING: totals cover every group
    BeforeHaving,
    /// WITH TOTALS written after HAVING: totals cover groups passing HAVING
    AfterHaving,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryAst {
    pub projection: Projection,
    pub from: TableRef,
    pub joins: Vec<JoinAst>,
    pub where_clause: Option<Expr>,
    pub group_by: Option<Vec<NamedExpr>>,
    pub totals: TotalsMode,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderItem>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

/// `<projection> [WHERE <predicate>]`, evaluated over a single row source
#[derive(Debug, Clone, PartialEq)]
pub struct JobQueryAst {
    pub projection: Projection,
    pub where_clause: Option<Expr>,
}
