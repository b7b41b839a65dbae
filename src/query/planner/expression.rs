// Scalar Expression Model
//
// This module defines the scalar expressions carried by logical plan nodes:
// column back-references, constants and function calls, together with the
// structural copy and substitution primitives used by the rewrite passes.

use std::fmt;

use linked_hash_map::LinkedHashMap;
use serde::{Deserialize, Serialize};

use crate::common::types::{ColumnPosition, Tag};
use crate::query::planner::error::{OptimizerError, Result};

/// Well-known function names understood by the optimizer
pub mod func {
    pub const AND: &str = "and";
    pub const OR: &str = "or";
    pub const NOT: &str = "not";
    pub const EQ: &str = "=";
    pub const NOT_EQ: &str = "<>";
    pub const LT: &str = "<";
    pub const LT_EQ: &str = "<=";
    pub const GT: &str = ">";
    pub const GT_EQ: &str = ">=";
    pub const PLUS: &str = "+";
    pub const MINUS: &str = "-";
    pub const MULTIPLY: &str = "*";
    pub const DIVIDE: &str = "/";
    pub const IS_NULL: &str = "isnull";
    pub const IS_NOT_NULL: &str = "isnotnull";
    pub const IN: &str = "in";
    pub const BETWEEN: &str = "between";
    pub const COALESCE: &str = "coalesce";
    pub const IFNULL: &str = "ifnull";

    /// Comparison operators (null in, null out)
    pub const COMPARISONS: [&str; 6] = [EQ, NOT_EQ, LT, LT_EQ, GT, GT_EQ];

    /// Arithmetic operators (null in, null out)
    pub const ARITHMETIC: [&str; 4] = [PLUS, MINUS, MULTIPLY, DIVIDE];

    pub fn is_comparison(name: &str) -> bool {
        COMPARISONS.contains(&name)
    }

    pub fn is_arithmetic(name: &str) -> bool {
        ARITHMETIC.contains(&name)
    }
}

/// SQL literal values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::String(s) => write!(f, "'{}'", s),
        }
    }
}

/// Back-reference to the `position`-th output column of the node that
/// introduced binding tag `tag`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    pub tag: Tag,
    pub position: ColumnPosition,
}

impl ColumnRef {
    pub fn new(tag: Tag, position: ColumnPosition) -> Self {
        ColumnRef { tag, position }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.tag, self.position)
    }
}

/// Scalar expression tree.
///
/// An expression is owned exclusively by the plan-node field holding it.
/// Every rewrite that copies a subexpression to a new location goes through
/// `Clone`, so two insertion points never share a subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Column produced by another plan node
    Column(ColumnRef),
    /// Literal value
    Constant(Value),
    /// Function or operator call
    Function { name: String, args: Vec<Expr> },
}

/// Mapping from an elided producer's output column to the expression that
/// replaces it
pub type SubstitutionMap = LinkedHashMap<ColumnRef, Expr>;

impl Expr {
    pub fn col(tag: Tag, position: ColumnPosition) -> Expr {
        Expr::Column(ColumnRef::new(tag, position))
    }

    pub fn lit(value: impl Into<Value>) -> Expr {
        Expr::Constant(value.into())
    }

    pub fn null() -> Expr {
        Expr::Constant(Value::Null)
    }

    pub fn func(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Function {
            name: name.to_string(),
            args,
        }
    }

    pub fn binary(name: &str, left: Expr, right: Expr) -> Expr {
        Expr::func(name, vec![left, right])
    }

    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::binary(func::AND, left, right)
    }

    pub fn or(left: Expr, right: Expr) -> Expr {
        Expr::binary(func::OR, left, right)
    }

    pub fn not(arg: Expr) -> Expr {
        Expr::func(func::NOT, vec![arg])
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::binary(func::EQ, left, right)
    }

    pub fn gt(left: Expr, right: Expr) -> Expr {
        Expr::binary(func::GT, left, right)
    }

    pub fn lt(left: Expr, right: Expr) -> Expr {
        Expr::binary(func::LT, left, right)
    }

    pub fn is_null(arg: Expr) -> Expr {
        Expr::func(func::IS_NULL, vec![arg])
    }

    pub fn is_not_null(arg: Expr) -> Expr {
        Expr::func(func::IS_NOT_NULL, vec![arg])
    }

    /// Returns the column reference if this is a bare column
    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(col) => Some(col),
            _ => None,
        }
    }

    /// Returns the arguments if this is a call to `name`
    pub fn call_args(&self, name: &str) -> Option<&[Expr]> {
        match self {
            Expr::Function { name: n, args } if n == name => Some(args),
            _ => None,
        }
    }

    pub fn is_call(&self, name: &str) -> bool {
        self.call_args(name).is_some()
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Constant(_))
    }

    /// The boolean literal `true`
    pub fn is_true_literal(&self) -> bool {
        matches!(self, Expr::Constant(Value::Boolean(true)))
    }

    /// A bare column or a constant: forwarding only, no computation
    pub fn is_trivial(&self) -> bool {
        matches!(self, Expr::Column(_) | Expr::Constant(_))
    }

    /// Replace every occurrence of column (`tag`, `position`) with a copy of
    /// `replacement`, leaving `self` untouched
    pub fn substitute(&self, tag: Tag, position: ColumnPosition, replacement: &Expr) -> Expr {
        match self {
            Expr::Column(col) if col.tag == tag && col.position == position => replacement.clone(),
            Expr::Function { name, args } => Expr::Function {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|arg| arg.substitute(tag, position, replacement))
                    .collect(),
            },
            _ => self.clone(),
        }
    }

    /// Apply a whole substitution map in one walk
    pub fn substitute_all(self, map: &SubstitutionMap) -> Expr {
        if map.is_empty() {
            return self;
        }
        match self {
            Expr::Column(col) => match map.get(&col) {
                Some(replacement) => replacement.clone(),
                None => Expr::Column(col),
            },
            Expr::Function { name, args } => Expr::Function {
                name,
                args: args.into_iter().map(|arg| arg.substitute_all(map)).collect(),
            },
            constant => constant,
        }
    }

    /// Rewrite columns of `tag` into the producer's expressions, e.g. a
    /// filter over a project's output into one over the project's input
    pub fn replace_tag(self, tag: Tag, exprs: &[Expr]) -> Result<Expr> {
        match self {
            Expr::Column(col) if col.tag == tag => lookup(exprs, col).cloned(),
            Expr::Function { name, args } => Ok(Expr::Function {
                name,
                args: args
                    .into_iter()
                    .map(|arg| arg.replace_tag(tag, exprs))
                    .collect::<Result<Vec<_>>>()?,
            }),
            other => Ok(other),
        }
    }

    /// Rewrite every column by its position alone. Above a set operation the
    /// only visible columns are the operation's outputs, so the position
    /// identifies the branch expression.
    pub fn replace_columns_by_position(self, exprs: &[Expr]) -> Result<Expr> {
        match self {
            Expr::Column(col) => lookup(exprs, col).cloned(),
            Expr::Function { name, args } => Ok(Expr::Function {
                name,
                args: args
                    .into_iter()
                    .map(|arg| arg.replace_columns_by_position(exprs))
                    .collect::<Result<Vec<_>>>()?,
            }),
            other => Ok(other),
        }
    }

    pub fn contains_tag(&self, tag: Tag) -> bool {
        match self {
            Expr::Column(col) => col.tag == tag,
            Expr::Function { args, .. } => args.iter().any(|arg| arg.contains_tag(tag)),
            Expr::Constant(_) => false,
        }
    }

    /// Call `f` on every column reference, left to right
    pub fn visit_columns<F: FnMut(&ColumnRef)>(&self, f: &mut F) {
        match self {
            Expr::Column(col) => f(col),
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.visit_columns(f);
                }
            }
            Expr::Constant(_) => {}
        }
    }

    /// All column references, in order of appearance, without duplicates
    pub fn columns(&self) -> Vec<ColumnRef> {
        let mut cols = Vec::new();
        self.visit_columns(&mut |col| {
            if !cols.contains(col) {
                cols.push(*col);
            }
        });
        cols
    }
}

fn lookup(exprs: &[Expr], col: ColumnRef) -> Result<&Expr> {
    usize::try_from(col.position)
        .ok()
        .and_then(|pos| exprs.get(pos))
        .ok_or(OptimizerError::UnresolvedColumn {
            tag: col.tag,
            position: col.position,
        })
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(col) => write!(f, "{}", col),
            Expr::Constant(value) => write!(f, "{}", value),
            Expr::Function { name, args } => match (name.as_str(), args.as_slice()) {
                (func::AND, [l, r]) => write!(f, "({} AND {})", l, r),
                (func::OR, [l, r]) => write!(f, "({} OR {})", l, r),
                (func::NOT, [arg]) => write!(f, "NOT {}", arg),
                (func::IS_NULL, [arg]) => write!(f, "{} IS NULL", arg),
                (func::IS_NOT_NULL, [arg]) => write!(f, "{} IS NOT NULL", arg),
                (op, [l, r]) if func::is_comparison(op) || func::is_arithmetic(op) => {
                    write!(f, "({} {} {})", l, op, r)
                }
                _ => {
                    write!(f, "{}(", name)?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ")")
                }
            },
        }
    }
}
