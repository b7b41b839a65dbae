// Constant Folding
//
// Three-valued evaluation of scalar expressions. `evaluate` needs every
// column bound; `fold` tolerates unbound columns and reports what can still
// be concluded about the result.

use std::cmp::Ordering;

use thiserror::Error;

use crate::query::planner::context::NullRules;
use crate::query::planner::expression::{func, ColumnRef, Expr, Value};

/// Reasons an expression cannot be reduced to a value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FoldError {
    #[error("Function {0} cannot be folded")]
    NotFoldable(String),

    #[error("Type mismatch in {0}")]
    TypeMismatch(String),

    #[error("Column {0} has no value")]
    UnboundColumn(ColumnRef),
}

/// Outcome of folding with some columns left unbound
#[derive(Debug, Clone, PartialEq)]
pub enum Folded {
    /// Fully determined
    Value(Value),
    /// Either NULL or false, never true
    NotTrue,
    /// Depends on unbound columns
    Unknown,
}

impl Folded {
    /// The result can never be TRUE
    pub fn never_true(&self) -> bool {
        matches!(
            self,
            Folded::Value(Value::Null) | Folded::Value(Value::Boolean(false)) | Folded::NotTrue
        )
    }

    fn is_null(&self) -> bool {
        matches!(self, Folded::Value(Value::Null))
    }

    fn is_bool(&self, b: bool) -> bool {
        matches!(self, Folded::Value(Value::Boolean(v)) if *v == b)
    }
}

/// Evaluate `expr` with every column supplied by `bind`
pub fn evaluate<F>(expr: &Expr, bind: &F, rules: &NullRules) -> Result<Value, FoldError>
where
    F: Fn(&ColumnRef) -> Option<Value>,
{
    match expr {
        Expr::Column(col) => bind(col).ok_or(FoldError::UnboundColumn(*col)),
        Expr::Constant(value) => Ok(value.clone()),
        Expr::Function { name, args } => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, bind, rules))
                .collect::<Result<Vec<_>, _>>()?;
            apply(name, &values, rules)
        }
    }
}

/// Fold `expr` as far as the columns bound by `bind` allow
pub fn fold<F>(expr: &Expr, bind: &F, rules: &NullRules) -> Folded
where
    F: Fn(&ColumnRef) -> Option<Value>,
{
    match expr {
        Expr::Column(col) => bind(col).map(Folded::Value).unwrap_or(Folded::Unknown),
        Expr::Constant(value) => Folded::Value(value.clone()),
        Expr::Function { name, args } => {
            let folded: Vec<Folded> = args.iter().map(|arg| fold(arg, bind, rules)).collect();

            let concrete: Option<Vec<Value>> = folded
                .iter()
                .map(|f| match f {
                    Folded::Value(v) => Some(v.clone()),
                    _ => None,
                })
                .collect();
            if let Some(values) = concrete {
                return match apply(name, &values, rules) {
                    Ok(value) => Folded::Value(value),
                    Err(_) => Folded::Unknown,
                };
            }

            fold_partial(name, &folded, rules)
        }
    }
}

fn fold_partial(name: &str, args: &[Folded], rules: &NullRules) -> Folded {
    match name {
        func::AND => {
            if args.iter().any(|a| a.is_bool(false)) {
                Folded::Value(Value::Boolean(false))
            } else if args.iter().any(|a| a.is_null() || *a == Folded::NotTrue) {
                Folded::NotTrue
            } else {
                Folded::Unknown
            }
        }
        func::OR => {
            if args.iter().any(|a| a.is_bool(true)) {
                Folded::Value(Value::Boolean(true))
            } else if args.iter().all(Folded::never_true) {
                Folded::NotTrue
            } else {
                Folded::Unknown
            }
        }
        func::IN | func::BETWEEN => match args.first() {
            Some(first) if first.is_null() => Folded::Value(Value::Null),
            _ => Folded::Unknown,
        },
        _ if func::is_comparison(name)
            || func::is_arithmetic(name)
            || rules.is_null_propagating(name) =>
        {
            if args.iter().any(Folded::is_null) {
                Folded::Value(Value::Null)
            } else {
                Folded::Unknown
            }
        }
        _ => Folded::Unknown,
    }
}

/// Apply function `name` to fully known arguments
pub fn apply(name: &str, args: &[Value], rules: &NullRules) -> Result<Value, FoldError> {
    match name {
        func::AND => {
            let mut result = Value::Boolean(true);
            for arg in args {
                match arg {
                    Value::Boolean(false) => return Ok(Value::Boolean(false)),
                    Value::Boolean(true) => {}
                    Value::Null => result = Value::Null,
                    _ => return Err(FoldError::TypeMismatch(name.to_string())),
                }
            }
            Ok(result)
        }
        func::OR => {
            let mut result = Value::Boolean(false);
            for arg in args {
                match arg {
                    Value::Boolean(true) => return Ok(Value::Boolean(true)),
                    Value::Boolean(false) => {}
                    Value::Null => result = Value::Null,
                    _ => return Err(FoldError::TypeMismatch(name.to_string())),
                }
            }
            Ok(result)
        }
        func::NOT => match args {
            [Value::Null] => Ok(Value::Null),
            [Value::Boolean(b)] => Ok(Value::Boolean(!b)),
            _ => Err(FoldError::TypeMismatch(name.to_string())),
        },
        func::IS_NULL => match args {
            [v] => Ok(Value::Boolean(v.is_null())),
            _ => Err(FoldError::TypeMismatch(name.to_string())),
        },
        func::IS_NOT_NULL => match args {
            [v] => Ok(Value::Boolean(!v.is_null())),
            _ => Err(FoldError::TypeMismatch(name.to_string())),
        },
        func::IN => {
            let (needle, list) = args
                .split_first()
                .ok_or_else(|| FoldError::TypeMismatch(name.to_string()))?;
            if needle.is_null() {
                return Ok(Value::Null);
            }
            let mut saw_null = false;
            for item in list {
                if item.is_null() {
                    saw_null = true;
                } else if compare(name, needle, item)? == Ordering::Equal {
                    return Ok(Value::Boolean(true));
                }
            }
            Ok(if saw_null { Value::Null } else { Value::Boolean(false) })
        }
        func::BETWEEN => match args {
            [x, low, high] => {
                let lower = apply(func::GT_EQ, &[x.clone(), low.clone()], rules)?;
                let upper = apply(func::LT_EQ, &[x.clone(), high.clone()], rules)?;
                apply(func::AND, &[lower, upper], rules)
            }
            _ => Err(FoldError::TypeMismatch(name.to_string())),
        },
        func::COALESCE | func::IFNULL => Ok(args
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Null)),
        _ if func::is_comparison(name) => match args {
            [a, b] if a.is_null() || b.is_null() => Ok(Value::Null),
            [a, b] => {
                let ord = compare(name, a, b)?;
                let result = match name {
                    func::EQ => ord == Ordering::Equal,
                    func::NOT_EQ => ord != Ordering::Equal,
                    func::LT => ord == Ordering::Less,
                    func::LT_EQ => ord != Ordering::Greater,
                    func::GT => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                };
                Ok(Value::Boolean(result))
            }
            _ => Err(FoldError::TypeMismatch(name.to_string())),
        },
        _ if func::is_arithmetic(name) => match args {
            [a, b] if a.is_null() || b.is_null() => Ok(Value::Null),
            [a, b] => arithmetic(name, a, b),
            _ => Err(FoldError::TypeMismatch(name.to_string())),
        },
        _ if rules.is_null_propagating(name) && args.iter().any(Value::is_null) => Ok(Value::Null),
        _ => Err(FoldError::NotFoldable(name.to_string())),
    }
}

fn compare(name: &str, a: &Value, b: &Value) -> Result<Ordering, FoldError> {
    let ord = match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Integer(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Integer(y)) => x.partial_cmp(&(*y as f64)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Boolean(x), Value::Boolean(y)) => Some(x.cmp(y)),
        _ => None,
    };
    ord.ok_or_else(|| FoldError::TypeMismatch(name.to_string()))
}

fn arithmetic(name: &str, a: &Value, b: &Value) -> Result<Value, FoldError> {
    let overflow = || FoldError::NotFoldable(name.to_string());
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => match name {
            func::PLUS => x.checked_add(*y).map(Value::Integer).ok_or_else(overflow),
            func::MINUS => x.checked_sub(*y).map(Value::Integer).ok_or_else(overflow),
            func::MULTIPLY => x.checked_mul(*y).map(Value::Integer).ok_or_else(overflow),
            _ if *y == 0 => Ok(Value::Null),
            _ => Ok(Value::Float(*x as f64 / *y as f64)),
        },
        _ => {
            let x = as_float(a).ok_or_else(|| FoldError::TypeMismatch(name.to_string()))?;
            let y = as_float(b).ok_or_else(|| FoldError::TypeMismatch(name.to_string()))?;
            Ok(match name {
                func::PLUS => Value::Float(x + y),
                func::MINUS => Value::Float(x - y),
                func::MULTIPLY => Value::Float(x * y),
                _ if y == 0.0 => Value::Null,
                _ => Value::Float(x / y),
            })
        }
    }
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}
