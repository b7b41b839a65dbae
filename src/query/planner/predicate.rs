// Predicate Algebra
//
// Conjunction splitting, distributivity, DNF key extraction, equality-based
// predicate deduction and null-rejection tests used by filter pushdown.

use crate::query::planner::binding::TagSet;
use crate::query::planner::context::OptimizerContext;
use crate::query::planner::expression::{func, ColumnRef, Expr, Value};
use crate::query::planner::fold::fold;

/// Flatten a chain of AND into its conjuncts
pub fn split_conjunction(expr: Expr) -> Vec<Expr> {
    let mut conjuncts = Vec::new();
    split_conjunction_recursive(expr, &mut conjuncts);
    conjuncts
}

fn split_conjunction_recursive(expr: Expr, conjuncts: &mut Vec<Expr>) {
    match expr {
        Expr::Function { name, args } if name == func::AND => {
            for arg in args {
                split_conjunction_recursive(arg, conjuncts);
            }
        }
        other => conjuncts.push(other),
    }
}

/// Split every expression of a list into conjuncts
pub fn split_conjunctions(exprs: Vec<Expr>) -> Vec<Expr> {
    exprs.into_iter().flat_map(split_conjunction).collect()
}

/// Rebuild a conjunction from its conjuncts
pub fn combine_conjunction(conjuncts: Vec<Expr>) -> Option<Expr> {
    conjuncts.into_iter().reduce(Expr::and)
}

fn combine_disjunction(disjuncts: Vec<Expr>) -> Option<Expr> {
    let mut unique: Vec<Expr> = Vec::new();
    for disjunct in disjuncts {
        if !unique.contains(&disjunct) {
            unique.push(disjunct);
        }
    }
    unique.into_iter().reduce(Expr::or)
}

/// Factor conjuncts shared by both sides of an OR out of it:
/// `(A AND B) OR (A AND C)` becomes `A AND (B OR C)`, and `A OR (A AND B)`
/// becomes `A`. Applied bottom-up; a second application changes nothing.
pub fn apply_distributivity(expr: Expr) -> Expr {
    let (name, args) = match expr {
        Expr::Function { name, args } => (name, args),
        other => return other,
    };
    let args: Vec<Expr> = args.into_iter().map(apply_distributivity).collect();
    if name != func::OR {
        return Expr::Function { name, args };
    }

    let [left, right] = match <[Expr; 2]>::try_from(args) {
        Ok(pair) => pair,
        Err(args) => return Expr::Function { name, args },
    };

    let left_conds = split_conjunction(left.clone());
    let right_conds = split_conjunction(right.clone());

    let mut common = Vec::new();
    for cond in &left_conds {
        if right_conds.contains(cond) && !common.contains(cond) {
            common.push(cond.clone());
        }
    }
    if common.is_empty() {
        return Expr::or(left, right);
    }

    let left_only: Vec<Expr> = left_conds
        .into_iter()
        .filter(|cond| !common.contains(cond))
        .collect();
    let right_only: Vec<Expr> = right_conds
        .into_iter()
        .filter(|cond| !common.contains(cond))
        .collect();

    let common_expr = match combine_conjunction(common) {
        Some(expr) => expr,
        None => return Expr::or(left, right),
    };

    match (combine_conjunction(left_only), combine_conjunction(right_only)) {
        (Some(l), Some(r)) => Expr::and(common_expr, Expr::or(l, r)),
        // One side is implied by the common part
        _ => common_expr,
    }
}

/// Columns referenced by every disjunct of a top-level OR
pub fn extract_dnf_keys(expr: &Expr) -> Vec<ColumnRef> {
    if !expr.is_call(func::OR) {
        return Vec::new();
    }
    let mut keys = Vec::new();
    for key in dnf_columns(expr) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn dnf_columns(expr: &Expr) -> Vec<ColumnRef> {
    match expr {
        Expr::Function { name, args } if name == func::OR => {
            let mut iter = args.iter().map(dnf_columns);
            let first = iter.next().unwrap_or_default();
            iter.fold(first, |acc, cols| {
                acc.into_iter().filter(|col| cols.contains(col)).collect()
            })
        }
        Expr::Function { args, .. } => args.iter().flat_map(dnf_columns).collect(),
        Expr::Column(col) => vec![*col],
        Expr::Constant(_) => Vec::new(),
    }
}

/// Rebuild a disjunction keeping only the atoms that read nothing but `key`.
///
/// The result is implied by `expr`, so it can be evaluated as an extra
/// filter wherever `key` is available. `None` when some disjunct says
/// nothing about `key`.
pub fn walk_through_dnf(expr: &Expr, key: &ColumnRef) -> Option<Expr> {
    match expr {
        Expr::Function { name, args } if name == func::OR => {
            let disjuncts = args
                .iter()
                .map(|arg| walk_through_dnf(arg, key))
                .collect::<Option<Vec<_>>>()?;
            combine_disjunction(disjuncts)
        }
        Expr::Function { name, args } if name == func::AND => {
            let kept: Vec<Expr> = args.iter().filter_map(|arg| walk_through_dnf(arg, key)).collect();
            combine_conjunction(kept)
        }
        _ => {
            let cols = expr.columns();
            if !cols.is_empty() && cols.iter().all(|col| col == key) {
                Some(expr.clone())
            } else {
                None
            }
        }
    }
}

/// Column constrained by a simple predicate such as `x > 5`, `x IN (1, 2)`
/// or `x BETWEEN 1 AND 9`
fn strict_filter_column(pred: &Expr) -> Option<ColumnRef> {
    let (name, args) = match pred {
        Expr::Function { name, args } => (name.as_str(), args),
        _ => return None,
    };

    if func::is_comparison(name) {
        return match args.as_slice() {
            [Expr::Column(col), Expr::Constant(_)] | [Expr::Constant(_), Expr::Column(col)] => {
                Some(*col)
            }
            _ => None,
        };
    }

    if name == func::IN || name == func::BETWEEN {
        return match args.split_first() {
            Some((Expr::Column(col), rest)) if rest.iter().all(Expr::is_constant) => Some(*col),
            _ => None,
        };
    }

    None
}

/// Translate simple predicates across `x = y` join conditions: a predicate
/// proven about `y` yields the same predicate about `x`, and vice versa.
pub fn preds_deduction(preds: &[Expr], on_list: &[Expr]) -> Vec<Expr> {
    let mut derived: Vec<Expr> = Vec::new();

    for cond in on_list {
        let (x, y) = match cond.call_args(func::EQ) {
            Some([Expr::Column(x), Expr::Column(y)]) => (*x, *y),
            _ => continue,
        };

        for pred in preds {
            let new_pred = match strict_filter_column(pred) {
                Some(col) if col == x => pred.substitute(x.tag, x.position, &Expr::Column(y)),
                Some(col) if col == y => pred.substitute(y.tag, y.position, &Expr::Column(x)),
                _ => continue,
            };
            if !derived.contains(&new_pred) {
                derived.push(new_pred);
            }
        }
    }

    derived
}

/// Whether `filter` can never be true once every column it reads is NULL
pub fn rejects_null(filter: &Expr, ctx: &OptimizerContext) -> bool {
    fold(filter, &|_: &ColumnRef| Some(Value::Null), &ctx.null_rules).never_true()
}

/// Whether `filter` can never be true when the columns of `tags` are NULL,
/// whatever values its other columns take
pub fn rejects_null_on(filter: &Expr, tags: &TagSet, ctx: &OptimizerContext) -> bool {
    let bind = |col: &ColumnRef| tags.contains(&col.tag).then_some(Value::Null);
    fold(filter, &bind, &ctx.null_rules).never_true()
}
