// Query Planner Module
//
// This module holds the logical plan model and the rewrite passes applied to
// it before physical planning: projection elimination and filter pushdown.

pub mod binding;
pub mod context;
pub mod error;
pub mod expression;
pub mod filter_pushdown;
pub mod fold;
pub mod logical;
pub mod optimizer;
pub mod predicate;
pub mod projection_elimination;

// Export key types
pub use self::context::{OptimizerConfig, OptimizerContext};
pub use self::error::{OptimizerError, Result};
pub use self::expression::{ColumnRef, Expr, SubstitutionMap, Value};
pub use self::logical::{JoinType, Node, NodeKind, Plan};
pub use self::optimizer::{OptimizeSummary, Optimizer};
