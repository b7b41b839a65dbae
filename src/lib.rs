// Bayun Logical Plan Optimizer

pub mod common;
pub mod query;

// Re-export key items for convenient access
pub use query::planner::expression::{ColumnRef, Expr, Value};
pub use query::planner::logical::{JoinType, Node, NodeKind, Plan};
pub use query::planner::{OptimizeSummary, Optimizer, OptimizerConfig, OptimizerError};
