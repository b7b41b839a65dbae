use thiserror::Error;

use crate::common::types::{ColumnPosition, NodeId, Tag};
use crate::query::planner::logical::NodeKind;

/// Errors raised while rewriting a logical plan.
///
/// Every variant describes a malformed plan handed over by the query builder.
/// None of them are recoverable: the optimizer aborts and the error is
/// surfaced to the caller unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("Plan node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Plan node {node} has no child at index {index}")]
    MissingChild { node: NodeId, index: usize },

    #[error("Plan node {node} has no binding tag at index {index}")]
    MissingBindingTag { node: NodeId, index: usize },

    #[error("Column #{tag}.{position} cannot be resolved")]
    UnresolvedColumn { tag: Tag, position: ColumnPosition },

    #[error("Binding tag {tag} is introduced more than once")]
    DuplicateBindingTag { tag: Tag },

    #[error("{kind:?} node {node} expects {expected} children, found {found}")]
    InvalidArity {
        node: NodeId,
        kind: NodeKind,
        expected: usize,
        found: usize,
    },

    #[error("Plan node {0} is reachable through more than one parent")]
    NodeReachableTwice(NodeId),
}

/// Result type for optimizer operations
pub type Result<T> = std::result::Result<T, OptimizerError>;
