// Binding Tag Resolution
//
// Maps column back-references to the node (or expression) that produced them
// and classifies predicates by the join input(s) they read from.

use std::collections::HashSet;

use crate::common::types::{NodeId, Tag};
use crate::query::planner::error::{OptimizerError, Result};
use crate::query::planner::expression::{ColumnRef, Expr};
use crate::query::planner::logical::{NodeKind, Plan};

/// Set of binding tags visible beneath a subtree
pub type TagSet = HashSet<Tag>;

/// What a column reference resolves to
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<'a> {
    /// Output expression of a PROJECT or AGG node
    Expr(&'a Expr),
    /// Column read from a source node (scan, join mark, set operation, ...)
    Relation(NodeId),
}

impl Plan {
    /// Binding tags whose columns are visible above `id`
    pub fn enumerate_tags(&self, id: NodeId) -> Result<Vec<Tag>> {
        let node = self.node(id)?;
        let mut tags = Vec::new();

        match node.kind {
            NodeKind::Scan
            | NodeKind::ExternalScan
            | NodeKind::FunctionScan
            | NodeKind::ExternalFunction
            | NodeKind::ValueScan
            | NodeKind::Project
            | NodeKind::Agg
            | NodeKind::Union
            | NodeKind::UnionAll
            | NodeKind::Minus
            | NodeKind::MinusAll
            | NodeKind::Intersect
            | NodeKind::IntersectAll => {
                // These nodes start a new schema; only their own tags escape
                if !node.binding_tags.is_empty() {
                    return Ok(node.binding_tags.clone());
                }
                for &child in &node.children {
                    tags.extend(self.enumerate_tags(child)?);
                }
            }
            NodeKind::Join => {
                tags.extend(node.binding_tags.iter().copied());
                for &child in &node.children {
                    tags.extend(self.enumerate_tags(child)?);
                }
            }
            NodeKind::Filter | NodeKind::Distinct | NodeKind::Sort | NodeKind::Unknown => {
                for &child in &node.children {
                    tags.extend(self.enumerate_tags(child)?);
                }
            }
        }

        Ok(tags)
    }

    /// Tag set visible above `id`
    pub fn tag_set(&self, id: NodeId) -> Result<TagSet> {
        Ok(self.enumerate_tags(id)?.into_iter().collect())
    }

    /// Reachable node that introduces `tag`
    pub fn producer_of(&self, tag: Tag) -> Result<Option<NodeId>> {
        for id in self.reachable()? {
            if self.node(id)?.binding_tags.contains(&tag) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Resolve a column reference to its producer
    pub fn resolve_column(&self, col: &ColumnRef) -> Result<Resolved<'_>> {
        let unresolved = OptimizerError::UnresolvedColumn {
            tag: col.tag,
            position: col.position,
        };
        let producer = self.producer_of(col.tag)?.ok_or(unresolved.clone())?;
        let node = self.node(producer)?;

        let outputs = match node.kind {
            NodeKind::Project => &node.project_list,
            NodeKind::Agg if node.binding_tags.first() == Some(&col.tag) => &node.group_by,
            NodeKind::Agg => &node.agg_list,
            _ => return Ok(Resolved::Relation(producer)),
        };

        usize::try_from(col.position)
            .ok()
            .and_then(|pos| outputs.get(pos))
            .map(Resolved::Expr)
            .ok_or(unresolved)
    }
}

/// Join input(s) a predicate reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinSide {
    None,
    Left,
    Right,
    Both,
    Mark,
}

impl JoinSide {
    /// Widen two sides into the side of an expression reading from both
    pub fn union(self, other: JoinSide) -> JoinSide {
        match (self, other) {
            (JoinSide::None, side) | (side, JoinSide::None) => side,
            (a, b) if a == b => a,
            _ => JoinSide::Both,
        }
    }

    pub fn touches_left(self) -> bool {
        matches!(self, JoinSide::Left | JoinSide::Both)
    }

    pub fn touches_right(self) -> bool {
        matches!(self, JoinSide::Right | JoinSide::Both)
    }
}

/// Classify `expr` against the tag sets of a join's two inputs
pub fn join_side(expr: &Expr, left: &TagSet, right: &TagSet, mark: Option<Tag>) -> JoinSide {
    match expr {
        Expr::Column(col) => {
            if left.contains(&col.tag) {
                JoinSide::Left
            } else if right.contains(&col.tag) {
                JoinSide::Right
            } else if mark == Some(col.tag) {
                JoinSide::Mark
            } else {
                JoinSide::None
            }
        }
        Expr::Function { args, .. } => args
            .iter()
            .fold(JoinSide::None, |side, arg| side.union(join_side(arg, left, right, mark))),
        Expr::Constant(_) => JoinSide::None,
    }
}
