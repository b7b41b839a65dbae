// Projection Elimination
//
// Every subquery or view is topped by a PROJECT node. When such a node only
// forwards columns or constants it is dropped, and references to its output
// are rewritten into the forwarded expressions.

use log::{debug, trace};

use crate::common::types::NodeId;
use crate::query::planner::error::Result;
use crate::query::planner::expression::{ColumnRef, Expr, SubstitutionMap};
use crate::query::planner::logical::{JoinType, NodeKind, Plan};

/// Removes trivial PROJECT nodes from a plan
pub struct ProjectionEliminator<'a> {
    plan: &'a mut Plan,
    removed: usize,
}

impl<'a> ProjectionEliminator<'a> {
    pub fn new(plan: &'a mut Plan) -> Self {
        ProjectionEliminator { plan, removed: 0 }
    }

    /// Number of PROJECT nodes removed so far
    pub fn removed(&self) -> usize {
        self.removed
    }

    /// Eliminate trivial projections in the subtree rooted at `id`.
    ///
    /// Returns the id that replaces `id` in its parent and the substitutions
    /// the parent must apply to its own expressions. The map carries entries
    /// for every projection removed anywhere below, not only at `id`.
    pub fn eliminate(
        &mut self,
        id: NodeId,
        parent_kind: NodeKind,
    ) -> Result<(NodeId, SubstitutionMap)> {
        self.eliminate_node(id, parent_kind, false)
    }

    /// `null_extended` is set below the NULL-padded input of an outer join,
    /// where a forwarded constant must stay materialized: padded rows read
    /// NULL from the projection, not the constant.
    fn eliminate_node(
        &mut self,
        id: NodeId,
        parent_kind: NodeKind,
        null_extended: bool,
    ) -> Result<(NodeId, SubstitutionMap)> {
        let node = self.plan.node(id)?;
        let kind = node.kind;
        let join_type = node.join_type;
        let children = node.children.clone();

        let mut proj_map = SubstitutionMap::new();
        for (i, child) in children.into_iter().enumerate() {
            let padded = kind == NodeKind::Join && join_pads_input(join_type, i);
            let (new_child, child_map) = self.eliminate_node(child, kind, null_extended || padded)?;
            self.plan.node_mut(id)?.children[i] = new_child;
            // Tags are unique per plan, so entries never collide
            proj_map.extend(child_map);
        }

        if !proj_map.is_empty() {
            let node = self.plan.node_mut(id)?;
            substitute_list(&mut node.project_list, &proj_map);
            substitute_list(&mut node.on_list, &proj_map);
            substitute_list(&mut node.filter_list, &proj_map);
            substitute_list(&mut node.group_by, &proj_map);
            substitute_list(&mut node.grouping_set, &proj_map);
            substitute_list(&mut node.agg_list, &proj_map);
            for key in node.order_by.iter_mut() {
                key.expr = std::mem::replace(&mut key.expr, Expr::null()).substitute_all(&proj_map);
            }
        }

        if !self.can_remove_project(parent_kind, id)? {
            return Ok((id, proj_map));
        }

        let node = self.plan.node(id)?;
        if !node.project_list.iter().all(Expr::is_trivial) {
            trace!("Keeping project node {}: output is computed", id);
            return Ok((id, proj_map));
        }
        if null_extended && node.project_list.iter().any(Expr::is_constant) {
            trace!("Keeping project node {}: constant output below an outer join", id);
            return Ok((id, proj_map));
        }

        let tag = self.plan.binding_tag(id, 0)?;
        for (i, expr) in node.project_list.iter().enumerate() {
            proj_map.insert(ColumnRef::new(tag, i as i32), expr.clone());
        }

        let child = self.plan.child(id, 0)?;
        debug!("Removed project node {} (tag {}), replaced by node {}", id, tag, child);
        self.removed += 1;

        Ok((child, proj_map))
    }

    fn can_remove_project(&self, parent_kind: NodeKind, id: NodeId) -> Result<bool> {
        let node = self.plan.node(id)?;
        if node.kind != NodeKind::Project || node.has_limit_or_offset() {
            return Ok(false);
        }

        let parent_blocks = parent_kind.is_set_operation()
            || matches!(
                parent_kind,
                NodeKind::Distinct
                    | NodeKind::Unknown
                    | NodeKind::FunctionScan
                    | NodeKind::ExternalFunction
            );
        if parent_blocks {
            return Ok(false);
        }

        let child_kind = self.plan.node(self.plan.child(id, 0)?)?.kind;
        let child_blocks = matches!(
            child_kind,
            NodeKind::ValueScan
                | NodeKind::ExternalScan
                | NodeKind::FunctionScan
                | NodeKind::ExternalFunction
        );

        Ok(!child_blocks)
    }
}

/// Whether a join of `join_type` pads its `index`-th input with NULLs
fn join_pads_input(join_type: JoinType, index: usize) -> bool {
    match join_type {
        JoinType::Left | JoinType::Single => index == 1,
        JoinType::Right => index == 0,
        JoinType::Outer => true,
        JoinType::Inner | JoinType::Semi | JoinType::Anti | JoinType::Mark => false,
    }
}

fn substitute_list(exprs: &mut [Expr], proj_map: &SubstitutionMap) {
    for expr in exprs.iter_mut() {
        *expr = std::mem::replace(expr, Expr::null()).substitute_all(proj_map);
    }
}
