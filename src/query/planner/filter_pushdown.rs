// Filter Pushdown Optimizer
//
// This module moves predicates as close as possible to the nodes producing
// the columns they read. Along the way outer joins are turned into inner (or
// less outer) joins when a predicate discards their NULL-extended rows, mark
// joins become semi/anti joins, and extra predicates are derived from
// disjunctions and from inner-join equalities.

use log::{debug, trace, warn};

use crate::common::types::{NodeId, Tag};
use crate::query::planner::binding::{join_side, JoinSide, TagSet};
use crate::query::planner::context::OptimizerContext;
use crate::query::planner::error::Result;
use crate::query::planner::expression::{func, Expr};
use crate::query::planner::logical::{JoinType, Node, NodeKind, Plan};
use crate::query::planner::predicate::{
    apply_distributivity, extract_dnf_keys, preds_deduction, rejects_null_on, split_conjunction,
    split_conjunctions, walk_through_dnf,
};

/// Counters describing what a pushdown run changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushdownStats {
    /// FILTER nodes whose predicates were all placed below them
    pub filters_removed: usize,
    /// FILTER nodes created to hold predicates a child could not absorb
    pub filters_added: usize,
    /// Outer joins made less outer
    pub joins_reduced: usize,
    /// Mark joins turned into semi or anti joins
    pub mark_joins_converted: usize,
}

/// Filter pushdown component
pub struct FilterPushdown<'a> {
    plan: &'a mut Plan,
    ctx: &'a OptimizerContext,
    stats: PushdownStats,
}

impl<'a> FilterPushdown<'a> {
    /// Create a new filter pushdown pass over `plan`
    pub fn new(plan: &'a mut Plan, ctx: &'a OptimizerContext) -> Self {
        FilterPushdown {
            plan,
            ctx,
            stats: PushdownStats::default(),
        }
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> PushdownStats {
        self.stats
    }

    /// Push `filters` into the subtree rooted at `id`.
    ///
    /// Returns the id replacing `id` in its parent and the filters that could
    /// not be placed at or below it; the caller must evaluate those directly
    /// above the returned node.
    pub fn pushdown(
        &mut self,
        id: NodeId,
        filters: Vec<Expr>,
        separate_non_equi_conds: bool,
    ) -> Result<(NodeId, Vec<Expr>)> {
        let node = self.plan.node(id)?;
        let kind = node.kind;

        // Filtering below a LIMIT/OFFSET changes which rows survive it
        if !node.children.is_empty() && node.has_limit_or_offset() {
            trace!("Node {} has a limit, keeping {} filters above it", id, filters.len());
            self.optimize_children(id, separate_non_equi_conds)?;
            return Ok((id, filters));
        }

        match kind {
            NodeKind::Agg => self.pushdown_agg(id, filters, separate_non_equi_conds),
            NodeKind::Filter => self.pushdown_filter(id, filters, separate_non_equi_conds),
            NodeKind::Join => self.pushdown_join(id, filters, separate_non_equi_conds),
            NodeKind::Union
            | NodeKind::UnionAll
            | NodeKind::Minus
            | NodeKind::MinusAll
            | NodeKind::Intersect
            | NodeKind::IntersectAll => {
                self.pushdown_set_operation(id, filters, separate_non_equi_conds)
            }
            NodeKind::Project => self.pushdown_project(id, filters, separate_non_equi_conds),
            NodeKind::Scan | NodeKind::ExternalScan => {
                let node = self.plan.node_mut(id)?;
                append_unique(&mut node.filter_list, filters);
                Ok((id, Vec::new()))
            }
            NodeKind::FunctionScan => {
                // Rows are generated by the function; filters stay on it,
                // but its argument source is still optimized
                let node = self.plan.node_mut(id)?;
                append_unique(&mut node.filter_list, filters);
                self.push_into_child(id, 0, Vec::new(), separate_non_equi_conds)?;
                Ok((id, Vec::new()))
            }
            NodeKind::Distinct | NodeKind::Sort => {
                self.push_into_child(id, 0, filters, separate_non_equi_conds)?;
                Ok((id, Vec::new()))
            }
            NodeKind::ExternalFunction | NodeKind::Unknown => {
                self.optimize_children(id, separate_non_equi_conds)?;
                Ok((id, filters))
            }
            NodeKind::ValueScan => Ok((id, filters)),
        }
    }

    fn pushdown_agg(
        &mut self,
        id: NodeId,
        filters: Vec<Expr>,
        separate_non_equi_conds: bool,
    ) -> Result<(NodeId, Vec<Expr>)> {
        let group_tag = self.plan.binding_tag(id, 0)?;
        let aggregate_tag = self.plan.binding_tag(id, 1)?;
        let node = self.plan.node(id)?;

        // A global aggregate emits a row even for empty input, and grouping
        // sets emit NULL-padded super-aggregate rows; neither commutes with
        // filtering its input
        if node.group_by.is_empty() || !node.grouping_set.is_empty() {
            self.push_into_child(id, 0, Vec::new(), separate_non_equi_conds)?;
            return Ok((id, filters));
        }

        let group_by = node.group_by.clone();
        let mut can_pushdown = Vec::new();
        let mut cant_pushdown = Vec::new();

        for filter in filters {
            if filter.contains_tag(aggregate_tag) {
                cant_pushdown.push(filter);
            } else {
                can_pushdown.push(filter.replace_tag(group_tag, &group_by)?);
            }
        }

        self.push_into_child(id, 0, can_pushdown, separate_non_equi_conds)?;
        Ok((id, cant_pushdown))
    }

    fn pushdown_filter(
        &mut self,
        id: NodeId,
        filters: Vec<Expr>,
        separate_non_equi_conds: bool,
    ) -> Result<(NodeId, Vec<Expr>)> {
        let own_filters = std::mem::take(&mut self.plan.node_mut(id)?.filter_list);

        let mut can_pushdown = Vec::new();
        append_unique(&mut can_pushdown, filters);
        for filter in own_filters {
            append_unique(&mut can_pushdown, split_conjunction(apply_distributivity(filter)));
        }

        let child = self.plan.child(id, 0)?;
        let (child, cant_pushdown_child) =
            self.pushdown(child, can_pushdown, separate_non_equi_conds)?;

        if cant_pushdown_child.is_empty() {
            debug!("Removed filter node {}, all predicates pushed below it", id);
            self.stats.filters_removed += 1;
            return Ok((child, Vec::new()));
        }

        let node = self.plan.node_mut(id)?;
        node.children[0] = child;
        node.filter_list = cant_pushdown_child;
        Ok((id, Vec::new()))
    }

    fn pushdown_project(
        &mut self,
        id: NodeId,
        filters: Vec<Expr>,
        separate_non_equi_conds: bool,
    ) -> Result<(NodeId, Vec<Expr>)> {
        let child = self.plan.child(id, 0)?;
        let child_node = self.plan.node(child)?;
        if matches!(child_node.kind, NodeKind::ValueScan | NodeKind::ExternalScan)
            && child_node.rowset_data.is_none()
        {
            return Ok((id, filters));
        }

        let project_tag = self.plan.binding_tag(id, 0)?;
        let project_list = self.plan.node(id)?.project_list.clone();

        let can_pushdown = filters
            .into_iter()
            .map(|filter| filter.replace_tag(project_tag, &project_list))
            .collect::<Result<Vec<_>>>()?;

        self.push_into_child(id, 0, can_pushdown, separate_non_equi_conds)?;
        Ok((id, Vec::new()))
    }

    fn pushdown_set_operation(
        &mut self,
        id: NodeId,
        filters: Vec<Expr>,
        separate_non_equi_conds: bool,
    ) -> Result<(NodeId, Vec<Expr>)> {
        let left_outputs = self.plan.node(self.plan.child(id, 0)?)?.project_list.clone();
        let right_outputs = self.plan.node(self.plan.child(id, 1)?)?.project_list.clone();

        let mut left_pushdown = Vec::with_capacity(filters.len());
        let mut right_pushdown = Vec::with_capacity(filters.len());
        for filter in filters {
            left_pushdown.push(filter.clone().replace_columns_by_position(&left_outputs)?);
            right_pushdown.push(filter.replace_columns_by_position(&right_outputs)?);
        }

        self.push_into_child(id, 0, left_pushdown, separate_non_equi_conds)?;
        self.push_into_child(id, 1, right_pushdown, separate_non_equi_conds)?;
        Ok((id, Vec::new()))
    }

    fn pushdown_join(
        &mut self,
        id: NodeId,
        mut filters: Vec<Expr>,
        separate_non_equi_conds: bool,
    ) -> Result<(NodeId, Vec<Expr>)> {
        let left_tags = self.plan.tag_set(self.plan.child(id, 0)?)?;
        let right_tags = self.plan.tag_set(self.plan.child(id, 1)?)?;

        let mut join_type = self.plan.node(id)?.join_type;
        let mark_tag = match join_type {
            JoinType::Mark => Some(self.plan.binding_tag(id, 0)?),
            _ => None,
        };

        let node = self.plan.node_mut(id)?;
        let mut on_list = split_conjunctions(std::mem::take(&mut node.on_list));
        let nullable_mark = node.nullable_mark;

        // Inner join conditions are just filters; they are re-derived below
        if join_type == JoinType::Inner {
            filters.extend(distribute_conjuncts(std::mem::take(&mut on_list)));
        }

        loop {
            let reduced = filters
                .iter()
                .find_map(|filter| self.reduce_join_type(join_type, filter, &left_tags, &right_tags));
            let Some(reduced) = reduced else { break };
            debug!("Join node {}: {} join reduced to {} join", id, join_type, reduced);
            self.stats.joins_reduced += 1;
            join_type = reduced;
            if join_type == JoinType::Inner {
                filters.extend(distribute_conjuncts(std::mem::take(&mut on_list)));
            }
        }

        let mut left_pushdown = Vec::new();
        let mut right_pushdown = Vec::new();
        let mut cant_pushdown = Vec::new();

        // Right-only conditions of a left join restrict the right input alone
        if join_type == JoinType::Left {
            let mut new_on_list = Vec::new();
            for cond in distribute_conjuncts(std::mem::take(&mut on_list)) {
                if join_side(&cond, &left_tags, &right_tags, mark_tag).touches_left() {
                    new_on_list.push(cond);
                } else {
                    right_pushdown.push(cond);
                }
            }
            on_list = new_on_list;
        }

        let mut sides: Vec<JoinSide> = filters
            .iter()
            .map(|filter| join_side(filter, &left_tags, &right_tags, mark_tag))
            .collect();
        let mut derived = vec![false; filters.len()];

        if !separate_non_equi_conds && self.ctx.config.dnf_extraction {
            let mut extra_filters: Vec<Expr> = Vec::new();
            for (filter, side) in filters.iter().zip(&sides) {
                if *side != JoinSide::Both || !filter.is_call(func::OR) {
                    continue;
                }
                for key in extract_dnf_keys(filter) {
                    if let Some(extra) = walk_through_dnf(filter, &key) {
                        let extra_side = join_side(&extra, &left_tags, &right_tags, mark_tag);
                        let single_input = matches!(extra_side, JoinSide::Left | JoinSide::Right);
                        if single_input && !filters.contains(&extra) && !extra_filters.contains(&extra) {
                            trace!("Join node {}: derived {} from {}", id, extra, filter);
                            extra_filters.push(extra);
                        }
                    }
                }
            }
            for extra in extra_filters {
                sides.push(join_side(&extra, &left_tags, &right_tags, mark_tag));
                derived.push(true);
                filters.push(extra);
            }
        }

        let mark_converted = mark_tag.and_then(|tag| mark_conversion(&filters, tag, nullable_mark));
        if let Some(converted) = mark_converted {
            debug!("Join node {}: mark join converted to {} join", id, converted);
            self.stats.mark_joins_converted += 1;
            join_type = converted;
        }

        for ((filter, side), is_derived) in filters.into_iter().zip(sides).zip(derived) {
            let retained = match side {
                JoinSide::None => {
                    if filter.is_true_literal() {
                        continue;
                    }
                    match join_type {
                        JoinType::Inner => {
                            left_pushdown.push(filter.clone());
                            right_pushdown.push(filter);
                            None
                        }
                        JoinType::Left
                        | JoinType::Semi
                        | JoinType::Anti
                        | JoinType::Single
                        | JoinType::Mark => {
                            left_pushdown.push(filter);
                            None
                        }
                        JoinType::Right | JoinType::Outer => Some(filter),
                    }
                }
                JoinSide::Left => {
                    if join_type != JoinType::Outer && join_type != JoinType::Right {
                        left_pushdown.push(filter);
                        None
                    } else {
                        Some(filter)
                    }
                }
                JoinSide::Right => {
                    if join_type == JoinType::Inner || join_type == JoinType::Right {
                        right_pushdown.push(filter);
                        None
                    } else {
                        Some(filter)
                    }
                }
                JoinSide::Both => {
                    let foldable = join_type == JoinType::Inner
                        && (!separate_non_equi_conds
                            || is_plain_equi_condition(&filter, &left_tags, &right_tags, mark_tag));
                    if foldable {
                        on_list.push(filter);
                        None
                    } else {
                        Some(filter)
                    }
                }
                // The mark column disappears with a converted mark join
                JoinSide::Mark if mark_converted.is_some() => None,
                JoinSide::Mark => Some(filter),
            };

            if let Some(filter) = retained {
                // Derived predicates are implied by their retained source
                if !is_derived {
                    cant_pushdown.push(filter);
                }
            }
        }

        let node = self.plan.node_mut(id)?;
        node.join_type = join_type;
        node.on_list = on_list;
        if mark_converted.is_some() {
            node.binding_tags.clear();
        }

        if join_type == JoinType::Inner && self.ctx.config.predicate_deduction {
            let on_list = self.plan.node(id)?.on_list.clone();
            let to_left = preds_deduction(&right_pushdown, &on_list);
            let to_right = preds_deduction(&left_pushdown, &on_list);
            self.push_deduced(id, 0, to_left, separate_non_equi_conds);
            self.push_deduced(id, 1, to_right, separate_non_equi_conds);
        }

        self.push_into_child(id, 0, left_pushdown, separate_non_equi_conds)?;
        self.push_into_child(id, 1, right_pushdown, separate_non_equi_conds)?;

        Ok((id, cant_pushdown))
    }

    /// Join type left after applying `filter` above a join of `join_type`,
    /// if the filter discards rows NULL-extended on some side
    fn reduce_join_type(
        &self,
        join_type: JoinType,
        filter: &Expr,
        left_tags: &TagSet,
        right_tags: &TagSet,
    ) -> Option<JoinType> {
        if !matches!(join_type, JoinType::Left | JoinType::Right | JoinType::Outer) {
            return None;
        }

        let side = join_side(filter, left_tags, right_tags, None);
        let rejects_left = side.touches_left() && rejects_null_on(filter, left_tags, self.ctx);
        let rejects_right = side.touches_right() && rejects_null_on(filter, right_tags, self.ctx);

        match join_type {
            JoinType::Left if rejects_right => Some(JoinType::Inner),
            JoinType::Right if rejects_left => Some(JoinType::Inner),
            JoinType::Outer if rejects_left && rejects_right => Some(JoinType::Inner),
            JoinType::Outer if rejects_left => Some(JoinType::Left),
            JoinType::Outer if rejects_right => Some(JoinType::Right),
            _ => None,
        }
    }

    /// Best-effort push of predicates deduced across an inner join. Failures
    /// and leftovers are dropped: the deduced predicates are redundant.
    fn push_deduced(
        &mut self,
        id: NodeId,
        index: usize,
        deduced: Vec<Expr>,
        separate_non_equi_conds: bool,
    ) {
        if deduced.is_empty() {
            return;
        }
        let child = match self.plan.child(id, index) {
            Ok(child) => child,
            Err(e) => {
                warn!("Skipping deduced predicates for join node {}: {}", id, e);
                return;
            }
        };

        trace!("Join node {}: pushing {} deduced predicates into child {}", id, deduced.len(), index);
        match self.pushdown(child, deduced, separate_non_equi_conds) {
            Ok((new_child, leftover)) => {
                if let Ok(node) = self.plan.node_mut(id) {
                    node.children[index] = new_child;
                }
                if !leftover.is_empty() {
                    trace!("Join node {}: dropped {} deduced predicates", id, leftover.len());
                }
            }
            Err(e) => warn!("Predicate deduction below join node {} failed: {}", id, e),
        }
    }

    /// Push `filters` into the `index`-th child of `id`, wrapping whatever the
    /// child cannot absorb in a new FILTER node
    fn push_into_child(
        &mut self,
        id: NodeId,
        index: usize,
        filters: Vec<Expr>,
        separate_non_equi_conds: bool,
    ) -> Result<()> {
        let child = self.plan.child(id, index)?;
        let (child, cant_pushdown_child) = self.pushdown(child, filters, separate_non_equi_conds)?;
        let child = self.wrap_in_filter(child, cant_pushdown_child);
        self.plan.node_mut(id)?.children[index] = child;
        Ok(())
    }

    /// Optimize every child of `id` without pushing anything into them
    fn optimize_children(&mut self, id: NodeId, separate_non_equi_conds: bool) -> Result<()> {
        let child_count = self.plan.node(id)?.children.len();
        for index in 0..child_count {
            self.push_into_child(id, index, Vec::new(), separate_non_equi_conds)?;
        }
        Ok(())
    }

    /// Place `filters` in a new FILTER node above `child`
    pub fn wrap_in_filter(&mut self, child: NodeId, filters: Vec<Expr>) -> NodeId {
        if filters.is_empty() {
            return child;
        }
        self.stats.filters_added += 1;
        let id = self.plan.append_node(Node::filter(child, filters));
        trace!("Added filter node {} above node {}", id, child);
        id
    }
}

/// Split conditions into conjuncts after factoring common terms out of ORs
fn distribute_conjuncts(conds: Vec<Expr>) -> Vec<Expr> {
    conds
        .into_iter()
        .flat_map(|cond| split_conjunction(apply_distributivity(cond)))
        .collect()
}

/// Append the filters not already present
fn append_unique(target: &mut Vec<Expr>, filters: Vec<Expr>) {
    for filter in filters {
        if !target.contains(&filter) {
            target.push(filter);
        }
    }
}

/// `left = right` where neither operand reads from both join inputs
fn is_plain_equi_condition(
    filter: &Expr,
    left_tags: &TagSet,
    right_tags: &TagSet,
    mark_tag: Option<Tag>,
) -> bool {
    match filter.call_args(func::EQ) {
        Some([l, r]) => {
            join_side(l, left_tags, right_tags, mark_tag) != JoinSide::Both
                && join_side(r, left_tags, right_tags, mark_tag) != JoinSide::Both
        }
        _ => false,
    }
}

/// Semi/anti join a mark join turns into, if every filter reading the mark
/// is the same bare mark column (semi) or its negation (anti)
fn mark_conversion(filters: &[Expr], mark_tag: Tag, nullable_mark: bool) -> Option<JoinType> {
    let mut mark_filters = filters.iter().filter(|f| f.contains_tag(mark_tag));
    let first = mark_filters.next()?;
    if mark_filters.any(|other| other != first) {
        return None;
    }

    if first.as_column().is_some() {
        return Some(JoinType::Semi);
    }
    // NOT NULL is NULL, which an anti join would keep
    match first.call_args(func::NOT) {
        Some([Expr::Column(_)]) if !nullable_mark => Some(JoinType::Anti),
        _ => None,
    }
}
