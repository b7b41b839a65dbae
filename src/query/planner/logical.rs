// Logical Query Plan Implementation
//
// This module defines the logical plan representation the rewrite passes
// operate on: an arena of nodes addressed by integer id. Nodes are never
// removed; a rewrite that drops a node simply stops referencing its id.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::types::{NodeId, Tag};
use crate::query::planner::error::{OptimizerError, Result};
use crate::query::planner::expression::Expr;

/// Kind of a plan node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    #[default]
    Unknown,
    Scan,
    ExternalScan,
    FunctionScan,
    ExternalFunction,
    ValueScan,
    Project,
    Filter,
    Join,
    Agg,
    Distinct,
    Sort,
    Union,
    UnionAll,
    Minus,
    MinusAll,
    Intersect,
    IntersectAll,
}

impl NodeKind {
    pub fn is_set_operation(self) -> bool {
        matches!(
            self,
            NodeKind::Union
                | NodeKind::UnionAll
                | NodeKind::Minus
                | NodeKind::MinusAll
                | NodeKind::Intersect
                | NodeKind::IntersectAll
        )
    }

    /// Number of children a node of this kind must have, if fixed
    pub fn arity(self) -> Option<usize> {
        match self {
            NodeKind::Unknown => None,
            NodeKind::Scan | NodeKind::ExternalScan | NodeKind::ValueScan => Some(0),
            NodeKind::FunctionScan
            | NodeKind::ExternalFunction
            | NodeKind::Project
            | NodeKind::Filter
            | NodeKind::Agg
            | NodeKind::Distinct
            | NodeKind::Sort => Some(1),
            NodeKind::Join
            | NodeKind::Union
            | NodeKind::UnionAll
            | NodeKind::Minus
            | NodeKind::MinusAll
            | NodeKind::Intersect
            | NodeKind::IntersectAll => Some(2),
        }
    }

    fn label(self) -> &'static str {
        match self {
            NodeKind::Unknown => "Unknown",
            NodeKind::Scan => "Scan",
            NodeKind::ExternalScan => "ExternalScan",
            NodeKind::FunctionScan => "FunctionScan",
            NodeKind::ExternalFunction => "ExternalFunction",
            NodeKind::ValueScan => "ValueScan",
            NodeKind::Project => "Project",
            NodeKind::Filter => "Filter",
            NodeKind::Join => "Join",
            NodeKind::Agg => "Aggregate",
            NodeKind::Distinct => "Distinct",
            NodeKind::Sort => "Sort",
            NodeKind::Union => "Union",
            NodeKind::UnionAll => "UnionAll",
            NodeKind::Minus => "Minus",
            NodeKind::MinusAll => "MinusAll",
            NodeKind::Intersect => "Intersect",
            NodeKind::IntersectAll => "IntersectAll",
        }
    }
}

/// Join types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Outer,
    Semi,
    Anti,
    Single,
    Mark,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
            JoinType::Outer => "OUTER",
            JoinType::Semi => "SEMI",
            JoinType::Anti => "ANTI",
            JoinType::Single => "SINGLE",
            JoinType::Mark => "MARK",
        };
        write!(f, "{}", name)
    }
}

/// Sort direction for ORDER BY keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// A single ORDER BY key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBySpec {
    pub expr: Expr,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Literal rows attached to a VALUE_SCAN (or a materialized external source)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RowsetData {
    pub rows: Vec<Vec<Expr>>,
}

/// A node in the logical plan arena
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
    /// Producer tags this node introduces
    pub binding_tags: Vec<Tag>,
    /// Source name for scans, used in EXPLAIN output only
    pub table: Option<String>,
    pub project_list: Vec<Expr>,
    pub filter_list: Vec<Expr>,
    pub on_list: Vec<Expr>,
    pub group_by: Vec<Expr>,
    pub grouping_set: Vec<Expr>,
    pub agg_list: Vec<Expr>,
    pub order_by: Vec<OrderBySpec>,
    pub join_type: JoinType,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
    pub rowset_data: Option<RowsetData>,
    /// Mark joins only: the match flag may be NULL (e.g. NOT IN over a
    /// nullable subquery)
    pub nullable_mark: bool,
}

impl Node {
    /// Table scan introducing binding tag `tag`
    pub fn scan(table: &str, tag: Tag) -> Self {
        Node {
            kind: NodeKind::Scan,
            binding_tags: vec![tag],
            table: Some(table.to_string()),
            ..Default::default()
        }
    }

    pub fn external_scan(source: &str, tag: Tag) -> Self {
        Node {
            kind: NodeKind::ExternalScan,
            binding_tags: vec![tag],
            table: Some(source.to_string()),
            ..Default::default()
        }
    }

    pub fn value_scan(tag: Tag, rowset_data: Option<RowsetData>) -> Self {
        Node {
            kind: NodeKind::ValueScan,
            binding_tags: vec![tag],
            rowset_data,
            ..Default::default()
        }
    }

    /// Table function reading its arguments from `source`
    pub fn function_scan(function: &str, tag: Tag, source: NodeId) -> Self {
        Node {
            kind: NodeKind::FunctionScan,
            children: vec![source],
            binding_tags: vec![tag],
            table: Some(function.to_string()),
            ..Default::default()
        }
    }

    pub fn project(tag: Tag, child: NodeId, project_list: Vec<Expr>) -> Self {
        Node {
            kind: NodeKind::Project,
            children: vec![child],
            binding_tags: vec![tag],
            project_list,
            ..Default::default()
        }
    }

    pub fn filter(child: NodeId, filter_list: Vec<Expr>) -> Self {
        Node {
            kind: NodeKind::Filter,
            children: vec![child],
            filter_list,
            ..Default::default()
        }
    }

    pub fn join(join_type: JoinType, left: NodeId, right: NodeId, on_list: Vec<Expr>) -> Self {
        Node {
            kind: NodeKind::Join,
            children: vec![left, right],
            join_type,
            on_list,
            ..Default::default()
        }
    }

    /// Mark join exposing the match flag as column (`mark_tag`, 0)
    pub fn mark_join(mark_tag: Tag, left: NodeId, right: NodeId, on_list: Vec<Expr>) -> Self {
        Node {
            binding_tags: vec![mark_tag],
            ..Node::join(JoinType::Mark, left, right, on_list)
        }
    }

    pub fn agg(
        group_tag: Tag,
        agg_tag: Tag,
        child: NodeId,
        group_by: Vec<Expr>,
        agg_list: Vec<Expr>,
    ) -> Self {
        Node {
            kind: NodeKind::Agg,
            children: vec![child],
            binding_tags: vec![group_tag, agg_tag],
            group_by,
            agg_list,
            ..Default::default()
        }
    }

    /// Set operation whose output columns are referenced through `tag`
    pub fn set_operation(kind: NodeKind, tag: Tag, left: NodeId, right: NodeId) -> Self {
        Node {
            kind,
            children: vec![left, right],
            binding_tags: vec![tag],
            ..Default::default()
        }
    }

    pub fn distinct(child: NodeId) -> Self {
        Node {
            kind: NodeKind::Distinct,
            children: vec![child],
            ..Default::default()
        }
    }

    pub fn sort(child: NodeId, order_by: Vec<OrderBySpec>) -> Self {
        Node {
            kind: NodeKind::Sort,
            children: vec![child],
            order_by,
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: Expr) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: Expr) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn has_limit_or_offset(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    /// One-line description used by EXPLAIN
    pub fn describe(&self) -> String {
        let mut out = String::from(self.kind.label());
        if self.kind == NodeKind::Join {
            out.push_str(&format!("[{}]", self.join_type));
        }
        if let Some(table) = &self.table {
            out.push_str(&format!(" {}", table));
        }
        if !self.binding_tags.is_empty() {
            let tags: Vec<String> = self.binding_tags.iter().map(|t| format!("#{}", t)).collect();
            out.push_str(&format!(" [{}]", tags.join(", ")));
        }
        push_list(&mut out, "output", &self.project_list);
        push_list(&mut out, "group by", &self.group_by);
        push_list(&mut out, "grouping set", &self.grouping_set);
        push_list(&mut out, "aggregates", &self.agg_list);
        push_list(&mut out, "on", &self.on_list);
        push_list(&mut out, "filters", &self.filter_list);
        if !self.order_by.is_empty() {
            let keys: Vec<String> = self
                .order_by
                .iter()
                .map(|key| {
                    let direction = match key.direction {
                        SortDirection::Asc => "ASC",
                        SortDirection::Desc => "DESC",
                    };
                    format!("{} {}", key.expr, direction)
                })
                .collect();
            out.push_str(&format!(" order by: {}", keys.join(", ")));
        }
        if let Some(limit) = &self.limit {
            out.push_str(&format!(" limit: {}", limit));
        }
        if let Some(offset) = &self.offset {
            out.push_str(&format!(" offset: {}", offset));
        }
        if let Some(rowset) = &self.rowset_data {
            out.push_str(&format!(" rows: {}", rowset.rows.len()));
        }
        if self.nullable_mark {
            out.push_str(" nullable mark");
        }
        out
    }
}

fn push_list(out: &mut String, label: &str, exprs: &[Expr]) {
    if exprs.is_empty() {
        return;
    }
    let rendered: Vec<String> = exprs.iter().map(|e| e.to_string()).collect();
    out.push_str(&format!(" {}: {}", label, rendered.join(", ")));
}

/// Logical plan: node arena plus the id of the root node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Plan {
    pub nodes: Vec<Node>,
    pub root: NodeId,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node to the arena and return its id
    pub fn append_node(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id).ok_or(OptimizerError::NodeNotFound(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id).ok_or(OptimizerError::NodeNotFound(id))
    }

    /// The `index`-th child of `id`
    pub fn child(&self, id: NodeId, index: usize) -> Result<NodeId> {
        self.node(id)?
            .children
            .get(index)
            .copied()
            .ok_or(OptimizerError::MissingChild { node: id, index })
    }

    /// The `index`-th binding tag of `id`
    pub fn binding_tag(&self, id: NodeId, index: usize) -> Result<Tag> {
        self.node(id)?
            .binding_tags
            .get(index)
            .copied()
            .ok_or(OptimizerError::MissingBindingTag { node: id, index })
    }

    /// Ids of every node reachable from the root, parents before children
    pub fn reachable(&self) -> Result<Vec<NodeId>> {
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            for &child in self.node(id)?.children.iter().rev() {
                stack.push(child);
            }
        }
        Ok(order)
    }

    /// Check the structural invariants of the reachable tree
    pub fn validate(&self) -> Result<()> {
        let mut seen_nodes = HashSet::new();
        let mut seen_tags = HashSet::new();
        let mut stack = vec![self.root];

        while let Some(id) = stack.pop() {
            if !seen_nodes.insert(id) {
                return Err(OptimizerError::NodeReachableTwice(id));
            }
            let node = self.node(id)?;

            if let Some(expected) = node.kind.arity() {
                if node.children.len() != expected {
                    return Err(OptimizerError::InvalidArity {
                        node: id,
                        kind: node.kind,
                        expected,
                        found: node.children.len(),
                    });
                }
            }

            let required_tags = match node.kind {
                NodeKind::Project => 1,
                NodeKind::Agg => 2,
                NodeKind::Join if node.join_type == JoinType::Mark => 1,
                _ => 0,
            };
            if node.binding_tags.len() < required_tags {
                return Err(OptimizerError::MissingBindingTag {
                    node: id,
                    index: node.binding_tags.len(),
                });
            }

            for &tag in &node.binding_tags {
                if !seen_tags.insert(tag) {
                    return Err(OptimizerError::DuplicateBindingTag { tag });
                }
            }

            stack.extend(node.children.iter().copied());
        }

        Ok(())
    }

    /// Render the reachable tree, one node per line
    pub fn explain(&self) -> Result<String> {
        let mut out = String::new();
        self.explain_node(self.root, 0, &mut out)?;
        Ok(out)
    }

    fn explain_node(&self, id: NodeId, depth: usize, out: &mut String) -> Result<()> {
        let node = self.node(id)?;
        out.push_str(&"  ".repeat(depth));
        out.push_str(&node.describe());
        out.push('\n');
        for &child in &node.children {
            self.explain_node(child, depth + 1, out)?;
        }
        Ok(())
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.explain() {
            Ok(text) => write!(f, "{}", text),
            Err(e) => write!(f, "<invalid plan: {}>", e),
        }
    }
}
