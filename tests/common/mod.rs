#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use anyhow::{Result, anyhow, bail};
use rand::Rng;

use bayun_optimizer::query::planner::binding::TagSet;
use bayun_optimizer::query::planner::context::NullRules;
use bayun_optimizer::query::planner::expression::{ColumnRef, Expr, Value};
use bayun_optimizer::query::planner::fold::evaluate;
use bayun_optimizer::query::planner::logical::{JoinType, Node, NodeKind, Plan};

pub type Table = Vec<Vec<Value>>;

// Build `SELECT ... FROM (SELECT a, b FROM t) s WHERE s.a > 1`
pub fn subquery_plan() -> Plan {
    let mut plan = Plan::new();
    let scan = plan.append_node(Node::scan("t", 1));
    let inner = plan.append_node(Node::project(2, scan, vec![Expr::col(1, 0), Expr::col(1, 1)]));
    let filter = plan.append_node(Node::filter(inner, vec![Expr::gt(Expr::col(2, 0), Expr::lit(1))]));
    let outer = plan.append_node(Node::project(3, filter, vec![Expr::col(2, 0)]));
    plan.set_root(outer);
    plan
}

// Build `PROJECT(FILTER(JOIN(SCAN l, SCAN r)))` with the projection reading
// columns 0..2 of both sides
pub fn join_plan(join_type: JoinType, on_list: Vec<Expr>, filters: Vec<Expr>) -> Plan {
    let mut plan = Plan::new();
    let l = plan.append_node(Node::scan("l", 1));
    let r = plan.append_node(Node::scan("r", 2));
    let join = plan.append_node(Node::join(join_type, l, r, on_list));
    let filter = plan.append_node(Node::filter(join, filters));
    let project = plan.append_node(Node::project(
        3,
        filter,
        vec![Expr::col(1, 0), Expr::col(1, 1), Expr::col(2, 0), Expr::col(2, 1)],
    ));
    plan.set_root(project);
    plan
}

/// Find the first reachable node of `kind`
pub fn find_node(plan: &Plan, kind: NodeKind) -> Option<usize> {
    plan.reachable()
        .ok()?
        .into_iter()
        .find(|&id| plan.nodes[id].kind == kind)
}

/// Count the reachable nodes of `kind`
pub fn count_nodes(plan: &Plan, kind: NodeKind) -> usize {
    plan.reachable()
        .map(|ids| ids.into_iter().filter(|&id| plan.nodes[id].kind == kind).count())
        .unwrap_or(0)
}

/// Random table with `width` small integer columns, roughly one value in
/// six NULL
pub fn random_table<R: Rng>(rng: &mut R, rows: usize, width: usize) -> Table {
    (0..rows)
        .map(|_| {
            (0..width)
                .map(|_| {
                    if rng.gen_ratio(1, 6) {
                        Value::Null
                    } else {
                        Value::Integer(rng.gen_range(0..4))
                    }
                })
                .collect()
        })
        .collect()
}

/// Random comparison of a column of `tag` against a small constant
pub fn random_comparison<R: Rng>(rng: &mut R, tag: i32) -> Expr {
    let column = Expr::col(tag, rng.gen_range(0..2));
    let constant = Expr::lit(rng.gen_range(0..4i64));
    match rng.gen_range(0..5) {
        0 => Expr::eq(column, constant),
        1 => Expr::gt(column, constant),
        2 => Expr::lt(column, constant),
        3 => Expr::is_null(column),
        _ => Expr::binary("<>", column, constant),
    }
}

/// Random predicate over the columns of `tags`
pub fn random_predicate<R: Rng>(rng: &mut R, tags: &[i32], depth: usize) -> Expr {
    let tag = tags[rng.gen_range(0..tags.len())];
    if depth == 0 {
        return random_comparison(rng, tag);
    }
    match rng.gen_range(0..6) {
        0 => Expr::and(
            random_predicate(rng, tags, depth - 1),
            random_predicate(rng, tags, depth - 1),
        ),
        1 => Expr::or(
            random_predicate(rng, tags, depth - 1),
            random_predicate(rng, tags, depth - 1),
        ),
        2 => Expr::not(random_predicate(rng, tags, depth - 1)),
        3 => Expr::eq(
            Expr::col(tags[0], rng.gen_range(0..2)),
            Expr::col(tags[tags.len() - 1], rng.gen_range(0..2)),
        ),
        _ => random_comparison(rng, tag),
    }
}

/// One row flowing through the reference evaluator: column bindings plus the
/// tags padded with NULLs by an outer join
#[derive(Debug, Clone, Default)]
struct Row {
    values: HashMap<ColumnRef, Value>,
    nulled: HashSet<i32>,
}

impl Row {
    fn lookup(&self, col: &ColumnRef) -> Option<Value> {
        self.values
            .get(col)
            .cloned()
            .or_else(|| self.nulled.contains(&col.tag).then_some(Value::Null))
    }

    fn merge(&self, other: &Row) -> Row {
        let mut merged = self.clone();
        merged.values.extend(other.values.iter().map(|(k, v)| (*k, v.clone())));
        merged.nulled.extend(other.nulled.iter().copied());
        merged
    }

    fn padded(&self, tags: &TagSet) -> Row {
        let mut row = self.clone();
        row.nulled.extend(tags.iter().copied());
        row
    }
}

/// Reference row-at-a-time interpreter for logical plans, used to check that
/// rewrites keep query results unchanged
pub struct Evaluator<'a> {
    plan: &'a Plan,
    tables: &'a HashMap<String, Table>,
    rules: NullRules,
}

impl<'a> Evaluator<'a> {
    pub fn new(plan: &'a Plan, tables: &'a HashMap<String, Table>) -> Self {
        Evaluator {
            plan,
            tables,
            rules: NullRules::default(),
        }
    }

    /// Evaluate the plan and render the root projection's rows, sorted
    pub fn run(&self) -> Result<Vec<String>> {
        let root = self.plan.node(self.plan.root)?;
        let rows = self.eval(self.plan.root)?;
        let mut rendered = rows
            .iter()
            .map(|row| {
                let values = root
                    .project_list
                    .iter()
                    .map(|e| self.value(e, row).map(|v| v.to_string()))
                    .collect::<Result<Vec<_>>>()?;
                Ok(values.join("|"))
            })
            .collect::<Result<Vec<_>>>()?;
        rendered.sort();
        Ok(rendered)
    }

    fn value(&self, expr: &Expr, row: &Row) -> Result<Value> {
        evaluate(expr, &|col: &ColumnRef| row.lookup(col), &self.rules)
            .map_err(|e| anyhow!("cannot evaluate {}: {}", expr, e))
    }

    fn passes(&self, filters: &[Expr], row: &Row) -> Result<bool> {
        for filter in filters {
            if self.value(filter, row)? != Value::Boolean(true) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn keep(&self, rows: Vec<Row>, filters: &[Expr]) -> Result<Vec<Row>> {
        let mut kept = Vec::new();
        for row in rows {
            if self.passes(filters, &row)? {
                kept.push(row);
            }
        }
        Ok(kept)
    }

    fn eval(&self, id: usize) -> Result<Vec<Row>> {
        let node = self.plan.node(id)?;
        let rows = match node.kind {
            NodeKind::Scan => {
                let tag = node.binding_tags[0];
                let name = node.table.clone().unwrap_or_default();
                let table = self
                    .tables
                    .get(&name)
                    .ok_or_else(|| anyhow!("no table {}", name))?;
                let rows = table
                    .iter()
                    .map(|values| Row {
                        values: values
                            .iter()
                            .enumerate()
                            .map(|(i, v)| (ColumnRef::new(tag, i as i32), v.clone()))
                            .collect(),
                        nulled: HashSet::new(),
                    })
                    .collect();
                self.keep(rows, &node.filter_list)?
            }
            NodeKind::Filter => {
                let rows = self.eval(node.children[0])?;
                self.keep(rows, &node.filter_list)?
            }
            NodeKind::Project => {
                let tag = node.binding_tags[0];
                let mut out = Vec::new();
                for row in self.eval(node.children[0])? {
                    let mut projected = row.clone();
                    for (i, expr) in node.project_list.iter().enumerate() {
                        let value = self.value(expr, &row)?;
                        projected.values.insert(ColumnRef::new(tag, i as i32), value);
                    }
                    out.push(projected);
                }
                out
            }
            NodeKind::Join => self.eval_join(id, node)?,
            NodeKind::Agg => self.eval_agg(node)?,
            NodeKind::UnionAll => {
                let tag = node.binding_tags[0];
                let mut out = Vec::new();
                for &branch in &node.children {
                    let outputs = &self.plan.node(branch)?.project_list;
                    for row in self.eval(branch)? {
                        let mut unioned = Row::default();
                        for (i, expr) in outputs.iter().enumerate() {
                            unioned
                                .values
                                .insert(ColumnRef::new(tag, i as i32), self.value(expr, &row)?);
                        }
                        out.push(unioned);
                    }
                }
                out
            }
            NodeKind::Sort => self.eval(node.children[0])?,
            other => bail!("reference evaluator does not support {:?}", other),
        };

        match &node.limit {
            Some(Expr::Constant(Value::Integer(n))) => {
                Ok(rows.into_iter().take(*n as usize).collect())
            }
            _ => Ok(rows),
        }
    }

    fn eval_join(&self, id: usize, node: &Node) -> Result<Vec<Row>> {
        let left_tags = self.subtree_tags(node.children[0])?;
        let right_tags = self.subtree_tags(node.children[1])?;
        let left = self.eval(node.children[0])?;
        let right = self.eval(node.children[1])?;

        let mut out = Vec::new();
        let mut right_matched = vec![false; right.len()];
        for l in &left {
            let mut matched = false;
            for (j, r) in right.iter().enumerate() {
                let joined = l.merge(r);
                if self.passes(&node.on_list, &joined)? {
                    matched = true;
                    right_matched[j] = true;
                    if matches!(
                        node.join_type,
                        JoinType::Inner | JoinType::Left | JoinType::Right | JoinType::Outer
                    ) {
                        out.push(joined);
                    }
                }
            }
            match node.join_type {
                JoinType::Left | JoinType::Outer if !matched => out.push(l.padded(&right_tags)),
                JoinType::Semi if matched => out.push(l.clone()),
                JoinType::Anti if !matched => out.push(l.clone()),
                JoinType::Mark => {
                    let mark = self.plan.binding_tag(id, 0)?;
                    let mut marked = l.clone();
                    marked
                        .values
                        .insert(ColumnRef::new(mark, 0), Value::Boolean(matched));
                    out.push(marked);
                }
                _ => {}
            }
        }

        if matches!(node.join_type, JoinType::Right | JoinType::Outer) {
            for (j, r) in right.iter().enumerate() {
                if !right_matched[j] {
                    out.push(r.padded(&left_tags));
                }
            }
        }
        Ok(out)
    }

    // Every tag bound at or below `id`, so padded rows answer NULL for any
    // column of the NULL-extended input
    fn subtree_tags(&self, id: usize) -> Result<TagSet> {
        let mut tags = TagSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.plan.node(current)?;
            tags.extend(node.binding_tags.iter().copied());
            stack.extend(node.children.iter().copied());
        }
        Ok(tags)
    }

    fn eval_agg(&self, node: &Node) -> Result<Vec<Row>> {
        let group_tag = node.binding_tags[0];
        let agg_tag = node.binding_tags[1];
        let rows = self.eval(node.children[0])?;

        let mut groups: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
        for row in rows {
            let key = node
                .group_by
                .iter()
                .map(|e| self.value(e, &row))
                .collect::<Result<Vec<_>>>()?;
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(row),
                None => groups.push((key, vec![row])),
            }
        }
        if groups.is_empty() && node.group_by.is_empty() {
            groups.push((Vec::new(), Vec::new()));
        }

        let mut out = Vec::new();
        for (key, members) in groups {
            let mut row = Row::default();
            for (i, value) in key.into_iter().enumerate() {
                row.values.insert(ColumnRef::new(group_tag, i as i32), value);
            }
            for (i, agg) in node.agg_list.iter().enumerate() {
                let value = self.aggregate(agg, &members)?;
                row.values.insert(ColumnRef::new(agg_tag, i as i32), value);
            }
            out.push(row);
        }
        Ok(out)
    }

    fn aggregate(&self, agg: &Expr, rows: &[Row]) -> Result<Value> {
        let (name, args) = match agg {
            Expr::Function { name, args } => (name.as_str(), args),
            _ => bail!("not an aggregate: {}", agg),
        };
        match (name, args.as_slice()) {
            ("count", []) => Ok(Value::Integer(rows.len() as i64)),
            ("count", [arg]) => {
                let mut n = 0;
                for row in rows {
                    if !self.value(arg, row)?.is_null() {
                        n += 1;
                    }
                }
                Ok(Value::Integer(n))
            }
            ("sum", [arg]) => {
                let mut total: Option<i64> = None;
                for row in rows {
                    if let Value::Integer(v) = self.value(arg, row)? {
                        total = Some(total.unwrap_or(0) + v);
                    }
                }
                Ok(total.map(Value::Integer).unwrap_or(Value::Null))
            }
            _ => bail!("unsupported aggregate {}", agg),
        }
    }
}

/// Evaluate `plan` over `tables`
pub fn run_plan(plan: &Plan, tables: &HashMap<String, Table>) -> Result<Vec<String>> {
    Evaluator::new(plan, tables).run()
}
