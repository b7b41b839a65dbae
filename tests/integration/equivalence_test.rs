use std::collections::HashMap;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bayun_optimizer::query::planner::expression::Expr;
use bayun_optimizer::query::planner::logical::{JoinType, Node, NodeKind, Plan};
use bayun_optimizer::query::planner::{Optimizer, OptimizerConfig};

#[path = "../common/mod.rs"]
mod common;

use common::{Table, join_plan, random_predicate, random_table, run_plan};

const ROUNDS: usize = 200;

fn random_tables(rng: &mut StdRng, names: &[&str]) -> HashMap<String, Table> {
    names
        .iter()
        .map(|name| {
            let rows = rng.gen_range(0..7);
            (name.to_string(), random_table(rng, rows, 2))
        })
        .collect()
}

/// Optimize a copy of `plan` with `config` and check both versions return
/// the same rows over `tables`
fn assert_equivalent(plan: &Plan, config: OptimizerConfig, tables: &HashMap<String, Table>) -> Result<()> {
    let expected = run_plan(plan, tables)?;

    let mut optimized = plan.clone();
    Optimizer::new(config).optimize(&mut optimized)?;
    let actual = run_plan(&optimized, tables)?;

    assert_eq!(
        actual, expected,
        "results differ\noriginal:\n{}\noptimized:\n{}",
        plan, optimized
    );
    Ok(())
}

#[test]
fn test_joins_with_random_filters() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(17);
    let join_types = [JoinType::Inner, JoinType::Left, JoinType::Right, JoinType::Outer];

    for round in 0..ROUNDS {
        let join_type = join_types[round % join_types.len()];
        let filters = (0..rng.gen_range(1..4))
            .map(|_| random_predicate(&mut rng, &[1, 2], 2))
            .collect();
        let on_list = vec![Expr::eq(Expr::col(1, 0), Expr::col(2, 0))];
        let plan = join_plan(join_type, on_list, filters);
        let tables = random_tables(&mut rng, &["l", "r"]);

        assert_equivalent(&plan, OptimizerConfig::default(), &tables)?;
        assert_equivalent(
            &plan,
            OptimizerConfig {
                separate_non_equi_conds: true,
                ..Default::default()
            },
            &tables,
        )?;
    }
    Ok(())
}

#[test]
fn test_random_join_conditions() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(29);
    let join_types = [JoinType::Inner, JoinType::Left, JoinType::Right, JoinType::Outer];

    for round in 0..ROUNDS {
        let join_type = join_types[round % join_types.len()];
        let on_list = vec![random_predicate(&mut rng, &[1, 2], 2)];
        let filters = vec![random_predicate(&mut rng, &[1, 2], 1)];
        let plan = join_plan(join_type, on_list, filters);
        let tables = random_tables(&mut rng, &["l", "r"]);

        assert_equivalent(&plan, OptimizerConfig::default(), &tables)?;
    }
    Ok(())
}

// SELECT * FROM (SELECT a, b FROM l) s JOIN (SELECT a, b FROM r) t ON ...
// WHERE ... with the subqueries projecting columns in swapped order
#[test]
fn test_subqueries_under_join() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(5);

    for round in 0..ROUNDS {
        let mut plan = Plan::new();
        let l = plan.append_node(Node::scan("l", 1));
        let pl = plan.append_node(Node::project(3, l, vec![Expr::col(1, 1), Expr::col(1, 0)]));
        let r = plan.append_node(Node::scan("r", 2));
        let pr = plan.append_node(Node::project(4, r, vec![Expr::col(2, 0), Expr::lit(1)]));
        let join_type = if round % 2 == 0 { JoinType::Inner } else { JoinType::Left };
        let join = plan.append_node(Node::join(
            join_type,
            pl,
            pr,
            vec![Expr::eq(Expr::col(3, 0), Expr::col(4, 0))],
        ));
        let filters = (0..rng.gen_range(1..3))
            .map(|_| random_predicate(&mut rng, &[3, 4], 2))
            .collect();
        let filter = plan.append_node(Node::filter(join, filters));
        let root = plan.append_node(Node::project(
            5,
            filter,
            vec![Expr::col(3, 0), Expr::col(3, 1), Expr::col(4, 0), Expr::col(4, 1)],
        ));
        plan.set_root(root);

        let tables = random_tables(&mut rng, &["l", "r"]);
        assert_equivalent(&plan, OptimizerConfig::default(), &tables)?;
    }
    Ok(())
}

#[test]
fn test_aggregates_with_random_having() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(41);

    for round in 0..ROUNDS {
        let mut plan = Plan::new();
        let scan = plan.append_node(Node::scan("t", 1));
        let group_by = if round % 3 == 0 {
            vec![]
        } else {
            vec![Expr::col(1, 0), Expr::col(1, 1)]
        };
        let agg = plan.append_node(Node::agg(
            2,
            3,
            scan,
            group_by,
            vec![
                Expr::func("count", vec![]),
                Expr::func("sum", vec![Expr::col(1, 1)]),
            ],
        ));
        let having = if round % 3 == 0 {
            random_predicate(&mut rng, &[3], 1)
        } else {
            random_predicate(&mut rng, &[2, 3], 2)
        };
        let filter = plan.append_node(Node::filter(agg, vec![having]));
        let root = plan.append_node(Node::project(
            4,
            filter,
            vec![Expr::col(3, 0), Expr::col(3, 1)],
        ));
        plan.set_root(root);

        let tables = random_tables(&mut rng, &["t"]);
        assert_equivalent(&plan, OptimizerConfig::default(), &tables)?;
    }
    Ok(())
}

#[test]
fn test_union_all_with_random_filters() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(63);

    for _ in 0..ROUNDS {
        let mut plan = Plan::new();
        let x = plan.append_node(Node::scan("x", 1));
        let px = plan.append_node(Node::project(2, x, vec![Expr::col(1, 0), Expr::col(1, 1)]));
        let y = plan.append_node(Node::scan("y", 3));
        let py = plan.append_node(Node::project(4, y, vec![Expr::col(3, 1), Expr::lit(2)]));
        let union = plan.append_node(Node::set_operation(NodeKind::UnionAll, 5, px, py));
        let filter = plan.append_node(Node::filter(union, vec![random_predicate(&mut rng, &[5], 2)]));
        let root = plan.append_node(Node::project(6, filter, vec![Expr::col(5, 0), Expr::col(5, 1)]));
        plan.set_root(root);

        let tables = random_tables(&mut rng, &["x", "y"]);
        assert_equivalent(&plan, OptimizerConfig::default(), &tables)?;
    }
    Ok(())
}

#[test]
fn test_mark_joins_with_random_filters() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(97);

    for round in 0..ROUNDS {
        let mut plan = Plan::new();
        let l = plan.append_node(Node::scan("l", 1));
        let r = plan.append_node(Node::scan("r", 2));
        let mark = plan.append_node(Node::mark_join(
            6,
            l,
            r,
            vec![Expr::eq(Expr::col(1, 0), Expr::col(2, 0))],
        ));
        let mark_filter = if round % 2 == 0 {
            Expr::col(6, 0)
        } else {
            Expr::not(Expr::col(6, 0))
        };
        let filter = plan.append_node(Node::filter(
            mark,
            vec![mark_filter, random_predicate(&mut rng, &[1], 1)],
        ));
        let root = plan.append_node(Node::project(7, filter, vec![Expr::col(1, 0), Expr::col(1, 1)]));
        plan.set_root(root);

        let tables = random_tables(&mut rng, &["l", "r"]);
        assert_equivalent(&plan, OptimizerConfig::default(), &tables)?;
    }
    Ok(())
}
