// Query Optimizer Implementation
//
// This module drives the logical rewrite passes over a bound plan: projection
// elimination first, then filter pushdown, both starting from the root.

use log::{debug, info};
use serde::Serialize;

use crate::query::planner::context::{OptimizerConfig, OptimizerContext};
use crate::query::planner::error::Result;
use crate::query::planner::filter_pushdown::FilterPushdown;
use crate::query::planner::logical::{NodeKind, Plan};
use crate::query::planner::projection_elimination::ProjectionEliminator;

/// What one `optimize` call changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OptimizeSummary {
    pub projections_removed: usize,
    pub filters_removed: usize,
    pub filters_added: usize,
    pub joins_reduced: usize,
    pub mark_joins_converted: usize,
}

/// The main optimizer class that applies the rewrite passes
/// to a logical query plan.
pub struct Optimizer {
    ctx: OptimizerContext,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

impl Optimizer {
    /// Create a new optimizer instance
    pub fn new(config: OptimizerConfig) -> Self {
        Optimizer {
            ctx: OptimizerContext::new(config),
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.ctx.config
    }

    /// Optimize `plan` in place. The root id may change.
    pub fn optimize(&self, plan: &mut Plan) -> Result<OptimizeSummary> {
        let config = &self.ctx.config;
        let mut summary = OptimizeSummary::default();

        if config.validate_plan {
            plan.validate()?;
        }

        if config.remove_simple_projections {
            let root = plan.root;
            let mut eliminator = ProjectionEliminator::new(plan);
            let (new_root, _) = eliminator.eliminate(root, NodeKind::Unknown)?;
            summary.projections_removed = eliminator.removed();
            plan.set_root(new_root);
            debug!("Projection elimination done, root is node {}", new_root);
        }

        if config.pushdown_filters {
            let root = plan.root;
            let mut pushdown = FilterPushdown::new(plan, &self.ctx);
            let (new_root, residue) =
                pushdown.pushdown(root, Vec::new(), config.separate_non_equi_conds)?;
            let new_root = pushdown.wrap_in_filter(new_root, residue);

            let stats = pushdown.stats();
            summary.filters_removed = stats.filters_removed;
            summary.filters_added = stats.filters_added;
            summary.joins_reduced = stats.joins_reduced;
            summary.mark_joins_converted = stats.mark_joins_converted;

            plan.set_root(new_root);
            debug!("Filter pushdown done, root is node {}", new_root);
        }

        info!(
            "Optimized plan: {} projections removed, {} filters removed, {} filters added, {} joins reduced, {} mark joins converted",
            summary.projections_removed,
            summary.filters_removed,
            summary.filters_added,
            summary.joins_reduced,
            summary.mark_joins_converted
        );

        Ok(summary)
    }
}
