// Optimizer Configuration and Context
//
// Session-level settings consulted by the rewrite passes.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Functions known to return NULL whenever any argument is NULL
static DEFAULT_NULL_PROPAGATING: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "abs", "upper", "lower", "length", "concat", "substring", "trim", "round", "floor", "ceil",
    ]
    .into_iter()
    .collect()
});

/// Configuration for the logical rewrite passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Run projection elimination before filter pushdown
    pub remove_simple_projections: bool,

    /// Run filter pushdown
    pub pushdown_filters: bool,

    /// Only fold plain `left = right` predicates into inner join conditions
    pub separate_non_equi_conds: bool,

    /// Derive predicates across inner-join equalities
    pub predicate_deduction: bool,

    /// Extract single-side predicates from disjunctions spanning a join
    pub dnf_extraction: bool,

    /// Check plan invariants before rewriting
    pub validate_plan: bool,

    /// Extra functions to treat as null-propagating
    pub null_propagating_functions: Vec<String>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            remove_simple_projections: true,
            pushdown_filters: true,
            separate_non_equi_conds: false,
            predicate_deduction: true,
            dnf_extraction: true,
            validate_plan: true,
            null_propagating_functions: Vec::new(),
        }
    }
}

/// Null-handling rules used when folding predicates
#[derive(Debug, Clone, Default)]
pub struct NullRules {
    extra: HashSet<String>,
}

impl NullRules {
    pub fn new(extra: &[String]) -> Self {
        NullRules {
            extra: extra.iter().map(|name| name.to_lowercase()).collect(),
        }
    }

    /// Whether `name` yields NULL as soon as one argument is NULL
    pub fn is_null_propagating(&self, name: &str) -> bool {
        DEFAULT_NULL_PROPAGATING.contains(name) || self.extra.contains(name)
    }
}

/// State shared by every pass of one plan compilation
#[derive(Debug, Clone, Default)]
pub struct OptimizerContext {
    pub config: OptimizerConfig,
    pub null_rules: NullRules,
}

impl OptimizerContext {
    pub fn new(config: OptimizerConfig) -> Self {
        let null_rules = NullRules::new(&config.null_propagating_functions);
        OptimizerContext { config, null_rules }
    }
}
