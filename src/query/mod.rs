// BayunDB Query Processing Module
//
// This module contains the query planning components.

pub mod planner;

// Export key public interfaces
pub use planner::{OptimizeSummary, Optimizer, OptimizerConfig, Plan};
