// Common types shared across the optimizer

pub mod types;

pub use types::{ColumnPosition, NodeId, Tag};
