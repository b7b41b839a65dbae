/// Binding tag type assigned by the query builder to column-producing nodes
pub type Tag = i32;

/// Plan node ID type (index into the plan arena)
pub type NodeId = usize;

/// Ordinal position of a column within its producer's output
pub type ColumnPosition = i32;
