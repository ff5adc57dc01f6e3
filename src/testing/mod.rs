//! Test support: chain builders, an in-memory node, table snapshots and
//! log capture

pub mod fixtures;
pub mod logs;
pub mod mock_node;
pub mod snapshot;

pub use mock_node::MockNode;
