//! Dependency-graph engine: discovery, evaluation, invalidation,
//! trimming and snapshots.

pub mod compile;
pub mod eval;
pub mod graph;
pub mod snapshot;

pub use eval::{CycleMode, GraphContext, evaluate};
pub use graph::{CellNode, DependencyGraph, Node, NodeId, Plan, RangeNode};
pub use snapshot::{SNAPSHOT_VERSION, Snapshot};

use thiserror::Error;

/// Fatal engine-level failures. Spreadsheet-level errors (`#REF!`, …)
/// are values and never appear here.
#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("workbook accessor error: {0}")]
    Accessor(String),

    #[error("invalid address '{addr}': {message}")]
    Address { addr: String, message: String },

    #[error("unknown address '{0}'")]
    UnknownAddress(String),

    #[error("cycle detected involving {0}")]
    Cycle(String),

    #[error("poisoned cell {addr}: {message}")]
    Poisoned { addr: String, message: String },

    #[error("snapshot format error: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
