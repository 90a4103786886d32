//! sheetgraph-eval: the spreadsheet function library and the
//! incremental dependency-graph engine.
//!
//! The compiler consumes a [`traits::WorkbookAccessor`], discovers every
//! cell and range reachable from a set of seed addresses, and produces a
//! [`compiled::CompiledSheet`] that evaluates lazily with memoization,
//! invalidates on input mutation, trims to a minimal artifact, and
//! round-trips through a JSON snapshot.

pub mod builtins;
pub mod coercion;
pub mod compiled;
pub mod engine;
pub mod function;
pub mod interpreter;
pub mod registry;
pub mod test_workbook;
pub mod traits;

pub use compiled::{CompiledSheet, Mismatch, SheetCompiler};
pub use engine::{CompilerError, CycleMode, DependencyGraph};
pub use function::{BuiltinFn, Function};
pub use interpreter::Interpreter;
pub use traits::{ArgumentHandle, EvalContext, FunctionProvider, Matrix, WorkbookAccessor};

pub use sheetgraph_common::{
    Addr, CellAddr, CellError, CellValue, ErrorKind, Notation, RangeAddr,
};
