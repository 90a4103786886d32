//! Meta crate that re-exports the sheetgraph building blocks. Depend on
//! this crate for the whole stack, or on the underlying crates when
//! deeper integration is required.

pub use sheetgraph_common as common;
pub use sheetgraph_eval as eval;
pub use sheetgraph_parse as parse;

pub use sheetgraph_common::{Addr, CellAddr, CellError, CellValue, ErrorKind, Notation, RangeAddr};
pub use sheetgraph_eval::{
    CompiledSheet, CompilerError, CycleMode, Mismatch, SheetCompiler, WorkbookAccessor,
};
