//! Core traits: the workbook accessor the compiler consumes, the
//! evaluation context functions run against, and the lazy argument
//! handles that make short-circuit evaluation possible.

use std::sync::Arc;

use sheetgraph_parse::parser::{ASTNode, ASTNodeType};
use sheetgraph_common::{Addr, CellAddr, CellError, CellValue, ParsedRef, RangeAddr};

use crate::function::Function;
use crate::interpreter::Interpreter;

/// A materialised rectangular block of values, row-major.
pub type Matrix = Vec<Vec<CellValue>>;

/* ───────────────────────── WorkbookAccessor ───────────────────────── */

/// The interface a workbook host must provide. The compiler pulls
/// formulas and values through this during graph construction and never
/// touches it again afterwards.
///
/// The accessor resolves defined names down to range formulas before the
/// graph engine sees them (`defined_names` returns `(name, formula)`).
pub trait WorkbookAccessor {
    fn open(&mut self) -> Result<(), CellError> {
        Ok(())
    }
    fn set_sheet(&mut self, name: &str);
    fn active_sheet(&self) -> String;
    /// The formula text of a cell (with leading `=`), or `None` for a
    /// plain value cell.
    fn get_formula(&self, addr: &CellAddr) -> Option<String>;
    fn get_value(&self, addr: &CellAddr) -> CellValue;
    /// Formula/value pairs for every member of a range, row-major.
    fn get_range(&self, addr: &RangeAddr) -> Vec<Vec<(Option<String>, CellValue)>>;
    fn defined_names(&self) -> Vec<(String, String)> {
        Vec::new()
    }
    /// Used bounds of the active sheet; whole-row and whole-column
    /// references clamp to these.
    fn max_row(&self) -> u32;
    fn max_column(&self) -> u32;
}

/* ─────────────────────────── EvalContext ──────────────────────────── */

pub trait FunctionProvider {
    fn get_function(&self, name: &str) -> Option<Arc<dyn Function>>;
}

/// What a running plan can see: cell and range values, the identity of
/// the cell being evaluated, and the sheet bounds for open-ended ranges.
pub trait EvalContext: FunctionProvider {
    fn resolve_cell(&self, addr: &CellAddr) -> CellValue;
    fn resolve_range(&self, addr: &RangeAddr) -> Result<Matrix, CellError>;
    /// The cell whose plan is being executed; relative references and
    /// argument-less `ROW()`/`COLUMN()` resolve against it.
    fn current_cell(&self) -> &CellAddr;
    /// Used (max_row, max_col) of a sheet, for `A:A` / `1:1` clamping.
    fn sheet_bounds(&self, sheet: &str) -> (u32, u32);
    /// Compile-time (degree, coefficient index) annotation for a LINEST
    /// cell inside a multi-cell array formula.
    fn linest_run(&self) -> Option<(usize, usize)> {
        None
    }

    /// Resolve any parsed reference against the current cell.
    fn resolve_ref(&self, reference: &ParsedRef) -> Result<Addr, CellError> {
        let current = self.current_cell();
        let (max_row, max_col) = match reference {
            ParsedRef::Cell(c) => {
                let sheet = c.sheet.as_deref().unwrap_or(&current.sheet);
                self.sheet_bounds(sheet)
            }
            ParsedRef::Range(r) => {
                let sheet = r.sheet.as_deref().unwrap_or(&current.sheet);
                self.sheet_bounds(sheet)
            }
            ParsedRef::Name(_) => (0, 0),
        };
        reference.resolve(current, max_row, max_col)
    }

    /// Resolve and materialise: a cell gives its value, a range gives a
    /// row-major matrix wrapped as an array value.
    fn resolve_addr(&self, addr: &Addr) -> CellValue {
        match addr {
            Addr::Cell(c) => self.resolve_cell(c),
            Addr::Range(r) => match self.resolve_range(r) {
                Ok(matrix) => CellValue::Array(matrix),
                Err(e) => CellValue::Error(e),
            },
        }
    }
}

/* ─────────────────────────── ArgumentHandle ───────────────────────── */

/// A lazy view of one function argument. Functions decide whether an
/// argument is evaluated at all (`IF` never touches the untaken branch)
/// and in which shape (scalar, matrix, or raw reference).
pub struct ArgumentHandle<'a, 'c> {
    node: &'a ASTNode,
    interp: &'a Interpreter<'c>,
}

impl<'a, 'c> ArgumentHandle<'a, 'c> {
    pub(crate) fn new(node: &'a ASTNode, interp: &'a Interpreter<'c>) -> Self {
        Self { node, interp }
    }

    /// Evaluate the argument. References to ranges come back as arrays.
    pub fn value(&self) -> Result<CellValue, CellError> {
        self.interp.evaluate_ast(self.node)
    }

    /// Evaluate and collapse a 1x1 array to its single member.
    pub fn scalar(&self) -> Result<CellValue, CellError> {
        Ok(self.value()?.into_single())
    }

    /// Materialise the argument as a matrix; scalars become 1x1.
    pub fn matrix(&self) -> Result<Matrix, CellError> {
        match self.value()? {
            CellValue::Array(rows) => Ok(rows),
            other => Ok(vec![vec![other]]),
        }
    }

    /// The argument as an unevaluated reference, for by-ref functions
    /// such as `ROW`, `COLUMN` and `OFFSET`.
    pub fn reference(&self) -> Option<&'a ParsedRef> {
        match &self.node.node_type {
            ASTNodeType::Reference { reference, .. } => Some(reference),
            _ => None,
        }
    }

    pub fn ast(&self) -> &'a ASTNode {
        self.node
    }

    pub fn context(&self) -> &'a dyn EvalContext {
        self.interp.context
    }
}
