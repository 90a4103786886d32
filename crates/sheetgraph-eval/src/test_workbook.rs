//! Lightweight in-memory workbook for unit and property tests.
//!
//! It plays both roles: an [`EvalContext`] for evaluating formulas
//! directly against stored values, and a [`WorkbookAccessor`] feeding
//! the graph compiler.
//!
//! ```
//! use sheetgraph_eval::test_workbook::TestWorkbook;
//! use sheetgraph_common::CellValue as V;
//!
//! let wb = TestWorkbook::new().with_cell_a1("Sheet1", "A1", V::Number(41.0));
//! assert_eq!(wb.evaluate("=A1+1"), V::Number(42.0));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use sheetgraph_parse::parser::parse_formula;
use sheetgraph_common::{CellAddr, CellError, CellValue, Notation, RangeAddr, label_to_col};

use crate::function::Function;
use crate::interpreter::Interpreter;
use crate::traits::{EvalContext, FunctionProvider, Matrix, WorkbookAccessor};

type V = CellValue;
type CellKey = (u32, u32); // 1-based (row, col)

#[derive(Default, Clone)]
struct Sheet {
    cells: HashMap<CellKey, (Option<String>, V)>,
}

pub struct TestWorkbook {
    sheets: HashMap<String, Sheet>,
    named: Vec<(String, String)>,
    fns: HashMap<String, Arc<dyn Function>>,
    active: String,
    current: CellAddr,
    linest_run: Option<(usize, usize)>,
}

impl Default for TestWorkbook {
    fn default() -> Self {
        TestWorkbook {
            sheets: HashMap::new(),
            named: Vec::new(),
            fns: HashMap::new(),
            active: "Sheet1".to_string(),
            current: CellAddr::new("Sheet1", 1, 1),
            linest_run: None,
        }
    }
}

impl TestWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    /* ─────────────── cell helpers ─────────────── */

    pub fn with_cell<S: Into<String>>(mut self, sheet: S, row: u32, col: u32, v: V) -> Self {
        let sh = self.sheets.entry(sheet.into()).or_default();
        sh.cells.insert((row, col), (None, v));
        self
    }

    /// `"A1"` style convenience (case-insensitive, `$` ignored).
    pub fn with_cell_a1<S: Into<String>, A: AsRef<str>>(self, sheet: S, a1: A, v: V) -> Self {
        let (col, row) = parse_a1(a1.as_ref()).expect("bad A1 ref in with_cell_a1");
        self.with_cell(sheet, row, col, v)
    }

    /// A formula cell; its stored value is what the host workbook last
    /// calculated (used by `validate`).
    pub fn with_formula<S: Into<String>, A: AsRef<str>, F: Into<String>>(
        mut self,
        sheet: S,
        a1: A,
        formula: F,
        cached: V,
    ) -> Self {
        let (col, row) = parse_a1(a1.as_ref()).expect("bad A1 ref in with_formula");
        let sh = self.sheets.entry(sheet.into()).or_default();
        sh.cells.insert((row, col), (Some(formula.into()), cached));
        self
    }

    /// Bulk insert rectangular data starting at the top-left (row, col).
    pub fn with_range<S: Into<String>>(
        mut self,
        sheet: S,
        row: u32,
        col: u32,
        data: Vec<Vec<V>>,
    ) -> Self {
        let sh = self.sheets.entry(sheet.into()).or_default();
        for (r_off, r) in data.into_iter().enumerate() {
            for (c_off, v) in r.into_iter().enumerate() {
                sh.cells
                    .insert((row + r_off as u32, col + c_off as u32), (None, v));
            }
        }
        self
    }

    /* ─────────────── names / functions ─────────── */

    pub fn with_defined_name<N: Into<String>, F: Into<String>>(mut self, name: N, formula: F) -> Self {
        self.named.push((name.into(), formula.into()));
        self
    }

    pub fn with_fn<F: Function + 'static>(mut self, f: F) -> Self {
        self.fns.insert(f.name().to_uppercase(), Arc::new(f));
        self
    }

    /* ─────────────── evaluation shortcuts ───────── */

    pub fn with_current_cell(mut self, addr: CellAddr) -> Self {
        self.current = addr;
        self
    }

    pub fn with_linest_run(mut self, degree: usize, coef: usize) -> Self {
        self.linest_run = Some((degree, coef));
        self
    }

    pub fn interpreter(&self) -> Interpreter<'_> {
        Interpreter::new(self)
    }

    /// Parse and evaluate one formula against this workbook. Parse
    /// failures panic (this is a test fixture); evaluation errors come
    /// back as error values.
    pub fn evaluate(&self, formula: &str) -> V {
        let ast = parse_formula(formula, Notation::A1)
            .unwrap_or_else(|e| panic!("parse failure in '{formula}': {e}"));
        match self.interpreter().evaluate_ast(&ast) {
            Ok(v) => v,
            Err(e) => V::Error(e),
        }
    }

    fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.get(name)
    }
}

/* ─────────────────────── EvalContext impl ─────────────────────────── */

impl FunctionProvider for TestWorkbook {
    fn get_function(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.fns
            .get(&name.to_uppercase())
            .cloned()
            .or_else(|| crate::registry::get(name))
    }
}

impl EvalContext for TestWorkbook {
    fn resolve_cell(&self, addr: &CellAddr) -> V {
        self.sheet(&addr.sheet)
            .and_then(|sh| sh.cells.get(&(addr.row, addr.col)))
            .map(|(_, v)| v.clone())
            .unwrap_or(V::Empty)
    }

    fn resolve_range(&self, addr: &RangeAddr) -> Result<Matrix, CellError> {
        let mut data = Vec::with_capacity(addr.rows() as usize);
        for r in addr.start_row..=addr.end_row {
            let mut row = Vec::with_capacity(addr.cols() as usize);
            for c in addr.start_col..=addr.end_col {
                row.push(self.resolve_cell(&CellAddr::new(addr.sheet.clone(), c, r)));
            }
            data.push(row);
        }
        Ok(data)
    }

    fn current_cell(&self) -> &CellAddr {
        &self.current
    }

    fn sheet_bounds(&self, sheet: &str) -> (u32, u32) {
        let Some(sh) = self.sheet(sheet) else {
            return (1, 1);
        };
        let max_row = sh.cells.keys().map(|(r, _)| *r).max().unwrap_or(1);
        let max_col = sh.cells.keys().map(|(_, c)| *c).max().unwrap_or(1);
        (max_row, max_col)
    }

    fn linest_run(&self) -> Option<(usize, usize)> {
        self.linest_run
    }
}

/* ───────────────────── WorkbookAccessor impl ──────────────────────── */

impl WorkbookAccessor for TestWorkbook {
    fn set_sheet(&mut self, name: &str) {
        self.active = name.to_string();
    }

    fn active_sheet(&self) -> String {
        self.active.clone()
    }

    fn get_formula(&self, addr: &CellAddr) -> Option<String> {
        self.sheet(&addr.sheet)
            .and_then(|sh| sh.cells.get(&(addr.row, addr.col)))
            .and_then(|(f, _)| f.clone())
    }

    fn get_value(&self, addr: &CellAddr) -> V {
        self.resolve_cell(addr)
    }

    fn get_range(&self, addr: &RangeAddr) -> Vec<Vec<(Option<String>, V)>> {
        let mut data = Vec::with_capacity(addr.rows() as usize);
        for r in addr.start_row..=addr.end_row {
            let mut row = Vec::with_capacity(addr.cols() as usize);
            for c in addr.start_col..=addr.end_col {
                let cell = self
                    .sheet(&addr.sheet)
                    .and_then(|sh| sh.cells.get(&(r, c)))
                    .cloned()
                    .unwrap_or((None, V::Empty));
                row.push(cell);
            }
            data.push(row);
        }
        data
    }

    fn defined_names(&self) -> Vec<(String, String)> {
        self.named.clone()
    }

    fn max_row(&self) -> u32 {
        self.sheet_bounds(&self.active).0
    }

    fn max_column(&self) -> u32 {
        self.sheet_bounds(&self.active).1
    }
}

/* ─────────────────────── A1 parser ───────────────────────── */

fn parse_a1(a1: &str) -> Option<(u32, u32)> {
    let s = a1.replace('$', "").to_uppercase();
    let split = s.find(|c: char| c.is_ascii_digit())?;
    let col = label_to_col(&s[..split]).ok()?;
    let row = s[split..].parse::<u32>().ok()?;
    Some((col, row))
}
