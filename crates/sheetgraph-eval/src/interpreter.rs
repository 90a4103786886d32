//! Plan execution: walk a compiled AST and produce a value.
//!
//! Errors are values here; evaluation only fails outright on internal
//! invariant violations, never on spreadsheet-level errors.

use std::cmp::Ordering;

use sheetgraph_parse::parser::{ASTNode, ASTNodeType};
use sheetgraph_common::{Addr, CellError, CellValue, ParsedRef, RangeAddr};
use tracing::debug;

use crate::coercion::{to_number, to_text};
use crate::traits::{ArgumentHandle, EvalContext};

pub struct Interpreter<'c> {
    pub context: &'c dyn EvalContext,
}

impl<'c> Interpreter<'c> {
    pub fn new(context: &'c dyn EvalContext) -> Self {
        Self { context }
    }

    /* ===================  public  =================== */

    pub fn evaluate_ast(&self, node: &ASTNode) -> Result<CellValue, CellError> {
        match &node.node_type {
            ASTNodeType::Literal(v) => Ok(v.clone()),
            ASTNodeType::Reference { reference, .. } => Ok(self.eval_reference(reference)),
            ASTNodeType::UnaryOp { op, expr } => self.eval_unary(op, expr),
            ASTNodeType::BinaryOp { op, left, right } => self.eval_binary(op, left, right),
            ASTNodeType::Function { name, args } => self.eval_function(name, args),
            ASTNodeType::Array(rows) => self.eval_array_literal(rows),
        }
    }

    /* ===================  references  =================== */

    fn eval_reference(&self, reference: &ParsedRef) -> CellValue {
        match self.context.resolve_ref(reference) {
            Ok(addr) => self.context.resolve_addr(&addr),
            Err(e) => CellValue::Error(e),
        }
    }

    /// The address an AST operand denotes, for the reference operators.
    fn addr_of(&self, node: &ASTNode) -> Result<Addr, CellError> {
        match &node.node_type {
            ASTNodeType::Reference { reference, .. } => self.context.resolve_ref(reference),
            ASTNodeType::BinaryOp { op, left, right } if op == ":" || op == " " => {
                self.addr_of_binary(op, left, right)
            }
            _ => Err(CellError::value().with_message("expected a reference operand")),
        }
    }

    /* ===================  unary ops  =================== */

    fn eval_unary(&self, op: &str, expr: &ASTNode) -> Result<CellValue, CellError> {
        let v = self.evaluate_ast(expr)?;
        match v {
            CellValue::Array(arr) => self.map_array(arr, |cell| self.eval_unary_scalar(op, cell)),
            other => self.eval_unary_scalar(op, other),
        }
    }

    fn eval_unary_scalar(&self, op: &str, v: CellValue) -> Result<CellValue, CellError> {
        if let CellValue::Error(e) = v {
            return Ok(CellValue::Error(e));
        }
        let f: fn(f64) -> f64 = match op {
            "+" => |n| n,
            "-" => |n| -n,
            "%" => |n| n / 100.0,
            _ => {
                return Ok(CellValue::Error(
                    CellError::name().with_message(format!("unary operator '{op}'")),
                ));
            }
        };
        match to_number(&v) {
            Ok(n) => Ok(CellValue::Number(f(n))),
            Err(e) => Ok(CellValue::Error(e)),
        }
    }

    /* ===================  binary ops  =================== */

    fn eval_binary(
        &self,
        op: &str,
        left: &ASTNode,
        right: &ASTNode,
    ) -> Result<CellValue, CellError> {
        // Reference operators act on addresses, not values.
        match op {
            ":" | " " => {
                return Ok(match self.addr_of_binary(op, left, right) {
                    Ok(addr) => self.context.resolve_addr(&addr),
                    Err(e) => CellValue::Error(e),
                });
            }
            "," => return self.eval_union(left, right),
            _ => {}
        }

        let l = self.evaluate_ast(left)?;
        let r = self.evaluate_ast(right)?;

        if matches!(op, "=" | "<>" | ">" | "<" | ">=" | "<=") {
            return Ok(self.compare(op, l, r));
        }

        match op {
            "+" => self.numeric_binary(l, r, |a, b| a + b),
            "-" => self.numeric_binary(l, r, |a, b| a - b),
            "*" => self.numeric_binary(l, r, |a, b| a * b),
            "/" => self.divide(l, r),
            "^" => self.power(l, r),
            "&" => Ok(match (first_error(&l), first_error(&r)) {
                (Some(e), _) | (None, Some(e)) => CellValue::Error(e),
                _ => CellValue::Text(format!("{}{}", to_text(&l), to_text(&r))),
            }),
            _ => Ok(CellValue::Error(
                CellError::name().with_message(format!("binary operator '{op}'")),
            )),
        }
    }

    fn addr_of_binary(&self, op: &str, left: &ASTNode, right: &ASTNode) -> Result<Addr, CellError> {
        match op {
            ":" => {
                let l = self.addr_of(left)?;
                let r = self.addr_of(right)?;
                Ok(Addr::Range(join_addrs(&l, &r)?))
            }
            " " => {
                let l = as_range(self.addr_of(left)?);
                let r = as_range(self.addr_of(right)?);
                match l.intersect(&r) {
                    Some(joined) => Ok(collapse(joined)),
                    None => Err(CellError::null().with_message("ranges do not intersect")),
                }
            }
            _ => unreachable!(),
        }
    }

    /// The union operator concatenates, preserving duplicates.
    fn eval_union(&self, left: &ASTNode, right: &ASTNode) -> Result<CellValue, CellError> {
        let mut flat = Vec::new();
        for side in [left, right] {
            match self.evaluate_ast(side)? {
                CellValue::Array(rows) => flat.extend(rows.into_iter().flatten()),
                other => flat.push(other),
            }
        }
        Ok(CellValue::Array(vec![flat]))
    }

    /* ===================  function calls  =================== */

    fn eval_function(&self, name: &str, args: &[ASTNode]) -> Result<CellValue, CellError> {
        let Some(fun) = self.context.get_function(name) else {
            debug!(function = name, "unknown function");
            return Ok(CellValue::Error(
                CellError::name().with_message(format!("unknown function '{name}'")),
            ));
        };

        if args.len() < fun.min_args() || (!fun.variadic() && args.len() > fun.max_args()) {
            return Ok(CellValue::Error(CellError::value().with_message(format!(
                "{} called with {} argument(s)",
                fun.name(),
                args.len()
            ))));
        }

        let handles: Vec<ArgumentHandle> =
            args.iter().map(|n| ArgumentHandle::new(n, self)).collect();
        fun.eval(&handles, self.context)
    }

    /* ===================  array literal  =================== */

    fn eval_array_literal(&self, rows: &[Vec<ASTNode>]) -> Result<CellValue, CellError> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut r = Vec::with_capacity(row.len());
            for cell in row {
                r.push(self.evaluate_ast(cell)?);
            }
            out.push(r);
        }
        Ok(CellValue::Array(out))
    }

    /* ===================  helpers  =================== */

    fn numeric_binary<F>(
        &self,
        left: CellValue,
        right: CellValue,
        f: F,
    ) -> Result<CellValue, CellError>
    where
        F: Fn(f64, f64) -> f64 + Copy,
    {
        use CellValue::*;
        match (left, right) {
            (Array(l), Array(r)) => self.combine_arrays(l, r, |a, b| self.numeric_binary(a, b, f)),
            (Array(arr), v) => self.map_array(arr, |x| self.numeric_binary(x, v.clone(), f)),
            (v, Array(arr)) => self.map_array(arr, |x| self.numeric_binary(v.clone(), x, f)),
            (l, r) => match (to_number(&l), to_number(&r)) {
                (Ok(a), Ok(b)) => Ok(Number(f(a, b))),
                (Err(e), _) | (_, Err(e)) => Ok(CellValue::Error(e)),
            },
        }
    }

    fn divide(&self, left: CellValue, right: CellValue) -> Result<CellValue, CellError> {
        use CellValue::*;
        match (left, right) {
            (Array(l), Array(r)) => self.combine_arrays(l, r, |a, b| self.divide(a, b)),
            (Array(arr), v) => self.map_array(arr, |x| self.divide(x, v.clone())),
            (v, Array(arr)) => self.map_array(arr, |x| self.divide(v.clone(), x)),
            (l, r) => {
                let (a, b) = match (to_number(&l), to_number(&r)) {
                    (Ok(a), Ok(b)) => (a, b),
                    (Err(e), _) | (_, Err(e)) => return Ok(CellValue::Error(e)),
                };
                if b == 0.0 {
                    return Ok(CellValue::Error(CellError::div()));
                }
                Ok(Number(a / b))
            }
        }
    }

    fn power(&self, left: CellValue, right: CellValue) -> Result<CellValue, CellError> {
        self.numeric_binary(left, right, |a, b| {
            if a < 0.0 && b.fract() != 0.0 {
                f64::NAN
            } else {
                a.powf(b)
            }
        })
        .map(|v| {
            if let CellValue::Number(n) = &v {
                if n.is_nan() || n.is_infinite() {
                    return CellValue::Error(CellError::num());
                }
            }
            v
        })
    }

    fn map_array<F>(&self, arr: Vec<Vec<CellValue>>, f: F) -> Result<CellValue, CellError>
    where
        F: Fn(CellValue) -> Result<CellValue, CellError> + Copy,
    {
        let mut out = Vec::with_capacity(arr.len());
        for row in arr {
            let mut new_row = Vec::with_capacity(row.len());
            for cell in row {
                new_row.push(match f(cell) {
                    Ok(v) => v,
                    Err(e) => CellValue::Error(e),
                });
            }
            out.push(new_row);
        }
        Ok(CellValue::Array(out))
    }

    fn combine_arrays<F>(
        &self,
        l: Vec<Vec<CellValue>>,
        r: Vec<Vec<CellValue>>,
        f: F,
    ) -> Result<CellValue, CellError>
    where
        F: Fn(CellValue, CellValue) -> Result<CellValue, CellError> + Copy,
    {
        let rows = l.len().max(r.len());
        let cols = l
            .iter()
            .chain(r.iter())
            .map(|row| row.len())
            .max()
            .unwrap_or(0);
        let mut out = Vec::with_capacity(rows);
        for i in 0..rows {
            let mut row = Vec::with_capacity(cols);
            for j in 0..cols {
                let lv = l.get(i).and_then(|r| r.get(j)).cloned().unwrap_or(CellValue::Empty);
                let rv = r.get(i).and_then(|r| r.get(j)).cloned().unwrap_or(CellValue::Empty);
                row.push(match f(lv, rv) {
                    Ok(v) => v,
                    Err(e) => CellValue::Error(e),
                });
            }
            out.push(row);
        }
        Ok(CellValue::Array(out))
    }

    /* ---------- comparison ---------- */

    /// Scalar comparison with the blank rule: a blank operand counts as 0
    /// against numbers, "" against text, FALSE against logicals.
    ///
    /// A scalar never equals a matrix; ordered comparison against a
    /// matrix is a `#VALUE!` error.
    fn compare(&self, op: &str, left: CellValue, right: CellValue) -> CellValue {
        use CellValue::*;
        if let Error(e) = left {
            return Error(e);
        }
        if let Error(e) = right {
            return Error(e);
        }

        let left = left.into_single();
        let right = right.into_single();

        match (&left, &right) {
            (Array(l), Array(r)) => {
                let equal = l == r;
                match op {
                    "=" => Boolean(equal),
                    "<>" => Boolean(!equal),
                    _ => Error(CellError::value().with_message("cannot order arrays")),
                }
            }
            (Array(_), _) | (_, Array(_)) => match op {
                "=" => Boolean(false),
                "<>" => Boolean(true),
                _ => Error(CellError::value().with_message("cannot order arrays")),
            },
            _ => {
                let ord = compare_scalars(&left, &right);
                let res = match op {
                    "=" => ord == Ordering::Equal,
                    "<>" => ord != Ordering::Equal,
                    ">" => ord == Ordering::Greater,
                    "<" => ord == Ordering::Less,
                    ">=" => ord != Ordering::Less,
                    "<=" => ord != Ordering::Greater,
                    _ => unreachable!(),
                };
                Boolean(res)
            }
        }
    }
}

/* ─────────────────────── free helpers ─────────────────────────────── */

fn first_error(v: &CellValue) -> Option<CellError> {
    match v {
        CellValue::Error(e) => Some(e.clone()),
        CellValue::Array(rows) => rows.iter().flatten().find_map(|c| match c {
            CellValue::Error(e) => Some(e.clone()),
            _ => None,
        }),
        _ => None,
    }
}

fn as_range(addr: Addr) -> RangeAddr {
    match addr {
        Addr::Range(r) => r,
        Addr::Cell(c) => RangeAddr::new(c.sheet, c.col, c.row, c.col, c.row)
            .expect("1x1 range is always ordered"),
    }
}

fn collapse(range: RangeAddr) -> Addr {
    if range.rows() == 1 && range.cols() == 1 {
        Addr::Cell(sheetgraph_common::CellAddr::new(
            range.sheet,
            range.start_col,
            range.start_row,
        ))
    } else {
        Addr::Range(range)
    }
}

/// The `:` operator: the bounding rectangle of two references.
fn join_addrs(l: &Addr, r: &Addr) -> Result<RangeAddr, CellError> {
    let l = as_range(l.clone());
    let r = as_range(r.clone());
    if l.sheet != r.sheet {
        return Err(CellError::value().with_message("range operator across sheets"));
    }
    RangeAddr::new(
        l.sheet.clone(),
        l.start_col.min(r.start_col),
        l.start_row.min(r.start_row),
        l.end_col.max(r.end_col),
        l.end_row.max(r.end_row),
    )
}

/// Cross-type scalar ordering: numbers < text < logicals, text
/// case-insensitive, blanks standing in for the zero of the other side.
pub fn compare_scalars(left: &CellValue, right: &CellValue) -> Ordering {
    use CellValue::*;

    #[derive(PartialEq, PartialOrd)]
    enum Key {
        Num(f64),
        Text(String),
        Bool(bool),
    }

    let key = |v: &CellValue, other: &CellValue| -> Key {
        match v {
            Number(n) => Key::Num(*n),
            Int(i) => Key::Num(*i as f64),
            Text(s) => Key::Text(s.to_lowercase()),
            Boolean(b) => Key::Bool(*b),
            Empty => match other {
                Text(_) => Key::Text(String::new()),
                Boolean(_) => Key::Bool(false),
                _ => Key::Num(0.0),
            },
            Array(_) | Error(_) => Key::Num(f64::NAN),
        }
    };

    let (a, b) = (key(left, right), key(right, left));
    let rank = |k: &Key| match k {
        Key::Num(_) => 0u8,
        Key::Text(_) => 1,
        Key::Bool(_) => 2,
    };
    match rank(&a).cmp(&rank(&b)) {
        Ordering::Equal => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_workbook::TestWorkbook;
    use sheetgraph_common::CellValue as V;

    fn eval(formula: &str) -> V {
        TestWorkbook::new().evaluate(formula)
    }

    fn eval_with(wb: &TestWorkbook, formula: &str) -> V {
        wb.evaluate(formula)
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval("=1+2*3"), V::Number(7.0));
        assert_eq!(eval("=(1+2)*3"), V::Number(9.0));
        assert_eq!(eval("=2^3^2"), V::Number(64.0));
        assert_eq!(eval("=7/2"), V::Number(3.5));
        assert_eq!(eval("=50%+0.5"), V::Number(1.0));
        assert_eq!(eval("=-3+1"), V::Number(-2.0));
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(eval("=1/0"), V::Error(sheetgraph_common::CellError::div()));
    }

    #[test]
    fn negative_fractional_power_is_num_error() {
        assert!(matches!(eval("=(-8)^0.5"), V::Error(e) if e == "#NUM!"));
        assert_eq!(eval("=(-8)^2"), V::Number(64.0));
    }

    #[test]
    fn concat_coerces_display() {
        assert_eq!(eval("=2&\" x\""), V::Text("2 x".into()));
        assert_eq!(eval("=TRUE&1.5"), V::Text("TRUE1.5".into()));
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval("=1<2"), V::Boolean(true));
        assert_eq!(eval("=\"A\"=\"a\""), V::Boolean(true));
        assert_eq!(eval("=\"b\">\"a\""), V::Boolean(true));
        // numbers order below text, text below logicals
        assert_eq!(eval("=99<\"a\""), V::Boolean(true));
        assert_eq!(eval("=\"z\"<TRUE"), V::Boolean(true));
    }

    #[test]
    fn blank_compares_as_zero() {
        let wb = TestWorkbook::new().with_cell_a1("Sheet1", "A1", V::Empty);
        assert_eq!(eval_with(&wb, "=A1<1"), V::Boolean(true));
        assert_eq!(eval_with(&wb, "=A1=0"), V::Boolean(true));
        assert_eq!(eval_with(&wb, "=A1=\"\""), V::Boolean(true));
    }

    #[test]
    fn scalar_never_equals_matrix() {
        assert_eq!(eval("=\"a\"={\"a\",\"b\";\"c\",#N/A;-1,TRUE}"), V::Boolean(false));
        assert_eq!(eval("={1,2}={1,2}"), V::Boolean(true));
        assert!(matches!(eval("=1<{1,2}"), V::Error(_)));
    }

    #[test]
    fn errors_propagate_through_operators() {
        assert!(matches!(eval("=#REF!+1"), V::Error(e) if e == "#REF!"));
        assert!(matches!(eval("=1&#N/A"), V::Error(e) if e == "#N/A"));
        assert!(matches!(eval("=-#VALUE!"), V::Error(e) if e == "#VALUE!"));
    }

    #[test]
    fn array_broadcast_arithmetic() {
        match eval("={1,2;3,4}*2") {
            V::Array(rows) => {
                assert_eq!(rows[0][0], V::Number(2.0));
                assert_eq!(rows[1][1], V::Number(8.0));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_function_is_name_error() {
        assert!(matches!(eval("=NOSUCHFN(1)"), V::Error(e) if e == "#NAME?"));
    }

    #[test]
    fn intersect_operator_resolves() {
        let wb = TestWorkbook::new()
            .with_range("Sheet1", 1, 1, vec![
                vec![V::Number(1.0), V::Number(2.0), V::Number(3.0)],
                vec![V::Number(4.0), V::Number(5.0), V::Number(6.0)],
                vec![V::Number(7.0), V::Number(8.0), V::Number(9.0)],
            ]);
        // row 2 ∩ column B = B2
        assert_eq!(eval_with(&wb, "=A2:C2 B1:B3"), V::Number(5.0));
        assert!(matches!(eval_with(&wb, "=A1:B1 A3:B3"), V::Error(e) if e == "#NULL!"));
    }

    #[test]
    fn union_concatenates_preserving_duplicates() {
        let wb = TestWorkbook::new().with_range(
            "Sheet1",
            1,
            1,
            vec![vec![V::Number(1.0)], vec![V::Number(2.0)]],
        );
        match eval_with(&wb, "=(A1:A2,A1:A2)") {
            V::Array(rows) => {
                let flat: Vec<_> = rows.into_iter().flatten().collect();
                assert_eq!(flat.len(), 4);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
