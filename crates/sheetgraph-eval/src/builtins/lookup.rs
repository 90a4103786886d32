//! Lookup and reference functions.

use std::cmp::Ordering;
use std::sync::Arc;

use sheetgraph_common::{Addr, CellError, CellValue, Notation, ParsedRef, RangeAddr};

use super::utils::wildcard_regex;
use crate::coercion::to_number;
use crate::function::BuiltinFn;
use crate::registry::register_function;
use crate::traits::{ArgumentHandle, EvalContext, Matrix};

/* ───────────────────────── ordering keys ──────────────────────────── */

/// Comparable view of a value: numbers < text < logicals; errors,
/// blanks and arrays have no key and never participate in a match.
#[derive(Debug, Clone, PartialEq)]
enum CmpKey {
    Num(f64),
    Text(String),
    Bool(bool),
}

fn cmp_key(v: &CellValue) -> Option<CmpKey> {
    match v {
        CellValue::Number(n) => Some(CmpKey::Num(*n)),
        CellValue::Int(i) => Some(CmpKey::Num(*i as f64)),
        CellValue::Text(s) => Some(CmpKey::Text(s.to_lowercase())),
        CellValue::Boolean(b) => Some(CmpKey::Bool(*b)),
        _ => None,
    }
}

fn key_rank(k: &CmpKey) -> u8 {
    match k {
        CmpKey::Num(_) => 0,
        CmpKey::Text(_) => 1,
        CmpKey::Bool(_) => 2,
    }
}

fn key_cmp(a: &CmpKey, b: &CmpKey) -> Ordering {
    match key_rank(a).cmp(&key_rank(b)) {
        Ordering::Equal => match (a, b) {
            (CmpKey::Num(x), CmpKey::Num(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
            (CmpKey::Text(x), CmpKey::Text(y)) => x.cmp(y),
            (CmpKey::Bool(x), CmpKey::Bool(y)) => x.cmp(y),
            _ => unreachable!(),
        },
        other => other,
    }
}

fn same_type(a: &CmpKey, b: &Option<CmpKey>) -> bool {
    b.as_ref().is_some_and(|b| key_rank(a) == key_rank(b))
}

/* ─────────────────────────── MATCH core ───────────────────────────── */

/// The three match modes: 1 sorted-ascending (largest ≤ target via a
/// binary probe, ties to the leftmost of the equal run), 0 exact with
/// wildcards for text, -1 sorted-descending (smallest ≥ target).
fn match_position(
    target: &CellValue,
    array: &[CellValue],
    mode: i32,
) -> Result<usize, CellError> {
    let Some(target_key) = cmp_key(target) else {
        return Err(CellError::na());
    };
    let keys: Vec<Option<CmpKey>> = array.iter().map(cmp_key).collect();

    match mode.signum() {
        1 => {
            // binary probe after the last element ≤ target
            let mut lo = 0usize;
            let mut hi = array.len();
            while lo < hi {
                let mid = (lo + hi) / 2;
                let le = match &keys[mid] {
                    Some(k) => key_cmp(k, &target_key) != Ordering::Greater,
                    None => true,
                };
                if le {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            }
            let mut result = lo;
            while result > 0 && !same_type(&target_key, &keys[result - 1]) {
                result -= 1;
            }
            if result == 0 {
                return Err(CellError::na());
            }
            // ties break to the leftmost of the equal run
            while result > 1 {
                let here_eq = keys[result - 1]
                    .as_ref()
                    .is_some_and(|k| key_cmp(k, &target_key) == Ordering::Equal);
                let prev_eq = keys[result - 2]
                    .as_ref()
                    .is_some_and(|k| key_cmp(k, &target_key) == Ordering::Equal);
                if here_eq && prev_eq {
                    result -= 1;
                } else {
                    break;
                }
            }
            Ok(result)
        }
        0 => {
            let wildcard = match target {
                CellValue::Text(s) => wildcard_regex(s),
                _ => None,
            };
            for (i, key) in keys.iter().enumerate() {
                let Some(key) = key else { continue };
                if key_rank(key) != key_rank(&target_key) {
                    continue;
                }
                let hit = match (&wildcard, &array[i]) {
                    (Some(re), CellValue::Text(s)) => re.is_match(s),
                    _ => key_cmp(key, &target_key) == Ordering::Equal,
                };
                if hit {
                    return Ok(i + 1);
                }
            }
            Err(CellError::na())
        }
        _ => {
            let mut result = None;
            for (i, key) in keys.iter().enumerate() {
                let Some(key) = key else { continue };
                if key_rank(key) != key_rank(&target_key) {
                    continue;
                }
                match key_cmp(key, &target_key) {
                    Ordering::Less => break,
                    Ordering::Equal => {
                        result = Some(i + 1);
                        break;
                    }
                    Ordering::Greater => result = Some(i + 1),
                }
            }
            result.ok_or_else(CellError::na)
        }
    }
}

/// A matrix viewed as a vector: a single row stays a row, anything else
/// is its first column.
fn vector_of(matrix: &Matrix) -> Vec<CellValue> {
    if matrix.len() == 1 {
        matrix[0].clone()
    } else {
        matrix.iter().map(|row| row[0].clone()).collect()
    }
}

/* ─────────────────────────── functions ────────────────────────────── */

pub fn match_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let target = args[0].scalar()?;
    if let CellValue::Error(e) = target {
        return Err(e);
    }
    let array = args[1].matrix()?;
    let mode = match args.get(2) {
        None => 1,
        Some(h) => to_number(&h.scalar()?)? as i32,
    };
    let pos = match_position(&target, &vector_of(&array), mode)?;
    Ok(CellValue::Number(pos as f64))
}

fn table_lookup(args: &[ArgumentHandle], vertical: bool) -> Result<CellValue, CellError> {
    let target = args[0].scalar()?;
    if let CellValue::Error(e) = target {
        return Err(e);
    }
    let table = args[1].matrix()?;
    let index = to_number(&args[2].scalar()?)? as i64;
    let range_lookup = match args.get(3) {
        None => true,
        Some(h) => crate::coercion::to_logical(&h.scalar()?)?,
    };

    if index <= 0 {
        return Err(CellError::value());
    }
    let limit = if vertical {
        table.first().map_or(0, |r| r.len())
    } else {
        table.len()
    };
    if index as usize > limit {
        return Err(CellError::reference());
    }

    let search: Vec<CellValue> = if vertical {
        table.iter().map(|row| row[0].clone()).collect()
    } else {
        table[0].clone()
    };
    let mode = if range_lookup { 1 } else { 0 };
    let pos = match_position(&target, &search, mode)?;

    let value = if vertical {
        table[pos - 1][index as usize - 1].clone()
    } else {
        table[index as usize - 1][pos - 1].clone()
    };
    Ok(value)
}

pub fn vlookup_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    table_lookup(args, true)
}

pub fn hlookup_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    table_lookup(args, false)
}

/// LOOKUP: vector form `(value, lookup_vector, [result_vector])` and
/// array form, which searches along the longer dimension and returns
/// from the last row/column.
pub fn lookup_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let target = args[0].scalar()?;
    if let CellValue::Error(e) = target {
        return Err(e);
    }
    let array = args[1].matrix()?;
    let height = array.len();
    let width = array.first().map_or(0, |r| r.len());
    if height == 0 || width == 0 {
        return Err(CellError::na());
    }

    let (search, mut result): (Vec<CellValue>, Vec<CellValue>) = if width <= height {
        (
            array.iter().map(|r| r[0].clone()).collect(),
            array.iter().map(|r| r[width - 1].clone()).collect(),
        )
    } else {
        (array[0].clone(), array[height - 1].clone())
    };

    if height > 1 && width > 1 {
        if args.len() > 2 {
            return Err(CellError::value());
        }
    } else if let Some(h) = args.get(2) {
        let result_range = h.matrix()?;
        result = vector_of(&result_range);
    }

    let pos = match_position(&target, &search, 1)?;
    result
        .get(pos - 1)
        .cloned()
        .ok_or_else(CellError::na)
}

pub fn index_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let array = args[0].matrix()?;
    let row_num = to_number(&args[1].scalar()?)? as i64;
    let col_num = match args.get(2) {
        None => 0,
        Some(h) => to_number(&h.scalar()?)? as i64,
    };
    if row_num < 0 || col_num < 0 {
        return Err(CellError::value());
    }

    let rows = array.len();
    let cols = array.first().map_or(0, |r| r.len());
    let fetch = |r: usize, c: usize| -> Result<CellValue, CellError> {
        array
            .get(r)
            .and_then(|row| row.get(c))
            .cloned()
            .ok_or_else(CellError::na)
    };

    match (row_num, col_num) {
        (r, c) if r > 0 && c > 0 => fetch(r as usize - 1, c as usize - 1),
        (r, 0) if r > 0 => {
            if cols == 1 {
                fetch(r as usize - 1, 0)
            } else if rows == 1 {
                fetch(0, r as usize - 1)
            } else if (r as usize) <= rows {
                Ok(CellValue::Array(vec![array[r as usize - 1].clone()]))
            } else {
                Err(CellError::na())
            }
        }
        (0, c) if c > 0 => {
            if rows == 1 {
                fetch(0, c as usize - 1)
            } else if cols == 1 {
                fetch(c as usize - 1, 0)
            } else if (c as usize) <= cols {
                Ok(CellValue::Array(
                    array.iter().map(|row| vec![row[c as usize - 1].clone()]).collect(),
                ))
            } else {
                Err(CellError::na())
            }
        }
        _ => Err(CellError::value()),
    }
}

/// OFFSET: a reference displaced by rows/cols, optionally resized.
pub fn offset_fn(args: &[ArgumentHandle], ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let Some(reference) = args[0].reference() else {
        return Err(CellError::reference().with_message("OFFSET needs a reference"));
    };
    let base = match ctx.resolve_ref(reference)? {
        Addr::Range(r) => r,
        Addr::Cell(c) => RangeAddr::new(c.sheet, c.col, c.row, c.col, c.row)?,
    };
    let rows = to_number(&args[1].scalar()?)? as i64;
    let cols = to_number(&args[2].scalar()?)? as i64;
    let height = match args.get(3) {
        None => base.rows() as i64,
        Some(h) => to_number(&h.scalar()?)? as i64,
    };
    let width = match args.get(4) {
        None => base.cols() as i64,
        Some(h) => to_number(&h.scalar()?)? as i64,
    };
    if height < 1 || width < 1 {
        return Err(CellError::reference());
    }

    let new_row = base.start_row as i64 + rows;
    let new_col = base.start_col as i64 + cols;
    let end_row = new_row + height - 1;
    let end_col = new_col + width - 1;
    if new_row < 1
        || new_col < 1
        || end_row > sheetgraph_common::MAX_ROW as i64
        || end_col > sheetgraph_common::MAX_COL as i64
    {
        return Err(CellError::reference());
    }

    let addr = if height == 1 && width == 1 {
        Addr::Cell(sheetgraph_common::CellAddr::new(
            base.sheet.clone(),
            new_col as u32,
            new_row as u32,
        ))
    } else {
        Addr::Range(RangeAddr::new(
            base.sheet.clone(),
            new_col as u32,
            new_row as u32,
            end_col as u32,
            end_row as u32,
        )?)
    };
    Ok(ctx.resolve_addr(&addr))
}

/// INDIRECT: a reference built from text. An unparseable or
/// out-of-graph target is `#REF!`.
pub fn indirect_fn(args: &[ArgumentHandle], ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let text = match args[0].scalar()? {
        CellValue::Text(s) => s,
        CellValue::Error(e) => return Err(e),
        _ => return Err(CellError::reference()),
    };
    let a1 = match args.get(1) {
        None => true,
        Some(h) => crate::coercion::to_logical(&h.scalar()?)?,
    };
    let notation = if a1 { Notation::A1 } else { Notation::R1C1 };
    let parsed = ParsedRef::parse(&text, notation).map_err(|_| CellError::reference())?;
    if matches!(parsed, ParsedRef::Name(_)) {
        return Err(CellError::reference());
    }
    let addr = ctx.resolve_ref(&parsed).map_err(|_| CellError::reference())?;
    Ok(ctx.resolve_addr(&addr))
}

pub fn row_fn(args: &[ArgumentHandle], ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    match args.first().and_then(|h| h.reference()) {
        None => Ok(CellValue::Number(ctx.current_cell().row as f64)),
        Some(reference) => match ctx.resolve_ref(reference)? {
            Addr::Cell(c) => Ok(CellValue::Number(c.row as f64)),
            Addr::Range(r) => Ok(CellValue::Array(
                (r.start_row..=r.end_row)
                    .map(|row| vec![CellValue::Number(row as f64)])
                    .collect(),
            )),
        },
    }
}

pub fn column_fn(args: &[ArgumentHandle], ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    match args.first().and_then(|h| h.reference()) {
        None => Ok(CellValue::Number(ctx.current_cell().col as f64)),
        Some(reference) => match ctx.resolve_ref(reference)? {
            Addr::Cell(c) => Ok(CellValue::Number(c.col as f64)),
            Addr::Range(r) => Ok(CellValue::Array(vec![
                (r.start_col..=r.end_col)
                    .map(|col| CellValue::Number(col as f64))
                    .collect(),
            ])),
        },
    }
}

pub(super) fn register() {
    register_function(Arc::new(BuiltinFn::new("MATCH", 2, 3, match_fn)));
    register_function(Arc::new(BuiltinFn::new("VLOOKUP", 3, 4, vlookup_fn)));
    register_function(Arc::new(BuiltinFn::new("HLOOKUP", 3, 4, hlookup_fn)));
    register_function(Arc::new(BuiltinFn::new("LOOKUP", 2, 3, lookup_fn)));
    register_function(Arc::new(BuiltinFn::new("INDEX", 2, 3, index_fn)));
    register_function(Arc::new(BuiltinFn::new("OFFSET", 3, 5, offset_fn)));
    register_function(Arc::new(BuiltinFn::new("INDIRECT", 1, 2, indirect_fn)));
    register_function(Arc::new(BuiltinFn::new("ROW", 0, 1, row_fn)));
    register_function(Arc::new(BuiltinFn::new("COLUMN", 0, 1, column_fn)));
}

#[cfg(test)]
mod tests {
    use crate::test_workbook::TestWorkbook;
    use sheetgraph_common::CellValue as V;

    fn eval(formula: &str) -> V {
        TestWorkbook::new().evaluate(formula)
    }

    fn grid() -> TestWorkbook {
        TestWorkbook::new().with_range(
            "Sheet1",
            1,
            1, // A1:C4
            vec![
                vec![V::Text("a".into()), V::Number(1.0), V::Number(10.0)],
                vec![V::Text("b".into()), V::Number(2.0), V::Number(20.0)],
                vec![V::Text("c".into()), V::Number(3.0), V::Number(30.0)],
                vec![V::Text("d".into()), V::Number(4.0), V::Number(40.0)],
            ],
        )
    }

    #[test]
    fn match_modes() {
        assert_eq!(eval("=MATCH(3,{1,2,3,4},0)"), V::Number(3.0));
        // mode 1: largest value <= target
        assert_eq!(eval("=MATCH(3.5,{1,2,3,4},1)"), V::Number(3.0));
        assert_eq!(eval("=MATCH(5,{1,2,3,4})"), V::Number(4.0));
        // mode -1: smallest value >= target on descending data
        assert_eq!(eval("=MATCH(3.5,{9,7,4,2},-1)"), V::Number(3.0));
        assert!(matches!(eval("=MATCH(0,{1,2,3},1)"), V::Error(e) if e == "#N/A"));
    }

    #[test]
    fn match_ties_break_leftmost() {
        assert_eq!(eval("=MATCH(2,{1,2,2,2,3},1)"), V::Number(2.0));
    }

    #[test]
    fn match_wildcards_skip_errors() {
        assert_eq!(
            eval("=MATCH(\"Th*t\",{\"xyzzy\",1,FALSE,#DIV/0!,\"That\",\"TheEnd\"},0)"),
            V::Number(5.0)
        );
    }

    #[test]
    fn vlookup_exact_and_ranged() {
        assert_eq!(grid().evaluate("=VLOOKUP(\"c\",A1:C4,3,FALSE)"), V::Number(30.0));
        assert_eq!(grid().evaluate("=VLOOKUP(\"bb\",A1:C4,2)"), V::Number(2.0));
        assert!(matches!(
            grid().evaluate("=VLOOKUP(\"zz\",A1:C4,2,FALSE)"),
            V::Error(e) if e == "#N/A"
        ));
        assert!(matches!(
            grid().evaluate("=VLOOKUP(\"a\",A1:C4,0,FALSE)"),
            V::Error(e) if e == "#VALUE!"
        ));
        assert!(matches!(
            grid().evaluate("=VLOOKUP(\"a\",A1:C4,4,FALSE)"),
            V::Error(e) if e == "#REF!"
        ));
    }

    #[test]
    fn hlookup_mirrors_vlookup() {
        assert_eq!(eval("=HLOOKUP(2,{1,2,3;\"x\",\"y\",\"z\"},2,FALSE)"), V::Text("y".into()));
        assert!(matches!(
            eval("=HLOOKUP(2,{1,2,3;\"x\",\"y\",\"z\"},3,FALSE)"),
            V::Error(e) if e == "#REF!"
        ));
    }

    #[test]
    fn lookup_vector_and_array() {
        assert_eq!(eval("=LOOKUP(3,{1,2,3,4},{\"a\",\"b\",\"c\",\"d\"})"), V::Text("c".into()));
        // array form returns from the last column
        assert_eq!(grid().evaluate("=LOOKUP(\"c\",A1:C4)"), V::Number(30.0));
    }

    #[test]
    fn index_forms() {
        assert_eq!(eval("=INDEX({1,2;3,4},2,1)"), V::Number(3.0));
        assert_eq!(eval("=INDEX({1,2,3},3)"), V::Number(3.0));
        assert_eq!(eval("=INDEX({1;2;3},2)"), V::Number(2.0));
        assert!(matches!(eval("=INDEX({1,2;3,4},5,1)"), V::Error(e) if e == "#N/A"));
        match eval("=INDEX({1,2;3,4},1)") {
            V::Array(rows) => assert_eq!(rows, vec![vec![V::Number(1.0), V::Number(2.0)]]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn offset_moves_and_resizes() {
        assert_eq!(grid().evaluate("=OFFSET(A1,1,1)"), V::Number(2.0));
        match grid().evaluate("=OFFSET(A1,0,1,2,1)") {
            V::Array(rows) => {
                assert_eq!(rows, vec![vec![V::Number(1.0)], vec![V::Number(2.0)]]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            grid().evaluate("=OFFSET(A1,-1,0)"),
            V::Error(e) if e == "#REF!"
        ));
    }

    #[test]
    fn indirect_resolves_text() {
        assert_eq!(grid().evaluate("=INDIRECT(\"B2\")"), V::Number(2.0));
        assert_eq!(grid().evaluate("=INDIRECT(\"Sheet1!C\"&3)"), V::Number(30.0));
        assert!(matches!(
            grid().evaluate("=INDIRECT(\"no good\")"),
            V::Error(e) if e == "#REF!"
        ));
    }

    #[test]
    fn row_and_column() {
        assert_eq!(grid().evaluate("=ROW(B7)"), V::Number(7.0));
        assert_eq!(grid().evaluate("=COLUMN(B7)"), V::Number(2.0));
        match grid().evaluate("=ROW(A1:A3)") {
            V::Array(rows) => assert_eq!(rows.len(), 3),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
