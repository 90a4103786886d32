//! Criteria-driven aggregation: the `SUMIF`/`COUNTIF` family.
//!
//! The single-criterion forms take `(range, criteria, [target_range])`;
//! the multi-criterion forms take a target range followed by
//! `(criteria_range, criteria)` pairs of matching shape. A shape
//! mismatch between paired ranges is `#VALUE!`.

use std::sync::Arc;

use sheetgraph_common::{CellError, CellValue};

use super::utils::{Criteria, criteria_match, ifs_coords, parse_criteria};
use crate::function::BuiltinFn;
use crate::registry::register_function;
use crate::traits::{ArgumentHandle, EvalContext, Matrix};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Agg {
    Sum,
    Count,
    Average,
    Max,
    Min,
}

fn value_at(m: &Matrix, r: usize, c: usize) -> CellValue {
    m.get(r)
        .and_then(|row| row.get(c))
        .cloned()
        .unwrap_or(CellValue::Empty)
}

fn reduce(agg: Agg, picked: Vec<CellValue>) -> Result<CellValue, CellError> {
    let nums: Vec<f64> = picked
        .iter()
        .filter_map(|v| match v {
            CellValue::Number(n) => Some(*n),
            CellValue::Int(i) => Some(*i as f64),
            _ => None,
        })
        .collect();
    match agg {
        Agg::Count => Ok(CellValue::Number(picked.len() as f64)),
        Agg::Sum => Ok(CellValue::Number(nums.iter().sum())),
        Agg::Average => {
            if nums.is_empty() {
                Err(CellError::div())
            } else {
                Ok(CellValue::Number(nums.iter().sum::<f64>() / nums.len() as f64))
            }
        }
        Agg::Max => Ok(CellValue::Number(
            nums.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ))
        .map(zero_if_empty(nums.is_empty())),
        Agg::Min => Ok(CellValue::Number(
            nums.iter().copied().fold(f64::INFINITY, f64::min),
        ))
        .map(zero_if_empty(nums.is_empty())),
    }
}

fn zero_if_empty(empty: bool) -> impl Fn(CellValue) -> CellValue {
    move |v| if empty { CellValue::Number(0.0) } else { v }
}

/// `(range, criteria, [target])`: criteria range drives the iteration;
/// the target expands from its top-left to the criteria shape.
fn eval_single(
    args: &[ArgumentHandle],
    agg: Agg,
) -> Result<CellValue, CellError> {
    let crit_range = args[0].matrix()?;
    let criteria = parse_criteria(&args[1].scalar()?)?;

    let target: Matrix = if agg == Agg::Count {
        crit_range.clone()
    } else if let Some(h) = args.get(2) {
        h.matrix()?
    } else {
        crit_range.clone()
    };

    let mut picked = Vec::new();
    for (r, row) in crit_range.iter().enumerate() {
        for (c, v) in row.iter().enumerate() {
            if criteria_match(&criteria, v) {
                picked.push(value_at(&target, r, c));
            }
        }
    }
    reduce(agg, picked)
}

/// `(target, (crit_range, criteria)+)` with shape parity enforced.
fn eval_multi(args: &[ArgumentHandle], agg: Agg) -> Result<CellValue, CellError> {
    let (target, pair_args) = if agg == Agg::Count {
        (None, args)
    } else {
        (Some(args[0].matrix()?), &args[1..])
    };

    if pair_args.is_empty() || pair_args.len() % 2 != 0 {
        return Err(CellError::value()
            .with_message("expected (criteria_range, criteria) pairs"));
    }

    let mut pairs: Vec<(Matrix, Criteria)> = Vec::with_capacity(pair_args.len() / 2);
    for chunk in pair_args.chunks(2) {
        let m = chunk[0].matrix()?;
        let crit = parse_criteria(&chunk[1].scalar()?)?;
        pairs.push((m, crit));
    }

    if let Some(target) = &target {
        let rows = pairs[0].0.len();
        let cols = pairs[0].0.first().map_or(0, |r| r.len());
        if target.len() != rows || target.first().map_or(0, |r| r.len()) != cols {
            return Err(CellError::value().with_message("target range shape mismatch"));
        }
    }

    let coords = ifs_coords(&pairs)?;
    let picked: Vec<CellValue> = match &target {
        Some(t) => coords.iter().map(|&(r, c)| value_at(t, r, c)).collect(),
        None => coords.iter().map(|_| CellValue::Empty).collect(),
    };
    reduce(agg, picked)
}

/* ─────────────────────────── entry points ─────────────────────────── */

pub fn sumif_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    eval_single(args, Agg::Sum)
}

pub fn countif_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    eval_single(args, Agg::Count)
}

pub fn averageif_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    eval_single(args, Agg::Average)
}

pub fn sumifs_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    eval_multi(args, Agg::Sum)
}

pub fn countifs_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    eval_multi(args, Agg::Count)
}

pub fn averageifs_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    eval_multi(args, Agg::Average)
}

pub fn maxifs_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    eval_multi(args, Agg::Max)
}

pub fn minifs_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    eval_multi(args, Agg::Min)
}

pub(super) fn register() {
    register_function(Arc::new(BuiltinFn::new("SUMIF", 2, 3, sumif_fn)));
    register_function(Arc::new(BuiltinFn::new("COUNTIF", 2, 2, countif_fn)));
    register_function(Arc::new(BuiltinFn::new("AVERAGEIF", 2, 3, averageif_fn)));
    register_function(Arc::new(BuiltinFn::variadic("SUMIFS", 3, sumifs_fn)));
    register_function(Arc::new(BuiltinFn::variadic("COUNTIFS", 2, countifs_fn)));
    register_function(Arc::new(BuiltinFn::variadic("AVERAGEIFS", 3, averageifs_fn)));
    register_function(Arc::new(BuiltinFn::variadic("MAXIFS", 3, maxifs_fn)));
    register_function(Arc::new(BuiltinFn::variadic("MINIFS", 3, minifs_fn)));
}

#[cfg(test)]
mod tests {
    use crate::test_workbook::TestWorkbook;
    use sheetgraph_common::CellValue as V;

    fn wb() -> TestWorkbook {
        TestWorkbook::new()
            .with_range(
                "Sheet1",
                1,
                1, // A1:B4, names in A, amounts in B
                vec![
                    vec![V::Text("apple".into()), V::Number(10.0)],
                    vec![V::Text("banana".into()), V::Number(20.0)],
                    vec![V::Text("avocado".into()), V::Number(30.0)],
                    vec![V::Text("banana".into()), V::Number(40.0)],
                ],
            )
    }

    #[test]
    fn sumif_with_target_range() {
        assert_eq!(wb().evaluate("=SUMIF(A1:A4,\"banana\",B1:B4)"), V::Number(60.0));
        assert_eq!(wb().evaluate("=SUMIF(B1:B4,\">15\")"), V::Number(90.0));
    }

    #[test]
    fn sumif_wildcards() {
        assert_eq!(wb().evaluate("=SUMIF(A1:A4,\"a*\",B1:B4)"), V::Number(40.0));
        assert_eq!(wb().evaluate("=SUMIF(A1:A4,\"?anana\",B1:B4)"), V::Number(60.0));
    }

    #[test]
    fn countif_variants() {
        assert_eq!(wb().evaluate("=COUNTIF(A1:A4,\"banana\")"), V::Number(2.0));
        assert_eq!(wb().evaluate("=COUNTIF(B1:B4,\"<>10\")"), V::Number(3.0));
    }

    #[test]
    fn multi_criteria() {
        assert_eq!(
            wb().evaluate("=SUMIFS(B1:B4,A1:A4,\"banana\",B1:B4,\">25\")"),
            V::Number(40.0)
        );
        assert_eq!(
            wb().evaluate("=COUNTIFS(A1:A4,\"a*\",B1:B4,\">15\")"),
            V::Number(1.0)
        );
        assert_eq!(
            wb().evaluate("=AVERAGEIFS(B1:B4,A1:A4,\"banana\")"),
            V::Number(30.0)
        );
        assert_eq!(
            wb().evaluate("=MAXIFS(B1:B4,A1:A4,\"banana\")"),
            V::Number(40.0)
        );
        assert_eq!(
            wb().evaluate("=MINIFS(B1:B4,A1:A4,\"banana\")"),
            V::Number(20.0)
        );
    }

    #[test]
    fn empty_selection_behaviour() {
        assert_eq!(wb().evaluate("=MAXIFS(B1:B4,A1:A4,\"plum\")"), V::Number(0.0));
        assert!(matches!(
            wb().evaluate("=AVERAGEIFS(B1:B4,A1:A4,\"plum\")"),
            V::Error(e) if e == "#DIV/0!"
        ));
    }

    #[test]
    fn shape_mismatch_is_value_error() {
        assert!(matches!(
            wb().evaluate("=SUMIFS(B1:B4,A1:A3,\"banana\")"),
            V::Error(e) if e == "#VALUE!"
        ));
    }
}
