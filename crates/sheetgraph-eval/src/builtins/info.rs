//! Information functions: the IS* family, N and NA.

use std::sync::Arc;

use sheetgraph_common::{CellError, CellValue, ErrorKind};

use crate::coercion::to_number;
use crate::function::BuiltinFn;
use crate::registry::register_function;
use crate::traits::{ArgumentHandle, EvalContext};

fn scalar(args: &[ArgumentHandle]) -> Result<CellValue, CellError> {
    args[0].scalar()
}

pub fn isblank_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Boolean(scalar(args)?.is_blank()))
}

pub fn isnumber_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    Ok(CellValue::Boolean(matches!(
        scalar(args)?,
        CellValue::Number(_) | CellValue::Int(_)
    )))
}

pub fn istext_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Boolean(matches!(scalar(args)?, CellValue::Text(_))))
}

pub fn isnontext_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    Ok(CellValue::Boolean(!matches!(scalar(args)?, CellValue::Text(_))))
}

pub fn islogical_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    Ok(CellValue::Boolean(matches!(
        scalar(args)?,
        CellValue::Boolean(_)
    )))
}

/// Any error value.
pub fn iserror_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Boolean(scalar(args)?.is_error()))
}

/// Any error except `#N/A`.
pub fn iserr_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Boolean(matches!(
        scalar(args)?,
        CellValue::Error(e) if e.kind != ErrorKind::Na
    )))
}

pub fn isna_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Boolean(matches!(
        scalar(args)?,
        CellValue::Error(e) if e.kind == ErrorKind::Na
    )))
}

fn parity(args: &[ArgumentHandle], want_odd: bool) -> Result<CellValue, CellError> {
    let v = scalar(args)?;
    if matches!(v, CellValue::Boolean(_)) {
        return Err(CellError::value());
    }
    let n = to_number(&v)?;
    let odd = (n.abs().floor() as i64) % 2 == 1;
    Ok(CellValue::Boolean(odd == want_odd))
}

pub fn iseven_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    parity(args, false)
}

pub fn isodd_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    parity(args, true)
}

/// N: numbers pass through, booleans become 1/0, text becomes 0,
/// errors propagate.
pub fn n_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    match scalar(args)? {
        CellValue::Error(e) => Ok(CellValue::Error(e)),
        CellValue::Number(n) => Ok(CellValue::Number(n)),
        CellValue::Int(i) => Ok(CellValue::Int(i)),
        CellValue::Boolean(b) => Ok(CellValue::Number(if b { 1.0 } else { 0.0 })),
        _ => Ok(CellValue::Number(0.0)),
    }
}

pub fn na_fn(_args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Error(CellError::na()))
}

pub(super) fn register() {
    register_function(Arc::new(BuiltinFn::new("ISBLANK", 1, 1, isblank_fn)));
    register_function(Arc::new(BuiltinFn::new("ISNUMBER", 1, 1, isnumber_fn)));
    register_function(Arc::new(BuiltinFn::new("ISTEXT", 1, 1, istext_fn)));
    register_function(Arc::new(BuiltinFn::new("ISNONTEXT", 1, 1, isnontext_fn)));
    register_function(Arc::new(BuiltinFn::new("ISLOGICAL", 1, 1, islogical_fn)));
    register_function(Arc::new(BuiltinFn::new("ISERROR", 1, 1, iserror_fn)));
    register_function(Arc::new(BuiltinFn::new("ISERR", 1, 1, iserr_fn)));
    register_function(Arc::new(BuiltinFn::new("ISNA", 1, 1, isna_fn)));
    register_function(Arc::new(BuiltinFn::new("ISEVEN", 1, 1, iseven_fn)));
    register_function(Arc::new(BuiltinFn::new("ISODD", 1, 1, isodd_fn)));
    register_function(Arc::new(BuiltinFn::new("N", 1, 1, n_fn)));
    register_function(Arc::new(BuiltinFn::new("NA", 0, 0, na_fn)));
}

#[cfg(test)]
mod tests {
    use crate::test_workbook::TestWorkbook;
    use sheetgraph_common::CellValue as V;

    fn eval(formula: &str) -> V {
        TestWorkbook::new().evaluate(formula)
    }

    #[test]
    fn type_probes() {
        assert_eq!(eval("=ISNUMBER(1)"), V::Boolean(true));
        assert_eq!(eval("=ISNUMBER(\"1\")"), V::Boolean(false));
        assert_eq!(eval("=ISTEXT(\"x\")"), V::Boolean(true));
        assert_eq!(eval("=ISNONTEXT(1)"), V::Boolean(true));
        assert_eq!(eval("=ISLOGICAL(TRUE)"), V::Boolean(true));
    }

    #[test]
    fn blank_probe() {
        let wb = TestWorkbook::new().with_cell_a1("Sheet1", "A1", V::Empty);
        assert_eq!(wb.evaluate("=ISBLANK(A1)"), V::Boolean(true));
        assert_eq!(wb.evaluate("=ISBLANK(0)"), V::Boolean(false));
    }

    #[test]
    fn error_probes_distinguish_na() {
        assert_eq!(eval("=ISERROR(#N/A)"), V::Boolean(true));
        assert_eq!(eval("=ISERROR(1/0)"), V::Boolean(true));
        assert_eq!(eval("=ISERR(#N/A)"), V::Boolean(false));
        assert_eq!(eval("=ISERR(#DIV/0!)"), V::Boolean(true));
        assert_eq!(eval("=ISNA(#N/A)"), V::Boolean(true));
        assert_eq!(eval("=ISNA(#REF!)"), V::Boolean(false));
    }

    #[test]
    fn parity() {
        assert_eq!(eval("=ISEVEN(4)"), V::Boolean(true));
        assert_eq!(eval("=ISODD(-3.7)"), V::Boolean(true));
        assert_eq!(eval("=ISEVEN(2.5)"), V::Boolean(true));
        assert!(matches!(eval("=ISODD(TRUE)"), V::Error(e) if e == "#VALUE!"));
    }

    #[test]
    fn n_and_na() {
        assert_eq!(eval("=N(7)"), V::Number(7.0));
        assert_eq!(eval("=N(TRUE)"), V::Number(1.0));
        assert_eq!(eval("=N(\"text\")"), V::Number(0.0));
        assert!(matches!(eval("=NA()"), V::Error(e) if e == "#N/A"));
    }
}
