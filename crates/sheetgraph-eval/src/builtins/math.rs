//! Numeric reductions and elementary math.

use std::f64::consts::PI;
use std::sync::Arc;

use sheetgraph_common::{CellError, CellValue};

use super::utils::{flatten_args, num_arg, numerics, opt_num_arg};
use crate::function::BuiltinFn;
use crate::registry::register_function;
use crate::traits::{ArgumentHandle, EvalContext};

/* ─────────────────────────── reductions ───────────────────────────── */

pub fn sum_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    let data = numerics(flatten_args(args)?, true)?;
    Ok(CellValue::Number(data.iter().sum()))
}

/// MIN of no numeric data is 0.
pub fn min_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    let data = numerics(flatten_args(args)?, false)?;
    if data.is_empty() {
        return Ok(CellValue::Number(0.0));
    }
    Ok(CellValue::Number(
        data.iter().copied().fold(f64::INFINITY, f64::min),
    ))
}

/// MAX of no numeric data is 0.
pub fn max_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    let data = numerics(flatten_args(args)?, false)?;
    if data.is_empty() {
        return Ok(CellValue::Number(0.0));
    }
    Ok(CellValue::Number(
        data.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    ))
}

/// AVERAGE of no numeric data is `#DIV/0!`.
pub fn average_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    let data = numerics(flatten_args(args)?, false)?;
    if data.is_empty() {
        return Err(CellError::div());
    }
    Ok(CellValue::Number(data.iter().sum::<f64>() / data.len() as f64))
}

pub fn count_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    let count = flatten_args(args)?
        .iter()
        .filter(|v| matches!(v, CellValue::Number(_) | CellValue::Int(_)))
        .count();
    Ok(CellValue::Number(count as f64))
}

/* ─────────────────────────── scalar math ──────────────────────────── */

pub fn pi_fn(_args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Number(PI))
}

/// ATAN2(x, y): spreadsheet argument order; ATAN2(1, 0) is π/2.
pub fn atan2_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    let x = num_arg(args, 0)?;
    let y = num_arg(args, 1)?;
    if x == 0.0 && y == 0.0 {
        return Err(CellError::div());
    }
    Ok(CellValue::Number(x.atan2(y)))
}

pub fn ln_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let n = num_arg(args, 0)?;
    if n <= 0.0 {
        return Err(CellError::num());
    }
    Ok(CellValue::Number(n.ln()))
}

pub fn log_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let n = num_arg(args, 0)?;
    let base = opt_num_arg(args, 1, 10.0)?;
    if n <= 0.0 || base <= 0.0 || base == 1.0 {
        return Err(CellError::num());
    }
    Ok(CellValue::Number(n.log(base)))
}

pub fn exp_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Number(num_arg(args, 0)?.exp()))
}

pub fn sqrt_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let n = num_arg(args, 0)?;
    if n < 0.0 {
        return Err(CellError::num());
    }
    Ok(CellValue::Number(n.sqrt()))
}

pub fn abs_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Number(num_arg(args, 0)?.abs()))
}

/// ROUND half-away-from-zero, negative digit counts round left of the
/// decimal point.
pub fn round_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let n = num_arg(args, 0)?;
    let digits = opt_num_arg(args, 1, 0.0)?.trunc() as i32;
    let factor = 10f64.powi(digits);
    Ok(CellValue::Number((n * factor).round() / factor))
}

/// MOD takes the sign of the divisor.
pub fn mod_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let n = num_arg(args, 0)?;
    let d = num_arg(args, 1)?;
    if d == 0.0 {
        return Err(CellError::div());
    }
    Ok(CellValue::Number(n - d * (n / d).floor()))
}

pub fn power_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let base = num_arg(args, 0)?;
    let exp = num_arg(args, 1)?;
    let out = if base < 0.0 && exp.fract() != 0.0 {
        f64::NAN
    } else {
        base.powf(exp)
    };
    if out.is_nan() || out.is_infinite() {
        return Err(CellError::num());
    }
    Ok(CellValue::Number(out))
}

pub(super) fn register() {
    register_function(Arc::new(BuiltinFn::variadic("SUM", 0, sum_fn)));
    register_function(Arc::new(BuiltinFn::variadic("MIN", 1, min_fn)));
    register_function(Arc::new(BuiltinFn::variadic("MAX", 1, max_fn)));
    register_function(Arc::new(BuiltinFn::variadic("AVERAGE", 1, average_fn)));
    register_function(Arc::new(BuiltinFn::variadic("COUNT", 0, count_fn)));
    register_function(Arc::new(BuiltinFn::new("PI", 0, 0, pi_fn)));
    register_function(Arc::new(BuiltinFn::new("ATAN2", 2, 2, atan2_fn)));
    register_function(Arc::new(BuiltinFn::new("LN", 1, 1, ln_fn)));
    register_function(Arc::new(BuiltinFn::new("LOG", 1, 2, log_fn)));
    register_function(Arc::new(BuiltinFn::new("EXP", 1, 1, exp_fn)));
    register_function(Arc::new(BuiltinFn::new("SQRT", 1, 1, sqrt_fn)));
    register_function(Arc::new(BuiltinFn::new("ABS", 1, 1, abs_fn)));
    register_function(Arc::new(BuiltinFn::new("ROUND", 1, 2, round_fn)));
    register_function(Arc::new(BuiltinFn::new("MOD", 2, 2, mod_fn)));
    register_function(Arc::new(BuiltinFn::new("POWER", 2, 2, power_fn)));
}

#[cfg(test)]
mod tests {
    use crate::test_workbook::TestWorkbook;
    use sheetgraph_common::CellValue as V;

    fn eval(formula: &str) -> V {
        TestWorkbook::new().evaluate(formula)
    }

    #[test]
    fn sum_ignores_text_counts_bools() {
        assert_eq!(eval("=SUM(1,2,3)"), V::Number(6.0));
        assert_eq!(eval("=SUM({1,\"x\";TRUE,4})"), V::Number(6.0));
        assert_eq!(eval("=SUM()"), V::Number(0.0));
    }

    #[test]
    fn min_max_empty_is_zero() {
        assert_eq!(eval("=MIN({\"a\",\"b\"})"), V::Number(0.0));
        assert_eq!(eval("=MAX({\"a\",\"b\"})"), V::Number(0.0));
        assert_eq!(eval("=MIN(3,1,2)"), V::Number(1.0));
        assert_eq!(eval("=MAX(3,1,2)"), V::Number(3.0));
    }

    #[test]
    fn average_empty_is_div0() {
        assert!(matches!(eval("=AVERAGE({\"a\"})"), V::Error(e) if e == "#DIV/0!"));
        assert_eq!(eval("=AVERAGE(2,4)"), V::Number(3.0));
    }

    #[test]
    fn count_numbers_only() {
        assert_eq!(eval("=COUNT({1,\"x\",TRUE,2.5})"), V::Number(2.0));
    }

    #[test]
    fn atan2_spreadsheet_order() {
        match eval("=ATAN2(1,0)") {
            V::Number(n) => assert!((n - std::f64::consts::FRAC_PI_2).abs() < 1e-12),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn pi_is_constant() {
        assert_eq!(eval("=PI()"), V::Number(std::f64::consts::PI));
    }

    #[test]
    fn round_half_away_from_zero() {
        assert_eq!(eval("=ROUND(2.5,0)"), V::Number(3.0));
        assert_eq!(eval("=ROUND(-2.5,0)"), V::Number(-3.0));
        assert_eq!(eval("=ROUND(1.234,2)"), V::Number(1.23));
        assert_eq!(eval("=ROUND(15,-1)"), V::Number(20.0));
    }

    #[test]
    fn mod_follows_divisor_sign() {
        assert_eq!(eval("=MOD(5,3)"), V::Number(2.0));
        assert_eq!(eval("=MOD(-5,3)"), V::Number(1.0));
        assert_eq!(eval("=MOD(5,-3)"), V::Number(-1.0));
        assert!(matches!(eval("=MOD(5,0)"), V::Error(e) if e == "#DIV/0!"));
    }

    #[test]
    fn domain_errors() {
        assert!(matches!(eval("=SQRT(-1)"), V::Error(e) if e == "#NUM!"));
        assert!(matches!(eval("=LN(0)"), V::Error(e) if e == "#NUM!"));
    }
}
