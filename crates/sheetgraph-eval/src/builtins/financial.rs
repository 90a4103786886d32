//! Financial functions: NPV, IRR and the payment family.

use std::sync::Arc;

use sheetgraph_common::{CellError, CellValue};

use super::utils::{flatten_args, num_arg, numerics, opt_num_arg};
use crate::function::BuiltinFn;
use crate::registry::register_function;
use crate::traits::{ArgumentHandle, EvalContext};

/// NPV discounts each cash flow one period: Σ vᵢ / (1+rate)^(i+1).
pub fn npv_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let rate = num_arg(args, 0)?;
    if rate == -1.0 {
        return Err(CellError::div());
    }
    let flows = numerics(flatten_args(&args[1..])?, false)?;
    let total: f64 = flows
        .iter()
        .enumerate()
        .map(|(i, v)| v / (1.0 + rate).powi(i as i32 + 1))
        .sum();
    Ok(CellValue::Number(total))
}

/// Present value of the flows with the first at period zero; the IRR
/// root-finder drives this to zero.
fn npv_at(rate: f64, flows: &[f64]) -> f64 {
    flows
        .iter()
        .enumerate()
        .map(|(i, v)| v / (1.0 + rate).powi(i as i32))
        .sum()
}

fn npv_derivative(rate: f64, flows: &[f64]) -> f64 {
    flows
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, v)| -(i as f64) * v / (1.0 + rate).powi(i as i32 + 1))
        .sum()
}

/// IRR by Newton iteration with a scan fallback when Newton leaves the
/// domain or stalls.
pub fn irr_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let flows = numerics(flatten_args(&args[..1])?, false)?;
    if flows.len() < 2
        || !flows.iter().any(|v| *v > 0.0)
        || !flows.iter().any(|v| *v < 0.0)
    {
        return Err(CellError::num());
    }
    let guess = opt_num_arg(args, 1, 0.1)?;

    let mut rate = guess.max(-0.99);
    for _ in 0..100 {
        let f = npv_at(rate, &flows);
        if f.abs() < 1e-9 {
            return Ok(CellValue::Number(rate));
        }
        let d = npv_derivative(rate, &flows);
        if d == 0.0 {
            break;
        }
        let next = rate - f / d;
        if !next.is_finite() || next <= -1.0 {
            break;
        }
        if (next - rate).abs() < 1e-12 {
            return Ok(CellValue::Number(next));
        }
        rate = next;
    }

    // bisection over a sign change found by scanning
    let mut lo = -0.999_999;
    let mut f_lo = npv_at(lo, &flows);
    let mut bracket = None;
    for step in 1..=4000 {
        let r = -0.999_999 + step as f64 * 0.0025;
        let f_r = npv_at(r, &flows);
        if f_lo * f_r <= 0.0 {
            bracket = Some((lo, r));
            break;
        }
        lo = r;
        f_lo = f_r;
    }
    let Some((mut a, mut b)) = bracket else {
        return Err(CellError::num());
    };
    let mut f_a = npv_at(a, &flows);
    for _ in 0..200 {
        let mid = (a + b) / 2.0;
        let f_mid = npv_at(mid, &flows);
        if f_mid.abs() < 1e-9 {
            return Ok(CellValue::Number(mid));
        }
        if f_a * f_mid < 0.0 {
            b = mid;
        } else {
            a = mid;
            f_a = f_mid;
        }
    }
    Ok(CellValue::Number((a + b) / 2.0))
}

/// PMT(rate, nper, pv, [fv], [type]).
fn payment(rate: f64, nper: f64, pv: f64, fv: f64, when: f64) -> Result<f64, CellError> {
    if nper == 0.0 {
        return Err(CellError::num());
    }
    if rate == 0.0 {
        return Ok(-(pv + fv) / nper);
    }
    let growth = (1.0 + rate).powf(nper);
    Ok(-(fv + pv * growth) * rate / ((1.0 + rate * when) * (growth - 1.0)))
}

pub fn pmt_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let rate = num_arg(args, 0)?;
    let nper = num_arg(args, 1)?;
    let pv = num_arg(args, 2)?;
    let fv = opt_num_arg(args, 3, 0.0)?;
    let when = opt_num_arg(args, 4, 0.0)?;
    Ok(CellValue::Number(payment(rate, nper, pv, fv, when)?))
}

/// PPMT(rate, per, nper, pv, [fv], [type]): the principal portion of
/// payment `per`, i.e. the payment minus interest on the running
/// balance.
pub fn ppmt_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let rate = num_arg(args, 0)?;
    let per = num_arg(args, 1)?;
    let nper = num_arg(args, 2)?;
    let pv = num_arg(args, 3)?;
    let fv = opt_num_arg(args, 4, 0.0)?;
    let when = opt_num_arg(args, 5, 0.0)?;

    if per < 1.0 || per > nper {
        return Err(CellError::num());
    }
    let pmt = payment(rate, nper, pv, fv, when)?;
    if rate == 0.0 {
        return Ok(CellValue::Number(pmt));
    }

    // balance after per-1 payments
    let periods = per - 1.0;
    let growth = (1.0 + rate).powf(periods);
    let balance = pv * growth + pmt * (1.0 + rate * when) * (growth - 1.0) / rate;
    let mut ipmt = -balance * rate;
    if when == 1.0 {
        if per == 1.0 {
            ipmt = 0.0;
        } else {
            ipmt /= 1.0 + rate;
        }
    }
    Ok(CellValue::Number(pmt - ipmt))
}

pub(super) fn register() {
    register_function(Arc::new(BuiltinFn::variadic("NPV", 2, npv_fn)));
    register_function(Arc::new(BuiltinFn::new("IRR", 1, 2, irr_fn)));
    register_function(Arc::new(BuiltinFn::new("PMT", 3, 5, pmt_fn)));
    register_function(Arc::new(BuiltinFn::new("PPMT", 4, 6, ppmt_fn)));
}

#[cfg(test)]
mod tests {
    use crate::test_workbook::TestWorkbook;
    use sheetgraph_common::CellValue as V;

    fn num(formula: &str) -> f64 {
        match TestWorkbook::new().evaluate(formula) {
            V::Number(n) => n,
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn npv_discounts_each_period() {
        // classic reference case
        let v = num("=NPV(0.1,-10000,3000,4200,6800)");
        assert!((v - 1188.4434).abs() < 1e-3, "got {v}");
    }

    #[test]
    fn irr_recovers_rate() {
        let r = num("=IRR({-100,39,59,55,20})");
        assert!((r - 0.28095).abs() < 1e-4, "got {r}");
        // all-positive flows have no root
        assert!(matches!(
            TestWorkbook::new().evaluate("=IRR({10,20})"),
            V::Error(e) if e == "#NUM!"
        ));
    }

    #[test]
    fn irr_zeroes_npv() {
        let r = num("=IRR({-1000,300,300,300,300})");
        let check: f64 = [-1000.0, 300.0, 300.0, 300.0, 300.0]
            .iter()
            .enumerate()
            .map(|(i, v)| v / (1.0 + r).powi(i as i32))
            .sum();
        assert!(check.abs() < 1e-6, "npv at irr was {check}");
    }

    #[test]
    fn pmt_reference_values() {
        // borrow 10000 at 8%/yr over 10 months
        let p = num("=PMT(0.08/12,10,10000)");
        assert!((p - -1037.0320893).abs() < 1e-6, "got {p}");
        // zero rate is straight-line
        assert_eq!(num("=PMT(0,10,1000)"), -100.0);
        // annuity-due pays less per period
        let due = num("=PMT(0.08/12,10,10000,0,1)");
        assert!(due > p);
    }

    #[test]
    fn ppmt_sums_to_principal() {
        // the principal portions over the whole life repay pv exactly
        let total: f64 = (1..=10)
            .map(|per| num(&format!("=PPMT(0.05,{per},10,1000)")))
            .sum();
        assert!((total + 1000.0).abs() < 1e-6, "got {total}");
        // later periods carry more principal
        assert!(num("=PPMT(0.05,10,10,1000)") < num("=PPMT(0.05,1,10,1000)"));
    }
}
