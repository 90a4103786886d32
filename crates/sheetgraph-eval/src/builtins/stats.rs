//! Statistics: LARGE/SMALL and the least-squares family.
//!
//! LINEST fits ordinary least squares on a design matrix built from the
//! X argument (a Vandermonde matrix when the cell sits inside a
//! multi-cell array run). SLOPE, INTERCEPT, FORECAST and TREND all ride
//! on the same helper. Coefficients come back in the spreadsheet layout:
//! highest-order slope first, intercept last.

use std::sync::Arc;

use sheetgraph_common::{CellError, CellValue};

use super::utils::flatten_args;
use crate::coercion::to_number;
use crate::function::BuiltinFn;
use crate::registry::register_function;
use crate::traits::{ArgumentHandle, EvalContext, Matrix};

/* ─────────────────────────── LARGE / SMALL ────────────────────────── */

fn ranked(args: &[ArgumentHandle], largest: bool) -> Result<CellValue, CellError> {
    let mut data = Vec::new();
    for v in flatten_args(&args[..1])? {
        match v {
            CellValue::Error(e) => return Err(e),
            CellValue::Number(n) => data.push(n),
            CellValue::Int(i) => data.push(i as f64),
            CellValue::Text(s) => {
                if let Ok(n) = s.trim().parse::<f64>() {
                    data.push(n);
                }
            }
            _ => {}
        }
    }
    let k = match args[1].scalar()? {
        CellValue::Error(e) => return Err(e),
        v => to_number(&v)?,
    };
    let k = k.ceil() as i64;
    if data.is_empty() || k < 1 || k as usize > data.len() {
        return Err(CellError::num());
    }
    data.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if largest {
        data.reverse();
    }
    Ok(CellValue::Number(data[k as usize - 1]))
}

pub fn large_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    ranked(args, true)
}

pub fn small_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    ranked(args, false)
}

/* ───────────────────────── least-squares core ─────────────────────── */

/// Invert a small symmetric matrix by Gauss-Jordan with partial
/// pivoting; `None` when (numerically) singular.
fn invert(mut m: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let n = m.len();
    let mut inv: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&a, &b| {
                m[a][col]
                    .abs()
                    .partial_cmp(&m[b][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap();
        if m[pivot_row][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot_row);
        inv.swap(col, pivot_row);

        let pivot = m[col][col];
        for j in 0..n {
            m[col][j] /= pivot;
            inv[col][j] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = m[row][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                m[row][j] -= factor * m[col][j];
                inv[row][j] -= factor * inv[col][j];
            }
        }
    }
    Some(inv)
}

struct Fit {
    /// Spreadsheet layout: `[m_k, …, m_1, b]`.
    coefs: Vec<f64>,
    full_rank: bool,
    /// `(AᵀA)⁻¹` of the design, for standard errors; `None` when the
    /// fit degenerated.
    normal_inverse: Option<Vec<Vec<f64>>>,
    design: Vec<Vec<f64>>,
    y: Vec<f64>,
    with_const: bool,
}

/// Solve `design × x ≈ y`. Design rows are observations; the first
/// column is the intercept column when `with_const` is set (matching
/// the coefficient reversal below).
fn least_squares(design: Vec<Vec<f64>>, y: Vec<f64>, with_const: bool) -> Fit {
    let n = y.len();
    let k = design.first().map_or(0, |r| r.len());

    // normal equations
    let mut ata = vec![vec![0.0; k]; k];
    let mut aty = vec![0.0; k];
    for row in 0..n {
        for i in 0..k {
            aty[i] += design[row][i] * y[row];
            for j in 0..k {
                ata[i][j] += design[row][i] * design[row][j];
            }
        }
    }

    let inverse = invert(ata);
    let (solution, full_rank) = match &inverse {
        Some(inv) => {
            let x: Vec<f64> = (0..k)
                .map(|i| (0..k).map(|j| inv[i][j] * aty[j]).sum())
                .collect();
            (x, true)
        }
        None => (vec![0.0; k], false),
    };

    // reverse into [m_k … m_1 b]; a const-less fit still reports b = 0
    let mut coefs: Vec<f64> = if with_const {
        solution.iter().rev().copied().collect()
    } else {
        let mut c: Vec<f64> = solution.iter().rev().copied().collect();
        c.push(0.0);
        c
    };
    if !full_rank {
        let mean = y.iter().sum::<f64>() / n.max(1) as f64;
        coefs = vec![0.0; coefs.len()];
        if let Some(last) = coefs.last_mut() {
            *last = mean;
        }
    }

    Fit {
        coefs,
        full_rank,
        normal_inverse: inverse,
        design,
        y,
        with_const,
    }
}

impl Fit {
    fn predict_design_row(&self, row: &[f64]) -> f64 {
        // design order is [1?, x1 … xk]; coefs are reversed
        let mut out = 0.0;
        let k = row.len();
        let sol: Vec<f64> = if self.with_const {
            self.coefs.iter().rev().copied().collect()
        } else {
            self.coefs[..self.coefs.len() - 1]
                .iter()
                .rev()
                .copied()
                .collect()
        };
        for i in 0..k {
            out += sol[i] * row[i];
        }
        out
    }

    /// The extended-statistics block in its fixed 5-row layout.
    fn stats_matrix(&self) -> Matrix {
        let n = self.y.len();
        let k = self.coefs.len();
        let na = || CellValue::Error(CellError::na());
        let width = k;

        let mean = self.y.iter().sum::<f64>() / n.max(1) as f64;
        let predicted: Vec<f64> = self
            .design
            .iter()
            .map(|row| self.predict_design_row(row))
            .collect();

        let (ss_reg, ss_tot): (f64, f64) = if self.with_const {
            (
                predicted.iter().map(|p| (p - mean).powi(2)).sum(),
                self.y.iter().map(|v| (v - mean).powi(2)).sum(),
            )
        } else {
            (
                predicted.iter().map(|p| p * p).sum(),
                self.y.iter().map(|v| v * v).sum(),
            )
        };
        let ss_resid: f64 = self
            .y
            .iter()
            .zip(&predicted)
            .map(|(v, p)| (v - p).powi(2))
            .sum();

        let params = if self.with_const { k } else { k - 1 };
        let dof = n.saturating_sub(params);

        let (r2, stderr_y, std_errs, ss_reg, ss_resid) = if self.full_rank && dof > 0 {
            let stderr_y2 = ss_resid / dof as f64;
            let mut errs: Vec<f64> = self
                .normal_inverse
                .as_ref()
                .map(|inv| {
                    (0..params)
                        .map(|i| (stderr_y2 * inv[i][i]).max(0.0).sqrt())
                        .collect()
                })
                .unwrap_or_default();
            errs.reverse();
            let r2 = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_resid / ss_tot };
            (r2, stderr_y2.sqrt(), errs, ss_reg, ss_resid)
        } else {
            (1.0, 0.0, vec![0.0; params], *self.coefs.last().unwrap_or(&0.0), 0.0)
        };

        let f_denom = (k as f64 - 1.0) * (1.0 - r2);
        let f_score = if f_denom == 0.0 {
            CellValue::Error(CellError::num())
        } else {
            CellValue::Number(r2 * dof as f64 / f_denom)
        };

        let mut row_coefs: Vec<CellValue> =
            self.coefs.iter().map(|c| CellValue::Number(*c)).collect();
        row_coefs.resize(width, na());

        let mut row_errs: Vec<CellValue> =
            std_errs.iter().map(|e| CellValue::Number(*e)).collect();
        row_errs.resize(width, na());

        let pad = |mut row: Vec<CellValue>| -> Vec<CellValue> {
            row.resize(width, na());
            row
        };

        vec![
            row_coefs,
            row_errs,
            pad(vec![CellValue::Number(r2), CellValue::Number(stderr_y)]),
            pad(vec![f_score, CellValue::Number(dof as f64)]),
            pad(vec![CellValue::Number(ss_reg), CellValue::Number(ss_resid)]),
        ]
    }
}

/* ─────────────────────── argument preparation ─────────────────────── */

fn numeric_vector(m: &Matrix) -> Result<Vec<f64>, CellError> {
    if m.len() != 1 && m.first().map_or(0, |r| r.len()) != 1 {
        return Err(CellError::reference().with_message("expected a vector"));
    }
    m.iter()
        .flatten()
        .map(|v| match v {
            CellValue::Error(e) => Err(e.clone()),
            CellValue::Text(_) | CellValue::Empty | CellValue::Array(_) => Err(CellError::value()),
            other => to_number(other),
        })
        .collect()
}

/// X as predictor columns, transposing when observations run across.
fn predictor_columns(m: &Matrix, n_obs: usize) -> Result<Vec<Vec<f64>>, CellError> {
    let rows = m.len();
    let cols = m.first().map_or(0, |r| r.len());
    let get = |r: usize, c: usize| -> Result<f64, CellError> {
        match &m[r][c] {
            CellValue::Error(e) => Err(e.clone()),
            CellValue::Text(_) | CellValue::Empty | CellValue::Array(_) => Err(CellError::value()),
            other => to_number(other),
        }
    };
    if rows == n_obs {
        (0..cols)
            .map(|c| (0..rows).map(|r| get(r, c)).collect())
            .collect()
    } else if cols == n_obs {
        (0..rows)
            .map(|r| (0..cols).map(|c| get(r, c)).collect())
            .collect()
    } else {
        Err(CellError::reference().with_message("X does not match Y in length"))
    }
}

fn fit_from_args(
    args: &[ArgumentHandle],
    degree: Option<usize>,
) -> Result<(Fit, usize), CellError> {
    let y = numeric_vector(&args[0].matrix()?)?;
    let n = y.len();
    if n == 0 {
        return Err(CellError::reference());
    }

    let x_cols: Vec<Vec<f64>> = match args.get(1) {
        Some(h) if !h.scalar()?.is_blank() => predictor_columns(&h.matrix()?, n)?,
        _ => vec![(1..=n).map(|i| i as f64).collect()],
    };

    let with_const = match args.get(2) {
        Some(h) => {
            let v = h.scalar()?;
            v.is_blank() || crate::coercion::to_logical(&v)?
        }
        None => true,
    };

    let design: Vec<Vec<f64>> = match degree {
        Some(d) if d > 1 => {
            // Vandermonde over the single predictor: powers high to low
            if x_cols.len() != 1 {
                return Err(CellError::reference());
            }
            (0..n)
                .map(|row| {
                    let x = x_cols[0][row];
                    let mut r: Vec<f64> = Vec::with_capacity(d + 1);
                    if with_const {
                        r.push(1.0);
                    }
                    for p in 1..=d {
                        r.push(x.powi(p as i32));
                    }
                    r
                })
                .collect()
        }
        _ => (0..n)
            .map(|row| {
                let mut r = Vec::with_capacity(x_cols.len() + 1);
                if with_const {
                    r.push(1.0);
                }
                for col in &x_cols {
                    r.push(col[row]);
                }
                r
            })
            .collect(),
    };

    Ok((least_squares(design, y, with_const), n))
}

/* ─────────────────────────── LINEST et al ─────────────────────────── */

pub fn linest_fn(args: &[ArgumentHandle], ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let stats = match args.get(3) {
        Some(h) => {
            let v = h.scalar()?;
            !v.is_blank() && crate::coercion::to_logical(&v)?
        }
        None => false,
    };

    let run = ctx.linest_run();
    let degree = run.map(|(degree, _)| degree.max(1));
    let (fit, _) = fit_from_args(args, degree)?;

    if stats {
        return Ok(CellValue::Array(fit.stats_matrix()));
    }

    // inside a multi-cell run each cell picks its own coefficient
    if let Some((_, coef)) = run {
        let idx = coef.saturating_sub(1);
        return fit
            .coefs
            .get(idx)
            .map(|c| CellValue::Number(*c))
            .ok_or_else(CellError::na);
    }

    Ok(CellValue::Array(vec![
        fit.coefs.iter().map(|c| CellValue::Number(*c)).collect(),
    ]))
}

fn slope_intercept(args: &[ArgumentHandle]) -> Result<(f64, f64), CellError> {
    let (fit, _) = fit_from_args(&args[..2], None)?;
    if fit.coefs.len() != 2 {
        return Err(CellError::na());
    }
    if !fit.full_rank {
        return Err(CellError::div());
    }
    Ok((fit.coefs[0], fit.coefs[1]))
}

pub fn slope_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Number(slope_intercept(args)?.0))
}

pub fn intercept_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    Ok(CellValue::Number(slope_intercept(args)?.1))
}

/// FORECAST(x, known_y, known_x).
pub fn forecast_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let x = to_number(&args[0].scalar()?)?;
    let (m, b) = slope_intercept(&args[1..])?;
    Ok(CellValue::Number(m * x + b))
}

/// TREND(known_y, [known_x], [new_x], [const]).
pub fn trend_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let y = numeric_vector(&args[0].matrix()?)?;
    let n = y.len();
    if n == 0 {
        return Err(CellError::reference());
    }

    let x_cols: Vec<Vec<f64>> = match args.get(1) {
        Some(h) if !h.scalar()?.is_blank() => predictor_columns(&h.matrix()?, n)?,
        _ => vec![(1..=n).map(|i| i as f64).collect()],
    };
    let with_const = match args.get(3) {
        Some(h) => {
            let v = h.scalar()?;
            v.is_blank() || crate::coercion::to_logical(&v)?
        }
        None => true,
    };

    let design: Vec<Vec<f64>> = (0..n)
        .map(|row| {
            let mut r = Vec::with_capacity(x_cols.len() + 1);
            if with_const {
                r.push(1.0);
            }
            for col in &x_cols {
                r.push(col[row]);
            }
            r
        })
        .collect();
    let fit = least_squares(design, y, with_const);

    let k = fit.coefs.len() - 1; // predictor count

    let new_x: Matrix = match args.get(2) {
        Some(h) if !h.scalar()?.is_blank() => h.matrix()?,
        _ => match args.get(1) {
            Some(h) if !h.scalar()?.is_blank() => h.matrix()?,
            _ => (1..=n)
                .map(|i| vec![CellValue::Number(i as f64)])
                .collect(),
        },
    };

    let rows = new_x.len();
    let cols = new_x.first().map_or(0, |r| r.len());
    let b = *fit.coefs.last().unwrap_or(&0.0);
    let slopes: Vec<f64> = fit.coefs[..fit.coefs.len() - 1]
        .iter()
        .rev()
        .copied()
        .collect(); // back to column order m1..mk

    let predict = |xs: Vec<f64>| -> f64 {
        if !fit.full_rank {
            return b;
        }
        xs.iter().zip(&slopes).map(|(x, m)| x * m).sum::<f64>() + b
    };

    let numeric_at = |r: usize, c: usize| -> Result<f64, CellError> {
        to_number(&new_x[r][c])
    };

    if cols == k {
        let mut out = Vec::with_capacity(rows);
        for r in 0..rows {
            let xs: Result<Vec<f64>, _> = (0..cols).map(|c| numeric_at(r, c)).collect();
            out.push(vec![CellValue::Number(predict(xs?))]);
        }
        if out.len() == 1 {
            return Ok(out.into_iter().next().unwrap().into_iter().next().unwrap());
        }
        Ok(CellValue::Array(out))
    } else if rows == k {
        let mut out = Vec::with_capacity(cols);
        for c in 0..cols {
            let xs: Result<Vec<f64>, _> = (0..rows).map(|r| numeric_at(r, c)).collect();
            out.push(CellValue::Number(predict(xs?)));
        }
        if out.len() == 1 {
            return Ok(out.into_iter().next().unwrap());
        }
        Ok(CellValue::Array(vec![out]))
    } else {
        Err(CellError::reference())
    }
}

pub(super) fn register() {
    register_function(Arc::new(BuiltinFn::new("LARGE", 2, 2, large_fn)));
    register_function(Arc::new(BuiltinFn::new("SMALL", 2, 2, small_fn)));
    register_function(Arc::new(BuiltinFn::new("LINEST", 1, 4, linest_fn)));
    register_function(Arc::new(BuiltinFn::new("SLOPE", 2, 2, slope_fn)));
    register_function(Arc::new(BuiltinFn::new("INTERCEPT", 2, 2, intercept_fn)));
    register_function(Arc::new(BuiltinFn::new("FORECAST", 3, 3, forecast_fn)));
    register_function(Arc::new(BuiltinFn::new("TREND", 1, 4, trend_fn)));
}

#[cfg(test)]
mod tests {
    use crate::test_workbook::TestWorkbook;
    use sheetgraph_common::CellValue as V;

    fn eval(formula: &str) -> V {
        TestWorkbook::new().evaluate(formula)
    }

    fn num(formula: &str) -> f64 {
        match eval(formula) {
            V::Number(n) => n,
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn large_small() {
        assert_eq!(eval("=LARGE({5,1,4,2,3},2)"), V::Number(4.0));
        assert_eq!(eval("=SMALL({5,1,4,2,3},2)"), V::Number(2.0));
        // k rounds up
        assert_eq!(eval("=LARGE({5,1,4,2,3},1.2)"), V::Number(4.0));
        assert!(matches!(eval("=LARGE({1,2},3)"), V::Error(e) if e == "#NUM!"));
        assert!(matches!(eval("=SMALL({1,2},0)"), V::Error(e) if e == "#NUM!"));
    }

    #[test]
    fn linest_simple_line() {
        // y = 2x + 1 exactly
        match eval("=LINEST({3,5,7,9},{1,2,3,4})") {
            V::Array(rows) => {
                let row = &rows[0];
                match (&row[0], &row[1]) {
                    (V::Number(m), V::Number(b)) => {
                        assert!((m - 2.0).abs() < 1e-9);
                        assert!((b - 1.0).abs() < 1e-9);
                    }
                    other => panic!("unexpected: {other:?}"),
                }
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn linest_without_intercept() {
        match eval("=LINEST({2,4,6},{1,2,3},FALSE)") {
            V::Array(rows) => match (&rows[0][0], &rows[0][1]) {
                (V::Number(m), V::Number(b)) => {
                    assert!((m - 2.0).abs() < 1e-9);
                    assert_eq!(*b, 0.0);
                }
                other => panic!("unexpected: {other:?}"),
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn linest_stats_block() {
        match eval("=LINEST({3,5,7,9.1},{1,2,3,4},TRUE,TRUE)") {
            V::Array(rows) => {
                assert_eq!(rows.len(), 5);
                assert_eq!(rows[0].len(), 2);
                // r² of a nearly perfect line
                match &rows[2][0] {
                    V::Number(r2) => assert!(*r2 > 0.99),
                    other => panic!("unexpected: {other:?}"),
                }
                match &rows[3][1] {
                    V::Number(dof) => assert_eq!(*dof, 2.0),
                    other => panic!("unexpected: {other:?}"),
                }
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rank_deficient_returns_mean() {
        // constant X has no slope information
        match eval("=LINEST({1,2,3},{5,5,5})") {
            V::Array(rows) => match (&rows[0][0], &rows[0][1]) {
                (V::Number(m), V::Number(b)) => {
                    assert_eq!(*m, 0.0);
                    assert!((b - 2.0).abs() < 1e-9);
                }
                other => panic!("unexpected: {other:?}"),
            },
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(eval("=SLOPE({1,2,3},{5,5,5})"), V::Error(e) if e == "#DIV/0!"));
    }

    #[test]
    fn slope_intercept_forecast() {
        assert!((num("=SLOPE({3,5,7},{1,2,3})") - 2.0).abs() < 1e-9);
        assert!((num("=INTERCEPT({3,5,7},{1,2,3})") - 1.0).abs() < 1e-9);
        assert!((num("=FORECAST(10,{3,5,7},{1,2,3})") - 21.0).abs() < 1e-9);
    }

    #[test]
    fn trend_predicts() {
        assert!((num("=TREND({3,5,7},{1,2,3},10)") - 21.0).abs() < 1e-9);
        match eval("=TREND({3,5,7},{1,2,3},{4;5})") {
            V::Array(rows) => {
                match (&rows[0][0], &rows[1][0]) {
                    (V::Number(a), V::Number(b)) => {
                        assert!((a - 9.0).abs() < 1e-9);
                        assert!((b - 11.0).abs() < 1e-9);
                    }
                    other => panic!("unexpected: {other:?}"),
                }
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
