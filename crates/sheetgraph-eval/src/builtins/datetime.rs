//! Date and time functions over serial numbers.
//!
//! Day 1 = 1900-01-01 and day 60 = the fictitious 1900-02-29, kept for
//! compatibility with the historical serial system. Dates and times are
//! plain numbers everywhere; only these functions read calendar fields
//! out of them.

use std::sync::Arc;

use chrono::NaiveDate;

use sheetgraph_common::{
    CellError, CellValue, SERIAL_MAX, days_in_month, is_leap_year, serial_to_hms, serial_to_ymd,
    ymd_to_serial,
};

use crate::coercion::to_number;
use crate::function::BuiltinFn;
use crate::registry::register_function;
use crate::traits::{ArgumentHandle, EvalContext};

/// Carry out-of-range months into years and out-of-range days into
/// months, walking month by month with real per-month day counts.
fn normalize_ymd(mut y: i32, mut m: i32, mut d: i32) -> (i32, u32, u32) {
    if !(1..=12).contains(&m) {
        let carry = (m - 1).div_euclid(12);
        y += carry;
        m -= carry * 12;
    }
    while d <= 0 {
        m -= 1;
        if m == 0 {
            y -= 1;
            m = 12;
        }
        d += days_in_month(y, m as u32) as i32;
    }
    loop {
        let max = days_in_month(y, m as u32) as i32;
        if d <= max {
            break;
        }
        d -= max;
        m += 1;
        if m > 12 {
            y += 1;
            m = 1;
        }
    }
    (y, m as u32, d as u32)
}

fn serial_from_parts(y: i32, m: i32, d: i32) -> Result<f64, CellError> {
    let (y, m, d) = normalize_ymd(y, m, d);
    match ymd_to_serial(y, m, d) {
        Some(serial) if serial >= 0 => Ok(serial as f64),
        _ => Err(CellError::num()),
    }
}

fn int_arg(args: &[ArgumentHandle], idx: usize) -> Result<i64, CellError> {
    let v = args[idx].scalar()?;
    if matches!(v, CellValue::Boolean(_)) {
        return Err(CellError::value());
    }
    Ok(to_number(&v)?.floor() as i64)
}

fn serial_arg(args: &[ArgumentHandle], idx: usize) -> Result<f64, CellError> {
    let serial = to_number(&args[idx].scalar()?)?;
    if serial < 0.0 {
        return Err(CellError::num());
    }
    Ok(serial)
}

/// A serial or a time-of-day string.
fn time_arg(args: &[ArgumentHandle], idx: usize) -> Result<f64, CellError> {
    match args[idx].scalar()? {
        CellValue::Error(e) => Err(e),
        CellValue::Text(s) => match s.trim().parse::<f64>().ok().or_else(|| parse_time_text(&s)) {
            Some(n) if n >= 0.0 => Ok(n),
            Some(_) => Err(CellError::num()),
            None => Err(CellError::value()),
        },
        other => {
            let n = to_number(&other)?;
            if n < 0.0 {
                return Err(CellError::num());
            }
            Ok(n)
        }
    }
}

/* ───────────────────────── text parsing helpers ───────────────────── */

/// Parse a date string in one of the supported fixed formats; the
/// phantom leap day is accepted literally.
pub(crate) fn parse_date_text(s: &str) -> Option<f64> {
    let s = s.trim();
    for phantom in ["1900-02-29", "1900/02/29", "2/29/1900", "29/2/1900"] {
        if s == phantom {
            return Some(60.0);
        }
    }
    static FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%m/%d/%Y",
        "%m/%d/%y",
        "%d-%b-%Y",
        "%d %B %Y",
    ];
    for fmt in FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            use chrono::Datelike;
            let serial = ymd_to_serial(date.year(), date.month(), date.day())?;
            if serial >= 1 {
                return Some(serial as f64);
            }
        }
    }
    None
}

/// Parse `hh:mm`, `hh:mm:ss` and the am/pm variants into a day fraction.
pub(crate) fn parse_time_text(s: &str) -> Option<f64> {
    let lower = s.trim().to_lowercase();
    let (body, meridian) = if let Some(stripped) = lower.strip_suffix("pm") {
        (stripped.trim(), Some('p'))
    } else if let Some(stripped) = lower.strip_suffix("am") {
        (stripped.trim(), Some('a'))
    } else {
        (lower.as_str(), None)
    };

    let fields: Vec<&str> = body.split(':').map(str::trim).collect();
    let (h, m, sec) = match fields.as_slice() {
        [h, m] => (h, m, "0"),
        [h, m, s] => (h, m, *s),
        _ => return None,
    };
    let h: f64 = h.parse().ok()?;
    let m: f64 = m.parse().ok()?;
    let sec: f64 = sec.parse().ok()?;
    if h > 23.0 || m > 59.0 || sec >= 60.0 {
        return None;
    }

    let mut h = h;
    if let Some(p) = meridian {
        if h > 12.0 {
            return None;
        }
        if h == 12.0 {
            h = 0.0;
        }
        if p == 'p' {
            h += 12.0;
        }
    }
    Some(((h * 60.0 + m) * 60.0 + sec) / 86_400.0)
}

/* ─────────────────────────── calendar functions ───────────────────── */

/// DATE(year, month, day) with carry normalization; years below 1900
/// are offsets from 1900.
pub fn date_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let mut year = int_arg(args, 0)?;
    let month = int_arg(args, 1)?;
    let day = int_arg(args, 2)?;
    if !(0..=9999).contains(&year) {
        return Err(CellError::num());
    }
    if year < 1900 {
        year += 1900;
    }
    Ok(CellValue::Number(serial_from_parts(
        year as i32,
        month as i32,
        day as i32,
    )?))
}

pub fn day_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let serial = serial_arg(args, 0)?;
    Ok(CellValue::Number(serial_to_ymd(serial.floor() as i64).2 as f64))
}

pub fn month_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let serial = serial_arg(args, 0)?;
    Ok(CellValue::Number(serial_to_ymd(serial.floor() as i64).1 as f64))
}

pub fn year_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let serial = serial_arg(args, 0)?;
    Ok(CellValue::Number(serial_to_ymd(serial.floor() as i64).0 as f64))
}

/// WEEKDAY with the default Sunday=1 mapping.
pub fn weekday_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let serial = serial_arg(args, 0)?;
    let day = (serial.floor() as i64 - 1).rem_euclid(7) + 1;
    Ok(CellValue::Number(day as f64))
}

pub fn hour_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Number(serial_to_hms(time_arg(args, 0)?).0 as f64))
}

pub fn minute_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Number(serial_to_hms(time_arg(args, 0)?).1 as f64))
}

pub fn second_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Number(serial_to_hms(time_arg(args, 0)?).2 as f64))
}

fn months_inc(args: &[ArgumentHandle], eomonth: bool) -> Result<CellValue, CellError> {
    let start = args[0].scalar()?;
    let months = args[1].scalar()?;
    if matches!(start, CellValue::Boolean(_)) || matches!(months, CellValue::Boolean(_)) {
        return Err(CellError::value());
    }
    let start = to_number(&start)?;
    let months = to_number(&months)?.trunc() as i32;
    if start < 0.0 {
        return Err(CellError::num());
    }
    let (y, m, d) = serial_to_ymd(start.floor() as i64);
    let serial = if eomonth {
        serial_from_parts(y, m as i32 + months + 1, 1)? - 1.0
    } else {
        serial_from_parts(y, m as i32 + months, d as i32)?
    };
    Ok(CellValue::Number(serial))
}

pub fn edate_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    months_inc(args, false)
}

pub fn eomonth_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    months_inc(args, true)
}

pub fn datevalue_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    match args[0].scalar()? {
        CellValue::Error(e) => Err(e),
        CellValue::Text(s) => match parse_date_text(&s) {
            Some(serial) => Ok(CellValue::Number(serial)),
            None => Err(CellError::value()),
        },
        _ => Err(CellError::value()),
    }
}

pub fn timevalue_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    match args[0].scalar()? {
        CellValue::Error(e) => Err(e),
        CellValue::Text(s) => match parse_time_text(&s) {
            Some(serial) => Ok(CellValue::Number(serial)),
            None => Err(CellError::value()),
        },
        _ => Err(CellError::value()),
    }
}

/* ─────────────────────────── YEARFRAC ─────────────────────────────── */

fn yearfrac_basis_0(beg: (i32, u32, u32), end: (i32, u32, u32)) -> f64 {
    let (y1, m1, mut d1) = beg;
    let (y2, m2, mut d2) = end;

    if d1 == 31 {
        d1 = 30;
        if d2 == 31 {
            d2 = 30;
        }
    } else if d1 == 30 && d2 == 31 {
        d2 = 30;
    } else if m1 == 2 && d1 == days_in_month(y1, 2) {
        d1 = 30;
        if m2 == 2 && d2 == days_in_month(y2, 2) {
            d2 = 30;
        }
    }

    let days = (d2 as i64 + m2 as i64 * 30 + y2 as i64 * 360)
        - (d1 as i64 + m1 as i64 * 30 + y1 as i64 * 360);
    days as f64 / 360.0
}

fn yearfrac_basis_1(
    beg_serial: i64,
    end_serial: i64,
    beg: (i32, u32, u32),
    end: (i32, u32, u32),
) -> f64 {
    let delta = (end_serial - beg_serial) as f64;
    if delta <= 365.0 {
        let feb29 = |y: i32| ymd_to_serial(y, 2, 29);
        let straddles_beg = is_leap_year(beg.0)
            && feb29(beg.0).is_some_and(|leap| beg_serial <= leap);
        let straddles_end = is_leap_year(end.0)
            && feb29(end.0).is_some_and(|leap| end_serial >= leap);
        let denom = if straddles_beg || straddles_end || (is_leap_year(beg.0) && is_leap_year(end.0))
        {
            366.0
        } else {
            365.0
        };
        delta / denom
    } else {
        let mut total = 0.0;
        let years = (beg.0..=end.0).count() as f64;
        for y in beg.0..=end.0 {
            total += if is_leap_year(y) { 366.0 } else { 365.0 };
        }
        delta / (total / years)
    }
}

pub fn yearfrac_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let basis_value = match args.get(2) {
        None => CellValue::Number(0.0),
        Some(h) => h.scalar()?,
    };
    if matches!(basis_value, CellValue::Boolean(_) | CellValue::Text(_)) {
        return Err(CellError::value());
    }
    let basis = if basis_value.is_blank() {
        0
    } else {
        to_number(&basis_value)?.trunc() as i64
    };
    if !(0..=4).contains(&basis) {
        return Err(CellError::num());
    }

    let mut start = to_number(&args[0].scalar()?)?;
    let mut end = to_number(&args[1].scalar()?)?;
    if !(0.0..SERIAL_MAX as f64).contains(&start) || !(0.0..SERIAL_MAX as f64).contains(&end) {
        return Err(CellError::num());
    }
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }

    let beg_serial = start.floor() as i64;
    let end_serial = end.floor() as i64;
    let beg = serial_to_ymd(beg_serial);
    let end_ymd = serial_to_ymd(end_serial);

    let result = match basis {
        0 => yearfrac_basis_0(beg, end_ymd),
        1 => yearfrac_basis_1(beg_serial, end_serial, beg, end_ymd),
        2 => (end_serial - beg_serial) as f64 / 360.0,
        3 => (end_serial - beg_serial) as f64 / 365.0,
        _ => {
            let d1 = beg.2.min(30);
            let d2 = end_ymd.2.min(30);
            let days = 360 * (end_ymd.0 as i64 - beg.0 as i64)
                + 30 * (end_ymd.1 as i64 - beg.1 as i64)
                + (d2 as i64 - d1 as i64);
            days as f64 / 360.0
        }
    };
    Ok(CellValue::Number(result))
}

pub(super) fn register() {
    register_function(Arc::new(BuiltinFn::new("DATE", 3, 3, date_fn)));
    register_function(Arc::new(BuiltinFn::new("DAY", 1, 1, day_fn)));
    register_function(Arc::new(BuiltinFn::new("MONTH", 1, 1, month_fn)));
    register_function(Arc::new(BuiltinFn::new("YEAR", 1, 1, year_fn)));
    register_function(Arc::new(BuiltinFn::new("WEEKDAY", 1, 1, weekday_fn)));
    register_function(Arc::new(BuiltinFn::new("HOUR", 1, 1, hour_fn)));
    register_function(Arc::new(BuiltinFn::new("MINUTE", 1, 1, minute_fn)));
    register_function(Arc::new(BuiltinFn::new("SECOND", 1, 1, second_fn)));
    register_function(Arc::new(BuiltinFn::new("EDATE", 2, 2, edate_fn)));
    register_function(Arc::new(BuiltinFn::new("EOMONTH", 2, 2, eomonth_fn)));
    register_function(Arc::new(BuiltinFn::new("DATEVALUE", 1, 1, datevalue_fn)));
    register_function(Arc::new(BuiltinFn::new("TIMEVALUE", 1, 1, timevalue_fn)));
    register_function(Arc::new(BuiltinFn::new("YEARFRAC", 2, 3, yearfrac_fn)));
}
