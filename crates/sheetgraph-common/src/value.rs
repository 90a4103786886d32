use chrono::{Datelike, Duration, NaiveDate};
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

use crate::CellError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/* ───────────────────── serial-date utilities ─────────────────────────
The 1900 date system:
  Serial 1  = 1900-01-01
  Serial 59 = 1900-02-28
  Serial 60 = 1900-02-29  (phantom – does not exist, but spreadsheets
                           have carried it since Lotus 1-2-3)
  Serial 61 = 1900-03-01
Base date = 1899-12-30 so that serials after the phantom day line up with
real calendar dates. Time is stored as fractional days.
------------------------------------------------------------------- */

/// Base date of the serial system. Serials ≥ 61 are `base + serial` days.
const SERIAL_BASE: NaiveDate = match NaiveDate::from_ymd_opt(1899, 12, 30) {
    Some(d) => d,
    None => unreachable!(),
};

/// The phantom 1900-02-29 serial number.
pub const LEAP_1900_SERIAL: i64 = 60;

/// First serial past the supported date window (9999-12-31).
pub const SERIAL_MAX: i64 = 2_958_466;

/// 1900 is a leap year as far as the serial system is concerned.
pub fn is_leap_year(year: i32) -> bool {
    year == 1900 || (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 31,
    }
}

/// Split an integral serial number into (year, month, day).
///
/// Serial 60 yields the phantom (1900, 2, 29); serial 0 yields the
/// conventional (1900, 1, 0) "day zero".
pub fn serial_to_ymd(serial: i64) -> (i32, u32, u32) {
    if serial == LEAP_1900_SERIAL {
        return (1900, 2, 29);
    }
    if serial == 0 {
        return (1900, 1, 0);
    }
    let mut days = serial;
    if serial < LEAP_1900_SERIAL {
        // before the phantom day the serial stream runs one ahead
        days += 1;
    }
    let date = SERIAL_BASE + Duration::days(days);
    (date.year(), date.month(), date.day())
}

/// Serial number for a real calendar date, honoring the phantom day.
/// Dates on or before 1900-02-28 are shifted down by one.
pub fn ymd_to_serial(year: i32, month: u32, day: u32) -> Option<i64> {
    if (year, month, day) == (1900, 2, 29) {
        return Some(LEAP_1900_SERIAL);
    }
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let mut serial = (date - SERIAL_BASE).num_days();
    if serial <= LEAP_1900_SERIAL {
        serial -= 1;
    }
    (serial >= 0).then_some(serial)
}

/// Split a fractional serial into (hours, minutes, seconds), with a small
/// bias so that values like 0.5 land exactly on 12:00:00.
pub fn serial_to_hms(serial: f64) -> (u32, u32, u32) {
    const EPS: f64 = 1e-6 / 86_400.0;
    let at_hours = ((serial + EPS).fract() * 24.0).max(0.0);
    let hours = at_hours.floor();
    let at_mins = (at_hours - hours) * 60.0;
    let mins = at_mins.floor();
    let secs = ((at_mins - mins) * 60.0 - 1.1e-6).round().max(0.0);
    (hours as u32 % 24, mins as u32, secs as u32)
}

/* ───────────────────────────── CellValue ──────────────────────────── */

/// An evaluated cell value as the interpreter and graph see it.
///
/// Dates and times are plain serial numbers here; the helpers above map
/// them to calendar fields where a function needs them.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Int(i64),
    Text(String),
    Boolean(bool),
    /// Row-major matrix; the value of a range node or array literal.
    Array(Vec<Vec<CellValue>>),
    /// Blank cell or omitted optional argument.
    Empty,
    Error(CellError),
}

impl Eq for CellValue {}

impl Hash for CellValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            CellValue::Number(n) => n.to_bits().hash(state),
            CellValue::Int(i) => i.hash(state),
            CellValue::Text(s) => s.hash(state),
            CellValue::Boolean(b) => b.hash(state),
            CellValue::Array(a) => a.hash(state),
            CellValue::Empty => state.write_u8(0),
            CellValue::Error(e) => e.hash(state),
        }
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Int(i) => write!(f, "{i}"),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Array(a) => write!(f, "{a:?}"),
            CellValue::Empty => write!(f, ""),
            CellValue::Error(e) => write!(f, "{e}"),
        }
    }
}

impl CellValue {
    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Numeric view used by arithmetic coercion: numbers, booleans and
    /// blanks convert; everything else does not.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            CellValue::Empty => Some(0.0),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            CellValue::Boolean(b) => *b,
            CellValue::Number(n) => *n != 0.0,
            CellValue::Int(i) => *i != 0,
            CellValue::Text(s) => !s.is_empty(),
            CellValue::Array(a) => !a.is_empty(),
            CellValue::Empty | CellValue::Error(_) => false,
        }
    }

    /// Collapse a 1x1 array to its single member. Larger arrays and
    /// scalars pass through unchanged.
    pub fn into_single(self) -> CellValue {
        match self {
            CellValue::Array(arr) => {
                if arr.len() == 1 && arr[0].len() == 1 {
                    arr.into_iter().next().unwrap().into_iter().next().unwrap()
                } else if arr.is_empty() || arr[0].is_empty() {
                    CellValue::Empty
                } else {
                    CellValue::Array(arr)
                }
            }
            other => other,
        }
    }
}

impl From<CellError> for CellValue {
    fn from(error: CellError) -> Self {
        CellValue::Error(error)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        CellValue::Int(i)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Boolean(b)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_pins() {
        // the magic serials every 1900-system implementation must agree on
        assert_eq!(ymd_to_serial(1900, 1, 1), Some(1));
        assert_eq!(ymd_to_serial(1900, 2, 28), Some(59));
        assert_eq!(ymd_to_serial(1900, 2, 29), Some(60));
        assert_eq!(ymd_to_serial(1900, 3, 1), Some(61));
        assert_eq!(ymd_to_serial(2008, 1, 1), Some(39448));
        assert_eq!(ymd_to_serial(9999, 12, 31), Some(SERIAL_MAX - 1));
    }

    #[test]
    fn serial_round_trip() {
        for serial in [1, 59, 60, 61, 365, 39448, 42000] {
            let (y, m, d) = serial_to_ymd(serial);
            assert_eq!(ymd_to_serial(y, m, d), Some(serial), "serial {serial}");
        }
    }

    #[test]
    fn leap_1900() {
        assert!(is_leap_year(1900));
        assert!(is_leap_year(2000));
        assert!(!is_leap_year(1901));
        assert!(!is_leap_year(2100));
        assert_eq!(serial_to_ymd(60), (1900, 2, 29));
    }

    #[test]
    fn hms_split() {
        assert_eq!(serial_to_hms(0.5), (12, 0, 0));
        assert_eq!(serial_to_hms(0.75), (18, 0, 0));
        let (h, m, s) = serial_to_hms(2.0 / 24.0 + 24.0 / 1440.0);
        assert_eq!((h, m, s), (2, 24, 0));
    }

    #[test]
    fn single_collapse() {
        let arr = CellValue::Array(vec![vec![CellValue::Int(7)]]);
        assert_eq!(arr.into_single(), CellValue::Int(7));
        let wide = CellValue::Array(vec![vec![CellValue::Int(1), CellValue::Int(2)]]);
        assert!(matches!(wide.into_single(), CellValue::Array(_)));
    }
}
