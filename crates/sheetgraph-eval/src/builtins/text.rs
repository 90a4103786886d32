//! Text functions, including the `TEXT` number/datetime formatter.

use std::sync::Arc;

use sheetgraph_common::{CellError, CellValue, serial_to_hms, serial_to_ymd};

use super::datetime::{parse_date_text, parse_time_text};
use super::utils::{flatten_args, num_arg, opt_num_arg};
use crate::coercion::{to_number, to_text};
use crate::function::BuiltinFn;
use crate::registry::register_function;
use crate::traits::{ArgumentHandle, EvalContext};

fn text_arg(args: &[ArgumentHandle], idx: usize) -> Result<String, CellError> {
    let v = args[idx].scalar()?;
    if let CellValue::Error(e) = v {
        return Err(e);
    }
    Ok(to_text(&v))
}

/* ─────────────────────────── concatenation ────────────────────────── */

/// CONCAT flattens range arguments.
pub fn concat_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let mut out = String::new();
    for v in flatten_args(args)? {
        if let CellValue::Error(e) = v {
            return Err(e);
        }
        out.push_str(&to_text(&v));
    }
    Ok(CellValue::Text(out))
}

/// CONCATENATE accepts scalars only.
pub fn concatenate_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    let mut out = String::new();
    for arg in args {
        match arg.scalar()? {
            CellValue::Error(e) => return Err(e),
            CellValue::Array(_) => return Err(CellError::value()),
            v => out.push_str(&to_text(&v)),
        }
    }
    Ok(CellValue::Text(out))
}

/* ─────────────────────────── slicing ──────────────────────────────── */

pub fn left_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let text = text_arg(args, 0)?;
    let n = opt_num_arg(args, 1, 1.0)?;
    if n < 0.0 {
        return Err(CellError::value());
    }
    Ok(CellValue::Text(text.chars().take(n as usize).collect()))
}

pub fn right_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let text = text_arg(args, 0)?;
    let n = opt_num_arg(args, 1, 1.0)?;
    if n < 0.0 {
        return Err(CellError::value());
    }
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(n as usize);
    Ok(CellValue::Text(chars[start..].iter().collect()))
}

pub fn mid_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let text = text_arg(args, 0)?;
    let start = num_arg(args, 1)?;
    let num = num_arg(args, 2)?;
    if start < 1.0 || num < 0.0 {
        return Err(CellError::value());
    }
    let out: String = text
        .chars()
        .skip(start as usize - 1)
        .take(num as usize)
        .collect();
    Ok(CellValue::Text(out))
}

pub fn len_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Number(text_arg(args, 0)?.chars().count() as f64))
}

/* ─────────────────────────── case / space ─────────────────────────── */

pub fn lower_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Text(text_arg(args, 0)?.to_lowercase()))
}

pub fn upper_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Text(text_arg(args, 0)?.to_uppercase()))
}

/// Collapse every run of spaces to a single space.
pub fn trim_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let text = text_arg(args, 0)?;
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for c in text.chars() {
        if c == ' ' {
            if !last_space {
                out.push(c);
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    Ok(CellValue::Text(out))
}

/* ─────────────────────────── search / edit ────────────────────────── */

/// FIND: 1-indexed, case-sensitive, `#VALUE!` when absent.
pub fn find_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let needle = text_arg(args, 0)?;
    let haystack = text_arg(args, 1)?;
    let start = opt_num_arg(args, 2, 1.0)?;
    if start < 1.0 {
        return Err(CellError::value());
    }
    let chars: Vec<char> = haystack.chars().collect();
    let skip = start as usize - 1;
    if skip > chars.len() {
        return Err(CellError::value());
    }
    let tail: String = chars[skip..].iter().collect();
    match tail.find(&needle) {
        Some(byte_pos) => {
            let found_chars = tail[..byte_pos].chars().count();
            Ok(CellValue::Number((skip + found_chars + 1) as f64))
        }
        None => Err(CellError::value()),
    }
}

pub fn replace_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let old_text = text_arg(args, 0)?;
    let start = num_arg(args, 1)?;
    let num = num_arg(args, 2)?;
    let new_text = text_arg(args, 3)?;
    if start < 1.0 || num < 0.0 {
        return Err(CellError::value());
    }
    let chars: Vec<char> = old_text.chars().collect();
    let start = (start as usize - 1).min(chars.len());
    let end = (start + num as usize).min(chars.len());
    let mut out: String = chars[..start].iter().collect();
    out.push_str(&new_text);
    out.extend(&chars[end..]);
    Ok(CellValue::Text(out))
}

/// VALUE: strict numeric parse; booleans and unparseable text are
/// `#VALUE!`.
pub fn value_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    match args[0].scalar()? {
        CellValue::Error(e) => Err(e),
        CellValue::Boolean(_) => Err(CellError::value()),
        CellValue::Number(n) => Ok(CellValue::Number(n)),
        CellValue::Int(i) => Ok(CellValue::Number(i as f64)),
        CellValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(CellValue::Number)
            .map_err(|_| CellError::value()),
        _ => Err(CellError::value()),
    }
}

/* ─────────────────────────── TEXT formatter ───────────────────────── */

static MONTHS: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];
static WEEKDAYS: [&str; 7] = [
    "Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday",
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum FmtToken {
    Year(usize),
    MonthOrMinute(usize),
    Day(usize),
    Hour(usize),
    Second(usize),
    AmPm { single: bool },
    ElapsedHours,
    ElapsedMinutes,
    ElapsedSeconds,
    Literal(char),
}

fn scan_format(fmt: &str) -> Vec<FmtToken> {
    let chars: Vec<char> = fmt.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i].to_ascii_lowercase();
        match c {
            'a' => {
                let rest: String = chars[i..].iter().collect::<String>().to_ascii_lowercase();
                if rest.starts_with("am/pm") {
                    out.push(FmtToken::AmPm { single: false });
                    i += 5;
                    continue;
                }
                if rest.starts_with("a/p") {
                    out.push(FmtToken::AmPm { single: true });
                    i += 3;
                    continue;
                }
                out.push(FmtToken::Literal(chars[i]));
                i += 1;
            }
            '[' => {
                let rest: String = chars[i..].iter().collect::<String>().to_ascii_lowercase();
                let elapsed = [
                    ("[h]", FmtToken::ElapsedHours),
                    ("[m]", FmtToken::ElapsedMinutes),
                    ("[s]", FmtToken::ElapsedSeconds),
                ]
                .into_iter()
                .find(|(pat, _)| rest.starts_with(pat));
                match elapsed {
                    Some((pat, tok)) => {
                        out.push(tok);
                        i += pat.len();
                    }
                    None => {
                        out.push(FmtToken::Literal(chars[i]));
                        i += 1;
                    }
                }
            }
            'y' | 'm' | 'd' | 'h' | 's' => {
                let mut len = 0;
                while i + len < chars.len() && chars[i + len].to_ascii_lowercase() == c {
                    len += 1;
                }
                out.push(match c {
                    'y' => FmtToken::Year(len),
                    'm' => FmtToken::MonthOrMinute(len),
                    'd' => FmtToken::Day(len),
                    'h' => FmtToken::Hour(len),
                    's' => FmtToken::Second(len),
                    _ => unreachable!(),
                });
                i += len;
            }
            _ => {
                out.push(FmtToken::Literal(chars[i]));
                i += 1;
            }
        }
    }
    out
}

/// An `m` run means minutes when it sits next to a time token.
fn is_minute(tokens: &[FmtToken], idx: usize) -> bool {
    let prev_time = tokens[..idx].iter().rev().find_map(|t| match t {
        FmtToken::Hour(_) | FmtToken::ElapsedHours => Some(true),
        FmtToken::Year(_) | FmtToken::Day(_) => Some(false),
        _ => None,
    });
    if prev_time == Some(true) {
        return true;
    }
    let next_time = tokens[idx + 1..].iter().find_map(|t| match t {
        FmtToken::Second(_) | FmtToken::ElapsedSeconds => Some(true),
        FmtToken::Year(_) | FmtToken::Day(_) | FmtToken::MonthOrMinute(_) => Some(false),
        _ => None,
    });
    next_time == Some(true)
}

fn pad(n: u32, width: usize) -> String {
    format!("{n:0width$}")
}

fn format_datetime(serial: f64, fmt: &str) -> Result<String, CellError> {
    if serial < 0.0 {
        return Err(CellError::num());
    }
    let tokens = scan_format(fmt);
    let (year, month, day) = serial_to_ymd(serial.trunc() as i64);
    let (hour, minute, second) = serial_to_hms(serial);
    let twelve_hour = tokens.iter().any(|t| matches!(t, FmtToken::AmPm { .. }));

    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        match token {
            FmtToken::Year(len) => {
                if *len <= 2 {
                    out.push_str(&pad((year % 100) as u32, 2));
                } else {
                    out.push_str(&year.to_string());
                }
            }
            FmtToken::MonthOrMinute(len) => {
                if is_minute(&tokens, i) {
                    out.push_str(&pad(minute, (*len).min(2)));
                } else {
                    match len {
                        1 => out.push_str(&month.to_string()),
                        2 => out.push_str(&pad(month, 2)),
                        3 => out.push_str(&MONTHS[month as usize - 1][..3]),
                        5 => out.push_str(&MONTHS[month as usize - 1][..1]),
                        _ => out.push_str(MONTHS[month as usize - 1]),
                    }
                }
            }
            FmtToken::Day(len) => {
                let weekday = ((serial.trunc() as i64 - 1).rem_euclid(7)) as usize;
                match len {
                    1 => out.push_str(&day.to_string()),
                    2 => out.push_str(&pad(day, 2)),
                    3 => out.push_str(&WEEKDAYS[weekday][..3]),
                    _ => out.push_str(WEEKDAYS[weekday]),
                }
            }
            FmtToken::Hour(len) => {
                let h = if twelve_hour { (hour + 11) % 12 + 1 } else { hour };
                out.push_str(&pad(h, (*len).min(2)));
            }
            FmtToken::Second(len) => out.push_str(&pad(second, (*len).min(2))),
            FmtToken::AmPm { single } => {
                let am = hour < 12;
                out.push_str(match (single, am) {
                    (false, true) => "AM",
                    (false, false) => "PM",
                    (true, true) => "a",
                    (true, false) => "p",
                });
            }
            FmtToken::ElapsedHours => out.push_str(&format!("{}", serial.trunc() as i64 * 24 + hour as i64)),
            FmtToken::ElapsedMinutes => out.push_str(&format!(
                "{}",
                (serial.trunc() as i64 * 24 + hour as i64) * 60 + minute as i64
            )),
            FmtToken::ElapsedSeconds => out.push_str(&format!(
                "{}",
                ((serial.trunc() as i64 * 24 + hour as i64) * 60 + minute as i64) * 60
                    + second as i64
            )),
            FmtToken::Literal(c) => out.push(*c),
        }
    }
    Ok(out)
}

fn format_with_thousands(n: f64, decimals: usize, sep: bool) -> String {
    let formatted = format!("{n:.decimals$}");
    if !sep {
        return formatted;
    }
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (formatted, None),
    };
    let negative = int_part.starts_with('-');
    let digits: Vec<char> = int_part.trim_start_matches('-').chars().collect();
    let mut grouped = String::new();
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*c);
    }
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if let Some(f) = frac_part {
        out.push('.');
        out.push_str(&f);
    }
    out
}

fn looks_like_date_format(fmt: &str) -> bool {
    let lower = fmt.to_lowercase();
    !lower.contains('#')
        && !lower.contains('0')
        && lower.chars().any(|c| matches!(c, 'y' | 'm' | 'd' | 'h' | 's'))
}

/// TEXT(value, format): the datetime and placeholder-number subset of
/// the format language.
pub fn text_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let value = args[0].scalar()?;
    if let CellValue::Error(e) = value {
        return Err(e);
    }
    let fmt = match args[1].scalar()? {
        CellValue::Text(s) => s,
        CellValue::Error(e) => return Err(e),
        other => to_text(&other),
    };

    if looks_like_date_format(&fmt) {
        let serial = match &value {
            CellValue::Text(s) => {
                let from_text = s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .or_else(|| parse_date_text(s))
                    .or_else(|| parse_time_text(s));
                match from_text {
                    Some(n) => n,
                    None => return Ok(CellValue::Text(s.clone())),
                }
            }
            other => to_number(other)?,
        };
        return Ok(CellValue::Text(format_datetime(serial, &fmt)?));
    }

    if fmt.contains('#') || fmt.contains('0') || fmt.contains('%') {
        let mut n = to_number(&value)?;
        let is_pcnt = fmt.contains('%');
        if is_pcnt {
            n *= 100.0;
        }
        let thousand_sep = fmt.contains("#,#") || fmt.contains("0,0");
        let decimals = match fmt.find('.') {
            Some(pos) => fmt[pos..].matches('0').count(),
            None => 0,
        };
        let mut out = format_with_thousands(n, decimals, thousand_sep);
        if is_pcnt {
            out.push('%');
        }
        if let Some(first) = fmt.chars().next() {
            if !matches!(first, '#' | '.' | ',' | '0') {
                out.insert(0, first);
            }
        }
        return Ok(CellValue::Text(out));
    }

    Ok(CellValue::Text(to_text(&value)))
}

pub(super) fn register() {
    register_function(Arc::new(BuiltinFn::variadic("CONCAT", 1, concat_fn)));
    register_function(Arc::new(BuiltinFn::variadic("CONCATENATE", 1, concatenate_fn)));
    register_function(Arc::new(BuiltinFn::new("LEFT", 1, 2, left_fn)));
    register_function(Arc::new(BuiltinFn::new("RIGHT", 1, 2, right_fn)));
    register_function(Arc::new(BuiltinFn::new("MID", 3, 3, mid_fn)));
    register_function(Arc::new(BuiltinFn::new("LEN", 1, 1, len_fn)));
    register_function(Arc::new(BuiltinFn::new("LOWER", 1, 1, lower_fn)));
    register_function(Arc::new(BuiltinFn::new("UPPER", 1, 1, upper_fn)));
    register_function(Arc::new(BuiltinFn::new("TRIM", 1, 1, trim_fn)));
    register_function(Arc::new(BuiltinFn::new("FIND", 2, 3, find_fn)));
    register_function(Arc::new(BuiltinFn::new("REPLACE", 4, 4, replace_fn)));
    register_function(Arc::new(BuiltinFn::new("VALUE", 1, 1, value_fn)));
    register_function(Arc::new(BuiltinFn::new("TEXT", 2, 2, text_fn)));
}

#[cfg(test)]
mod tests {
    use crate::test_workbook::TestWorkbook;
    use sheetgraph_common::CellValue as V;

    fn eval(formula: &str) -> V {
        TestWorkbook::new().evaluate(formula)
    }

    fn text(formula: &str) -> String {
        match eval(formula) {
            V::Text(s) => s,
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn slicing() {
        assert_eq!(text("=LEFT(\"abcdef\",2)"), "ab");
        assert_eq!(text("=LEFT(\"abcdef\")"), "a");
        assert_eq!(text("=RIGHT(\"abcdef\",2)"), "ef");
        assert_eq!(text("=MID(\"abcdef\",2,3)"), "bcd");
        assert!(matches!(eval("=LEFT(\"x\",-1)"), V::Error(e) if e == "#VALUE!"));
        assert!(matches!(eval("=MID(\"x\",0,1)"), V::Error(e) if e == "#VALUE!"));
    }

    #[test]
    fn length_and_case() {
        assert_eq!(eval("=LEN(\"héllo\")"), V::Number(5.0));
        assert_eq!(eval("=LEN(123)"), V::Number(3.0));
        assert_eq!(text("=LOWER(\"AbC\")"), "abc");
        assert_eq!(text("=UPPER(\"AbC\")"), "ABC");
    }

    #[test]
    fn trim_collapses_runs() {
        assert_eq!(text("=TRIM(\" a   b  c \")"), " a b c ");
    }

    #[test]
    fn find_is_case_sensitive() {
        assert_eq!(eval("=FIND(\"b\",\"abcb\")"), V::Number(2.0));
        assert_eq!(eval("=FIND(\"b\",\"abcb\",3)"), V::Number(4.0));
        assert!(matches!(eval("=FIND(\"B\",\"abc\")"), V::Error(e) if e == "#VALUE!"));
    }

    #[test]
    fn replace_splices() {
        assert_eq!(text("=REPLACE(\"abcdef\",2,3,\"XY\")"), "aXYef");
    }

    #[test]
    fn value_strict() {
        assert_eq!(eval("=VALUE(\"2.5\")"), V::Number(2.5));
        assert!(matches!(eval("=VALUE(\"2.5x\")"), V::Error(e) if e == "#VALUE!"));
        assert!(matches!(eval("=VALUE(TRUE)"), V::Error(e) if e == "#VALUE!"));
    }

    #[test]
    fn concat_flattens_concatenate_rejects_arrays() {
        assert_eq!(text("=CONCAT(\"a\",{\"b\",\"c\"},1)"), "abc1");
        assert_eq!(text("=CONCATENATE(\"a\",\"b\",2)"), "ab2");
        assert!(matches!(eval("=CONCATENATE({\"a\",\"b\"})"), V::Error(e) if e == "#VALUE!"));
    }

    #[test]
    fn text_number_formats() {
        assert_eq!(text("=TEXT(1234.567,\"0.00\")"), "1234.57");
        assert_eq!(text("=TEXT(1234.567,\"#,##0.0\")"), "1,234.6");
        assert_eq!(text("=TEXT(0.285,\"0.0%\")"), "28.5%");
        assert_eq!(text("=TEXT(1234.567,\"$#,##0.00\")"), "$1,234.57");
    }

    #[test]
    fn text_date_formats() {
        // serial 39448 = 2008-01-01, a Tuesday
        assert_eq!(text("=TEXT(39448,\"yyyy-mm-dd\")"), "2008-01-01");
        assert_eq!(text("=TEXT(39448,\"d mmm yy\")"), "1 Jan 08");
        assert_eq!(text("=TEXT(39448,\"dddd\")"), "Tuesday");
        assert_eq!(text("=TEXT(39448.5,\"hh:mm:ss\")"), "12:00:00");
        assert_eq!(text("=TEXT(39448.75,\"h:mm AM/PM\")"), "6:00 PM");
    }

    #[test]
    fn text_passthrough() {
        assert_eq!(text("=TEXT(\"plain\",\"@\")"), "plain");
    }
}
