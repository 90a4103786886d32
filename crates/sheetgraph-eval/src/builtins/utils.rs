//! Shared argument plumbing for the builtin library: flattening,
//! numeric filtering, and the criteria mini-language used by the
//! `SUMIF`/`COUNTIF` family.

use regex::Regex;

use sheetgraph_common::{CellError, CellValue};

use crate::coercion::to_number;
use crate::interpreter::compare_scalars;
use crate::traits::ArgumentHandle;

/// Evaluate every argument and flatten arrays row-major into one list.
pub fn flatten_args(args: &[ArgumentHandle]) -> Result<Vec<CellValue>, CellError> {
    let mut out = Vec::new();
    for arg in args {
        match arg.value()? {
            CellValue::Array(rows) => out.extend(rows.into_iter().flatten()),
            v => out.push(v),
        }
    }
    Ok(out)
}

/// Numeric members of a flattened argument list. The first error
/// encountered propagates; text and blanks are ignored, booleans only
/// count when `keep_bools` is set.
pub fn numerics(values: Vec<CellValue>, keep_bools: bool) -> Result<Vec<f64>, CellError> {
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        match v {
            CellValue::Error(e) => return Err(e),
            CellValue::Number(n) => out.push(n),
            CellValue::Int(i) => out.push(i as f64),
            CellValue::Boolean(b) if keep_bools => out.push(if b { 1.0 } else { 0.0 }),
            _ => {}
        }
    }
    Ok(out)
}

/// One scalar argument coerced to a number.
pub fn num_arg(args: &[ArgumentHandle], idx: usize) -> Result<f64, CellError> {
    to_number(&args[idx].scalar()?)
}

/// An optional scalar argument with a default.
pub fn opt_num_arg(args: &[ArgumentHandle], idx: usize, default: f64) -> Result<f64, CellError> {
    match args.get(idx) {
        None => Ok(default),
        Some(h) => {
            let v = h.scalar()?;
            if v.is_blank() {
                Ok(default)
            } else {
                to_number(&v)
            }
        }
    }
}

/* ───────────────────────────── wildcards ──────────────────────────── */

/// Compile a `?`/`*` wildcard pattern into an anchored, case-insensitive
/// regex; `None` when the pattern contains no wildcards. `~?` and `~*`
/// escape the wildcard characters.
pub fn wildcard_regex(pattern: &str) -> Option<Regex> {
    if !pattern.contains('?') && !pattern.contains('*') {
        return None;
    }
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("(?i)^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '~' => match chars.next() {
                Some(esc @ ('?' | '*')) => out.push_str(&regex::escape(&esc.to_string())),
                Some(other) => out.push_str(&regex::escape(&other.to_string())),
                None => out.push_str("~"),
            },
            '?' => out.push('.'),
            '*' => out.push_str(".*"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

/* ───────────────────────────── criteria ───────────────────────────── */

/// A parsed selection criterion.
#[derive(Debug, Clone)]
pub enum Criteria {
    Eq(CellValue),
    Ne(CellValue),
    Gt(f64),
    Ge(f64),
    Lt(f64),
    Le(f64),
    Like(Regex),
    Blank,
}

/// Parse a criterion value: a literal means equality; a string may start
/// with a comparison operator; `?`/`*` wildcards apply to string
/// equality.
pub fn parse_criteria(v: &CellValue) -> Result<Criteria, CellError> {
    match v {
        CellValue::Error(e) => Err(e.clone()),
        CellValue::Empty => Ok(Criteria::Blank),
        CellValue::Text(s) => {
            let s = s.trim();
            for op in [">=", "<=", "<>", ">", "<", "="] {
                if let Some(rhs) = s.strip_prefix(op) {
                    let rhs = rhs.trim();
                    if let Ok(n) = rhs.parse::<f64>() {
                        return Ok(match op {
                            ">=" => Criteria::Ge(n),
                            "<=" => Criteria::Le(n),
                            ">" => Criteria::Gt(n),
                            "<" => Criteria::Lt(n),
                            "=" => Criteria::Eq(CellValue::Number(n)),
                            "<>" => Criteria::Ne(CellValue::Number(n)),
                            _ => unreachable!(),
                        });
                    }
                    let lit = CellValue::Text(rhs.to_string());
                    return Ok(match op {
                        "=" => match wildcard_regex(rhs) {
                            Some(re) => Criteria::Like(re),
                            None => Criteria::Eq(lit),
                        },
                        "<>" => Criteria::Ne(lit),
                        // ordered comparison against text degrades to
                        // equality on the whole criterion string
                        _ => Criteria::Eq(CellValue::Text(s.to_string())),
                    });
                }
            }
            if let Some(re) = wildcard_regex(s) {
                return Ok(Criteria::Like(re));
            }
            if s.eq_ignore_ascii_case("true") {
                return Ok(Criteria::Eq(CellValue::Boolean(true)));
            }
            if s.eq_ignore_ascii_case("false") {
                return Ok(Criteria::Eq(CellValue::Boolean(false)));
            }
            Ok(Criteria::Eq(CellValue::Text(s.to_string())))
        }
        other => Ok(Criteria::Eq(other.clone())),
    }
}

pub fn criteria_match(criteria: &Criteria, v: &CellValue) -> bool {
    use std::cmp::Ordering;
    match criteria {
        Criteria::Blank => v.is_blank(),
        Criteria::Eq(lit) => {
            if v.is_blank() || v.is_error() {
                return false;
            }
            same_family(lit, v) && compare_scalars(lit, v) == Ordering::Equal
        }
        Criteria::Ne(lit) => {
            if v.is_error() {
                return false;
            }
            v.is_blank() || !same_family(lit, v) || compare_scalars(lit, v) != Ordering::Equal
        }
        Criteria::Like(re) => match v {
            CellValue::Text(s) => re.is_match(s),
            _ => false,
        },
        Criteria::Gt(n) | Criteria::Ge(n) | Criteria::Lt(n) | Criteria::Le(n) => {
            let Some(x) = as_plain_number(v) else {
                return false;
            };
            match criteria {
                Criteria::Gt(_) => x > *n,
                Criteria::Ge(_) => x >= *n,
                Criteria::Lt(_) => x < *n,
                Criteria::Le(_) => x <= *n,
                _ => unreachable!(),
            }
        }
    }
}

fn as_plain_number(v: &CellValue) -> Option<f64> {
    match v {
        CellValue::Number(n) => Some(*n),
        CellValue::Int(i) => Some(*i as f64),
        _ => None,
    }
}

fn same_family(a: &CellValue, b: &CellValue) -> bool {
    use CellValue::*;
    matches!(
        (a, b),
        (Number(_) | Int(_), Number(_) | Int(_))
            | (Text(_), Text(_))
            | (Boolean(_), Boolean(_))
            | (Empty, Empty)
    )
}

/// Coordinates selected by a set of (range, criterion) pairs of equal
/// shape. A shape mismatch is a `#VALUE!` error.
pub fn ifs_coords(
    pairs: &[(Vec<Vec<CellValue>>, Criteria)],
) -> Result<Vec<(usize, usize)>, CellError> {
    let Some((first, _)) = pairs.first() else {
        return Ok(Vec::new());
    };
    let rows = first.len();
    let cols = first.first().map_or(0, |r| r.len());
    for (m, _) in pairs {
        if m.len() != rows || m.first().map_or(0, |r| r.len()) != cols {
            return Err(CellError::value().with_message("criteria ranges differ in shape"));
        }
    }
    let mut coords = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            let all = pairs
                .iter()
                .all(|(m, crit)| criteria_match(crit, &m[r][c]));
            if all {
                coords.push((r, c));
            }
        }
    }
    Ok(coords)
}
