//! Scalar coercion rules shared by the interpreter and the builtins.

use sheetgraph_common::{CellError, CellValue};

/// Render a number the way a cell displays it: integral values drop the
/// fractional point entirely.
pub fn format_number(n: f64) -> String {
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Numeric coercion for arithmetic: blanks are 0, booleans are 0/1,
/// numeric text parses, everything else is `#VALUE!`.
pub fn to_number(v: &CellValue) -> Result<f64, CellError> {
    match v {
        CellValue::Number(n) => Ok(*n),
        CellValue::Int(i) => Ok(*i as f64),
        CellValue::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        CellValue::Empty => Ok(0.0),
        CellValue::Text(s) => s.trim().parse::<f64>().map_err(|_| {
            CellError::value().with_message(format!("cannot convert '{s}' to number"))
        }),
        CellValue::Error(e) => Err(e.clone()),
        _ => Err(CellError::value().with_message("expected a number")),
    }
}

/// Integer coercion: numeric coercion followed by truncation toward zero.
pub fn to_int(v: &CellValue) -> Result<i64, CellError> {
    Ok(to_number(v)?.trunc() as i64)
}

/// Display coercion used by `&` and the text functions.
pub fn to_text(v: &CellValue) -> String {
    match v {
        CellValue::Text(s) => s.clone(),
        CellValue::Number(n) => format_number(*n),
        CellValue::Int(i) => i.to_string(),
        CellValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        CellValue::Error(e) => e.to_string(),
        CellValue::Empty => String::new(),
        CellValue::Array(_) => "#VALUE!".to_string(),
    }
}

/// Logical coercion: errors pass through, the strings TRUE/FALSE count,
/// blanks are false, numbers are non-zero tests, other text is `#VALUE!`.
pub fn to_logical(v: &CellValue) -> Result<bool, CellError> {
    match v {
        CellValue::Error(e) => Err(e.clone()),
        CellValue::Boolean(b) => Ok(*b),
        CellValue::Empty => Ok(false),
        CellValue::Number(n) => Ok(*n != 0.0),
        CellValue::Int(i) => Ok(*i != 0),
        CellValue::Text(s) => {
            if s.eq_ignore_ascii_case("true") {
                Ok(true)
            } else if s.eq_ignore_ascii_case("false") {
                Ok(false)
            } else {
                Err(CellError::value().with_message(format!("'{s}' is not a logical value")))
            }
        }
        CellValue::Array(_) => Err(CellError::value().with_message("expected a logical value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_render_like_cells() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-3.0), "-3");
    }

    #[test]
    fn coercions() {
        assert_eq!(to_number(&CellValue::Text(" 4.5 ".into())).unwrap(), 4.5);
        assert_eq!(to_number(&CellValue::Empty).unwrap(), 0.0);
        assert!(to_number(&CellValue::Text("abc".into())).is_err());
        assert_eq!(to_text(&CellValue::Number(7.0)), "7");
        assert_eq!(to_text(&CellValue::Boolean(true)), "TRUE");
        assert!(to_logical(&CellValue::Text("TRUE".into())).unwrap());
        assert!(to_logical(&CellValue::Text("yes".into())).is_err());
    }
}
