//! Logical functions. `IF`, `IFERROR` and `IFNA` are the short-circuit
//! points of the library: the untaken branch is never evaluated.

use std::sync::Arc;

use sheetgraph_common::{CellError, CellValue, ErrorKind};

use super::utils::flatten_args;
use crate::function::BuiltinFn;
use crate::registry::register_function;
use crate::traits::{ArgumentHandle, EvalContext};

/// Clean a single condition value: errors pass through, the strings
/// TRUE/FALSE convert, other text is `#VALUE!`, blank is FALSE.
fn clean_logical(v: &CellValue) -> Result<bool, CellError> {
    match v {
        CellValue::Error(e) => Err(e.clone()),
        CellValue::Boolean(b) => Ok(*b),
        CellValue::Number(n) => Ok(*n != 0.0),
        CellValue::Int(i) => Ok(*i != 0),
        CellValue::Empty => Ok(false),
        CellValue::Text(s) => {
            if s.eq_ignore_ascii_case("true") {
                Ok(true)
            } else if s.eq_ignore_ascii_case("false") {
                Ok(false)
            } else {
                Err(CellError::value().with_message(format!("'{s}' is not a condition")))
            }
        }
        CellValue::Array(_) => Err(CellError::value().with_message("array condition")),
    }
}

/// Flatten the arguments of a many-valued logical; the first error wins,
/// text and blanks are ignored, nothing left is `#VALUE!`.
fn clean_logicals(args: &[ArgumentHandle]) -> Result<Vec<bool>, CellError> {
    let values = flatten_args(args)?;
    if let Some(CellValue::Error(e)) = values.iter().find(|v| v.is_error()) {
        return Err(e.clone());
    }
    let bools: Vec<bool> = values
        .iter()
        .filter_map(|v| match v {
            CellValue::Boolean(b) => Some(*b),
            CellValue::Number(n) => Some(*n != 0.0),
            CellValue::Int(i) => Some(*i != 0),
            _ => None,
        })
        .collect();
    if bools.is_empty() {
        return Err(CellError::value().with_message("no logical values"));
    }
    Ok(bools)
}

/* ─────────────────────────── IF family ────────────────────────────── */

/// IF(cond, then, else = 0): only the taken branch is evaluated.
pub fn if_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let cond = match clean_logical(&args[0].scalar()?) {
        Ok(b) => b,
        Err(e) => return Ok(CellValue::Error(e)),
    };
    if cond {
        args[1].value()
    } else if let Some(else_arg) = args.get(2) {
        else_arg.value()
    } else {
        Ok(CellValue::Number(0.0))
    }
}

pub fn iferror_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    match args[0].value() {
        Ok(CellValue::Error(_)) | Err(_) => args[1].value(),
        Ok(v) => Ok(v),
    }
}

pub fn ifna_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    match args[0].value() {
        Ok(CellValue::Error(e)) | Err(e) if e.kind == ErrorKind::Na => args[1].value(),
        Ok(v) => Ok(v),
        Err(e) => Ok(CellValue::Error(e)),
    }
}

/// IFS(cond1, value1, ...): first true condition wins, none is `#N/A`.
pub fn ifs_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    if args.len() % 2 != 0 {
        return Err(CellError::na());
    }
    for pair in args.chunks(2) {
        match clean_logical(&pair[0].scalar()?) {
            Ok(true) => return pair[1].value(),
            Ok(false) => {}
            Err(e) => return Ok(CellValue::Error(e)),
        }
    }
    Err(CellError::na())
}

/* ─────────────────────────── reductions ───────────────────────────── */

pub fn and_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Boolean(clean_logicals(args)?.iter().all(|b| *b)))
}

pub fn or_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Boolean(clean_logicals(args)?.iter().any(|b| *b)))
}

pub fn xor_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let count = clean_logicals(args)?.iter().filter(|b| **b).count();
    Ok(CellValue::Boolean(count % 2 == 1))
}

pub fn not_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    match clean_logical(&args[0].scalar()?) {
        Ok(b) => Ok(CellValue::Boolean(!b)),
        Err(e) => Ok(CellValue::Error(e)),
    }
}

pub fn true_fn(_args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Boolean(true))
}

pub fn false_fn(_args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    Ok(CellValue::Boolean(false))
}

pub(super) fn register() {
    register_function(Arc::new(BuiltinFn::new("IF", 2, 3, if_fn)));
    register_function(Arc::new(BuiltinFn::new("IFERROR", 2, 2, iferror_fn)));
    register_function(Arc::new(BuiltinFn::new("IFNA", 2, 2, ifna_fn)));
    register_function(Arc::new(BuiltinFn::variadic("IFS", 2, ifs_fn)));
    register_function(Arc::new(BuiltinFn::variadic("AND", 1, and_fn)));
    register_function(Arc::new(BuiltinFn::variadic("OR", 1, or_fn)));
    register_function(Arc::new(BuiltinFn::variadic("XOR", 1, xor_fn)));
    register_function(Arc::new(BuiltinFn::new("NOT", 1, 1, not_fn)));
    register_function(Arc::new(BuiltinFn::new("TRUE", 0, 0, true_fn)));
    register_function(Arc::new(BuiltinFn::new("FALSE", 0, 0, false_fn)));
}

#[cfg(test)]
mod tests {
    use crate::test_workbook::TestWorkbook;
    use sheetgraph_common::CellValue as V;

    fn eval(formula: &str) -> V {
        TestWorkbook::new().evaluate(formula)
    }

    #[test]
    fn if_branches() {
        assert_eq!(eval("=IF(1<2,\"yes\",\"no\")"), V::Text("yes".into()));
        assert_eq!(eval("=IF(FALSE,\"yes\",\"no\")"), V::Text("no".into()));
        // missing else defaults to 0
        assert_eq!(eval("=IF(FALSE,\"yes\")"), V::Number(0.0));
    }

    #[test]
    fn if_short_circuits_untaken_branch() {
        // the untaken branch divides by zero and must never run
        assert_eq!(eval("=IF(TRUE,1,1/0)"), V::Number(1.0));
        assert_eq!(eval("=IF(FALSE,1/0,2)"), V::Number(2.0));
    }

    #[test]
    fn if_error_condition_propagates() {
        assert!(matches!(eval("=IF(#REF!,1,2)"), V::Error(e) if e == "#REF!"));
        assert!(matches!(eval("=IF(\"bogus\",1,2)"), V::Error(e) if e == "#VALUE!"));
    }

    #[test]
    fn iferror_absorbs() {
        assert_eq!(eval("=IFERROR(1/0,42)"), V::Number(42.0));
        assert_eq!(eval("=IFERROR(7,42)"), V::Number(7.0));
        assert_eq!(eval("=IFNA(#N/A,\"x\")"), V::Text("x".into()));
        assert!(matches!(eval("=IFNA(#REF!,\"x\")"), V::Error(e) if e == "#REF!"));
    }

    #[test]
    fn ifs_first_match() {
        assert_eq!(eval("=IFS(FALSE,1,TRUE,2,TRUE,3)"), V::Number(2.0));
        assert!(matches!(eval("=IFS(FALSE,1)"), V::Error(e) if e == "#N/A"));
    }

    #[test]
    fn and_or_xor_not() {
        assert_eq!(eval("=AND(TRUE,1,2)"), V::Boolean(true));
        assert_eq!(eval("=AND(TRUE,0)"), V::Boolean(false));
        assert_eq!(eval("=OR(FALSE,0,3)"), V::Boolean(true));
        assert_eq!(eval("=XOR(TRUE,TRUE,TRUE)"), V::Boolean(true));
        assert_eq!(eval("=XOR(TRUE,TRUE)"), V::Boolean(false));
        assert_eq!(eval("=NOT(0)"), V::Boolean(true));
    }

    #[test]
    fn logical_error_propagation() {
        assert!(matches!(eval("=AND(TRUE,#NUM!)"), V::Error(e) if e == "#NUM!"));
        assert!(matches!(eval("=OR({1,#N/A})"), V::Error(e) if e == "#N/A"));
        // text-only input leaves nothing to reduce
        assert!(matches!(eval("=AND(\"x\")"), V::Error(e) if e == "#VALUE!"));
    }
}
