//! Engineering functions: base conversions among bin/oct/hex/dec and
//! the bitwise family.
//!
//! The conversions use a signed 10-digit window in each base, i.e. a
//! two's-complement representation with sign masks 0x200, 0x2000_0000
//! and 0x80_0000_0000 for bases 2, 8 and 16.

use std::sync::Arc;

use sheetgraph_common::{CellError, CellValue};

use crate::coercion::to_number;
use crate::function::BuiltinFn;
use crate::registry::register_function;
use crate::traits::{ArgumentHandle, EvalContext};

fn sign_mask(base: u32) -> i64 {
    match base {
        2 => 0x200,
        8 => 0x2000_0000,
        _ => 0x80_0000_0000,
    }
}

/// Render a non-negative integer in the given base, uppercase.
fn to_radix(mut v: i64, base: u32) -> String {
    debug_assert!(v >= 0);
    if v == 0 {
        return "0".to_string();
    }
    let digits = b"0123456789ABCDEF";
    let mut out = Vec::new();
    while v > 0 {
        out.push(digits[(v % base as i64) as usize]);
        v /= base as i64;
    }
    out.reverse();
    String::from_utf8(out).expect("radix digits are ascii")
}

/// The digit-string view of a conversion input: blanks read as "0",
/// integral numbers read as their decimal digit string.
fn digit_string(v: &CellValue) -> Result<String, CellError> {
    match v {
        CellValue::Error(e) => Err(e.clone()),
        CellValue::Boolean(_) => Err(CellError::value()),
        CellValue::Empty => Ok("0".to_string()),
        CellValue::Text(s) => Ok(s.trim().to_string()),
        CellValue::Number(n) => {
            if n.fract() != 0.0 {
                Err(CellError::num())
            } else {
                Ok(format!("{}", *n as i64))
            }
        }
        CellValue::Int(i) => Ok(i.to_string()),
        CellValue::Array(_) => Err(CellError::value()),
    }
}

/// Interpret a digit string in `base`, folding the sign window.
fn base_to_dec(v: &CellValue, base: u32) -> Result<i64, CellError> {
    let text = digit_string(v)?;
    if text.is_empty() || text.len() > 10 {
        return Err(CellError::num());
    }
    let parsed = i64::from_str_radix(&text, base).map_err(|_| CellError::num())?;
    if parsed < 0 {
        return Err(CellError::num());
    }
    let mask = sign_mask(base);
    Ok((parsed & !mask) - (parsed & mask))
}

/// Render a decimal value in `base` within the signed window,
/// optionally zero-padded to `places`.
fn dec_to_base(value: i64, places: Option<&CellValue>, base: u32) -> Result<String, CellError> {
    let mask = sign_mask(base);
    if !(-mask..mask).contains(&value) {
        return Err(CellError::num());
    }
    let unsigned = if value < 0 { value + (mask << 1) } else { value };
    let rendered = to_radix(unsigned, base);

    match places {
        None => Ok(rendered),
        Some(p) => {
            if p.is_blank() {
                return Ok(rendered);
            }
            let places = to_number(p)?.trunc() as i64;
            if places < rendered.len() as i64 {
                return Err(CellError::num());
            }
            Ok(format!(
                "{}{}",
                "0".repeat((places as usize).saturating_sub(rendered.len())),
                rendered
            ))
        }
    }
}

fn dec_arg(v: &CellValue) -> Result<i64, CellError> {
    match v {
        CellValue::Error(e) => Err(e.clone()),
        CellValue::Boolean(_) => Err(CellError::value()),
        CellValue::Empty => Ok(0),
        other => {
            let n = to_number(other)?;
            Ok(n.trunc() as i64)
        }
    }
}

/* conversion entry points: every pair among bin/oct/hex/dec */

macro_rules! base_to_dec_fn {
    ($fn_name:ident, $base:expr) => {
        pub fn $fn_name(
            args: &[ArgumentHandle],
            _ctx: &dyn EvalContext,
        ) -> Result<CellValue, CellError> {
            let v = args[0].scalar()?;
            Ok(CellValue::Number(base_to_dec(&v, $base)? as f64))
        }
    };
}

macro_rules! dec_to_base_fn {
    ($fn_name:ident, $base:expr) => {
        pub fn $fn_name(
            args: &[ArgumentHandle],
            _ctx: &dyn EvalContext,
        ) -> Result<CellValue, CellError> {
            let v = args[0].scalar()?;
            let places = match args.get(1) {
                Some(h) => Some(h.scalar()?),
                None => None,
            };
            Ok(CellValue::Text(dec_to_base(
                dec_arg(&v)?,
                places.as_ref(),
                $base,
            )?))
        }
    };
}

macro_rules! base_to_base_fn {
    ($fn_name:ident, $base_in:expr, $base_out:expr) => {
        pub fn $fn_name(
            args: &[ArgumentHandle],
            _ctx: &dyn EvalContext,
        ) -> Result<CellValue, CellError> {
            let v = args[0].scalar()?;
            let places = match args.get(1) {
                Some(h) => Some(h.scalar()?),
                None => None,
            };
            let dec = base_to_dec(&v, $base_in)?;
            Ok(CellValue::Text(dec_to_base(dec, places.as_ref(), $base_out)?))
        }
    };
}

base_to_dec_fn!(bin2dec_fn, 2);
base_to_dec_fn!(oct2dec_fn, 8);
base_to_dec_fn!(hex2dec_fn, 16);

dec_to_base_fn!(dec2bin_fn, 2);
dec_to_base_fn!(dec2oct_fn, 8);
dec_to_base_fn!(dec2hex_fn, 16);

base_to_base_fn!(bin2oct_fn, 2, 8);
base_to_base_fn!(bin2hex_fn, 2, 16);
base_to_base_fn!(oct2bin_fn, 8, 2);
base_to_base_fn!(oct2hex_fn, 8, 16);
base_to_base_fn!(hex2bin_fn, 16, 2);
base_to_base_fn!(hex2oct_fn, 16, 8);

/* ─────────────────────────── bitwise ──────────────────────────────── */

const BIT_LIMIT: f64 = 281_474_976_710_656.0; // 2^48

/// Bitwise inputs are whole numbers in [0, 2^48).
fn to_bitwise_int(v: &CellValue) -> Result<i64, CellError> {
    let n = to_number(v)?;
    if n < 0.0 || n != n.trunc() || n >= BIT_LIMIT {
        return Err(CellError::num());
    }
    Ok(n as i64)
}

fn bit_args(args: &[ArgumentHandle]) -> Result<(i64, i64), CellError> {
    let a = to_bitwise_int(&args[0].scalar()?)?;
    let b = to_bitwise_int(&args[1].scalar()?)?;
    Ok((a, b))
}

pub fn bitand_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let (a, b) = bit_args(args)?;
    Ok(CellValue::Number((a & b) as f64))
}

pub fn bitor_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let (a, b) = bit_args(args)?;
    Ok(CellValue::Number((a | b) as f64))
}

pub fn bitxor_fn(args: &[ArgumentHandle], _ctx: &dyn EvalContext) -> Result<CellValue, CellError> {
    let (a, b) = bit_args(args)?;
    Ok(CellValue::Number((a ^ b) as f64))
}

/// Shift counts are bounded to ±53; a negative count reverses the
/// direction; results must stay below 2^48.
fn bit_shift(args: &[ArgumentHandle], left: bool) -> Result<CellValue, CellError> {
    let n = to_bitwise_int(&args[0].scalar()?)?;
    let count = to_number(&args[1].scalar()?)?.trunc() as i64;
    if count.abs() > 53 {
        return Err(CellError::num());
    }
    let shift_left = if left { count } else { -count };
    let shifted = if shift_left >= 0 {
        (n as i128) << shift_left
    } else {
        (n as i128) >> (-shift_left)
    };
    if shifted >= BIT_LIMIT as i128 {
        return Err(CellError::num());
    }
    Ok(CellValue::Number(shifted as f64))
}

pub fn bitlshift_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    bit_shift(args, true)
}

pub fn bitrshift_fn(
    args: &[ArgumentHandle],
    _ctx: &dyn EvalContext,
) -> Result<CellValue, CellError> {
    bit_shift(args, false)
}

pub(super) fn register() {
    register_function(Arc::new(BuiltinFn::new("BIN2DEC", 1, 1, bin2dec_fn)));
    register_function(Arc::new(BuiltinFn::new("OCT2DEC", 1, 1, oct2dec_fn)));
    register_function(Arc::new(BuiltinFn::new("HEX2DEC", 1, 1, hex2dec_fn)));
    register_function(Arc::new(BuiltinFn::new("DEC2BIN", 1, 2, dec2bin_fn)));
    register_function(Arc::new(BuiltinFn::new("DEC2OCT", 1, 2, dec2oct_fn)));
    register_function(Arc::new(BuiltinFn::new("DEC2HEX", 1, 2, dec2hex_fn)));
    register_function(Arc::new(BuiltinFn::new("BIN2OCT", 1, 2, bin2oct_fn)));
    register_function(Arc::new(BuiltinFn::new("BIN2HEX", 1, 2, bin2hex_fn)));
    register_function(Arc::new(BuiltinFn::new("OCT2BIN", 1, 2, oct2bin_fn)));
    register_function(Arc::new(BuiltinFn::new("OCT2HEX", 1, 2, oct2hex_fn)));
    register_function(Arc::new(BuiltinFn::new("HEX2BIN", 1, 2, hex2bin_fn)));
    register_function(Arc::new(BuiltinFn::new("HEX2OCT", 1, 2, hex2oct_fn)));
    register_function(Arc::new(BuiltinFn::new("BITAND", 2, 2, bitand_fn)));
    register_function(Arc::new(BuiltinFn::new("BITOR", 2, 2, bitor_fn)));
    register_function(Arc::new(BuiltinFn::new("BITXOR", 2, 2, bitxor_fn)));
    register_function(Arc::new(BuiltinFn::new("BITLSHIFT", 2, 2, bitlshift_fn)));
    register_function(Arc::new(BuiltinFn::new("BITRSHIFT", 2, 2, bitrshift_fn)));
}

#[cfg(test)]
mod tests {
    use crate::test_workbook::TestWorkbook;
    use sheetgraph_common::CellValue as V;

    fn eval(formula: &str) -> V {
        TestWorkbook::new().evaluate(formula)
    }

    #[test]
    fn signed_window_pins() {
        assert_eq!(eval("=HEX2DEC(\"FFFFFFFFFE\")"), V::Number(-2.0));
        assert_eq!(eval("=DEC2BIN(-2)"), V::Text("1111111110".into()));
        assert!(matches!(eval("=DEC2HEX(2^39)"), V::Error(e) if e == "#NUM!"));
        assert_eq!(eval("=DEC2HEX(2^39-1)"), V::Text("7FFFFFFFFF".into()));
        assert_eq!(eval("=BIN2DEC(\"1111111110\")"), V::Number(-2.0));
        assert_eq!(eval("=OCT2DEC(\"7777777770\")"), V::Number(-8.0));
    }

    #[test]
    fn round_trips() {
        assert_eq!(eval("=DEC2BIN(9)"), V::Text("1001".into()));
        assert_eq!(eval("=BIN2DEC(1001)"), V::Number(9.0));
        assert_eq!(eval("=DEC2OCT(64)"), V::Text("100".into()));
        assert_eq!(eval("=DEC2HEX(255)"), V::Text("FF".into()));
        assert_eq!(eval("=HEX2DEC(\"FF\")"), V::Number(255.0));
        assert_eq!(eval("=BIN2HEX(\"11111011\")"), V::Text("FB".into()));
        assert_eq!(eval("=HEX2BIN(\"B7\")"), V::Text("10110111".into()));
        assert_eq!(eval("=OCT2HEX(\"100\")"), V::Text("40".into()));
    }

    #[test]
    fn places_pad_or_overflow() {
        assert_eq!(eval("=DEC2BIN(9,8)"), V::Text("00001001".into()));
        assert!(matches!(eval("=DEC2BIN(9,2)"), V::Error(e) if e == "#NUM!"));
    }

    #[test]
    fn invalid_digits() {
        assert!(matches!(eval("=BIN2DEC(\"102\")"), V::Error(e) if e == "#NUM!"));
        assert!(matches!(eval("=HEX2DEC(\"GG\")"), V::Error(e) if e == "#NUM!"));
        // more than 10 digits is out of the window
        assert!(matches!(eval("=HEX2DEC(\"1FFFFFFFFFF\")"), V::Error(e) if e == "#NUM!"));
        assert!(matches!(eval("=BIN2DEC(TRUE)"), V::Error(e) if e == "#VALUE!"));
    }

    #[test]
    fn bitwise_basics() {
        assert_eq!(eval("=BITAND(13,10)"), V::Number(8.0));
        assert_eq!(eval("=BITOR(13,10)"), V::Number(15.0));
        assert_eq!(eval("=BITXOR(13,10)"), V::Number(7.0));
        assert_eq!(eval("=BITLSHIFT(3,2)"), V::Number(12.0));
        assert_eq!(eval("=BITRSHIFT(13,2)"), V::Number(3.0));
        // negative count reverses direction
        assert_eq!(eval("=BITLSHIFT(12,-2)"), V::Number(3.0));
    }

    #[test]
    fn bitwise_bounds() {
        assert!(matches!(eval("=BITAND(-1,1)"), V::Error(e) if e == "#NUM!"));
        assert!(matches!(eval("=BITAND(1.5,1)"), V::Error(e) if e == "#NUM!"));
        assert!(matches!(eval("=BITLSHIFT(1,54)"), V::Error(e) if e == "#NUM!"));
        assert!(matches!(eval("=BITLSHIFT(2^47,1)"), V::Error(e) if e == "#NUM!"));
    }
}
