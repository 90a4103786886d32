//! Cell and range addresses.
//!
//! The graph stores only absolute, sheet-qualified addresses ([`CellAddr`],
//! [`RangeAddr`], keyed as [`Addr`]). Formula text parses into a
//! [`ParsedRef`] first, which may still carry `$` anchors, R1C1 offsets, a
//! missing sheet, or unbounded whole-row/column dimensions; `resolve`
//! erases all of that against a current cell and the sheet bounds.

use once_cell::sync::Lazy;
use std::fmt::{self, Display};

use crate::CellError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Hard sheet bounds (columns up to XFD, rows up to 2^20).
pub const MAX_COL: u32 = 16_384;
pub const MAX_ROW: u32 = 1_048_576;

/// Which reference grammar a workbook uses. Mixed-notation formulas are
/// rejected: a workbook is compiled as one or the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Notation {
    #[default]
    A1,
    R1C1,
}

// Column lookup table for common columns (A-ZZ = 702 columns)
static COLUMN_LOOKUP: Lazy<Vec<String>> = Lazy::new(|| {
    let mut cols = Vec::with_capacity(702);
    for c in b'A'..=b'Z' {
        cols.push(String::from(c as char));
    }
    for c1 in b'A'..=b'Z' {
        for c2 in b'A'..=b'Z' {
            cols.push(format!("{}{}", c1 as char, c2 as char));
        }
    }
    cols
});

/// Convert a column label (`"A"`, `"BC"`) to a 1-based index.
///
/// Base-26 with `'A'` = 1 and no zero digit: after `Z` comes `AA`.
pub fn label_to_col(label: &str) -> Result<u32, CellError> {
    let bytes = label.as_bytes();
    if bytes.is_empty() || bytes.len() > 3 {
        return Err(CellError::reference().with_message(format!("invalid column '{label}'")));
    }
    let mut result = 0u32;
    for &b in bytes {
        if !b.is_ascii_alphabetic() {
            return Err(CellError::reference().with_message(format!("invalid column '{label}'")));
        }
        result = result * 26 + (b.to_ascii_uppercase() - b'A' + 1) as u32;
    }
    Ok(result)
}

/// Convert a 1-based column index to its label.
pub fn col_to_label(mut num: u32) -> String {
    if num > 0 && num <= 702 {
        return COLUMN_LOOKUP[(num - 1) as usize].clone();
    }
    let mut result = String::with_capacity(3);
    while num > 0 {
        num -= 1;
        result.insert(0, ((num % 26) as u8 + b'A') as char);
        num /= 26;
    }
    result
}

/// Whether a sheet name must be quoted when rendered into a reference.
fn sheet_name_needs_quoting(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let bytes = name.as_bytes();
    if bytes[0].is_ascii_digit() {
        return true;
    }
    bytes
        .iter()
        .any(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
}

fn format_sheet(name: &str) -> String {
    if sheet_name_needs_quoting(name) {
        format!("'{}'", name.replace('\'', "''"))
    } else {
        name.to_string()
    }
}

/* ─────────────────────────── absolute addresses ───────────────────── */

/// An absolute, sheet-qualified single cell. 1-based indices.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellAddr {
    pub sheet: String,
    pub col: u32,
    pub row: u32,
}

impl CellAddr {
    pub fn new<S: Into<String>>(sheet: S, col: u32, row: u32) -> Self {
        CellAddr {
            sheet: sheet.into(),
            col,
            row,
        }
    }

    pub fn in_bounds(&self) -> bool {
        (1..=MAX_COL).contains(&self.col) && (1..=MAX_ROW).contains(&self.row)
    }

    /// Translate by (rows, cols); out-of-sheet lands on `#REF!`.
    pub fn offset(&self, rows: i64, cols: i64) -> Result<CellAddr, CellError> {
        let row = self.row as i64 + rows;
        let col = self.col as i64 + cols;
        if row < 1 || row > MAX_ROW as i64 || col < 1 || col > MAX_COL as i64 {
            return Err(CellError::reference()
                .with_message(format!("offset from {self} leaves the sheet")));
        }
        Ok(CellAddr::new(self.sheet.clone(), col as u32, row as u32))
    }
}

impl Display for CellAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}!{}{}",
            format_sheet(&self.sheet),
            col_to_label(self.col),
            self.row
        )
    }
}

/// An absolute, sheet-qualified rectangular range; start ≤ end
/// component-wise, inclusive bounds.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeAddr {
    pub sheet: String,
    pub start_col: u32,
    pub start_row: u32,
    pub end_col: u32,
    pub end_row: u32,
}

impl RangeAddr {
    pub fn new<S: Into<String>>(
        sheet: S,
        start_col: u32,
        start_row: u32,
        end_col: u32,
        end_row: u32,
    ) -> Result<Self, CellError> {
        if start_col > end_col || start_row > end_row {
            return Err(CellError::reference()
                .with_message("range start must be above/left of its end"));
        }
        Ok(RangeAddr {
            sheet: sheet.into(),
            start_col,
            start_row,
            end_col,
            end_row,
        })
    }

    pub fn rows(&self) -> u32 {
        self.end_row - self.start_row + 1
    }

    pub fn cols(&self) -> u32 {
        self.end_col - self.start_col + 1
    }

    pub fn contains(&self, cell: &CellAddr) -> bool {
        cell.sheet == self.sheet
            && (self.start_col..=self.end_col).contains(&cell.col)
            && (self.start_row..=self.end_row).contains(&cell.row)
    }

    /// Member cell addresses, row-major (rows outer, columns inner).
    pub fn cells(&self) -> Vec<Vec<CellAddr>> {
        let mut out = Vec::with_capacity(self.rows() as usize);
        for r in self.start_row..=self.end_row {
            let mut row = Vec::with_capacity(self.cols() as usize);
            for c in self.start_col..=self.end_col {
                row.push(CellAddr::new(self.sheet.clone(), c, r));
            }
            out.push(row);
        }
        out
    }

    /// Flat row-major iteration without materialising the matrix.
    pub fn iter_cells(&self) -> impl Iterator<Item = CellAddr> + '_ {
        (self.start_row..=self.end_row).flat_map(move |r| {
            (self.start_col..=self.end_col).map(move |c| CellAddr::new(self.sheet.clone(), c, r))
        })
    }

    /// Bit-exact set intersection of two rectangles; `None` when empty or
    /// on different sheets.
    pub fn intersect(&self, other: &RangeAddr) -> Option<RangeAddr> {
        if self.sheet != other.sheet {
            return None;
        }
        let start_col = self.start_col.max(other.start_col);
        let end_col = self.end_col.min(other.end_col);
        let start_row = self.start_row.max(other.start_row);
        let end_row = self.end_row.min(other.end_row);
        if start_col > end_col || start_row > end_row {
            return None;
        }
        Some(RangeAddr {
            sheet: self.sheet.clone(),
            start_col,
            start_row,
            end_col,
            end_row,
        })
    }
}

impl Display for RangeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}!{}{}:{}{}",
            format_sheet(&self.sheet),
            col_to_label(self.start_col),
            self.start_row,
            col_to_label(self.end_col),
            self.end_row
        )
    }
}

/// Graph key: either a cell or a range, always absolute.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Addr {
    Cell(CellAddr),
    Range(RangeAddr),
}

impl Addr {
    pub fn sheet(&self) -> &str {
        match self {
            Addr::Cell(c) => &c.sheet,
            Addr::Range(r) => &r.sheet,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Addr::Range(_))
    }

    /// Parse a user-facing absolute address (`Sheet1!A1`, `B2:C4`, `$`
    /// anchors ignored). `default_sheet` fills a missing sheet qualifier.
    pub fn parse(text: &str, default_sheet: &str) -> Result<Addr, CellError> {
        let parsed = ParsedRef::parse(text, Notation::A1)?;
        let origin = CellAddr::new(default_sheet, 1, 1);
        parsed.resolve(&origin, MAX_ROW, MAX_COL)
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Cell(c) => c.fmt(f),
            Addr::Range(r) => r.fmt(f),
        }
    }
}

impl From<CellAddr> for Addr {
    fn from(c: CellAddr) -> Self {
        Addr::Cell(c)
    }
}

impl From<RangeAddr> for Addr {
    fn from(r: RangeAddr) -> Self {
        Addr::Range(r)
    }
}

/* ─────────────────────────── parsed references ────────────────────── */

/// One coordinate of a parsed reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coord {
    /// A1 or `R3C5` style absolute index; `anchored` records a `$`.
    Abs { index: u32, anchored: bool },
    /// `R[-1]C[2]` style offset from the current cell (R1C1 only).
    Rel(i64),
}

impl Coord {
    fn resolve(&self, base: u32) -> Option<u32> {
        match self {
            Coord::Abs { index, .. } => Some(*index),
            Coord::Rel(offset) => {
                let idx = base as i64 + offset;
                (idx >= 1).then_some(idx as u32)
            }
        }
    }
}

/// A cell reference as written in a formula.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedCellRef {
    pub sheet: Option<String>,
    pub col: Coord,
    pub row: Coord,
}

/// A range reference as written. `None` coordinates mark whole-row or
/// whole-column dimensions (`A:A`, `1:1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedRangeRef {
    pub sheet: Option<String>,
    pub start_col: Option<Coord>,
    pub start_row: Option<Coord>,
    pub end_col: Option<Coord>,
    pub end_row: Option<Coord>,
}

/// Any reference a formula can contain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParsedRef {
    Cell(ParsedCellRef),
    Range(ParsedRangeRef),
    /// A defined name, resolved by the workbook accessor before the graph
    /// ever sees it.
    Name(String),
}

impl ParsedRef {
    /// Parse a reference in the given notation. Identifiers that fit
    /// neither grammar become [`ParsedRef::Name`].
    pub fn parse(reference: &str, notation: Notation) -> Result<Self, CellError> {
        let (sheet, rest) = extract_sheet_name(reference);
        if rest.is_empty() {
            return Err(CellError::reference().with_message(format!("empty reference '{reference}'")));
        }

        if let Some((start, end)) = split_range_text(&rest) {
            let (sc, sr) = parse_range_part(start, notation)?;
            let (ec, er) = parse_range_part(end, notation)?;
            if sc.is_none() && sr.is_none() || ec.is_none() && er.is_none() {
                return Err(
                    CellError::reference().with_message(format!("invalid range '{reference}'"))
                );
            }
            return Ok(ParsedRef::Range(ParsedRangeRef {
                sheet,
                start_col: sc,
                start_row: sr,
                end_col: ec,
                end_row: er,
            }));
        }

        match parse_cell_text(&rest, notation) {
            Ok((col, row)) => Ok(ParsedRef::Cell(ParsedCellRef { sheet, col, row })),
            Err(_) if sheet.is_none() && is_identifier(&rest) => {
                Ok(ParsedRef::Name(rest.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Erase anchors, offsets and open dimensions against the current
    /// cell and the sheet's used bounds.
    pub fn resolve(
        &self,
        current: &CellAddr,
        max_row: u32,
        max_col: u32,
    ) -> Result<Addr, CellError> {
        let oob = |what: &str| CellError::reference().with_message(format!("{what} out of sheet"));
        match self {
            ParsedRef::Cell(cell) => {
                let sheet = cell.sheet.clone().unwrap_or_else(|| current.sheet.clone());
                let col = cell.col.resolve(current.col).ok_or_else(|| oob("column"))?;
                let row = cell.row.resolve(current.row).ok_or_else(|| oob("row"))?;
                let addr = CellAddr::new(sheet, col, row);
                if !addr.in_bounds() {
                    return Err(oob("cell"));
                }
                Ok(Addr::Cell(addr))
            }
            ParsedRef::Range(range) => {
                let sheet = range.sheet.clone().unwrap_or_else(|| current.sheet.clone());
                let resolve_dim = |c: &Option<Coord>, base: u32, open: u32| -> Result<u32, CellError> {
                    match c {
                        Some(coord) => coord.resolve(base).ok_or_else(|| oob("range bound")),
                        None => Ok(open),
                    }
                };
                let start_col = resolve_dim(&range.start_col, current.col, 1)?;
                let end_col = resolve_dim(&range.end_col, current.col, max_col)?;
                let start_row = resolve_dim(&range.start_row, current.row, 1)?;
                let end_row = resolve_dim(&range.end_row, current.row, max_row)?;
                if end_col > MAX_COL || end_row > MAX_ROW {
                    return Err(oob("range"));
                }
                let addr = RangeAddr::new(
                    sheet,
                    start_col.min(end_col),
                    start_row.min(end_row),
                    start_col.max(end_col),
                    start_row.max(end_row),
                )?;
                if addr.rows() == 1 && addr.cols() == 1 {
                    // A degenerate one-cell range keys as a cell.
                    Ok(Addr::Cell(CellAddr::new(
                        addr.sheet,
                        addr.start_col,
                        addr.start_row,
                    )))
                } else {
                    Ok(Addr::Range(addr))
                }
            }
            ParsedRef::Name(name) => Err(CellError::name()
                .with_message(format!("unresolved defined name '{name}'"))),
        }
    }
}

impl Display for ParsedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let coord = |c: &Coord, is_col: bool, out: &mut fmt::Formatter<'_>| -> fmt::Result {
            match c {
                Coord::Abs { index, anchored } => {
                    if *anchored {
                        write!(out, "$")?;
                    }
                    if is_col {
                        write!(out, "{}", col_to_label(*index))
                    } else {
                        write!(out, "{index}")
                    }
                }
                Coord::Rel(offset) => {
                    if is_col {
                        write!(out, "C[{offset}]")
                    } else {
                        write!(out, "R[{offset}]")
                    }
                }
            }
        };
        match self {
            ParsedRef::Cell(c) => {
                if let Some(s) = &c.sheet {
                    write!(f, "{}!", format_sheet(s))?;
                }
                coord(&c.col, true, f)?;
                coord(&c.row, false, f)
            }
            ParsedRef::Range(r) => {
                if let Some(s) = &r.sheet {
                    write!(f, "{}!", format_sheet(s))?;
                }
                if let Some(c) = &r.start_col {
                    coord(c, true, f)?;
                }
                if let Some(c) = &r.start_row {
                    coord(c, false, f)?;
                }
                write!(f, ":")?;
                if let Some(c) = &r.end_col {
                    coord(c, true, f)?;
                }
                if let Some(c) = &r.end_row {
                    coord(c, false, f)?;
                }
                Ok(())
            }
            ParsedRef::Name(n) => write!(f, "{n}"),
        }
    }
}

/* ─────────────────────────── parsing helpers ──────────────────────── */

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Split a leading `Sheet!` / `'Quoted Sheet'!` qualifier off a reference.
fn extract_sheet_name(reference: &str) -> (Option<String>, String) {
    let bytes = reference.as_bytes();
    if !bytes.is_empty() && bytes[0] == b'\'' {
        let mut i = 1;
        while i < bytes.len() {
            if bytes[i] == b'\'' {
                if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                    i += 2;
                    continue;
                }
                if i + 1 < bytes.len() && bytes[i + 1] == b'!' {
                    let sheet = reference[1..i].replace("''", "'");
                    return (Some(sheet), reference[i + 2..].to_string());
                }
                break;
            }
            i += 1;
        }
    }
    if let Some(pos) = reference.find('!') {
        if pos > 0 {
            return (
                Some(reference[..pos].to_string()),
                reference[pos + 1..].to_string(),
            );
        }
    }
    (None, reference.to_string())
}

/// Split `A1:B2` at its colon, if any. R1C1 references contain no colon
/// except as a range separator, so a plain split is safe in both grammars.
fn split_range_text(rest: &str) -> Option<(&str, &str)> {
    let pos = rest.find(':')?;
    Some((&rest[..pos], &rest[pos + 1..]))
}

/// Parse one side of a range: a full cell, a bare column, or a bare row.
fn parse_range_part(
    part: &str,
    notation: Notation,
) -> Result<(Option<Coord>, Option<Coord>), CellError> {
    if let Ok((col, row)) = parse_cell_text(part, notation) {
        return Ok((Some(col), Some(row)));
    }
    if notation == Notation::A1 {
        let trimmed = part.strip_prefix('$').unwrap_or(part);
        let anchored = trimmed.len() != part.len();
        if trimmed.bytes().all(|b| b.is_ascii_alphabetic()) && !trimmed.is_empty() {
            let index = label_to_col(trimmed)?;
            if index > MAX_COL {
                return Err(CellError::reference().with_message(format!("column '{part}' out of sheet")));
            }
            return Ok((Some(Coord::Abs { index, anchored }), None));
        }
        if trimmed.bytes().all(|b| b.is_ascii_digit()) && !trimmed.is_empty() {
            let index: u32 = trimmed
                .parse()
                .map_err(|_| CellError::reference().with_message(format!("invalid row '{part}'")))?;
            if index == 0 || index > MAX_ROW {
                return Err(CellError::reference().with_message(format!("row '{part}' out of sheet")));
            }
            return Ok((None, Some(Coord::Abs { index, anchored })));
        }
    }
    Err(CellError::reference().with_message(format!("invalid range part '{part}'")))
}

/// Parse a bare cell coordinate (`$B$7` or `R7C2` / `R[1]C[-2]`).
fn parse_cell_text(text: &str, notation: Notation) -> Result<(Coord, Coord), CellError> {
    match notation {
        Notation::A1 => parse_a1_cell(text),
        Notation::R1C1 => parse_r1c1_cell(text),
    }
}

fn parse_a1_cell(text: &str) -> Result<(Coord, Coord), CellError> {
    let bad = || CellError::reference().with_message(format!("invalid cell reference '{text}'"));
    let bytes = text.as_bytes();
    let mut i = 0;

    let col_anchored = i < bytes.len() && bytes[i] == b'$';
    if col_anchored {
        i += 1;
    }
    let col_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    if i == col_start {
        return Err(bad());
    }
    let col = label_to_col(&text[col_start..i])?;

    let row_anchored = i < bytes.len() && bytes[i] == b'$';
    if row_anchored {
        i += 1;
    }
    let row_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == row_start || i != bytes.len() {
        return Err(bad());
    }
    let row: u32 = text[row_start..i].parse().map_err(|_| bad())?;
    if row == 0 || row > MAX_ROW || col > MAX_COL {
        return Err(CellError::reference().with_message(format!("'{text}' out of sheet")));
    }
    Ok((
        Coord::Abs {
            index: col,
            anchored: col_anchored,
        },
        Coord::Abs {
            index: row,
            anchored: row_anchored,
        },
    ))
}

fn parse_r1c1_cell(text: &str) -> Result<(Coord, Coord), CellError> {
    let bad = || CellError::reference().with_message(format!("invalid R1C1 reference '{text}'"));
    let upper = text.to_ascii_uppercase();
    let rest = upper.strip_prefix('R').ok_or_else(bad)?;
    let c_pos = rest.find('C').ok_or_else(bad)?;
    let (row_part, col_part) = (&rest[..c_pos], &rest[c_pos + 1..]);

    let parse_component = |part: &str| -> Result<Coord, CellError> {
        if let Some(inner) = part.strip_prefix('[').and_then(|p| p.strip_suffix(']')) {
            let offset: i64 = inner.parse().map_err(|_| bad())?;
            Ok(Coord::Rel(offset))
        } else if part.is_empty() {
            // bare R / C means "this row" / "this column"
            Ok(Coord::Rel(0))
        } else {
            let index: u32 = part.parse().map_err(|_| bad())?;
            if index == 0 {
                return Err(bad());
            }
            Ok(Coord::Abs {
                index,
                anchored: true,
            })
        }
    };

    let row = parse_component(row_part)?;
    let col = parse_component(col_part)?;
    Ok((col, row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn column_labels_wrap() {
        assert_eq!(label_to_col("A").unwrap(), 1);
        assert_eq!(label_to_col("Z").unwrap(), 26);
        assert_eq!(label_to_col("AA").unwrap(), 27);
        assert_eq!(label_to_col("AZ").unwrap(), 52);
        assert_eq!(label_to_col("BA").unwrap(), 53);
        assert_eq!(label_to_col("XFD").unwrap(), MAX_COL);
        assert_eq!(col_to_label(1), "A");
        assert_eq!(col_to_label(26), "Z");
        assert_eq!(col_to_label(27), "AA");
        assert_eq!(col_to_label(703), "AAA");
        assert_eq!(col_to_label(MAX_COL), "XFD");
    }

    #[test]
    fn column_round_trip() {
        for n in (1..=MAX_COL).step_by(997) {
            assert_eq!(label_to_col(&col_to_label(n)).unwrap(), n);
        }
    }

    #[test]
    fn parse_plain_cell() {
        let r = ParsedRef::parse("Sheet1!$B$7", Notation::A1).unwrap();
        let origin = CellAddr::new("Other", 1, 1);
        assert_eq!(
            r.resolve(&origin, MAX_ROW, MAX_COL).unwrap(),
            Addr::Cell(CellAddr::new("Sheet1", 2, 7))
        );
    }

    #[test]
    fn parse_quoted_sheet() {
        let r = ParsedRef::parse("'P&L 2024'!A1", Notation::A1).unwrap();
        match &r {
            ParsedRef::Cell(c) => assert_eq!(c.sheet.as_deref(), Some("P&L 2024")),
            other => panic!("expected cell, got {other:?}"),
        }
    }

    #[test]
    fn parse_whole_column_and_row() {
        let origin = CellAddr::new("S", 1, 1);
        let col = ParsedRef::parse("A:A", Notation::A1).unwrap();
        match col.resolve(&origin, 500, 40).unwrap() {
            Addr::Range(r) => {
                assert_eq!((r.start_col, r.end_col), (1, 1));
                assert_eq!((r.start_row, r.end_row), (1, 500));
            }
            other => panic!("expected range, got {other:?}"),
        }
        let row = ParsedRef::parse("3:3", Notation::A1).unwrap();
        match row.resolve(&origin, 500, 40).unwrap() {
            Addr::Range(r) => {
                assert_eq!((r.start_row, r.end_row), (3, 3));
                assert_eq!((r.start_col, r.end_col), (1, 40));
            }
            other => panic!("expected range, got {other:?}"),
        }
    }

    #[test]
    fn r1c1_resolution() {
        let origin = CellAddr::new("S", 4, 10);
        let abs = ParsedRef::parse("R3C5", Notation::R1C1).unwrap();
        assert_eq!(
            abs.resolve(&origin, MAX_ROW, MAX_COL).unwrap(),
            Addr::Cell(CellAddr::new("S", 5, 3))
        );
        let rel = ParsedRef::parse("R[-2]C[3]", Notation::R1C1).unwrap();
        assert_eq!(
            rel.resolve(&origin, MAX_ROW, MAX_COL).unwrap(),
            Addr::Cell(CellAddr::new("S", 7, 8))
        );
    }

    #[test]
    fn notation_is_exclusive() {
        // A1 text under R1C1 notation is not silently accepted
        assert!(matches!(
            ParsedRef::parse("B7", Notation::R1C1),
            Err(_) | Ok(ParsedRef::Name(_))
        ));
        // R1C1 under A1 notation falls out as a name, later a #NAME? error
        let r = ParsedRef::parse("R1C1", Notation::A1);
        assert!(matches!(r, Ok(ParsedRef::Name(_)) | Err(_)));
    }

    #[test]
    fn range_enumeration_row_major() {
        let rng = RangeAddr::new("S", 2, 5, 3, 7).unwrap();
        let cells = rng.cells();
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0].len(), 2);
        let flat: Vec<String> = rng.iter_cells().map(|c| c.to_string()).collect();
        assert_eq!(flat, ["S!B5", "S!C5", "S!B6", "S!C6", "S!B7", "S!C7"]);
        assert_eq!(flat.len(), (rng.rows() * rng.cols()) as usize);
    }

    #[test]
    fn intersection() {
        let a = RangeAddr::new("S", 1, 1, 5, 5).unwrap();
        let b = RangeAddr::new("S", 3, 4, 9, 9).unwrap();
        let i = a.intersect(&b).unwrap();
        assert_eq!((i.start_col, i.start_row, i.end_col, i.end_row), (3, 4, 5, 5));
        let disjoint = RangeAddr::new("S", 7, 1, 8, 2).unwrap();
        assert!(a.intersect(&disjoint).is_none());
        let other_sheet = RangeAddr::new("T", 1, 1, 5, 5).unwrap();
        assert!(a.intersect(&other_sheet).is_none());
    }

    #[test]
    fn containment() {
        let rng = RangeAddr::new("S", 2, 2, 4, 4).unwrap();
        assert!(rng.contains(&CellAddr::new("S", 3, 3)));
        assert!(!rng.contains(&CellAddr::new("S", 5, 3)));
        assert!(!rng.contains(&CellAddr::new("T", 3, 3)));
    }

    #[test]
    fn malformed_is_ref_error() {
        assert!(ParsedRef::parse("$$", Notation::A1).is_err());
        let oob = ParsedRef::parse("A1048577", Notation::A1);
        assert!(oob.is_err());
        assert_eq!(oob.unwrap_err().kind, ErrorKind::Ref);
    }

    #[test]
    fn addr_parse_convenience() {
        let a = Addr::parse("B2:C4", "Data").unwrap();
        assert_eq!(a.to_string(), "Data!B2:C4");
        let c = Addr::parse("Data!E9", "Other").unwrap();
        assert_eq!(c.to_string(), "Data!E9");
    }
}
