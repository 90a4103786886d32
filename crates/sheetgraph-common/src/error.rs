//! Spreadsheet error values.
//!
//! - **`ErrorKind`** : the canonical set of spreadsheet error codes
//! - **`CellError`** : a kind plus an optional human-readable message
//!
//! Errors are first-class cell values: they flow through evaluation and are
//! read back as the value of a cell. `Display` renders the exact sentinel
//! text (`#DIV/0!`, …) a spreadsheet would show.

use std::{error::Error, fmt};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// All recognised spreadsheet error codes.
///
/// Names are CamelCase while `Display` renders them exactly as a
/// spreadsheet shows them.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Null,
    Div,
    Value,
    Ref,
    Name,
    Num,
    Na,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Null => "#NULL!",
            Self::Div => "#DIV/0!",
            Self::Value => "#VALUE!",
            Self::Ref => "#REF!",
            Self::Name => "#NAME?",
            Self::Num => "#NUM!",
            Self::Na => "#N/A",
        })
    }
}

impl ErrorKind {
    /// Parse a sentinel string. Sentinels are matched case-insensitively so
    /// tokenizer output and user input both resolve.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "#NULL!" => Some(Self::Null),
            "#DIV/0!" => Some(Self::Div),
            "#VALUE!" => Some(Self::Value),
            "#REF!" => Some(Self::Ref),
            "#NAME?" => Some(Self::Name),
            "#NUM!" => Some(Self::Num),
            "#N/A" => Some(Self::Na),
            _ => None,
        }
    }
}

/// The error value your API passes around: mandatory kind, optional message.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellError {
    pub kind: ErrorKind,
    pub message: Option<String>,
}

impl From<ErrorKind> for CellError {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }
}

impl CellError {
    pub fn new(kind: ErrorKind) -> Self {
        kind.into()
    }

    /// Attach a human-readable explanation.
    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }

    pub fn null() -> Self {
        Self::new(ErrorKind::Null)
    }
    pub fn div() -> Self {
        Self::new(ErrorKind::Div)
    }
    pub fn value() -> Self {
        Self::new(ErrorKind::Value)
    }
    pub fn reference() -> Self {
        Self::new(ErrorKind::Ref)
    }
    pub fn name() -> Self {
        Self::new(ErrorKind::Name)
    }
    pub fn num() -> Self {
        Self::new(ErrorKind::Num)
    }
    pub fn na() -> Self {
        Self::new(ErrorKind::Na)
    }

    pub fn from_error_string(s: &str) -> Option<Self> {
        ErrorKind::parse(s).map(Self::new)
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The sentinel alone; the message is diagnostic detail.
        write!(f, "{}", self.kind)
    }
}

impl Error for CellError {}

impl PartialEq<str> for ErrorKind {
    fn eq(&self, other: &str) -> bool {
        self.to_string() == other
    }
}

impl PartialEq<&str> for CellError {
    fn eq(&self, other: &&str) -> bool {
        self.kind.to_string() == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_round_trip() {
        for kind in [
            ErrorKind::Null,
            ErrorKind::Div,
            ErrorKind::Value,
            ErrorKind::Ref,
            ErrorKind::Name,
            ErrorKind::Num,
            ErrorKind::Na,
        ] {
            assert_eq!(ErrorKind::parse(&kind.to_string()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("#GARBAGE!"), None);
    }

    #[test]
    fn display_hides_message() {
        let e = CellError::value().with_message("cannot convert 'x'");
        assert_eq!(e.to_string(), "#VALUE!");
        assert_eq!(e, "#VALUE!");
    }
}
