//! Lexical analysis of formula strings.
//!
//! A single byte-wise pass splits the formula into typed tokens; a second
//! amendment pass applies the whitespace rule: whitespace between two
//! operands, or between a closing group and an opening group, is the
//! intersect operator; every other run of whitespace is dropped.

use std::convert::TryFrom;
use std::error::Error;
use std::fmt::{self, Display};

const TOKEN_ENDERS: &str = ",;}) +-*/^&=><%";

const fn build_token_enders() -> [bool; 256] {
    let mut tbl = [false; 256];
    let bytes = TOKEN_ENDERS.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        tbl[bytes[i] as usize] = true;
        i += 1;
    }
    tbl
}
static TOKEN_ENDERS_TABLE: [bool; 256] = build_token_enders();

#[inline(always)]
fn is_token_ender(c: u8) -> bool {
    TOKEN_ENDERS_TABLE[c as usize]
}

static ERROR_CODES: &[&str] = &[
    "#NULL!", "#DIV/0!", "#VALUE!", "#REF!", "#NAME?", "#NUM!", "#N/A",
];

/// Operator associativity.
#[derive(Debug, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

#[derive(Debug)]
pub struct TokenizerError {
    pub message: String,
    pub pos: usize,
}

impl fmt::Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenizerError at {}: {}", self.pos, self.message)
    }
}

impl Error for TokenizerError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    /// A formula that does not start with `=`; the whole text is one token.
    Literal,
    Operand,
    Func,
    Array,
    /// Synthetic group for one row of an array literal; only produced by
    /// the parser's stream rewrite, never by the tokenizer itself.
    ArrayRow,
    Paren,
    Sep,
    OpPrefix,
    OpInfix,
    OpPostfix,
    Whitespace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenSubType {
    None,
    Text,
    Number,
    Logical,
    Error,
    Range,
    Open,
    Close,
    Arg,
    Row,
    /// Whitespace promoted to the intersection operator.
    Intersect,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub value: String,
    pub token_type: TokenType,
    pub subtype: TokenSubType,
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{:?} subtype: {:?} value: {}>",
            self.token_type, self.subtype, self.value
        )
    }
}

impl Token {
    pub fn new<S: Into<String>>(value: S, token_type: TokenType, subtype: TokenSubType) -> Self {
        Token {
            value: value.into(),
            token_type,
            subtype,
        }
    }

    pub fn is_operator(&self) -> bool {
        matches!(
            self.token_type,
            TokenType::OpPrefix | TokenType::OpInfix | TokenType::OpPostfix
        )
    }

    /// An opening token that owns an argument list: function, array or
    /// array row.
    pub fn is_func_open(&self) -> bool {
        self.subtype == TokenSubType::Open
            && matches!(
                self.token_type,
                TokenType::Func | TokenType::Array | TokenType::ArrayRow
            )
    }

    /// Binding strength per the operator table; `None` for non-operators.
    ///
    /// Prefix operators bind at level 7 and nest right-associatively so
    /// `--3` parses as `-(-3)`.
    pub fn precedence(&self) -> Option<(u8, Associativity)> {
        let op = if self.token_type == TokenType::OpPrefix {
            "u"
        } else if self.subtype == TokenSubType::Intersect {
            " "
        } else {
            self.value.as_str()
        };
        match op {
            ":" | " " | "," => Some((8, Associativity::Left)),
            "u" => Some((7, Associativity::Right)),
            "%" => Some((6, Associativity::Left)),
            "^" => Some((5, Associativity::Left)),
            "*" | "/" => Some((4, Associativity::Left)),
            "+" | "-" => Some((3, Associativity::Left)),
            "&" => Some((2, Associativity::Left)),
            "=" | "<" | ">" | "<=" | ">=" | "<>" => Some((1, Associativity::Left)),
            _ => None,
        }
    }

    /// Classify an accumulated operand by its text.
    fn make_operand(value: &str) -> Self {
        let subtype = if value.starts_with('"') {
            TokenSubType::Text
        } else if value.starts_with('#') {
            TokenSubType::Error
        } else if value.eq_ignore_ascii_case("TRUE") || value.eq_ignore_ascii_case("FALSE") {
            TokenSubType::Logical
        } else if value.parse::<f64>().is_ok() {
            TokenSubType::Number
        } else {
            TokenSubType::Range
        };
        Token::new(value, TokenType::Operand, subtype)
    }

    fn make_separator(value: &str) -> Self {
        debug_assert!(value == "," || value == ";");
        let subtype = if value == "," {
            TokenSubType::Arg
        } else {
            TokenSubType::Row
        };
        Token::new(value, TokenType::Sep, subtype)
    }
}

/// A tokenizer for worksheet formulas.
pub struct Tokenizer {
    formula: String,
    pub items: Vec<Token>,
    token_stack: Vec<Token>,
    offset: usize,
    token_start: usize,
    token_end: usize,
}

impl Tokenizer {
    /// Tokenize the formula immediately; `items` holds the raw stream
    /// (whitespace included).
    pub fn new(formula: &str) -> Result<Self, TokenizerError> {
        let mut tokenizer = Tokenizer {
            formula: formula.to_string(),
            items: Vec::with_capacity(formula.len() / 2),
            token_stack: Vec::with_capacity(16),
            offset: 0,
            token_start: 0,
            token_end: 0,
        };
        tokenizer.tokenize()?;
        Ok(tokenizer)
    }

    /// The token stream with the whitespace rule applied: significant
    /// whitespace becomes an intersect operator, the rest disappears.
    pub fn amended(&self) -> Vec<Token> {
        let significant = |t: &Token| -> bool {
            t.token_type == TokenType::Operand
                || (t.subtype == TokenSubType::Close
                    && matches!(t.token_type, TokenType::Func | TokenType::Paren))
        };
        let opens = |t: &Token| -> bool {
            t.token_type == TokenType::Operand
                || (t.subtype == TokenSubType::Open
                    && matches!(t.token_type, TokenType::Func | TokenType::Paren))
        };

        let mut out = Vec::with_capacity(self.items.len());
        for (i, token) in self.items.iter().enumerate() {
            if token.token_type != TokenType::Whitespace {
                out.push(token.clone());
                continue;
            }
            let prev = self.items[..i]
                .iter()
                .rev()
                .find(|t| t.token_type != TokenType::Whitespace);
            let next = self.items[i + 1..]
                .iter()
                .find(|t| t.token_type != TokenType::Whitespace);
            if let (Some(p), Some(n)) = (prev, next) {
                if significant(p) && opens(n) {
                    out.push(Token::new(" ", TokenType::OpInfix, TokenSubType::Intersect));
                }
            }
        }
        out
    }

    #[inline]
    fn current_byte(&self) -> Option<u8> {
        self.formula.as_bytes().get(self.offset).copied()
    }

    #[inline]
    fn has_token(&self) -> bool {
        self.token_end > self.token_start
    }

    #[inline]
    fn start_token(&mut self) {
        self.token_start = self.offset;
        self.token_end = self.offset;
    }

    #[inline]
    fn extend_token(&mut self) {
        self.token_end = self.offset;
    }

    fn tokenize(&mut self) -> Result<(), TokenizerError> {
        if self.formula.is_empty() {
            return Ok(());
        }

        // Literal formula: no leading '='.
        if self.formula.as_bytes()[0] != b'=' {
            self.items.push(Token::new(
                self.formula.clone(),
                TokenType::Literal,
                TokenSubType::None,
            ));
            return Ok(());
        }

        self.offset = 1;
        self.start_token();

        while self.offset < self.formula.len() {
            if self.check_scientific_notation() {
                continue;
            }

            let curr_byte = self.formula.as_bytes()[self.offset];

            if is_token_ender(curr_byte) && self.has_token() {
                self.save_token();
                self.start_token();
            }

            match curr_byte {
                b'"' | b'\'' => self.consume_string()?,
                b'[' => self.consume_brackets()?,
                b'#' => self.consume_error()?,
                b' ' | b'\n' => self.consume_whitespace(),
                b'+' | b'-' | b'*' | b'/' | b'^' | b'&' | b'=' | b'>' | b'<' | b'%' => {
                    self.consume_operator()
                }
                b'{' | b'(' => self.consume_opener(),
                b')' | b'}' => self.consume_closer()?,
                b';' | b',' => self.consume_separator(),
                _ => {
                    if !self.has_token() {
                        self.start_token();
                    }
                    self.offset += 1;
                    self.extend_token();
                }
            }
        }

        if self.has_token() {
            self.save_token();
        }

        if !self.token_stack.is_empty() {
            return Err(TokenizerError {
                message: "unmatched opening parenthesis or brace".to_string(),
                pos: self.offset,
            });
        }

        Ok(())
    }

    /// Absorb the sign of scientific notation (`1.5E+3`) into the number.
    fn check_scientific_notation(&mut self) -> bool {
        if let Some(curr_byte) = self.current_byte() {
            if (curr_byte == b'+' || curr_byte == b'-')
                && self.has_token()
                && self.is_scientific_notation_base()
            {
                self.offset += 1;
                self.extend_token();
                return true;
            }
        }
        false
    }

    fn is_scientific_notation_base(&self) -> bool {
        let token_slice = &self.formula.as_bytes()[self.token_start..self.token_end];
        if token_slice.len() < 2 {
            return false;
        }
        let last = token_slice[token_slice.len() - 1];
        if !(last == b'E' || last == b'e') {
            return false;
        }
        if !token_slice[0].is_ascii_digit() {
            return false;
        }
        let mut dot_seen = false;
        for &ch in &token_slice[1..token_slice.len() - 1] {
            match ch {
                b'0'..=b'9' => {}
                b'.' if !dot_seen => dot_seen = true,
                _ => return false,
            }
        }
        true
    }

    fn save_token(&mut self) {
        if self.has_token() {
            let text = &self.formula[self.token_start..self.token_end];
            self.items.push(Token::make_operand(text));
        }
    }

    /// A double-quoted text literal or a single-quoted sheet-name prefix.
    fn consume_string(&mut self) -> Result<(), TokenizerError> {
        let delim = self.formula.as_bytes()[self.offset];

        if delim == b'"' && self.has_token() {
            self.save_token();
            self.start_token();
        }

        let string_start = if delim == b'\'' && self.has_token() {
            // quoted sheet name continues the current reference token
            self.token_start
        } else if delim == b'\'' {
            self.start_token();
            self.offset
        } else {
            self.offset
        };
        self.offset += 1;

        while self.offset < self.formula.len() {
            if self.formula.as_bytes()[self.offset] == delim {
                self.offset += 1;
                // doubled delimiter is an escape
                if self.current_byte() == Some(delim) {
                    self.offset += 1;
                } else {
                    if delim == b'"' {
                        let text = &self.formula[string_start..self.offset];
                        self.items.push(Token::make_operand(text));
                        self.start_token();
                    } else {
                        self.token_start = string_start;
                        self.token_end = self.offset;
                    }
                    return Ok(());
                }
            } else {
                self.offset += 1;
            }
        }

        Err(TokenizerError {
            message: "reached end of formula while inside a string".to_string(),
            pos: self.offset,
        })
    }

    /// Square brackets belong to the surrounding reference token
    /// (`R[-1]C[2]` offsets); swallow through the matching closer.
    fn consume_brackets(&mut self) -> Result<(), TokenizerError> {
        if !self.has_token() {
            self.start_token();
        }
        let mut open_count = 1;
        self.offset += 1;
        while self.offset < self.formula.len() {
            match self.formula.as_bytes()[self.offset] {
                b'[' => open_count += 1,
                b']' => {
                    open_count -= 1;
                    if open_count == 0 {
                        self.offset += 1;
                        self.extend_token();
                        return Ok(());
                    }
                }
                _ => {}
            }
            self.offset += 1;
        }
        Err(TokenizerError {
            message: "encountered unmatched '['".to_string(),
            pos: self.offset,
        })
    }

    /// An error sentinel starting with `#`.
    fn consume_error(&mut self) -> Result<(), TokenizerError> {
        if self.has_token() {
            self.save_token();
            self.start_token();
        }
        for &code in ERROR_CODES {
            let end = self.offset + code.len();
            if end <= self.formula.len() && &self.formula[self.offset..end] == code {
                self.items
                    .push(Token::new(code, TokenType::Operand, TokenSubType::Error));
                self.offset = end;
                self.start_token();
                return Ok(());
            }
        }
        Err(TokenizerError {
            message: format!("invalid error code at position {}", self.offset),
            pos: self.offset,
        })
    }

    fn consume_whitespace(&mut self) {
        self.save_token();
        let ws_start = self.offset;
        while matches!(self.current_byte(), Some(b' ') | Some(b'\n')) {
            self.offset += 1;
        }
        self.items.push(Token::new(
            &self.formula[ws_start..self.offset],
            TokenType::Whitespace,
            TokenSubType::None,
        ));
        self.start_token();
    }

    fn consume_operator(&mut self) {
        self.save_token();

        if self.offset + 1 < self.formula.len() {
            let two = &self.formula[self.offset..self.offset + 2];
            if two == ">=" || two == "<=" || two == "<>" {
                self.items
                    .push(Token::new(two, TokenType::OpInfix, TokenSubType::None));
                self.offset += 2;
                self.start_token();
                return;
            }
        }

        let curr_byte = self.formula.as_bytes()[self.offset];
        let token_type = match curr_byte {
            b'%' => TokenType::OpPostfix,
            b'+' | b'-' => {
                let prev = self
                    .items
                    .iter()
                    .rev()
                    .find(|t| t.token_type != TokenType::Whitespace);
                match prev {
                    Some(p)
                        if p.subtype == TokenSubType::Close
                            || p.token_type == TokenType::OpPostfix
                            || p.token_type == TokenType::Operand =>
                    {
                        TokenType::OpInfix
                    }
                    _ => TokenType::OpPrefix,
                }
            }
            _ => TokenType::OpInfix,
        };

        self.items.push(Token::new(
            &self.formula[self.offset..self.offset + 1],
            token_type,
            TokenSubType::None,
        ));
        self.offset += 1;
        self.start_token();
    }

    fn consume_opener(&mut self) {
        let curr_byte = self.formula.as_bytes()[self.offset];
        let token = if curr_byte == b'{' {
            self.save_token();
            Token::new("{", TokenType::Array, TokenSubType::Open)
        } else if self.has_token() {
            // accumulated identifier + '(' is a function call
            let value = format!("{}(", &self.formula[self.token_start..self.token_end]);
            Token::new(value, TokenType::Func, TokenSubType::Open)
        } else {
            Token::new("(", TokenType::Paren, TokenSubType::Open)
        };

        self.items.push(token.clone());
        self.token_stack.push(token);
        self.offset += 1;
        self.start_token();
    }

    fn consume_closer(&mut self) -> Result<(), TokenizerError> {
        self.save_token();

        let curr_byte = self.formula.as_bytes()[self.offset];
        let opener = self.token_stack.pop().ok_or_else(|| TokenizerError {
            message: format!("no matching opener for closer at position {}", self.offset),
            pos: self.offset,
        })?;

        let (expected, token_type) = match opener.token_type {
            TokenType::Array => (b'}', TokenType::Array),
            TokenType::Func => (b')', TokenType::Func),
            _ => (b')', TokenType::Paren),
        };
        if curr_byte != expected {
            return Err(TokenizerError {
                message: "mismatched ( and { pair".to_string(),
                pos: self.offset,
            });
        }

        self.items.push(Token::new(
            &self.formula[self.offset..self.offset + 1],
            token_type,
            TokenSubType::Close,
        ));
        self.offset += 1;
        self.start_token();
        Ok(())
    }

    fn consume_separator(&mut self) {
        self.save_token();

        let curr_byte = self.formula.as_bytes()[self.offset];
        let token = if curr_byte == b';' {
            Token::make_separator(";")
        } else {
            match self.token_stack.last() {
                Some(top)
                    if top.token_type == TokenType::Func
                        || top.token_type == TokenType::Array =>
                {
                    Token::make_separator(",")
                }
                // a comma outside a function or array is the union operator
                _ => Token::new(",", TokenType::OpInfix, TokenSubType::None),
            }
        };
        self.items.push(token);
        self.offset += 1;
        self.start_token();
    }

    /// Reconstruct the formula from the raw token stream.
    pub fn render(&self) -> String {
        if self.items.is_empty() {
            String::new()
        } else if self.items[0].token_type == TokenType::Literal {
            self.items[0].value.clone()
        } else {
            let concatenated: String = self.items.iter().map(|t| t.value.as_str()).collect();
            format!("={concatenated}")
        }
    }
}

impl TryFrom<&str> for Tokenizer {
    type Error = TokenizerError;

    fn try_from(value: &str) -> Result<Self, TokenizerError> {
        Tokenizer::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(formula: &str) -> Vec<(TokenType, TokenSubType, String)> {
        Tokenizer::new(formula)
            .unwrap()
            .amended()
            .into_iter()
            .map(|t| (t.token_type, t.subtype, t.value))
            .collect()
    }

    #[test]
    fn simple_sum() {
        let toks = kinds("=SUM(B5:B15,D5:D15)");
        assert_eq!(toks[0].0, TokenType::Func);
        assert_eq!(toks[0].2, "SUM(");
        assert_eq!(toks[1], (TokenType::Operand, TokenSubType::Range, "B5:B15".into()));
        assert_eq!(toks[2], (TokenType::Sep, TokenSubType::Arg, ",".into()));
        assert_eq!(toks[3].2, "D5:D15");
        assert_eq!(toks[4], (TokenType::Func, TokenSubType::Close, ")".into()));
    }

    #[test]
    fn whitespace_between_ranges_is_intersect() {
        let toks = kinds("=A1:B5 B3:C8");
        assert_eq!(
            toks[1],
            (TokenType::OpInfix, TokenSubType::Intersect, " ".into())
        );
        // but whitespace around an operator is dropped
        let toks = kinds("=1 + 2");
        assert_eq!(toks.len(), 3);
        assert!(toks.iter().all(|t| t.1 != TokenSubType::Intersect));
    }

    #[test]
    fn quoted_text_keeps_escape() {
        let toks = kinds("=\"a \"\"b\"\" c\"");
        assert_eq!(toks[0].1, TokenSubType::Text);
        assert_eq!(toks[0].2, "\"a \"\"b\"\" c\"");
    }

    #[test]
    fn quoted_sheet_reference_is_one_operand() {
        let toks = kinds("='My Sheet'!A1");
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].1, TokenSubType::Range);
        assert_eq!(toks[0].2, "'My Sheet'!A1");
    }

    #[test]
    fn array_separators() {
        let toks = kinds("={1,2;3,4}");
        let seps: Vec<_> = toks
            .iter()
            .filter(|t| t.0 == TokenType::Sep)
            .map(|t| t.1)
            .collect();
        assert_eq!(
            seps,
            [TokenSubType::Arg, TokenSubType::Row, TokenSubType::Arg]
        );
    }

    #[test]
    fn prefix_vs_infix_minus() {
        let toks = kinds("=-A1-3");
        assert_eq!(toks[0].0, TokenType::OpPrefix);
        assert_eq!(toks[2].0, TokenType::OpInfix);
    }

    #[test]
    fn scientific_notation_swallows_sign() {
        let toks = kinds("=1.5E+3+1");
        assert_eq!(toks[0], (TokenType::Operand, TokenSubType::Number, "1.5E+3".into()));
        assert_eq!(toks[1].0, TokenType::OpInfix);
    }

    #[test]
    fn error_operand() {
        let toks = kinds("=#DIV/0!");
        assert_eq!(toks[0], (TokenType::Operand, TokenSubType::Error, "#DIV/0!".into()));
        assert!(Tokenizer::new("=#BOGUS!").is_err());
    }

    #[test]
    fn unbalanced_groups_fail() {
        assert!(Tokenizer::new("=SUM(1,2").is_err());
        assert!(Tokenizer::new("=(1}").is_err());
        assert!(Tokenizer::new("=1)").is_err());
    }

    #[test]
    fn percent_is_postfix() {
        let toks = kinds("=50%");
        assert_eq!(toks[1].0, TokenType::OpPostfix);
    }

    #[test]
    fn union_comma_outside_call() {
        let toks = kinds("=(A1:A3,B1:B3)");
        let union: Vec<_> = toks.iter().filter(|t| t.0 == TokenType::OpInfix).collect();
        assert_eq!(union.len(), 1);
        assert_eq!(union[0].2, ",");
    }

    #[test]
    fn render_round_trip() {
        for formula in [
            "=SUM(B5:B15,D5:D15)",
            "=1.5E+3+1",
            "={1,2;3,4}",
            "=\"x\"&\"y\"",
            "=A1:B5 B3:C8",
        ] {
            let t = Tokenizer::new(formula).unwrap();
            assert_eq!(t.render(), formula);
            let again = Tokenizer::new(&t.render()).unwrap();
            assert_eq!(t.items, again.items);
        }
    }

    #[test]
    fn literal_formula() {
        let t = Tokenizer::new("plain text").unwrap();
        assert_eq!(t.items.len(), 1);
        assert_eq!(t.items[0].token_type, TokenType::Literal);
        assert_eq!(t.render(), "plain text");
    }
}
