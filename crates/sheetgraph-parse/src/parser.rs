//! Shunting-yard parser: token stream → RPN → AST.
//!
//! The conversion extends the classic algorithm with variadic-function
//! argument counting: a per-function `arg_count` stack and a `saw_value`
//! stack track whether the current argument slot has content, and each
//! argument separator or closing parenthesis commits an argument. Array
//! literals are lowered into `ARRAY`/`ARRAYROW` pseudo-function groups
//! before the yard runs and reassembled into matrix nodes when the AST is
//! built from the RPN stream.

use std::error::Error;
use std::fmt::{self, Display};

use smallvec::SmallVec;

use crate::tokenizer::{Associativity, Token, TokenSubType, TokenType, Tokenizer, TokenizerError};
use sheetgraph_common::{CellError, CellValue, Notation, ParsedRef};

#[derive(Debug)]
pub struct ParserError {
    pub message: String,
    pub position: Option<usize>,
}

impl ParserError {
    fn new<S: Into<String>>(message: S, position: Option<usize>) -> Self {
        ParserError {
            message: message.into(),
            position,
        }
    }
}

impl Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(pos) = self.position {
            write!(f, "ParserError at token {}: {}", pos, self.message)
        } else {
            write!(f, "ParserError: {}", self.message)
        }
    }
}

impl Error for ParserError {}

impl From<TokenizerError> for ParserError {
    fn from(err: TokenizerError) -> Self {
        ParserError::new(err.message, Some(err.pos))
    }
}

/* ───────────────────────────── AST ────────────────────────────────── */

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ASTNodeType {
    Literal(CellValue),
    Reference {
        /// Original reference text, preserved for display and diagnostics.
        original: String,
        reference: ParsedRef,
    },
    UnaryOp {
        op: String,
        expr: Box<ASTNode>,
    },
    BinaryOp {
        op: String,
        left: Box<ASTNode>,
        right: Box<ASTNode>,
    },
    Function {
        name: String,
        args: Vec<ASTNode>,
    },
    Array(Vec<Vec<ASTNode>>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ASTNode {
    pub node_type: ASTNodeType,
}

impl ASTNode {
    pub fn new(node_type: ASTNodeType) -> Self {
        ASTNode { node_type }
    }

    pub fn literal(value: CellValue) -> Self {
        ASTNode::new(ASTNodeType::Literal(value))
    }

    /// Pre-order traversal with an explicit stack; no recursion.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a ASTNode)) {
        let mut stack: SmallVec<[&ASTNode; 8]> = SmallVec::new();
        stack.push(self);
        while let Some(node) = stack.pop() {
            f(node);
            match &node.node_type {
                ASTNodeType::UnaryOp { expr, .. } => stack.push(expr),
                ASTNodeType::BinaryOp { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
                ASTNodeType::Function { args, .. } => {
                    for a in args.iter().rev() {
                        stack.push(a);
                    }
                }
                ASTNodeType::Array(rows) => {
                    for r in rows.iter().rev() {
                        for item in r.iter().rev() {
                            stack.push(item);
                        }
                    }
                }
                ASTNodeType::Literal(_) | ASTNodeType::Reference { .. } => {}
            }
        }
    }

    /// Every reference this formula touches, in traversal order.
    pub fn references(&self) -> Vec<&ParsedRef> {
        let mut out = Vec::new();
        self.visit(&mut |node| {
            if let ASTNodeType::Reference { reference, .. } = &node.node_type {
                out.push(reference);
            }
        });
        out
    }

    /// Whether a call to `name` (case-insensitive) appears anywhere.
    pub fn calls_function(&self, name: &str) -> bool {
        let mut found = false;
        self.visit(&mut |node| {
            if let ASTNodeType::Function { name: n, .. } = &node.node_type {
                if n.eq_ignore_ascii_case(name) {
                    found = true;
                }
            }
        });
        found
    }
}

impl Display for ASTNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_type {
            ASTNodeType::Literal(v) => write!(f, "Literal({v})"),
            ASTNodeType::Reference { original, .. } => write!(f, "Reference({original})"),
            ASTNodeType::UnaryOp { op, expr } => write!(f, "UnaryOp({op}, {expr})"),
            ASTNodeType::BinaryOp { op, left, right } => {
                write!(f, "BinaryOp({op}, {left}, {right})")
            }
            ASTNodeType::Function { name, args } => {
                write!(f, "Function({name}")?;
                for a in args {
                    write!(f, ", {a}")?;
                }
                write!(f, ")")
            }
            ASTNodeType::Array(rows) => write!(f, "Array({} rows)", rows.len()),
        }
    }
}

/* ───────────────────────────── RPN ────────────────────────────────── */

/// One postfix-stream entry. `num_args` is meaningful only for function
/// and array-group tokens, where it records the committed argument count.
#[derive(Debug, Clone, PartialEq)]
pub struct RpnToken {
    pub token: Token,
    pub num_args: usize,
}

impl RpnToken {
    fn plain(token: Token) -> Self {
        RpnToken { token, num_args: 0 }
    }
}

fn array_row_open() -> Token {
    Token::new("", TokenType::ArrayRow, TokenSubType::Open)
}

fn paren(open: bool) -> Token {
    if open {
        Token::new("(", TokenType::Paren, TokenSubType::Open)
    } else {
        Token::new(")", TokenType::Paren, TokenSubType::Close)
    }
}

/// Rewrite the amended token stream so the yard sees uniform groups:
/// a function opener is followed by an explicit `(`; `{` lowers to
/// ARRAY + ARRAYROW groups; `;` closes a row and opens the next.
fn rewrite_stream(tokens: &[Token]) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len() + 8);
    for token in tokens {
        match (token.token_type, token.subtype) {
            (TokenType::Func, TokenSubType::Open) => {
                out.push(token.clone());
                out.push(paren(true));
            }
            (TokenType::Func, TokenSubType::Close) => out.push(paren(false)),
            (TokenType::Array, TokenSubType::Open) => {
                out.push(token.clone());
                out.push(paren(true));
                out.push(array_row_open());
                out.push(paren(true));
            }
            (TokenType::Array, TokenSubType::Close) => {
                out.push(token.clone());
                out.push(paren(false));
            }
            (TokenType::Sep, TokenSubType::Row) => {
                out.push(paren(false));
                out.push(Token::new(",", TokenType::Sep, TokenSubType::Arg));
                out.push(array_row_open());
                out.push(paren(true));
            }
            _ => out.push(token.clone()),
        }
    }
    out
}

/// Shunting-yard with argument counting; returns the postfix stream.
pub fn parse_to_rpn(tokens: &[Token]) -> Result<Vec<RpnToken>, ParserError> {
    let tokens = rewrite_stream(tokens);

    let mut output: Vec<RpnToken> = Vec::with_capacity(tokens.len());
    let mut stack: Vec<Token> = Vec::new();
    let mut saw_value: Vec<bool> = Vec::new();
    let mut arg_count: Vec<usize> = Vec::new();

    let mismatched = |pos: usize| ParserError::new("mismatched or misplaced parentheses", Some(pos));

    for (pos, token) in tokens.iter().enumerate() {
        if token.token_type == TokenType::Operand {
            output.push(RpnToken::plain(token.clone()));
            if let Some(last) = saw_value.last_mut() {
                *last = true;
            }
        } else if token.is_func_open() {
            stack.push(token.clone());
            arg_count.push(0);
            if let Some(last) = saw_value.last_mut() {
                *last = true;
            }
            saw_value.push(false);
        } else if token.token_type == TokenType::Sep {
            while let Some(top) = stack.last() {
                if top.subtype == TokenSubType::Open {
                    break;
                }
                output.push(RpnToken::plain(stack.pop().unwrap()));
            }
            if saw_value.is_empty() {
                return Err(mismatched(pos));
            }
            if saw_value.pop().unwrap() {
                if let Some(count) = arg_count.last_mut() {
                    *count += 1;
                }
            }
            saw_value.push(false);
        } else if token.is_operator() {
            let (prec, assoc) = token.precedence().unwrap_or((0, Associativity::Left));
            while let Some(top) = stack.last() {
                if !top.is_operator() {
                    break;
                }
                let (top_prec, _) = top.precedence().unwrap_or((0, Associativity::Left));
                let yields = prec < top_prec || (assoc == Associativity::Left && prec == top_prec);
                if yields {
                    output.push(RpnToken::plain(stack.pop().unwrap()));
                } else {
                    break;
                }
            }
            stack.push(token.clone());
        } else if token.subtype == TokenSubType::Open {
            debug_assert_eq!(token.token_type, TokenType::Paren);
            stack.push(token.clone());
        } else if token.subtype == TokenSubType::Close {
            loop {
                match stack.last() {
                    None => return Err(mismatched(pos)),
                    Some(top) if top.subtype == TokenSubType::Open => break,
                    Some(_) => output.push(RpnToken::plain(stack.pop().unwrap())),
                }
            }
            stack.pop();

            if stack.last().is_some_and(|t| t.is_func_open()) {
                let func = stack.pop().unwrap();
                let committed = arg_count.pop().ok_or_else(|| mismatched(pos))?;
                let pending = saw_value.pop().ok_or_else(|| mismatched(pos))? as usize;
                output.push(RpnToken {
                    token: func,
                    num_args: committed + pending,
                });
            }
        } else {
            return Err(ParserError::new(
                format!("unexpected token {token}"),
                Some(pos),
            ));
        }
    }

    while let Some(top) = stack.pop() {
        if matches!(top.subtype, TokenSubType::Open | TokenSubType::Close) {
            return Err(mismatched(tokens.len()));
        }
        output.push(RpnToken::plain(top));
    }

    Ok(output)
}

/* ─────────────────────────── AST building ─────────────────────────── */

enum StackEntry {
    Node(ASTNode),
    Row(Vec<ASTNode>),
}

fn pop_node(stack: &mut Vec<StackEntry>, what: &str) -> Result<ASTNode, ParserError> {
    match stack.pop() {
        Some(StackEntry::Node(node)) => Ok(node),
        _ => Err(ParserError::new(format!("'{what}' missing operand"), None)),
    }
}

fn operand_node(token: &Token, notation: Notation) -> Result<ASTNode, ParserError> {
    match token.subtype {
        TokenSubType::Number => {
            let value: f64 = token
                .value
                .parse()
                .map_err(|_| ParserError::new(format!("invalid number '{}'", token.value), None))?;
            Ok(ASTNode::literal(CellValue::Number(value)))
        }
        TokenSubType::Text => {
            let mut text = token.value.clone();
            if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
                text = text[1..text.len() - 1].replace("\"\"", "\"");
            }
            Ok(ASTNode::literal(CellValue::Text(text)))
        }
        TokenSubType::Logical => Ok(ASTNode::literal(CellValue::Boolean(
            token.value.eq_ignore_ascii_case("TRUE"),
        ))),
        TokenSubType::Error => {
            let error = CellError::from_error_string(&token.value).ok_or_else(|| {
                ParserError::new(format!("unknown error code '{}'", token.value), None)
            })?;
            Ok(ASTNode::literal(CellValue::Error(error)))
        }
        TokenSubType::Range => {
            let reference = ParsedRef::parse(&token.value, notation).map_err(|e| {
                ParserError::new(
                    format!("invalid reference '{}': {}", token.value, e.message.as_deref().unwrap_or("")),
                    None,
                )
            })?;
            Ok(ASTNode::new(ASTNodeType::Reference {
                original: token.value.clone(),
                reference,
            }))
        }
        _ => Err(ParserError::new(
            format!("unexpected operand subtype {:?}", token.subtype),
            None,
        )),
    }
}

/// Fold an RPN stream into a tree.
pub fn build_ast(rpn: &[RpnToken], notation: Notation) -> Result<ASTNode, ParserError> {
    let mut stack: Vec<StackEntry> = Vec::with_capacity(rpn.len());

    for item in rpn {
        let token = &item.token;
        match token.token_type {
            TokenType::Operand => stack.push(StackEntry::Node(operand_node(token, notation)?)),
            TokenType::OpInfix => {
                let right = pop_node(&mut stack, &token.value)?;
                let left = pop_node(&mut stack, &token.value)?;
                stack.push(StackEntry::Node(ASTNode::new(ASTNodeType::BinaryOp {
                    op: token.value.clone(),
                    left: Box::new(left),
                    right: Box::new(right),
                })));
            }
            TokenType::OpPrefix | TokenType::OpPostfix => {
                let expr = pop_node(&mut stack, &token.value)?;
                stack.push(StackEntry::Node(ASTNode::new(ASTNodeType::UnaryOp {
                    op: token.value.clone(),
                    expr: Box::new(expr),
                })));
            }
            TokenType::Func => {
                let name = token.value.trim_end_matches('(').to_string();
                let mut args = Vec::with_capacity(item.num_args);
                for _ in 0..item.num_args {
                    args.push(pop_node(&mut stack, &name)?);
                }
                args.reverse();
                stack.push(StackEntry::Node(ASTNode::new(ASTNodeType::Function {
                    name,
                    args,
                })));
            }
            TokenType::ArrayRow => {
                let mut row = Vec::with_capacity(item.num_args);
                for _ in 0..item.num_args {
                    row.push(pop_node(&mut stack, "array row")?);
                }
                row.reverse();
                stack.push(StackEntry::Row(row));
            }
            TokenType::Array => {
                let mut rows = Vec::with_capacity(item.num_args);
                for _ in 0..item.num_args {
                    match stack.pop() {
                        Some(StackEntry::Row(row)) => rows.push(row),
                        _ => return Err(ParserError::new("malformed array literal", None)),
                    }
                }
                rows.reverse();
                stack.push(StackEntry::Node(ASTNode::new(ASTNodeType::Array(rows))));
            }
            _ => {
                return Err(ParserError::new(
                    format!("unexpected token in RPN stream: {token}"),
                    None,
                ));
            }
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(StackEntry::Node(root)), true) => Ok(root),
        _ => Err(ParserError::new(
            "formula did not reduce to a single expression",
            None,
        )),
    }
}

/* ─────────────────────────── entry points ─────────────────────────── */

/// Tokenize and parse one formula. A formula without a leading `=` is a
/// text literal.
pub fn parse_formula(formula: &str, notation: Notation) -> Result<ASTNode, ParserError> {
    let tokenizer = Tokenizer::new(formula)?;
    if let [only] = tokenizer.items.as_slice() {
        if only.token_type == TokenType::Literal {
            return Ok(ASTNode::literal(CellValue::Text(only.value.clone())));
        }
    }
    let tokens = tokenizer.amended();
    if tokens.is_empty() {
        return Err(ParserError::new("no tokens to parse", None));
    }
    let rpn = parse_to_rpn(&tokens)?;
    build_ast(&rpn, notation)
}

/// A1-notation convenience used throughout the tests.
pub fn parse(formula: &str) -> Result<ASTNode, ParserError> {
    parse_formula(formula, Notation::A1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetgraph_common::{Coord, ParsedRef};

    fn rpn_names(formula: &str) -> Vec<String> {
        let tokens = Tokenizer::new(formula).unwrap().amended();
        parse_to_rpn(&tokens)
            .unwrap()
            .iter()
            .map(|r| {
                if r.token.token_type == TokenType::Func
                    || r.token.token_type == TokenType::Array
                    || r.token.token_type == TokenType::ArrayRow
                {
                    format!("{}#{}", r.token.value.trim_end_matches('('), r.num_args)
                } else {
                    r.token.value.clone()
                }
            })
            .collect()
    }

    #[test]
    fn sum_of_two_ranges_rpn() {
        // the canonical B5:B15|D5:D15|SUM stream
        assert_eq!(rpn_names("=SUM(B5:B15,D5:D15)"), ["B5:B15", "D5:D15", "SUM#2"]);
    }

    #[test]
    fn precedence_shapes_rpn() {
        assert_eq!(rpn_names("=1+2*3"), ["1", "2", "3", "*", "+"]);
        assert_eq!(rpn_names("=(1+2)*3"), ["1", "2", "+", "3", "*"]);
        assert_eq!(rpn_names("=2^3^2"), ["2", "3", "^", "2", "^"]);
        assert_eq!(rpn_names("=1<2&\"x\""), ["1", "2", "\"x\"", "&", "<"]);
    }

    #[test]
    fn unary_binds_tighter_than_binary() {
        let ast = parse("=-A1-3").unwrap();
        match &ast.node_type {
            ASTNodeType::BinaryOp { op, left, .. } => {
                assert_eq!(op, "-");
                assert!(matches!(left.node_type, ASTNodeType::UnaryOp { .. }));
            }
            other => panic!("unexpected: {other:?}"),
        }
        // double negation nests
        let ast = parse("=--3").unwrap();
        match &ast.node_type {
            ASTNodeType::UnaryOp { expr, .. } => {
                assert!(matches!(expr.node_type, ASTNodeType::UnaryOp { .. }));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn percent_postfix() {
        let ast = parse("=50%").unwrap();
        match &ast.node_type {
            ASTNodeType::UnaryOp { op, .. } => assert_eq!(op, "%"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn variadic_arg_counting() {
        assert_eq!(rpn_names("=F(1,2,3)").last().unwrap(), "F#3");
        assert_eq!(rpn_names("=F()").last().unwrap(), "F#0");
        assert_eq!(rpn_names("=F(G(1),2)").last().unwrap(), "F#2");
        // nested call counts as one argument of the outer call
        assert_eq!(rpn_names("=F(G(1,2,3))").last().unwrap(), "F#1");
    }

    #[test]
    fn array_literal_builds_rows() {
        let ast = parse("={1,2;3,4}").unwrap();
        match &ast.node_type {
            ASTNodeType::Array(rows) => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0].len(), 2);
                assert_eq!(rows[1].len(), 2);
                assert_eq!(
                    rows[1][0].node_type,
                    ASTNodeType::Literal(CellValue::Number(3.0))
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn mixed_array_values() {
        let ast = parse("={\"a\",\"b\";\"c\",#N/A;-1,TRUE}").unwrap();
        match &ast.node_type {
            ASTNodeType::Array(rows) => {
                assert_eq!(rows.len(), 3);
                assert!(matches!(
                    rows[1][1].node_type,
                    ASTNodeType::Literal(CellValue::Error(_))
                ));
                assert!(matches!(
                    rows[2][0].node_type,
                    ASTNodeType::UnaryOp { .. }
                ));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn intersect_and_union_operators() {
        let ast = parse("=SUM(A1:B5 B3:C8)").unwrap();
        match &ast.node_type {
            ASTNodeType::Function { name, args } => {
                assert_eq!(name, "SUM");
                assert_eq!(args.len(), 1);
                match &args[0].node_type {
                    ASTNodeType::BinaryOp { op, .. } => assert_eq!(op, " "),
                    other => panic!("unexpected: {other:?}"),
                }
            }
            other => panic!("unexpected: {other:?}"),
        }

        let ast = parse("=SUM((A1:A3,B1:B3))").unwrap();
        match &ast.node_type {
            ASTNodeType::Function { args, .. } => match &args[0].node_type {
                ASTNodeType::BinaryOp { op, .. } => assert_eq!(op, ","),
                other => panic!("unexpected: {other:?}"),
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn text_unescapes() {
        let ast = parse("=\"more \"\"test\"\" text\"").unwrap();
        assert_eq!(
            ast.node_type,
            ASTNodeType::Literal(CellValue::Text("more \"test\" text".into()))
        );
    }

    #[test]
    fn reference_collection() {
        let ast = parse("=IF(A1>0,SUM(B1:B9),C3)").unwrap();
        let refs: Vec<String> = ast.references().iter().map(|r| r.to_string()).collect();
        assert_eq!(refs, ["A1", "B1:B9", "C3"]);
    }

    #[test]
    fn named_range_reference() {
        let ast = parse("=MyTotal*2").unwrap();
        let refs = ast.references();
        assert!(matches!(refs[0], ParsedRef::Name(n) if n == "MyTotal"));
    }

    #[test]
    fn r1c1_notation_parses() {
        let ast = parse_formula("=R[1]C[-2]+R3C5", Notation::R1C1).unwrap();
        let refs = ast.references();
        assert_eq!(refs.len(), 2);
        match refs[0] {
            ParsedRef::Cell(c) => {
                assert_eq!(c.row, Coord::Rel(1));
                assert_eq!(c.col, Coord::Rel(-2));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_is_deterministic() {
        let formula = "=IF(SUM(A1:A9)>10,\"big\",MIN(B1,B2)+C1*2%)";
        let a = parse(formula).unwrap();
        let b = parse(formula).unwrap();
        assert_eq!(a, b);
        let t1 = Tokenizer::new(formula).unwrap().amended();
        let t2 = Tokenizer::new(formula).unwrap().amended();
        assert_eq!(t1, t2);
    }

    #[test]
    fn operator_without_operand_errors() {
        assert!(parse("=+").is_err());
        assert!(parse("=1+").is_err());
        assert!(parse("=*2").is_err());
    }

    #[test]
    fn calls_function_scan() {
        let ast = parse("=1+LINEST(A1:A5)").unwrap();
        assert!(ast.calls_function("linest"));
        assert!(!ast.calls_function("sum"));
    }

    #[test]
    fn literal_formula_is_text() {
        let ast = parse("hello").unwrap();
        assert_eq!(
            ast.node_type,
            ASTNodeType::Literal(CellValue::Text("hello".into()))
        );
    }
}
