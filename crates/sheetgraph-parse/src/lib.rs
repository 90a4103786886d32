pub mod parser;
pub mod tokenizer;

pub use parser::{ASTNode, ASTNodeType, ParserError, RpnToken, build_ast, parse, parse_formula,
    parse_to_rpn};
pub use tokenizer::{Associativity, Token, TokenSubType, TokenType, Tokenizer, TokenizerError};

pub use sheetgraph_common::{
    Addr, CellAddr, CellError, CellValue, ErrorKind, Notation, ParsedRef, RangeAddr,
};
