//! Lexical tokens.
//!
//! Every token except literals, names and end of input has one fixed
//! spelling, returned by [`Token::text`]. Keyword and operator lookup in the
//! lexer goes through the tables here, so a spelling is written only once.

use std::fmt;

use moonlet_core::number::fmt_number;
use moonlet_core::string::LuaString;

/// Where a token starts: 1-based line and column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub pos: Pos,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Name(LuaString),
    Number(f64),
    String(LuaString),

    /// Reserved words.
    And,
    Break,
    Do,
    Else,
    ElseIf,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    /// Arithmetic and bitwise operators.
    Plus,
    Minus,
    Star,
    Slash,
    FloorDiv,
    Percent,
    Caret,
    Ampersand,
    Pipe,
    Tilde,
    ShiftLeft,
    ShiftRight,

    /// Comparison, length and concatenation.
    Equal,
    NotEqual,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Hash,
    DotDot,

    /// Punctuation.
    Assign,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    DoubleColon,
    Semi,
    Colon,
    Comma,
    Dot,
    DotDotDot,

    Eof,
}

const KEYWORDS: [Token; 22] = [
    Token::And,
    Token::Break,
    Token::Do,
    Token::Else,
    Token::ElseIf,
    Token::End,
    Token::False,
    Token::For,
    Token::Function,
    Token::Goto,
    Token::If,
    Token::In,
    Token::Local,
    Token::Nil,
    Token::Not,
    Token::Or,
    Token::Repeat,
    Token::Return,
    Token::Then,
    Token::True,
    Token::Until,
    Token::While,
];

/// Operators the lexer can match on their bytes alone, longest first.
/// `.`, `..`, `...` and `[` are left to the lexer because a number or a
/// long string can start with them.
const OPERATORS: [Token; 29] = [
    Token::FloorDiv,
    Token::ShiftLeft,
    Token::ShiftRight,
    Token::Equal,
    Token::NotEqual,
    Token::LessEq,
    Token::GreaterEq,
    Token::DoubleColon,
    Token::Plus,
    Token::Minus,
    Token::Star,
    Token::Slash,
    Token::Percent,
    Token::Caret,
    Token::Hash,
    Token::Ampersand,
    Token::Tilde,
    Token::Pipe,
    Token::Less,
    Token::Greater,
    Token::Assign,
    Token::LParen,
    Token::RParen,
    Token::LBrace,
    Token::RBrace,
    Token::RBracket,
    Token::Semi,
    Token::Colon,
    Token::Comma,
];

impl Token {
    /// The fixed spelling, or `None` for names, literals and end of input.
    pub fn text(&self) -> Option<&'static str> {
        let s = match self {
            Token::Name(_) | Token::Number(_) | Token::String(_) | Token::Eof => return None,
            Token::And => "and",
            Token::Break => "break",
            Token::Do => "do",
            Token::Else => "else",
            Token::ElseIf => "elseif",
            Token::End => "end",
            Token::False => "false",
            Token::For => "for",
            Token::Function => "function",
            Token::Goto => "goto",
            Token::If => "if",
            Token::In => "in",
            Token::Local => "local",
            Token::Nil => "nil",
            Token::Not => "not",
            Token::Or => "or",
            Token::Repeat => "repeat",
            Token::Return => "return",
            Token::Then => "then",
            Token::True => "true",
            Token::Until => "until",
            Token::While => "while",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::FloorDiv => "//",
            Token::Percent => "%",
            Token::Caret => "^",
            Token::Ampersand => "&",
            Token::Pipe => "|",
            Token::Tilde => "~",
            Token::ShiftLeft => "<<",
            Token::ShiftRight => ">>",
            Token::Equal => "==",
            Token::NotEqual => "~=",
            Token::Less => "<",
            Token::LessEq => "<=",
            Token::Greater => ">",
            Token::GreaterEq => ">=",
            Token::Hash => "#",
            Token::DotDot => "..",
            Token::Assign => "=",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::DoubleColon => "::",
            Token::Semi => ";",
            Token::Colon => ":",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::DotDotDot => "...",
        };
        Some(s)
    }

    /// The reserved word spelled by `name`, if any.
    pub fn keyword(name: &[u8]) -> Option<Token> {
        KEYWORDS
            .iter()
            .find(|k| k.text().is_some_and(|t| t.as_bytes() == name))
            .cloned()
    }

    /// The operator at the start of `input`, with its length in bytes.
    pub fn operator(input: &[u8]) -> Option<(Token, usize)> {
        OPERATORS.iter().find_map(|op| {
            let t = op.text()?.as_bytes();
            input.starts_with(t).then(|| (op.clone(), t.len()))
        })
    }

    pub fn is_keyword(&self) -> bool {
        KEYWORDS.contains(self)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Name(s) | Token::String(s) => write!(f, "{s}"),
            Token::Number(n) => f.write_str(&fmt_number(*n)),
            Token::Eof => f.write_str("<eof>"),
            other => f.write_str(other.text().unwrap_or_default()),
        }
    }
}
