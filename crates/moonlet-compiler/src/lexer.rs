use crate::token::{Pos, SpannedToken, Token};
use moonlet_core::number::str_to_number;
use moonlet_core::string::LuaString;
use std::fmt;

/// Lexer error.
#[derive(Clone, Debug, PartialEq)]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for LexError {}

/// Pull-based lexer with one token of lookahead.
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    current: Result<SpannedToken, LexError>,
    lookahead: Option<(Result<SpannedToken, LexError>, String)>,
    /// Original text of the current token (used in "near '...'" messages).
    pub token_text: String,
    /// Line of the last consumed token.
    pub lastline: u32,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer from source bytes.
    pub fn new(source: &'a [u8]) -> Self {
        let mut lexer = Lexer {
            source,
            pos: 0,
            line: 1,
            column: 1,
            current: Ok(SpannedToken {
                token: Token::Eof,
                pos: Pos { line: 1, column: 1 },
            }),
            lookahead: None,
            token_text: String::new(),
            lastline: 1,
        };
        let (tok, text) = lexer.scan_token();
        lexer.current = tok;
        lexer.token_text = text;
        lexer
    }

    /// Peek at the current token without consuming.
    pub fn current(&self) -> Result<&SpannedToken, &LexError> {
        self.current.as_ref()
    }

    /// Peek one token past the current one.
    pub fn peek_token(&mut self) -> Result<&SpannedToken, &LexError> {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.scan_token());
        }
        match &self.lookahead {
            Some((tok, _)) => tok.as_ref(),
            None => self.current.as_ref(),
        }
    }

    /// Consume the current token and advance to the next one.
    pub fn advance(&mut self) -> Result<SpannedToken, LexError> {
        if let Ok(tok) = &self.current {
            self.lastline = tok.pos.line;
        }
        let (next, text) = match self.lookahead.take() {
            Some(pair) => pair,
            None => self.scan_token(),
        };
        self.token_text = text;
        std::mem::replace(&mut self.current, next)
    }

    /// Get current line number.
    pub fn line(&self) -> u32 {
        self.line
    }

    // ---- Internal scanning ----

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance_char(&mut self) -> Option<u8> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        if ch == b'\n' || ch == b'\r' {
            // \n\r and \r\n count as one newline
            if let Some(next) = self.peek() {
                if (next == b'\n' || next == b'\r') && next != ch {
                    self.pos += 1;
                }
            }
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn error(&self, message: impl Into<String>, at: Pos) -> LexError {
        LexError {
            message: message.into(),
            line: at.line,
            column: at.column,
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            while let Some(ch) = self.peek() {
                if matches!(ch, b' ' | b'\t' | b'\n' | b'\r' | b'\x0C' | b'\x0B') {
                    self.advance_char();
                } else {
                    break;
                }
            }
            if self.peek() == Some(b'-') && self.peek_at(1) == Some(b'-') {
                let at = Pos {
                    line: self.line,
                    column: self.column,
                };
                self.advance_char();
                self.advance_char();
                if let Some(level) = self.check_long_bracket() {
                    self.skip_long_bracket_open(level);
                    self.long_string_content(level, at, "comment")?;
                    continue;
                }
                while let Some(ch) = self.peek() {
                    if ch == b'\n' || ch == b'\r' {
                        break;
                    }
                    self.advance_char();
                }
                continue;
            }
            return Ok(());
        }
    }

    /// Check if current position starts a long bracket `[=*[`. Returns the level if so.
    fn check_long_bracket(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(level + 1) == Some(b'=') {
            level += 1;
        }
        (self.peek_at(level + 1) == Some(b'[')).then_some(level)
    }

    fn skip_long_bracket_open(&mut self, level: usize) {
        for _ in 0..level + 2 {
            self.advance_char();
        }
    }

    fn scan_token(&mut self) -> (Result<SpannedToken, LexError>, String) {
        if let Err(e) = self.skip_whitespace_and_comments() {
            return (Err(e), String::new());
        }
        let start = self.pos;
        let result = self.scan_token_inner();
        let text = match &result {
            Ok(SpannedToken {
                token: Token::Eof, ..
            }) => "<eof>".to_string(),
            _ => String::from_utf8_lossy(&self.source[start..self.pos]).into_owned(),
        };
        (result, text)
    }

    fn scan_token_inner(&mut self) -> Result<SpannedToken, LexError> {
        let at = Pos {
            line: self.line,
            column: self.column,
        };
        let tok = |token| Ok(SpannedToken { token, pos: at });
        let Some(ch) = self.peek() else {
            return tok(Token::Eof);
        };

        if let Some((t, len)) = Token::operator(&self.source[self.pos..]) {
            for _ in 0..len {
                self.advance_char();
            }
            return tok(t);
        }

        match ch {
            b'.' => {
                if self.peek_at(1) == Some(b'.') {
                    self.advance_char();
                    self.advance_char();
                    if self.peek() == Some(b'.') {
                        self.advance_char();
                        return tok(Token::DotDotDot);
                    }
                    return tok(Token::DotDot);
                }
                if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                    return self.scan_number(at);
                }
                self.advance_char();
                tok(Token::Dot)
            }
            b'[' => match self.check_long_bracket() {
                Some(level) => {
                    self.skip_long_bracket_open(level);
                    let content = self.long_string_content(level, at, "string")?;
                    tok(Token::String(LuaString::from(content)))
                }
                None => {
                    self.advance_char();
                    tok(Token::LBracket)
                }
            },
            b'"' | b'\'' => self.scan_short_string(at),
            b'0'..=b'9' => self.scan_number(at),
            _ if is_ident_start(ch) => {
                let start = self.pos;
                while self.peek().is_some_and(is_ident_continue) {
                    self.advance_char();
                }
                let name = &self.source[start..self.pos];
                match Token::keyword(name) {
                    Some(k) => tok(k),
                    None => tok(Token::Name(LuaString::new(name))),
                }
            }
            _ => {
                self.advance_char();
                let near = if ch.is_ascii_graphic() {
                    format!("'{}'", ch as char)
                } else {
                    format!("'<\\{}>'", ch)
                };
                Err(self.error(format!("unexpected symbol near {near}"), at))
            }
        }
    }

    /// Read a numeral greedily, then let the shared number reader judge it.
    fn scan_number(&mut self, at: Pos) -> Result<SpannedToken, LexError> {
        let start = self.pos;
        let hex = self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X'));
        let (e1, e2) = if hex { (b'p', b'P') } else { (b'e', b'E') };
        loop {
            match self.peek() {
                Some(c) if c == e1 || c == e2 => {
                    self.advance_char();
                    if matches!(self.peek(), Some(b'+' | b'-')) {
                        self.advance_char();
                    }
                }
                Some(c) if c.is_ascii_hexdigit() || c == b'.' || c == b'x' || c == b'X' => {
                    self.advance_char();
                }
                Some(c) if is_ident_continue(c) => {
                    self.advance_char();
                }
                _ => break,
            }
        }
        let text = &self.source[start..self.pos];
        match str_to_number(text) {
            Some(n) => Ok(SpannedToken {
                token: Token::Number(n),
                pos: at,
            }),
            None => Err(self.error(
                format!("malformed number near '{}'", String::from_utf8_lossy(text)),
                at,
            )),
        }
    }

    fn scan_short_string(&mut self, at: Pos) -> Result<SpannedToken, LexError> {
        let start = self.pos;
        let quote = self.source[self.pos];
        self.advance_char();
        let mut buf = Vec::new();
        let near = |lx: &Self| String::from_utf8_lossy(&lx.source[start..lx.pos]).into_owned();
        loop {
            let Some(ch) = self.peek() else {
                return Err(self.error("unfinished string near <eof>", at));
            };
            match ch {
                b'\n' | b'\r' => {
                    return Err(self.error(format!("unfinished string near '{}'", near(self)), at));
                }
                b'\\' => {
                    self.advance_char();
                    let Some(e) = self.peek() else {
                        return Err(self.error("unfinished string near <eof>", at));
                    };
                    let simple = match e {
                        b'a' => Some(0x07),
                        b'b' => Some(0x08),
                        b'f' => Some(0x0C),
                        b'n' => Some(b'\n'),
                        b'r' => Some(b'\r'),
                        b't' => Some(b'\t'),
                        b'v' => Some(0x0B),
                        b'\\' => Some(b'\\'),
                        b'\'' => Some(b'\''),
                        b'"' => Some(b'"'),
                        _ => None,
                    };
                    if let Some(b) = simple {
                        self.advance_char();
                        buf.push(b);
                        continue;
                    }
                    match e {
                        b'\n' | b'\r' => {
                            self.advance_char();
                            buf.push(b'\n');
                        }
                        b'x' => {
                            self.advance_char();
                            let mut v = 0u8;
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(h) if h.is_ascii_hexdigit() => {
                                        self.advance_char();
                                        v = (v << 4) | (h as char).to_digit(16).unwrap_or(0) as u8;
                                    }
                                    _ => {
                                        return Err(self.error(
                                            format!("hexadecimal digit expected near '{}'", near(self)),
                                            at,
                                        ))
                                    }
                                }
                            }
                            buf.push(v);
                        }
                        b'u' => {
                            self.advance_char();
                            if self.peek() != Some(b'{') {
                                return Err(self.error(format!("missing '{{' near '{}'", near(self)), at));
                            }
                            self.advance_char();
                            let mut code: u32 = 0;
                            let mut digits = 0;
                            while let Some(h) = self.peek().filter(u8::is_ascii_hexdigit) {
                                self.advance_char();
                                code = code.saturating_mul(16).saturating_add((h as char).to_digit(16).unwrap_or(0));
                                digits += 1;
                                if code > 0x7FFF_FFFF {
                                    return Err(self.error(format!("UTF-8 value too large near '{}'", near(self)), at));
                                }
                            }
                            if digits == 0 || self.peek() != Some(b'}') {
                                return Err(self.error(format!("missing '}}' near '{}'", near(self)), at));
                            }
                            self.advance_char();
                            encode_utf8(code, &mut buf);
                        }
                        b'z' => {
                            self.advance_char();
                            while self.peek().is_some_and(|c| c.is_ascii_whitespace() || c == 0x0B) {
                                self.advance_char();
                            }
                        }
                        b'0'..=b'9' => {
                            let mut v: u32 = 0;
                            for _ in 0..3 {
                                match self.peek() {
                                    Some(d) if d.is_ascii_digit() => {
                                        self.advance_char();
                                        v = v * 10 + u32::from(d - b'0');
                                    }
                                    _ => break,
                                }
                            }
                            if v > 255 {
                                return Err(self.error(format!("decimal escape too large near '{}'", near(self)), at));
                            }
                            buf.push(v as u8);
                        }
                        _ => {
                            self.advance_char();
                            return Err(self.error(format!("invalid escape sequence near '{}'", near(self)), at));
                        }
                    }
                }
                c if c == quote => {
                    self.advance_char();
                    break;
                }
                c => {
                    self.advance_char();
                    buf.push(c);
                }
            }
        }
        Ok(SpannedToken {
            token: Token::String(LuaString::from(buf)),
            pos: at,
        })
    }

    /// Body of a long string or comment after its opening bracket.
    fn long_string_content(&mut self, level: usize, at: Pos, what: &str) -> Result<Vec<u8>, LexError> {
        // A newline right after the opening bracket is skipped.
        if matches!(self.peek(), Some(b'\n' | b'\r')) {
            self.advance_char();
        }
        let mut buf = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(self.error(format!("unfinished long {what} near <eof>"), at));
                }
                Some(b']') if self.closes_long_bracket(level) => {
                    for _ in 0..level + 2 {
                        self.advance_char();
                    }
                    return Ok(buf);
                }
                Some(b'\n' | b'\r') => {
                    self.advance_char();
                    buf.push(b'\n');
                }
                Some(c) => {
                    self.advance_char();
                    buf.push(c);
                }
            }
        }
    }

    fn closes_long_bracket(&self, level: usize) -> bool {
        (1..=level).all(|i| self.peek_at(i) == Some(b'=')) && self.peek_at(level + 1) == Some(b']')
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

/// Encode a code point (up to 2^31) with the extended UTF-8 scheme.
fn encode_utf8(code: u32, buf: &mut Vec<u8>) {
    if code < 0x80 {
        buf.push(code as u8);
        return;
    }
    let mut tail = Vec::with_capacity(6);
    let mut x = code;
    let mut mfb: u32 = 0x3f;
    while x > mfb {
        tail.push(0x80 | (x & 0x3f) as u8);
        x >>= 6;
        mfb >>= 1;
    }
    buf.push(((!mfb << 1) | x) as u8);
    buf.extend(tail.iter().rev());
}
