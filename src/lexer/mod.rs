//! Hand-written streaming lexer shared by the SQL and FilterQL dialects.
//!
//! Tokens are produced lazily: each call to [`Lexer::next_token`] scans
//! forward from the current byte offset. Keywords are matched
//! case-insensitively; identifiers may be bare, backtick-quoted, or
//! bracket-quoted.

use crate::error::LexError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Keyword,
    Int,
    Float,
    String,
    Comment,
    /// `= != < <= > >= + - * / % ( ),. ?`
    Punct,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// The raw, unescaped source slice this token was scanned from.
    pub raw: String,
    /// For `Ident`/`Keyword`, the normalized (unquoted, upper-cased for
    /// keywords) text; for `String`, the unescaped contents.
    pub text: String,
    pub pos: usize,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

const KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "FILTER", "GROUP", "BY", "HAVING", "ORDER", "LIMIT", "OFFSET",
    "WITH", "ALIAS", "AND", "OR", "NOT", "IN", "BETWEEN", "LIKE", "CONTAINS", "INTERSECTS",
    "EXISTS", "INSERT", "INTO", "VALUES", "UPDATE", "SET", "DELETE", "UPSERT", "AS", "ASC",
    "DESC", "NULL", "TRUE", "FALSE", "INCLUDE", "MATCH_ALL", "JOIN", "ON",
];

fn is_keyword(s: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(s))
}

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Up to `n` raw characters of look-ahead from the current position,
    /// used to build diagnostic "near" snippets.
    pub fn peek_x(&self, n: usize) -> &'a str {
        let end = (self.pos + n).min(self.src.len());
        let mut end = end;
        while end > self.pos && !self.src.is_char_boundary(end) {
            end -= 1;
        }
        &self.src[self.pos..end]
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_byte_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek_byte() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();
        let start = self.pos;
        let Some(b) = self.peek_byte() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                raw: String::new(),
                text: String::new(),
                pos: start,
            });
        };

        if b == b'-' && self.peek_byte_at(1) == Some(b'-') {
            return self.scan_line_comment(start);
        }
        if b == b'/' && self.peek_byte_at(1) == Some(b'/') {
            return self.scan_line_comment(start);
        }
        if b == b'#' {
            return self.scan_line_comment(start);
        }
        if b == b'/' && self.peek_byte_at(1) == Some(b'*') {
            return self.scan_block_comment(start);
        }
        if b == b'\'' || b == b'"' {
            return self.scan_string(start, b);
        }
        if b == b'`' {
            return self.scan_quoted_ident(start, b'`');
        }
        if b == b'[' {
            return self.scan_quoted_ident(start, b']');
        }
        if b.is_ascii_digit() {
            return Ok(self.scan_number(start));
        }
        if is_ident_start(b) {
            return Ok(self.scan_ident(start));
        }
        if b == b'?' {
            return self.scan_placeholder(start);
        }
        self.scan_punct(start, b)
    }

    fn scan_line_comment(&mut self, start: usize) -> Result<Token, LexError> {
        while let Some(b) = self.peek_byte() {
            if b == b'\n' {
                break;
            }
            self.pos += 1;
        }
        let raw = self.src[start..self.pos].to_string();
        Ok(Token {
            text: raw.clone(),
            kind: TokenKind::Comment,
            raw,
            pos: start,
        })
    }

    fn scan_block_comment(&mut self, start: usize) -> Result<Token, LexError> {
        self.pos += 2;
        loop {
            match self.peek_byte() {
                None => return Err(LexError::UnterminatedComment { pos: start }),
                Some(b'*') if self.peek_byte_at(1) == Some(b'/') => {
                    self.pos += 2;
                    break;
                }
                Some(_) => self.pos += 1,
            }
        }
        let raw = self.src[start..self.pos].to_string();
        Ok(Token {
            text: raw.clone(),
            kind: TokenKind::Comment,
            raw,
            pos: start,
        })
    }

    fn scan_string(&mut self, start: usize, quote: u8) -> Result<Token, LexError> {
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek_byte() {
                None => return Err(LexError::UnterminatedString { pos: start }),
                Some(b) if b == quote => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let esc = self.peek_byte().ok_or(LexError::UnterminatedString { pos: start })?;
                    text.push(match esc {
                        b'0' => '\0',
                        b'n' => '\n',
                        b'r' => '\r',
                        b'\\' => '\\',
                        b'\'' => '\'',
                        b'"' => '"',
                        b'Z' => '\x1a',
                        other => other as char,
                    });
                    self.pos += 1;
                }
                Some(_) => {
                    let ch_start = self.pos;
                    let ch = self.src[ch_start..].chars().next().unwrap();
                    self.pos += ch.len_utf8();
                    text.push(ch);
                }
            }
        }
        let raw = self.src[start..self.pos].to_string();
        Ok(Token {
            kind: TokenKind::String,
            raw,
            text,
            pos: start,
        })
    }

    fn scan_quoted_ident(&mut self, start: usize, close: u8) -> Result<Token, LexError> {
        self.pos += 1;
        while let Some(b) = self.peek_byte() {
            if b == close {
                self.pos += 1;
                let raw = self.src[start..self.pos].to_string();
                let text = self.src[start + 1..self.pos - 1].to_string();
                return Ok(Token {
                    kind: TokenKind::Ident,
                    raw,
                    text,
                    pos: start,
                });
            }
            self.pos += 1;
        }
        Err(LexError::UnterminatedIdent { pos: start })
    }

    fn scan_number(&mut self, start: usize) -> Token {
        if self.peek_byte() == Some(b'0')
            && matches!(self.peek_byte_at(1), Some(b'x') | Some(b'X'))
        {
            self.pos += 2;
            while self.peek_byte().is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let raw = self.src[start..self.pos].to_string();
            return Token {
                text: raw.clone(),
                kind: TokenKind::Int,
                raw,
                pos: start,
            };
        }
        let mut is_float = false;
        while self.peek_byte().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek_byte() == Some(b'.') && self.peek_byte_at(1).is_some_and(|b| b.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while self.peek_byte().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek_byte(), Some(b'e') | Some(b'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.peek_byte(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            if self.peek_byte().is_some_and(|b| b.is_ascii_digit()) {
                is_float = true;
                while self.peek_byte().is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                self.pos = save;
            }
        }
        let raw = self.src[start..self.pos].to_string();
        Token {
            text: raw.clone(),
            kind: if is_float { TokenKind::Float } else { TokenKind::Int },
            raw,
            pos: start,
        }
    }

    fn scan_ident(&mut self, start: usize) -> Token {
        while self.peek_byte().is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        let raw = self.src[start..self.pos].to_string();
        if is_keyword(&raw) {
            Token {
                kind: TokenKind::Keyword,
                text: raw.to_ascii_uppercase(),
                raw,
                pos: start,
            }
        } else {
            Token {
                kind: TokenKind::Ident,
                text: raw.clone(),
                raw,
                pos: start,
            }
        }
    }

    fn scan_placeholder(&mut self, start: usize) -> Result<Token, LexError> {
        self.pos += 1;
        Ok(Token {
            kind: TokenKind::Punct,
            raw: "?".to_string(),
            text: "?".to_string(),
            pos: start,
        })
    }

    fn scan_punct(&mut self, start: usize, b: u8) -> Result<Token, LexError> {
        let two = self.peek_byte_at(1);
        let (len, text): (usize, &str) = match (b, two) {
            (b'!', Some(b'=')) => (2, "!="),
            (b'<', Some(b'=')) => (2, "<="),
            (b'>', Some(b'=')) => (2, ">="),
            (b'<', Some(b'>')) => (2, "<>"),
            (b'=', _) => (1, "="),
            (b'<', _) => (1, "<"),
            (b'>', _) => (1, ">"),
            (b'+', _) => (1, "+"),
            (b'-', _) => (1, "-"),
            (b'*', _) => (1, "*"),
            (b'/', _) => (1, "/"),
            (b'%', _) => (1, "%"),
            (b'(', _) => (1, "("),
            (b')', _) => (1, ")"),
            (b',', _) => (1, ","),
            (b'.', _) => (1, "."),
            _ => return Err(LexError::UnexpectedChar { ch: b as char, pos: start }),
        };
        self.pos += len;
        Ok(Token {
            kind: TokenKind::Punct,
            raw: text.to_string(),
            text: text.to_string(),
            pos: start,
        })
    }

    /// Tokenize the remainder of the input, dropping [`TokenKind::Comment`]
    /// tokens, for callers (the parsers) that don't attach documentation.
    pub fn tokenize_significant(mut self) -> Result<Vec<Token>, LexError> {
        let mut out = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            if tok.kind != TokenKind::Comment {
                out.push(tok);
            }
            if is_eof {
                break;
            }
        }
        Ok(out)
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Token> {
        Lexer::new(src).tokenize_significant().unwrap()
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let t = toks("select * from foo");
        assert_eq!(t[0].kind, TokenKind::Keyword);
        assert_eq!(t[0].text, "SELECT");
    }

    #[test]
    fn backtick_and_bracket_idents() {
        let t = toks("`my col` [other col]");
        assert_eq!(t[0].text, "my col");
        assert_eq!(t[1].text, "other col");
    }

    #[test]
    fn string_escapes() {
        let t = toks(r#"'a\nb\'c'"#);
        assert_eq!(t[0].text, "a\nb'c");
    }

    #[test]
    fn int_vs_float() {
        let t = toks("42 3.14 0xFF");
        assert_eq!(t[0].kind, TokenKind::Int);
        assert_eq!(t[1].kind, TokenKind::Float);
        assert_eq!(t[2].kind, TokenKind::Int);
    }

    #[test]
    fn raw_round_trip_ignoring_whitespace() {
        let src = "SELECT a, b FROM t WHERE a = 1";
        let t = toks(src);
        let rebuilt: Vec<&str> = t.iter().map(|tok| tok.raw.as_str()).collect();
        assert_eq!(rebuilt.join(""), "SELECTa,bFROMtWHEREa=1");
    }

    #[test]
    fn peek_x_returns_upcoming_raw_text() {
        let lexer = Lexer::new("hello world");
        assert_eq!(lexer.peek_x(5), "hello");
    }

    #[test]
    fn unterminated_string_errors() {
        let err = Lexer::new("'abc").tokenize_significant().unwrap_err();
        assert_eq!(err, LexError::UnterminatedString { pos: 0 });
    }
}
