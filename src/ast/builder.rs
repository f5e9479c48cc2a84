//! Pratt-style expression builder shared by the SQL and FilterQL parsers
//!. Operates over an already-lexed, comment-stripped token slice.

use super::{is_date_math_literal, BinaryOp, Node, UnaryOp};
use crate::error::ParseError;
use crate::lexer::{Token, TokenKind};
use crate::value::Value;

pub struct ExprBuilder<'t> {
    tokens: &'t [Token],
    pos: usize,
    /// When true, literal-literal binary arithmetic is folded at build time.
    pub build_vm: bool,
}

impl<'t> ExprBuilder<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        ExprBuilder {
            tokens,
            pos: 0,
            build_vm: false,
        }
    }

    pub fn with_build_vm(tokens: &'t [Token], build_vm: bool) -> Self {
        ExprBuilder {
            tokens,
            pos: 0,
            build_vm,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_text(&self) -> &str {
        self.peek().text.as_str()
    }

    fn is_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn near(&self) -> String {
        self.tokens[self.pos..]
.iter()
.take(6)
.map(|t| t.raw.as_str())
.collect::<Vec<_>>()
.join(" ")
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.peek().pos, self.near())
    }

    fn is_keyword(&self, kw: &str) -> bool {
        self.peek().kind == TokenKind::Keyword && self.peek_text().eq_ignore_ascii_case(kw)
    }

    fn is_punct(&self, p: &str) -> bool {
        self.peek().kind == TokenKind::Punct && self.peek_text() == p
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ParseError> {
        if self.is_punct(p) {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected `{p}`")))
        }
    }

    /// Entry point: parses a full expression at the lowest (`OR`) precedence.
    pub fn parse_expr(&mut self) -> Result<Node, ParseError> {
        self.parse_or()
    }

    /// A single comparison-level clause, stopping short of `AND`/`OR`/`NOT` —
    /// used by the FilterQL filter-list grammar, which handles its
    /// own join keywords and negation around clauses.
    pub fn parse_clause(&mut self) -> Result<Node, ParseError> {
        self.parse_comparison()
    }

    fn parse_or(&mut self) -> Result<Node, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.is_keyword("OR") {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = self.fold_binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Node, ParseError> {
        let mut lhs = self.parse_not()?;
        while self.is_keyword("AND") {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = self.fold_binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Node, ParseError> {
        if self.is_keyword("NOT") {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Node::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Node, ParseError> {
        let lhs = self.parse_additive()?;

        if self.is_keyword("BETWEEN") {
            self.advance();
            let lo = self.parse_additive()?;
            if !self.is_keyword("AND") {
                return Err(self.err("expected AND in BETWEEN"));
            }
            self.advance();
            let hi = self.parse_additive()?;
            return Ok(Node::Tri(Box::new(lhs), Box::new(lo), Box::new(hi)));
        }
        if self.is_keyword("IN") {
            self.advance();
            let rhs = self.parse_array_literal()?;
            return Ok(Node::Binary(BinaryOp::In, Box::new(lhs), Box::new(rhs)));
        }
        if self.is_keyword("LIKE") {
            self.advance();
            let rhs = self.parse_additive()?;
            return Ok(Node::Binary(BinaryOp::Like, Box::new(lhs), Box::new(rhs)));
        }
        if self.is_keyword("CONTAINS") {
            self.advance();
            let rhs = self.parse_additive()?;
            return Ok(Node::Binary(BinaryOp::Contains, Box::new(lhs), Box::new(rhs)));
        }
        if self.is_keyword("INTERSECTS") {
            self.advance();
            let rhs = self.parse_additive()?;
            return Ok(Node::Binary(BinaryOp::Intersects, Box::new(lhs), Box::new(rhs)));
        }

        let op = match self.peek().text.as_str() {
            "=" if self.peek().kind == TokenKind::Punct => Some(BinaryOp::Eq),
            "!=" | "<>" if self.peek().kind == TokenKind::Punct => Some(BinaryOp::Neq),
            "<" if self.peek().kind == TokenKind::Punct => Some(BinaryOp::Lt),
            "<=" if self.peek().kind == TokenKind::Punct => Some(BinaryOp::Lte),
            ">" if self.peek().kind == TokenKind::Punct => Some(BinaryOp::Gt),
            ">=" if self.peek().kind == TokenKind::Punct => Some(BinaryOp::Gte),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let rhs = self.parse_additive()?;
            return Ok(self.fold_binary(op, lhs, rhs));
        }
        Ok(lhs)
    }

    /// Additive-level expression, stopping short of comparison operators —
    /// used for JOIN key expressions, where `=` separates the two keys
    /// rather than building a comparison node.
    pub fn parse_additive(&mut self) -> Result<Node, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().text.as_str() {
                "+" if self.peek().kind == TokenKind::Punct => BinaryOp::Add,
                "-" if self.peek().kind == TokenKind::Punct => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = self.fold_binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().text.as_str() {
                "*" if self.peek().kind == TokenKind::Punct => BinaryOp::Mul,
                "/" if self.peek().kind == TokenKind::Punct => BinaryOp::Div,
                "%" if self.peek().kind == TokenKind::Punct => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = self.fold_binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        if self.is_punct("-") {
            self.advance();
            let inner = self.parse_unary()?;
            if self.build_vm {
                if let Node::Literal(Value::Int(i)) = inner {
                    return Ok(Node::Literal(Value::Int(-i)));
                }
                if let Node::Literal(Value::Number(n)) = inner {
                    return Ok(Node::Literal(Value::Number(-n)));
                }
            }
            return Ok(Node::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        if self.is_keyword("EXISTS") {
            self.advance();
            self.expect_punct("(")?;
            let inner = self.parse_expr()?;
            self.expect_punct(")")?;
            return Ok(Node::Unary(UnaryOp::Exists, Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_array_literal(&mut self) -> Result<Node, ParseError> {
        self.expect_punct("(")?;
        let mut items = Vec::new();
        if !self.is_punct(")") {
            loop {
                items.push(self.parse_or()?);
                if self.is_punct(",") {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(Node::Array(items))
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Int => {
                self.advance();
                let v = parse_int_literal(&tok.text).ok_or_else(|| {
                    ParseError::new(format!("malformed integer `{}`", tok.text), tok.pos, tok.text.clone())
                })?;
                Ok(Node::Literal(Value::Int(v)))
            }
            TokenKind::Float => {
                self.advance();
                let v: f64 = tok
.text
.parse()
.map_err(|_| ParseError::new(format!("malformed float `{}`", tok.text), tok.pos, tok.text.clone()))?;
                Ok(Node::Literal(Value::Number(v)))
            }
            TokenKind::String => {
                self.advance();
                Ok(Node::Literal(Value::string(tok.text)))
            }
            TokenKind::Keyword if tok.text.eq_ignore_ascii_case("NULL") => {
                self.advance();
                Ok(Node::Null)
            }
            TokenKind::Keyword if tok.text.eq_ignore_ascii_case("TRUE") => {
                self.advance();
                Ok(Node::Literal(Value::Bool(true)))
            }
            TokenKind::Keyword if tok.text.eq_ignore_ascii_case("FALSE") => {
                self.advance();
                Ok(Node::Literal(Value::Bool(false)))
            }
            TokenKind::Keyword if tok.text.eq_ignore_ascii_case("INCLUDE") => {
                self.advance();
                let name = self.expect_ident()?;
                Ok(Node::Include(name))
            }
            TokenKind::Keyword if tok.text.eq_ignore_ascii_case("MATCH_ALL") => {
                self.advance();
                Ok(Node::Literal(Value::Bool(true)))
            }
            TokenKind::Punct if tok.text == "*" => {
                self.advance();
                Ok(Node::Identity("*".to_string()))
            }
            TokenKind::Punct if tok.text == "(" => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            TokenKind::Ident => {
                self.advance();
                let mut name = tok.text.clone();
                while self.is_punct(".") {
                    self.advance();
                    let next = self.expect_ident_like()?;
                    name.push('.');
                    name.push_str(&next);
                }
                if self.is_punct("(") {
                    return self.parse_func_call(name);
                }
                if is_date_math_literal(&name) {
                    return Ok(Node::Literal(Value::string(name)));
                }
                Ok(Node::Identity(name))
            }
            _ => Err(self.err(format!("unexpected token `{}`", tok.raw))),
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        let tok = self.peek().clone();
        if tok.kind == TokenKind::Ident {
            self.advance();
            Ok(tok.text)
        } else {
            Err(self.err("expected identifier"))
        }
    }

    /// Like [`Self::expect_ident`] but also accepts keywords used as a
    /// trailing path segment, e.g. `t.key` where `key` might collide with a
    /// reserved word in another dialect.
    fn expect_ident_like(&mut self) -> Result<String, ParseError> {
        let tok = self.peek().clone();
        if tok.kind == TokenKind::Ident || tok.kind == TokenKind::Keyword {
            self.advance();
            Ok(tok.text)
        } else {
            Err(self.err("expected identifier"))
        }
    }

    fn parse_func_call(&mut self, name: String) -> Result<Node, ParseError> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        if !self.is_punct(")") {
            loop {
                args.push(self.parse_or()?);
                if self.is_punct(",") {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(Node::Func { name, args })
    }

    fn fold_binary(&self, op: BinaryOp, lhs: Node, rhs: Node) -> Node {
        if self.build_vm {
            if let (Node::Literal(a), Node::Literal(b)) = (&lhs, &rhs) {
                if let Some(folded) = fold_arithmetic(op, a, b) {
                    return Node::Literal(folded);
                }
            }
        }
        Node::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn at_eof(&self) -> bool {
        self.is_eof()
    }
}

fn parse_int_literal(text: &str) -> Option<i64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

fn fold_arithmetic(op: BinaryOp, a: &Value, b: &Value) -> Option<Value> {
    use crate::value::coerce::to_float;
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            if let (Value::Int(x), Value::Int(y)) = (a, b) {
                return Some(Value::Int(match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => {
                        if *y == 0 {
                            return Some(Value::Number(f64::NAN));
                        }
                        x / y
                    }
                    BinaryOp::Mod => {
                        if *y == 0 {
                            return Some(Value::Number(f64::NAN));
                        }
                        x % y
                    }
                    _ => unreachable!(),
                }));
            }
            let (x, y) = (to_float(a), to_float(b));
            Some(Value::Number(match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                BinaryOp::Mod => x % y,
                _ => unreachable!(),
            }))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn build(src: &str) -> Node {
        let tokens = Lexer::new(src).tokenize_significant().unwrap();
        let mut b = ExprBuilder::new(&tokens);
        b.parse_expr().unwrap()
    }

    #[test]
    fn precedence_and_binds_tighter_than_or() {
        let n = build("a OR b AND c");
        assert_eq!(n.to_string(), "a OR b AND c");
        match n {
            Node::Binary(BinaryOp::Or, _, rhs) => {
                assert!(matches!(*rhs, Node::Binary(BinaryOp::And, _, _)));
            }
            _ => panic!("expected top-level OR"),
        }
    }

    #[test]
    fn between_produces_tri_node() {
        let n = build("x BETWEEN 1 AND 10");
        assert!(matches!(n, Node::Tri(..)));
    }

    #[test]
    fn constant_folding_with_build_vm() {
        let tokens = Lexer::new("1 + 2").tokenize_significant().unwrap();
        let mut b = ExprBuilder::with_build_vm(&tokens, true);
        let n = b.parse_expr().unwrap();
        assert!(matches!(n, Node::Literal(Value::Int(3))));
    }

    #[test]
    fn no_folding_without_build_vm() {
        let n = build("1 + 2");
        assert!(matches!(n, Node::Binary(BinaryOp::Add, _, _)));
    }

    #[test]
    fn date_math_literal_detected() {
        let n = build("created < \"now-1M\"");
        assert!(n.has_date_math());
    }

    #[test]
    fn function_call_parses_args() {
        let n = build("length(name)");
        match n {
            Node::Func { name, args } => {
                assert_eq!(name, "length");
                assert_eq!(args.len(), 1);
            }
            _ => panic!("expected func node"),
        }
    }
}
