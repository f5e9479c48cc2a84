//! FilterQL grammar:
//!
//! ```text
//! top:= 'FILTER' filters | 'WHERE' expr | 'SELECT' cols 'FROM' id ('WHERE'|'FILTER')...
//! filters:= ((AND|OR))? ( clause | (NOT)? clause | '(' filters ')' )*
//! ```
//!
//! A bare `*` or the identifier `match_all` produces a single always-true
//! filter; `include NAME` embeds another named filter by reference.

use super::sql::SqlParser;
use super::Statement;
use crate::ast::builder::ExprBuilder;
use crate::ast::{BinaryOp, Node, UnaryOp};
use crate::error::ParseError;
use crate::lexer::{Lexer, Token, TokenKind};
use crate::value::Value;

pub struct FilterQlParser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> FilterQlParser<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        FilterQlParser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
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
        self.peek().kind == TokenKind::Keyword && self.peek().text.eq_ignore_ascii_case(kw)
    }

    fn is_punct(&self, p: &str) -> bool {
        self.peek().kind == TokenKind::Punct && self.peek().text == p
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ParseError> {
        if self.is_keyword(kw) {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected `{kw}`")))
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ParseError> {
        if self.is_punct(p) {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected `{p}`")))
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

    /// Parses `src` as a top-level FilterQL request, or delegates to the SQL
    /// parser when `src` begins with `SELECT`.
    pub fn parse(src: &str) -> Result<Statement, ParseError> {
        let tokens = Lexer::new(src).tokenize_significant().map_err(ParseError::from)?;
        let mut p = FilterQlParser::new(&tokens);

        if p.is_keyword("SELECT") {
            return SqlParser::new(&tokens).parse_statement();
        }

        let table = None;
        if p.is_keyword("FILTER") {
            p.advance();
        } else if p.is_keyword("WHERE") {
            p.advance();
        } else {
            return Err(p.err("expected FILTER or WHERE"));
        }
        let node = p.parse_filters()?;
        Ok(Statement::Filter {
            table,
            has_date_math: node.has_date_math(),
            filter: node,
        })
    }

    fn at_group_stop(&self) -> bool {
        self.is_eof() || self.is_punct(")")
    }

    /// `filters:= ((AND|OR))? ( clause | (NOT)? clause | '(' filters ')' )*`
    pub fn parse_filters(&mut self) -> Result<Node, ParseError> {
        let mut acc: Option<Node> = None;
        loop {
            if self.at_group_stop() {
                break;
            }
            let join = if self.is_keyword("AND") {
                self.advance();
                Some(BinaryOp::And)
            } else if self.is_keyword("OR") {
                self.advance();
                Some(BinaryOp::Or)
            } else {
                None
            };

            let negate = if self.is_keyword("NOT") {
                self.advance();
                true
            } else {
                false
            };

            let mut clause = self.parse_filter_atom()?;
            if negate {
                clause = Node::Unary(UnaryOp::Not, Box::new(clause));
            }

            acc = Some(match (acc, join) {
                (None, _) => clause,
                (Some(prev), Some(op)) => Node::Binary(op, Box::new(prev), Box::new(clause)),
                (Some(prev), None) => Node::Binary(BinaryOp::And, Box::new(prev), Box::new(clause)),
            });

            if self.at_group_stop() {
                break;
            }
        }
        acc.ok_or_else(|| self.err("expected at least one filter clause"))
    }

    fn parse_filter_atom(&mut self) -> Result<Node, ParseError> {
        if self.is_punct("(") {
            self.advance();
            let inner = self.parse_filters()?;
            self.expect_punct(")")?;
            return Ok(inner);
        }
        if self.is_punct("*") {
            self.advance();
            return Ok(Node::Literal(Value::Bool(true)));
        }
        if self.is_keyword("MATCH_ALL") {
            self.advance();
            return Ok(Node::Literal(Value::Bool(true)));
        }
        if self.is_keyword("INCLUDE") {
            self.advance();
            let name = self.expect_ident()?;
            return Ok(Node::Include(name));
        }
        let mut b = ExprBuilder::new(self.tokens);
        b.set_pos(self.pos);
        let node = b.parse_clause()?;
        self.pos = b.pos();
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_node(src: &str) -> Node {
        match FilterQlParser::parse(src).unwrap() {
            Statement::Filter { filter,.. } => filter,
            _ => panic!("expected filter statement"),
        }
    }

    #[test]
    fn simple_filter_clause() {
        let n = filter_node("FILTER a = 1");
        assert!(matches!(n, Node::Binary(BinaryOp::Eq, _, _)));
    }

    #[test]
    fn implicit_and_between_clauses() {
        let n = filter_node("FILTER a = 1 b = 2");
        assert!(matches!(n, Node::Binary(BinaryOp::And, _, _)));
    }

    #[test]
    fn explicit_or_and_groups() {
        let n = filter_node("FILTER (a = 1 OR b = 2) AND c = 3");
        assert!(matches!(n, Node::Binary(BinaryOp::And, _, _)));
    }

    #[test]
    fn match_all_wildcard() {
        let n = filter_node("FILTER *");
        assert!(matches!(n, Node::Literal(Value::Bool(true))));
    }

    #[test]
    fn match_all_keyword() {
        let n = filter_node("FILTER match_all");
        assert!(matches!(n, Node::Literal(Value::Bool(true))));
    }

    #[test]
    fn include_reference() {
        let n = filter_node("FILTER include somefilter");
        assert!(matches!(n, Node::Include(name) if name == "somefilter"));
    }

    #[test]
    fn not_prefixed_clause() {
        let n = filter_node("FILTER NOT a = 1");
        assert!(matches!(n, Node::Unary(UnaryOp::Not, _)));
    }

    #[test]
    fn where_form_uses_full_expr_grammar() {
        let n = filter_node("WHERE a = 1 AND b = 2");
        assert!(matches!(n, Node::Binary(BinaryOp::And, _, _)));
    }

    #[test]
    fn has_date_math_recorded() {
        match FilterQlParser::parse(r#"FILTER created < "now-1M""#).unwrap() {
            Statement::Filter { has_date_math,.. } => assert!(has_date_math),
            _ => panic!("expected filter"),
        }
    }
}
