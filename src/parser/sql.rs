//! SQL grammar: `SELECT cols FROM id [WHERE expr | FILTER filters]
//! [GROUP BY...] [HAVING expr] [ORDER BY...] [LIMIT n [OFFSET m]]
//! [WITH jsonlike] [ALIAS id]`, plus INSERT/UPSERT/UPDATE/DELETE.

use super::{DeleteStmt, InsertStmt, JoinClause, OrderDir, OrderKey, SelectStmt, Statement, UpdateStmt};
use crate::ast::builder::ExprBuilder;
use crate::ast::SelectColumn;
use crate::error::ParseError;
use crate::lexer::{Lexer, Token, TokenKind};
use serde_json::Value as Json;

pub struct SqlParser<'t> {
    tokens: &'t [Token],
    pos: usize,
    build_vm: bool,
}

impl<'t> SqlParser<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        SqlParser { tokens, pos: 0, build_vm: false }
    }

    pub fn with_build_vm(tokens: &'t [Token], build_vm: bool) -> Self {
        SqlParser { tokens, pos: 0, build_vm }
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

    fn expr_builder(&self) -> ExprBuilder<'t> {
        let mut b = ExprBuilder::with_build_vm(self.tokens, self.build_vm);
        b.set_pos(self.pos);
        b
    }

    fn sync_from(&mut self, b: &ExprBuilder<'t>) {
        self.pos = b.pos();
    }

    /// Parses one of SELECT / INSERT / UPSERT / UPDATE / DELETE from `src`.
    pub fn parse(src: &str) -> Result<Statement, ParseError> {
        let tokens = Lexer::new(src).tokenize_significant().map_err(ParseError::from)?;
        let mut p = SqlParser::new(&tokens);
        p.parse_statement()
    }

    pub fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        if self.is_keyword("SELECT") {
            return Ok(Statement::Select(self.parse_select()?));
        }
        if self.is_keyword("INSERT") {
            return Ok(Statement::Insert(self.parse_insert()?));
        }
        if self.is_keyword("UPSERT") {
            return Ok(Statement::Upsert(self.parse_insert()?));
        }
        if self.is_keyword("UPDATE") {
            return Ok(Statement::Update(self.parse_update()?));
        }
        if self.is_keyword("DELETE") {
            return Ok(Statement::Delete(self.parse_delete()?));
        }
        Err(self.err("expected SELECT, INSERT, UPSERT, UPDATE or DELETE"))
    }

    fn parse_select(&mut self) -> Result<SelectStmt, ParseError> {
        self.expect_keyword("SELECT")?;
        let mut stmt = SelectStmt::default();
        stmt.columns = self.parse_select_columns()?;

        if self.is_keyword("FROM") {
            self.advance();
            stmt.from = Some(self.expect_ident()?);
        }

        if self.is_keyword("JOIN") {
            self.advance();
            let table = self.expect_ident()?;
            self.expect_keyword("ON")?;
            let mut b = self.expr_builder();
            let left_key = b.parse_additive()?;
            self.sync_from(&b);
            self.expect_punct("=")?;
            let mut b = self.expr_builder();
            let right_key = b.parse_additive()?;
            self.sync_from(&b);
            stmt.join = Some(JoinClause { table, left_key, right_key });
        }

        if self.is_keyword("WHERE") || self.is_keyword("FILTER") {
            self.advance();
            let mut b = self.expr_builder();
            let node = b.parse_expr().map_err(|e| {
                self.sync_from(&b);
                e
            })?;
            self.sync_from(&b);
            stmt.has_date_math = node.has_date_math();
            stmt.filter = Some(node);
        }

        if self.is_keyword("GROUP") {
            self.advance();
            self.expect_keyword("BY")?;
            loop {
                let mut b = self.expr_builder();
                let node = b.parse_expr()?;
                self.sync_from(&b);
                stmt.group_by.push(node);
                if self.is_punct(",") {
                    self.advance();
                    continue;
                }
                break;
            }
        }

        if self.is_keyword("HAVING") {
            self.advance();
            let mut b = self.expr_builder();
            let node = b.parse_expr()?;
            self.sync_from(&b);
            stmt.having = Some(node);
        }

        if self.is_keyword("ORDER") {
            self.advance();
            self.expect_keyword("BY")?;
            loop {
                let mut b = self.expr_builder();
                let node = b.parse_expr()?;
                self.sync_from(&b);
                let dir = if self.is_keyword("DESC") {
                    self.advance();
                    OrderDir::Desc
                } else if self.is_keyword("ASC") {
                    self.advance();
                    OrderDir::Asc
                } else {
                    OrderDir::Asc
                };
                stmt.order_by.push(OrderKey { expr: node, dir });
                if self.is_punct(",") {
                    self.advance();
                    continue;
                }
                break;
            }
        }

        if self.is_keyword("LIMIT") {
            self.advance();
            stmt.limit = Some(self.expect_int()?);
            if self.is_keyword("OFFSET") {
                self.advance();
                stmt.offset = Some(self.expect_int()?);
            }
        }

        if self.is_keyword("WITH") {
            self.advance();
            stmt.with = Some(self.parse_json_object()?);
        }

        if self.is_keyword("ALIAS") {
            self.advance();
            stmt.alias = Some(self.expect_ident()?.to_lowercase());
        }

        Ok(stmt)
    }

    fn parse_select_columns(&mut self) -> Result<Vec<SelectColumn>, ParseError> {
        let mut cols = Vec::new();
        loop {
            let mut b = self.expr_builder();
            let expr = b.parse_expr()?;
            self.sync_from(&b);
            let alias = if self.is_keyword("AS") {
                self.advance();
                Some(self.expect_ident()?)
            } else if self.peek().kind == TokenKind::Ident {
                Some(self.advance().text)
            } else {
                None
            };
            cols.push(SelectColumn { expr, alias });
            if self.is_punct(",") {
                self.advance();
                continue;
            }
            break;
        }
        Ok(cols)
    }

    fn expect_int(&mut self) -> Result<usize, ParseError> {
        let tok = self.peek().clone();
        if tok.kind == TokenKind::Int {
            self.advance();
            tok.text.parse().map_err(|_| ParseError::new(format!("malformed integer `{}`", tok.text), tok.pos, tok.text))
        } else {
            Err(self.err("expected integer"))
        }
    }

    fn parse_json_object(&mut self) -> Result<Json, ParseError> {
        let mut raw = String::new();
        let mut depth = 0i32;
        loop {
            if self.is_eof() {
                break;
            }
            let tok = self.peek().clone();
            if tok.kind == TokenKind::Punct && tok.text == "(" {
                depth += 1;
            }
            raw.push_str(&tok.raw);
            raw.push(' ');
            self.advance();
            if depth == 0 && (self.is_keyword("ALIAS") || self.is_eof()) {
                break;
            }
        }
        serde_json::from_str(raw.trim()).or_else(|_| Ok(Json::String(raw.trim().to_string())))
    }

    fn parse_insert(&mut self) -> Result<InsertStmt, ParseError> {
        let is_upsert = self.is_keyword("UPSERT");
        self.advance();
        if !is_upsert {
            self.expect_keyword("INTO")?;
        } else if self.is_keyword("INTO") {
            self.advance();
        }
        let table = self.expect_ident()?;
        let mut columns = Vec::new();
        if self.is_punct("(") {
            self.advance();
            loop {
                columns.push(self.expect_ident()?);
                if self.is_punct(",") {
                    self.advance();
                    continue;
                }
                break;
            }
            self.expect_punct(")")?;
        }
        self.expect_keyword("VALUES")?;
        let mut rows = Vec::new();
        loop {
            self.expect_punct("(")?;
            let mut row = Vec::new();
            loop {
                let mut b = self.expr_builder();
                let node = b.parse_expr()?;
                self.sync_from(&b);
                row.push(node);
                if self.is_punct(",") {
                    self.advance();
                    continue;
                }
                break;
            }
            self.expect_punct(")")?;
            rows.push(row);
            if self.is_punct(",") {
                self.advance();
                continue;
            }
            break;
        }
        Ok(InsertStmt { table, columns, rows })
    }

    fn parse_update(&mut self) -> Result<UpdateStmt, ParseError> {
        self.expect_keyword("UPDATE")?;
        let table = self.expect_ident()?;
        self.expect_keyword("SET")?;
        let mut assignments = Vec::new();
        loop {
            let name = self.expect_ident()?;
            self.expect_punct("=")?;
            let mut b = self.expr_builder();
            let node = b.parse_expr()?;
            self.sync_from(&b);
            assignments.push((name, node));
            if self.is_punct(",") {
                self.advance();
                continue;
            }
            break;
        }
        let filter = if self.is_keyword("WHERE") {
            self.advance();
            let mut b = self.expr_builder();
            let node = b.parse_expr()?;
            self.sync_from(&b);
            Some(node)
        } else {
            None
        };
        Ok(UpdateStmt { table, assignments, filter })
    }

    fn parse_delete(&mut self) -> Result<DeleteStmt, ParseError> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;
        let table = self.expect_ident()?;
        let filter = if self.is_keyword("WHERE") {
            self.advance();
            let mut b = self.expr_builder();
            let node = b.parse_expr()?;
            self.sync_from(&b);
            Some(node)
        } else {
            None
        };
        Ok(DeleteStmt { table, filter })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_select() {
        let stmt = SqlParser::parse("SELECT int5 FROM mycontext").unwrap();
        match stmt {
            Statement::Select(s) => {
                assert_eq!(s.from.as_deref(), Some("mycontext"));
                assert_eq!(s.columns.len(), 1);
                assert_eq!(s.columns[0].output_name(), "int5");
            }
            _ => panic!("expected select"),
        }
    }

    #[test]
    fn parses_select_with_where_and_order_limit() {
        let stmt = SqlParser::parse("SELECT a, b FROM t WHERE a > 1 ORDER BY b DESC LIMIT 10 OFFSET 5").unwrap();
        match stmt {
            Statement::Select(s) => {
                assert!(s.filter.is_some());
                assert_eq!(s.order_by.len(), 1);
                assert_eq!(s.order_by[0].dir, OrderDir::Desc);
                assert_eq!(s.limit, Some(10));
                assert_eq!(s.offset, Some(5));
            }
            _ => panic!("expected select"),
        }
    }

    #[test]
    fn parses_date_math_where() {
        let stmt = SqlParser::parse(r#"SELECT int5 FROM mycontext WHERE created < "now-1M""#).unwrap();
        match stmt {
            Statement::Select(s) => assert!(s.has_date_math),
            _ => panic!("expected select"),
        }
    }

    #[test]
    fn parses_insert_values() {
        let stmt = SqlParser::parse("INSERT INTO users (user_id, name) VALUES (1, 'aaron')").unwrap();
        match stmt {
            Statement::Insert(s) => {
                assert_eq!(s.table, "users");
                assert_eq!(s.columns, vec!["user_id", "name"]);
                assert_eq!(s.rows.len(), 1);
            }
            _ => panic!("expected insert"),
        }
    }

    #[test]
    fn parses_update_set_where() {
        let stmt = SqlParser::parse("UPDATE users SET email = 'a@b.com' WHERE user_id = 1").unwrap();
        match stmt {
            Statement::Update(s) => {
                assert_eq!(s.table, "users");
                assert_eq!(s.assignments.len(), 1);
                assert!(s.filter.is_some());
            }
            _ => panic!("expected update"),
        }
    }

    #[test]
    fn parses_delete_where() {
        let stmt = SqlParser::parse("DELETE FROM users WHERE user_id = 1").unwrap();
        match stmt {
            Statement::Delete(s) => {
                assert_eq!(s.table, "users");
                assert!(s.filter.is_some());
            }
            _ => panic!("expected delete"),
        }
    }

    #[test]
    fn error_includes_position_and_near_text() {
        let err = SqlParser::parse("SELECT FROM FROM").unwrap_err();
        assert!(err.near.len() <= 40);
    }
}
