//! Recursive-descent statement parsers.

pub mod filterql;
pub mod sql;

use crate::ast::{Node, SelectColumn};
use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct OrderKey {
    pub expr: Node,
    pub dir: OrderDir,
}

/// `JOIN <table> ON <left> = <right>`.
#[derive(Debug, Clone)]
pub struct JoinClause {
    pub table: String,
    pub left_key: Node,
    pub right_key: Node,
}

#[derive(Debug, Clone, Default)]
pub struct SelectStmt {
    pub columns: Vec<SelectColumn>,
    pub from: Option<String>,
    pub join: Option<JoinClause>,
    pub filter: Option<Node>,
    pub group_by: Vec<Node>,
    pub having: Option<Node>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub with: Option<Json>,
    pub alias: Option<String>,
    /// Set when any filter/where node is a relative-time literal.
    pub has_date_math: bool,
}

#[derive(Debug, Clone)]
pub struct InsertStmt {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Node>>,
}

#[derive(Debug, Clone)]
pub struct UpdateStmt {
    pub table: String,
    pub assignments: Vec<(String, Node)>,
    pub filter: Option<Node>,
}

#[derive(Debug, Clone)]
pub struct DeleteStmt {
    pub table: String,
    pub filter: Option<Node>,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Select(SelectStmt),
    Insert(InsertStmt),
    Upsert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    /// A bare FilterQL `FILTER...` / `WHERE...` request with no SELECT.
    Filter { table: Option<String>, filter: Node, has_date_math: bool },
}
