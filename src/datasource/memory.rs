//! Reference in-memory datasource.
//!
//! Maintains an ordered column list and a primary `key -> row` map where a
//! row is a positional `Value` array. Scans snapshot the key list under a
//! read lock before iterating so concurrent mutations never observe a
//! half-iterated map; mutations take the write lock.

use super::{ConnDeletion, ConnPatchWhere, ConnUpsert, Message, Scanner, SchemaColumns, Seeker, Source, SourcePlanner};
use crate::ast::Node;
use crate::context::ValueContextWrapper;
use crate::error::SourceError;
use crate::value::Value;
use crate::vm::{eval, EvalCtx};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A normalized, totally-ordered row key. `Value` itself can't serve as a
/// `BTreeMap` key (it carries `f64`, which has no total order), so primary
/// keys are canonicalized into this narrower shape instead.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum RowKey {
    Int(i64),
    Str(String),
}

impl RowKey {
    fn from_value(v: &Value) -> Self {
        match v {
            Value::Int(i) => RowKey::Int(*i),
            other => RowKey::Str(crate::value::coerce::to_string_value(other)),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            RowKey::Int(i) => Value::Int(*i),
            RowKey::Str(s) => Value::string(s.clone()),
        }
    }
}

struct Table {
    columns: Arc<Vec<String>>,
    rows: RwLock<BTreeMap<RowKey, Vec<Value>>>,
    next_key: AtomicI64,
}

/// A pure in-memory datasource with no persistence.
pub struct MemoryStore {
    name: String,
    tables: RwLock<BTreeMap<String, Table>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryStore {
            name: name.into(),
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn create_table(&self, name: impl Into<String>, columns: Vec<String>) {
        let table = Table {
            columns: Arc::new(columns),
            rows: RwLock::new(BTreeMap::new()),
            next_key: AtomicI64::new(1),
        };
        self.tables.write().insert(name.into(), table);
    }

    fn column_index(&self, table: &str) -> Result<BTreeMap<String, usize>, SourceError> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| SourceError::TableNotFound(table.to_string()))?;
        Ok(t.columns.iter().cloned().enumerate().map(|(i, c)| (c, i)).collect())
    }
}

impl Source for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn tables(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    fn as_scanner(&self) -> Option<&dyn Scanner> {
        Some(self)
    }
    fn as_schema_columns(&self) -> Option<&dyn SchemaColumns> {
        Some(self)
    }
    fn as_source_planner(&self) -> Option<&dyn SourcePlanner> {
        Some(self)
    }
    fn as_seeker(&self) -> Option<&dyn Seeker> {
        Some(self)
    }
    fn as_conn_upsert(&self) -> Option<&dyn ConnUpsert> {
        Some(self)
    }
    fn as_conn_patch_where(&self) -> Option<&dyn ConnPatchWhere> {
        Some(self)
    }
    fn as_conn_deletion(&self) -> Option<&dyn ConnDeletion> {
        Some(self)
    }
}

impl Scanner for MemoryStore {
    fn create_iterator(&self, table: &str) -> Result<Box<dyn Iterator<Item = Message> + Send>, SourceError> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| SourceError::TableNotFound(table.to_string()))?;
        let rows = t.rows.read();
        let keys: Vec<RowKey> = rows.keys().cloned().collect();
        let columns = t.columns.clone();
        let snapshot: Vec<Vec<Value>> = keys.iter().filter_map(|k| rows.get(k).cloned()).collect();
        Ok(Box::new(
            snapshot
.into_iter()
.map(move |values| Message::tuple(columns.clone(), values)),
        ))
    }
}

impl SourcePlanner for MemoryStore {
    /// Evaluates `predicate` against each row while still holding the read
    /// lock, so the pushed-down scan never hands an unfiltered row to the
    /// executor's own `WhereTask`. `limit` caps the number of matching rows
    /// returned; the caller is responsible for only passing one down when no
    /// later pipeline stage would be corrupted by an early cutoff.
    fn plan_select(&self, table: &str, predicate: Option<&Node>, limit: Option<usize>) -> Result<Box<dyn Iterator<Item = Message> + Send>, SourceError> {
        let columns = self.column_index(table)?;
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| SourceError::TableNotFound(table.to_string()))?;
        let rows = t.rows.read();
        let now = Utc::now();
        let mut matched: Vec<Vec<Value>> = Vec::new();
        for row in rows.values() {
            let keep = match predicate {
                Some(pred) => {
                    let reader = ValueContextWrapper::new(&columns, row);
                    let ctx = EvalCtx::new(&reader, now);
                    let (v, ok) = eval(&ctx, pred);
                    ok && crate::value::coerce::to_bool(&v)
                }
                None => true,
            };
            if keep {
                matched.push(row.clone());
                if let Some(limit) = limit {
                    if matched.len() >= limit {
                        break;
                    }
                }
            }
        }
        let table_columns = t.columns.clone();
        Ok(Box::new(matched.into_iter().map(move |values| Message::tuple(table_columns.clone(), values))))
    }
}

impl SchemaColumns for MemoryStore {
    fn columns(&self, table: &str) -> Result<Vec<String>, SourceError> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| SourceError::TableNotFound(table.to_string()))?;
        Ok(t.columns.as_ref().clone())
    }
}

impl Seeker for MemoryStore {
    fn get(&self, table: &str, key: &Value) -> Result<Message, SourceError> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| SourceError::TableNotFound(table.to_string()))?;
        let rows = t.rows.read();
        let row_key = RowKey::from_value(key);
        let values = rows.get(&row_key).ok_or(SourceError::KeyNotFound)?;
        Ok(Message::tuple(t.columns.clone(), values.clone()))
    }
}

impl ConnUpsert for MemoryStore {
    fn put(&self, table: &str, key: Option<Value>, values: Vec<Value>) -> Result<Value, SourceError> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| SourceError::TableNotFound(table.to_string()))?;
        let row_key = match key {
            Some(k) => RowKey::from_value(&k),
            None => RowKey::Int(t.next_key.fetch_add(1, Ordering::SeqCst)),
        };
        let out = row_key.to_value();
        t.rows.write().insert(row_key, values);
        Ok(out)
    }
}

impl ConnPatchWhere for MemoryStore {
    fn patch_where(&self, table: &str, predicate: &Node, assignments: &BTreeMap<String, Value>) -> Result<usize, SourceError> {
        let columns = self.column_index(table)?;
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| SourceError::TableNotFound(table.to_string()))?;
        let now = Utc::now();
        let mut rows = t.rows.write();
        let mut affected = 0;
        for row in rows.values_mut() {
            let matches = {
                let reader = ValueContextWrapper::new(&columns, row);
                let ctx = EvalCtx::new(&reader, now);
                let (v, ok) = eval(&ctx, predicate);
                ok && crate::value::coerce::to_bool(&v)
            };
            if matches {
                for (name, value) in assignments {
                    if let Some(&idx) = columns.get(name) {
                        row[idx] = value.clone();
                    }
                }
                affected += 1;
            }
        }
        Ok(affected)
    }
}

impl ConnDeletion for MemoryStore {
    fn delete_expression(&self, table: &str, predicate: &Node) -> Result<usize, SourceError> {
        let columns = self.column_index(table)?;
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| SourceError::TableNotFound(table.to_string()))?;
        let now = Utc::now();
        let mut rows = t.rows.write();
        let doomed: Vec<RowKey> = rows
.iter()
.filter(|(_, row)| {
                let reader = ValueContextWrapper::new(&columns, row);
                let ctx = EvalCtx::new(&reader, now);
                let (v, ok) = eval(&ctx, predicate);
                ok && crate::value::coerce::to_bool(&v)
            })
.map(|(k, _)| k.clone())
.collect();
        let count = doomed.len();
        for key in doomed {
            rows.remove(&key);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Node};

    fn users_table() -> MemoryStore {
        let store = MemoryStore::new("mem");
        store.create_table("users", vec!["user_id", "name", "email", "created", "roles"].into_iter().map(String::from).collect());
        store
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = users_table();
        let created = Value::Time(Utc::now());
        let values = vec![
            Value::Int(123),
            Value::string("aaron"),
            Value::string("e@e.com"),
            created.clone(),
            Value::Strings(vec!["admin".into()]),
        ];
        let key = store.put("users", Some(Value::Int(123)), values.clone()).unwrap();
        assert_eq!(key, Value::Int(123));

        let msg = store.get("users", &Value::Int(123)).unwrap();
        assert_eq!(msg.get("name"), Some(&Value::string("aaron")));
        assert_eq!(msg.get("email"), Some(&Value::string("e@e.com")));
    }

    #[test]
    fn second_put_replaces_row_in_place() {
        let store = users_table();
        let created = Value::Time(Utc::now());
        store
.put(
                "users",
                Some(Value::Int(123)),
                vec![
                    Value::Int(123),
                    Value::string("aaron"),
                    Value::string("e@e.com"),
                    created.clone(),
                    Value::Strings(vec!["admin".into()]),
                ],
            )
.unwrap();
        store
.put(
                "users",
                Some(Value::Int(123)),
                vec![
                    Value::Int(123),
                    Value::string("aaron"),
                    Value::string("aaron@email.com"),
                    created,
                    Value::Strings(vec!["root".into(), "admin".into()]),
                ],
            )
.unwrap();

        let msg = store.get("users", &Value::Int(123)).unwrap();
        assert_eq!(msg.get("email"), Some(&Value::string("aaron@email.com")));
    }

    #[test]
    fn put_without_key_synthesizes_monotonic_key() {
        let store = users_table();
        let k1 = store
.put("users", None, vec![Value::Int(0), Value::string("a"), Value::Nil, Value::Nil, Value::Nil])
.unwrap();
        let k2 = store
.put("users", None, vec![Value::Int(0), Value::string("b"), Value::Nil, Value::Nil, Value::Nil])
.unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn delete_expression_removes_matching_rows() {
        let store = users_table();
        store
.put("users", Some(Value::Int(1)), vec![Value::Int(1), Value::string("a"), Value::Nil, Value::Nil, Value::Nil])
.unwrap();
        store
.put("users", Some(Value::Int(2)), vec![Value::Int(2), Value::string("b"), Value::Nil, Value::Nil, Value::Nil])
.unwrap();

        let predicate = Node::Binary(BinaryOp::Eq, Box::new(Node::Identity("name".into())), Box::new(Node::Literal(Value::string("a"))));
        let count = store.delete_expression("users", &predicate).unwrap();
        assert_eq!(count, 1);
        assert!(store.get("users", &Value::Int(1)).is_err());
        assert!(store.get("users", &Value::Int(2)).is_ok());
    }
}
