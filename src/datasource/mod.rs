//! Datasource capability traits.
//!
//! A source registers by name and advertises capabilities by implementing
//! the traits below; the planner probes for them with `as_scanner()` /
//! `as_seeker()` / etc. rather than a double-dispatch visitor.

pub mod memory;

use crate::ast::Node;
use crate::error::SourceError;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A row flowing through the executor. Either a positional tuple
/// (`SqlDriverMessage`) or a named map (`SqlDriverMessageMap`), mirroring
/// the two shapes the original source passes between tasks.
///
/// `id` is monotonic within a single task's output stream; gaps are
/// permitted when the task drops filtered rows. Tasks that only forward
/// rows (`WhereTask`, `HavingTask`, `OrderByTask`, `LimitTask`) preserve the
/// id of the message they received rather than assigning their own.
#[derive(Debug, Clone)]
pub enum Message {
    Tuple {
        id: u64,
        columns: Arc<Vec<String>>,
        values: Vec<Value>,
    },
    Map {
        id: u64,
        values: BTreeMap<String, Value>,
    },
}

impl Message {
    pub fn tuple(columns: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Message::Tuple { id: 0, columns, values }
    }

    pub fn map(values: BTreeMap<String, Value>) -> Self {
        Message::Map { id: 0, values }
    }

    pub fn id(&self) -> u64 {
        match self {
            Message::Tuple { id, .. } => *id,
            Message::Map { id, .. } => *id,
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        match &mut self {
            Message::Tuple { id: slot, .. } => *slot = id,
            Message::Map { id: slot, .. } => *slot = id,
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Message::Tuple { columns, values, .. } => {
                columns.iter().position(|c| c == name).and_then(|i| values.get(i))
            }
            Message::Map { values, .. } => values.get(name),
        }
    }

    pub fn into_map(self) -> BTreeMap<String, Value> {
        match self {
            Message::Map { values, .. } => values,
            Message::Tuple { columns, values, .. } => columns.iter().cloned().zip(values).collect(),
        }
    }

    pub fn as_map(&self) -> BTreeMap<String, Value> {
        match self {
            Message::Map { values, .. } => values.clone(),
            Message::Tuple { columns, values, .. } => columns.iter().cloned().zip(values.iter().cloned()).collect(),
        }
    }
}

/// Lifecycle + table listing. Every datasource implements this.
pub trait Source: Send + Sync {
    fn name(&self) -> &str;
    fn tables(&self) -> Vec<String>;
    fn open(&self) -> Result<(), SourceError> {
        Ok(())
    }
    fn close(&self) -> Result<(), SourceError> {
        Ok(())
    }

    fn as_scanner(&self) -> Option<&dyn Scanner> {
        None
    }
    fn as_schema_columns(&self) -> Option<&dyn SchemaColumns> {
        None
    }
    fn as_seeker(&self) -> Option<&dyn Seeker> {
        None
    }
    fn as_source_planner(&self) -> Option<&dyn SourcePlanner> {
        None
    }
    fn as_conn_upsert(&self) -> Option<&dyn ConnUpsert> {
        None
    }
    fn as_conn_patch_where(&self) -> Option<&dyn ConnPatchWhere> {
        None
    }
    fn as_conn_deletion(&self) -> Option<&dyn ConnDeletion> {
        None
    }
}

/// Produces a full scan of a table as an iterator of [`Message`].
pub trait Scanner: Send + Sync {
    fn create_iterator(&self, table: &str) -> Result<Box<dyn Iterator<Item = Message> + Send>, SourceError>;
}

/// Declares the ordered column list of a table.
pub trait SchemaColumns: Send + Sync {
    fn columns(&self, table: &str) -> Result<Vec<String>, SourceError>;
}

/// Point lookup by primary key.
pub trait Seeker: Send + Sync {
    fn get(&self, table: &str, key: &Value) -> Result<Message, SourceError>;
    fn multi_get(&self, table: &str, keys: &[Value]) -> Result<Vec<Message>, SourceError> {
        keys.iter().map(|k| self.get(table, k)).collect()
    }
}

/// A visitor-free planning hook: the source is handed the predicate and may
/// return a specialized scan that pushes the predicate or a row limit down.
pub trait SourcePlanner: Send + Sync {
    fn plan_select(
        &self,
        table: &str,
        predicate: Option<&Node>,
        limit: Option<usize>,
    ) -> Result<Box<dyn Iterator<Item = Message> + Send>, SourceError>;
}

/// Upsert capability: `Put(key|None, values) -> new_key`.
pub trait ConnUpsert: Send + Sync {
    fn put(&self, table: &str, key: Option<Value>, values: Vec<Value>) -> Result<Value, SourceError>;
}

/// In-place UPDATE capability driven directly by a WHERE predicate.
pub trait ConnPatchWhere: Send + Sync {
    fn patch_where(&self, table: &str, predicate: &Node, assignments: &BTreeMap<String, Value>) -> Result<usize, SourceError>;
}

/// DELETE capability driven directly by a WHERE predicate.
pub trait ConnDeletion: Send + Sync {
    fn delete_expression(&self, table: &str, predicate: &Node) -> Result<usize, SourceError>;
}
