//! Mutation tasks: `Upsert` (INSERT/UPSERT/UPDATE) and `DeletionTask`
//! (DELETE).
//!
//! Per the recorded decision in `DESIGN.md`, `DeletionScanner` is not
//! implemented as a separate branch — both named cases degrade to the same
//! `DeleteExpression` call, so one `DeletionTask` covers both.

use super::{send_or_cancel, MsgSender, Task};
use crate::ast::{BinaryOp, Node};
use crate::context::Simple;
use crate::datasource::{Message, Source};
use crate::error::{EngineError, SourceError};
use crate::value::Value;
use crate::vm::{eval, EvalCtx};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub enum MutationOp {
    Insert { columns: Vec<String>, rows: Vec<Vec<Node>> },
    Update { assignments: Vec<(String, Node)>, filter: Option<Node> },
}

pub struct UpsertTask {
    source: Arc<dyn Source>,
    table: String,
    op: MutationOp,
    now: DateTime<Utc>,
    out: MsgSender,
    cancel: CancellationToken,
}

impl UpsertTask {
    pub fn new(source: Arc<dyn Source>, table: String, op: MutationOp, now: DateTime<Utc>, out: MsgSender, cancel: CancellationToken) -> Self {
        UpsertTask { source, table, op, now, out, cancel }
    }

    fn eval_no_row(&self, node: &Node) -> Value {
        let empty = Simple::default();
        let ctx = EvalCtx::new(&empty, self.now);
        let (v, ok) = eval(&ctx, node);
        if ok {
            v
        } else {
            Value::Nil
        }
    }
}

#[async_trait]
impl Task for UpsertTask {
    async fn run(&mut self) -> Result<(), EngineError> {
        let affected = match &self.op {
            MutationOp::Insert { columns, rows } => {
                let upsert = self
.source
.as_conn_upsert()
.ok_or(SourceError::CapabilityMissing("ConnUpsert"))?;
                let mut count = 0usize;
                for row in rows {
                    let _ = columns;
                    let values: Vec<Value> = row.iter().map(|n| self.eval_no_row(n)).collect();
                    upsert.put(&self.table, None, values)?;
                    count += 1;
                }
                count
            }
            MutationOp::Update { assignments, filter } => {
                let assignment_values: BTreeMap<String, Value> =
                    assignments.iter().map(|(name, expr)| (name.clone(), self.eval_no_row(expr))).collect();

                if let Some(patch) = self.source.as_conn_patch_where() {
                    let predicate = filter.clone().unwrap_or(Node::Literal(Value::Bool(true)));
                    patch.patch_where(&self.table, &predicate, &assignment_values)?
                } else {
                    let upsert = self
.source
.as_conn_upsert()
.ok_or(SourceError::CapabilityMissing("ConnUpsert"))?;
                    let key = filter.as_ref().and_then(key_from_where);
                    let values: Vec<Value> = assignment_values.values().cloned().collect();
                    upsert.put(&self.table, key, values)?;
                    1
                }
            }
        };

        send_or_cancel(&self.out, summary_message(affected), &self.cancel).await;
        Ok(())
    }
}

pub struct DeletionTask {
    source: Arc<dyn Source>,
    table: String,
    filter: Node,
    out: MsgSender,
    cancel: CancellationToken,
}

impl DeletionTask {
    pub fn new(source: Arc<dyn Source>, table: String, filter: Node, out: MsgSender, cancel: CancellationToken) -> Self {
        DeletionTask { source, table, filter, out, cancel }
    }
}

#[async_trait]
impl Task for DeletionTask {
    async fn run(&mut self) -> Result<(), EngineError> {
        let deletion = self
.source
.as_conn_deletion()
.ok_or(SourceError::CapabilityMissing("ConnDeletion"))?;
        let count = deletion.delete_expression(&self.table, &self.filter)?;
        send_or_cancel(&self.out, summary_message(count), &self.cancel).await;
        Ok(())
    }
}

fn summary_message(affected: usize) -> Message {
    let mut row = BTreeMap::new();
    row.insert("status".to_string(), Value::Int(0));
    row.insert("affected".to_string(), Value::Int(affected as i64));
    Message::map(row)
}

/// Best-effort extraction of a primary key from a WHERE predicate for the
/// `PatchWhere`-unavailable UPDATE fallback: the first top-level `col = lit`
/// equality found, searched depth-first through `AND` conjuncts.
fn key_from_where(node: &Node) -> Option<Value> {
    match node {
        Node::Binary(BinaryOp::Eq, lhs, rhs) => match (lhs.as_ref(), rhs.as_ref()) {
            (Node::Identity(_), Node::Literal(v)) => Some(v.clone()),
            (Node::Literal(v), Node::Identity(_)) => Some(v.clone()),
            _ => None,
        },
        Node::Binary(BinaryOp::And, lhs, rhs) => key_from_where(lhs).or_else(|| key_from_where(rhs)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::memory::MemoryStore;
    use crate::datasource::ConnUpsert;
    use crate::exec::channel;

    #[tokio::test]
    async fn insert_rows_then_summary() {
        let store = Arc::new(MemoryStore::new("mem"));
        store.create_table("users", vec!["id".to_string(), "name".to_string()]);
        let (out_tx, mut out_rx) = channel();
        let op = MutationOp::Insert {
            columns: vec![],
            rows: vec![vec![Node::Literal(Value::Int(1)), Node::Literal(Value::string("a"))]],
        };
        let mut task = UpsertTask::new(store.clone(), "users".into(), op, Utc::now(), out_tx, CancellationToken::new());
        task.run().await.unwrap();

        let msg = out_rx.recv().await.unwrap();
        assert_eq!(msg.get("affected"), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn deletion_task_reports_count() {
        let store = Arc::new(MemoryStore::new("mem"));
        store.create_table("users", vec!["id".to_string(), "name".to_string()]);
        store.put("users", Some(Value::Int(1)), vec![Value::Int(1), Value::string("a")]).unwrap();

        let (out_tx, mut out_rx) = channel();
        let filter = Node::Binary(BinaryOp::Eq, Box::new(Node::Identity("id".into())), Box::new(Node::Literal(Value::Int(1))));
        let mut task = DeletionTask::new(store, "users".into(), filter, out_tx, CancellationToken::new());
        task.run().await.unwrap();

        let msg = out_rx.recv().await.unwrap();
        assert_eq!(msg.get("affected"), Some(&Value::Int(1)));
    }
}
