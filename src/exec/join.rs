//! Hash join, inner-equal. Each side is drained into a
//! keyed hash table concurrently; once both input channels close, the
//! probe iterates the smaller side and emits the cross product of matched
//! keys.

use super::{recv_or_cancel, send_or_cancel, MsgReceiver, MsgSender, Task};
use crate::ast::Node;
use crate::context::Simple;
use crate::datasource::Message;
use crate::error::EngineError;
use crate::value::coerce;
use crate::vm::{eval, EvalCtx};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

pub struct SourceJoinTask {
    left_key: Node,
    right_key: Node,
    now: DateTime<Utc>,
    left_in: MsgReceiver,
    right_in: MsgReceiver,
    out: MsgSender,
    cancel: CancellationToken,
}

impl SourceJoinTask {
    pub fn new(
        left_key: Node,
        right_key: Node,
        now: DateTime<Utc>,
        left_in: MsgReceiver,
        right_in: MsgReceiver,
        out: MsgSender,
        cancel: CancellationToken,
    ) -> Self {
        SourceJoinTask { left_key, right_key, now, left_in, right_in, out, cancel }
    }
}

async fn build_table(
    mut input: MsgReceiver,
    key_expr: &Node,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> HashMap<String, Vec<Message>> {
    let mut table: HashMap<String, Vec<Message>> = HashMap::new();
    while let Some(msg) = recv_or_cancel(&mut input, cancel).await {
        let reader = Simple::new(msg.as_map());
        let ctx = EvalCtx::new(&reader, now);
        let (v, ok) = eval(&ctx, key_expr);
        if ok {
            table.entry(coerce::to_string_value(&v)).or_default().push(msg);
        }
    }
    table
}

#[async_trait]
impl Task for SourceJoinTask {
    async fn run(&mut self) -> Result<(), EngineError> {
        let left_in = std::mem::replace(&mut self.left_in, tokio::sync::mpsc::channel(1).1);
        let right_in = std::mem::replace(&mut self.right_in, tokio::sync::mpsc::channel(1).1);

        let (left_table, right_table) = tokio::join!(
            build_table(left_in, &self.left_key, self.now, &self.cancel),
            build_table(right_in, &self.right_key, self.now, &self.cancel),
        );

        let (probe, build) = if left_table.len() <= right_table.len() {
            (&left_table, &right_table)
        } else {
            (&right_table, &left_table)
        };

        let mut next_id = 0u64;
        for (key, probe_rows) in probe {
            let Some(build_rows) = build.get(key) else {
                continue;
            };
            for p in probe_rows {
                for b in build_rows {
                    let mut merged = p.as_map();
                    merged.extend(b.as_map());
                    let id = next_id;
                    next_id += 1;
                    if !send_or_cancel(&self.out, Message::map(merged).with_id(id), &self.cancel).await {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::channel;
    use crate::value::Value;
    use std::sync::Arc;

    #[tokio::test]
    async fn emits_cartesian_product_of_matched_keys_only() {
        let left_cols = Arc::new(vec!["name".to_string(), "age".to_string()]);
        let right_cols = Arc::new(vec!["name".to_string(), "email".to_string()]);
        let (left_tx, left_rx) = channel();
        let (right_tx, right_rx) = channel();
        let (out_tx, mut out_rx) = channel();

        let mut task = SourceJoinTask::new(
            Node::Identity("name".into()),
            Node::Identity("name".into()),
            Utc::now(),
            left_rx,
            right_rx,
            out_tx,
            CancellationToken::new(),
        );
        let handle = tokio::spawn(async move { task.run().await });

        left_tx.send(Message::tuple(left_cols.clone(), vec![Value::string("alice"), Value::Int(30)])).await.unwrap();
        left_tx.send(Message::tuple(left_cols, vec![Value::string("nomatch"), Value::Int(1)])).await.unwrap();
        drop(left_tx);
        right_tx.send(Message::tuple(right_cols, vec![Value::string("alice"), Value::string("a@x.com")])).await.unwrap();
        drop(right_tx);

        handle.await.unwrap().unwrap();
        let msg = out_rx.recv().await.unwrap();
        let map = msg.into_map();
        assert_eq!(map.get("age"), Some(&Value::Int(30)));
        assert_eq!(map.get("email"), Some(&Value::string("a@x.com")));
        assert!(out_rx.recv().await.is_none());
    }
}
