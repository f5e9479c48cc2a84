//! Pulls a message, evaluates the predicate via the VM against a
//! context-reader view of the message, forwards on true.

use super::{recv_or_cancel, send_or_cancel, MsgReceiver, MsgSender, Task};
use crate::ast::Node;
use crate::context::Simple;
use crate::error::EngineError;
use crate::value::coerce;
use crate::vm::{eval, EvalCtx};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

pub struct WhereTask {
    predicate: Node,
    now: DateTime<Utc>,
    input: MsgReceiver,
    out: MsgSender,
    cancel: CancellationToken,
}

impl WhereTask {
    pub fn new(predicate: Node, now: DateTime<Utc>, input: MsgReceiver, out: MsgSender, cancel: CancellationToken) -> Self {
        WhereTask { predicate, now, input, out, cancel }
    }
}

#[async_trait]
impl Task for WhereTask {
    async fn run(&mut self) -> Result<(), EngineError> {
        while let Some(msg) = recv_or_cancel(&mut self.input, &self.cancel).await {
            let reader = Simple::new(msg.as_map());
            let ctx = EvalCtx::new(&reader, self.now);
            let (v, ok) = eval(&ctx, &self.predicate);
            if ok && coerce::to_bool(&v) {
                if !send_or_cancel(&self.out, msg, &self.cancel).await {
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Node};
    use crate::datasource::Message;
    use crate::exec::channel;
    use crate::value::Value;
    use std::sync::Arc;

    #[tokio::test]
    async fn tautology_passes_every_message() {
        let columns = Arc::new(vec!["a".to_string()]);
        let (in_tx, in_rx) = channel();
        let (out_tx, mut out_rx) = channel();
        let predicate = Node::Binary(BinaryOp::Eq, Box::new(Node::Literal(Value::Int(1))), Box::new(Node::Literal(Value::Int(1))));
        let mut task = WhereTask::new(predicate, Utc::now(), in_rx, out_tx, CancellationToken::new());

        let handle = tokio::spawn(async move { task.run().await });
        for i in 0..3 {
            in_tx.send(Message::tuple(columns.clone(), vec![Value::Int(i)])).await.unwrap();
        }
        drop(in_tx);
        handle.await.unwrap().unwrap();

        let mut count = 0;
        while out_rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn false_predicate_drops_every_row() {
        let columns = Arc::new(vec!["a".to_string()]);
        let (in_tx, in_rx) = channel();
        let (out_tx, mut out_rx) = channel();
        let predicate = Node::Literal(Value::Bool(false));
        let mut task = WhereTask::new(predicate, Utc::now(), in_rx, out_tx, CancellationToken::new());

        let handle = tokio::spawn(async move { task.run().await });
        in_tx.send(Message::tuple(columns, vec![Value::Int(1)])).await.unwrap();
        drop(in_tx);
        handle.await.unwrap().unwrap();

        assert!(out_rx.recv().await.is_none());
    }
}
