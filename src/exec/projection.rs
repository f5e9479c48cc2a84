//! For each input row, produces a named-value map containing only the
//! selected columns, applying aliases and expression evaluation.

use super::{recv_or_cancel, send_or_cancel, MsgReceiver, MsgSender, Task};
use crate::ast::SelectColumn;
use crate::context::{ContextReader, Simple};
use crate::datasource::Message;
use crate::error::EngineError;
use crate::vm::{eval_sql, EvalCtx};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

pub struct ProjectionTask {
    columns: Vec<SelectColumn>,
    now: DateTime<Utc>,
    input: MsgReceiver,
    out: MsgSender,
    cancel: CancellationToken,
    next_id: u64,
}

impl ProjectionTask {
    pub fn new(columns: Vec<SelectColumn>, now: DateTime<Utc>, input: MsgReceiver, out: MsgSender, cancel: CancellationToken) -> Self {
        ProjectionTask { columns, now, input, out, cancel, next_id: 0 }
    }
}

#[async_trait]
impl Task for ProjectionTask {
    async fn run(&mut self) -> Result<(), EngineError> {
        while let Some(msg) = recv_or_cancel(&mut self.input, &self.cancel).await {
            let reader = Simple::new(msg.as_map());
            let ctx = EvalCtx::new(&reader, self.now);
            let projected = eval_sql(&self.columns, &ctx);
            let id = self.next_id;
            self.next_id += 1;
            if !send_or_cancel(&self.out, Message::map(projected.row()).with_id(id), &self.cancel).await {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Node;
    use crate::exec::channel;
    use crate::value::Value;
    use std::sync::Arc;

    #[tokio::test]
    async fn select_writes_named_output_context() {
        let columns = Arc::new(vec!["int5".to_string()]);
        let (in_tx, in_rx) = channel();
        let (out_tx, mut out_rx) = channel();
        let select_cols = vec![SelectColumn { expr: Node::Identity("int5".into()), alias: None }];
        let mut task = ProjectionTask::new(select_cols, Utc::now(), in_rx, out_tx, CancellationToken::new());

        let handle = tokio::spawn(async move { task.run().await });
        in_tx.send(Message::tuple(columns, vec![Value::Int(5)])).await.unwrap();
        drop(in_tx);
        handle.await.unwrap().unwrap();

        let msg = out_rx.recv().await.unwrap();
        assert_eq!(msg.get("int5"), Some(&Value::Int(5)));
    }
}
