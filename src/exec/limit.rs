//! Applies `LIMIT`/`OFFSET` between `OrderBy` and `Projection`. Not named as its own subsystem in the capability/task list, but
//! required by the SELECT pipeline shape the planner produces.

use super::{recv_or_cancel, send_or_cancel, MsgReceiver, MsgSender, Task};
use crate::error::EngineError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct LimitTask {
    limit: Option<usize>,
    offset: usize,
    input: MsgReceiver,
    out: MsgSender,
    cancel: CancellationToken,
}

impl LimitTask {
    pub fn new(limit: Option<usize>, offset: Option<usize>, input: MsgReceiver, out: MsgSender, cancel: CancellationToken) -> Self {
        LimitTask { limit, offset: offset.unwrap_or(0), input, out, cancel }
    }
}

#[async_trait]
impl Task for LimitTask {
    async fn run(&mut self) -> Result<(), EngineError> {
        let mut skipped = 0usize;
        let mut emitted = 0usize;
        while let Some(msg) = recv_or_cancel(&mut self.input, &self.cancel).await {
            if skipped < self.offset {
                skipped += 1;
                continue;
            }
            if let Some(limit) = self.limit {
                if emitted >= limit {
                    break;
                }
            }
            if !send_or_cancel(&self.out, msg, &self.cancel).await {
                break;
            }
            emitted += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::Message;
    use crate::exec::channel;
    use crate::value::Value;
    use std::sync::Arc;

    #[tokio::test]
    async fn limit_and_offset_trim_the_stream() {
        let columns = Arc::new(vec!["n".to_string()]);
        let (in_tx, in_rx) = channel();
        let (out_tx, mut out_rx) = channel();
        let mut task = LimitTask::new(Some(2), Some(1), in_rx, out_tx, CancellationToken::new());
        let handle = tokio::spawn(async move { task.run().await });

        for n in 0..5 {
            in_tx.send(Message::tuple(columns.clone(), vec![Value::Int(n)])).await.unwrap();
        }
        drop(in_tx);
        handle.await.unwrap().unwrap();

        let mut seen = Vec::new();
        while let Some(msg) = out_rx.recv().await {
            seen.push(msg.get("n").cloned().unwrap());
        }
        assert_eq!(seen, vec![Value::Int(1), Value::Int(2)]);
    }
}
