//! The root task of a pipeline: drains a [`Scanner`]-produced iterator onto
//! its output channel.

use super::{send_or_cancel, MsgSender, Task};
use crate::datasource::Message;
use crate::error::EngineError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct SourceTask {
    iter: Box<dyn Iterator<Item = Message> + Send>,
    out: MsgSender,
    cancel: CancellationToken,
    next_id: u64,
}

impl SourceTask {
    pub fn new(iter: Box<dyn Iterator<Item = Message> + Send>, out: MsgSender, cancel: CancellationToken) -> Self {
        SourceTask { iter, out, cancel, next_id: 0 }
    }
}

#[async_trait]
impl Task for SourceTask {
    async fn run(&mut self) -> Result<(), EngineError> {
        while let Some(msg) = self.iter.next() {
            let id = self.next_id;
            self.next_id += 1;
            if !send_or_cancel(&self.out, msg.with_id(id), &self.cancel).await {
                break;
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
    async fn emits_every_message_then_closes() {
        let columns = Arc::new(vec!["a".to_string()]);
        let rows: Vec<Message> = (0..5).map(|i| Message::tuple(columns.clone(), vec![Value::Int(i)])).collect();
        let (tx, mut rx) = channel();
        let cancel = CancellationToken::new();
        let mut task = SourceTask::new(Box::new(rows.into_iter()), tx, cancel);
        task.run().await.unwrap();

        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 5);
    }
}
