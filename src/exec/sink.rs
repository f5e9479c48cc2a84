//! The terminal task: has no output
//! channel, collects messages, and exposes them to the caller once `run`
//! completes.

use super::{recv_or_cancel, MsgReceiver, Task};
use crate::datasource::Message;
use crate::error::EngineError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct Sink {
    input: MsgReceiver,
    cancel: CancellationToken,
    rows: Vec<Message>,
}

impl Sink {
    pub fn new(input: MsgReceiver, cancel: CancellationToken) -> Self {
        Sink { input, cancel, rows: Vec::new() }
    }

    /// Column names, derived from the first collected row. Empty if no rows
    /// were produced.
    pub fn columns(&self) -> Vec<String> {
        match self.rows.first() {
            Some(Message::Map { values, .. }) => values.keys().cloned().collect(),
            Some(Message::Tuple { columns, .. }) => columns.as_ref().clone(),
            None => Vec::new(),
        }
    }

    pub fn into_rows(self) -> Vec<Message> {
        self.rows
    }

    pub fn rows(&self) -> &[Message] {
        &self.rows
    }
}

#[async_trait]
impl Task for Sink {
    async fn run(&mut self) -> Result<(), EngineError> {
        while let Some(msg) = recv_or_cancel(&mut self.input, &self.cancel).await {
            self.rows.push(msg);
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
    async fn collects_every_message_in_order() {
        let columns = Arc::new(vec!["a".to_string()]);
        let (tx, rx) = channel();
        let mut sink = Sink::new(rx, CancellationToken::new());
        let handle = tokio::spawn(async move { sink.run().await.map(|_| sink) });

        for i in 0..4 {
            tx.send(Message::tuple(columns.clone(), vec![Value::Int(i)])).await.unwrap();
        }
        drop(tx);
        let sink = handle.await.unwrap().unwrap();
        assert_eq!(sink.rows().len(), 4);
    }
}
