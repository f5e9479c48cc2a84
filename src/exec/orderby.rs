//! Buffers all input, sorts by the `ORDER BY` keys (multi-key, asc/desc per
//! key), emits in order.

use super::{recv_or_cancel, send_or_cancel, MsgReceiver, MsgSender, Task};
use crate::context::Simple;
use crate::datasource::Message;
use crate::error::EngineError;
use crate::parser::{OrderDir, OrderKey};
use crate::value::coerce;
use crate::vm::{eval, EvalCtx};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use tokio_util::sync::CancellationToken;

pub struct OrderByTask {
    keys: Vec<OrderKey>,
    now: DateTime<Utc>,
    input: MsgReceiver,
    out: MsgSender,
    cancel: CancellationToken,
}

impl OrderByTask {
    pub fn new(keys: Vec<OrderKey>, now: DateTime<Utc>, input: MsgReceiver, out: MsgSender, cancel: CancellationToken) -> Self {
        OrderByTask { keys, now, input, out, cancel }
    }
}

#[async_trait]
impl Task for OrderByTask {
    async fn run(&mut self) -> Result<(), EngineError> {
        let mut buffered = Vec::new();
        while let Some(msg) = recv_or_cancel(&mut self.input, &self.cancel).await {
            buffered.push(msg);
        }

        buffered.sort_by(|a, b| self.compare(a, b));

        for msg in buffered {
            if !send_or_cancel(&self.out, msg, &self.cancel).await {
                break;
            }
        }
        Ok(())
    }
}

impl OrderByTask {
    fn compare(&self, a: &Message, b: &Message) -> Ordering {
        let reader_a = Simple::new(a.as_map());
        let reader_b = Simple::new(b.as_map());
        let ctx_a = EvalCtx::new(&reader_a, self.now);
        let ctx_b = EvalCtx::new(&reader_b, self.now);

        for key in &self.keys {
            let (va, oka) = eval(&ctx_a, &key.expr);
            let (vb, okb) = eval(&ctx_b, &key.expr);
            let ord = match (oka, okb) {
                (true, true) => coerce::to_float(&va)
.partial_cmp(&coerce::to_float(&vb))
.unwrap_or_else(|| coerce::to_string_value(&va).cmp(&coerce::to_string_value(&vb))),
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => Ordering::Equal,
            };
            let ord = if key.dir == OrderDir::Desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
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
    async fn sorts_descending_by_single_key() {
        let columns = Arc::new(vec!["n".to_string()]);
        let (in_tx, in_rx) = channel();
        let (out_tx, mut out_rx) = channel();
        let keys = vec![OrderKey { expr: Node::Identity("n".into()), dir: OrderDir::Desc }];
        let mut task = OrderByTask::new(keys, Utc::now(), in_rx, out_tx, CancellationToken::new());

        let handle = tokio::spawn(async move { task.run().await });
        for n in [3, 1, 2] {
            in_tx.send(Message::tuple(columns.clone(), vec![Value::Int(n)])).await.unwrap();
        }
        drop(in_tx);
        handle.await.unwrap().unwrap();

        let mut seen = Vec::new();
        while let Some(msg) = out_rx.recv().await {
            seen.push(coerce::to_float(msg.get("n").unwrap()) as i64);
        }
        assert_eq!(seen, vec![3, 2, 1]);
    }
}
