//! Filters post-aggregation rows by a predicate, exactly like
//! [`super::where_task::WhereTask`] but positioned after `GroupBy` in the
//! pipeline.

use super::{recv_or_cancel, send_or_cancel, MsgReceiver, MsgSender, Task};
use crate::ast::Node;
use crate::context::Simple;
use crate::error::EngineError;
use crate::value::coerce;
use crate::vm::{eval, EvalCtx};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

pub struct HavingTask {
    predicate: Node,
    now: DateTime<Utc>,
    input: MsgReceiver,
    out: MsgSender,
    cancel: CancellationToken,
}

impl HavingTask {
    pub fn new(predicate: Node, now: DateTime<Utc>, input: MsgReceiver, out: MsgSender, cancel: CancellationToken) -> Self {
        HavingTask { predicate, now, input, out, cancel }
    }
}

#[async_trait]
impl Task for HavingTask {
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
