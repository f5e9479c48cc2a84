//! Accumulates in-memory a map `key-tuple -> aggregator-state`; emits one row
//! per group upon input closure.

use super::{recv_or_cancel, send_or_cancel, MsgReceiver, MsgSender, Task};
use crate::ast::Node;
use crate::context::Simple;
use crate::datasource::Message;
use crate::error::EngineError;
use crate::value::{coerce, Value};
use crate::vm::{eval, EvalCtx};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    CountDistinct,
}

impl AggKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggKind::Count),
            "sum" => Some(AggKind::Sum),
            "avg" => Some(AggKind::Avg),
            "min" => Some(AggKind::Min),
            "max" => Some(AggKind::Max),
            "count_distinct" => Some(AggKind::CountDistinct),
            _ => None,
        }
    }
}

/// A single aggregate output column: `kind(arg) AS output_name`. `arg` is
/// `None` for `COUNT(*)`.
#[derive(Debug, Clone)]
pub struct AggSpec {
    pub output_name: String,
    pub kind: AggKind,
    pub arg: Option<Node>,
}

enum AccState {
    Count(i64),
    Sum(f64),
    Avg { sum: f64, count: i64 },
    Min(Option<Value>),
    Max(Option<Value>),
    CountDistinct(HashSet<String>),
}

impl AccState {
    fn new(kind: AggKind) -> Self {
        match kind {
            AggKind::Count => AccState::Count(0),
            AggKind::Sum => AccState::Sum(0.0),
            AggKind::Avg => AccState::Avg { sum: 0.0, count: 0 },
            AggKind::Min => AccState::Min(None),
            AggKind::Max => AccState::Max(None),
            AggKind::CountDistinct => AccState::CountDistinct(HashSet::new()),
        }
    }

    fn update(&mut self, value: Option<&Value>) {
        match self {
            AccState::Count(n) => *n += 1,
            AccState::Sum(s) => {
                if let Some(v) = value {
                    *s += coerce::to_float(v);
                }
            }
            AccState::Avg { sum, count } => {
                if let Some(v) = value {
                    *sum += coerce::to_float(v);
                    *count += 1;
                }
            }
            AccState::Min(cur) => {
                if let Some(v) = value {
                    let replace = match cur {
                        None => true,
                        Some(c) => coerce::to_float(v) < coerce::to_float(c),
                    };
                    if replace {
                        *cur = Some(v.clone());
                    }
                }
            }
            AccState::Max(cur) => {
                if let Some(v) = value {
                    let replace = match cur {
                        None => true,
                        Some(c) => coerce::to_float(v) > coerce::to_float(c),
                    };
                    if replace {
                        *cur = Some(v.clone());
                    }
                }
            }
            AccState::CountDistinct(set) => {
                if let Some(v) = value {
                    set.insert(coerce::to_string_value(v));
                }
            }
        }
    }

    fn finalize(self) -> Value {
        match self {
            AccState::Count(n) => Value::Int(n),
            AccState::Sum(s) => Value::Number(s),
            AccState::Avg { sum, count } => {
                if count == 0 {
                    Value::Number(f64::NAN)
                } else {
                    Value::Number(sum / count as f64)
                }
            }
            AccState::Min(v) => v.unwrap_or(Value::Nil),
            AccState::Max(v) => v.unwrap_or(Value::Nil),
            AccState::CountDistinct(set) => Value::Int(set.len() as i64),
        }
    }
}

struct GroupState {
    key_names: Vec<String>,
    key_values: Vec<Value>,
    accs: Vec<AccState>,
}

pub struct GroupByTask {
    group_by: Vec<Node>,
    aggregates: Vec<AggSpec>,
    now: DateTime<Utc>,
    input: MsgReceiver,
    out: MsgSender,
    cancel: CancellationToken,
    next_id: u64,
}

impl GroupByTask {
    pub fn new(
        group_by: Vec<Node>,
        aggregates: Vec<AggSpec>,
        now: DateTime<Utc>,
        input: MsgReceiver,
        out: MsgSender,
        cancel: CancellationToken,
    ) -> Self {
        GroupByTask { group_by, aggregates, now, input, out, cancel, next_id: 0 }
    }
}

#[async_trait]
impl Task for GroupByTask {
    async fn run(&mut self) -> Result<(), EngineError> {
        let mut groups: BTreeMap<Vec<String>, GroupState> = BTreeMap::new();

        while let Some(msg) = recv_or_cancel(&mut self.input, &self.cancel).await {
            let reader = Simple::new(msg.as_map());
            let ctx = EvalCtx::new(&reader, self.now);

            let mut key_values = Vec::with_capacity(self.group_by.len());
            let mut key_strings = Vec::with_capacity(self.group_by.len());
            for key_expr in &self.group_by {
                let (v, ok) = eval(&ctx, key_expr);
                let v = if ok { v } else { Value::Nil };
                key_strings.push(coerce::to_string_value(&v));
                key_values.push(v);
            }

            let entry = groups.entry(key_strings).or_insert_with(|| GroupState {
                key_names: self.group_by.iter().map(|n| n.to_string()).collect(),
                key_values: key_values.clone(),
                accs: self.aggregates.iter().map(|a| AccState::new(a.kind)).collect(),
            });

            for (acc, spec) in entry.accs.iter_mut().zip(&self.aggregates) {
                let arg_value = match &spec.arg {
                    Some(expr) => {
                        let (v, ok) = eval(&ctx, expr);
                        if ok {
                            Some(v)
                        } else {
                            None
                        }
                    }
                    None => Some(Value::Bool(true)),
                };
                acc.update(arg_value.as_ref());
            }
        }

        for (_, group) in groups {
            let mut row = BTreeMap::new();
            for (name, value) in group.key_names.into_iter().zip(group.key_values) {
                row.insert(name, value);
            }
            for (spec, acc) in self.aggregates.iter().zip(group.accs) {
                row.insert(spec.output_name.clone(), acc.finalize());
            }
            let id = self.next_id;
            self.next_id += 1;
            if !send_or_cancel(&self.out, Message::map(row).with_id(id), &self.cancel).await {
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
    use std::sync::Arc;

    #[tokio::test]
    async fn counts_rows_per_group() {
        let columns = Arc::new(vec!["name".to_string(), "amount".to_string()]);
        let (in_tx, in_rx) = channel();
        let (out_tx, mut out_rx) = channel();
        let group_by = vec![Node::Identity("name".into())];
        let aggregates = vec![AggSpec {
            output_name: "total".to_string(),
            kind: AggKind::Sum,
            arg: Some(Node::Identity("amount".into())),
        }];
        let mut task = GroupByTask::new(group_by, aggregates, Utc::now(), in_rx, out_tx, CancellationToken::new());

        let handle = tokio::spawn(async move { task.run().await });
        in_tx.send(Message::tuple(columns.clone(), vec![Value::string("a"), Value::Int(10)])).await.unwrap();
        in_tx.send(Message::tuple(columns.clone(), vec![Value::string("a"), Value::Int(5)])).await.unwrap();
        in_tx.send(Message::tuple(columns, vec![Value::string("b"), Value::Int(7)])).await.unwrap();
        drop(in_tx);
        handle.await.unwrap().unwrap();

        let mut totals = BTreeMap::new();
        while let Some(msg) = out_rx.recv().await {
            let map = msg.into_map();
            let name = coerce::to_string_value(map.get("name").unwrap());
            totals.insert(name, coerce::to_float(map.get("total").unwrap()));
        }
        assert_eq!(totals.get("a"), Some(&15.0));
        assert_eq!(totals.get("b"), Some(&7.0));
    }
}
