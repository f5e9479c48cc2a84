//! Turns a parsed [`Statement`] into a running task DAG.
//!
//! `EngineConfig` replaces any process-level singleton: every query is planned against an explicit,
//! read-only-after-start table of datasources.

use crate::ast::{is_date_math_literal, Node, SelectColumn};
use crate::datasource::Source;
use crate::error::{EngineError, PlanError};
use crate::exec::groupby::{AggKind, AggSpec, GroupByTask};
use crate::exec::having::HavingTask;
use crate::exec::join::SourceJoinTask;
use crate::exec::limit::LimitTask;
use crate::exec::mutation::{DeletionTask, MutationOp, UpsertTask};
use crate::exec::orderby::OrderByTask;
use crate::exec::projection::ProjectionTask;
use crate::exec::sink::Sink;
use crate::exec::source::SourceTask;
use crate::exec::where_task::WhereTask;
use crate::exec::{channel, spawn_task, ErrorSlot, Task};
use crate::parser::{DeleteStmt, InsertStmt, SelectStmt, Statement, UpdateStmt};
use crate::value::Value;
use crate::vm::functions::resolve_date_math;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// The ambient, explicit runtime configuration value every query plans
/// against. Table name -> already-open
/// connection.
#[derive(Clone, Default)]
pub struct EngineConfig {
    sources: HashMap<String, Arc<dyn Source>>,
    filters: HashMap<String, Node>,
}

impl EngineConfig {
    pub fn new() -> Self {
        EngineConfig::default()
    }

    pub fn register(&mut self, table: impl Into<String>, source: Arc<dyn Source>) {
        self.sources.insert(table.into(), source);
    }

    /// Registers a named filter, resolvable from `include NAME` expressions.
    pub fn register_filter(&mut self, name: impl Into<String>, filter: Node) {
        self.filters.insert(name.into(), filter);
    }

    fn lookup(&self, table: &str) -> Result<Arc<dyn Source>, PlanError> {
        self.sources.get(table).cloned().ok_or_else(|| PlanError::UnknownTable(table.to_string()))
    }

    fn lookup_filter(&self, name: &str) -> Result<&Node, PlanError> {
        self.filters.get(name).ok_or_else(|| PlanError::UnknownFilter(name.to_string()))
    }
}

/// A running query: the caller awaits `sink_handle` for the result rows and
/// `task_handles` (via [`crate::exec::join_all`]) to detect panics.
pub struct Plan {
    pub task_handles: Vec<JoinHandle<()>>,
    pub sink_handle: JoinHandle<Sink>,
    pub cancel: CancellationToken,
    pub errors: ErrorSlot,
}

pub struct Planner<'a> {
    config: &'a EngineConfig,
    now: DateTime<Utc>,
}

impl<'a> Planner<'a> {
    pub fn new(config: &'a EngineConfig, now: DateTime<Utc>) -> Self {
        Planner { config, now }
    }

    /// Planning-time normalization applied to every predicate before it
    /// reaches a task: resolves `include NAME` references against
    /// `EngineConfig`'s named-filter table, then rewrites any remaining
    /// date-math string literal (`"now-1M"`) into a concrete `Value::Time`.
    fn prepare_predicate(&self, node: &Node) -> Result<Node, PlanError> {
        let mut seen = Vec::new();
        let resolved = resolve_includes(self.config, node, &mut seen)?;
        Ok(rewrite_date_math(&resolved, self.now))
    }

    #[instrument(skip(self, stmt))]
    pub fn plan(&self, stmt: &Statement) -> Result<Plan, EngineError> {
        let cancel = CancellationToken::new();
        let errors = ErrorSlot::new();
        let mut handles = Vec::new();

        let sink_input = match stmt {
            Statement::Select(select) => self.plan_select(select, &cancel, &errors, &mut handles)?,
            Statement::Filter { table, filter, has_date_math } => {
                let table = table.clone().ok_or(PlanError::MissingFrom)?;
                let select = SelectStmt {
                    columns: vec![SelectColumn { expr: Node::Identity("*".into()), alias: None }],
                    from: Some(table),
                    filter: Some(filter.clone()),
                    has_date_math: *has_date_math,
                    ..Default::default()
                };
                self.plan_select(&select, &cancel, &errors, &mut handles)?
            }
            Statement::Insert(ins) => self.plan_insert(ins, false, &cancel, &errors, &mut handles)?,
            Statement::Upsert(ins) => self.plan_insert(ins, true, &cancel, &errors, &mut handles)?,
            Statement::Update(upd) => self.plan_update(upd, &cancel, &errors, &mut handles)?,
            Statement::Delete(del) => self.plan_delete(del, &cancel, &errors, &mut handles)?,
        };

        let sink = Sink::new(sink_input, cancel.clone());
        let sink_errors = errors.clone();
        let sink_cancel = cancel.clone();
        let sink_handle = tokio::spawn(async move {
            let mut sink = sink;
            if let Err(e) = Task::run(&mut sink).await {
                sink_errors.record(e);
                sink_cancel.cancel();
            }
            sink
        });

        Ok(Plan { task_handles: handles, sink_handle, cancel, errors })
    }

    fn plan_select(
        &self,
        select: &SelectStmt,
        cancel: &CancellationToken,
        errors: &ErrorSlot,
        handles: &mut Vec<JoinHandle<()>>,
    ) -> Result<crate::exec::MsgReceiver, EngineError> {
        let table = select.from.as_ref().ok_or(PlanError::MissingFrom)?;

        if let Some(join) = &select.join {
            return self.plan_join_select(select, table, join, cancel, errors, handles);
        }

        let source = self.config.lookup(table)?;

        let predicate = select.filter.as_ref().map(|p| self.prepare_predicate(p)).transpose()?;

        // Pushdown is only safe when nothing downstream re-shapes or
        // reorders rows in a way a source-side row cap would corrupt.
        let no_reshaping = select.group_by.is_empty() && select.having.is_none() && select.order_by.is_empty() && select.offset.is_none();
        let pushdown_limit = if no_reshaping { select.limit } else { None };

        let (iter, predicate_pushed) = match source.as_source_planner() {
            Some(planner) => (planner.plan_select(table, predicate.as_ref(), pushdown_limit)?, true),
            None => {
                let scanner = source.as_scanner().ok_or(PlanError::UnsupportedCapability("Scanner".into()))?;
                (scanner.create_iterator(table)?, false)
            }
        };

        let (source_tx, source_rx) = channel();
        handles.push(spawn_task(SourceTask::new(iter, source_tx, cancel.clone()), cancel.clone(), errors.clone()));

        let mut stage_rx = source_rx;

        if let Some(predicate) = predicate {
            if !predicate_pushed {
                let (tx, rx) = channel();
                handles.push(spawn_task(
                    WhereTask::new(predicate, self.now, stage_rx, tx, cancel.clone()),
                    cancel.clone(),
                    errors.clone(),
                ));
                stage_rx = rx;
            }
        }

        let (agg_specs, passthrough_columns) = split_aggregates(&select.columns);
        let grouped = !select.group_by.is_empty() || !agg_specs.is_empty();

        if grouped {
            let (tx, rx) = channel();
            handles.push(spawn_task(
                GroupByTask::new(select.group_by.clone(), agg_specs, self.now, stage_rx, tx, cancel.clone()),
                cancel.clone(),
                errors.clone(),
            ));
            stage_rx = rx;
        }

        if let Some(having) = &select.having {
            let having = self.prepare_predicate(having)?;
            let (tx, rx) = channel();
            handles.push(spawn_task(
                HavingTask::new(having, self.now, stage_rx, tx, cancel.clone()),
                cancel.clone(),
                errors.clone(),
            ));
            stage_rx = rx;
        }

        if !select.order_by.is_empty() {
            let (tx, rx) = channel();
            handles.push(spawn_task(
                OrderByTask::new(select.order_by.clone(), self.now, stage_rx, tx, cancel.clone()),
                cancel.clone(),
                errors.clone(),
            ));
            stage_rx = rx;
        }

        if select.limit.is_some() || select.offset.is_some() {
            let (tx, rx) = channel();
            handles.push(spawn_task(
                LimitTask::new(select.limit, select.offset, stage_rx, tx, cancel.clone()),
                cancel.clone(),
                errors.clone(),
            ));
            stage_rx = rx;
        }

        let projection_columns = if grouped { passthrough_columns } else { select.columns.clone() };
        let (tx, rx) = channel();
        handles.push(spawn_task(
            ProjectionTask::new(projection_columns, self.now, stage_rx, tx, cancel.clone()),
            cancel.clone(),
            errors.clone(),
        ));
        debug!(table, "planned select pipeline");
        Ok(rx)
    }

    /// `[SourceJoin(left, right) -> Projection -> Sink]`. A simplified pipeline
    /// shape: the join's own Where/GroupBy/OrderBy stages are not composed
    /// here (see `DESIGN.md`).
    fn plan_join_select(
        &self,
        select: &SelectStmt,
        left_table: &str,
        join: &crate::parser::JoinClause,
        cancel: &CancellationToken,
        errors: &ErrorSlot,
        handles: &mut Vec<JoinHandle<()>>,
    ) -> Result<crate::exec::MsgReceiver, EngineError> {
        let left_source = self.config.lookup(left_table)?;
        let left_iter = match left_source.as_source_planner() {
            Some(planner) => planner.plan_select(left_table, None, None)?,
            None => left_source.as_scanner().ok_or(PlanError::UnsupportedCapability("Scanner".into()))?.create_iterator(left_table)?,
        };

        let right_source = self.config.lookup(&join.table)?;
        let right_iter = match right_source.as_source_planner() {
            Some(planner) => planner.plan_select(&join.table, None, None)?,
            None => right_source.as_scanner().ok_or(PlanError::UnsupportedCapability("Scanner".into()))?.create_iterator(&join.table)?,
        };

        let (left_tx, left_rx) = channel();
        handles.push(spawn_task(SourceTask::new(left_iter, left_tx, cancel.clone()), cancel.clone(), errors.clone()));
        let (right_tx, right_rx) = channel();
        handles.push(spawn_task(SourceTask::new(right_iter, right_tx, cancel.clone()), cancel.clone(), errors.clone()));

        let left_key = self.prepare_predicate(&join.left_key)?;
        let right_key = self.prepare_predicate(&join.right_key)?;
        let (joined_tx, joined_rx) = channel();
        handles.push(spawn_task(
            SourceJoinTask::new(left_key, right_key, self.now, left_rx, right_rx, joined_tx, cancel.clone()),
            cancel.clone(),
            errors.clone(),
        ));

        let (tx, rx) = channel();
        handles.push(spawn_task(
            ProjectionTask::new(select.columns.clone(), self.now, joined_rx, tx, cancel.clone()),
            cancel.clone(),
            errors.clone(),
        ));
        debug!(left_table, right_table = join.table.as_str(), "planned join pipeline");
        Ok(rx)
    }

    fn plan_insert(
        &self,
        ins: &InsertStmt,
        _is_upsert: bool,
        cancel: &CancellationToken,
        errors: &ErrorSlot,
        handles: &mut Vec<JoinHandle<()>>,
    ) -> Result<crate::exec::MsgReceiver, EngineError> {
        let source = self.config.lookup(&ins.table)?;
        let (tx, rx) = channel();
        let op = MutationOp::Insert { columns: ins.columns.clone(), rows: ins.rows.clone() };
        handles.push(spawn_task(
            UpsertTask::new(source, ins.table.clone(), op, self.now, tx, cancel.clone()),
            cancel.clone(),
            errors.clone(),
        ));
        Ok(rx)
    }

    fn plan_update(
        &self,
        upd: &UpdateStmt,
        cancel: &CancellationToken,
        errors: &ErrorSlot,
        handles: &mut Vec<JoinHandle<()>>,
    ) -> Result<crate::exec::MsgReceiver, EngineError> {
        let source = self.config.lookup(&upd.table)?;
        let (tx, rx) = channel();
        let filter = upd.filter.as_ref().map(|p| self.prepare_predicate(p)).transpose()?;
        let op = MutationOp::Update { assignments: upd.assignments.clone(), filter };
        handles.push(spawn_task(
            UpsertTask::new(source, upd.table.clone(), op, self.now, tx, cancel.clone()),
            cancel.clone(),
            errors.clone(),
        ));
        Ok(rx)
    }

    fn plan_delete(
        &self,
        del: &DeleteStmt,
        cancel: &CancellationToken,
        errors: &ErrorSlot,
        handles: &mut Vec<JoinHandle<()>>,
    ) -> Result<crate::exec::MsgReceiver, EngineError> {
        let source = self.config.lookup(&del.table)?;
        if source.as_conn_deletion().is_none() {
            return Err(PlanError::UnsupportedCapability("ConnDeletion".to_string()).into());
        }
        let (tx, rx) = channel();
        let filter = match &del.filter {
            Some(p) => self.prepare_predicate(p)?,
            None => Node::Literal(Value::Bool(true)),
        };
        handles.push(spawn_task(DeletionTask::new(source, del.table.clone(), filter, tx, cancel.clone()), cancel.clone(), errors.clone()));
        Ok(rx)
    }
}

/// Substitutes every `include NAME` node with the named filter's tree,
/// recursively, raising [`PlanError::UnknownFilter`] for an undefined name
/// and [`PlanError::Other`] for a cycle.
fn resolve_includes(config: &EngineConfig, node: &Node, seen: &mut Vec<String>) -> Result<Node, PlanError> {
    Ok(match node {
        Node::Include(name) => {
            if seen.contains(name) {
                return Err(PlanError::Other(format!("circular filter reference: `{name}`")));
            }
            seen.push(name.clone());
            let target = config.lookup_filter(name)?;
            let resolved = resolve_includes(config, target, seen)?;
            seen.pop();
            resolved
        }
        Node::Identity(_) | Node::Literal(_) | Node::Null => node.clone(),
        Node::Unary(op, inner) => Node::Unary(*op, Box::new(resolve_includes(config, inner, seen)?)),
        Node::Binary(op, l, r) => {
            Node::Binary(*op, Box::new(resolve_includes(config, l, seen)?), Box::new(resolve_includes(config, r, seen)?))
        }
        Node::Tri(a, b, c) => Node::Tri(
            Box::new(resolve_includes(config, a, seen)?),
            Box::new(resolve_includes(config, b, seen)?),
            Box::new(resolve_includes(config, c, seen)?),
        ),
        Node::Func { name, args } => Node::Func {
            name: name.clone(),
            args: args.iter().map(|a| resolve_includes(config, a, seen)).collect::<Result<_, _>>()?,
        },
        Node::Array(items) => Node::Array(items.iter().map(|a| resolve_includes(config, a, seen)).collect::<Result<_, _>>()?),
    })
}

/// Rewrites every relative-time string literal (`"now-1M"`) reachable from
/// `node` into a concrete `Value::Time`, resolved against `now`. A literal
/// that fails to parse as date math is left as a plain string; the VM's
/// `Kind::Time` comparison simply won't match it, same as any other
/// malformed literal.
fn rewrite_date_math(node: &Node, now: DateTime<Utc>) -> Node {
    match node {
        Node::Literal(Value::String(s)) if is_date_math_literal(s) => match resolve_date_math(s, now) {
            Some(t) => Node::Literal(Value::Time(t)),
            None => node.clone(),
        },
        Node::Unary(op, inner) => Node::Unary(*op, Box::new(rewrite_date_math(inner, now))),
        Node::Binary(op, l, r) => Node::Binary(*op, Box::new(rewrite_date_math(l, now)), Box::new(rewrite_date_math(r, now))),
        Node::Tri(a, b, c) => {
            Node::Tri(Box::new(rewrite_date_math(a, now)), Box::new(rewrite_date_math(b, now)), Box::new(rewrite_date_math(c, now)))
        }
        Node::Func { name, args } => Node::Func { name: name.clone(), args: args.iter().map(|a| rewrite_date_math(a, now)).collect() },
        Node::Array(items) => Node::Array(items.iter().map(|a| rewrite_date_math(a, now)).collect()),
        other => other.clone(),
    }
}

/// Splits a SELECT column list into aggregate specs (consumed by
/// `GroupByTask`) and the passthrough columns the final `Projection` stage
/// should evaluate against the grouped row (aggregate columns become a bare
/// identity lookup of their own output name; see `DESIGN.md`).
fn split_aggregates(columns: &[SelectColumn]) -> (Vec<AggSpec>, Vec<SelectColumn>) {
    let mut specs = Vec::new();
    let mut passthrough = Vec::new();
    for col in columns {
        if let Node::Func { name, args } = &col.expr {
            if let Some(kind) = AggKind::from_name(name) {
                let output_name = col.output_name();
                let arg = args.first().cloned().filter(|a| !matches!(a, Node::Identity(n) if n == "*"));
                specs.push(AggSpec { output_name: output_name.clone(), kind, arg });
                passthrough.push(SelectColumn { expr: Node::Identity(output_name), alias: col.alias.clone() });
                continue;
            }
        }
        passthrough.push(col.clone());
    }
    (specs, passthrough)
}
