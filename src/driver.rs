//! Driver facade: the seam between an outer host and the
//! parse/plan/execute pipeline, the same seam `execute_sql`/`execute_sql_tx`
//! occupy between an outer host and the VM.
//!
//! The concrete wiring a real frontend (a connection pool, a wire protocol)
//! would add is out of scope; this module specifies the Rust shape precisely
//! enough to compile and drive end to end against [`crate::datasource::memory::MemoryStore`]
//! or any other [`crate::datasource::Source`].

use crate::datasource::Message;
use crate::error::{EngineError, ExecError};
use crate::parser::sql::SqlParser;
use crate::planner::{EngineConfig, Planner};
use crate::value::Value;
use chrono::Utc;

/// Opaque connection string, carried on the runtime config the way a
/// connection pool threads a DSN through its setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnInfo(pub String);

impl ConnInfo {
    pub fn new(s: impl Into<String>) -> Self {
        ConnInfo(s.into())
    }
}

/// A live query result: the sink's collected rows exposed as a forward-only
/// cursor.
pub struct Cursor {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Message>,
}

impl Cursor {
    fn new(columns: Vec<String>, rows: Vec<Message>) -> Self {
        Cursor { columns, rows: rows.into_iter() }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn next_row(&mut self) -> Option<Message> {
        self.rows.next()
    }

    pub fn close(self) {}
}

/// `Open(connInfo) -> Connection`, `Query`/`Exec`/`begin`.
pub trait Connection: Send + Sync {
    fn query(&self, sql: &str, args: &[Value]) -> Result<Cursor, EngineError>;
    fn exec(&self, sql: &str, args: &[Value]) -> Result<usize, EngineError>;
    fn begin(&self) -> Result<(), EngineError> {
        Err(EngineError::NotImplemented("transactions"))
    }
}

/// The engine's `Connection` implementation: a table of open datasources
/// plus the connection string they were opened with.
pub struct Engine {
    conn_info: ConnInfo,
    config: EngineConfig,
}

impl Engine {
    pub fn open(conn_info: ConnInfo, config: EngineConfig) -> Self {
        Engine { conn_info, config }
    }

    pub fn conn_info(&self) -> &ConnInfo {
        &self.conn_info
    }

    /// Runs `sql`/FilterQL text end to end: parse, plan, execute, collect.
    /// `args` substitute `?` placeholders positionally before parsing.
    pub async fn run(&self, sql: &str, args: &[Value]) -> Result<Cursor, EngineError> {
        let substituted = substitute_placeholders(sql, args);
        let stmt = SqlParser::parse(&substituted)?;
        let planner = Planner::new(&self.config, Utc::now());
        let plan = planner.plan(&stmt)?;

        crate::exec::join_all(plan.task_handles).await?;
        let sink = plan.sink_handle.await.map_err(|e| ExecError::Internal(format!("sink task panicked: {e}")))?;
        if let Some(err) = plan.errors.take() {
            return Err(clone_engine_error(err));
        }

        let columns = sink.columns();
        Ok(Cursor::new(columns, sink.into_rows()))
    }
}

impl Connection for Engine {
    fn query(&self, sql: &str, args: &[Value]) -> Result<Cursor, EngineError> {
        let rt = tokio::runtime::Handle::try_current()
.map_err(|_| EngineError::NotImplemented("query() requires a tokio runtime; use Engine::run from async context"))?;
        tokio::task::block_in_place(|| rt.block_on(self.run(sql, args)))
    }

    fn exec(&self, sql: &str, args: &[Value]) -> Result<usize, EngineError> {
        let mut cursor = self.query(sql, args)?;
        match cursor.next_row() {
            Some(msg) => match msg.get("affected") {
                Some(Value::Int(n)) => Ok(*n as usize),
                _ => Ok(0),
            },
            None => Ok(0),
        }
    }
}

/// Substitutes positional `?` placeholders with literal SQL text: `NULL` for `Value::Nil`, quoted+escaped for strings, decimal
/// for ints, scientific for floats, `1|0` for bools, and the MySQL-compatible
/// `2006-01-02 15:04:05.000000000` format for times.
fn substitute_placeholders(sql: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut arg_iter = args.iter();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '?' {
            if let Some(value) = arg_iter.next() {
                out.push_str(&render_literal(value));
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn render_literal(value: &Value) -> String {
    match value {
        Value::Nil => "NULL".to_string(),
        Value::Bool(b) => if *b { "1".to_string() } else { "0".to_string() },
        Value::Int(n) => n.to_string(),
        Value::Number(f) => format!("{f:e}"),
        Value::Time(t) => format!("'{}'", t.format("%Y-%m-%d %H:%M:%S%.9f")),
        other => format!("'{}'", crate::value::coerce::to_string_value(other).replace('\'', "\\'")),
    }
}

/// `EngineError` is not `Clone` (it wraps `anyhow::Error`); the `ErrorSlot`
/// only exposes a shared reference, so a query-level error is re-rendered as
/// an `ExecError::Internal` rather than moved out.
fn clone_engine_error(err: &EngineError) -> EngineError {
    ExecError::Internal(err.to_string()).into()
}
