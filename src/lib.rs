//! A pluggable SQL-like query engine: lexer, parser, VM, and task-DAG
//! executor over any datasource that implements the capability traits in
//! [`datasource`].
//!
//! The top-level flow is `parse -> plan -> execute`: [`parser`] turns SQL or
//! FilterQL text into a [`parser::Statement`], [`planner`] turns a statement
//! plus an [`planner::EngineConfig`] into a running [`planner::Plan`], and
//! [`driver`] exposes that flow as a small synchronous-feeling facade.

pub mod ast;
pub mod context;
pub mod datasource;
pub mod driver;
pub mod error;
pub mod exec;
pub mod lexer;
pub mod parser;
pub mod planner;
pub mod value;
pub mod vm;

pub use driver::{Connection, Cursor, Engine};
pub use error::EngineError;
pub use planner::EngineConfig;
pub use value::Value;
