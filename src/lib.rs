//! An embeddable SQL engine.
//!
//! Statements run either against a standalone in-memory [Database] or through
//! a [DatabaseManager], which adds named databases persisted to disk.

pub mod ast;
pub mod codec;
pub mod column;
pub mod config;
pub mod data_type;
pub mod database;
pub mod error;
mod eval;
pub mod executor;
mod functions;
pub mod manager;
pub mod parser;
pub mod sequence;
pub mod table;
pub mod tokenizer;
pub mod value;

pub use column::Column;
pub use config::ManagerConfig;
pub use data_type::DataType;
pub use database::Database;
pub use error::{Error, Result};
pub use executor::{Outcome, QueryResult};
pub use manager::DatabaseManager;
pub use table::{ColumnDef, Schema, Table};
pub use value::Value;
