//! Persistence layer
//!
//! SQLite-based storage for:
//! - Agent execution records (append-only)

mod database;
pub mod executions;

pub use database::{Database, SharedDatabase};
pub use executions::{
    ExecutionLogStore, ExecutionRecord, LogFilter, LogPage, NewExecution, DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE,
};
