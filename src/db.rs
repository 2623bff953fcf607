//! Database capability: `execute(sql) -> rows, timing, explain`. One
//! trait stands in for thin per-engine client wrappers, shared by the
//! sample store and the full target store — no concrete driver for
//! DuckDB or PostgreSQL ships here; a driver is an external collaborator
//! that the invoker supplies.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub row_count: usize,
    pub timing_ms: f64,
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("statement timed out after {0:?}")]
    Timeout(Duration),
}

/// `connect(dsn) -> Handle`; `Handle.execute/explain/cost`.
/// A single trait stands in for both the sample store and the full
/// target store — callers construct distinct handles for each and share
/// or isolate them as the caller's concurrency model requires.
#[async_trait]
pub trait DbCapability: Send + Sync {
    async fn execute(&self, sql: &str, timeout: Duration) -> Result<ExecResult, DbError>;
    async fn explain(&self, sql: &str) -> Result<String, DbError>;
    /// Best-effort plan cost; `None` when the engine can't or won't
    /// estimate it.
    async fn cost(&self, sql: &str) -> Option<f64>;
}
