//! Fake `DbCapability` implementations for tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::db::{DbCapability, DbError, ExecResult};

/// Always returns the same columns/rows regardless of the SQL text.
/// Used to exercise equivalence-checking logic (row count, checksum)
/// without a real engine.
pub struct FakeDb {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl FakeDb {
    pub fn with_fixed_result(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }
}

#[async_trait]
impl DbCapability for FakeDb {
    async fn execute(&self, _sql: &str, _timeout: Duration) -> Result<ExecResult, DbError> {
        Ok(ExecResult {
            columns: self.columns.clone(),
            rows: self.rows.clone(),
            row_count: self.rows.len(),
            timing_ms: 1.0,
        })
    }

    async fn explain(&self, _sql: &str) -> Result<String, DbError> {
        Ok("fake plan".to_string())
    }

    async fn cost(&self, _sql: &str) -> Option<f64> {
        None
    }
}

/// Returns a caller-supplied sequence of `timing_ms` values, one per
/// `execute` call, in order. Panics if more calls are made than values
/// were supplied — that indicates a protocol implementation issuing an
/// unexpected number of executions.
pub struct FakeTimingDb {
    timings: Mutex<std::collections::VecDeque<f64>>,
}

impl FakeTimingDb {
    pub fn new(timings: Vec<f64>) -> Self {
        Self { timings: Mutex::new(timings.into()) }
    }
}

#[async_trait]
impl DbCapability for FakeTimingDb {
    async fn execute(&self, _sql: &str, _timeout: Duration) -> Result<ExecResult, DbError> {
        let timing_ms = self
            .timings
            .lock()
            .unwrap()
            .pop_front()
            .expect("FakeTimingDb: more execute() calls than supplied timings");
        Ok(ExecResult { columns: vec![], rows: vec![], row_count: 0, timing_ms })
    }

    async fn explain(&self, _sql: &str) -> Result<String, DbError> {
        Ok("fake plan".to_string())
    }

    async fn cost(&self, _sql: &str) -> Option<f64> {
        None
    }
}
