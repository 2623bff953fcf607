//! File-backed `DbCapability`: reads one canned result from a JSON file
//! and returns it for every `execute()` call. No concrete network or
//! database driver ships in this crate; this is what the bundled `cli`
//! binary wires in for `--sample-db`/`--full-db` paths so the binary runs
//! end to end without one. Real integrations should implement
//! `DbCapability` against an actual engine client instead.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::db::{DbCapability, DbError, ExecResult};

#[derive(Debug, Deserialize)]
struct FixtureFile {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<String>>,
    #[serde(default)]
    timing_ms: f64,
    #[serde(default)]
    explain: Option<String>,
    #[serde(default)]
    cost: Option<f64>,
}

pub struct FixtureDb {
    result: ExecResult,
    explain: String,
    cost: Option<f64>,
}

impl FixtureDb {
    pub fn load(path: &Path) -> Result<Self, DbError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DbError::Connection(format!("{}: {e}", path.display())))?;
        let fixture: FixtureFile = serde_json::from_str(&text)
            .map_err(|e| DbError::Connection(format!("invalid fixture json: {e}")))?;
        let row_count = fixture.rows.len();
        Ok(Self {
            result: ExecResult {
                columns: fixture.columns,
                rows: fixture.rows,
                row_count,
                timing_ms: fixture.timing_ms,
            },
            explain: fixture.explain.unwrap_or_default(),
            cost: fixture.cost,
        })
    }
}

#[async_trait]
impl DbCapability for FixtureDb {
    async fn execute(&self, _sql: &str, _timeout: Duration) -> Result<ExecResult, DbError> {
        Ok(self.result.clone())
    }

    async fn explain(&self, _sql: &str) -> Result<String, DbError> {
        Ok(self.explain.clone())
    }

    async fn cost(&self, _sql: &str) -> Option<f64> {
        self.cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_and_replays_fixture_for_every_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        std::fs::write(
            &path,
            r#"{"columns": ["a"], "rows": [["1"]], "timing_ms": 12.5}"#,
        )
        .unwrap();

        let db = FixtureDb::load(&path).unwrap();
        let first = db.execute("SELECT 1", Duration::from_secs(1)).await.unwrap();
        let second = db.execute("SELECT 2", Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.row_count, 1);
        assert_eq!(second.timing_ms, 12.5);
    }

    #[test]
    fn missing_file_is_a_connection_error() {
        let err = FixtureDb::load(Path::new("/nonexistent/sample.json")).unwrap_err();
        assert!(matches!(err, DbError::Connection(_)));
    }
}
