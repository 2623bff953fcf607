//! Blackboard: an append-only, newline-delimited JSON outcome log per
//! (engine, benchmark) pair. `append` schema-validates and writes one
//! record; readers stream the file line by line. No in-place edits, no
//! deletions — a re-run of an attempt points back via
//! `version.superseded_by` instead of overwriting.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{OptimizerError, OptimizerResult};

pub const SCHEMA_VERSION: &str = "2.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeStatus {
    Win,
    Improved,
    Neutral,
    Regression,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Base {
    pub query_id: String,
    pub engine: String,
    pub benchmark: String,
    pub original_sql: String,
    pub fingerprint: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opt {
    pub approach: String,
    pub worker_id: usize,
    pub strategy: Option<String>,
    pub optimized_sql: String,
    pub examples_used: Vec<String>,
    pub engine_profile_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principle {
    pub what: String,
    pub why: String,
    pub mechanism: String,
    pub gap_exploited: Option<String>,
    pub evidence: String,
    pub confidence: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Semantics {
    #[serde(default)]
    pub business_intent: Option<String>,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub join_pattern: Option<String>,
    #[serde(default)]
    pub aggregation_type: Option<String>,
    #[serde(default)]
    pub selectivity: Option<f64>,
    #[serde(default)]
    pub archetype: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub settings: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub impact: Option<String>,
}

/// PostgreSQL-only planner-flag experiment record; production pipeline is
/// outside this core, this is the storage shape only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerFinding {
    pub flag: String,
    pub value: String,
    pub observation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub speedup: f64,
    pub speedup_type: String,
    pub original_ms: f64,
    pub optimized_ms: f64,
    pub validation: crate::validator::ValidationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub schema_version: String,
    #[serde(default)]
    pub superseded_by: Option<String>,
}

impl Default for Version {
    fn default() -> Self {
        Self { schema_version: SCHEMA_VERSION.to_string(), superseded_by: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackboardEntry {
    pub id: String,
    pub base: Base,
    pub opt: Opt,
    pub principle: Option<Principle>,
    #[serde(default)]
    pub semantics: Semantics,
    #[serde(default)]
    pub config: Option<EngineConfig>,
    #[serde(default)]
    pub scanner_finding: Option<ScannerFinding>,
    pub outcome: Outcome,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub provenance: Option<String>,
    #[serde(default)]
    pub version: Version,
}

impl BlackboardEntry {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

pub fn status_for_speedup(speedup: f64) -> OutcomeStatus {
    match crate::benchmark::status_for_speedup(speedup) {
        crate::benchmark::OutcomeStatus::Win => OutcomeStatus::Win,
        crate::benchmark::OutcomeStatus::Improved => OutcomeStatus::Improved,
        crate::benchmark::OutcomeStatus::Neutral => OutcomeStatus::Neutral,
        crate::benchmark::OutcomeStatus::Regression => OutcomeStatus::Regression,
    }
}

fn file_path(dir: &Path, engine: &str, benchmark: &str) -> PathBuf {
    dir.join(format!("{engine}_{benchmark}.jsonl"))
}

/// Validates `entry.outcome.status` agrees with the measured speedup band
/// and that `version.schema_version` is set.
fn validate_entry(entry: &BlackboardEntry) -> OptimizerResult<()> {
    if entry.version.schema_version.is_empty() {
        return Err(OptimizerError::BlackboardWriteError("missing schema_version".to_string()));
    }
    if !matches!(entry.outcome.status, OutcomeStatus::Error | OutcomeStatus::Cancelled) {
        let expected = status_for_speedup(entry.outcome.speedup);
        if expected != entry.outcome.status {
            return Err(OptimizerError::BlackboardWriteError(format!(
                "outcome.status {:?} disagrees with measured speedup {} (expected {:?})",
                entry.outcome.status, entry.outcome.speedup, expected
            )));
        }
    }
    Ok(())
}

/// Schema-validates and appends one record to
/// `{dir}/{engine}_{benchmark}.jsonl`. Uses a single `write_all` of a
/// newline-terminated line opened in append mode so concurrent writers
/// never interleave partial lines.
pub fn append(dir: &Path, entry: &BlackboardEntry) -> OptimizerResult<()> {
    validate_entry(entry)?;

    std::fs::create_dir_all(dir)?;
    let path = file_path(dir, &entry.base.engine, &entry.base.benchmark);

    let mut line = serde_json::to_string(entry)?;
    line.push('\n');

    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Streams every entry in `{dir}/{engine}_{benchmark}.jsonl`. Missing
/// files read as empty.
pub fn read_all(dir: &Path, engine: &str, benchmark: &str) -> OptimizerResult<Vec<BlackboardEntry>> {
    let path = file_path(dir, engine, benchmark);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(&path)?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}

/// All engine/benchmark pairs with at least one blackboard file under
/// `dir`, derived from the `{engine}_{benchmark}.jsonl` filenames.
pub fn list_logs(dir: &Path) -> OptimizerResult<Vec<(String, String)>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(stem) = name.strip_suffix(".jsonl") else { continue };
        if let Some((engine, benchmark)) = stem.split_once('_') {
            out.push((engine.to_string(), benchmark.to_string()));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(speedup: f64, status: OutcomeStatus) -> BlackboardEntry {
        BlackboardEntry {
            id: BlackboardEntry::new_id(),
            base: Base {
                query_id: "q1".into(),
                engine: "duckdb".into(),
                benchmark: "tpcds".into(),
                original_sql: "SELECT 1".into(),
                fingerprint: "abc123".into(),
                timestamp: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            },
            opt: Opt {
                approach: "parallel".into(),
                worker_id: 0,
                strategy: Some("filter_pushdown".into()),
                optimized_sql: "SELECT 1".into(),
                examples_used: vec![],
                engine_profile_version: "v1".into(),
            },
            principle: None,
            semantics: Semantics::default(),
            config: None,
            scanner_finding: None,
            outcome: Outcome {
                status,
                speedup,
                speedup_type: "full_store".into(),
                original_ms: 100.0,
                optimized_ms: 100.0 / speedup,
                validation: crate::validator::ValidationStatus::Pass,
            },
            tags: vec![],
            provenance: None,
            version: Version::default(),
        }
    }

    #[test]
    fn rejects_status_disagreeing_with_speedup() {
        let dir = tempfile::tempdir().unwrap();
        let entry = sample_entry(1.5, OutcomeStatus::Neutral);
        let err = append(dir.path(), &entry).unwrap_err();
        assert!(matches!(err, OptimizerError::BlackboardWriteError(_)));
    }

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let entry = sample_entry(1.2, OutcomeStatus::Win);
        append(dir.path(), &entry).unwrap();
        let entries = read_all(dir.path(), "duckdb", "tpcds").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, entry.id);
    }

    #[test]
    fn every_line_parses_after_concurrent_style_appends() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..20 {
            let entry = sample_entry(1.2, OutcomeStatus::Win);
            append(dir.path(), &entry).unwrap();
            let _ = i;
        }
        let entries = read_all(dir.path(), "duckdb", "tpcds").unwrap();
        assert_eq!(entries.len(), 20);
    }
}
