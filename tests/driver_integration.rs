//! End-to-end driver scenarios: assemble -> generate -> validate -> benchmark
//! -> record, exercised through the public driver API with scripted LLM and
//! database fakes standing in for a real provider and engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use querytorque::benchmark::Protocol;
use querytorque::blackboard::OutcomeStatus;
use querytorque::db::{DbCapability, DbError, ExecResult};
use querytorque::driver::{self, DriverConfig, DriverInputs};
use querytorque::features::extractor::SqlDialect;
use querytorque::llm::LlmClient;
use querytorque::prompt::PromptConstraints;
use querytorque::testing::fake_db::{FakeDb, FakeTimingDb};
use querytorque::testing::fake_llm::{FailingLlm, ScriptedLlm};
use querytorque::validator::ValidationStatus;

/// A sample-store fake whose result depends on the SQL text, so a rewrite
/// can be made to mismatch or match the original on purpose.
struct ScriptedSampleDb;

#[async_trait]
impl DbCapability for ScriptedSampleDb {
    async fn execute(&self, sql: &str, _timeout: Duration) -> Result<ExecResult, DbError> {
        let rows = if sql.contains("bad_rewrite") {
            vec![vec!["9".to_string()], vec!["8".to_string()]]
        } else {
            vec![vec!["1".to_string()], vec!["2".to_string()]]
        };
        let row_count = rows.len();
        Ok(ExecResult { columns: vec!["a".into()], rows, row_count, timing_ms: 1.0 })
    }

    async fn explain(&self, _sql: &str) -> Result<String, DbError> {
        Ok("fake plan".to_string())
    }

    async fn cost(&self, _sql: &str) -> Option<f64> {
        None
    }
}

fn base_inputs<'a>(
    original_sql: &str,
    sample_db: &'a dyn DbCapability,
    full_db: &'a dyn DbCapability,
) -> DriverInputs<'a> {
    DriverInputs {
        query_id: "q1".into(),
        engine: "duckdb".into(),
        benchmark: "adhoc".into(),
        original_sql: original_sql.to_string(),
        profile_md: "- Engine: duckdb\n- Version: 1\n- Benchmark source: tpc-ds\n".into(),
        profile_version: "1".into(),
        rules: &[],
        corpus: &[],
        constraints: PromptConstraints::default(),
        dialect: SqlDialect::DuckDb,
        sample_db,
        full_db,
    }
}

#[tokio::test]
async fn retry_mode_records_checksum_mismatch_then_succeeds() {
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::new(vec![
        r#"{"rewrite_sets": [{"id": "r1", "nodes": {"main": "SELECT a FROM bad_rewrite"}}]}"#
            .to_string(),
        r#"{"rewrite_sets": [{"id": "r2", "nodes": {"main": "SELECT a FROM good_rewrite"}}]}"#
            .to_string(),
    ]));
    let sample_db = ScriptedSampleDb;
    let full_db = FakeTimingDb::new(vec![100.0, 90.0, 110.0, 50.0, 45.0, 55.0]);
    let inputs = base_inputs("SELECT a FROM t", &sample_db, &full_db);
    let config = DriverConfig { protocol: Protocol::ThreeRun, retry_budget: 1, ..DriverConfig::default() };

    let outcome = driver::run_retry(&inputs, &config, llm).await.unwrap();

    assert_eq!(outcome.recorded.len(), 2, "first attempt fails, second is recorded too");
    assert_eq!(outcome.recorded[0].outcome.validation, ValidationStatus::ChecksumMismatch);
    assert_eq!(outcome.recorded[0].outcome.status, OutcomeStatus::Error);
    assert_eq!(outcome.recorded[1].outcome.validation, ValidationStatus::Pass);

    let winner = outcome.winner.expect("second attempt should win");
    assert_eq!(winner.opt.optimized_sql, "SELECT a FROM good_rewrite");
    assert!(winner.outcome.speedup > 1.0);
}

#[tokio::test]
async fn retry_mode_exhausts_budget_without_a_winner() {
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::new(vec![
        r#"{"rewrite_sets": [{"id": "r1", "nodes": {"main": "SELECT a FROM bad_rewrite"}}]}"#
            .to_string(),
    ]));
    let sample_db = ScriptedSampleDb;
    let full_db = FakeDb::with_fixed_result(vec![], vec![]);
    let inputs = base_inputs("SELECT a FROM t", &sample_db, &full_db);
    let config = DriverConfig { protocol: Protocol::ThreeRun, retry_budget: 2, ..DriverConfig::default() };

    let outcome = driver::run_retry(&inputs, &config, llm).await.unwrap();

    assert_eq!(outcome.recorded.len(), 3, "initial attempt plus two retries, all mismatched");
    assert!(outcome.winner.is_none());
    assert!(driver::has_no_valid_candidate(&outcome));
}

#[tokio::test]
async fn parallel_mode_stops_at_first_winner_and_skips_failed_workers() {
    let llms: Vec<Arc<dyn LlmClient>> = vec![
        Arc::new(ScriptedLlm::new(vec![
            r#"{"rewrite_sets": [{"id": "r1", "nodes": {"main": "SELECT a FROM t"}}]}"#.to_string(),
        ])),
        Arc::new(FailingLlm),
    ];
    let sample_db = FakeDb::with_fixed_result(vec!["a".into()], vec![vec!["1".into()]]);
    let full_db = FakeTimingDb::new(vec![100.0, 90.0, 110.0, 50.0, 45.0, 55.0]);
    let inputs = base_inputs("SELECT a FROM t", &sample_db, &full_db);
    let config = DriverConfig {
        protocol: Protocol::ThreeRun,
        target_speedup: 1.5,
        benchmark_all: false,
        ..DriverConfig::default()
    };

    let outcome = driver::run_parallel(&inputs, &config, llms).await.unwrap();

    assert_eq!(outcome.recorded.len(), 1, "the failing worker never produces a recorded attempt");
    assert!(outcome.winner.is_some());
}

#[tokio::test]
async fn parallel_mode_benchmark_all_records_every_passing_worker() {
    let llms: Vec<Arc<dyn LlmClient>> = vec![
        Arc::new(ScriptedLlm::new(vec![
            r#"{"rewrite_sets": [{"id": "r1", "nodes": {"main": "SELECT a FROM t"}}]}"#.to_string(),
        ])),
        Arc::new(ScriptedLlm::new(vec![
            r#"{"rewrite_sets": [{"id": "r2", "nodes": {"main": "SELECT a FROM t2"}}]}"#.to_string(),
        ])),
    ];
    let sample_db = FakeDb::with_fixed_result(vec!["a".into()], vec![vec!["1".into()]]);
    let full_db = FakeTimingDb::new(vec![
        100.0, 90.0, 110.0, 50.0, 45.0, 55.0, 100.0, 90.0, 110.0, 50.0, 45.0, 55.0,
    ]);
    let inputs = base_inputs("SELECT a FROM t", &sample_db, &full_db);
    let config = DriverConfig {
        protocol: Protocol::ThreeRun,
        target_speedup: 1.5,
        benchmark_all: true,
        ..DriverConfig::default()
    };

    let outcome = driver::run_parallel(&inputs, &config, llms).await.unwrap();

    assert_eq!(outcome.recorded.len(), 2, "benchmark_all keeps running after the first winner");
    assert!(outcome.winner.is_some());
}
