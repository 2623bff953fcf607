//! Append-only blackboard under real concurrent writers, and the
//! persist -> derive round trip a human review pass would run.

use std::path::Path;

use chrono::Utc;

use querytorque::blackboard::{self, Base, BlackboardEntry, Opt, Outcome, OutcomeStatus, Principle, Version};
use querytorque::derivation;
use querytorque::driver::{DriverOutcome, persist};
use querytorque::validator::ValidationStatus;

fn entry(query_id: &str, gap: &str, transform: &str, speedup: f64, status: OutcomeStatus) -> BlackboardEntry {
    BlackboardEntry {
        id: BlackboardEntry::new_id(),
        base: Base {
            query_id: query_id.to_string(),
            engine: "duckdb".into(),
            benchmark: "tpcds".into(),
            original_sql: "SELECT 1".into(),
            fingerprint: "f".into(),
            timestamp: Utc::now(),
        },
        opt: Opt {
            approach: "parallel".into(),
            worker_id: 0,
            strategy: Some(transform.to_string()),
            optimized_sql: "SELECT 2".into(),
            examples_used: vec![],
            engine_profile_version: "v1".into(),
        },
        principle: Some(Principle {
            what: "w".into(),
            why: "w".into(),
            mechanism: "m".into(),
            gap_exploited: Some(gap.to_string()),
            evidence: "e".into(),
            confidence: "high".into(),
        }),
        semantics: Default::default(),
        config: None,
        scanner_finding: None,
        outcome: Outcome {
            status,
            speedup,
            speedup_type: "full_store".into(),
            original_ms: 100.0,
            optimized_ms: 100.0 / speedup,
            validation: ValidationStatus::Pass,
        },
        tags: vec![],
        provenance: None,
        version: Version::default(),
    }
}

#[tokio::test]
async fn concurrent_appends_from_many_tasks_all_parse_back() {
    let dir = tempfile::tempdir().unwrap();
    let dir_path: &'static Path = &*Box::leak(dir.path().to_path_buf().into_boxed_path());

    let mut handles = Vec::new();
    for i in 0..20 {
        handles.push(tokio::spawn(async move {
            let e = entry(&format!("q{i}"), "GAP_A", "decorrelate", 1.2, OutcomeStatus::Win);
            blackboard::append(dir_path, &e).unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let entries = blackboard::read_all(dir_path, "duckdb", "tpcds").unwrap();
    assert_eq!(entries.len(), 20);
    let mut ids: Vec<&str> = entries.iter().map(|e| e.base.query_id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 20, "every concurrent writer's line survived intact");
}

#[tokio::test]
async fn persist_then_derive_groups_by_exploited_gap() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = DriverOutcome {
        recorded: vec![
            entry("q1", "GAP_A", "decorrelate", 1.3, OutcomeStatus::Win),
            entry("q2", "GAP_A", "decorrelate", 0.9, OutcomeStatus::Regression),
            entry("q3", "GAP_B", "filter_pushdown", 1.2, OutcomeStatus::Win),
        ],
        winner: None,
    };

    persist(dir.path(), &outcome);

    let summary = derivation::derive(dir.path(), "duckdb").unwrap();
    assert_eq!(summary.gaps.len(), 2);
    let gap_a = summary.gaps.iter().find(|g| g.gap_id == "GAP_A").unwrap();
    assert_eq!(gap_a.wins.len(), 1);
    assert_eq!(gap_a.regressions.len(), 1);
    let gap_b = summary.gaps.iter().find(|g| g.gap_id == "GAP_B").unwrap();
    assert_eq!(gap_b.wins.len(), 1);
}
