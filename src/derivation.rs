//! Profile Derivation: aggregates blackboard entries into a human-review
//! report grouped by exploited gap. Never edits the engine profile
//! itself — a human reads the summary and decides what to change.

use std::path::Path;

use serde::Serialize;

use crate::blackboard::{self, BlackboardEntry, OutcomeStatus};
use crate::errors::OptimizerResult;

#[derive(Debug, Clone, Serialize)]
pub struct TransformSummary {
    pub transform: String,
    pub median_speedup: f64,
    pub win_count: usize,
    pub neutral_count: usize,
    pub regression_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GapSummary {
    pub gap_id: String,
    pub wins: Vec<String>,
    pub neutrals: Vec<String>,
    pub regressions: Vec<String>,
    pub transforms: Vec<TransformSummary>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DerivedSummary {
    pub engine: String,
    pub gaps: Vec<GapSummary>,
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 { (values[mid - 1] + values[mid]) / 2.0 } else { values[mid] }
}

/// `derive(engine) -> DerivedSummary`. Reads every blackboard file whose
/// filename starts with `{engine}_`, groups entries by
/// `principle.gap_exploited`, and within each gap partitions entries into
/// wins/neutrals/regressions and computes a median speedup per transform.
pub fn derive(blackboard_dir: &Path, engine: &str) -> OptimizerResult<DerivedSummary> {
    let mut entries = Vec::new();
    for (e, benchmark) in blackboard::list_logs(blackboard_dir)? {
        if e != engine {
            continue;
        }
        entries.extend(blackboard::read_all(blackboard_dir, &e, &benchmark)?);
    }

    Ok(derive_from_entries(engine, &entries))
}

fn derive_from_entries(engine: &str, entries: &[BlackboardEntry]) -> DerivedSummary {
    let mut by_gap: std::collections::BTreeMap<String, Vec<&BlackboardEntry>> =
        std::collections::BTreeMap::new();

    for entry in entries {
        let Some(principle) = &entry.principle else { continue };
        let Some(gap_id) = &principle.gap_exploited else { continue };
        by_gap.entry(gap_id.clone()).or_default().push(entry);
    }

    let gaps = by_gap
        .into_iter()
        .map(|(gap_id, entries)| summarize_gap(gap_id, &entries))
        .collect();

    DerivedSummary { engine: engine.to_string(), gaps }
}

fn summarize_gap(gap_id: String, entries: &[&BlackboardEntry]) -> GapSummary {
    let mut wins = Vec::new();
    let mut neutrals = Vec::new();
    let mut regressions = Vec::new();

    for e in entries {
        match e.outcome.status {
            OutcomeStatus::Win | OutcomeStatus::Improved => wins.push(e.base.query_id.clone()),
            OutcomeStatus::Neutral => neutrals.push(e.base.query_id.clone()),
            OutcomeStatus::Regression => regressions.push(e.base.query_id.clone()),
            OutcomeStatus::Error | OutcomeStatus::Cancelled => {}
        }
    }

    let mut by_transform: std::collections::BTreeMap<String, Vec<f64>> =
        std::collections::BTreeMap::new();
    let mut counts: std::collections::BTreeMap<String, (usize, usize, usize)> =
        std::collections::BTreeMap::new();

    for e in entries {
        let transform = e.opt.strategy.clone().unwrap_or_else(|| "unknown".to_string());
        by_transform.entry(transform.clone()).or_default().push(e.outcome.speedup);
        let counter = counts.entry(transform).or_insert((0, 0, 0));
        match e.outcome.status {
            OutcomeStatus::Win | OutcomeStatus::Improved => counter.0 += 1,
            OutcomeStatus::Neutral => counter.1 += 1,
            OutcomeStatus::Regression => counter.2 += 1,
            OutcomeStatus::Error | OutcomeStatus::Cancelled => {}
        }
    }

    let transforms = by_transform
        .into_iter()
        .map(|(transform, speedups)| {
            let (win_count, neutral_count, regression_count) =
                counts.get(&transform).copied().unwrap_or((0, 0, 0));
            TransformSummary {
                median_speedup: median(speedups),
                transform,
                win_count,
                neutral_count,
                regression_count,
            }
        })
        .collect();

    GapSummary { gap_id, wins, neutrals, regressions, transforms }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(gap: &str, transform: &str, speedup: f64, status: OutcomeStatus) -> BlackboardEntry {
        BlackboardEntry {
            id: BlackboardEntry::new_id(),
            base: crate::blackboard::Base {
                query_id: format!("q-{transform}-{speedup}"),
                engine: "duckdb".into(),
                benchmark: "tpcds".into(),
                original_sql: "SELECT 1".into(),
                fingerprint: "f".into(),
                timestamp: Utc::now(),
            },
            opt: crate::blackboard::Opt {
                approach: "parallel".into(),
                worker_id: 0,
                strategy: Some(transform.to_string()),
                optimized_sql: "SELECT 1".into(),
                examples_used: vec![],
                engine_profile_version: "v1".into(),
            },
            principle: Some(crate::blackboard::Principle {
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
            outcome: crate::blackboard::Outcome {
                status,
                speedup,
                speedup_type: "full_store".into(),
                original_ms: 100.0,
                optimized_ms: 100.0 / speedup,
                validation: crate::validator::ValidationStatus::Pass,
            },
            tags: vec![],
            provenance: None,
            version: Default::default(),
        }
    }

    #[test]
    fn groups_by_gap_and_computes_median_speedup() {
        let entries = vec![
            entry("CORRELATED_SUBQUERY_PARALYSIS", "decorrelate", 1.2, OutcomeStatus::Win),
            entry("CORRELATED_SUBQUERY_PARALYSIS", "decorrelate", 1.4, OutcomeStatus::Win),
            entry("CORRELATED_SUBQUERY_PARALYSIS", "decorrelate", 0.9, OutcomeStatus::Regression),
        ];
        let summary = derive_from_entries("duckdb", &entries);
        assert_eq!(summary.gaps.len(), 1);
        let gap = &summary.gaps[0];
        assert_eq!(gap.gap_id, "CORRELATED_SUBQUERY_PARALYSIS");
        assert_eq!(gap.wins.len(), 2);
        assert_eq!(gap.regressions.len(), 1);
        assert_eq!(gap.transforms.len(), 1);
        assert_eq!(gap.transforms[0].median_speedup, 1.2);
    }

    #[test]
    fn entries_without_principle_are_ignored() {
        let mut e = entry("X", "y", 1.2, OutcomeStatus::Win);
        e.principle = None;
        let summary = derive_from_entries("duckdb", &[e]);
        assert!(summary.gaps.is_empty());
    }
}
