//! Example Corpus & Scorer.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::OptimizerResult;
use crate::features::{complexity_str, FeatureVector};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub what: String,
    pub why: String,
    pub when: String,
    pub when_not: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasuredOutcome {
    pub speedup: f64,
    pub confidence: String,
}

/// A hand-curated before/after pair proving an optimization pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldExample {
    pub id: String,
    pub original_sql: String,
    pub rewritten_sql: String,
    pub explanation: Explanation,
    pub dialect: String,
    pub precomputed_features: FeatureVector,
    pub demonstrates_gaps: Vec<String>,
    pub archetype: String,
    pub complexity: String,
    pub outcome: MeasuredOutcome,
}

/// Default top-K examples returned by `score` — four parallel workers
/// times three examples each.
pub const DEFAULT_TOP_K: usize = 12;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredExample {
    pub score: f64,
    pub example_id: String,
}

/// `score(query_features, triggered_gaps, corpus) -> ranked [GoldExample]`.
///
/// `score = 5*|gap overlap| + 1*[complexity match] + 1*[star-schema match]
/// + max(0, 1 - 0.2*|Δtable_count|)`. Gap overlap dominates; the rest break
/// ties. Deterministic: ties broken by example id, lexicographically.
pub fn score<'a>(
    query_features: &FeatureVector,
    triggered_gaps: &[String],
    corpus: &'a [GoldExample],
    top_k: usize,
) -> Vec<&'a GoldExample> {
    let mut scored: Vec<(f64, &GoldExample)> = corpus
        .iter()
        .map(|ex| (score_one(query_features, triggered_gaps, ex), ex))
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| {
        sb.partial_cmp(sa).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.id.cmp(&b.id))
    });

    scored.into_iter().take(top_k).map(|(_, ex)| ex).collect()
}

fn score_one(query_features: &FeatureVector, triggered_gaps: &[String], ex: &GoldExample) -> f64 {
    let overlap = triggered_gaps.iter().filter(|g| ex.demonstrates_gaps.contains(g)).count();
    let gap_term = 5.0 * overlap as f64;

    let complexity_term = match (query_features.estimated_complexity, ex.precomputed_features.estimated_complexity) {
        (Some(a), Some(b)) if complexity_str(a) == ex.complexity || a == b => 1.0,
        _ => 0.0,
    };

    let star_term = match (query_features.is_star_schema, ex.precomputed_features.is_star_schema) {
        (Some(a), Some(b)) if a == b => 1.0,
        _ => 0.0,
    };

    let size_term = match (query_features.table_count, ex.precomputed_features.table_count) {
        (Some(a), Some(b)) => (1.0 - 0.2 * (a - b).unsigned_abs() as f64).max(0.0),
        _ => 0.0,
    };

    gap_term + complexity_term + star_term + size_term
}

/// Runs C2 against the current profile rules to populate
/// `demonstrates_gaps` once, at corpus-add time.
pub fn index_example(rules: &[crate::rules::DetectionRule], ex: &mut GoldExample) {
    let gaps = crate::rules::evaluate(rules, &ex.precomputed_features);
    ex.demonstrates_gaps = gaps.into_iter().map(|g| g.gap_id).collect();
}

/// Loads a single `{dir}/{id}.json` gold example.
pub fn load_one(dir: &Path, id: &str) -> OptimizerResult<GoldExample> {
    let path = dir.join(format!("{id}.json"));
    let content = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Checks required fields are non-empty and `demonstrates_gaps` references
/// only ids present in `known_gap_ids` (the engine profile's detection
/// rules). Never fails the call itself — returns the list of violations.
pub fn validate_example(ex: &GoldExample, known_gap_ids: &[String]) -> Vec<String> {
    let mut errors = Vec::new();
    if ex.id.is_empty() {
        errors.push("missing id".to_string());
    }
    if ex.original_sql.is_empty() {
        errors.push("missing original_sql".to_string());
    }
    if ex.rewritten_sql.is_empty() {
        errors.push("missing rewritten_sql".to_string());
    }
    if ex.dialect.is_empty() {
        errors.push("missing dialect".to_string());
    }
    if ex.explanation.what.is_empty() {
        errors.push("missing explanation.what".to_string());
    }
    if ex.explanation.why.is_empty() {
        errors.push("missing explanation.why".to_string());
    }
    for gap in &ex.demonstrates_gaps {
        if !known_gap_ids.contains(gap) {
            errors.push(format!("demonstrates_gaps references unknown gap id {gap}"));
        }
    }
    errors
}

/// Loads every `examples/{dialect}/{id}.json` gold example (negative
/// examples under `regressions/` are loaded separately by the caller when
/// needed).
pub fn load_dir(dir: &Path) -> OptimizerResult<Vec<GoldExample>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path: PathBuf = entry.path();
        if path.is_dir() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let content = std::fs::read_to_string(&path)?;
        let ex: GoldExample = serde_json::from_str(&content)?;
        out.push(ex);
    }
    out.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Complexity;

    fn example(id: &str, gaps: &[&str], table_count: i64) -> GoldExample {
        let mut pf = FeatureVector::default();
        pf.table_count = Some(table_count);
        pf.estimated_complexity = Some(Complexity::Moderate);
        pf.is_star_schema = Some(false);
        GoldExample {
            id: id.into(),
            original_sql: "SELECT 1".into(),
            rewritten_sql: "SELECT 1".into(),
            explanation: Explanation {
                what: "x".into(),
                why: "x".into(),
                when: "x".into(),
                when_not: "x".into(),
            },
            dialect: "duckdb".into(),
            precomputed_features: pf,
            demonstrates_gaps: gaps.iter().map(|s| s.to_string()).collect(),
            archetype: "generic".into(),
            complexity: "moderate".into(),
            outcome: MeasuredOutcome { speedup: 1.5, confidence: "high".into() },
        }
    }

    #[test]
    fn gap_overlap_dominates_ranking() {
        let corpus = vec![example("a", &["GAP_1"], 3), example("b", &[], 3)];
        let mut qf = FeatureVector::default();
        qf.table_count = Some(3);
        qf.estimated_complexity = Some(Complexity::Moderate);
        qf.is_star_schema = Some(false);
        let ranked = score(&qf, &["GAP_1".to_string()], &corpus, 12);
        assert_eq!(ranked[0].id, "a");
    }

    #[test]
    fn validate_example_flags_unknown_gap_reference() {
        let ex = example("a", &["NOT_A_REAL_GAP"], 3);
        let errors = validate_example(&ex, &["GAP_1".to_string()]);
        assert!(errors.iter().any(|e| e.contains("NOT_A_REAL_GAP")));
    }

    #[test]
    fn validate_example_passes_with_known_gaps() {
        let ex = example("a", &["GAP_1"], 3);
        let errors = validate_example(&ex, &["GAP_1".to_string()]);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn empty_triggered_gaps_ranks_by_similarity_only_and_is_stable() {
        let corpus = vec![example("b", &[], 3), example("a", &[], 3)];
        let mut qf = FeatureVector::default();
        qf.table_count = Some(3);
        qf.estimated_complexity = Some(Complexity::Moderate);
        qf.is_star_schema = Some(false);
        let ranked = score(&qf, &[], &corpus, 12);
        // Tie on similarity terms -> broken by lexicographic id.
        assert_eq!(ranked[0].id, "a");
        assert_eq!(ranked[1].id, "b");
    }
}
