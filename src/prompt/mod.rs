//! Prompt Assembler.
//!
//! Assembly order is contract: engine profile first (high-attention
//! region), then role/task framing, hazard flags for triggered gaps, the
//! original SQL (+ optional plan summary), matched examples, then the
//! output schema and constraints block — a composed, multi-section
//! prompt built at runtime rather than one static template file.

use crate::corpus::GoldExample;
use crate::errors::{OptimizerError, OptimizerResult};
use crate::rules::TriggeredGap;

/// Rough token estimate: ~4 characters per token, the same heuristic most
/// chat-completion providers quote for English-ish text. Good enough for
/// budget shedding; this is not a tokenizer.
fn estimate_tokens(s: &str) -> usize {
    s.len().div_ceil(4)
}

#[derive(Debug, Clone)]
pub struct PromptConstraints {
    pub output_schema_hint: String,
    pub safety_notes: Vec<String>,
}

impl Default for PromptConstraints {
    fn default() -> Self {
        Self {
            output_schema_hint: DEFAULT_OUTPUT_SCHEMA.to_string(),
            safety_notes: Vec::new(),
        }
    }
}

const DEFAULT_OUTPUT_SCHEMA: &str = r#"Return either:
(a) a JSON object: {"rewrite_sets": [{"id": "...", "transform": "...", "nodes": {"name": "sql"}, "invariants_kept": ["..."], "expected_speedup": 1.2, "risk": "low|medium|high"}], "explanation": "..."}
(b) a single fenced ```sql``` block with the rewritten query."#;

#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    pub token_budget: usize,
    pub plan_summary: Option<String>,
}

impl AssembleOptions {
    pub fn with_default_budget() -> Self {
        Self { token_budget: 18_000, plan_summary: None }
    }
}

/// `assemble(query, features, gaps, examples, profile_md, constraints) ->
/// prompt_text`.
pub fn assemble(
    query: &str,
    gaps: &[TriggeredGap],
    examples: &[&GoldExample],
    profile_md: &str,
    constraints: &PromptConstraints,
    options: &AssembleOptions,
) -> OptimizerResult<String> {
    let budget = options.token_budget;
    let profile_tokens = estimate_tokens(profile_md);
    if profile_tokens as f64 > budget as f64 * 0.6 {
        return Err(OptimizerError::PromptOverflow { used: profile_tokens, budget });
    }

    let role = role_section();
    let hazards = hazard_section(gaps);
    let query_section = query_section(query, options.plan_summary.as_deref());
    let schema_section = schema_section(constraints);

    let fixed_tokens = estimate_tokens(&profile_md)
        + estimate_tokens(&role)
        + estimate_tokens(&hazards)
        + estimate_tokens(&query_section)
        + estimate_tokens(&schema_section);

    if fixed_tokens > budget {
        return Err(OptimizerError::PromptOverflow { used: fixed_tokens, budget });
    }

    // Shed examples from the tail (lowest score = last in the caller's
    // already-ranked slice) until the assembled prompt fits.
    let mut kept = examples.to_vec();
    let mut examples_section = examples_section(&kept);
    while fixed_tokens + estimate_tokens(&examples_section) > budget && !kept.is_empty() {
        kept.pop();
        examples_section = examples_section_rebuild(&kept);
    }

    let mut out = String::new();
    out.push_str(&profile_md);
    out.push_str("\n\n");
    out.push_str(&role);
    out.push_str("\n\n");
    out.push_str(&hazards);
    out.push_str("\n\n");
    out.push_str(&query_section);
    out.push_str("\n\n");
    out.push_str(&examples_section);
    out.push_str("\n\n");
    out.push_str(&schema_section);

    Ok(out)
}

fn role_section() -> String {
    "## Role\nYou are a SQL rewrite engine. Produce a semantically equivalent \
     rewrite of the query below that executes faster on the target engine. \
     Never change the result set; only change how it is computed."
        .to_string()
}

fn hazard_section(gaps: &[TriggeredGap]) -> String {
    if gaps.is_empty() {
        return "## Hazards\nNo known optimizer gaps were triggered for this query.".to_string();
    }
    let mut s = String::from("## Hazards\nThe following optimizer gaps were detected:\n");
    for g in gaps {
        s.push_str(&format!("- {} (priority {:?}, confidence {})\n", g.gap_id, g.priority, g.confidence));
    }
    s
}

fn query_section(query: &str, plan_summary: Option<&str>) -> String {
    let mut s = format!("## Original query\n```sql\n{query}\n```");
    if let Some(plan) = plan_summary {
        s.push_str(&format!("\n\n## Plan summary\n{plan}"));
    }
    s
}

fn examples_section(examples: &[&GoldExample]) -> String {
    examples_section_rebuild(examples)
}

fn examples_section_rebuild(examples: &[&GoldExample]) -> String {
    if examples.is_empty() {
        return "## Examples\n(none selected)".to_string();
    }
    let mut s = String::from("## Examples\n");
    for ex in examples {
        s.push_str(&format!(
            "### Example {}\nBefore:\n```sql\n{}\n```\nAfter:\n```sql\n{}\n```\nWhat: {}\nWhy: {}\nWhen: {}\nWhen not: {}\n\n",
            ex.id, ex.original_sql, ex.rewritten_sql,
            ex.explanation.what, ex.explanation.why, ex.explanation.when, ex.explanation.when_not,
        ));
    }
    s
}

fn schema_section(constraints: &PromptConstraints) -> String {
    let mut s = format!("## Output format\n{}", constraints.output_schema_hint);
    if !constraints.safety_notes.is_empty() {
        s.push_str("\n\n## Constraints\n");
        for note in &constraints.safety_notes {
            s.push_str(&format!("- {note}\n"));
        }
    }
    s
}

/// Appends a "previous attempts failed" section for retry-with-feedback.
pub fn append_retry_feedback(prompt: &str, failures: &[String]) -> String {
    let mut out = prompt.to_string();
    out.push_str("\n\n## Previous attempts failed\n");
    for (i, f) in failures.iter().enumerate() {
        out.push_str(&format!("{}. {f}\n", i + 1));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Explanation, GoldExample, MeasuredOutcome};
    use crate::features::FeatureVector;

    fn example(id: &str) -> GoldExample {
        GoldExample {
            id: id.into(),
            original_sql: "SELECT 1".into(),
            rewritten_sql: "SELECT 1".into(),
            explanation: Explanation {
                what: "w".into(),
                why: "w".into(),
                when: "w".into(),
                when_not: "w".into(),
            },
            dialect: "duckdb".into(),
            precomputed_features: FeatureVector::default(),
            demonstrates_gaps: vec![],
            archetype: "generic".into(),
            complexity: "simple".into(),
            outcome: MeasuredOutcome { speedup: 1.1, confidence: "high".into() },
        }
    }

    #[test]
    fn profile_over_budget_fraction_fails() {
        let huge_profile = "x".repeat(100_000);
        let opts = AssembleOptions { token_budget: 1000, plan_summary: None };
        let err = assemble("SELECT 1", &[], &[], &huge_profile, &PromptConstraints::default(), &opts)
            .unwrap_err();
        assert!(matches!(err, OptimizerError::PromptOverflow { .. }));
    }

    #[test]
    fn examples_shed_from_tail_when_over_budget() {
        let examples: Vec<GoldExample> = (0..20).map(|i| example(&format!("ex{i}"))).collect();
        let refs: Vec<&GoldExample> = examples.iter().collect();
        let opts = AssembleOptions { token_budget: 500, plan_summary: None };
        let prompt = assemble("SELECT 1", &[], &refs, "- Engine: duckdb\n", &PromptConstraints::default(), &opts)
            .unwrap();
        assert!(estimate_tokens(&prompt) <= 500 + 50, "prompt should respect budget, got {}", prompt.len());
    }
}
