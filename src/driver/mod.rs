//! Optimization Driver: wires the assemble → generate → validate-on-sample
//! → benchmark-on-full → record pipeline in one of three modes. Modes
//! share every phase; they differ only in fan-out, retry, and
//! termination (see `DriverMode`).

use std::path::Path;
use std::sync::Arc;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::benchmark::{self, Protocol};
use crate::blackboard::{self, Base, BlackboardEntry, Opt, Outcome, OutcomeStatus, Principle, Version};
use crate::corpus::{self, GoldExample};
use crate::db::DbCapability;
use crate::errors::{OptimizerError, OptimizerResult};
use crate::features::extractor;
use crate::generator::{self, Candidate, GenerateOptions};
use crate::llm::LlmClient;
use crate::prompt::PromptConstraints;
use crate::rules::{self, DetectionRule, TriggeredGap};
use crate::validator::{self, ValidationStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverMode {
    Retry,
    Parallel,
    Evolutionary,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub worker_count: usize,
    pub retry_budget: usize,
    pub target_speedup: f64,
    pub protocol: Protocol,
    /// Bounds the number of rounds in evolutionary mode (M).
    pub max_rounds: usize,
    /// Minimum round-over-round improvement required to continue
    /// evolutionary mode (ε).
    pub min_round_improvement: f64,
    pub benchmark_all: bool,
    pub generate_options: GenerateOptions,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            retry_budget: 1,
            target_speedup: 1.10,
            protocol: Protocol::Trimmed5,
            max_rounds: 5,
            min_round_improvement: 0.02,
            benchmark_all: false,
            generate_options: GenerateOptions::default(),
        }
    }
}

pub struct DriverInputs<'a> {
    pub query_id: String,
    pub engine: String,
    pub benchmark: String,
    pub original_sql: String,
    pub profile_md: String,
    pub profile_version: String,
    pub rules: &'a [DetectionRule],
    pub corpus: &'a [GoldExample],
    pub constraints: PromptConstraints,
    pub dialect: extractor::SqlDialect,
    pub sample_db: &'a dyn DbCapability,
    pub full_db: &'a dyn DbCapability,
}

#[derive(Debug, Clone)]
pub struct DriverOutcome {
    pub recorded: Vec<BlackboardEntry>,
    pub winner: Option<BlackboardEntry>,
}

fn fingerprint(sql: &str) -> String {
    let mut hasher = DefaultHasher::new();
    sql.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

struct RequestContext<'a> {
    gaps: Vec<TriggeredGap>,
    scored: Vec<&'a GoldExample>,
}

fn prepare_context<'a>(
    sql: &str,
    dialect: extractor::SqlDialect,
    rules: &[DetectionRule],
    corpus: &'a [GoldExample],
) -> OptimizerResult<RequestContext<'a>> {
    let features = extractor::extract(sql, dialect)?;
    let gaps = rules::evaluate(rules, &features);
    let gap_ids: Vec<String> = gaps.iter().map(|g| g.gap_id.clone()).collect();
    let scored = corpus::score(&features, &gap_ids, corpus, corpus::DEFAULT_TOP_K);
    Ok(RequestContext { gaps, scored })
}

fn outcome_for(status: ValidationStatus, speedup: f64, original_ms: f64, optimized_ms: f64) -> Outcome {
    let outcome_status = match status {
        ValidationStatus::Pass => blackboard::status_for_speedup(speedup),
        _ => OutcomeStatus::Error,
    };
    Outcome {
        status: outcome_status,
        speedup: if matches!(status, ValidationStatus::Pass) { speedup } else { 0.0 },
        speedup_type: "full_store".to_string(),
        original_ms,
        optimized_ms,
        validation: status,
    }
}

fn error_outcome() -> Outcome {
    Outcome {
        status: OutcomeStatus::Error,
        speedup: 0.0,
        speedup_type: "full_store".to_string(),
        original_ms: 0.0,
        optimized_ms: 0.0,
        validation: ValidationStatus::ExecFail,
    }
}

#[allow(clippy::too_many_arguments)]
fn record_attempt(
    inputs: &DriverInputs,
    approach: &str,
    worker_id: usize,
    candidate: &Candidate,
    rewrite: &generator::ParsedRewrite,
    gap_id: Option<String>,
    outcome: Outcome,
) -> BlackboardEntry {
    BlackboardEntry {
        id: BlackboardEntry::new_id(),
        base: Base {
            query_id: inputs.query_id.clone(),
            engine: inputs.engine.clone(),
            benchmark: inputs.benchmark.clone(),
            original_sql: inputs.original_sql.clone(),
            fingerprint: fingerprint(&inputs.original_sql),
            timestamp: Utc::now(),
        },
        opt: Opt {
            approach: approach.to_string(),
            worker_id,
            strategy: rewrite.transform.clone(),
            optimized_sql: rewrite.sql.clone(),
            examples_used: Vec::new(),
            engine_profile_version: inputs.profile_version.clone(),
        },
        principle: gap_id.map(|gap_exploited| Principle {
            what: rewrite.transform.clone().unwrap_or_default(),
            why: candidate.explanation.clone().unwrap_or_default(),
            mechanism: rewrite.transform.clone().unwrap_or_default(),
            gap_exploited: Some(gap_exploited),
            evidence: format!("speedup={}", outcome.speedup),
            confidence: "medium".to_string(),
        }),
        semantics: Default::default(),
        config: None,
        scanner_finding: None,
        outcome,
        tags: Vec::new(),
        provenance: Some(format!("worker-{worker_id}")),
        version: Version::default(),
    }
}

async fn validate_and_benchmark(
    inputs: &DriverInputs<'_>,
    rewrite: &generator::ParsedRewrite,
    protocol: Protocol,
) -> (ValidationStatus, Option<String>, f64, f64, f64) {
    let validation = validator::validate(&inputs.original_sql, &rewrite.sql, inputs.sample_db).await;
    if validation.status != ValidationStatus::Pass {
        return (validation.status, Some(validation.feedback_message()), 0.0, 0.0, 0.0);
    }

    match benchmark::benchmark(&inputs.original_sql, &rewrite.sql, protocol, inputs.full_db).await {
        Ok(timing) => {
            (ValidationStatus::Pass, None, timing.speedup, timing.original_ms, timing.optimized_ms)
        }
        Err(e) => (ValidationStatus::ExecFail, Some(e), 0.0, 0.0, 0.0),
    }
}

fn primary_gap(gaps: &[TriggeredGap]) -> Option<String> {
    gaps.first().map(|g| g.gap_id.clone())
}

/// Retry mode: one worker, up to `retry_budget` attempts, each prompt
/// rebuilt with the prior failure's feedback. Stops at the first PASS
/// benchmarked candidate (success if its speedup meets the target, or
/// once the retry budget is exhausted).
pub async fn run_retry(
    inputs: &DriverInputs<'_>,
    config: &DriverConfig,
    llm: Arc<dyn LlmClient>,
) -> OptimizerResult<DriverOutcome> {
    let ctx = prepare_context(&inputs.original_sql, inputs.dialect, inputs.rules, inputs.corpus)?;
    let examples: Vec<&GoldExample> = ctx.scored;
    let gap_id = primary_gap(&ctx.gaps);

    let mut recorded = Vec::new();
    let mut winner = None;
    let mut failures: Vec<String> = Vec::new();
    let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);

    for attempt in 0..=config.retry_budget {
        let candidate = generator::run_worker(
            0,
            &inputs.original_sql,
            &ctx.gaps,
            &examples,
            &inputs.profile_md,
            &inputs.constraints,
            &config.generate_options,
            llm.as_ref(),
            if failures.is_empty() { None } else { Some(&failures) },
            &cancel_rx,
        )
        .await;

        let candidate = match candidate {
            Ok(c) => c,
            Err(e) => {
                failures.push(e.to_string());
                continue;
            }
        };

        let Some(rewrite) = candidate.rewrites.first() else {
            failures.push("no rewrite parsed from response".to_string());
            continue;
        };

        let (status, feedback, speedup, original_ms, optimized_ms) =
            validate_and_benchmark(inputs, rewrite, config.protocol).await;

        let outcome = outcome_for(status, speedup, original_ms, optimized_ms);
        let entry = record_attempt(inputs, "retry", 0, &candidate, rewrite, gap_id.clone(), outcome);
        recorded.push(entry.clone());

        if status == ValidationStatus::Pass {
            winner = Some(entry);
            break;
        }

        if let Some(msg) = feedback {
            failures.push(msg);
        }
        let _ = attempt;
    }

    Ok(DriverOutcome { recorded, winner })
}

/// Parallel mode: K workers, 0-1 retry per worker, sample-validate all,
/// benchmark valid candidates sequentially (benchmarking owns the full
/// store exclusively), stop at the first candidate meeting the target
/// unless `benchmark_all` is set.
pub async fn run_parallel(
    inputs: &DriverInputs<'_>,
    config: &DriverConfig,
    llms: Vec<Arc<dyn LlmClient>>,
) -> OptimizerResult<DriverOutcome> {
    let ctx = prepare_context(&inputs.original_sql, inputs.dialect, inputs.rules, inputs.corpus)?;
    let examples: Vec<GoldExample> = ctx.scored.iter().map(|e| (*e).clone()).collect();
    let gap_id = primary_gap(&ctx.gaps);

    let run = generator::spawn_parallel(
        inputs.original_sql.clone(),
        ctx.gaps.clone(),
        examples,
        inputs.profile_md.clone(),
        inputs.constraints.clone(),
        llms,
        config.generate_options.clone(),
    );

    let mut recorded = Vec::new();
    let mut winner = None;
    let mut receiver = run.receiver;

    while let Some(outcome) = receiver.recv().await {
        let candidate = match outcome.result {
            Ok(c) => c,
            Err(_) => continue,
        };
        let Some(rewrite) = candidate.rewrites.first() else { continue };

        let (status, _feedback, speedup, original_ms, optimized_ms) =
            validate_and_benchmark(inputs, rewrite, config.protocol).await;

        let outcome = outcome_for(status, speedup, original_ms, optimized_ms);
        let met_target = status == ValidationStatus::Pass && speedup >= config.target_speedup;
        let entry =
            record_attempt(inputs, "parallel", candidate.worker_id, &candidate, rewrite, gap_id.clone(), outcome);
        recorded.push(entry.clone());

        if met_target {
            winner = Some(entry);
            if !config.benchmark_all {
                run.cancel();
                break;
            }
        }
    }

    Ok(DriverOutcome { recorded, winner })
}

/// Evolutionary mode: one worker per round; the best rewrite of round N
/// feeds round N+1 as the new "original" to improve on. Stops when a
/// round's improvement over the previous round falls below ε or after
/// `max_rounds`.
pub async fn run_evolutionary(
    inputs: &DriverInputs<'_>,
    config: &DriverConfig,
    llm: Arc<dyn LlmClient>,
) -> OptimizerResult<DriverOutcome> {
    let ctx = prepare_context(&inputs.original_sql, inputs.dialect, inputs.rules, inputs.corpus)?;
    let examples: Vec<&GoldExample> = ctx.scored;
    let gap_id = primary_gap(&ctx.gaps);

    let mut recorded = Vec::new();
    let mut winner: Option<BlackboardEntry> = None;
    let mut current_sql = inputs.original_sql.clone();
    let mut best_speedup = 1.0;
    let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);

    for _round in 0..config.max_rounds {
        let round_inputs = DriverInputs { original_sql: current_sql.clone(), ..clone_inputs(inputs) };

        let candidate = generator::run_worker(
            0,
            &current_sql,
            &ctx.gaps,
            &examples,
            &inputs.profile_md,
            &inputs.constraints,
            &config.generate_options,
            llm.as_ref(),
            None,
            &cancel_rx,
        )
        .await;

        let Ok(candidate) = candidate else { break };
        let Some(rewrite) = candidate.rewrites.first() else { break };

        let (status, _feedback, speedup, original_ms, optimized_ms) =
            validate_and_benchmark(&round_inputs, rewrite, config.protocol).await;

        let outcome = outcome_for(status, speedup, original_ms, optimized_ms);
        let entry =
            record_attempt(&round_inputs, "evolutionary", 0, &candidate, rewrite, gap_id.clone(), outcome);
        recorded.push(entry.clone());

        if status != ValidationStatus::Pass {
            break;
        }

        let improvement = speedup - best_speedup;
        if improvement < config.min_round_improvement {
            if speedup > best_speedup {
                winner = Some(entry);
            }
            break;
        }

        best_speedup = speedup;
        current_sql = rewrite.sql.clone();
        winner = Some(entry);
    }

    Ok(DriverOutcome { recorded, winner })
}

/// `DriverInputs` borrows most fields; evolutionary mode needs a copy per
/// round with only `original_sql` replaced.
fn clone_inputs<'a>(inputs: &DriverInputs<'a>) -> DriverInputs<'a> {
    DriverInputs {
        query_id: inputs.query_id.clone(),
        engine: inputs.engine.clone(),
        benchmark: inputs.benchmark.clone(),
        original_sql: inputs.original_sql.clone(),
        profile_md: inputs.profile_md.clone(),
        profile_version: inputs.profile_version.clone(),
        rules: inputs.rules,
        corpus: inputs.corpus,
        constraints: inputs.constraints.clone(),
        dialect: inputs.dialect,
        sample_db: inputs.sample_db,
        full_db: inputs.full_db,
    }
}

/// Records every entry to `{blackboard_dir}/{engine}_{benchmark}.jsonl`.
/// Best-effort: a write failure is logged, not propagated — observability
/// loss, not correctness loss.
pub fn persist(blackboard_dir: &Path, outcome: &DriverOutcome) {
    for entry in &outcome.recorded {
        if let Err(e) = blackboard::append(blackboard_dir, entry) {
            tracing::error!(error = %e, entry_id = %entry.id, "failed to write blackboard entry");
        }
    }
}

pub fn error_entry(inputs: &DriverInputs, worker_id: usize) -> BlackboardEntry {
    BlackboardEntry {
        id: BlackboardEntry::new_id(),
        base: Base {
            query_id: inputs.query_id.clone(),
            engine: inputs.engine.clone(),
            benchmark: inputs.benchmark.clone(),
            original_sql: inputs.original_sql.clone(),
            fingerprint: fingerprint(&inputs.original_sql),
            timestamp: Utc::now(),
        },
        opt: Opt {
            approach: "unknown".to_string(),
            worker_id,
            strategy: None,
            optimized_sql: String::new(),
            examples_used: Vec::new(),
            engine_profile_version: inputs.profile_version.clone(),
        },
        principle: None,
        semantics: Default::default(),
        config: None,
        scanner_finding: None,
        outcome: error_outcome(),
        tags: Vec::new(),
        provenance: None,
        version: Version::default(),
    }
}

impl DriverMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Parallel => "parallel",
            Self::Evolutionary => "evolutionary",
        }
    }
}

impl std::fmt::Display for DriverMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// No valid candidate at all across the whole driver call — maps to CLI
/// exit code 2.
pub fn has_no_valid_candidate(outcome: &DriverOutcome) -> bool {
    outcome.winner.is_none()
}

pub fn driver_error(msg: impl Into<String>) -> OptimizerError {
    OptimizerError::Other(anyhow::anyhow!(msg.into()))
}
