//! Candidate Generator: orchestrates N parallel LLM workers, each given a
//! distinct example shard, and parses their responses into candidate
//! rewrites. Workers run on independent `tokio::spawn` tasks; completions
//! are consumed in arrival order over an `mpsc` channel, and a `watch`
//! flag lets the caller cancel outstanding workers once a mode's
//! termination condition is met.

pub mod parse;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::corpus::GoldExample;
use crate::llm::{AskOptions, LlmClient, LlmError};
use crate::prompt::{self, AssembleOptions, PromptConstraints};
use crate::rules::TriggeredGap;

pub use parse::{parse_llm_output, ParsedRewrite};

#[derive(Debug, Clone)]
pub struct Candidate {
    pub worker_id: usize,
    pub prompt: String,
    pub raw_response: String,
    pub rewrites: Vec<ParsedRewrite>,
    pub explanation: Option<String>,
}

#[derive(Debug)]
pub enum GenerateError {
    Cancelled,
    Timeout,
    Llm(LlmError),
    Format(String),
    Prompt(crate::errors::OptimizerError),
}

impl std::fmt::Display for GenerateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "worker cancelled"),
            Self::Timeout => write!(f, "worker timed out"),
            Self::Llm(e) => write!(f, "llm error: {e}"),
            Self::Format(msg) => write!(f, "unparseable llm response: {msg}"),
            Self::Prompt(e) => write!(f, "prompt assembly failed: {e}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub worker_id: usize,
    pub result: Result<Candidate, String>,
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub per_worker_timeout: Duration,
    pub ask_options: AskOptions,
    pub assemble_options: AssembleOptions,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            per_worker_timeout: Duration::from_secs(60),
            ask_options: AskOptions::default(),
            assemble_options: AssembleOptions::with_default_budget(),
        }
    }
}

/// Splits a scored example list across `worker_count` workers. Workers
/// `0..worker_count-1` get disjoint shards; the last worker gets an empty
/// shard and operates in "explore" mode on the full query with no
/// examples. `worker_count <= 1` returns a single shard holding every
/// example (used by the single-worker retry and evolutionary modes).
pub fn shard_examples<'a>(
    examples: &'a [GoldExample],
    worker_count: usize,
) -> Vec<Vec<&'a GoldExample>> {
    if worker_count <= 1 {
        return vec![examples.iter().collect()];
    }

    let shard_workers = worker_count - 1;
    let mut shards: Vec<Vec<&GoldExample>> = vec![Vec::new(); shard_workers];
    for (i, ex) in examples.iter().enumerate() {
        shards[i % shard_workers].push(ex);
    }
    shards.push(Vec::new());
    shards
}

/// Runs one worker to completion: assemble the prompt for this shard, ask
/// the LLM, parse the response. Does not retry; the caller (driver) owns
/// retry-with-feedback by calling this again with an amended prompt via
/// `prompt::append_retry_feedback`.
pub async fn run_worker(
    worker_id: usize,
    query: &str,
    gaps: &[TriggeredGap],
    examples: &[&GoldExample],
    profile_md: &str,
    constraints: &PromptConstraints,
    options: &GenerateOptions,
    llm: &dyn LlmClient,
    retry_feedback: Option<&[String]>,
    cancel: &watch::Receiver<bool>,
) -> Result<Candidate, GenerateError> {
    if *cancel.borrow() {
        return Err(GenerateError::Cancelled);
    }

    let mut assembled = prompt::assemble(
        query,
        gaps,
        examples,
        profile_md,
        constraints,
        &options.assemble_options,
    )
    .map_err(GenerateError::Prompt)?;

    if let Some(failures) = retry_feedback {
        assembled = prompt::append_retry_feedback(&assembled, failures);
    }

    if *cancel.borrow() {
        return Err(GenerateError::Cancelled);
    }

    let response = tokio::time::timeout(
        options.per_worker_timeout,
        llm.ask("You are a SQL rewrite engine.", &assembled, &options.ask_options),
    )
    .await
    .map_err(|_| GenerateError::Timeout)?
    .map_err(GenerateError::Llm)?;

    if *cancel.borrow() {
        return Err(GenerateError::Cancelled);
    }

    let parsed = parse_llm_output(&response.content).map_err(GenerateError::Format)?;

    Ok(Candidate {
        worker_id,
        prompt: assembled,
        raw_response: response.content,
        rewrites: parsed.rewrites,
        explanation: parsed.explanation,
    })
}

pub struct ParallelRun {
    pub receiver: mpsc::Receiver<WorkerOutcome>,
    cancel_tx: watch::Sender<bool>,
}

impl ParallelRun {
    /// Signals outstanding workers to stop at their next suspension point.
    /// Workers that already produced a result keep it; this only affects
    /// workers still in flight.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

/// Spawns one task per worker and returns a channel yielding outcomes in
/// completion order, plus a handle to cancel outstanding workers.
pub fn spawn_parallel(
    query: String,
    gaps: Vec<TriggeredGap>,
    examples: Vec<GoldExample>,
    profile_md: String,
    constraints: PromptConstraints,
    llms: Vec<Arc<dyn LlmClient>>,
    options: GenerateOptions,
) -> ParallelRun {
    let worker_count = llms.len();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (tx, rx) = mpsc::channel(worker_count.max(1));

    let shards: Vec<Vec<GoldExample>> = {
        let refs = shard_examples(&examples, worker_count);
        refs.into_iter().map(|shard| shard.into_iter().cloned().collect()).collect()
    };

    for (worker_id, (llm, shard)) in llms.into_iter().zip(shards.into_iter()).enumerate() {
        let query = query.clone();
        let gaps = gaps.clone();
        let profile_md = profile_md.clone();
        let constraints = constraints.clone();
        let options = options.clone();
        let tx = tx.clone();
        let cancel_rx = cancel_rx.clone();

        tokio::spawn(async move {
            let shard_refs: Vec<&GoldExample> = shard.iter().collect();
            let result = run_worker(
                worker_id,
                &query,
                &gaps,
                &shard_refs,
                &profile_md,
                &constraints,
                &options,
                llm.as_ref(),
                None,
                &cancel_rx,
            )
            .await
            .map_err(|e| e.to_string());

            let _ = tx.send(WorkerOutcome { worker_id, result }).await;
        });
    }

    ParallelRun { receiver: rx, cancel_tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Explanation, MeasuredOutcome};
    use crate::features::FeatureVector;
    use crate::testing::fake_llm::ScriptedLlm;

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
    fn shard_examples_gives_last_worker_nothing() {
        let examples: Vec<GoldExample> = (0..12).map(|i| example(&format!("ex{i}"))).collect();
        let shards = shard_examples(&examples, 4);
        assert_eq!(shards.len(), 4);
        assert!(shards.last().unwrap().is_empty());
        let total: usize = shards[..3].iter().map(|s| s.len()).sum();
        assert_eq!(total, 12);
    }

    #[test]
    fn shard_examples_single_worker_gets_everything() {
        let examples: Vec<GoldExample> = (0..3).map(|i| example(&format!("ex{i}"))).collect();
        let shards = shard_examples(&examples, 1);
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].len(), 3);
    }

    #[tokio::test]
    async fn run_worker_parses_fenced_sql_response() {
        let llm = ScriptedLlm::new(vec!["```sql\nSELECT 2\n```".to_string()]);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let candidate = run_worker(
            0,
            "SELECT 1",
            &[],
            &[],
            "- Engine: duckdb\n",
            &PromptConstraints::default(),
            &GenerateOptions::default(),
            &llm,
            None,
            &cancel_rx,
        )
        .await
        .unwrap();
        assert_eq!(candidate.rewrites.len(), 1);
        assert_eq!(candidate.rewrites[0].sql.trim(), "SELECT 2");
    }

    #[tokio::test]
    async fn cancelled_worker_short_circuits_before_asking() {
        let llm = crate::testing::fake_llm::FailingLlm;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();
        let err = run_worker(
            0,
            "SELECT 1",
            &[],
            &[],
            "- Engine: duckdb\n",
            &PromptConstraints::default(),
            &GenerateOptions::default(),
            &llm,
            None,
            &cancel_rx,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GenerateError::Cancelled));
    }
}
