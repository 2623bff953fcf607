//! Benchmark Runner.
//!
//! Times the original query against a rewrite using one of three
//! cache-aware protocols, then buckets the measured speedup into a
//! status. Benchmarks on the full target run sequentially — the caller
//! is responsible for not overlapping two `benchmark` calls against the
//! same store.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::DbCapability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    ThreeRun,
    Trimmed5,
    Interleaved1122,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Win,
    Improved,
    Neutral,
    Regression,
}

/// Speedup ceiling applied when the rewrite's measured mean is zero
/// : avoids a division-by-zero panic while
/// still reporting an unambiguous, clearly-capped number.
pub const SPEEDUP_CEILING: f64 = 10_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingResult {
    pub original_ms: f64,
    pub optimized_ms: f64,
    pub speedup: f64,
    pub status: OutcomeStatus,
}

pub fn status_for_speedup(speedup: f64) -> OutcomeStatus {
    if speedup >= 1.10 {
        OutcomeStatus::Win
    } else if speedup >= 1.05 {
        OutcomeStatus::Improved
    } else if speedup >= 0.95 {
        OutcomeStatus::Neutral
    } else {
        OutcomeStatus::Regression
    }
}

fn speedup(original_mean: f64, rewrite_mean: f64) -> f64 {
    if rewrite_mean == 0.0 {
        return SPEEDUP_CEILING;
    }
    (original_mean / rewrite_mean).min(SPEEDUP_CEILING)
}

const EXEC_TIMEOUT: Duration = Duration::from_secs(120);

/// `benchmark(sql, protocol) -> TimingResult`.
/// Runs both the original and the rewrite against `target` under the
/// chosen protocol.
pub async fn benchmark(
    original_sql: &str,
    rewrite_sql: &str,
    protocol: Protocol,
    target: &dyn DbCapability,
) -> Result<TimingResult, String> {
    let (original_ms, optimized_ms) = match protocol {
        Protocol::ThreeRun => three_run(original_sql, rewrite_sql, target).await?,
        Protocol::Trimmed5 => trimmed_5(original_sql, rewrite_sql, target).await?,
        Protocol::Interleaved1122 => interleaved_1122(original_sql, rewrite_sql, target).await?,
    };

    let sp = speedup(original_ms, optimized_ms);
    Ok(TimingResult { original_ms, optimized_ms, speedup: sp, status: status_for_speedup(sp) })
}

async fn run_once(sql: &str, target: &dyn DbCapability) -> Result<f64, String> {
    target
        .execute(sql, EXEC_TIMEOUT)
        .await
        .map(|r| r.timing_ms)
        .map_err(|e| e.to_string())
}

/// 1 warmup (discarded), 2 measured, arithmetic mean of the two.
async fn three_run(original: &str, rewrite: &str, target: &dyn DbCapability) -> Result<(f64, f64), String> {
    run_once(original, target).await?;
    let a = run_once(original, target).await?;
    let b = run_once(original, target).await?;
    let original_mean = (a + b) / 2.0;

    run_once(rewrite, target).await?;
    let a = run_once(rewrite, target).await?;
    let b = run_once(rewrite, target).await?;
    let rewrite_mean = (a + b) / 2.0;

    Ok((original_mean, rewrite_mean))
}

/// 5 runs, discard min and max, average the middle three. Rejects inputs
/// with fewer than 3 surviving runs — with exactly 5 runs
/// that can only happen if fewer than 5 executions actually completed,
/// which `run_once` already turns into an `Err`.
async fn trimmed_5(original: &str, rewrite: &str, target: &dyn DbCapability) -> Result<(f64, f64), String> {
    async fn trimmed_mean(sql: &str, target: &dyn DbCapability) -> Result<f64, String> {
        let mut runs = Vec::with_capacity(5);
        for _ in 0..5 {
            runs.push(run_once(sql, target).await?);
        }
        if runs.len() < 3 {
            return Err("trimmed_5 requires at least 3 completed runs".into());
        }
        runs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let middle = &runs[1..runs.len() - 1];
        Ok(middle.iter().sum::<f64>() / middle.len() as f64)
    }

    let original_mean = trimmed_mean(original, target).await?;
    let rewrite_mean = trimmed_mean(rewrite, target).await?;
    Ok((original_mean, rewrite_mean))
}

/// Warmup original, warmup rewrite, 2 timed original, 2 timed rewrite —
/// interleaved to spread cache-state drift evenly across both queries.
async fn interleaved_1122(
    original: &str,
    rewrite: &str,
    target: &dyn DbCapability,
) -> Result<(f64, f64), String> {
    run_once(original, target).await?;
    run_once(rewrite, target).await?;

    let o1 = run_once(original, target).await?;
    let r1 = run_once(rewrite, target).await?;
    let o2 = run_once(original, target).await?;
    let r2 = run_once(rewrite, target).await?;

    Ok(((o1 + o2) / 2.0, (r1 + r2) / 2.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fake_db::FakeTimingDb;

    #[test]
    fn zero_rewrite_mean_caps_speedup_without_panic() {
        let sp = speedup(100.0, 0.0);
        assert_eq!(sp, SPEEDUP_CEILING);
    }

    #[test]
    fn status_bands_match_spec() {
        assert!(matches!(status_for_speedup(1.2), OutcomeStatus::Win));
        assert!(matches!(status_for_speedup(1.07), OutcomeStatus::Improved));
        assert!(matches!(status_for_speedup(1.0), OutcomeStatus::Neutral));
        assert!(matches!(status_for_speedup(0.5), OutcomeStatus::Regression));
    }

    #[tokio::test]
    async fn three_run_takes_mean_of_two_measured_runs() {
        let db = FakeTimingDb::new(vec![100.0, 90.0, 110.0, 50.0, 45.0, 55.0]);
        let result = benchmark("SELECT 1", "SELECT 2", Protocol::ThreeRun, &db).await.unwrap();
        assert_eq!(result.original_ms, 100.0);
        assert_eq!(result.optimized_ms, 50.0);
    }

    #[tokio::test]
    async fn trimmed_5_discards_min_and_max() {
        let db = FakeTimingDb::new(vec![
            100.0, 200.0, 90.0, 95.0, 10.0, // original: min=10 max=200 -> mean(90,95,100)
            50.0, 60.0, 40.0, 45.0, 5.0, // rewrite: min=5 max=60 -> mean(40,45,50)
        ]);
        let result = benchmark("SELECT 1", "SELECT 2", Protocol::Trimmed5, &db).await.unwrap();
        assert!((result.original_ms - 95.0).abs() < 1e-9);
        assert!((result.optimized_ms - 45.0).abs() < 1e-9);
    }
}
