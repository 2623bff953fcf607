use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::benchmark::Protocol;
use crate::driver::DriverMode;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub generation: GenerationConfig,
    pub benchmark: BenchmarkConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub blackboard_dir: String,
    pub profile_dir: String,
    pub example_dir: String,
    pub rule_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub worker_count: usize,
    pub retry_budget: usize,
    pub token_budget: usize,
    pub target_speedup: f64,
    pub mode: DriverMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Config {
    /// Loading order: `config.toml` file, then `QUERYTORQUE_*` environment
    /// overrides, then validation.
    pub fn load() -> Result<Self, anyhow::Error> {
        let mut config = if let Some(config_path) = Self::find_config_file() {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Supported environment variables:
    /// - `QUERYTORQUE_BLACKBOARD_DIR`, `QUERYTORQUE_PROFILE_DIR`,
    ///   `QUERYTORQUE_EXAMPLE_DIR`, `QUERYTORQUE_RULE_DIR`
    /// - `QUERYTORQUE_WORKER_COUNT`, `QUERYTORQUE_RETRY_BUDGET`
    /// - `QUERYTORQUE_TOKEN_BUDGET`, `QUERYTORQUE_TARGET_SPEEDUP`
    /// - `QUERYTORQUE_MODE` (`retry` | `parallel` | `evolutionary`)
    /// - `QUERYTORQUE_BENCHMARK_PROTOCOL` (`three_run` | `trimmed5` | `interleaved_1122`)
    /// - `QUERYTORQUE_LOG_LEVEL`
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("QUERYTORQUE_BLACKBOARD_DIR") {
            self.paths.blackboard_dir = v;
        }
        if let Ok(v) = std::env::var("QUERYTORQUE_PROFILE_DIR") {
            self.paths.profile_dir = v;
        }
        if let Ok(v) = std::env::var("QUERYTORQUE_EXAMPLE_DIR") {
            self.paths.example_dir = v;
        }
        if let Ok(v) = std::env::var("QUERYTORQUE_RULE_DIR") {
            self.paths.rule_dir = v;
        }

        if let Ok(v) = std::env::var("QUERYTORQUE_WORKER_COUNT")
            && let Ok(v) = v.parse()
        {
            self.generation.worker_count = v;
        }
        if let Ok(v) = std::env::var("QUERYTORQUE_RETRY_BUDGET")
            && let Ok(v) = v.parse()
        {
            self.generation.retry_budget = v;
        }
        if let Ok(v) = std::env::var("QUERYTORQUE_TOKEN_BUDGET")
            && let Ok(v) = v.parse()
        {
            self.generation.token_budget = v;
        }
        if let Ok(v) = std::env::var("QUERYTORQUE_TARGET_SPEEDUP")
            && let Ok(v) = v.parse()
        {
            self.generation.target_speedup = v;
        }
        if let Ok(v) = std::env::var("QUERYTORQUE_MODE") {
            match parse_mode(&v) {
                Ok(mode) => self.generation.mode = mode,
                Err(e) => tracing::warn!("invalid QUERYTORQUE_MODE '{v}': {e}"),
            }
        }

        if let Ok(v) = std::env::var("QUERYTORQUE_BENCHMARK_PROTOCOL") {
            match parse_protocol(&v) {
                Ok(protocol) => self.benchmark.protocol = protocol,
                Err(e) => tracing::warn!("invalid QUERYTORQUE_BENCHMARK_PROTOCOL '{v}': {e}"),
            }
        }

        if let Ok(v) = std::env::var("QUERYTORQUE_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.generation.worker_count == 0 {
            anyhow::bail!("generation.worker_count must be > 0");
        }
        if self.generation.token_budget == 0 {
            anyhow::bail!("generation.token_budget must be > 0");
        }
        if self.generation.target_speedup <= 1.0 {
            anyhow::bail!("generation.target_speedup must be > 1.0");
        }
        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths = ["querytorque.toml", "conf/querytorque.toml", "./querytorque.toml"];
        possible_paths.iter().find(|p| Path::new(p).exists()).map(|p| p.to_string())
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            blackboard_dir: "blackboard".to_string(),
            profile_dir: "profiles".to_string(),
            example_dir: "examples".to_string(),
            rule_dir: "constraints/detection_rules".to_string(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            retry_budget: 2,
            token_budget: 18_000,
            target_speedup: 1.10,
            mode: DriverMode::Parallel,
        }
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self { protocol: Protocol::Trimmed5 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,querytorque=debug".to_string(), file: None }
    }
}

fn parse_mode(s: &str) -> Result<DriverMode, String> {
    match s.to_lowercase().as_str() {
        "retry" => Ok(DriverMode::Retry),
        "parallel" => Ok(DriverMode::Parallel),
        "evolutionary" => Ok(DriverMode::Evolutionary),
        other => Err(format!("unknown mode: {other}")),
    }
}

fn parse_protocol(s: &str) -> Result<Protocol, String> {
    match s.to_lowercase().replace('-', "_").as_str() {
        "three_run" | "threerun" => Ok(Protocol::ThreeRun),
        "trimmed5" | "trimmed_5" => Ok(Protocol::Trimmed5),
        "interleaved_1122" | "interleaved1122" => Ok(Protocol::Interleaved1122),
        other => Err(format!("unknown protocol: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_worker_count() {
        let mut config = Config::default();
        config.generation.worker_count = 0;
        assert!(config.validate().is_err());
    }
}
