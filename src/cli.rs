//! Command line surface: `optimize`, `validate-profile`, `validate-example`,
//! `validate-rules`. Exit codes: 0 on a recorded run or a passing
//! validation, 1 on a hard failure (profile invalid, database
//! unreachable, malformed input), 2 when `optimize` produces no valid
//! candidate at all.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::Config;
use crate::corpus;
use crate::db::DbCapability;
use crate::driver::{self, DriverConfig, DriverInputs, DriverMode};
use crate::features::extractor::SqlDialect;
use crate::fixture_db::FixtureDb;
use crate::fixture_llm::FixtureLlm;
use crate::llm::LlmClient;
use crate::profile;
use crate::prompt::PromptConstraints;
use crate::rules;

pub const EXIT_OK: i32 = 0;
pub const EXIT_HARD_FAILURE: i32 = 1;
pub const EXIT_NO_CANDIDATE: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "querytorque", about = "SQL rewrite optimization engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate, validate, benchmark, and record a rewrite for one query.
    Optimize(OptimizeArgs),
    /// Check an engine profile's structural invariants.
    ValidateProfile { dialect: String },
    /// Check a gold example's required fields and gap references.
    ValidateExample {
        id: String,
        #[arg(long, default_value = "duckdb")]
        dialect: String,
    },
    /// Check a dialect's detection rules against the feature vocabulary.
    ValidateRules { dialect: String },
}

#[derive(Args, Debug)]
pub struct OptimizeArgs {
    pub query_file: PathBuf,
    #[arg(long, value_enum)]
    pub mode: Option<CliDriverMode>,
    #[arg(long)]
    pub workers: Option<usize>,
    #[arg(long)]
    pub retries: Option<usize>,
    #[arg(long = "target-speedup")]
    pub target_speedup: Option<f64>,
    #[arg(long = "sample-db")]
    pub sample_db: PathBuf,
    #[arg(long = "full-db")]
    pub full_db: PathBuf,
    /// Only "fixture" is bundled; real providers are wired by library
    /// callers implementing `LlmClient`, not by this binary.
    #[arg(long, default_value = "fixture")]
    pub provider: String,
    #[arg(long = "llm-responses")]
    pub llm_responses: PathBuf,
    #[arg(long, default_value = "duckdb")]
    pub engine: String,
    #[arg(long, default_value = "adhoc")]
    pub benchmark: String,
    #[arg(long = "benchmark-all")]
    pub benchmark_all: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum CliDriverMode {
    Retry,
    Parallel,
    Evolutionary,
}

impl From<CliDriverMode> for DriverMode {
    fn from(mode: CliDriverMode) -> Self {
        match mode {
            CliDriverMode::Retry => DriverMode::Retry,
            CliDriverMode::Parallel => DriverMode::Parallel,
            CliDriverMode::Evolutionary => DriverMode::Evolutionary,
        }
    }
}

fn dialect_of(engine: &str) -> Result<SqlDialect, String> {
    match engine.to_lowercase().as_str() {
        "duckdb" => Ok(SqlDialect::DuckDb),
        "postgres" | "postgresql" => Ok(SqlDialect::Postgres),
        other => Err(format!("unsupported engine '{other}' (expected duckdb or postgres)")),
    }
}

pub async fn run(cli: Cli, config: &Config) -> i32 {
    match cli.command {
        Command::Optimize(args) => run_optimize(args, config).await,
        Command::ValidateProfile { dialect } => run_validate_profile(&dialect, config),
        Command::ValidateExample { id, dialect } => run_validate_example(&id, &dialect, config),
        Command::ValidateRules { dialect } => run_validate_rules(&dialect, config),
    }
}

async fn run_optimize(args: OptimizeArgs, config: &Config) -> i32 {
    let dialect = match dialect_of(&args.engine) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "unsupported engine");
            return EXIT_HARD_FAILURE;
        }
    };

    if args.provider != "fixture" {
        tracing::error!(provider = %args.provider, "no concrete LLM provider is bundled; use --provider fixture or integrate LlmClient via the library API");
        return EXIT_HARD_FAILURE;
    }

    let original_sql = match std::fs::read_to_string(&args.query_file) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, path = %args.query_file.display(), "failed to read query file");
            return EXIT_HARD_FAILURE;
        }
    };

    let profile_dir = std::path::Path::new(&config.paths.profile_dir);
    let (profile_md, profile_structure) = match profile::load(profile_dir, &args.engine) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "engine profile invalid");
            return EXIT_HARD_FAILURE;
        }
    };

    let rule_dir = std::path::Path::new(&config.paths.rule_dir).join(&args.engine);
    let loaded_rules = match rules::load_dir(&rule_dir) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "failed to load detection rules");
            return EXIT_HARD_FAILURE;
        }
    };

    let example_dir = std::path::Path::new(&config.paths.example_dir).join(&args.engine);
    let loaded_corpus = match corpus::load_dir(&example_dir) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load gold examples");
            return EXIT_HARD_FAILURE;
        }
    };

    let sample_db = match FixtureDb::load(&args.sample_db) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "sample database unreachable");
            return EXIT_HARD_FAILURE;
        }
    };
    let full_db = match FixtureDb::load(&args.full_db) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "full store unreachable");
            return EXIT_HARD_FAILURE;
        }
    };

    let llm = match FixtureLlm::load(&args.llm_responses) {
        Ok(llm) => Arc::new(llm) as Arc<dyn LlmClient>,
        Err(e) => {
            tracing::error!(error = %e, "failed to load fixture LLM responses");
            return EXIT_HARD_FAILURE;
        }
    };

    let mut driver_config = DriverConfig {
        worker_count: args.workers.unwrap_or(config.generation.worker_count),
        retry_budget: args.retries.unwrap_or(config.generation.retry_budget),
        target_speedup: args.target_speedup.unwrap_or(config.generation.target_speedup),
        protocol: config.benchmark.protocol,
        benchmark_all: args.benchmark_all,
        ..DriverConfig::default()
    };
    let mode: DriverMode = args.mode.map(Into::into).unwrap_or(config.generation.mode);
    driver_config.generate_options.assemble_options.token_budget = config.generation.token_budget;

    let inputs = DriverInputs {
        query_id: args.query_file.display().to_string(),
        engine: args.engine.clone(),
        benchmark: args.benchmark.clone(),
        original_sql,
        profile_md,
        profile_version: profile_structure.version,
        rules: &loaded_rules,
        corpus: &loaded_corpus,
        constraints: PromptConstraints::default(),
        dialect,
        sample_db: &sample_db,
        full_db: &full_db,
    };

    let outcome = match mode {
        DriverMode::Retry => driver::run_retry(&inputs, &driver_config, llm).await,
        DriverMode::Parallel => {
            let llms: Vec<Arc<dyn LlmClient>> =
                (0..driver_config.worker_count).map(|_| llm.clone()).collect();
            driver::run_parallel(&inputs, &driver_config, llms).await
        }
        DriverMode::Evolutionary => driver::run_evolutionary(&inputs, &driver_config, llm).await,
    };

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = %e, "driver failed to run");
            return EXIT_HARD_FAILURE;
        }
    };

    let blackboard_dir = std::path::Path::new(&config.paths.blackboard_dir);
    driver::persist(blackboard_dir, &outcome);

    if driver::has_no_valid_candidate(&outcome) {
        tracing::warn!("no candidate rewrite passed validation and benchmarking");
        return EXIT_NO_CANDIDATE;
    }

    EXIT_OK
}

fn run_validate_profile(dialect: &str, config: &Config) -> i32 {
    let profile_dir = std::path::Path::new(&config.paths.profile_dir);
    match profile::load(profile_dir, dialect) {
        Ok(_) => {
            println!("profile for '{dialect}' is structurally valid");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("profile for '{dialect}' is invalid: {e}");
            EXIT_HARD_FAILURE
        }
    }
}

fn run_validate_example(id: &str, dialect: &str, config: &Config) -> i32 {
    let example_dir = std::path::Path::new(&config.paths.example_dir).join(dialect);
    let example = match corpus::load_one(&example_dir, id) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("failed to load example '{id}': {e}");
            return EXIT_HARD_FAILURE;
        }
    };

    let rule_dir = std::path::Path::new(&config.paths.rule_dir).join(dialect);
    let known_rules = match rules::load_dir(&rule_dir) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("failed to load detection rules for '{dialect}': {e}");
            return EXIT_HARD_FAILURE;
        }
    };
    let known_gap_ids: Vec<String> = known_rules.iter().map(|r| r.id.clone()).collect();

    let errors = corpus::validate_example(&example, &known_gap_ids);
    if errors.is_empty() {
        println!("example '{id}' is valid");
        EXIT_OK
    } else {
        for e in &errors {
            eprintln!("example '{id}': {e}");
        }
        EXIT_HARD_FAILURE
    }
}

fn run_validate_rules(dialect: &str, config: &Config) -> i32 {
    let rule_dir = std::path::Path::new(&config.paths.rule_dir).join(dialect);
    match rules::load_dir(&rule_dir) {
        Ok(loaded) => {
            println!("{} rule(s) for '{dialect}' reference only known features and operators", loaded.len());
            EXIT_OK
        }
        Err(e) => {
            eprintln!("rules for '{dialect}' are invalid: {e}");
            EXIT_HARD_FAILURE
        }
    }
}
