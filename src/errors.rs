//! Error taxonomy for the optimization core.
//!
//! Design: one `thiserror` enum covering every error kind the optimization
//! core can produce. Each
//! variant carries the context a caller needs to decide whether to retry,
//! record an outcome, or abort. Worker-local failures never escape as Rust
//! errors past the driver boundary — they are captured as recorded outcomes
//! instead (see `driver`); this type is for failures that *do* propagate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("failed to parse SQL: {0}")]
    ParseError(String),

    #[error("prompt exceeds token budget even after shedding examples ({used} > {budget})")]
    PromptOverflow { used: usize, budget: usize },

    #[error("LLM transport failure: {0}")]
    LlmTransport(String),

    #[error("LLM response not parseable as JSON or fenced SQL: {0}")]
    LlmFormat(String),

    #[error("rewrite failed validation: {0:?}")]
    ValidationFailure(crate::validator::ValidationStatus),

    #[error("benchmark execution failed: {0}")]
    BenchmarkError(String),

    #[error("engine profile invalid: {0}")]
    ProfileInvalid(String),

    #[error("blackboard write failed: {0}")]
    BlackboardWriteError(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OptimizerError {
    /// Numeric kind for CLI exit-code mapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ParseError(_) => ErrorKind::ParseError,
            Self::PromptOverflow { .. } => ErrorKind::PromptOverflow,
            Self::LlmTransport(_) => ErrorKind::LlmTransport,
            Self::LlmFormat(_) => ErrorKind::LlmFormat,
            Self::ValidationFailure(_) => ErrorKind::ValidationFailure,
            Self::BenchmarkError(_) => ErrorKind::BenchmarkError,
            Self::ProfileInvalid(_) => ErrorKind::ProfileInvalid,
            Self::BlackboardWriteError(_) => ErrorKind::BlackboardWriteError,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether this error is fatal to the whole request (vs. recordable as
    /// a worker-local outcome and retried).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ParseError | ErrorKind::ProfileInvalid | ErrorKind::Internal
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ParseError,
    PromptOverflow,
    LlmTransport,
    LlmFormat,
    ValidationFailure,
    BenchmarkError,
    ProfileInvalid,
    BlackboardWriteError,
    Internal,
}

pub type OptimizerResult<T> = Result<T, OptimizerError>;
