//! Top-level error type

use crate::cases::CorpusError;
use crate::config::ConfigError;
use crate::planner::PlanError;
use crate::providers::ProviderError;
use crate::reporting::SinkError;
use crate::runner::RunError;

/// Anything that stops a generation run before or outside per-case execution
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error("Provider setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Run(#[from] RunError),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
