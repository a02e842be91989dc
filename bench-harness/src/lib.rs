//! Resumable response generation for function-calling benchmarks
//!
//! This crate drives inference providers over a benchmark corpus and persists
//! one result per case, so that an interrupted run can be resumed without
//! repeating or reordering work.
//!
//! # Pipeline
//!
//! - [`planner`] works out which cases still lack a persisted result
//! - [`catalog`] assembles the tool catalog of multi-turn cases
//! - [`runner`] runs cases concurrently with classified retries
//! - [`reporting`] writes results in submission order
//!
//! # Example
//!
//! ```no_run
//! use bench_harness::{
//!     config::Config,
//!     generate::{generate, GenerationRequest},
//!     planner::Selection,
//!     providers::ProviderRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_or_default()?;
//!     let registry = ProviderRegistry::from_config(&config);
//!
//!     let request = GenerationRequest::new(
//!         vec!["gpt-4o-FC".to_string()],
//!         Selection::Categories(vec!["multi_turn".to_string()]),
//!     );
//!     let report = generate(&config, &registry, &request).await?;
//!     println!("{} cases failed", report.total_failed());
//!     Ok(())
//! }
//! ```

pub mod cases;
pub mod catalog;
pub mod config;
pub mod error;
pub mod generate;
pub mod planner;
pub mod providers;
pub mod reporting;
pub mod runner;

pub use config::Config;
pub use error::HarnessError;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::cases::{Corpus, ExecutionResult, TestCase, ToolDefinition};
    pub use crate::catalog::{CatalogAssembler, ToolLibrary};
    pub use crate::config::Config;
    pub use crate::error::HarnessError;
    pub use crate::generate::{generate, generate_with_progress, GenerationRequest};
    pub use crate::planner::{ResumptionPlanner, Selection, WorkPlan};
    pub use crate::providers::{
        InferenceOptions, InferenceOutput, InferenceProvider, ModelStyle, OpenAiCompatClient,
        ProviderError, ProviderRegistry, ProviderResult,
    };
    pub use crate::reporting::{print_console_report, GenerationReport, ResultSink, WriteMode};
    pub use crate::runner::{Coordinator, Executor, RetryPolicy};
}
