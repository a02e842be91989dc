//! Response generation entry point
//!
//! For each requested model: plan the work set against its persisted results,
//! assemble multi-turn catalogs, sort, and hand the cases to the coordinator.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::cases::Corpus;
use crate::catalog::{CatalogAssembler, ToolLibrary};
use crate::config::Config;
use crate::error::Result;
use crate::planner::{ResumptionPlanner, Selection};
use crate::providers::{InferenceOptions, ProviderRegistry};
use crate::reporting::{GenerationReport, ModelReport, ResultSink, WriteMode};
use crate::runner::{Coordinator, Executor, NoOpProgress, ProgressCallback, RetryPolicy};

/// What to generate
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub models: Vec<String>,
    pub selection: Selection,
    /// Regenerate cases that already have results
    pub allow_overwrite: bool,
    /// Fixes the catalog shuffle; fresh entropy per run otherwise
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(models: Vec<String>, selection: Selection) -> Self {
        Self {
            models,
            selection,
            allow_overwrite: false,
            seed: None,
        }
    }

    /// Subset reruns rewrite entries where they stand
    pub fn write_mode(&self) -> WriteMode {
        if self.selection.is_subset() {
            WriteMode::Merge
        } else {
            WriteMode::Append
        }
    }
}

pub async fn generate(config: &Config, registry: &ProviderRegistry, request: &GenerationRequest) -> Result<GenerationReport> {
    generate_with_progress(config, registry, request, Arc::new(NoOpProgress)).await
}

/// Run every requested model in turn.
///
/// Corpus, credential and provider setup errors abort before dispatch; a
/// case that fails during inference is recorded and does not.
pub async fn generate_with_progress(
    config: &Config,
    registry: &ProviderRegistry,
    request: &GenerationRequest,
    progress: Arc<dyn ProgressCallback>,
) -> Result<GenerationReport> {
    let corpus = Corpus::new(config.corpus.clone());
    let planner = ResumptionPlanner::new(&corpus, config.credentials.supplied());
    let mut report = GenerationReport::start();

    for model in &request.models {
        let provider = registry.create(model)?;
        let sink = ResultSink::new(
            &config.execution.result_dir,
            model,
            &config.corpus,
            request.write_mode(),
        );
        let mut model_report = ModelReport::new(model.clone(), sink.dir());

        let plan = planner.plan(&request.selection, &sink, request.allow_overwrite)?;
        model_report.already_done = plan.already_done;
        model_report.skipped_categories = plan.skipped.clone();
        model_report.planned = plan.cases.len();

        if plan.is_empty() {
            tracing::info!(
                model = %model,
                "All selected test cases have been previously generated. No new test cases to generate."
            );
            report.models.push(model_report);
            continue;
        }

        let library = ToolLibrary::load(&corpus, &plan.cases, &config.catalog)?;
        let mut rng = match request.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut work_set = CatalogAssembler::new(&library, &config.catalog).assemble_all(&plan.cases, &mut rng)?;
        work_set.sort_by_cached_key(|case| case.sort_key());

        tracing::info!(
            model = %model,
            cases = work_set.len(),
            num_threads = config.execution.num_threads,
            "Generating results"
        );

        let options = InferenceOptions {
            temperature: config.execution.temperature,
            include_input_log: config.execution.include_input_log,
            exclude_state_log: config.execution.exclude_state_log,
        };
        let coordinator = Coordinator::new(
            Executor::new(RetryPolicy::from(&config.execution), options),
            config.execution.num_threads,
        )
        .with_progress(Arc::clone(&progress));

        let summary = coordinator.run(provider, work_set, &sink).await?;
        model_report.succeeded = summary.succeeded;
        model_report.failed = summary.failed;
        model_report.batched = summary.batched;

        if summary.failed > 0 {
            tracing::warn!(model = %model, failed = summary.failed, "Some cases failed; their error text was saved as the result");
        }
        report.models.push(model_report);
    }

    Ok(report.finish())
}
