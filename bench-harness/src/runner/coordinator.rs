//! Bounded fan-out with in-order result collection

use std::sync::Arc;

use tokio::sync::Semaphore;

use super::executor::{CaseStatus, Executor};
use crate::cases::{ExecutionResult, TestCase};
use crate::providers::{BatchOptions, InferenceProvider, ModelStyle, ProviderError};
use crate::reporting::{ResultSink, SinkError};

/// Error type for a provider's run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to persist result: {0}")]
    Sink(#[from] SinkError),

    #[error("Batch inference for {provider} failed: {source}")]
    Batch {
        provider: String,
        #[source]
        source: ProviderError,
    },
}

/// Counts for one provider's run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Whether the provider ran the work set itself
    pub batched: bool,
}

/// Progress callback for tracking execution
pub trait ProgressCallback: Send + Sync {
    fn on_case_start(&self, case_id: &str, provider: &str);
    fn on_case_complete(&self, case_id: &str, provider: &str, success: bool);
    fn on_progress(&self, completed: usize, total: usize);
}

/// Default no-op progress callback
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_case_start(&self, _case_id: &str, _provider: &str) {}
    fn on_case_complete(&self, _case_id: &str, _provider: &str, _success: bool) {}
    fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Console progress callback
pub struct ConsoleProgress;

impl ProgressCallback for ConsoleProgress {
    fn on_case_start(&self, case_id: &str, provider: &str) {
        println!("  Starting {} on {}...", case_id, provider);
    }

    fn on_case_complete(&self, case_id: &str, provider: &str, success: bool) {
        let status = if success { "OK" } else { "FAILED" };
        println!("  {} {} on {}", status, case_id, provider);
    }

    fn on_progress(&self, completed: usize, total: usize) {
        println!("Progress: {}/{} cases complete", completed, total);
    }
}

/// Runs a work set through the executor with a fixed concurrency width
pub struct Coordinator {
    executor: Arc<Executor>,
    num_threads: usize,
    progress: Arc<dyn ProgressCallback>,
}

impl Coordinator {
    pub fn new(executor: Executor, num_threads: usize) -> Self {
        Self {
            executor: Arc::new(executor),
            num_threads: num_threads.max(1),
            progress: Arc::new(NoOpProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Execute `work_set` and persist one result per case.
    ///
    /// Results reach the sink in submission order. Only a sink failure or a
    /// failed batch provider ends the run early.
    pub async fn run(
        &self,
        provider: Arc<dyn InferenceProvider>,
        work_set: Vec<TestCase>,
        sink: &ResultSink,
    ) -> Result<RunSummary, RunError> {
        if provider.style() == ModelStyle::SelfManagedBatch {
            return self.run_batch(provider, work_set, sink).await;
        }

        let total = work_set.len();
        let semaphore = Arc::new(Semaphore::new(self.num_threads));
        let mut handles = Vec::with_capacity(total);

        for case in work_set {
            let id = case.id.clone();
            let executor = Arc::clone(&self.executor);
            let provider = Arc::clone(&provider);
            let progress = Arc::clone(&self.progress);
            let semaphore = Arc::clone(&semaphore);

            let handle = tokio::spawn(async move {
                // the semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                progress.on_case_start(&case.id, provider.name());
                executor.run_case(provider.as_ref(), &case).await
            });
            handles.push((id, handle));
        }

        let mut summary = RunSummary {
            submitted: total,
            ..Default::default()
        };

        let mut pending = handles.into_iter();
        while let Some((id, handle)) = pending.next() {
            let (result, success) = match handle.await {
                Ok(outcome) => {
                    let success = outcome.status == CaseStatus::Done;
                    (outcome.result, success)
                }
                Err(e) => {
                    tracing::error!(case_id = %id, "Case execution panicked: {}", e);
                    (ExecutionResult::failure(id.clone(), &e), false)
                }
            };

            if let Err(e) = sink.write(&result) {
                for (_, rest) in pending {
                    rest.abort();
                }
                return Err(e.into());
            }

            if success {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            self.progress.on_case_complete(&id, provider.name(), success);
            self.progress
                .on_progress(summary.succeeded + summary.failed, total);
        }

        Ok(summary)
    }

    async fn run_batch(
        &self,
        provider: Arc<dyn InferenceProvider>,
        work_set: Vec<TestCase>,
        sink: &ResultSink,
    ) -> Result<RunSummary, RunError> {
        let submitted = work_set.len();
        let options = BatchOptions {
            num_threads: self.num_threads,
            inference: self.executor.options().clone(),
        };

        tracing::info!(provider = provider.name(), cases = submitted, "Handing work set to batch provider");
        provider
            .run_batch(work_set, &options, sink)
            .await
            .map_err(|source| RunError::Batch {
                provider: provider.name().to_string(),
                source,
            })?;

        Ok(RunSummary {
            submitted,
            batched: true,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use serde_json::Value;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::config::CorpusConfig;
    use crate::providers::{InferenceOptions, InferenceOutput, ProviderResult};
    use crate::reporting::WriteMode;
    use crate::runner::RetryPolicy;

    struct Jittery {
        delays: Vec<u64>,
        panic_at: Option<u64>,
    }

    impl Jittery {
        fn new(delays: Vec<u64>) -> Self {
            Self { delays, panic_at: None }
        }
    }

    #[async_trait]
    impl InferenceProvider for Jittery {
        fn name(&self) -> &str {
            "jittery"
        }

        fn style(&self) -> ModelStyle {
            ModelStyle::ToolCalling
        }

        async fn run(&self, case: TestCase, _options: &InferenceOptions) -> ProviderResult<InferenceOutput> {
            let index = case.sort_key().index;
            tokio::time::sleep(Duration::from_millis(self.delays[index as usize])).await;
            if self.panic_at == Some(index) {
                panic!("provider bug");
            }
            if index % 3 == 2 {
                return Err(ProviderError::Api {
                    status: 400,
                    message: "bad request".into(),
                });
            }
            Ok(InferenceOutput::new(Value::from(case.id)))
        }
    }

    struct Batch {
        fail: bool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InferenceProvider for Batch {
        fn name(&self) -> &str {
            "batch"
        }

        fn style(&self) -> ModelStyle {
            ModelStyle::SelfManagedBatch
        }

        async fn run(&self, _case: TestCase, _options: &InferenceOptions) -> ProviderResult<InferenceOutput> {
            Err(ProviderError::Unsupported("per-case".into()))
        }

        async fn run_batch(
            &self,
            cases: Vec<TestCase>,
            options: &BatchOptions,
            sink: &ResultSink,
        ) -> ProviderResult<()> {
            assert_eq!(options.num_threads, 4);
            if self.fail {
                return Err(ProviderError::Other("engine crashed".into()));
            }
            for case in cases {
                self.seen.lock().unwrap().push(case.id.clone());
                sink.write(&ExecutionResult::new(case.id, Value::from("batched"), Default::default()))?;
            }
            Ok(())
        }
    }

    fn sink(dir: &Path) -> ResultSink {
        ResultSink::new(dir, "test-model", &CorpusConfig::default(), WriteMode::Append)
    }

    fn coordinator(num_threads: usize) -> Coordinator {
        let policy = RetryPolicy {
            limit: 30,
            delay: Duration::ZERO,
        };
        Coordinator::new(Executor::new(policy, InferenceOptions::default()), num_threads)
    }

    fn cases(n: usize) -> Vec<TestCase> {
        (0..n).map(|i| TestCase::new(format!("simple_{}", i), "q")).collect()
    }

    #[tokio::test]
    async fn test_results_persist_in_submission_order() {
        let mut rng = StdRng::seed_from_u64(7);
        let delays = (0..12).map(|_| rng.gen_range(0..40)).collect();
        let provider: Arc<dyn InferenceProvider> = Arc::new(Jittery::new(delays));

        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path());
        let summary = coordinator(6).run(provider, cases(12), &sink).await.unwrap();

        assert_eq!(summary.submitted, 12);
        assert_eq!(summary.failed, 4);
        assert_eq!(summary.succeeded, 8);

        let ids: Vec<_> = sink.existing("simple").unwrap().into_iter().map(|r| r.id).collect();
        let expected: Vec<_> = (0..12).map(|i| format!("simple_{}", i)).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_terminal_failures_are_persisted() {
        let provider: Arc<dyn InferenceProvider> = Arc::new(Jittery::new(vec![0; 3]));
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path());
        coordinator(1).run(provider, cases(3), &sink).await.unwrap();

        let results = sink.existing("simple").unwrap();
        assert_eq!(results.len(), 3);
        let text = results[2].result.as_str().unwrap();
        assert!(text.starts_with("Error during inference: "));
        assert!(text.contains("bad request"));
    }

    #[tokio::test]
    async fn test_panicking_case_becomes_failure() {
        let provider: Arc<dyn InferenceProvider> = Arc::new(Jittery {
            delays: vec![0; 2],
            panic_at: Some(0),
        });
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path());
        let summary = coordinator(2).run(provider, cases(2), &sink).await.unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        let results = sink.existing("simple").unwrap();
        assert_eq!(results[0].id, "simple_0");
        assert!(results[0].result.as_str().unwrap().starts_with("Error during inference: "));
        assert_eq!(results[1].result, Value::from("simple_1"));
    }

    #[tokio::test]
    async fn test_batch_provider_bypasses_pool() {
        let provider = Arc::new(Batch {
            fail: false,
            seen: Mutex::new(Vec::new()),
        });
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path());
        let summary = coordinator(4)
            .run(provider.clone(), cases(3), &sink)
            .await
            .unwrap();

        assert!(summary.batched);
        assert_eq!(summary.submitted, 3);
        assert_eq!(provider.seen.lock().unwrap().len(), 3);
        assert_eq!(sink.existing("simple").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_batch_failure_is_fatal() {
        let provider: Arc<dyn InferenceProvider> = Arc::new(Batch {
            fail: true,
            seen: Mutex::new(Vec::new()),
        });
        let dir = tempfile::tempdir().unwrap();
        let err = coordinator(4)
            .run(provider, cases(2), &sink(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Batch { .. }));
        assert!(err.to_string().contains("engine crashed"));
    }
}
