//! Per-case execution with classified retries

use tokio::time::sleep;

use super::retry::{classify, ClassifiedError, RetryPolicy};
use crate::catalog::validate;
use crate::cases::{ExecutionResult, TestCase};
use crate::providers::{InferenceOptions, InferenceOutput, InferenceProvider, ProviderError};

/// Terminal state of a case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStatus {
    Done,
    Failed,
}

/// Result of driving one case to a terminal state
#[derive(Debug, Clone)]
pub struct CaseOutcome {
    pub result: ExecutionResult,
    pub status: CaseStatus,
    /// Provider calls made
    pub attempts: u32,
    /// Retry budget consumed
    pub retries_used: u32,
}

impl CaseOutcome {
    pub fn is_success(&self) -> bool {
        self.status == CaseStatus::Done
    }
}

enum CaseState {
    Pending,
    Requesting,
    WaitingRetry,
    Done(InferenceOutput),
    Failed(ProviderError),
}

/// Runs single cases against a provider
#[derive(Debug, Clone, Default)]
pub struct Executor {
    policy: RetryPolicy,
    options: InferenceOptions,
}

impl Executor {
    pub fn new(policy: RetryPolicy, options: InferenceOptions) -> Self {
        Self { policy, options }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn options(&self) -> &InferenceOptions {
        &self.options
    }

    /// Drive a case until it succeeds or fails terminally.
    ///
    /// Never returns an error: a terminal failure becomes a result whose text
    /// carries the provider error, and the run moves on.
    pub async fn run_case(&self, provider: &dyn InferenceProvider, case: &TestCase) -> CaseOutcome {
        let mut attempts = 0;
        let mut retries_used = 0;
        let mut state = CaseState::Pending;

        loop {
            state = match state {
                CaseState::Pending => {
                    tracing::info!(case_id = %case.id, provider = provider.name(), "Generating result");
                    CaseState::Requesting
                }
                CaseState::Requesting => {
                    attempts += 1;
                    // each attempt gets its own copy so nothing leaks between tasks or retries
                    match provider.run(case.clone(), &self.options).await {
                        Ok(output) => CaseState::Done(output),
                        Err(error) => self.on_failure(case, error, &mut retries_used),
                    }
                }
                CaseState::WaitingRetry => {
                    sleep(self.policy.delay).await;
                    CaseState::Requesting
                }
                CaseState::Done(output) => {
                    tracing::info!(case_id = %case.id, attempts, "Success");
                    return CaseOutcome {
                        result: ExecutionResult::new(
                            case.id.clone(),
                            output.result,
                            output.metadata.into_map(),
                        ),
                        status: CaseStatus::Done,
                        attempts,
                        retries_used,
                    };
                }
                CaseState::Failed(error) => {
                    return CaseOutcome {
                        result: ExecutionResult::failure(case.id.clone(), &error),
                        status: CaseStatus::Failed,
                        attempts,
                        retries_used,
                    };
                }
            };
        }
    }

    fn on_failure(&self, case: &TestCase, error: ProviderError, retries_used: &mut u32) -> CaseState {
        match classify(&error) {
            ClassifiedError::SpecialTransient => {
                tracing::warn!(
                    case_id = %case.id,
                    error = %error,
                    "Upstream reported a transient fault. Sleeping for {:?} without using a retry",
                    self.policy.delay
                );
                CaseState::WaitingRetry
            }
            ClassifiedError::Transient if *retries_used < self.policy.limit => {
                *retries_used += 1;
                tracing::warn!(
                    case_id = %case.id,
                    error = %error,
                    "Rate limit reached. Sleeping for {:?}. Retry {}/{}",
                    self.policy.delay,
                    retries_used,
                    self.policy.limit
                );
                CaseState::WaitingRetry
            }
            _ => {
                tracing::error!(
                    case_id = %case.id,
                    error = %error,
                    retries_used = *retries_used,
                    "Inference failed; recording the error and continuing with the next case"
                );
                validate::report_catalog_problems(&case.id, &case.function);
                CaseState::Failed(error)
            }
        }
    }
}
