//! Case execution engine

pub mod coordinator;
pub mod executor;
pub mod rate_limiter;
pub mod retry;

pub use coordinator::{ConsoleProgress, Coordinator, NoOpProgress, ProgressCallback, RunError, RunSummary};
pub use executor::{CaseOutcome, CaseStatus, Executor};
pub use rate_limiter::RateLimiter;
pub use retry::{classify, ClassifiedError, RetryPolicy, TRANSIENT_STATUS_CODES};
