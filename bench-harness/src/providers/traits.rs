//! Provider trait definitions for inference backends

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cases::TestCase;
use crate::reporting::{ResultSink, SinkError};

/// How a provider consumes cases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStyle {
    /// Native function calling; the catalog is sent as tools
    ToolCalling,
    /// Tools are described in the prompt and calls parsed from free text
    Prompting,
    /// Takes the whole work set and manages concurrency and writing itself
    SelfManagedBatch,
}

/// Per-case inference knobs
#[derive(Debug, Clone)]
pub struct InferenceOptions {
    pub temperature: f32,
    /// Record the exact provider input next to the result
    pub include_input_log: bool,
    /// Leave environment state snapshots out of the input log
    pub exclude_state_log: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            temperature: 0.001,
            include_input_log: false,
            exclude_state_log: false,
        }
    }
}

/// Settings handed to a self-managed batch provider
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub num_threads: usize,
    pub inference: InferenceOptions,
}

/// Metadata a provider reports alongside its output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_token_count: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_token_count: Option<Value>,
    /// Seconds, one entry per request for multi-turn cases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_log: Option<Value>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl ResponseMetadata {
    /// Flatten into the key/value form stored next to a result
    pub fn into_map(self) -> IndexMap<String, Value> {
        let mut map = IndexMap::new();
        let fields = [
            ("input_token_count", self.input_token_count),
            ("output_token_count", self.output_token_count),
            ("latency", self.latency),
            ("inference_log", self.inference_log),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                map.insert(key.to_string(), value);
            }
        }
        map.extend(self.extra);
        map
    }
}

/// Output of one successful provider call
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    pub result: Value,
    pub metadata: ResponseMetadata,
}

impl InferenceOutput {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            metadata: ResponseMetadata::default(),
        }
    }
}

/// Error types for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Result write failed: {0}")]
    Sink(#[from] SinkError),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// HTTP status attached to the failure, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Api { status, .. } => Some(*status),
            ProviderError::RateLimited { .. } => Some(429),
            ProviderError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// An inference backend.
///
/// One handle is shared by every in-flight case of a run, so implementations
/// must tolerate concurrent calls to [`InferenceProvider::run`].
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Registry name of the provider/model
    fn name(&self) -> &str;

    fn style(&self) -> ModelStyle;

    /// Run one case to completion. The case is an owned copy.
    async fn run(&self, case: TestCase, options: &InferenceOptions) -> ProviderResult<InferenceOutput>;

    /// Run a whole work set, writing results through `sink`.
    ///
    /// Only [`ModelStyle::SelfManagedBatch`] providers implement this.
    async fn run_batch(
        &self,
        cases: Vec<TestCase>,
        options: &BatchOptions,
        sink: &ResultSink,
    ) -> ProviderResult<()> {
        let _ = (cases, options, sink);
        Err(ProviderError::Unsupported(format!(
            "{} does not support batch inference",
            self.name()
        )))
    }
}
