//! Inference provider implementations

pub mod openai;
pub mod traits;

pub use openai::OpenAiCompatClient;
pub use traits::{
    BatchOptions, InferenceOptions, InferenceOutput, InferenceProvider, ModelStyle, ProviderError,
    ProviderResult, ResponseMetadata,
};

use indexmap::IndexMap;
use std::sync::Arc;

use crate::config::{Config, ProviderKind};

/// Builds a provider handle on demand
pub type ProviderFactory = Box<dyn Fn() -> ProviderResult<Arc<dyn InferenceProvider>> + Send + Sync>;

/// Model name to provider constructor.
///
/// Built once at startup and handed to the generation entry point; nothing is
/// registered globally.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: IndexMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with one entry per `[providers.<name>]` section
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for (name, provider) in &config.providers {
            let name = name.clone();
            let provider = provider.clone();
            match provider.kind {
                ProviderKind::OpenaiCompatible => {
                    let key = name.clone();
                    registry.register(key, move || {
                        let client = OpenAiCompatClient::from_config(&name, &provider)?;
                        Ok(Arc::new(client) as Arc<dyn InferenceProvider>)
                    });
                }
            }
        }
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> ProviderResult<Arc<dyn InferenceProvider>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Construct the provider registered under `name`
    pub fn create(&self, name: &str) -> ProviderResult<Arc<dyn InferenceProvider>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ProviderError::Config(format!("Unknown model: {}", name)))?;
        factory()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("models", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
