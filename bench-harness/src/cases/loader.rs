//! Corpus loading from JSON-lines dataset files

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;

use super::{TestCase, ToolDefinition};
use crate::config::CorpusConfig;

/// Error type for corpus loading. Any of these aborts a run before dispatch.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {path:?} line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Unknown test category: {0}")]
    UnknownCategory(String),

    #[error("Unknown tool collection: {0}")]
    UnknownCollection(String),

    #[error("Invalid test id file {path:?}: {message}")]
    SubsetFile { path: PathBuf, message: String },
}

/// Read one JSON record per non-empty line
pub fn load_json_lines<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, CorpusError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| CorpusError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_json_lines(path, &content)
}

/// Parse JSON-lines text already read from `path`
pub fn parse_json_lines<T: DeserializeOwned>(path: &Path, content: &str) -> Result<Vec<T>, CorpusError> {
    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|e| CorpusError::Parse {
            path: path.to_path_buf(),
            line: idx + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }

    Ok(records)
}

/// Read-only view of the dataset corpus described by a [`CorpusConfig`]
#[derive(Debug, Clone)]
pub struct Corpus {
    config: CorpusConfig,
}

impl Corpus {
    pub fn new(config: CorpusConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CorpusConfig {
        &self.config
    }

    /// All known categories, in configuration order
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.config.test_files.keys().map(String::as_str)
    }

    /// Expand category arguments (`all`, group names, concrete categories)
    /// into a de-duplicated list of concrete categories.
    pub fn resolve_categories(&self, args: &[String]) -> Result<Vec<String>, CorpusError> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();

        for arg in args {
            let expanded: Vec<String> = if arg == "all" {
                self.categories().map(String::from).collect()
            } else if let Some(members) = self.config.groups.get(arg) {
                members.clone()
            } else {
                vec![arg.clone()]
            };

            for category in expanded {
                if !self.config.test_files.contains_key(&category) {
                    return Err(CorpusError::UnknownCategory(category));
                }
                if seen.insert(category.clone()) {
                    resolved.push(category);
                }
            }
        }

        Ok(resolved)
    }

    /// File name of a category's test file
    pub fn test_file(&self, category: &str) -> Result<&str, CorpusError> {
        self.config
            .test_files
            .get(category)
            .map(String::as_str)
            .ok_or_else(|| CorpusError::UnknownCategory(category.to_string()))
    }

    /// Load every case of a category
    pub fn load_category(&self, category: &str) -> Result<Vec<TestCase>, CorpusError> {
        let file = self.test_file(category)?;
        let cases = load_json_lines(self.config.prompt_dir.join(file))?;
        tracing::debug!(category, count = cases.len(), "Loaded test cases");
        Ok(cases)
    }

    /// Load the tool docs of one multi-turn collection
    pub fn load_collection(&self, name: &str) -> Result<Vec<ToolDefinition>, CorpusError> {
        let file = self
            .config
            .func_doc_files
            .get(name)
            .ok_or_else(|| CorpusError::UnknownCollection(name.to_string()))?;
        load_json_lines(self.config.func_doc_dir.join(file))
    }

    /// Load the global tool pool used to pad floor-sized catalogs
    pub fn load_global_pool(&self) -> Result<Vec<ToolDefinition>, CorpusError> {
        load_json_lines(self.config.prompt_dir.join(&self.config.global_functions_file))
    }

    /// Load the subset request file: category -> ids to (re)run.
    ///
    /// A missing or malformed file is fatal since the intended scope is unknown.
    pub fn load_subset_ids(&self) -> Result<IndexMap<String, Vec<String>>, CorpusError> {
        let path = &self.config.test_ids_file;
        let content = std::fs::read_to_string(path).map_err(|e| CorpusError::SubsetFile {
            path: path.clone(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| CorpusError::SubsetFile {
            path: path.clone(),
            message: e.to_string(),
        })
    }
}
