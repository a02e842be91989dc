//! Configuration management for the generation harness
//!
//! Loads corpus layout, catalog rules, execution settings and provider
//! definitions from TOML files and provides runtime access.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub credentials: CredentialConfig,
    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,
}

/// Where the dataset lives and how categories map to files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Directory holding the per-category test files
    #[serde(default = "default_prompt_dir")]
    pub prompt_dir: PathBuf,
    /// Directory holding the multi-turn tool collection docs
    #[serde(default = "default_func_doc_dir")]
    pub func_doc_dir: PathBuf,
    /// Global tool pool used to pad floor-sized catalogs, relative to `prompt_dir`
    #[serde(default = "default_global_functions_file")]
    pub global_functions_file: String,
    /// Subset request file (category -> ids) used with `--run-ids`
    #[serde(default = "default_test_ids_file")]
    pub test_ids_file: PathBuf,
    /// Category -> test file name
    #[serde(default = "default_test_files")]
    pub test_files: IndexMap<String, String>,
    /// Tool collection -> doc file name
    #[serde(default = "default_func_doc_files")]
    pub func_doc_files: IndexMap<String, String>,
    /// Named category groups usable on the command line
    #[serde(default = "default_groups")]
    pub groups: IndexMap<String, Vec<String>>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            prompt_dir: default_prompt_dir(),
            func_doc_dir: default_func_doc_dir(),
            global_functions_file: default_global_functions_file(),
            test_ids_file: default_test_ids_file(),
            test_files: default_test_files(),
            func_doc_files: default_func_doc_files(),
            groups: default_groups(),
        }
    }
}

/// How a catalog size rule is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeRuleKind {
    /// Hard upper bound, truncating noise collections first
    Cap,
    /// Exact size, truncating or padding from the global pool
    Floor,
}

/// A catalog size rule applied to cases whose id contains `marker`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRule {
    pub marker: String,
    pub kind: SizeRuleKind,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_size_rules")]
    pub size_rules: Vec<SizeRule>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            size_rules: default_size_rules(),
        }
    }
}

impl CatalogConfig {
    /// First rule whose marker appears in the case id
    pub fn rule_for(&self, case_id: &str) -> Option<&SizeRule> {
        self.size_rules.iter().find(|r| case_id.contains(&r.marker))
    }
}

/// Execution settings shared by every provider in a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Number of cases in flight at once
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
    /// Retries allowed for transient failures
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Fixed wait between transient retries, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub include_input_log: bool,
    #[serde(default)]
    pub exclude_state_log: bool,
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            num_threads: default_num_threads(),
            retry_limit: default_retry_limit(),
            retry_delay_ms: default_retry_delay_ms(),
            temperature: default_temperature(),
            include_input_log: false,
            exclude_state_log: false,
            result_dir: default_result_dir(),
        }
    }
}

impl ExecutionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Environment variables executable categories depend on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    #[serde(default = "default_required_env")]
    pub required_env: Vec<String>,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            required_env: default_required_env(),
        }
    }
}

impl CredentialConfig {
    /// True when every required variable is set to a non-empty value
    pub fn supplied(&self) -> bool {
        self.required_env
            .iter()
            .all(|key| std::env::var(key).map(|v| !v.trim().is_empty()).unwrap_or(false))
    }
}

/// Which provider implementation backs a configured model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompatible,
}

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Model id sent to the endpoint
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Requests per minute
    #[serde(default = "default_rpm")]
    pub rpm: u32,
    /// Expose the catalog as native tools; otherwise tools are described in
    /// the system prompt
    #[serde(default = "default_true")]
    pub function_calling: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

// Default value functions
fn default_true() -> bool { true }
fn default_prompt_dir() -> PathBuf { PathBuf::from("data") }
fn default_func_doc_dir() -> PathBuf { PathBuf::from("data/multi_turn_func_doc") }
fn default_global_functions_file() -> String { "global_functions.jsonl".to_string() }
fn default_test_ids_file() -> PathBuf { PathBuf::from("test_case_ids_to_generate.json") }
fn default_num_threads() -> usize { 1 }
fn default_retry_limit() -> u32 { 30 }
// a 60s quota window plus margin
fn default_retry_delay_ms() -> u64 { 65_000 }
fn default_temperature() -> f32 { 0.001 }
fn default_result_dir() -> PathBuf { PathBuf::from("result") }
fn default_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_api_key_env() -> String { "OPENAI_API_KEY".to_string() }
fn default_rpm() -> u32 { 500 }
fn default_max_tokens() -> u32 { 4096 }

fn default_required_env() -> Vec<String> {
    ["RAPID_API_KEY", "EXCHANGERATE_API_KEY", "OMDB_API_KEY", "GEOCODE_API_KEY"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

const CATEGORIES: &[&str] = &[
    "simple",
    "multiple",
    "parallel",
    "parallel_multiple",
    "java",
    "javascript",
    "irrelevance",
    "live_simple",
    "live_multiple",
    "live_parallel",
    "live_parallel_multiple",
    "live_irrelevance",
    "live_relevance",
    "exec_simple",
    "exec_multiple",
    "exec_parallel",
    "exec_parallel_multiple",
    "rest",
    "exec_nestful",
    "multi_turn_base",
    "multi_turn_miss_func",
    "multi_turn_miss_param",
    "multi_turn_long_context",
    "multi_turn_base_128tools",
    "multi_turn_base_900tools",
];

fn default_test_files() -> IndexMap<String, String> {
    CATEGORIES
        .iter()
        .map(|c| (c.to_string(), format!("BFCL_v3_{}.json", c)))
        .collect()
}

fn default_func_doc_files() -> IndexMap<String, String> {
    [
        ("GorillaFileSystem", "gorilla_file_system.json"),
        ("MathAPI", "math_api.json"),
        ("MessageAPI", "message_api.json"),
        ("TwitterAPI", "posting_api.json"),
        ("TicketAPI", "ticket_api.json"),
        ("TradingBot", "trading_bot.json"),
        ("TravelAPI", "travel_booking.json"),
        ("VehicleControlAPI", "vehicle_control.json"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_groups() -> IndexMap<String, Vec<String>> {
    let pick = |pred: fn(&str) -> bool| -> Vec<String> {
        CATEGORIES.iter().filter(|c| pred(c)).map(|c| c.to_string()).collect()
    };

    let mut groups = IndexMap::new();
    groups.insert("multi_turn".to_string(), pick(|c| c.starts_with("multi_turn")));
    groups.insert("live".to_string(), pick(|c| c.starts_with("live")));
    groups.insert(
        "executable".to_string(),
        pick(|c| c.starts_with("exec") || c == "rest"),
    );
    groups.insert(
        "non_live".to_string(),
        pick(|c| !c.starts_with("live") && !c.starts_with("multi_turn")),
    );
    groups
}

fn default_size_rules() -> Vec<SizeRule> {
    vec![
        SizeRule {
            marker: "_128tools".to_string(),
            kind: SizeRuleKind::Cap,
            size: 128,
        },
        SizeRule {
            marker: "_900tools".to_string(),
            kind: SizeRuleKind::Floor,
            size: 900,
        },
    ]
}

/// Searched in order when no config file is given
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config/harness.toml", "bench-harness/config/harness.toml"];

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Defaults => write!(f, "built-in defaults"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from the default config location or return defaults.
    ///
    /// A config file that exists but does not parse is an error.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        Self::load_first(&DEFAULT_CONFIG_PATHS).map(|(config, _)| config)
    }

    /// Load the first of `candidates` that exists, falling back to defaults.
    /// Logging may not be up yet, so the caller reports the returned source.
    pub fn load_first<P: AsRef<Path>>(candidates: &[P]) -> Result<(Self, ConfigSource), ConfigError> {
        for path in candidates {
            let path = path.as_ref();
            if path.exists() {
                return Ok((Self::from_file(path)?, ConfigSource::File(path.to_path_buf())));
            }
        }
        Ok((Self::default(), ConfigSource::Defaults))
    }

    /// Save configuration to a TOML file
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_first_reports_source() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("harness.toml");

        let (_, source) = Config::load_first(&[&missing]).unwrap();
        assert_eq!(source, ConfigSource::Defaults);

        Config::default().save_toml(&present).unwrap();
        let (_, source) = Config::load_first(&[&missing, &present]).unwrap();
        assert_eq!(source, ConfigSource::File(present.clone()));
        assert_eq!(source.to_string(), present.display().to_string());

        fs::write(&present, "not = [valid").unwrap();
        assert!(Config::load_first(&[&present]).is_err());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.execution.num_threads, 1);
        assert_eq!(config.execution.retry_limit, 30);
        assert_eq!(config.execution.retry_delay(), Duration::from_secs(65));
        assert_eq!(
            config.corpus.test_files["multi_turn_base"],
            "BFCL_v3_multi_turn_base.json"
        );
        assert!(config.corpus.groups["multi_turn"].contains(&"multi_turn_miss_func".to_string()));
    }

    #[test]
    fn test_rule_for_marker() {
        let catalog = CatalogConfig::default();
        let rule = catalog.rule_for("multi_turn_base_128tools_4").unwrap();
        assert_eq!(rule.kind, SizeRuleKind::Cap);
        assert_eq!(rule.size, 128);
        assert_eq!(
            catalog.rule_for("multi_turn_base_900tools_0").unwrap().kind,
            SizeRuleKind::Floor
        );
        assert!(catalog.rule_for("multi_turn_base_4").is_none());
    }

    #[test]
    fn test_parse_toml_config() {
        let toml = r#"
[execution]
num_threads = 8
retry_delay_ms = 10

[catalog]
size_rules = [{ marker = "_16tools", kind = "cap", size = 16 }]

[providers.local]
kind = "openai_compatible"
model = "qwen-7b"
base_url = "http://localhost:8000/v1"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.execution.num_threads, 8);
        assert_eq!(config.execution.retry_limit, 30);
        assert_eq!(config.catalog.size_rules.len(), 1);
        let local = config.get_provider("local").unwrap();
        assert_eq!(local.kind, ProviderKind::OpenaiCompatible);
        assert_eq!(local.rpm, 500);
        assert!(local.function_calling);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        Config::default().save_toml(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.corpus.test_files.len(), CATEGORIES.len());
    }

    #[test]
    fn test_sample_config_parses() {
        let config = Config::from_toml(include_str!("../config/harness.toml")).unwrap();
        assert_eq!(config.providers.len(), 3);
        let local = config.get_provider("Qwen/Qwen2.5-7B-Instruct-FC").unwrap();
        assert_eq!(local.base_url, "http://localhost:8000/v1");
        assert!(local.function_calling);
        assert!(!config.get_provider("gpt-4o-2024-11-20").unwrap().function_calling);
        assert_eq!(config.catalog.rule_for("multi_turn_base_900tools_3").unwrap().size, 900);
    }
}
