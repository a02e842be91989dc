//! Test case records and loading

pub mod categories;
pub mod loader;

pub use categories::{
    category_of, is_executable, is_multi_turn, is_nestful, requires_credentials, SortKey,
};
pub use loader::{load_json_lines, parse_json_lines, Corpus, CorpusError};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One user/system message inside a turn of a case's dialogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            extra: IndexMap::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            extra: IndexMap::new(),
        }
    }
}

/// JSON-schema-like parameter block of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type", default = "default_parameter_type")]
    pub kind: String,
    #[serde(default)]
    pub properties: IndexMap<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

fn default_parameter_type() -> String {
    "dict".to_string()
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self {
            kind: default_parameter_type(),
            properties: IndexMap::new(),
            required: Vec::new(),
            extra: IndexMap::new(),
        }
    }
}

/// A callable tool exposed to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: ToolParameters,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: ToolParameters::default(),
            extra: IndexMap::new(),
        }
    }

    /// Add a typed property, optionally marking it required
    pub fn with_property(mut self, name: impl Into<String>, ty: &str, required: bool) -> Self {
        let name = name.into();
        self.parameters
            .properties
            .insert(name.clone(), serde_json::json!({ "type": ty, "description": "" }));
        if required {
            self.parameters.required.push(name);
        }
        self
    }

    /// Name with `.` replaced by `_`, the form providers see
    pub fn normalized_name(&self) -> String {
        normalized_name(&self.name)
    }
}

/// Provider-facing form of a tool name
pub fn normalized_name(name: &str) -> String {
    name.replace('.', "_")
}

/// A withheld tool for one turn.
///
/// Dataset files list holdouts by name; once the catalog has been assembled the
/// name is swapped for the full definition taken out of the main catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HoldoutEntry {
    Name(String),
    Tool(ToolDefinition),
}

impl HoldoutEntry {
    pub fn name(&self) -> &str {
        match self {
            HoldoutEntry::Name(name) => name,
            HoldoutEntry::Tool(tool) => &tool.name,
        }
    }

    pub fn as_tool(&self) -> Option<&ToolDefinition> {
        match self {
            HoldoutEntry::Tool(tool) => Some(tool),
            HoldoutEntry::Name(_) => None,
        }
    }
}

/// A benchmark case as stored in the dataset corpus.
///
/// Fields the harness does not interpret are kept in `extra` and written back
/// unchanged, so providers receive the full record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    #[serde(default)]
    pub question: Vec<Vec<ChatMessage>>,
    #[serde(default)]
    pub function: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missed_function: Option<IndexMap<String, Vec<HoldoutEntry>>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub involved_classes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub involved_classes_original: Vec<String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl TestCase {
    /// Create a single-turn case with one user message
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            question: vec![vec![ChatMessage::user(prompt)]],
            function: Vec::new(),
            missed_function: None,
            involved_classes: Vec::new(),
            involved_classes_original: Vec::new(),
            extra: IndexMap::new(),
        }
    }

    pub fn with_functions(mut self, functions: Vec<ToolDefinition>) -> Self {
        self.function = functions;
        self
    }

    pub fn with_involved_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.involved_classes = classes.into_iter().map(Into::into).collect();
        self
    }

    pub fn category(&self) -> &str {
        category_of(&self.id)
    }

    pub fn is_multi_turn(&self) -> bool {
        is_multi_turn(&self.id)
    }

    pub fn sort_key(&self) -> SortKey {
        SortKey::from_id(&self.id)
    }

    /// Holdout tools for a turn, if any were extracted
    pub fn holdouts_for_turn(&self, turn: usize) -> Vec<&ToolDefinition> {
        self.missed_function
            .as_ref()
            .and_then(|m| m.get(&turn.to_string()))
            .map(|entries| entries.iter().filter_map(HoldoutEntry::as_tool).collect())
            .unwrap_or_default()
    }
}

/// Persisted outcome of one case for one provider.
///
/// `result` holds the provider output, or an error string when the case
/// failed terminally. Provider metadata (token counts, latency, input log) is
/// flattened next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: String,
    pub result: Value,
    #[serde(flatten)]
    pub metadata: IndexMap<String, Value>,
}

impl ExecutionResult {
    pub fn new(id: impl Into<String>, result: Value, metadata: IndexMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            result,
            metadata,
        }
    }

    /// Terminal failure record embedding the error text
    pub fn failure(id: impl Into<String>, error: &dyn std::fmt::Display) -> Self {
        Self {
            id: id.into(),
            result: Value::String(format!("Error during inference: {}", error)),
            metadata: IndexMap::new(),
        }
    }

    pub fn category(&self) -> &str {
        category_of(&self.id)
    }

    pub fn sort_key(&self) -> SortKey {
        SortKey::from_id(&self.id)
    }
}
