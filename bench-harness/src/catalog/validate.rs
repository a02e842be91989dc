//! Provider-compatibility checks on assembled tool catalogs.
//!
//! Nothing here rejects a catalog. Violations are reported so they show up in
//! the run log next to the case they affect.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::cases::ToolDefinition;

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z0-9_-]{1,64}$";

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(IDENTIFIER_PATTERN).expect("identifier pattern compiles"))
}

/// Where an offending identifier was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Tool,
    Property,
    Required,
}

impl std::fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentifierKind::Tool => write!(f, "tool name"),
            IdentifierKind::Property => write!(f, "property name"),
            IdentifierKind::Required => write!(f, "required field name"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidIdentifier {
    pub kind: IdentifierKind,
    pub name: String,
}

pub fn is_valid_identifier(name: &str) -> bool {
    identifier_regex().is_match(name)
}

/// Tool, property and required names that do not match the identifier pattern
pub fn invalid_identifiers(tools: &[ToolDefinition]) -> Vec<InvalidIdentifier> {
    let mut invalid = Vec::new();
    let mut check = |kind, name: &str| {
        if !is_valid_identifier(name) {
            invalid.push(InvalidIdentifier {
                kind,
                name: name.to_string(),
            });
        }
    };

    for tool in tools {
        check(IdentifierKind::Tool, &tool.name);
        for prop in tool.parameters.properties.keys() {
            check(IdentifierKind::Property, prop);
        }
        for req in &tool.parameters.required {
            check(IdentifierKind::Required, req);
        }
    }
    invalid
}

/// Normalized names that occur more than once, each with the original
/// spellings that collapse onto it. Ordered by first occurrence.
pub fn duplicate_names(tools: &[ToolDefinition]) -> Vec<(String, Vec<String>)> {
    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    let mut order = Vec::new();

    for tool in tools {
        let normalized = tool.normalized_name();
        let spellings = groups.entry(normalized.clone()).or_insert_with(|| {
            order.push(normalized.clone());
            Vec::new()
        });
        spellings.push(tool.name.clone());
    }

    order
        .into_iter()
        .filter_map(|name| {
            let spellings = groups.remove(&name)?;
            (spellings.len() > 1).then_some((name, spellings))
        })
        .collect()
}

/// Log name clashes in a catalog. Returns true when the catalog is unique.
pub fn check_unique_names(case_id: &str, tools: &[ToolDefinition]) -> bool {
    let duplicates = duplicate_names(tools);
    for (name, spellings) in &duplicates {
        tracing::warn!(
            case_id,
            name = %name,
            originals = ?spellings,
            "Tool names are not unique after normalization"
        );
    }
    duplicates.is_empty()
}

/// Log every catalog problem that may explain a provider rejecting a case
pub fn report_catalog_problems(case_id: &str, tools: &[ToolDefinition]) {
    for invalid in invalid_identifiers(tools) {
        tracing::warn!(case_id, name = %invalid.name, "Invalid {}", invalid.kind);
    }
    check_unique_names(case_id, tools);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_pattern() {
        assert!(is_valid_identifier("get_weather"));
        assert!(is_valid_identifier("a-b_9"));
        assert!(!is_valid_identifier("math.add"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier(&"x".repeat(65)));
    }

    #[test]
    fn test_invalid_identifiers_cover_properties() {
        let tools = vec![
            ToolDefinition::new("ok_tool", "")
                .with_property("fine", "string", true)
                .with_property("bad name", "string", true),
            ToolDefinition::new("pkg.tool", ""),
        ];
        let invalid = invalid_identifiers(&tools);
        assert_eq!(invalid.len(), 3);
        assert!(invalid.contains(&InvalidIdentifier {
            kind: IdentifierKind::Property,
            name: "bad name".to_string()
        }));
        assert!(invalid.contains(&InvalidIdentifier {
            kind: IdentifierKind::Required,
            name: "bad name".to_string()
        }));
        assert_eq!(invalid[2].kind, IdentifierKind::Tool);
    }

    #[test]
    fn test_duplicate_names_normalized() {
        let tools = vec![
            ToolDefinition::new("math.add", ""),
            ToolDefinition::new("ls", ""),
            ToolDefinition::new("math_add", ""),
        ];
        let dups = duplicate_names(&tools);
        assert_eq!(dups, vec![("math_add".to_string(), vec!["math.add".to_string(), "math_add".to_string()])]);
        assert!(!check_unique_names("case_0", &tools));
        assert!(check_unique_names("case_0", &tools[..2]));
    }
}
