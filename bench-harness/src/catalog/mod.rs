//! Tool catalog assembly for multi-turn cases
//!
//! Multi-turn cases name the tool collections they involve instead of
//! embedding their catalog. Assembly loads those collections, enforces the
//! size rule matching the case id, shuffles, and moves holdout tools out of
//! the catalog into the turn that withholds them.
//!
//! Assembly never touches the loaded corpus record; it returns a new case.

pub mod validate;

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::cases::{Corpus, CorpusError, HoldoutEntry, TestCase, ToolDefinition};
use crate::config::{CatalogConfig, SizeRuleKind};

/// Tool collections and the global pool needed to assemble a set of cases
#[derive(Debug, Clone, Default)]
pub struct ToolLibrary {
    collections: HashMap<String, Vec<ToolDefinition>>,
    pool: Vec<ToolDefinition>,
}

impl ToolLibrary {
    pub fn new(collections: HashMap<String, Vec<ToolDefinition>>, pool: Vec<ToolDefinition>) -> Self {
        Self { collections, pool }
    }

    /// Load exactly what `cases` need: every collection a multi-turn case
    /// involves, and the global pool only if some case has a floor rule.
    pub fn load(
        corpus: &Corpus,
        cases: &[TestCase],
        config: &CatalogConfig,
    ) -> Result<Self, CorpusError> {
        let mut collections = HashMap::new();
        let mut needs_pool = false;

        for case in cases.iter().filter(|c| c.is_multi_turn()) {
            for name in &case.involved_classes {
                if !collections.contains_key(name) {
                    collections.insert(name.clone(), corpus.load_collection(name)?);
                }
            }
            if matches!(config.rule_for(&case.id), Some(rule) if rule.kind == SizeRuleKind::Floor) {
                needs_pool = true;
            }
        }

        let pool = if needs_pool {
            corpus.load_global_pool()?
        } else {
            Vec::new()
        };

        Ok(Self { collections, pool })
    }

    pub fn collection(&self, name: &str) -> Result<&[ToolDefinition], CorpusError> {
        self.collections
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| CorpusError::UnknownCollection(name.to_string()))
    }

    pub fn pool(&self) -> &[ToolDefinition] {
        &self.pool
    }
}

/// Builds per-case tool catalogs from a [`ToolLibrary`]
pub struct CatalogAssembler<'a> {
    library: &'a ToolLibrary,
    config: &'a CatalogConfig,
}

impl<'a> CatalogAssembler<'a> {
    pub fn new(library: &'a ToolLibrary, config: &'a CatalogConfig) -> Self {
        Self { library, config }
    }

    /// Assemble every case in order; non multi-turn cases pass through unchanged
    pub fn assemble_all<R: Rng + ?Sized>(
        &self,
        cases: &[TestCase],
        rng: &mut R,
    ) -> Result<Vec<TestCase>, CorpusError> {
        cases.iter().map(|case| self.assemble(case, rng)).collect()
    }

    /// Produce the assembled copy of one case
    pub fn assemble<R: Rng + ?Sized>(
        &self,
        case: &TestCase,
        rng: &mut R,
    ) -> Result<TestCase, CorpusError> {
        let mut assembled = case.clone();
        if !case.is_multi_turn() {
            return Ok(assembled);
        }

        let mut tools = Vec::new();
        for name in &case.involved_classes {
            tools.extend_from_slice(self.library.collection(name)?);
        }

        if let Some(rule) = self.config.rule_for(&case.id) {
            match rule.kind {
                SizeRuleKind::Cap => {
                    let protected = self.original_tool_names(case);
                    if !apply_cap(&mut tools, rule.size, &protected) {
                        tracing::warn!(
                            case_id = %case.id,
                            cap = rule.size,
                            count = tools.len(),
                            "Catalog cap not reachable without dropping original tools"
                        );
                    }
                }
                SizeRuleKind::Floor => {
                    let before = tools.len();
                    apply_floor(&mut tools, rule.size, self.library.pool(), rng);
                    tracing::debug!(
                        case_id = %case.id,
                        before,
                        after = tools.len(),
                        "Resized catalog to floor"
                    );
                    if tools.len() != rule.size {
                        tracing::warn!(
                            case_id = %case.id,
                            target = rule.size,
                            count = tools.len(),
                            "Global tool pool too small to reach catalog floor"
                        );
                    }
                }
            }
        }

        tools.shuffle(rng);

        if let Some(missed) = assembled.missed_function.as_mut() {
            for entries in missed.values_mut() {
                *entries = extract_holdouts(&mut tools, entries);
            }
        }

        validate::check_unique_names(&case.id, &tools);
        assembled.function = tools;
        Ok(assembled)
    }

    /// Names of tools belonging to the case's original involved classes
    fn original_tool_names(&self, case: &TestCase) -> HashSet<String> {
        case.involved_classes_original
            .iter()
            .filter_map(|class| self.library.collection(class).ok())
            .flat_map(|tools| tools.iter().map(|t| t.name.clone()))
            .collect()
    }
}

/// Trim `tools` to at most `cap` entries by dropping from the end.
///
/// A dropped tool whose name is in `protected` goes back to the front instead,
/// so only noise collections absorb the truncation. Returns false when the
/// cap cannot be met because everything left is protected.
pub fn apply_cap(tools: &mut Vec<ToolDefinition>, cap: usize, protected: &HashSet<String>) -> bool {
    let mut reinserted_in_a_row = 0;

    while tools.len() > cap {
        let Some(last) = tools.pop() else {
            break;
        };
        if protected.contains(&last.name) {
            tools.insert(0, last);
            reinserted_in_a_row += 1;
            if reinserted_in_a_row >= tools.len() {
                return false;
            }
        } else {
            reinserted_in_a_row = 0;
        }
    }

    true
}

/// Bring `tools` to exactly `target` entries.
///
/// Clashing names are first collapsed to their first occurrence. Above
/// target the catalog is then truncated; below target, tools are sampled
/// without replacement from the part of `pool` whose normalized names are not
/// yet present, one round at a time, until the target is met or the pool runs
/// out.
pub fn apply_floor<R: Rng + ?Sized>(
    tools: &mut Vec<ToolDefinition>,
    target: usize,
    pool: &[ToolDefinition],
    rng: &mut R,
) {
    dedup_normalized(tools);

    if tools.len() >= target {
        tools.truncate(target);
        return;
    }

    while tools.len() < target {
        let remaining = target - tools.len();
        let present: HashSet<String> = tools.iter().map(ToolDefinition::normalized_name).collect();
        let candidates: Vec<&ToolDefinition> = pool
            .iter()
            .filter(|t| !present.contains(&t.normalized_name()))
            .collect();
        if candidates.is_empty() {
            break;
        }

        // the pool itself may hold clashing spellings; keep the first drawn
        let mut drawn = HashSet::new();
        for tool in candidates.choose_multiple(rng, remaining) {
            if drawn.insert(tool.normalized_name()) {
                tools.push((*tool).clone());
            }
        }

        if !validate::duplicate_names(tools).is_empty() {
            tracing::warn!(count = tools.len(), "Sampling round left clashing tool names");
        }
    }
}

/// Keep the first tool of every normalized name
fn dedup_normalized(tools: &mut Vec<ToolDefinition>) {
    let mut seen = HashSet::new();
    let before = tools.len();
    tools.retain(|t| seen.insert(t.normalized_name()));
    if tools.len() != before {
        tracing::debug!(removed = before - tools.len(), "Removed clashing tool names");
    }
}

/// Move the tools named by `entries` out of `tools`, first match wins.
/// Names with no match are dropped.
fn extract_holdouts(tools: &mut Vec<ToolDefinition>, entries: &[HoldoutEntry]) -> Vec<HoldoutEntry> {
    let mut extracted = Vec::new();
    for entry in entries {
        if let Some(pos) = tools.iter().position(|t| t.name == entry.name()) {
            extracted.push(HoldoutEntry::Tool(tools.remove(pos)));
        }
    }
    extracted
}
