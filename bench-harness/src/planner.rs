//! Work-set planning for resumable runs

use indexmap::IndexMap;
use std::collections::HashSet;

use crate::cases::{requires_credentials, Corpus, CorpusError, TestCase};
use crate::reporting::{ResultSink, SinkError};

/// Error type for planning; always raised before any case is dispatched
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Corpus error: {0}")]
    Corpus(#[from] CorpusError),

    #[error("Result store error: {0}")]
    Sink(#[from] SinkError),
}

/// Which cases a run is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Whole categories, groups or `all`
    Categories(Vec<String>),
    /// The ids listed in the subset request file
    IdFile,
}

impl Selection {
    pub fn is_subset(&self) -> bool {
        matches!(self, Selection::IdFile)
    }
}

/// Cases still to run for one provider
#[derive(Debug, Clone, Default)]
pub struct WorkPlan {
    /// In corpus order; sorting happens after catalog assembly
    pub cases: Vec<TestCase>,
    /// Categories considered, after group expansion and skipping
    pub categories: Vec<String>,
    /// Excluded because live credentials are unavailable
    pub skipped: Vec<String>,
    /// Selected cases that already had a persisted result
    pub already_done: usize,
    /// Categories whose result file was removed for a full rerun
    pub discarded: Vec<String>,
}

impl WorkPlan {
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

/// Decides what is left to do against one provider's persisted results
pub struct ResumptionPlanner<'a> {
    corpus: &'a Corpus,
    credentials_available: bool,
}

impl<'a> ResumptionPlanner<'a> {
    pub fn new(corpus: &'a Corpus, credentials_available: bool) -> Self {
        Self {
            corpus,
            credentials_available,
        }
    }

    /// Build the work set.
    ///
    /// Without overwrite, ids already in the result file are subtracted. With
    /// overwrite, a category selection discards the file so everything is
    /// regenerated, while a subset selection keeps the file for the sink to
    /// merge into.
    pub fn plan(&self, selection: &Selection, sink: &ResultSink, allow_overwrite: bool) -> Result<WorkPlan, PlanError> {
        let requested = self.requested(selection)?;
        let mut plan = WorkPlan::default();

        for (category, ids) in requested {
            if requires_credentials(&category) && !self.credentials_available {
                tracing::warn!(
                    category = %category,
                    "Skipping category: live API credentials are not available"
                );
                plan.skipped.push(category);
                continue;
            }

            let mut cases = self.corpus.load_category(&category)?;
            if let Some(ids) = ids {
                cases = select_ids(&category, cases, &ids);
            }

            if allow_overwrite {
                if !selection.is_subset() && sink.discard(&category)? {
                    tracing::info!(category = %category, "Discarded existing results for full rerun");
                    plan.discarded.push(category.clone());
                }
            } else {
                let existing = sink.existing_ids(&category)?;
                let before = cases.len();
                cases.retain(|case| !existing.contains(&case.id));
                plan.already_done += before - cases.len();
            }

            tracing::debug!(category = %category, remaining = cases.len(), "Planned category");
            plan.cases.extend(cases);
            plan.categories.push(category);
        }

        Ok(plan)
    }

    /// Category -> optional id filter, in request order
    fn requested(&self, selection: &Selection) -> Result<IndexMap<String, Option<Vec<String>>>, CorpusError> {
        match selection {
            Selection::Categories(args) => Ok(self
                .corpus
                .resolve_categories(args)?
                .into_iter()
                .map(|c| (c, None))
                .collect()),
            Selection::IdFile => {
                let mut requested = IndexMap::new();
                for (category, ids) in self.corpus.load_subset_ids()? {
                    if ids.is_empty() {
                        continue;
                    }
                    self.corpus.test_file(&category)?;
                    requested.insert(category, Some(ids));
                }
                Ok(requested)
            }
        }
    }
}

fn select_ids(category: &str, cases: Vec<TestCase>, ids: &[String]) -> Vec<TestCase> {
    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let selected: Vec<TestCase> = cases.into_iter().filter(|c| wanted.contains(c.id.as_str())).collect();

    if selected.len() < wanted.len() {
        let found: HashSet<&str> = selected.iter().map(|c| c.id.as_str()).collect();
        let missing: Vec<&str> = ids.iter().map(String::as_str).filter(|id| !found.contains(id)).collect();
        tracing::warn!(category, ?missing, "Requested ids not found in the corpus");
    }
    selected
}
