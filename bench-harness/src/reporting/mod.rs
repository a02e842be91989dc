//! Result persistence and run reporting

pub mod sink;

pub use sink::{model_dir_name, result_file_name, ResultSink, SinkError, WriteMode};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Outcome of one model's generation pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelReport {
    pub model: String,
    pub result_dir: PathBuf,
    /// Cases in the work set
    pub planned: usize,
    /// Selected cases skipped because a result already existed
    pub already_done: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Categories left out for missing live credentials
    pub skipped_categories: Vec<String>,
    /// Handed to a self-managed batch provider
    pub batched: bool,
}

impl ModelReport {
    pub fn new(model: impl Into<String>, result_dir: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            result_dir: result_dir.into(),
            ..Default::default()
        }
    }

    pub fn nothing_to_do(&self) -> bool {
        self.planned == 0
    }
}

/// JSON summary of a generation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub models: Vec<ModelReport>,
}

impl GenerationReport {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            models: Vec::new(),
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    pub fn total_failed(&self) -> usize {
        self.models.iter().map(|m| m.failed).sum()
    }

    /// Write to JSON file
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

/// Generate a console report
pub fn print_console_report(report: &GenerationReport) {
    println!("\n=== Generation Summary ===\n");
    println!(
        "Elapsed: {}s\n",
        (report.finished_at - report.started_at).num_seconds()
    );

    for model in &report.models {
        println!("{}:", model.model);
        if model.nothing_to_do() {
            println!("  nothing to generate ({} already done)", model.already_done);
        } else if model.batched {
            println!("  {} cases handed to batch inference", model.planned);
        } else {
            println!(
                "  planned: {}, succeeded: {}, failed: {}, already done: {}",
                model.planned, model.succeeded, model.failed, model.already_done
            );
        }
        if !model.skipped_categories.is_empty() {
            println!("  skipped (no credentials): {}", model.skipped_categories.join(", "));
        }
        println!("  results: {}", model.result_dir.display());
    }

    println!("\n{:=<50}", "");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = GenerationReport::start();
        let mut model = ModelReport::new("gpt-test", dir.path().join("gpt-test"));
        model.planned = 3;
        model.failed = 1;
        report.models.push(model);
        let report = report.finish();

        let path = dir.path().join("summary.json");
        report.write_to_file(&path).unwrap();
        let parsed: GenerationReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.models[0].planned, 3);
        assert_eq!(parsed.total_failed(), 1);
        assert!(parsed.finished_at >= parsed.started_at);
    }
}
