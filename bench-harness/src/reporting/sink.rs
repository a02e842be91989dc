//! Persisted per-provider, per-category result files

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use indexmap::IndexMap;

use crate::cases::{category_of, parse_json_lines, CorpusError, ExecutionResult};
use crate::config::CorpusConfig;

/// Error type for result persistence
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read existing results: {0}")]
    Load(#[from] CorpusError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("No result file for category: {0}")]
    UnknownCategory(String),
}

/// How a result reaches its file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// New cases only; the caller guarantees the id is not in the file yet
    Append,
    /// Subset rerun; overwrite the entry in place, keep everything else
    Merge,
}

/// Writer for one provider's result directory.
///
/// Each category owns one JSON-lines file. A write is complete on disk before
/// it returns, so an interrupted run leaves a prefix of its results behind
/// and nothing else.
#[derive(Debug)]
pub struct ResultSink {
    dir: PathBuf,
    files: IndexMap<String, String>,
    mode: WriteMode,
    write_lock: Mutex<()>,
}

impl ResultSink {
    pub fn new(result_dir: &Path, model_name: &str, corpus: &CorpusConfig, mode: WriteMode) -> Self {
        let files = corpus
            .test_files
            .iter()
            .map(|(category, file)| (category.clone(), result_file_name(file)))
            .collect();

        Self {
            dir: result_dir.join(model_dir_name(model_name)),
            files,
            mode,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    pub fn result_file(&self, category: &str) -> Result<PathBuf, SinkError> {
        self.files
            .get(category)
            .map(|file| self.dir.join(file))
            .ok_or_else(|| SinkError::UnknownCategory(category.to_string()))
    }

    /// Previously persisted results of a category, empty if there is no file.
    ///
    /// A final line torn by an interrupted append is cut from the file, so
    /// that case is planned again.
    pub fn existing(&self, category: &str) -> Result<Vec<ExecutionResult>, SinkError> {
        let path = self.result_file(category)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        read_results(&path)
    }

    pub fn existing_ids(&self, category: &str) -> Result<HashSet<String>, SinkError> {
        Ok(self.existing(category)?.into_iter().map(|r| r.id).collect())
    }

    /// Delete a category's result file. Returns true if one existed.
    pub fn discard(&self, category: &str) -> Result<bool, SinkError> {
        let path = self.result_file(category)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|source| SinkError::Io { path, source })?;
        Ok(true)
    }

    /// Persist one result into its category file
    pub fn write(&self, result: &ExecutionResult) -> Result<(), SinkError> {
        let path = self.result_file(category_of(&result.id))?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SinkError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        match self.mode {
            WriteMode::Append => append_line(&path, result),
            WriteMode::Merge => merge_in_place(&path, result),
        }
    }
}

/// Directory-safe form of a model name
pub fn model_dir_name(model_name: &str) -> String {
    model_name.replace('/', "_")
}

/// `BFCL_v3_simple.json` -> `BFCL_v3_simple_result.json`
pub fn result_file_name(test_file: &str) -> String {
    match test_file.strip_suffix(".json") {
        Some(stem) => format!("{}_result.json", stem),
        None => format!("{}_result.json", test_file),
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SinkError + '_ {
    move |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Parse a result file, truncating an unterminated final line that does not
/// parse
fn read_results(path: &Path) -> Result<Vec<ExecutionResult>, SinkError> {
    let content = fs::read_to_string(path).map_err(io_err(path))?;
    let complete = content.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let tail = &content[complete..];

    if tail.trim().is_empty() || serde_json::from_str::<ExecutionResult>(tail).is_ok() {
        return Ok(parse_json_lines(path, &content)?);
    }

    tracing::warn!(
        file = %path.display(),
        bytes = tail.len(),
        "Dropping incomplete last line left by an interrupted write"
    );
    let file = OpenOptions::new().write(true).open(path).map_err(io_err(path))?;
    file.set_len(complete as u64).map_err(io_err(path))?;
    file.sync_data().map_err(io_err(path))?;

    Ok(parse_json_lines(path, &content[..complete])?)
}

fn append_line(path: &Path, result: &ExecutionResult) -> Result<(), SinkError> {
    let line = serde_json::to_string(result)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err(path))?;
    writeln!(file, "{}", line).map_err(io_err(path))?;
    file.sync_data().map_err(io_err(path))
}

/// Replace the entry with the same id where it stands; an id not yet present
/// goes to its sort-key position. The file is swapped in atomically.
fn merge_in_place(path: &Path, result: &ExecutionResult) -> Result<(), SinkError> {
    let mut entries = if path.exists() {
        read_results(path)?
    } else {
        Vec::new()
    };

    match entries.iter().position(|e| e.id == result.id) {
        Some(pos) => entries[pos] = result.clone(),
        None => {
            let key = result.sort_key();
            let pos = entries
                .iter()
                .position(|e| e.sort_key() > key)
                .unwrap_or(entries.len());
            entries.insert(pos, result.clone());
        }
    }

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        for entry in &entries {
            writeln!(file, "{}", serde_json::to_string(entry)?).map_err(io_err(&tmp))?;
        }
        file.sync_data().map_err(io_err(&tmp))?;
    }
    fs::rename(&tmp, path).map_err(io_err(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sink(dir: &Path, mode: WriteMode) -> ResultSink {
        ResultSink::new(dir, "org/model-7b", &CorpusConfig::default(), mode)
    }

    fn result(id: &str, text: &str) -> ExecutionResult {
        ExecutionResult::new(id, Value::from(text), IndexMap::new())
    }

    fn ids_in(sink: &ResultSink, category: &str) -> Vec<String> {
        sink.existing(category).unwrap().into_iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_layout() {
        let dir = tempfile::tempdir().unwrap();
        let s = sink(dir.path(), WriteMode::Append);
        assert!(s.dir().ends_with("org_model-7b"));
        assert!(s
            .result_file("simple")
            .unwrap()
            .ends_with("org_model-7b/BFCL_v3_simple_result.json"));
        assert!(matches!(s.result_file("nope"), Err(SinkError::UnknownCategory(_))));
    }

    #[test]
    fn test_append_routes_by_category() {
        let dir = tempfile::tempdir().unwrap();
        let s = sink(dir.path(), WriteMode::Append);
        s.write(&result("simple_0", "a")).unwrap();
        s.write(&result("multiple_0", "b")).unwrap();
        s.write(&result("simple_1", "c")).unwrap();

        assert_eq!(ids_in(&s, "simple"), vec!["simple_0", "simple_1"]);
        assert_eq!(ids_in(&s, "multiple"), vec!["multiple_0"]);
        assert!(s.existing("parallel").unwrap().is_empty());
    }

    #[test]
    fn test_merge_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let append = sink(dir.path(), WriteMode::Append);
        for id in ["simple_0", "simple_1", "simple_2"] {
            append.write(&result(id, "old")).unwrap();
        }

        let merge = sink(dir.path(), WriteMode::Merge);
        merge.write(&result("simple_1", "new")).unwrap();

        let entries = merge.existing("simple").unwrap();
        let ids: Vec<_> = entries.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["simple_0", "simple_1", "simple_2"]);
        assert_eq!(entries[1].result, Value::from("new"));
        assert_eq!(entries[0].result, Value::from("old"));
    }

    #[test]
    fn test_merge_inserts_missing_id_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let append = sink(dir.path(), WriteMode::Append);
        append.write(&result("simple_0", "x")).unwrap();
        append.write(&result("simple_5", "x")).unwrap();

        let merge = sink(dir.path(), WriteMode::Merge);
        merge.write(&result("simple_3", "y")).unwrap();
        merge.write(&result("simple_9", "y")).unwrap();
        assert_eq!(ids_in(&merge, "simple"), vec!["simple_0", "simple_3", "simple_5", "simple_9"]);
        assert!(!merge.result_file("simple").unwrap().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_discard() {
        let dir = tempfile::tempdir().unwrap();
        let s = sink(dir.path(), WriteMode::Append);
        assert!(!s.discard("simple").unwrap());
        s.write(&result("simple_0", "a")).unwrap();
        assert!(s.discard("simple").unwrap());
        assert!(s.existing_ids("simple").unwrap().is_empty());
    }

    #[test]
    fn test_metadata_persisted_flat() {
        let dir = tempfile::tempdir().unwrap();
        let s = sink(dir.path(), WriteMode::Append);
        let mut meta = IndexMap::new();
        meta.insert("input_token_count".to_string(), Value::from(10));
        s.write(&ExecutionResult::new("simple_0", Value::from("ok"), meta)).unwrap();

        let raw = fs::read_to_string(s.result_file("simple").unwrap()).unwrap();
        assert_eq!(raw.trim(), r#"{"id":"simple_0","result":"ok","input_token_count":10}"#);
    }

    #[test]
    fn test_torn_last_line_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let s = sink(dir.path(), WriteMode::Append);
        s.write(&result("simple_0", "a")).unwrap();
        let path = s.result_file("simple").unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, r#"{{"id":"simple_1","res"#).unwrap();
        drop(file);

        assert_eq!(ids_in(&s, "simple"), vec!["simple_0"]);

        s.write(&result("simple_1", "b")).unwrap();
        assert_eq!(ids_in(&s, "simple"), vec!["simple_0", "simple_1"]);
    }

    #[test]
    fn test_corrupt_complete_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let s = sink(dir.path(), WriteMode::Append);
        s.write(&result("simple_0", "a")).unwrap();
        let path = s.result_file("simple").unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "not json").unwrap();
        drop(file);

        assert!(matches!(s.existing("simple"), Err(SinkError::Load(_))));
    }
}
