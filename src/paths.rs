use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One input file selected for processing, before its record count is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetFile {
    pub path: PathBuf,
    pub base: String, // file name without extension
}

/// List the files directly under `dir` whose names match `pattern`, sorted by path and
/// truncated to `limit` when set.
pub fn discover_datasets(dir: &Path, pattern: &Regex, limit: Option<usize>) -> Vec<DatasetFile> {
    let mut found = Vec::new();
    if !dir.exists() {
        return found;
    }
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let Ok(ent) = entry else { continue };
        if !ent.file_type().is_file() {
            continue;
        }
        let Some(name) = ent.file_name().to_str() else { continue };
        if !pattern.is_match(name) {
            continue;
        }
        let base = match ent.path().file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };
        found.push(DatasetFile { path: ent.path().to_path_buf(), base });
    }
    found.sort_by(|a, b| a.path.cmp(&b.path));
    if let Some(n) = limit {
        found.truncate(n);
    }
    found
}

/// Where everything produced by a run lands.
///
/// ```text
/// <output>/<base>[_NNNN].<ext>          job outputs (written by the analysis executable)
/// <output>/logs/<base>[_NNNN].log       per-job logs
/// <output>/merged/<prefix>_<date>.<ext> merged outputs (+ .log)
/// ```
#[derive(Clone, Debug)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn merged_dir(&self) -> PathBuf {
        self.root.join("merged")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.logs_dir().join("run-summary.json")
    }

    /// Output prefix handed to the analysis executable, e.g. `<output>/run42_0003`.
    pub fn output_prefix(&self, base: &str, seq: Option<u32>) -> PathBuf {
        self.root.join(job_label(base, seq))
    }

    pub fn log_path(&self, base: &str, seq: Option<u32>) -> PathBuf {
        self.logs_dir().join(format!("{}.log", job_label(base, seq)))
    }
}

/// `base` or `base_NNNN` for multi-chunk datasets.
pub fn job_label(base: &str, seq: Option<u32>) -> String {
    match seq {
        Some(i) => format!("{base}_{i:04}"),
        None => base.to_string(),
    }
}
