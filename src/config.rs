use crate::pool::CancelMode;
use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// User-facing options with sensible defaults and builder chaining.
///
/// Every field can also come from a JSON config file; missing keys keep their default.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubmitOptions {
    pub data_dir: PathBuf,
    pub input_pattern: String,        // regex matched against file names in data_dir
    pub output_dir: PathBuf,
    pub executable: PathBuf,          // analysis executable run once per chunk
    pub chunk_size: u64,              // max records per job
    pub workers: usize,               // concurrent analysis processes
    pub max_datasets: Option<usize>,  // None = every discovered dataset

    // merge stage
    pub merge: bool,
    pub merge_workers: usize,
    pub merge_program: PathBuf,
    pub merge_force_flag: Option<String>,

    pub cancel_mode: CancelMode,
    pub tree_name: String,            // tree read by the generated entry-count macro
    pub dry_run: bool,
    pub progress: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            input_pattern: r"\.root$".to_string(),
            output_dir: PathBuf::from("./calibration-data"),
            executable: PathBuf::from("./alignment"),
            chunk_size: 100_000,
            workers: 10,
            max_datasets: None,

            merge: false,
            merge_workers: 4,
            merge_program: PathBuf::from("hadd"),
            merge_force_flag: Some("-f".to_string()),

            cancel_mode: CancelMode::Drain,
            tree_name: "SNM".to_string(),
            dry_run: false,
            progress: true,
        }
    }
}

impl SubmitOptions {
    /// Load options from a JSON file. Keys that are absent keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let opts: SubmitOptions = serde_json::from_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(opts.clamped())
    }

    fn clamped(mut self) -> Self {
        self.chunk_size = self.chunk_size.max(1);
        self.workers = self.workers.max(1);
        self.merge_workers = self.merge_workers.max(1);
        self
    }

    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn with_input_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.input_pattern = pattern.into();
        self
    }
    pub fn with_output_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.output_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn with_executable(mut self, exe: impl AsRef<Path>) -> Self {
        self.executable = exe.as_ref().to_path_buf();
        self
    }
    pub fn with_chunk_size(mut self, records: u64) -> Self {
        self.chunk_size = records.max(1);
        self
    }
    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n.max(1);
        self
    }
    pub fn with_max_datasets(mut self, n: Option<usize>) -> Self {
        self.max_datasets = n;
        self
    }
    pub fn with_merge(mut self, yes: bool) -> Self {
        self.merge = yes;
        self
    }
    pub fn with_merge_workers(mut self, n: usize) -> Self {
        self.merge_workers = n.max(1);
        self
    }
    pub fn with_merge_tool(mut self, program: impl AsRef<Path>, force_flag: Option<String>) -> Self {
        self.merge_program = program.as_ref().to_path_buf();
        self.merge_force_flag = force_flag;
        self
    }
    pub fn with_cancel_mode(mut self, mode: CancelMode) -> Self {
        self.cancel_mode = mode;
        self
    }
    pub fn with_tree_name(mut self, tree: impl Into<String>) -> Self {
        self.tree_name = tree.into();
        self
    }
    pub fn with_dry_run(mut self, yes: bool) -> Self {
        self.dry_run = yes;
        self
    }
    pub fn with_progress(mut self, yes: bool) -> Self {
        self.progress = yes;
        self
    }

    /// Compile the input file-name pattern.
    pub fn input_regex(&self) -> Result<Regex> {
        Regex::new(&self.input_pattern)
            .with_context(|| format!("invalid input pattern {:?}", self.input_pattern))
    }

    /// Fatal configuration checks performed before any dataset is touched.
    pub fn validate(&self) -> Result<()> {
        if !self.data_dir.is_dir() {
            bail!("data directory {} does not exist", self.data_dir.display());
        }
        if self.executable.as_os_str().is_empty() {
            bail!("no analysis executable configured");
        }
        self.input_regex()?;
        Ok(())
    }
}
