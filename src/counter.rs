//! Record counting: ask an external tool how many entries a dataset holds.
//!
//! Any failure (tool missing, non-zero exit, unparsable output) degrades to a count of 0,
//! which callers treat as "cannot process this dataset".

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Placeholder replaced by the dataset path in counter argument templates.
pub const PATH_TOKEN: &str = "{path}";

/// Anything that can report how many records a dataset holds.
pub trait RecordCounter: Sync {
    fn count_records(&self, path: &Path) -> u64;
}

impl<F> RecordCounter for F
where
    F: Fn(&Path) -> u64 + Sync,
{
    fn count_records(&self, path: &Path) -> u64 {
        self(path)
    }
}

/// Counter backed by an external program that prints the count as its last line.
#[derive(Clone, Debug)]
pub struct ExternalCounter {
    program: PathBuf,
    args: Vec<String>,
}

const ENTRIES_MACRO: &str = r#"void GetEntries(const char* filename) {
  TFile *file = TFile::Open(filename, "read");
  if (!file || file->IsZombie()) {
    std::cout << "0" << std::endl;
    return;
  }
  TTree *tree = (TTree*) file->Get("__TREE__");
  if (!tree) {
    std::cout << "0" << std::endl;
    return;
  }
  std::cout << tree->GetEntries() << std::endl;
  file->Close();
}
"#;

impl ExternalCounter {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self { program: program.as_ref().to_path_buf(), args: Vec::new() }
    }

    /// Append an argument; `{path}` inside it is replaced by the dataset path.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Write the `GetEntries.C` macro into `work_dir` and return a counter that runs it
    /// through `root -l -b -q`.
    pub fn root_macro(work_dir: &Path, tree_name: &str) -> Result<Self> {
        fs::create_dir_all(work_dir)
            .with_context(|| format!("create {}", work_dir.display()))?;
        let macro_path = work_dir.join("GetEntries.C");
        fs::write(&macro_path, ENTRIES_MACRO.replace("__TREE__", tree_name))
            .with_context(|| format!("write {}", macro_path.display()))?;
        Ok(Self::new("root")
            .arg("-l")
            .arg("-b")
            .arg("-q")
            .arg(format!("{}(\"{PATH_TOKEN}\")", macro_path.display())))
    }

    fn render_args(&self, path: &Path) -> Vec<String> {
        let p = path.display().to_string();
        self.args.iter().map(|a| a.replace(PATH_TOKEN, &p)).collect()
    }
}

impl RecordCounter for ExternalCounter {
    fn count_records(&self, path: &Path) -> u64 {
        let output = Command::new(&self.program)
            .args(self.render_args(path))
            .stdin(Stdio::null())
            .output();
        match output {
            Ok(out) if out.status.success() => {
                let n = parse_count_output(&String::from_utf8_lossy(&out.stdout));
                if n == 0 {
                    tracing::warn!(path=%path.display(), "record counter reported no entries");
                }
                n
            }
            Ok(out) => {
                tracing::warn!(path=%path.display(), status=%out.status, "record counter failed");
                0
            }
            Err(e) => {
                tracing::warn!(path=%path.display(), program=%self.program.display(), error=%e, "cannot run record counter");
                0
            }
        }
    }
}

/// Parse the last non-empty line of the tool's stdout as a count; anything else is 0.
pub fn parse_count_output(stdout: &str) -> u64 {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .and_then(|l| l.parse::<u64>().ok())
        .unwrap_or(0)
}
