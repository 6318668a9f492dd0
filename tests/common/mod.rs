#![allow(dead_code)]

use parking_lot::Mutex;
use runsplit::RecordCounter;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Deterministic record counter: looks the dataset's file stem up in a table (missing = 0)
/// and remembers every path it was asked about.
pub struct FakeCounter {
    counts: HashMap<String, u64>,
    pub calls: AtomicUsize,
    pub asked: Mutex<Vec<PathBuf>>,
}

impl FakeCounter {
    pub fn new(entries: &[(&str, u64)]) -> Self {
        Self {
            counts: entries.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            calls: AtomicUsize::new(0),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RecordCounter for FakeCounter {
    fn count_records(&self, path: &Path) -> u64 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.asked.lock().push(path.to_path_buf());
        let stem = path.file_stem().unwrap().to_string_lossy().to_string();
        self.counts.get(&stem).copied().unwrap_or(0)
    }
}

/// Create empty placeholder datasets `<dir>/<name>` (contents are never read by the
/// orchestration, only by the external tools).
pub fn make_datasets(dir: &Path, names: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    for n in names {
        File::create(dir.join(n)).unwrap();
    }
}

/// Write an executable `/bin/sh` script.
#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
    path.to_path_buf()
}

/// Stand-in analysis executable: echoes its arguments to stdout, a marker to stderr,
/// and creates `<prefix>.root`.
#[cfg(unix)]
pub fn fake_analysis(dir: &Path) -> PathBuf {
    write_script(
        &dir.join("bin").join("analysis"),
        r#"echo "args: $1 $2 $3 $4 $5"
echo "to-stderr" >&2
touch "$2.root""#,
    )
}

/// Read a text file line-by-line into strings (skips empty lines).
pub fn read_lines(path: &Path) -> Vec<String> {
    let f = File::open(path).unwrap();
    let r = BufReader::new(f);
    r.lines().map(|l| l.unwrap()).filter(|s| !s.is_empty()).collect()
}

/// File names directly under `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut v: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    v.sort();
    v
}
