use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// First file directly under `output_dir` produced for dataset `base`, if any.
///
/// Matches `<base>.*` (single-chunk output) and `<base>_*` (chunk outputs), so `run1`
/// does not claim `run10_0000.root`. Any earlier output for the dataset, complete or not,
/// marks the whole dataset as done. Sub-directories (`logs/`, `merged/`) are not looked at.
pub fn existing_output(output_dir: &Path, base: &str) -> Option<PathBuf> {
    if !output_dir.is_dir() {
        return None;
    }
    let mut hits: Vec<PathBuf> = WalkDir::new(output_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_str().is_some_and(|n| is_output_of(n, base)))
        .map(|e| e.path().to_path_buf())
        .collect();
    hits.sort();
    hits.into_iter().next()
}

fn is_output_of(name: &str, base: &str) -> bool {
    name.strip_prefix(base)
        .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('_'))
}
