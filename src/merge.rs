//! Merge stage: group dated job outputs by `(prefix, date, suffix)` and combine each group
//! into `merged/<prefix>_<date>.<suffix>` with an external merge tool.
//!
//! Output names look like `<prefix>_<YYYYMMDD>_<RRRRRR>_<n>.<suffix>`; the 6-digit run id
//! and the chunk index are dropped for grouping, so all runs of one day merge together.

use crate::concurrency::{bounded_pool, CancelToken};
use crate::paths::OutputLayout;
use crate::pool::detach_from_terminal_group;
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use walkdir::WalkDir;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MergeKey {
    pub prefix: String,
    pub date: String,
    pub suffix: String,
}

impl MergeKey {
    pub fn new(prefix: impl Into<String>, date: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), date: date.into(), suffix: suffix.into() }
    }

    /// File name of the merged artifact, `<prefix>_<date>.<suffix>`.
    pub fn target_name(&self) -> String {
        format!("{}_{}.{}", self.prefix, self.date, self.suffix)
    }
}

impl fmt::Display for MergeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.target_name())
    }
}

/// Why a file name is not a dated job output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unmatched {
    NotUtf8,
    NoSuffix,
    MissingFields,
    EmptyPrefix,
    BadDate,
    BadRunId,
    BadChunkIndex,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedName {
    Matched(MergeKey),
    Unmatched(Unmatched),
}

fn all_digits(s: &str, len: Option<usize>) -> bool {
    !s.is_empty() && len.map_or(true, |n| s.len() == n) && s.bytes().all(|b| b.is_ascii_digit())
}

/// Parse `<prefix>_<8 digits>_<6 digits>_<digits>.<word>`.
///
/// The prefix may itself contain underscores; the three numeric fields are taken from the
/// right.
pub fn parse_output_name(name: &str) -> ParsedName {
    let Some((stem, suffix)) = name.rsplit_once('.') else {
        return ParsedName::Unmatched(Unmatched::NoSuffix);
    };
    if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return ParsedName::Unmatched(Unmatched::NoSuffix);
    }
    let mut fields = stem.rsplitn(4, '_');
    let (Some(chunk), Some(run), Some(date), Some(prefix)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return ParsedName::Unmatched(Unmatched::MissingFields);
    };
    if !all_digits(chunk, None) {
        return ParsedName::Unmatched(Unmatched::BadChunkIndex);
    }
    if !all_digits(run, Some(6)) {
        return ParsedName::Unmatched(Unmatched::BadRunId);
    }
    if !all_digits(date, Some(8)) {
        return ParsedName::Unmatched(Unmatched::BadDate);
    }
    if prefix.is_empty() {
        return ParsedName::Unmatched(Unmatched::EmptyPrefix);
    }
    ParsedName::Matched(MergeKey::new(prefix, date, suffix))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeGroup {
    pub key: MergeKey,
    pub members: Vec<PathBuf>, // sorted
}

/// Result of scanning an output directory. Unmatched names are kept only so they can be
/// counted and logged; they never join a group.
#[derive(Clone, Debug, Default)]
pub struct Grouping {
    pub groups: Vec<MergeGroup>, // ordered by key
    pub unmatched: Vec<(PathBuf, Unmatched)>,
}

/// Group the files directly under `dir` by merge key.
pub fn group_outputs(dir: &Path) -> Result<Grouping> {
    let mut by_key: BTreeMap<MergeKey, Vec<PathBuf>> = BTreeMap::new();
    let mut unmatched = Vec::new();
    if !dir.is_dir() {
        return Ok(Grouping::default());
    }
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let ent = entry.with_context(|| format!("scan {}", dir.display()))?;
        if !ent.file_type().is_file() {
            continue;
        }
        let parsed = match ent.file_name().to_str() {
            Some(name) => parse_output_name(name),
            None => ParsedName::Unmatched(Unmatched::NotUtf8),
        };
        match parsed {
            ParsedName::Matched(key) => by_key.entry(key).or_default().push(ent.path().to_path_buf()),
            ParsedName::Unmatched(why) => unmatched.push((ent.path().to_path_buf(), why)),
        }
    }
    let groups = by_key
        .into_iter()
        .map(|(key, mut members)| {
            members.sort();
            MergeGroup { key, members }
        })
        .collect();
    unmatched.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(Grouping { groups, unmatched })
}

/// External merge program, invoked as `program [force_flag] <target> <member>...`.
#[derive(Clone, Debug)]
pub struct MergeTool {
    pub program: PathBuf,
    pub force_flag: Option<String>,
}

impl MergeTool {
    pub fn new(program: impl AsRef<Path>, force_flag: Option<String>) -> Self {
        Self { program: program.as_ref().to_path_buf(), force_flag }
    }

    /// ROOT's `hadd -f`.
    pub fn hadd() -> Self {
        Self::new("hadd", Some("-f".to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeOutcome {
    Merged,
    AlreadyPresent,
    Failed { code: Option<i32> },
    SpawnFailed { error: String },
    Cancelled,
}

#[derive(Clone, Debug, Serialize)]
pub struct MergeResult {
    pub key: MergeKey,
    pub target: PathBuf,
    pub members: usize,
    pub outcome: MergeOutcome,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct MergeReport {
    pub results: Vec<MergeResult>, // ordered by key
    pub unmatched: usize,
    pub cancelled: bool, // token was set by the time the stage ended
}

impl MergeReport {
    pub fn count(&self, pred: impl Fn(&MergeOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

#[derive(Clone, Debug)]
pub struct MergeCoordinator {
    tool: MergeTool,
    workers: usize,
}

impl MergeCoordinator {
    pub fn new(tool: MergeTool, workers: usize) -> Self {
        Self { tool, workers: workers.max(1) }
    }

    /// Merge every group found in `layout.root()`; see [`MergeCoordinator::run_with`].
    pub fn run(&self, layout: &OutputLayout, cancel: &CancelToken) -> Result<MergeReport> {
        self.run_with(layout, cancel, |_| {})
    }

    /// Scan, group and merge, calling `on_done` as each group finishes. Groups whose
    /// target already exists are skipped without running the tool.
    pub fn run_with<F>(&self, layout: &OutputLayout, cancel: &CancelToken, on_done: F) -> Result<MergeReport>
    where
        F: Fn(&MergeResult) + Sync,
    {
        let grouping = group_outputs(layout.root())?;
        for (path, why) in &grouping.unmatched {
            tracing::debug!(path=%path.display(), reason=?why, "not a dated output; left out of merging");
        }
        let unmatched = grouping.unmatched.len();
        if grouping.groups.is_empty() {
            tracing::info!(unmatched, "no merge groups found");
            return Ok(MergeReport { results: Vec::new(), unmatched, cancelled: cancel.is_cancelled() });
        }

        let merged_dir = layout.merged_dir();
        fs::create_dir_all(&merged_dir)
            .with_context(|| format!("create {}", merged_dir.display()))?;
        tracing::info!(groups = grouping.groups.len(), unmatched, "merging outputs");

        let pool = bounded_pool(self.workers.min(grouping.groups.len()), "merge")?;
        let results: Vec<MergeResult> = pool.install(|| {
            grouping
                .groups
                .par_iter()
                .map(|group| {
                    let res = self.merge_group(group, &merged_dir, cancel);
                    on_done(&res);
                    res
                })
                .collect()
        });
        let cancelled = cancel.is_cancelled();
        if cancelled {
            tracing::warn!(
                skipped = results.iter().filter(|r| r.outcome == MergeOutcome::Cancelled).count(),
                "merge stage interrupted"
            );
        }
        Ok(MergeReport { results, unmatched, cancelled })
    }

    fn merge_group(&self, group: &MergeGroup, merged_dir: &Path, cancel: &CancelToken) -> MergeResult {
        let target = merged_dir.join(group.key.target_name());
        let outcome = if target.exists() {
            tracing::debug!(output=%target.display(), "merged output already present");
            MergeOutcome::AlreadyPresent
        } else if cancel.is_cancelled() {
            MergeOutcome::Cancelled
        } else {
            match self.invoke(&target, &group.members) {
                Ok(status) if status.success() => MergeOutcome::Merged,
                Ok(status) => {
                    tracing::warn!(output=%target.display(), %status, "merge tool failed");
                    MergeOutcome::Failed { code: status.code() }
                }
                Err(e) => {
                    tracing::warn!(output=%target.display(), error=%format!("{e:#}"), "merge tool could not be started");
                    MergeOutcome::SpawnFailed { error: format!("{e:#}") }
                }
            }
        };
        MergeResult { key: group.key.clone(), target, members: group.members.len(), outcome }
    }

    fn invoke(&self, target: &Path, members: &[PathBuf]) -> Result<std::process::ExitStatus> {
        let mut log_name = target.as_os_str().to_owned();
        log_name.push(".log");
        let log_path = PathBuf::from(log_name);
        let log = File::create(&log_path).with_context(|| format!("create log {}", log_path.display()))?;
        let log_err = log.try_clone().with_context(|| format!("clone log handle {}", log_path.display()))?;

        let mut cmd = Command::new(&self.tool.program);
        if let Some(flag) = &self.tool.force_flag {
            cmd.arg(flag);
        }
        cmd.arg(target)
            .args(members)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        detach_from_terminal_group(&mut cmd);
        let status = cmd
            .status()
            .with_context(|| format!("run {}", self.tool.program.display()))?;
        Ok(status)
    }
}
