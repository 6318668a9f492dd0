//! Run bookkeeping: what was planned, what was skipped and why, how each job ended.
//! Serialized to `logs/run-summary.json` at the end of a run.

use crate::merge::MergeReport;
use crate::plan::{JobDescriptor, RunningOffset};
use crate::pool::PoolReport;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Exit status used when a run was interrupted.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Output for this dataset already exists (first match shown).
    AlreadyProcessed { existing: PathBuf },
    /// The record counter returned 0.
    NoRecords,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedDataset {
    pub path: PathBuf,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Output of the sequential planning phase.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunPlan {
    #[serde(skip)]
    pub jobs: Vec<JobDescriptor>,
    pub datasets_planned: usize,
    pub skipped: Vec<SkippedDataset>,
    pub final_offset: RunningOffset,
    pub cancelled: bool, // interrupted before planning finished
}

#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: String,
    pub dry_run: bool,
    pub jobs_planned: usize,
    pub plan: RunPlan,
    pub pool: PoolReport,
    pub merge: Option<MergeReport>,
}

impl RunReport {
    pub fn cancelled(&self) -> bool {
        self.plan.cancelled || self.pool.cancelled || self.merge.as_ref().is_some_and(|m| m.cancelled)
    }

    /// Process exit status for the run: non-zero only when interrupted. Job exit codes are
    /// recorded in the report and logs but do not affect it.
    pub fn exit_code(&self) -> i32 {
        if self.cancelled() {
            INTERRUPTED_EXIT_CODE
        } else {
            0
        }
    }

    pub fn write_summary(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut w = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(())
    }
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}
