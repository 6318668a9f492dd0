use crate::concurrency::CancelToken;
use crate::config::SubmitOptions;
use crate::counter::RecordCounter;
use crate::guard::existing_output;
use crate::merge::{group_outputs, MergeCoordinator, MergeOutcome, MergeReport, MergeTool};
use crate::paths::{discover_datasets, OutputLayout};
use crate::plan::{Dataset, JobPlanner};
use crate::pool::{CancelMode, JobOutcome, PoolEvent, PoolReport, WorkerPool};
use crate::progress::maybe_count_progress;
use crate::report::{now_rfc3339, RunPlan, RunReport, SkipReason, SkippedDataset};
use crate::util::{ensure_dir, init_tracing_once};
use anyhow::Result;
use std::path::Path;

/// Entry point: configure with the builder methods, then `plan`, `run` or `merge_outputs`.
#[derive(Clone, Debug, Default)]
pub struct Submitter {
    pub(crate) opts: SubmitOptions,
}

impl Submitter {
    pub fn new() -> Self {
        Self { opts: SubmitOptions::default() }
    }

    pub fn from_options(opts: SubmitOptions) -> Self {
        Self { opts }
    }

    // -------- Builder methods --------
    pub fn data_dir(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_data_dir(dir); self }
    pub fn input_pattern(mut self, pattern: impl Into<String>) -> Self { self.opts = self.opts.with_input_pattern(pattern); self }
    pub fn output_dir(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_output_dir(dir); self }
    pub fn executable(mut self, exe: impl AsRef<Path>) -> Self { self.opts = self.opts.with_executable(exe); self }
    pub fn chunk_size(mut self, records: u64) -> Self { self.opts = self.opts.with_chunk_size(records); self }
    pub fn workers(mut self, n: usize) -> Self { self.opts = self.opts.with_workers(n); self }
    pub fn max_datasets(mut self, n: Option<usize>) -> Self { self.opts = self.opts.with_max_datasets(n); self }
    pub fn merge(mut self, yes: bool) -> Self { self.opts = self.opts.with_merge(yes); self }
    pub fn merge_workers(mut self, n: usize) -> Self { self.opts = self.opts.with_merge_workers(n); self }
    pub fn merge_tool(mut self, program: impl AsRef<Path>, force_flag: Option<String>) -> Self { self.opts = self.opts.with_merge_tool(program, force_flag); self }
    pub fn cancel_mode(mut self, mode: CancelMode) -> Self { self.opts = self.opts.with_cancel_mode(mode); self }
    pub fn tree_name(mut self, tree: impl Into<String>) -> Self { self.opts = self.opts.with_tree_name(tree); self }
    pub fn dry_run(mut self, yes: bool) -> Self { self.opts = self.opts.with_dry_run(yes); self }
    pub fn progress(mut self, yes: bool) -> Self { self.opts = self.opts.with_progress(yes); self }

    pub fn options(&self) -> &SubmitOptions {
        &self.opts
    }

    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(&self.opts.output_dir)
    }

    /// Discover datasets and plan their jobs, strictly one dataset after another.
    ///
    /// A dataset with existing output is skipped before the counter is called; a dataset
    /// whose count comes back as 0 is skipped before planning. Neither touches the offset.
    pub fn plan<C>(&self, counter: &C, cancel: &CancelToken) -> Result<RunPlan>
    where
        C: RecordCounter + ?Sized,
    {
        init_tracing_once();
        self.opts.validate()?;
        let pattern = self.opts.input_regex()?;
        let files = discover_datasets(&self.opts.data_dir, &pattern, self.opts.max_datasets);

        if files.is_empty() {
            tracing::warn!(dir=%self.opts.data_dir.display(), pattern=%self.opts.input_pattern, "No datasets found. Check data_dir and input_pattern.");
        } else {
            tracing::info!("Found {} datasets to consider.", files.len());
        }

        let mut planner = JobPlanner::new(self.layout(), &self.opts.executable, self.opts.chunk_size);
        let mut plan = RunPlan::default();

        for file in &files {
            if cancel.is_cancelled() {
                plan.cancelled = true;
                tracing::warn!("planning interrupted; nothing will be dispatched");
                break;
            }
            if let Some(existing) = existing_output(&self.opts.output_dir, &file.base) {
                tracing::info!(dataset=%file.path.display(), existing=%existing.display(), "Skipping dataset, output already exists");
                plan.skipped.push(SkippedDataset {
                    path: file.path.clone(),
                    reason: SkipReason::AlreadyProcessed { existing },
                });
                continue;
            }

            let records = counter.count_records(&file.path);
            if records == 0 {
                tracing::warn!(dataset=%file.path.display(), "Skipping dataset, could not determine entries");
                plan.skipped.push(SkippedDataset { path: file.path.clone(), reason: SkipReason::NoRecords });
                continue;
            }

            let dataset = Dataset { path: file.path.clone(), base: file.base.clone(), records };
            let jobs = planner.plan_dataset(&dataset);
            tracing::info!(dataset=%dataset.base, records, jobs = jobs.len(), offset = jobs.first().map(|j| j.offset).unwrap_or(0), "planned");
            plan.jobs.extend(jobs);
            plan.datasets_planned += 1;
        }

        plan.final_offset = planner.offset();
        Ok(plan)
    }

    /// Plan, dispatch every job through the worker pool, then merge if enabled.
    ///
    /// With `dry_run` the planned command lines are printed and nothing is executed or
    /// written. Otherwise a run summary lands in `logs/run-summary.json`.
    pub fn run<C>(&self, counter: &C, cancel: &CancelToken) -> Result<RunReport>
    where
        C: RecordCounter + ?Sized,
    {
        let started_at = now_rfc3339();
        let plan = self.plan(counter, cancel)?;
        let jobs_planned = plan.jobs.len();
        tracing::info!(jobs = jobs_planned, datasets = plan.datasets_planned, skipped = plan.skipped.len(), total_records = plan.final_offset.value(), "planning complete");

        if self.opts.dry_run {
            for job in &plan.jobs {
                println!("{}", job.command_line());
            }
            return Ok(RunReport {
                started_at,
                finished_at: now_rfc3339(),
                dry_run: true,
                jobs_planned,
                plan,
                pool: PoolReport::default(),
                merge: None,
            });
        }

        let layout = self.layout();
        ensure_dir(&layout.logs_dir())?;

        let pool = if plan.cancelled || plan.jobs.is_empty() {
            PoolReport::default()
        } else {
            self.dispatch(&plan, cancel)?
        };

        // An interrupted run still goes through the merge stage: groups are then reported
        // as cancelled without invoking the tool.
        let merge = if self.opts.merge {
            Some(self.merge_outputs(cancel)?)
        } else {
            None
        };

        let report = RunReport {
            started_at,
            finished_at: now_rfc3339(),
            dry_run: false,
            jobs_planned,
            plan,
            pool,
            merge,
        };
        report.write_summary(&layout.summary_path())?;
        Ok(report)
    }

    fn dispatch(&self, plan: &RunPlan, cancel: &CancelToken) -> Result<PoolReport> {
        let pool = WorkerPool::new(self.opts.workers, self.opts.cancel_mode);
        let pb = maybe_count_progress(self.opts.progress, plan.jobs.len() as u64, "Jobs");

        let report = pool.run(&plan.jobs, cancel, |event| match event {
            PoolEvent::Started { job, .. } => {
                tracing::info!(job=%job.label, start = job.start, end = job.end, "Processing");
            }
            PoolEvent::Finished(res) => {
                match &res.outcome {
                    JobOutcome::Exited { code: Some(0) } => {
                        tracing::info!(job=%res.job.label, secs = res.elapsed_secs, "job finished");
                    }
                    other => {
                        tracing::warn!(job=%res.job.label, outcome=?other, log=%res.log_path().display(), "job did not succeed");
                    }
                }
                if let Some(pb) = &pb {
                    pb.inc(1);
                }
            }
        })?;

        if let Some(pb) = pb {
            pb.finish_with_message(if report.cancelled { "interrupted" } else { "done" });
        }
        let failed = report.failed().count();
        if failed > 0 {
            tracing::warn!(failed, "some jobs did not exit cleanly; see their logs");
        }
        Ok(report)
    }

    /// Group the dated outputs in `output_dir` and merge each day into `merged/`.
    pub fn merge_outputs(&self, cancel: &CancelToken) -> Result<MergeReport> {
        init_tracing_once();
        let tool = MergeTool::new(&self.opts.merge_program, self.opts.merge_force_flag.clone());
        let coordinator = MergeCoordinator::new(tool, self.opts.merge_workers);
        let layout = self.layout();
        let groups = group_outputs(layout.root())?.groups.len();
        let pb = maybe_count_progress(self.opts.progress, groups as u64, "Merges");
        let report = coordinator.run_with(&layout, cancel, |res| {
            match &res.outcome {
                MergeOutcome::Merged => tracing::info!(output=%res.target.display(), members = res.members, "merged"),
                MergeOutcome::AlreadyPresent => tracing::info!(output=%res.target.display(), "Skipping merge, target exists"),
                other => tracing::warn!(output=%res.target.display(), outcome=?other, "merge not completed"),
            }
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        })?;
        if let Some(pb) = pb {
            pb.finish_with_message("merged");
        }
        tracing::info!(
            merged = report.count(|o| *o == MergeOutcome::Merged),
            present = report.count(|o| *o == MergeOutcome::AlreadyPresent),
            unmatched = report.unmatched,
            "merge complete"
        );
        Ok(report)
    }
}
