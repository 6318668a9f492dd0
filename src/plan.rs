//! Job planning: split each dataset's record range into bounded chunks and build one job
//! descriptor per chunk, threading the cross-dataset running offset through in order.

use crate::paths::{job_label, OutputLayout};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// An input file together with its resolved record count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dataset {
    pub path: PathBuf,
    pub base: String,
    pub records: u64,
}

/// Inclusive record range `[start, end]` handled by one job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub seq: u32,
    pub start: u64,
    pub end: u64,
}

impl Chunk {
    pub fn records(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Partition `[0, records)` into contiguous chunks of at most `chunk_size` records.
///
/// Zero records yields no chunks at all.
pub fn chunk_ranges(records: u64, chunk_size: u64) -> Vec<Chunk> {
    let size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(records.div_ceil(size).min(1 << 20) as usize);
    let mut start = 0u64;
    let mut seq = 0u32;
    while start < records {
        let end = start.saturating_add(size - 1).min(records - 1);
        chunks.push(Chunk { seq, start, end });
        if end == records - 1 {
            break;
        }
        start = end + 1;
        seq += 1;
    }
    chunks
}

/// Cumulative count of records planned so far in this run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RunningOffset(u64);

impl RunningOffset {
    pub fn value(self) -> u64 {
        self.0
    }

    fn advance(&mut self, by: u64) {
        self.0 += by;
    }
}

/// Everything needed to launch one analysis process. Built once by the planner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JobDescriptor {
    pub label: String, // `base` or `base_NNNN`
    pub executable: PathBuf,
    pub dataset: PathBuf,
    pub output_prefix: PathBuf,
    pub start: u64,
    pub end: u64,
    pub offset: u64, // running offset before this chunk
    pub log_path: PathBuf,
}

impl JobDescriptor {
    /// Arguments in the order the analysis executable expects:
    /// `dataset prefix start end offset`.
    pub fn args(&self) -> Vec<OsString> {
        vec![
            self.dataset.clone().into_os_string(),
            self.output_prefix.clone().into_os_string(),
            self.start.to_string().into(),
            self.end.to_string().into(),
            self.offset.to_string().into(),
        ]
    }

    /// Shell-like rendering for logs and dry runs.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.executable.display().to_string()];
        parts.extend(self.args().iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }

    pub fn records(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Sequential planner owning the running offset for one run.
///
/// Datasets must be fed in the order they should be numbered; the offset carried by each
/// descriptor depends on everything planned before it.
#[derive(Clone, Debug)]
pub struct JobPlanner {
    layout: OutputLayout,
    executable: PathBuf,
    chunk_size: u64,
    offset: RunningOffset,
}

impl JobPlanner {
    pub fn new(layout: OutputLayout, executable: impl AsRef<Path>, chunk_size: u64) -> Self {
        Self {
            layout,
            executable: executable.as_ref().to_path_buf(),
            chunk_size: chunk_size.max(1),
            offset: RunningOffset::default(),
        }
    }

    pub fn offset(&self) -> RunningOffset {
        self.offset
    }

    pub fn into_offset(self) -> RunningOffset {
        self.offset
    }

    pub fn plan_dataset(&mut self, dataset: &Dataset) -> Vec<JobDescriptor> {
        let chunks = chunk_ranges(dataset.records, self.chunk_size);
        let single = chunks.len() == 1;
        let mut jobs = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let seq = if single { None } else { Some(chunk.seq) };
            jobs.push(JobDescriptor {
                label: job_label(&dataset.base, seq),
                executable: self.executable.clone(),
                dataset: dataset.path.clone(),
                output_prefix: self.layout.output_prefix(&dataset.base, seq),
                start: chunk.start,
                end: chunk.end,
                offset: self.offset.value(),
                log_path: self.layout.log_path(&dataset.base, seq),
            });
            self.offset.advance(chunk.records());
        }
        jobs
    }
}

/// Plan every dataset in order and hand back the descriptors with the final offset.
pub fn plan_all(mut planner: JobPlanner, datasets: &[Dataset]) -> (Vec<JobDescriptor>, RunningOffset) {
    let mut jobs = Vec::new();
    for ds in datasets {
        jobs.extend(planner.plan_dataset(ds));
    }
    (jobs, planner.into_offset())
}
