mod config;
mod paths;
mod counter;
mod guard;
mod plan;

mod concurrency;
mod pool;
mod merge;

mod pipeline;
mod progress;
mod report;
mod util;

pub use crate::config::SubmitOptions;
pub use crate::pipeline::Submitter;
pub use crate::report::{RunPlan, RunReport, SkipReason, SkippedDataset, INTERRUPTED_EXIT_CODE};

// Record counting: injectable trait plus the external-tool implementation.
pub use crate::counter::{parse_count_output, ExternalCounter, RecordCounter, PATH_TOKEN};

// Planning building blocks.
pub use crate::paths::{discover_datasets, job_label, DatasetFile, OutputLayout};
pub use crate::plan::{chunk_ranges, plan_all, Chunk, Dataset, JobDescriptor, JobPlanner, RunningOffset};
pub use crate::guard::existing_output;

// Dispatch and cancellation.
pub use crate::concurrency::CancelToken;
pub use crate::pool::{CancelMode, JobOutcome, JobResult, PoolEvent, PoolReport, WorkerPool};

// Merge stage.
pub use crate::merge::{
    group_outputs, parse_output_name, Grouping, MergeCoordinator, MergeGroup, MergeKey, MergeOutcome, MergeReport,
    MergeResult, MergeTool, ParsedName, Unmatched,
};

// Expose multiprogress and tracing setup for the binary.
pub use crate::progress::set_global_multiprogress;
pub use crate::util::init_tracing_once;
