#[path = "common/mod.rs"]
mod common;

use common::*;
use runsplit::{existing_output, CancelToken, SkipReason, Submitter};
use std::fs::{self, File};

/// The guard looks for `<output>/<base>*` among regular files only.
#[test]
fn guard_matches_output_prefix_glob() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path();
    fs::create_dir_all(out.join("logs")).unwrap();
    File::create(out.join("logs").join("run2.log")).unwrap();
    File::create(out.join("run1_0003.root")).unwrap();

    assert_eq!(existing_output(out, "run1"), Some(out.join("run1_0003.root")));
    assert_eq!(existing_output(out, "run2"), None, "logs/ must not count as output");
    assert_eq!(existing_output(&out.join("missing"), "run1"), None);
}

/// A dataset whose base is a prefix of another's does not claim the other's outputs.
#[test]
fn guard_does_not_confuse_prefix_sharing_datasets() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path();
    File::create(out.join("run10_0000.root")).unwrap();
    File::create(out.join("run1x.root")).unwrap();

    assert_eq!(existing_output(out, "run1"), None);
    assert_eq!(existing_output(out, "run10"), Some(out.join("run10_0000.root")));

    File::create(out.join("run1.root")).unwrap();
    assert_eq!(existing_output(out, "run1"), Some(out.join("run1.root")));
}

/// Planning three datasets where one already has output:
/// - the done dataset is skipped before the counter is asked about it
/// - it contributes no jobs and does not move the running offset
#[test]
fn existing_output_skips_whole_dataset() {
    let tmp = tempfile::tempdir().unwrap();
    let data = tmp.path().join("data");
    let out = tmp.path().join("out");
    make_datasets(&data, &["a.root", "b.root", "c.root"]);
    fs::create_dir_all(&out).unwrap();
    // A partial earlier run of `b` counts as done.
    File::create(out.join("b_0001.root")).unwrap();

    let counter = FakeCounter::new(&[("a", 5), ("b", 1_000), ("c", 7)]);
    let plan = Submitter::new()
        .data_dir(&data)
        .output_dir(&out)
        .executable("/bin/true")
        .chunk_size(4)
        .progress(false)
        .plan(&counter, &CancelToken::new())
        .unwrap();

    assert_eq!(counter.calls(), 2);
    assert!(counter.asked.lock().iter().all(|p| !p.ends_with("b.root")));

    assert_eq!(plan.datasets_planned, 2);
    assert_eq!(plan.skipped.len(), 1);
    assert_eq!(plan.skipped[0].path, data.join("b.root"));
    assert_eq!(
        plan.skipped[0].reason,
        SkipReason::AlreadyProcessed { existing: out.join("b_0001.root") }
    );

    assert!(plan.jobs.iter().all(|j| !j.label.starts_with('b')));
    // a: 0..4, 4..5 -> offsets 0, 4; c: 0..4, 4..7 -> offsets 5, 9
    let offsets: Vec<u64> = plan.jobs.iter().map(|j| j.offset).collect();
    assert_eq!(offsets, [0, 4, 5, 9]);
    assert_eq!(plan.final_offset.value(), 12);
}

/// A zero count is a per-dataset skip with a reason, never a failure of the run.
#[test]
fn zero_count_is_skipped_not_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let data = tmp.path().join("data");
    make_datasets(&data, &["broken.root", "good.root", "notes.txt"]);

    let counter = FakeCounter::new(&[("good", 3)]);
    let plan = Submitter::new()
        .data_dir(&data)
        .output_dir(tmp.path().join("out"))
        .executable("/bin/true")
        .progress(false)
        .plan(&counter, &CancelToken::new())
        .unwrap();

    assert_eq!(counter.calls(), 2, "notes.txt does not match the input pattern");
    assert_eq!(plan.skipped.len(), 1);
    assert_eq!(plan.skipped[0].reason, SkipReason::NoRecords);
    assert_eq!(plan.jobs.len(), 1);
    assert_eq!(plan.jobs[0].label, "good");
    assert_eq!(plan.final_offset.value(), 3);
}

/// `max_datasets` caps the sorted dataset list per invocation.
#[test]
fn max_datasets_limits_the_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let data = tmp.path().join("data");
    make_datasets(&data, &["r3.root", "r1.root", "r2.root"]);

    let counter = |_: &std::path::Path| -> u64 { 1 };
    let plan = Submitter::new()
        .data_dir(&data)
        .output_dir(tmp.path().join("out"))
        .executable("/bin/true")
        .max_datasets(Some(2))
        .progress(false)
        .plan(&counter, &CancelToken::new())
        .unwrap();

    let labels: Vec<_> = plan.jobs.iter().map(|j| j.label.clone()).collect();
    assert_eq!(labels, ["r1", "r2"]);
}
