#[path = "common/mod.rs"]
mod common;

use common::*;
use runsplit::{CancelToken, SubmitOptions, Submitter};
use std::fs;

#[test]
fn config_file_overrides_only_the_keys_it_names() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = tmp.path().join("runsplit.json");
    fs::write(&cfg, r#"{ "chunk_size": 0, "workers": 3, "merge": true, "cancel_mode": "kill" }"#).unwrap();

    let opts = SubmitOptions::from_json_file(&cfg).unwrap();
    assert_eq!(opts.chunk_size, 1, "chunk size is clamped to at least one record");
    assert_eq!(opts.workers, 3);
    assert!(opts.merge);
    assert_eq!(opts.cancel_mode, runsplit::CancelMode::Kill);
    assert_eq!(opts.tree_name, SubmitOptions::default().tree_name);

    fs::write(&cfg, r#"{ "chunksize": 10 }"#).unwrap();
    assert!(SubmitOptions::from_json_file(&cfg).is_err(), "unknown keys are rejected");
}

#[test]
fn missing_data_dir_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let err = Submitter::new()
        .data_dir(tmp.path().join("absent"))
        .output_dir(tmp.path().join("out"))
        .progress(false)
        .run(&FakeCounter::new(&[]), &CancelToken::new())
        .unwrap_err();
    assert!(format!("{err:#}").contains("does not exist"));
}

/// A dry run prints the plan but creates nothing under the output directory.
#[test]
fn dry_run_executes_and_writes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let data = tmp.path().join("data");
    let out = tmp.path().join("out");
    make_datasets(&data, &["a.root"]);

    let report = Submitter::new()
        .data_dir(&data)
        .output_dir(&out)
        .executable("/definitely/not/run")
        .chunk_size(2)
        .dry_run(true)
        .progress(false)
        .run(&FakeCounter::new(&[("a", 5)]), &CancelToken::new())
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.jobs_planned, 3);
    assert!(report.pool.results.is_empty());
    assert_eq!(report.exit_code(), 0);
    assert!(!out.exists());
}

/// Interrupted before planning starts: nothing dispatched, exit status 130.
#[test]
fn cancelled_before_planning_dispatches_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let data = tmp.path().join("data");
    make_datasets(&data, &["a.root", "b.root"]);

    let cancel = CancelToken::new();
    cancel.cancel();
    let counter = FakeCounter::new(&[("a", 5), ("b", 5)]);
    let report = Submitter::new()
        .data_dir(&data)
        .output_dir(tmp.path().join("out"))
        .executable("/definitely/not/run")
        .progress(false)
        .run(&counter, &cancel)
        .unwrap();

    assert_eq!(counter.calls(), 0);
    assert!(report.plan.cancelled);
    assert_eq!(report.jobs_planned, 0);
    assert_eq!(report.exit_code(), runsplit::INTERRUPTED_EXIT_CODE);
}

#[cfg(unix)]
mod with_executables {
    use super::common::*;
    use runsplit::{CancelToken, MergeOutcome, Submitter};
    use serde_json::Value;
    use std::fs;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Full run over two dated datasets, then a rerun:
    /// - every chunk produces an output and its own log
    /// - the running offset continues from the first dataset into the second
    /// - the summary is valid JSON with both datasets planned
    /// - the rerun skips both datasets and counts nothing
    #[test]
    fn run_writes_outputs_logs_and_summary_then_rerun_skips() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        let out = tmp.path().join("out");
        make_datasets(&data, &["A_20240101_000001.root", "A_20240101_000002.root", "readme.md"]);
        let exe = fake_analysis(tmp.path());

        let submitter = Submitter::new()
            .data_dir(&data)
            .output_dir(&out)
            .executable(&exe)
            .chunk_size(10)
            .workers(2)
            .progress(false);

        let counter = FakeCounter::new(&[("A_20240101_000001", 15), ("A_20240101_000002", 12)]);
        let report = submitter.run(&counter, &CancelToken::new()).unwrap();

        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.jobs_planned, 4);
        assert_eq!(report.plan.final_offset.value(), 27);
        assert_eq!(report.pool.results.len(), 4);
        assert_eq!(report.pool.failed().count(), 0);
        assert_eq!(
            file_names(&out),
            [
                "A_20240101_000001_0000.root",
                "A_20240101_000001_0001.root",
                "A_20240101_000002_0000.root",
                "A_20240101_000002_0001.root",
            ]
        );

        let log = read_lines(&out.join("logs").join("A_20240101_000002_0001.log"));
        assert_eq!(log[0], format!(
            "args: {} {} 10 11 25",
            data.join("A_20240101_000002.root").display(),
            out.join("A_20240101_000002_0001").display()
        ));

        let summary: Value = serde_json::from_str(&fs::read_to_string(out.join("logs").join("run-summary.json")).unwrap()).unwrap();
        assert_eq!(summary["plan"]["datasets_planned"], 2);
        assert_eq!(summary["plan"]["final_offset"], 27);
        assert_eq!(summary["pool"]["results"].as_array().unwrap().len(), 4);
        assert!(summary["merge"].is_null());

        let again = FakeCounter::new(&[("A_20240101_000001", 15), ("A_20240101_000002", 12)]);
        let rerun = submitter.run(&again, &CancelToken::new()).unwrap();
        assert_eq!(again.calls(), 0);
        assert_eq!(rerun.jobs_planned, 0);
        assert_eq!(rerun.plan.skipped.len(), 2);
    }

    /// With merging enabled, chunk outputs of both runs of the same day end up in one
    /// merged file.
    #[test]
    fn merge_stage_combines_a_day_of_outputs() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        let out = tmp.path().join("out");
        make_datasets(&data, &["A_20240101_000001.root", "A_20240101_000002.root"]);
        let exe = fake_analysis(tmp.path());
        let calls = tmp.path().join("merge-calls.txt");
        let tool = write_script(
            &tmp.path().join("bin").join("merge"),
            &format!("echo \"$@\" >> {}\ntouch \"$2\"", calls.display()),
        );

        let report = Submitter::new()
            .data_dir(&data)
            .output_dir(&out)
            .executable(&exe)
            .chunk_size(10)
            .merge(true)
            .merge_tool(&tool, Some("-f".to_string()))
            .progress(false)
            .run(&FakeCounter::new(&[("A_20240101_000001", 15), ("A_20240101_000002", 12)]), &CancelToken::new())
            .unwrap();

        let merge = report.merge.expect("merge stage ran");
        assert_eq!(merge.results.len(), 1);
        assert_eq!(merge.results[0].members, 4);
        assert_eq!(merge.results[0].outcome, MergeOutcome::Merged);
        assert!(out.join("merged").join("A_20240101.root").is_file());
        assert_eq!(read_lines(&calls).len(), 1);
    }

    /// Interrupted while the merge stage is running: the run reports the interruption and
    /// exits with the interrupt status, same as the standalone merge command.
    #[test]
    fn interrupt_during_merge_sets_interrupt_exit_code() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        let out = tmp.path().join("out");
        make_datasets(&data, &["A_20240101_000001.root", "B_20240102_000001.root"]);
        let exe = fake_analysis(tmp.path());
        // Creates the target first, then stays busy so the interrupt lands mid-merge.
        let tool = write_script(&tmp.path().join("bin").join("merge"), "touch \"$2\"\nsleep 1");

        let cancel = CancelToken::new();
        let watcher = {
            let cancel = cancel.clone();
            let merged = out.join("merged");
            thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_secs(30);
                while Instant::now() < deadline {
                    let any = fs::read_dir(&merged)
                        .map(|rd| rd.filter_map(|e| e.ok()).any(|e| e.path().extension().is_some_and(|x| x == "root")))
                        .unwrap_or(false);
                    if any {
                        cancel.cancel();
                        return;
                    }
                    thread::sleep(Duration::from_millis(10));
                }
            })
        };

        let report = Submitter::new()
            .data_dir(&data)
            .output_dir(&out)
            .executable(&exe)
            .chunk_size(10)
            .merge(true)
            .merge_workers(1)
            .merge_tool(&tool, Some("-f".to_string()))
            .progress(false)
            .run(&FakeCounter::new(&[("A_20240101_000001", 15), ("B_20240102_000001", 12)]), &cancel)
            .unwrap();
        watcher.join().unwrap();

        assert!(!report.pool.cancelled, "all jobs finished before the interrupt");
        let merge = report.merge.as_ref().expect("merge stage ran");
        assert!(merge.cancelled);
        assert_eq!(merge.count(|o| *o == MergeOutcome::Merged), 1);
        assert_eq!(merge.count(|o| *o == MergeOutcome::Cancelled), 1);
        assert!(report.cancelled());
        assert_eq!(report.exit_code(), runsplit::INTERRUPTED_EXIT_CODE);

        let summary: Value = serde_json::from_str(&fs::read_to_string(out.join("logs").join("run-summary.json")).unwrap()).unwrap();
        assert_eq!(summary["merge"]["cancelled"], true);
    }
}
