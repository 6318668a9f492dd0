use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use indicatif::MultiProgress;
use runsplit::{
    init_tracing_once, set_global_multiprogress, CancelMode, CancelToken, ExternalCounter, MergeOutcome,
    SubmitOptions, Submitter, INTERRUPTED_EXIT_CODE, PATH_TOKEN,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn cli() -> Command {
    Command::new("runsplit")
        .about("Split per-run datasets into bounded jobs, run them through an analysis executable, merge per-day outputs")
        .subcommand(Command::new("run").about("Plan and dispatch jobs (default)"))
        .subcommand(Command::new("merge").about("Only group and merge existing outputs"))
        .subcommand(Command::new("new").about("Write a template JSON config to --config"))
        .arg(Arg::new("config").short('c').long("config").global(true).value_parser(value_parser!(PathBuf)).help("JSON config file; flags override it"))
        .arg(Arg::new("data-dir").short('d').long("data-dir").global(true).value_parser(value_parser!(PathBuf)).help("Directory holding the input datasets"))
        .arg(Arg::new("pattern").long("pattern").global(true).help("Regex selecting input file names"))
        .arg(Arg::new("output-dir").short('o').long("output-dir").global(true).value_parser(value_parser!(PathBuf)).help("Directory for job outputs, logs and merged files"))
        .arg(Arg::new("executable").short('e').long("executable").global(true).value_parser(value_parser!(PathBuf)).help("Analysis executable run once per chunk"))
        .arg(Arg::new("chunk-size").long("chunk-size").global(true).value_parser(value_parser!(u64)).help("Maximum records per job"))
        .arg(Arg::new("workers").short('j').long("workers").global(true).value_parser(value_parser!(usize)).help("Concurrent analysis processes"))
        .arg(Arg::new("max-datasets").long("max-datasets").global(true).value_parser(value_parser!(usize)).help("Process at most this many datasets"))
        .arg(Arg::new("merge").long("merge").global(true).action(ArgAction::SetTrue).help("Merge per-day outputs after the jobs finish"))
        .arg(Arg::new("merge-workers").long("merge-workers").global(true).value_parser(value_parser!(usize)).help("Concurrent merge processes"))
        .arg(Arg::new("merge-tool").long("merge-tool").global(true).value_parser(value_parser!(PathBuf)).help("Merge program (default: hadd)"))
        .arg(Arg::new("kill-on-cancel").long("kill-on-cancel").global(true).action(ArgAction::SetTrue).help("Kill running jobs on Ctrl-C instead of letting them finish"))
        .arg(Arg::new("tree").long("tree").global(true).help("Tree name read by the entry-count macro"))
        .arg(Arg::new("count-tool").long("count-tool").global(true).value_parser(value_parser!(PathBuf)).help("Program printing a dataset's record count (instead of ROOT)"))
        .arg(Arg::new("dry-run").short('n').long("dry-run").global(true).action(ArgAction::SetTrue).help("Print the planned commands without running them"))
        .arg(Arg::new("no-progress").long("no-progress").global(true).action(ArgAction::SetTrue).help("Disable progress bars"))
}

fn options_from(m: &ArgMatches) -> Result<SubmitOptions> {
    let mut opts = match m.get_one::<PathBuf>("config") {
        Some(path) => SubmitOptions::from_json_file(path)?,
        None => SubmitOptions::default(),
    };
    if let Some(v) = m.get_one::<PathBuf>("data-dir") { opts = opts.with_data_dir(v); }
    if let Some(v) = m.get_one::<String>("pattern") { opts = opts.with_input_pattern(v.clone()); }
    if let Some(v) = m.get_one::<PathBuf>("output-dir") { opts = opts.with_output_dir(v); }
    if let Some(v) = m.get_one::<PathBuf>("executable") { opts = opts.with_executable(v); }
    if let Some(v) = m.get_one::<u64>("chunk-size") { opts = opts.with_chunk_size(*v); }
    if let Some(v) = m.get_one::<usize>("workers") { opts = opts.with_workers(*v); }
    if let Some(v) = m.get_one::<usize>("max-datasets") { opts = opts.with_max_datasets(Some(*v)); }
    if m.get_flag("merge") { opts = opts.with_merge(true); }
    if let Some(v) = m.get_one::<usize>("merge-workers") { opts = opts.with_merge_workers(*v); }
    if let Some(v) = m.get_one::<PathBuf>("merge-tool") {
        let flag = opts.merge_force_flag.clone();
        opts = opts.with_merge_tool(v, flag);
    }
    if m.get_flag("kill-on-cancel") { opts = opts.with_cancel_mode(CancelMode::Kill); }
    if let Some(v) = m.get_one::<String>("tree") { opts = opts.with_tree_name(v.clone()); }
    if m.get_flag("dry-run") { opts = opts.with_dry_run(true); }
    if m.get_flag("no-progress") { opts = opts.with_progress(false); }
    Ok(opts)
}

fn write_template_config(path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&SubmitOptions::default())?;
    fs::write(path, json + "\n").with_context(|| format!("write {}", path.display()))
}

fn main() -> Result<()> {
    let matches = cli().get_matches();

    let mp = Arc::new(MultiProgress::new());
    set_global_multiprogress(mp);
    init_tracing_once();

    if let Some(("new", _)) = matches.subcommand() {
        let path = matches
            .get_one::<PathBuf>("config")
            .context("`new` needs --config <path> to write to")?;
        tracing::info!("Making a template config at {}...", path.display());
        write_template_config(path)?;
        return Ok(());
    }

    let opts = options_from(&matches)?;
    let submitter = Submitter::from_options(opts);

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        handler_token.cancel();
        tracing::warn!("Interrupt received: no new work will be started");
    })
    .context("install Ctrl-C handler")?;

    if let Some(("merge", _)) = matches.subcommand() {
        let report = submitter.merge_outputs(&cancel)?;
        println!(
            "Merged {} groups, {} already present, {} unmatched files",
            report.count(|o| *o == MergeOutcome::Merged),
            report.count(|o| *o == MergeOutcome::AlreadyPresent),
            report.unmatched
        );
        if report.cancelled {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
        return Ok(());
    }

    let counter = match matches.get_one::<PathBuf>("count-tool") {
        Some(program) => ExternalCounter::new(program).arg(PATH_TOKEN),
        None => ExternalCounter::root_macro(&std::env::temp_dir().join("runsplit"), &submitter.options().tree_name)?,
    };

    let report = submitter.run(&counter, &cancel)?;
    println!(
        "Planned {} jobs from {} datasets ({} skipped), {} records in total",
        report.jobs_planned,
        report.plan.datasets_planned,
        report.plan.skipped.len(),
        report.plan.final_offset.value()
    );
    if !report.dry_run {
        println!(
            "Finished {} jobs ({} not clean), {} not started",
            report.pool.results.len(),
            report.pool.failed().count(),
            report.pool.not_started
        );
    }

    let code = report.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
