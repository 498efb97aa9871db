//! `regscope`: inspect snapshots, scope coverage and pipeline runs

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use regscope_core::{RunId, Scope, SnapshotDate};
use regscope_pipeline::{export, list_runs, load_state, PipelineConfig};
use regscope_snapshot::Snapshot;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let run_arg = Arg::new("run")
        .long("run")
        .required(true)
        .value_parser(value_parser!(RunId))
        .help("Run id");

    Command::new("regscope")
        .version(regscope_pipeline::VERSION)
        .about("Regulatory attribution and analysis pipeline inspector")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Pipeline configuration file (TOML)"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Data directory, overrides the configuration"),
        )
        .subcommand(Command::new("snapshots").about("List captured structure snapshots"))
        .subcommand(
            Command::new("coverage")
                .about("Attribution coverage of a scope")
                .arg(
                    Arg::new("scope")
                        .long("scope")
                        .required(true)
                        .value_parser(value_parser!(Scope))
                        .help("all, title:40, part:40/180, chapter:40/I, ..."),
                )
                .arg(
                    Arg::new("date")
                        .long("date")
                        .value_parser(value_parser!(SnapshotDate))
                        .help("Snapshot date, latest when omitted"),
                ),
        )
        .subcommand(Command::new("runs").about("List pipeline runs"))
        .subcommand(
            Command::new("status")
                .about("Per-unit state of a run")
                .arg(run_arg.clone()),
        )
        .subcommand(
            Command::new("export")
                .about("Write export.jsonl and summary.json for a run")
                .arg(run_arg),
        )
}

fn config(matches: &ArgMatches) -> Result<PipelineConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => PipelineConfig::default()
            .with_overrides(|key| std::env::var(key).ok())
            .context("reading environment overrides")?,
    };
    if let Some(dir) = matches.get_one::<PathBuf>("data-dir") {
        config = config.with_data_dir(dir);
    }
    Ok(config)
}

fn snapshot(config: &PipelineConfig, date: Option<SnapshotDate>) -> Result<Snapshot> {
    let data = config.data();
    match date.or(config.snapshot_date) {
        Some(date) => Snapshot::open(&data, date).with_context(|| format!("opening snapshot {date}")),
        None => Snapshot::latest(&data).context("opening latest snapshot"),
    }
}

fn run(matches: &ArgMatches) -> Result<()> {
    let config = config(matches)?;
    let data = config.data();
    tracing::debug!(data_dir = %data.root().display(), "resolved data directory");

    match matches.subcommand() {
        Some(("snapshots", _)) => {
            for manifest in Snapshot::list(&data).context("listing snapshots")? {
                println!(
                    "{}  parts {}/{}  documents {}  {}",
                    manifest.date,
                    manifest.parts_resolved,
                    manifest.parts_total,
                    manifest.documents_attributed,
                    if manifest.is_complete() { "complete" } else { "incomplete" }
                );
            }
        }
        Some(("coverage", args)) => {
            let scope = args
                .get_one::<Scope>("scope")
                .context("--scope is required")?;
            let snapshot = snapshot(&config, args.get_one::<SnapshotDate>("date").copied())?;
            let report = snapshot
                .coverage_report(scope)
                .with_context(|| format!("coverage of {scope}"))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some(("runs", _)) => {
            for run in list_runs(&data).context("listing runs")? {
                let c = run.counts;
                println!(
                    "{}  {}  snapshot {}  done {}/{}  skipped {}  failed {}  pending {}",
                    run.run_id,
                    run.scope,
                    run.snapshot_date,
                    c.done,
                    c.total,
                    c.skipped,
                    c.failed,
                    c.pending + c.in_progress
                );
            }
        }
        Some(("status", args)) => {
            let run_id = *args.get_one::<RunId>("run").context("--run is required")?;
            let state = load_state(&data, run_id).with_context(|| format!("loading run {run_id}"))?;
            println!(
                "run {}  scope {}  snapshot {}  config {}",
                state.run_id, state.scope, state.snapshot_date, state.config_version
            );
            for (id, unit) in &state.units {
                println!(
                    "{id}\t{}\tattempts {}\t{}",
                    unit.status,
                    unit.attempts,
                    unit.reason.as_deref().unwrap_or("")
                );
            }
        }
        Some(("export", args)) => {
            let run_id = *args.get_one::<RunId>("run").context("--run is required")?;
            let export = export(&data, run_id).with_context(|| format!("exporting run {run_id}"))?;
            println!("{}", serde_json::to_string_pretty(&export.summary)?);
        }
        Some((other, _)) => anyhow::bail!("unknown command '{other}'"),
        None => anyhow::bail!("no command given"),
    }
    Ok(())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    match run(&matches) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
