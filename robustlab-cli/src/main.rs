//! RobustLab CLI: stress validation and audit summary commands.
//!
//! Commands:
//! - `stress`: run OOS blind split, walk-forward and fee/slippage checks for
//!   every dataset × strategy × filter × direction and write `stress_report.json`
//! - `audit`: aggregate finder audit logs and exports into per-cell go/no-go decisions

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use robustlab_core::domain::{TradeDirection, TradeFilter};
use robustlab_core::engine::{reference_catalog, RandomSearchFinder, ReferenceEngine};
use robustlab_runner::audit::{render, write_output, AuditInput, OutputFormat, SourceKind, WriteOutcome};
use robustlab_runner::{summarize_files, StressConfig, StressPipeline, TaskOutcome, VerdictKind};

#[derive(Parser)]
#[command(
    name = "robustlab",
    about = "RobustLab CLI: strategy robustness stress tests and audit summaries"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the stress pipeline over datasets and strategies.
    Stress(StressArgs),
    /// Summarize audit logs, top-results exports and structured audit files.
    Audit(AuditArgs),
}

#[derive(clap::Args)]
struct StressArgs {
    /// Path to a TOML config file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dataset JSON file; repeat for several.
    #[arg(long = "dataset")]
    datasets: Vec<PathBuf>,

    /// Comma-separated strategy keys (e.g. sma_cross,channel_breakout).
    #[arg(long)]
    strategies: Option<String>,

    /// Comma-separated seeds (e.g. 1,2,3,4,5).
    #[arg(long)]
    seeds: Option<String>,

    /// Comma-separated trade filters: none, trend.
    #[arg(long)]
    filters: Option<String>,

    /// Comma-separated directions: long, short, both.
    #[arg(long)]
    directions: Option<String>,

    /// Parameter sets drawn per seed by the search.
    #[arg(long)]
    samples: Option<usize>,

    /// Target walk-forward grid size per window.
    #[arg(long)]
    combination_budget: Option<usize>,

    /// Minimum trades a parameter set needs.
    #[arg(long)]
    min_trades: Option<usize>,

    /// Output root. Defaults to the config value (stress_out).
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Recompute reports that already exist.
    #[arg(long, default_value_t = false)]
    force: bool,

    /// Fallback for environments without flags: <dataset> <strategies> <seeds> [output-dir].
    #[arg(value_name = "POSITIONAL")]
    positional: Vec<String>,
}

#[derive(clap::Args)]
struct AuditArgs {
    /// Log file with cell audit marker lines.
    #[arg(long)]
    log: Vec<PathBuf>,

    /// Top-results JSON export (rows count as passes).
    #[arg(long)]
    top_results: Vec<PathBuf>,

    /// Structured audit JSON (array, or object with records/audits).
    #[arg(long)]
    structured: Vec<PathBuf>,

    /// Output format: table, json, csv.
    #[arg(long, default_value = "table")]
    format: OutputFormat,

    /// Write to this file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Overwrite an existing output file.
    #[arg(long, default_value_t = false)]
    force: bool,

    /// Config file whose [audit] section sets the policy.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    min_seed_runs: Option<usize>,

    #[arg(long)]
    min_seed_passes: Option<usize>,

    /// Pipeline phase whose records a cell counts (oos_train, fee_slippage); empty counts all.
    #[arg(long)]
    phase: Option<String>,

    /// Inputs of any kind; the kind is detected from the content.
    #[arg(value_name = "INPUTS")]
    inputs: Vec<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Stress(args) => run_stress(args),
        Commands::Audit(args) => run_audit(args),
    };
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<StressConfig> {
    match path {
        Some(path) => StressConfig::from_file(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(StressConfig::default()),
    }
}

/// Split a comma/whitespace separated list and parse every item.
fn parse_list<T>(raw: &str, what: &str) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: Display,
{
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<T>().map_err(|e| anyhow::anyhow!("invalid {what} '{s}': {e}")))
        .collect()
}

/// Apply flags, then positional fallbacks for whatever the flags left unset.
fn stress_config(args: &StressArgs) -> Result<(StressConfig, Vec<PathBuf>, PathBuf)> {
    if args.positional.len() > 4 {
        bail!("expected at most 4 positional arguments: <dataset> <strategies> <seeds> [output-dir]");
    }
    let positional = |i: usize| args.positional.get(i).map(String::as_str);

    let mut config = load_config(args.config.as_ref())?;

    let mut datasets = args.datasets.clone();
    if datasets.is_empty() {
        if let Some(dataset) = positional(0) {
            datasets.push(PathBuf::from(dataset));
        }
    }
    if let Some(raw) = args.strategies.as_deref().or(positional(1)) {
        config.strategies = parse_list(raw, "strategy")?;
    }
    if let Some(raw) = args.seeds.as_deref().or(positional(2)) {
        config.seeds = parse_list(raw, "seed")?;
    }
    if let Some(raw) = &args.filters {
        config.filters = parse_list::<TradeFilter>(raw, "filter")?;
    }
    if let Some(raw) = &args.directions {
        config.directions = parse_list::<TradeDirection>(raw, "direction")?;
    }
    if let Some(samples) = args.samples {
        config.search.samples = samples;
    }
    if let Some(budget) = args.combination_budget {
        config.walk_forward.combination_budget = budget;
    }
    if let Some(min_trades) = args.min_trades {
        config.backtest.min_trades = min_trades;
    }
    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| positional(3).map(PathBuf::from))
        .unwrap_or_else(|| config.output_dir.clone());

    Ok((config, datasets, output_dir))
}

fn run_stress(args: StressArgs) -> Result<()> {
    let (config, datasets, output_dir) = stress_config(&args)?;

    let engine = ReferenceEngine;
    let finder = RandomSearchFinder::new(ReferenceEngine, config.search);
    let catalog = reference_catalog();
    let outcomes = StressPipeline::new(&engine, &finder, &catalog, &config).run_batch(&datasets, &output_dir, args.force)?;

    print_outcomes(&outcomes);
    Ok(())
}

fn print_outcomes(outcomes: &[TaskOutcome]) {
    println!();
    println!("=== Stress Results ===");
    println!("{:<6} {:<7} {}", "Result", "Source", "Report");
    println!("{}", "-".repeat(72));
    for outcome in outcomes {
        let verdict = match outcome.overall.verdict {
            VerdictKind::Pass => "PASS",
            VerdictKind::Fail => "FAIL",
        };
        let source = if outcome.reused { "reused" } else { "new" };
        println!("{:<6} {:<7} {}", verdict, source, outcome.report_path.display());
        for reason in &outcome.overall.fail_reasons {
            println!("{:<15}- {reason}", "");
        }
    }
    let passed = outcomes.iter().filter(|o| o.overall.passed()).count();
    println!();
    println!("{passed}/{} task(s) passed.", outcomes.len());
}

fn run_audit(args: AuditArgs) -> Result<()> {
    let mut policy = load_config(args.config.as_ref())?.audit;
    if let Some(runs) = args.min_seed_runs {
        policy.min_seed_runs = runs;
    }
    if let Some(passes) = args.min_seed_passes {
        policy.min_seed_passes = passes;
    }
    if let Some(phase) = args.phase {
        policy.phase = phase;
    }

    let tagged = |paths: &[PathBuf], kind: Option<SourceKind>| -> Vec<AuditInput> {
        paths.iter().map(|path| AuditInput { path: path.clone(), kind }).collect()
    };
    let inputs: Vec<AuditInput> = [
        tagged(&args.log, Some(SourceKind::LogText)),
        tagged(&args.top_results, Some(SourceKind::TopResults)),
        tagged(&args.structured, Some(SourceKind::Structured)),
        tagged(&args.inputs, None),
    ]
    .concat();
    if inputs.is_empty() {
        bail!("no audit inputs given (use --log, --top-results, --structured or positional paths)");
    }

    let summary = summarize_files(&inputs, &policy)?;
    let rendered = render(&summary, args.format)?;

    match &args.output {
        Some(path) => match write_output(path, &rendered, args.force)? {
            WriteOutcome::Written => println!("Audit summary written to: {}", path.display()),
            WriteOutcome::Reused => {
                println!("Kept existing {} (pass --force to overwrite)", path.display())
            }
        },
        None => print!("{rendered}"),
    }
    for warning in &summary.warnings {
        eprintln!("WARNING: {warning}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stress_args(argv: &[&str]) -> StressArgs {
        let mut full = vec!["robustlab", "stress"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Commands::Stress(args) => args,
            Commands::Audit(_) => unreachable!(),
        }
    }

    #[test]
    fn flags_override_defaults() {
        let args = stress_args(&[
            "--dataset",
            "a.json",
            "--strategies",
            "sma_cross,channel_breakout",
            "--seeds",
            "7 8",
            "--directions",
            "both",
            "--samples",
            "12",
        ]);
        let (config, datasets, out) = stress_config(&args).unwrap();
        assert_eq!(datasets, vec![PathBuf::from("a.json")]);
        assert_eq!(config.strategies, vec!["sma_cross", "channel_breakout"]);
        assert_eq!(config.seeds, vec![7, 8]);
        assert_eq!(config.directions, vec![TradeDirection::Both]);
        assert_eq!(config.search.samples, 12);
        assert_eq!(out, PathBuf::from("stress_out"));
    }

    #[test]
    fn positional_fallback_fills_unset_values() {
        let args = stress_args(&["data.json", "sma_cross", "1,2,3", "out"]);
        let (config, datasets, out) = stress_config(&args).unwrap();
        assert_eq!(datasets, vec![PathBuf::from("data.json")]);
        assert_eq!(config.strategies, vec!["sma_cross"]);
        assert_eq!(config.seeds, vec![1, 2, 3]);
        assert_eq!(out, PathBuf::from("out"));
    }

    #[test]
    fn bad_list_items_are_errors() {
        assert!(parse_list::<u64>("1,x", "seed").is_err());
        assert!(parse_list::<TradeFilter>("sideways", "filter").is_err());
    }
}
