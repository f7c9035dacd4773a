//! Binary entry point for the Bitsy administrative CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use bitsy::admin::{
    backup, flush, seed, stats, verify, MaintenanceReport, SeedOptions, SeedReport, StatsReport,
    VerifyLevel, VerifyReport, VerifySeverity,
};
use bitsy::StoreOptions;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "bitsy",
    version,
    about = "Administrative CLI for Bitsy graph databases",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(
        long,
        global = true,
        env = "BITSY_CONFIG",
        value_name = "FILE",
        help = "TOML file with store options"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override the Tx log copy threshold (bytes)")]
    tx_log_threshold: Option<u64>,

    #[arg(long, global = true, help = "Override the reorg factor")]
    reorg_factor: Option<f64>,

    #[arg(long, global = true, help = "Override the minimum new lines per reorg")]
    min_lines_per_reorg: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Open a database and report its contents")]
    Stats {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },

    #[command(about = "Check file headers and line checksums without opening")]
    Verify {
        #[arg(value_name = "DB")]
        db_path: PathBuf,

        #[arg(long, value_enum, default_value_t = VerifyLevelArg::Fast)]
        level: VerifyLevelArg,
    },

    #[command(about = "Copy a database into an empty directory")]
    Backup {
        #[arg(value_name = "DB")]
        db_path: PathBuf,

        #[arg(value_name = "TARGET")]
        target: PathBuf,
    },

    #[command(about = "Copy pending Tx logs into the vertex and edge files")]
    Flush {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },

    #[command(about = "Populate a database with random users and follows edges")]
    Seed(SeedCmd),
}

#[derive(Args, Debug)]
struct SeedCmd {
    #[arg(value_name = "DB")]
    db_path: PathBuf,

    #[arg(long, default_value_t = 100)]
    users: usize,

    #[arg(long, default_value_t = 3)]
    avg_follows: usize,

    #[arg(long, default_value_t = 256, help = "Changes per transaction")]
    batch: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum VerifyLevelArg {
    Fast,
    Full,
}

impl From<VerifyLevelArg> for VerifyLevel {
    fn from(level: VerifyLevelArg) -> Self {
        match level {
            VerifyLevelArg::Fast => VerifyLevel::Fast,
            VerifyLevelArg::Full => VerifyLevel::Full,
        }
    }
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("BITSY_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let opts = build_store_options(&cli.open)?;

    match cli.command {
        Command::Stats { db_path } => {
            let report = stats(&db_path, opts)?;
            emit(&cli.format, &report, || print_stats_text(&report))?;
        }
        Command::Verify { db_path, level } => {
            let report = verify(&db_path, level.into())?;
            emit(&cli.format, &report, || print_verify_text(&report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::Backup { db_path, target } => {
            let report = backup(&db_path, &target, opts)?;
            emit(&cli.format, &report, || print_maintenance_text("Backup", &report))?;
        }
        Command::Flush { db_path } => {
            let report = flush(&db_path, opts)?;
            emit(&cli.format, &report, || print_maintenance_text("Flush", &report))?;
        }
        Command::Seed(cmd) => {
            let seed_opts = SeedOptions {
                users: cmd.users,
                avg_follows: cmd.avg_follows,
                batch: cmd.batch,
            };
            let report = seed(&cmd.db_path, seed_opts, opts)?;
            emit(&cli.format, &report, || print_seed_text(&report))?;
        }
    }

    Ok(())
}

fn build_store_options(args: &OpenArgs) -> Result<StoreOptions, Box<dyn Error>> {
    let mut opts = match &args.config {
        Some(path) => StoreOptions::from_toml_file(path)?,
        None => StoreOptions::default(),
    };
    if let Some(bytes) = args.tx_log_threshold {
        opts = opts.tx_log_threshold(bytes);
    }
    if let Some(factor) = args.reorg_factor {
        opts = opts.reorg_factor(factor);
    }
    if let Some(lines) = args.min_lines_per_reorg {
        opts = opts.min_lines_per_reorg(lines);
    }
    opts.validate()?;
    Ok(opts)
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_stats_text(report: &StatsReport) {
    println!("Database: {}", report.path);
    println!(
        "  vertices={} edges={} seq={} durable_seq={}",
        report.store.vertices, report.store.edges, report.store.seq, report.store.durable_seq
    );
    println!(
        "  vertex_indexes=[{}] edge_indexes=[{}]",
        report.vertex_indexes.join(", "),
        report.edge_indexes.join(", ")
    );
    println!();
    let recovery = &report.recovery;
    println!(
        "Recovery: bootstrapped={} records={} replayed={} skipped_logs={} repaired={}",
        recovery.bootstrapped,
        recovery.records_applied,
        recovery.transactions_replayed,
        recovery.tx_logs_skipped,
        recovery.slots_repaired
    );
    for cut in &recovery.truncations {
        println!("  truncated {} at byte {}: {}", cut.file, cut.offset, cut.reason);
    }
    println!();
    println!("Files:");
    for file in &report.files {
        println!("  {:<6} {} bytes", file.name, file.size_bytes);
    }
}

fn print_verify_text(report: &VerifyReport) {
    println!("Verify ({:?}) => success={}", report.level, report.success);
    for file in &report.files {
        println!(
            "  {:<6} counter={} active={} lines={} elements={} markers={}",
            file.name,
            file.counter.map_or_else(|| "-".to_string(), |c| c.to_string()),
            file.active,
            file.lines,
            file.element_lines,
            file.markers
        );
    }
    for finding in &report.findings {
        let tag = match finding.severity {
            VerifySeverity::Info => "info",
            VerifySeverity::Warning => "warning",
            VerifySeverity::Error => "error",
        };
        println!("- {tag}: {}: {}", finding.file, finding.message);
    }
}

fn print_maintenance_text(what: &str, report: &MaintenanceReport) {
    match &report.target {
        Some(target) => println!(
            "{what} of {} into {} finished in {} ms ({} vertices, {} edges)",
            report.path, target, report.duration_ms, report.vertices, report.edges
        ),
        None => println!(
            "{what} of {} finished in {} ms ({} vertices, {} edges)",
            report.path, report.duration_ms, report.vertices, report.edges
        ),
    }
}

fn print_seed_text(report: &SeedReport) {
    println!(
        "Seeded {} with {} vertices and {} edges in {} commits ({} ms)",
        report.path, report.vertices, report.edges, report.commits, report.duration_ms
    );
}
