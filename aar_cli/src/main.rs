use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use aar_codecs::{step_for, Mode, StepOptions};
use aar_core::format::{scan_records, LENGTH_PREFIX_SIZE};
use aar_core::{
    BatchSummary, ErrorPolicy, Progress, TaskObserver, TaskRunner, TaskState, WorkerPool,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "aar",
    about = "Compress and decompress files as 64-block AAR archives, XZ streams, or ZIP files",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Worker threads for AAR blocks (0 = one per CPU)
    #[arg(long, global = true, default_value_t = 0)]
    threads: usize,

    /// What a failed file does to the rest of the batch: continue | abort
    #[arg(long, global = true, default_value_t = ErrorPolicy::ContinueOnError)]
    on_error: ErrorPolicy,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress each path next to itself
    Compress {
        /// Files to compress (directories are accepted by --format zip)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Aar)]
        format: Format,
        /// Deflate level for AAR blocks (0–9)
        #[arg(short, long, default_value_t = 6)]
        level: u32,
        /// XZ preset (0–9, only used with --format xz)
        #[arg(long, default_value_t = 6)]
        xz_preset: u32,
    },
    /// Decompress .aar, .xz, .zip and .jar files, choosing by extension
    Decompress {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List the block records of an AAR archive without decompressing it
    Inspect {
        /// AAR file to inspect
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Aar,
    Xz,
    Zip,
}

impl From<Format> for Mode {
    fn from(format: Format) -> Self {
        match format {
            Format::Aar => Mode::AarCompress,
            Format::Xz => Mode::XzCompress,
            Format::Zip => Mode::ZipCompress,
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_logging(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

/// Prints status lines and whole-percent progress to stderr.
struct ConsoleObserver {
    quiet: bool,
    last_percent: AtomicI64,
}

impl ConsoleObserver {
    fn new(quiet: bool) -> Self {
        Self {
            quiet,
            last_percent: AtomicI64::new(-1),
        }
    }
}

impl TaskObserver for ConsoleObserver {
    fn on_progress(&self, progress: Progress) {
        if self.quiet {
            return;
        }
        let Progress::Fraction(fraction) = progress else {
            return;
        };
        let percent = (fraction * 100.0).floor() as i64;
        if self.last_percent.swap(percent, Ordering::AcqRel) != percent {
            eprint!("\r  {percent:>3}%");
            if percent >= 100 {
                eprintln!();
            }
        }
    }

    fn on_message(&self, message: &str) {
        if !self.quiet {
            eprintln!("\r{message}");
        }
    }
}

fn print_summary(summary: &BatchSummary, elapsed_s: f64) {
    println!();
    println!("  completed      : {}", summary.completed.len());
    println!("  skipped        : {}", summary.skipped.len());
    println!("  failed         : {}", summary.failed.len());
    if summary.aborted {
        println!("  aborted        : yes");
    }
    if summary.cancelled {
        println!("  cancelled      : yes");
    }
    println!("  elapsed        : {:.3} s", elapsed_s);
    for issue in summary.skipped.iter().chain(&summary.failed) {
        println!("  ! {}", issue.message);
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_batch(
    threads: usize,
    policy: ErrorPolicy,
    quiet: bool,
    mode: Mode,
    options: StepOptions,
    paths: Vec<PathBuf>,
) -> anyhow::Result<ExitCode> {
    let pool = if threads == 0 {
        WorkerPool::with_available_parallelism()
    } else {
        WorkerPool::new(threads)
    };
    let runner = TaskRunner::new(Arc::new(ConsoleObserver::new(quiet)), policy);
    tracing::info!(
        workers = pool.num_workers(),
        %mode,
        policy = %runner.policy(),
        files = paths.len(),
        "starting batch"
    );
    let step = step_for(mode, &pool, &options);
    let t0 = std::time::Instant::now();
    let summary = runner
        .start(paths, step)
        .and_then(|handle| handle.join())
        .context("running batch");
    pool.shutdown();
    let summary = summary?;

    if !quiet {
        print_summary(&summary, t0.elapsed().as_secs_f64());
    }
    Ok(match runner.status().state {
        TaskState::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn run_inspect(file: PathBuf, show_blocks: bool) -> anyhow::Result<ExitCode> {
    let f = File::open(&file).with_context(|| format!("opening archive {:?}", file))?;
    let file_size = f.metadata()?.len();
    let records = scan_records(BufReader::new(f), file_size)
        .with_context(|| format!("reading block records of {:?}", file))?;

    let payload: u64 = records.iter().map(|r| r.compressed_len as u64).sum();
    let largest = records.iter().map(|r| r.compressed_len).max().unwrap_or(0);
    let smallest = records.iter().map(|r| r.compressed_len).min().unwrap_or(0);

    println!("=== AAR File: {:?} ===", file);
    println!();
    println!("  block count    : {}", records.len());
    println!("  file on disk   : {}", human_bytes(file_size));
    println!("  block payloads : {}", human_bytes(payload));
    println!(
        "  length prefixes: {}",
        human_bytes((records.len() * LENGTH_PREFIX_SIZE) as u64)
    );
    println!("  largest block  : {}", human_bytes(largest as u64));
    println!("  smallest block : {}", human_bytes(smallest as u64));

    if show_blocks {
        println!();
        println!("  {:>8}  {:>14}  {:>12}", "block", "file offset", "compressed");
        println!("  {}", "-".repeat(38));
        for r in &records {
            println!(
                "  {:>8}  {:>14}  {:>12}",
                r.index,
                r.offset,
                human_bytes(r.compressed_len as u64)
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Compress {
            paths,
            format,
            level,
            xz_preset,
        } => {
            let options = StepOptions {
                xz_preset,
                deflate_level: level,
            };
            run_batch(cli.threads, cli.on_error, cli.quiet, format.into(), options, paths)
        }
        Commands::Decompress { paths } => run_batch(
            cli.threads,
            cli.on_error,
            cli.quiet,
            Mode::Decompress,
            StepOptions::default(),
            paths,
        ),
        Commands::Inspect { file, blocks } => run_inspect(file, blocks),
    }
}
