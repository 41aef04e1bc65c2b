//! Offload - Command-line interface for the transfer engine.
//!
//! Lists volumes, preflights a set of files and folders against a
//! destination, and runs transfers with progress on stderr.

use clap::{Args, Parser, Subcommand};
use log::warn;
use offload_engine::{
    read_manifest, ConflictPolicy, CopyMode, Engine, EngineConfig, EngineError, LeafStatus, Phase,
    PickedItem, Preflight, ProgressSink, TransferOptions, TransferProgress, TransferSummary,
    VerifyMode,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Offload - copy or move files onto an external drive
#[derive(Parser, Debug)]
#[command(name = "offload")]
#[command(version = "0.1.0")]
#[command(about = "Offload files and folders onto removable drives with verification")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List mounted volumes usable as destination
    Volumes {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Report size, breakdown and whether everything fits
    Scan(ScanArgs),
    /// Copy or move files into a new session directory on the destination
    Transfer(TransferArgs),
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Files and folders to scan
    #[arg(required = true, value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Mount point of the destination volume
    #[arg(long, value_name = "MOUNT")]
    dest: PathBuf,

    /// Bytes that must remain free after the transfer
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    margin: u64,

    /// Print JSON instead of a report
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct TransferArgs {
    /// Files and folders to transfer
    #[arg(required = true, value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Mount point of the destination volume
    #[arg(long, value_name = "MOUNT")]
    dest: PathBuf,

    /// Operation mode: copy or move
    #[arg(long, value_name = "MODE", default_value = "copy")]
    mode: String,

    /// Conflict policy: rename, overwrite, or skip
    #[arg(long, value_name = "POLICY", default_value = "rename")]
    conflict: String,

    /// Verification: none, size, or sha256
    #[arg(long, value_name = "MODE", default_value = "size")]
    verify: String,

    /// Directory created below the mount point
    #[arg(long, value_name = "NAME", default_value = offload_engine::model::DEFAULT_ROOT_DIR_NAME)]
    root_name: String,

    /// Nest sessions under a per-day directory
    #[arg(long)]
    group_by_date: bool,

    /// Do not sort files into category folders
    #[arg(long)]
    no_group_by_type: bool,

    /// Flatten folder picks instead of keeping their tree
    #[arg(long)]
    flatten: bool,

    /// Number of parallel workers
    #[arg(long, value_name = "N")]
    jobs: Option<usize>,

    /// Bytes that must remain free after the transfer
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    margin: u64,

    /// Re-copy attempts after a verification mismatch
    #[arg(long, value_name = "N", default_value_t = 0)]
    verify_retries: u32,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

/// How a successful command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Everything succeeded
    Clean,
    /// Some files failed, or the transfer was cancelled
    Incomplete,
}

/// CLI implementation of ProgressSink for displaying transfer progress
struct CliProgress {
    verbose: bool,
    start_time: Instant,
    last_phase: Mutex<Option<Phase>>,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
            last_phase: Mutex::new(None),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn print_progress_bar(percent: f64) -> String {
        let percent = percent.clamp(0.0, 100.0) as usize;
        let filled = percent / 5;
        let empty = 20 - filled;
        format!("[{}{}] {}%", "=".repeat(filled), " ".repeat(empty), percent)
    }
}

impl ProgressSink for CliProgress {
    fn on_progress(&self, p: &TransferProgress) {
        let changed = {
            let mut last = self.last_phase.lock().unwrap_or_else(|e| e.into_inner());
            let changed = *last != Some(p.phase);
            *last = Some(p.phase);
            changed
        };

        if p.phase.is_terminal() {
            eprintln!();
            return;
        }
        if changed && self.verbose {
            eprintln!("\n{}...", p.phase);
        }
        if p.phase == Phase::Scanning {
            return;
        }

        eprint!(
            "\rProgress: {} | {}/{} files | {}/{}",
            Self::print_progress_bar(p.percent),
            p.current_file,
            p.total_files,
            Self::format_bytes(p.bytes_done),
            Self::format_bytes(p.bytes_total)
        );
        let _ = std::io::Write::flush(&mut std::io::stderr());
    }
}

/// Parse arguments, set up logging and Ctrl-C, then run the command
fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let engine = Arc::new(Engine::new(engine_config(&cli.command)));
    spawn_ctrl_c_handler(Arc::clone(&engine));

    let exit_code = match run_cli(&cli, &engine) {
        Ok(Outcome::Clean) => 0,
        Ok(Outcome::Incomplete) => 1,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Cancel the running session on Ctrl-C. The session finishes the files in flight.
fn spawn_ctrl_c_handler(engine: Arc<Engine>) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                warn!("Ctrl-C handling unavailable: {}", e);
                return;
            }
        };
        runtime.block_on(async {
            while tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling after files in progress...");
                engine.cancel_transfer();
            }
        });
    });
}

fn engine_config(command: &Command) -> EngineConfig {
    let mut config = EngineConfig::default();
    match command {
        Command::Scan(args) => config.space_safety_margin_bytes = args.margin,
        Command::Transfer(args) => {
            if let Some(jobs) = args.jobs {
                config.concurrency = jobs;
            }
            config.space_safety_margin_bytes = args.margin;
            config.verify_retries = args.verify_retries;
        }
        Command::Volumes { .. } => {}
    }
    config
}

/// Main CLI logic - separated for testability
fn run_cli(cli: &Cli, engine: &Engine) -> Result<Outcome, String> {
    match &cli.command {
        Command::Volumes { json } => list_volumes(engine, *json),
        Command::Scan(args) => scan(engine, args),
        Command::Transfer(args) => transfer(engine, args, cli.verbose),
    }
}

fn list_volumes(engine: &Engine, json: bool) -> Result<Outcome, String> {
    let volumes = engine.list_volumes().map_err(|e| e.to_string())?;
    if json {
        println!("{}", to_json(&volumes)?);
        return Ok(Outcome::Clean);
    }

    for v in &volumes {
        let removable = match v.removable {
            Some(true) => " (removable)",
            _ => "",
        };
        println!(
            "{:<24} {:<32} {:>12} free of {:>12} {}{}",
            v.name,
            v.mount_point.display(),
            CliProgress::format_bytes(v.avail_bytes),
            CliProgress::format_bytes(v.total_bytes),
            v.fs_type.as_deref().unwrap_or("-"),
            removable
        );
    }
    Ok(Outcome::Clean)
}

/// Validate sources exist and classify them as files or folders
fn picked_items(engine: &Engine, paths: &[PathBuf]) -> Result<Vec<PickedItem>, String> {
    for path in paths {
        if !path.exists() {
            return Err(format!("Source does not exist: {}", path.display()));
        }
    }
    Ok(engine
        .add_dropped_paths(paths)
        .iter()
        .map(PickedItem::from)
        .collect())
}

fn check_destination(dest: &Path) -> Result<(), String> {
    if !dest.is_dir() {
        return Err(format!("Destination is not a directory: {}", dest.display()));
    }
    Ok(())
}

fn scan(engine: &Engine, args: &ScanArgs) -> Result<Outcome, String> {
    check_destination(&args.dest)?;
    let items = picked_items(engine, &args.paths)?;
    let preflight = engine.preflight_scan(&items, &args.dest);

    if args.json {
        println!("{}", to_json(&preflight)?);
    } else {
        print_preflight(&preflight);
    }

    Ok(if preflight.will_fit && preflight.unreadable_files == 0 {
        Outcome::Clean
    } else {
        Outcome::Incomplete
    })
}

fn print_preflight(pf: &Preflight) {
    println!("Files:      {} ({} folders picked)", pf.total_files, pf.total_folders);
    println!("Size:       {}", CliProgress::format_bytes(pf.total_bytes));
    println!("Available:  {}", CliProgress::format_bytes(pf.dest_avail_bytes));
    println!("Fits:       {}", if pf.will_fit { "yes" } else { "NO" });
    if pf.unreadable_files > 0 {
        println!("Unreadable: {}", pf.unreadable_files);
    }
    for (category, count) in &pf.by_category {
        println!("  {:<12} {}", category, count);
    }
}

fn transfer(engine: &Engine, args: &TransferArgs, verbose: bool) -> Result<Outcome, String> {
    check_destination(&args.dest)?;

    let copy_mode: CopyMode = args.mode.parse()?;
    let conflict_policy: ConflictPolicy = args.conflict.parse()?;
    let verify_mode: VerifyMode = args.verify.parse()?;
    if args.root_name.trim().is_empty() || args.root_name.contains(['/', '\\']) {
        return Err(format!("Invalid root directory name '{}'", args.root_name));
    }

    let items = picked_items(engine, &args.paths)?;
    let options = TransferOptions {
        dest_mount_point: args.dest.clone(),
        dest_root_dir_name: args.root_name.clone(),
        copy_mode,
        conflict_policy,
        verify_mode,
        group_by_date: args.group_by_date,
        group_by_type: !args.no_group_by_type,
        preserve_folder_structure: !args.flatten,
    };

    let progress = CliProgress::new(verbose);
    let summary = match engine.start_transfer(&items, &options, &progress) {
        Ok(summary) => summary,
        Err(EngineError::Aborted { cause, summary }) => {
            print_summary(&summary, &progress, args.json)?;
            return Err(format!("Transfer aborted: {}", cause));
        }
        Err(e) => return Err(e.to_string()),
    };

    print_summary(&summary, &progress, args.json)?;

    if summary.phase == Phase::Done && summary.error_files == 0 {
        Ok(Outcome::Clean)
    } else {
        Ok(Outcome::Incomplete)
    }
}

fn print_summary(summary: &TransferSummary, progress: &CliProgress, json: bool) -> Result<(), String> {
    if json {
        println!("{}", to_json(summary)?);
        return Ok(());
    }

    eprintln!("Transfer {}!", summary.phase);
    eprintln!(
        "Summary: {} copied, {} moved, {} skipped, {} failed of {}",
        summary.copied_files,
        summary.moved_files,
        summary.skipped_files,
        summary.error_files,
        summary.total_files
    );
    eprintln!("Bytes: {}", CliProgress::format_bytes(summary.total_bytes));
    eprintln!("Elapsed: {}", CliProgress::format_duration(progress.start_time.elapsed()));
    if !summary.output_session_dir.as_os_str().is_empty() {
        eprintln!("Output: {}", summary.output_session_dir.display());
    }

    if summary.error_files > 0 {
        if let Ok(manifest) = read_manifest(&summary.manifest_path()) {
            eprintln!();
            eprintln!("Failed files:");
            for entry in manifest.entries.iter().filter(|e| e.status == LeafStatus::Error) {
                eprintln!(
                    "  {}: {}",
                    entry.source_path.display(),
                    entry.error_message.as_deref().unwrap_or("(unknown error)")
                );
            }
        }
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON encoding failed: {}", e))
}
