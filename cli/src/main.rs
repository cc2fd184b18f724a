//! Xfer - Command-line interface for the transfer engine.
//!
//! Copies or moves single files, pattern batches and whole sessions described
//! by a TOML manifest, rendering engine events as progress on stderr.

mod logging;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;
use xfer_engine::{
    BatchRequest, EngineConfig, Event, EventScope, EventSink, EventType, Mode, Outcome, ResolvedItem,
    SessionSummary, TransferEngine,
};

/// Xfer - resilient file and image-sequence transfer
#[derive(Parser, Debug)]
#[command(name = "xfer")]
#[command(version = "0.1.0")]
#[command(about = "Copy or move files and image sequences with automatic fallback")]
struct Args {
    /// Engine configuration file (TOML)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Size of the single-file worker pool
    #[arg(long, global = true, value_name = "N")]
    workers: Option<usize>,

    /// Enable verbose output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy one file to an exact destination path
    Copy(FileArgs),
    /// Copy one file, then delete the source
    Move(FileArgs),
    /// Copy every file in a directory matching a pattern
    CopyBatch(BatchArgs),
    /// Batch copy, then delete every matched source
    MoveBatch(BatchArgs),
    /// Run every item listed in a session manifest
    Session(SessionArgs),
}

#[derive(clap::Args, Debug)]
struct FileArgs {
    /// Source file
    #[arg(long, value_name = "PATH")]
    src: PathBuf,

    /// Destination file path
    #[arg(long, value_name = "PATH")]
    dst: PathBuf,

    /// Job id to report in events (generated when omitted)
    #[arg(long, value_name = "ID")]
    job_id: Option<String>,
}

#[derive(clap::Args, Debug)]
struct BatchArgs {
    /// Source directory
    #[arg(long, value_name = "PATH")]
    src: PathBuf,

    /// Destination directory
    #[arg(long, value_name = "PATH")]
    dst: PathBuf,

    /// File name pattern, e.g. 'seq.*.exr'
    #[arg(long, value_name = "GLOB")]
    pattern: String,

    /// Expected number of matching files, if known
    #[arg(long, value_name = "N", default_value_t = 0)]
    expected_files: u64,

    /// Job id to report in events (generated when omitted)
    #[arg(long, value_name = "ID")]
    job_id: Option<String>,
}

#[derive(clap::Args, Debug)]
struct SessionArgs {
    /// Session manifest (TOML with [[items]] tables)
    #[arg(long, value_name = "PATH")]
    manifest: PathBuf,

    /// Operation mode: copy or move (overrides the manifest)
    #[arg(long, value_name = "MODE")]
    mode: Option<String>,
}

/// Session manifest file.
///
/// ```toml
/// mode = "copy"
///
/// [[items]]
/// kind = "file"
/// source = "/renders/notes.txt"
/// destination = "/archive/notes.txt"
///
/// [[items]]
/// kind = "sequence"
/// members = ["/renders/seq.0001.exr", "/renders/seq.0002.exr"]
/// destination = "/archive/seq"
/// ```
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    mode: Option<Mode>,
    items: Vec<ResolvedItem>,
}

fn load_manifest(path: &Path) -> Result<Manifest, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read manifest {}: {}", path.display(), e))?;
    toml::from_str(&content).map_err(|e| format!("Invalid manifest {}: {}", path.display(), e))
}

fn parse_mode(mode: &str) -> Result<Mode, String> {
    match mode.to_lowercase().as_str() {
        "copy" => Ok(Mode::Copy),
        "move" => Ok(Mode::Move),
        _ => Err(format!("Invalid mode '{}'. Must be 'copy' or 'move'", mode)),
    }
}

/// Defaults, then the config file, then the environment, then flags.
fn load_config(args: &Args) -> Result<EngineConfig, String> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    config.apply_env().map_err(|e| e.to_string())?;
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Renders engine events as progress lines on stderr.
struct CliProgress {
    verbose: bool,
    start_time: Instant,
    last_progress_update: Mutex<Option<Instant>>,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
            last_progress_update: Mutex::new(None),
        }
    }

    fn format_speed(mbps: f64) -> String {
        if mbps <= 0.0 {
            return "-".to_string();
        }
        format!("{}/s", Self::format_bytes((mbps * 1024.0 * 1024.0) as u64))
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

    fn print_progress_bar(percent: u32) -> String {
        let percent = percent.min(100);
        let filled = (percent / 5) as usize;
        let empty = 20 - filled;
        format!("[{}{}] {}%", "=".repeat(filled), " ".repeat(empty), percent)
    }

    fn subject_name(event: &Event) -> String {
        event
            .subject_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| event.subject_path.display().to_string())
    }

    fn render_progress(&self, event: &Event) {
        // Throttle progress updates to avoid spam (max once per 200ms)
        {
            let mut last = self.last_progress_update.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = *last {
                if previous.elapsed() < Duration::from_millis(200) && !self.verbose {
                    return;
                }
            }
            *last = Some(Instant::now());
        }

        let label = match event.scope {
            EventScope::Session => "Session".to_string(),
            EventScope::Job => Self::subject_name(event),
        };
        let eta = event
            .eta_seconds
            .filter(|s| s.is_finite())
            .map(|s| Self::format_duration(Duration::from_secs_f64(s.max(0.0))))
            .unwrap_or_else(|| "-".to_string());
        let mut line = format!(
            "{} {} | {}/{} files | {} | ETA {}",
            label,
            Self::print_progress_bar(event.percent as u32),
            event.files_done,
            event.files_total,
            Self::format_speed(event.speed_mbps),
            eta
        );
        if !event.message.is_empty() {
            line.push_str(&format!(" ({})", event.message));
        }

        if self.verbose {
            eprintln!("{}", line);
        } else {
            eprint!("\r{:<100}", line);
            let _ = std::io::Write::flush(&mut std::io::stderr());
        }
    }

    fn render_terminal(&self, event: &Event) {
        let status = match event.event_type {
            EventType::Success => "Done",
            EventType::Warning => "Warning",
            EventType::Cancelled => "Cancelled",
            EventType::Error => "Failed",
            EventType::Progress => return,
        };
        if !self.verbose {
            eprintln!();
        }
        eprintln!(
            "{}: {} ({}/{} files) {}",
            status,
            event.subject_path.display(),
            event.files_done,
            event.files_total,
            event.message
        );
    }
}

impl EventSink for CliProgress {
    fn emit(&self, event: Event) {
        match (event.scope, event.event_type) {
            (_, EventType::Progress) => self.render_progress(&event),
            (EventScope::Job, _) => self.render_terminal(&event),
            (EventScope::Session, _) => {
                eprintln!();
                eprintln!("Session complete: {}", event.message);
            }
        }
    }
}

fn report_outcome(outcome: &Outcome, progress: &CliProgress) -> Result<(), String> {
    eprintln!("Bytes transferred: {}", CliProgress::format_bytes(outcome.bytes_transferred));
    eprintln!("Elapsed: {}", CliProgress::format_duration(progress.start_time.elapsed()));
    if let Some(strategy) = outcome.strategy {
        eprintln!("Strategy: {}", strategy);
    }
    match &outcome.error {
        None if outcome.is_success() => Ok(()),
        None => Err(format!("Transfer ended as {:?}", outcome.status)),
        Some(e) => Err(format!("Transfer ended as {:?}: {}", outcome.status, e)),
    }
}

fn report_summary(summary: &SessionSummary) -> Result<(), String> {
    eprintln!(
        "Summary: {} succeeded, {} failed, {} cancelled, {} copied but not deleted",
        summary.succeeded, summary.failed, summary.cancelled, summary.copied_not_deleted
    );
    eprintln!(
        "Started: {}",
        summary.started_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
    );
    eprintln!(
        "Files: {}/{} | Elapsed: {}",
        summary.aggregate_files_done,
        summary.aggregate_total_files,
        CliProgress::format_duration(summary.elapsed)
    );

    let unfinished: Vec<&Outcome> = summary.outcomes.iter().filter(|o| !o.is_success()).collect();
    if unfinished.is_empty() {
        return Ok(());
    }
    eprintln!();
    eprintln!("Unfinished jobs:");
    for outcome in &unfinished {
        match &outcome.error {
            Some(e) => eprintln!("  {}: {}", outcome.subject_path.display(), e),
            None => eprintln!("  {}: {:?}", outcome.subject_path.display(), outcome.status),
        }
    }
    Err(format!("{} job(s) did not complete", unfinished.len()))
}

/// Parse and validate command-line arguments, then run the transfer
fn main() {
    let args = Args::parse();
    logging::init_tracing(args.verbose);

    // Exit code tracking
    let exit_code = match run_cli(&args) {
        Ok(()) => 0,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<(), String> {
    let config = load_config(args)?;
    let engine = TransferEngine::new(config).map_err(|e| e.to_string())?;
    debug!(strategies = ?engine.strategy_names(), "engine ready");
    let progress = CliProgress::new(args.verbose);

    match &args.command {
        Command::Copy(file) | Command::Move(file) => {
            let job_id = file.job_id.as_deref();
            let outcome = if matches!(args.command, Command::Move(_)) {
                engine.move_file(&file.src, &file.dst, &progress, job_id)
            } else {
                engine.copy(&file.src, &file.dst, &progress, job_id)
            };
            report_outcome(&outcome, &progress)
        }
        Command::CopyBatch(batch) | Command::MoveBatch(batch) => {
            let request = BatchRequest {
                expected_file_count: batch.expected_files,
                ..BatchRequest::new(&batch.src, &batch.dst, batch.pattern.clone())
            };
            let job_id = batch.job_id.as_deref();
            let outcome = if matches!(args.command, Command::MoveBatch(_)) {
                engine.move_batch(&request, &progress, job_id)
            } else {
                engine.copy_batch(&request, &progress, job_id)
            };
            report_outcome(&outcome, &progress)
        }
        Command::Session(session) => {
            let manifest = load_manifest(&session.manifest)?;
            let mode = match &session.mode {
                Some(mode) => parse_mode(mode)?,
                None => manifest.mode.unwrap_or(Mode::Copy),
            };
            if manifest.items.is_empty() {
                return Err(format!("Manifest {} lists no items", session.manifest.display()));
            }
            eprintln!("Running {} item(s) ({})", manifest.items.len(), mode);
            let summary = engine.run_session(manifest.items, mode, 0, &progress);
            report_summary(&summary)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(command: Command) -> Args {
        Args {
            config: None,
            workers: None,
            verbose: false,
            command,
        }
    }

    #[test]
    fn test_parse_subcommands() {
        let parsed = Args::try_parse_from([
            "xfer",
            "copy-batch",
            "--src",
            "/in",
            "--dst",
            "/out",
            "--pattern",
            "seq.*.exr",
            "--workers",
            "4",
        ])
        .expect("Failed to parse args");
        assert_eq!(parsed.workers, Some(4));
        match parsed.command {
            Command::CopyBatch(batch) => {
                assert_eq!(batch.pattern, "seq.*.exr");
                assert_eq!(batch.expected_files, 0);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_copies_file() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        let src = src_dir.path().join("test.txt");
        std::fs::write(&src, "hello").expect("Failed to write file");
        let dst = dst_dir.path().join("nested").join("test.txt");

        let result = run_cli(&args(Command::Copy(FileArgs {
            src: src.clone(),
            dst: dst.clone(),
            job_id: None,
        })));
        assert!(result.is_ok(), "CLI should succeed: {:?}", result);
        assert_eq!(std::fs::read_to_string(&dst).expect("Failed to read copy"), "hello");
        assert!(src.exists());
    }

    #[test]
    fn test_cli_moves_batch() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        for i in 1..=3 {
            std::fs::write(src_dir.path().join(format!("seq.{:04}.exr", i)), "frame").expect("Failed to write file");
        }

        let result = run_cli(&args(Command::MoveBatch(BatchArgs {
            src: src_dir.path().to_path_buf(),
            dst: dst_dir.path().to_path_buf(),
            pattern: "seq.*.exr".to_string(),
            expected_files: 3,
            job_id: Some("batch-1".to_string()),
        })));
        assert!(result.is_ok(), "CLI should succeed: {:?}", result);
        assert!(dst_dir.path().join("seq.0002.exr").exists());
        assert!(!src_dir.path().join("seq.0002.exr").exists());
    }

    #[test]
    fn test_cli_rejects_missing_source() {
        let dst_dir = TempDir::new().expect("Failed to create temp dir");

        let result = run_cli(&args(Command::Copy(FileArgs {
            src: PathBuf::from("/nonexistent/path/file.bin"),
            dst: dst_dir.path().join("file.bin"),
            job_id: None,
        })));
        assert!(result.is_err(), "CLI should reject missing source");
    }

    #[test]
    fn test_cli_runs_session_manifest() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let src = work.path().join("src");
        std::fs::create_dir(&src).expect("Failed to create src");
        std::fs::write(src.join("a.txt"), "a").expect("Failed to write file");
        for i in 1..=2 {
            std::fs::write(src.join(format!("shot.{}.dpx", i)), "frame").expect("Failed to write file");
        }
        let out = work.path().join("out");
        let manifest = format!(
            r#"
mode = "copy"

[[items]]
kind = "file"
source = "{src}/a.txt"
destination = "{out}/a.txt"

[[items]]
kind = "sequence"
members = ["{src}/shot.1.dpx", "{src}/shot.2.dpx"]
destination = "{out}/shots"
"#,
            src = src.display(),
            out = out.display()
        );
        let manifest_path = work.path().join("session.toml");
        std::fs::write(&manifest_path, manifest).expect("Failed to write manifest");

        let result = run_cli(&args(Command::Session(SessionArgs {
            manifest: manifest_path,
            mode: None,
        })));
        assert!(result.is_ok(), "CLI should succeed: {:?}", result);
        assert!(out.join("a.txt").exists());
        assert!(out.join("shots").join("shot.2.dpx").exists());
    }

    #[test]
    fn test_cli_rejects_invalid_mode() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let manifest_path = work.path().join("session.toml");
        std::fs::write(&manifest_path, "items = []\n").expect("Failed to write manifest");

        let result = run_cli(&args(Command::Session(SessionArgs {
            manifest: manifest_path,
            mode: Some("teleport".to_string()),
        })));
        assert!(result.is_err(), "CLI should reject invalid mode");
    }

    #[test]
    fn test_cli_rejects_invalid_config() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let config_path = work.path().join("xfer.toml");
        std::fs::write(&config_path, "worker_count = 0\n").expect("Failed to write config");

        let mut cli = args(Command::Copy(FileArgs {
            src: config_path.clone(),
            dst: work.path().join("copy.toml"),
            job_id: None,
        }));
        cli.config = Some(config_path);
        assert!(run_cli(&cli).is_err(), "CLI should reject zero workers");
    }

    #[test]
    fn test_workers_flag_overrides_config() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let config_path = work.path().join("xfer.toml");
        std::fs::write(&config_path, "worker_count = 2\nbatch_lanes = 2\n").expect("Failed to write config");

        let mut cli = args(Command::Session(SessionArgs {
            manifest: work.path().join("unused.toml"),
            mode: None,
        }));
        cli.config = Some(config_path);
        cli.workers = Some(6);
        let config = load_config(&cli).expect("Failed to load config");
        assert_eq!(config.worker_count, 6);
        assert_eq!(config.batch_lanes, 2);
    }

    #[test]
    fn test_progress_formatting() {
        assert_eq!(CliProgress::format_bytes(1536), "1.50 KB");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(3725)), "1h 2m 5s");
        assert_eq!(CliProgress::print_progress_bar(50), "[==========          ] 50%");
        assert_eq!(CliProgress::print_progress_bar(250), "[====================] 100%");
        assert_eq!(CliProgress::format_speed(0.0), "-");
    }
}
