//! Job lifecycle.
//!
//! This module provides:
//! - Creating single-file and sequence-batch jobs (input validation only)
//! - Running one job to its terminal state: strategy chain, move semantics,
//!   cleanup of partial output and exactly one terminal event

use crate::config::EngineConfig;
use crate::control::SessionControl;
use crate::error::{SourceKind, TransferError};
use crate::events::{Event, EventScope, EventSink, EventType};
use crate::fs_ops;
use crate::model::{JobSource, JobStatus, Mode, Outcome, TransferJob};
use crate::pattern;
use crate::progress::{ProgressSample, ProgressSink};
use crate::strategy::{CopyTarget, StrategyChain, StrategyContext};
use std::collections::HashSet;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Fresh job identifier.
pub fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

/// Create a job copying one file to an exact destination path.
///
/// # Errors
/// `InvalidInput` if the source file does not exist or the destination is empty,
/// `SourceKindMismatch` if the source is a directory.
pub fn create_single_file_job<P: AsRef<Path>, Q: AsRef<Path>>(
    source: P,
    destination: Q,
) -> Result<TransferJob, TransferError> {
    single_file_job(new_job_id(), Mode::Copy, source.as_ref(), destination.as_ref())
}

/// Create a job copying every file in `source_dir` matching `pattern` into
/// `destination_dir`. `expected_file_count` may be 0 when unknown.
///
/// # Errors
/// `InvalidInput` if the source directory does not exist or the pattern is unusable.
pub fn create_batch_job<P: AsRef<Path>, Q: AsRef<Path>>(
    source_dir: P,
    pattern: &str,
    destination_dir: Q,
    expected_file_count: u64,
) -> Result<TransferJob, TransferError> {
    batch_job(
        new_job_id(),
        Mode::Copy,
        source_dir.as_ref(),
        pattern,
        destination_dir.as_ref(),
        expected_file_count,
        0,
    )
}

pub(crate) fn single_file_job(
    id: String,
    mode: Mode,
    source: &Path,
    destination: &Path,
) -> Result<TransferJob, TransferError> {
    check_destination(destination)?;
    let size = check_source(source, SourceKind::File)?;
    if fs_ops::same_location(source, destination) {
        return Err(TransferError::InvalidInput {
            path: destination.to_path_buf(),
            reason: "Destination is the source file itself".to_string(),
        });
    }
    Ok(TransferJob::new(
        id,
        mode,
        JobSource::File(source.to_path_buf()),
        destination.to_path_buf(),
        1,
        size,
    ))
}

pub(crate) fn batch_job(
    id: String,
    mode: Mode,
    source_dir: &Path,
    pattern: &str,
    destination_dir: &Path,
    expected_file_count: u64,
    expected_total_bytes: u64,
) -> Result<TransferJob, TransferError> {
    check_batch(source_dir, pattern, destination_dir)?;
    Ok(TransferJob::new(
        id,
        mode,
        JobSource::Batch {
            directory: source_dir.to_path_buf(),
            pattern: pattern.to_string(),
            members: None,
        },
        destination_dir.to_path_buf(),
        expected_file_count,
        expected_total_bytes,
    ))
}

/// Batch job limited to `members`, which all live in `source_dir` and match
/// `pattern`. Other pattern matches in the directory are never touched.
pub(crate) fn selected_batch_job(
    id: String,
    mode: Mode,
    source_dir: &Path,
    pattern: &str,
    members: Vec<PathBuf>,
    destination_dir: &Path,
    expected_total_bytes: u64,
) -> Result<TransferJob, TransferError> {
    check_batch(source_dir, pattern, destination_dir)?;
    let belongs = |member: &PathBuf| {
        member.parent() == Some(source_dir)
            && member
                .file_name()
                .map_or(false, |name| pattern::matches_pattern(pattern, &name.to_string_lossy()))
    };
    if let Some(stray) = members.iter().find(|m| !belongs(m)) {
        return Err(TransferError::InvalidInput {
            path: stray.clone(),
            reason: format!("Not a '{}' file in {}", pattern, source_dir.display()),
        });
    }
    let count = members.len() as u64;
    Ok(TransferJob::new(
        id,
        mode,
        JobSource::Batch {
            directory: source_dir.to_path_buf(),
            pattern: pattern.to_string(),
            members: Some(members),
        },
        destination_dir.to_path_buf(),
        count,
        expected_total_bytes,
    ))
}

fn check_batch(source_dir: &Path, pattern: &str, destination_dir: &Path) -> Result<(), TransferError> {
    check_destination(destination_dir)?;
    if !pattern::is_valid_pattern(pattern) {
        return Err(TransferError::InvalidInput {
            path: source_dir.join(pattern),
            reason: format!("'{}' is not a usable file name pattern", pattern),
        });
    }
    check_source(source_dir, SourceKind::Directory)?;
    if fs_ops::same_location(source_dir, destination_dir) {
        return Err(TransferError::InvalidInput {
            path: destination_dir.to_path_buf(),
            reason: "Destination directory is the source directory".to_string(),
        });
    }
    Ok(())
}

fn check_destination(destination: &Path) -> Result<(), TransferError> {
    if destination.as_os_str().is_empty() {
        return Err(TransferError::InvalidInput {
            path: destination.to_path_buf(),
            reason: "Destination path is empty".to_string(),
        });
    }
    Ok(())
}

fn check_source(path: &Path, kind: SourceKind) -> Result<u64, TransferError> {
    fs_ops::validate_source(path, kind).map_err(|e| match e {
        TransferError::SourceNotFound { path } => TransferError::InvalidInput {
            path,
            reason: format!("Source {} does not exist", kind),
        },
        other => other,
    })
}

/// Deletes sources after a verified move.
pub trait SourceRemover: Send + Sync {
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// Removes sources from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRemover;

impl SourceRemover for FsRemover {
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(fs_ops::extended_length_path(path))
    }
}

/// Everything a job needs from its engine or session while running.
pub(crate) struct JobContext<'a> {
    pub chain: &'a StrategyChain,
    pub config: &'a EngineConfig,
    pub control: &'a SessionControl,
    pub remover: &'a dyn SourceRemover,
    pub events: &'a dyn EventSink,
    /// Receives newly completed file counts (deltas, never totals)
    pub on_files: Option<&'a (dyn Fn(u64) + Sync)>,
}

#[derive(Debug, Default)]
struct ReporterState {
    percent: f64,
    files_done: u64,
}

/// Turns strategy progress samples into job-scoped events.
///
/// Percent and file counts never go backwards for a job, even when a fallback
/// strategy restarts the copy.
struct JobReporter<'a> {
    job_id: String,
    subject: PathBuf,
    events: &'a dyn EventSink,
    on_files: Option<&'a (dyn Fn(u64) + Sync)>,
    state: Mutex<ReporterState>,
}

impl<'a> JobReporter<'a> {
    fn new(job: &TransferJob, ctx: &JobContext<'a>) -> Self {
        JobReporter {
            job_id: job.id().to_string(),
            subject: job.subject_path(),
            events: ctx.events,
            on_files: ctx.on_files,
            state: Mutex::new(ReporterState::default()),
        }
    }

    /// Raise the job's file count to `files_done`, forwarding only the increase.
    fn advance(&self, state: &mut ReporterState, files_done: u64) {
        if files_done > state.files_done {
            let delta = files_done - state.files_done;
            state.files_done = files_done;
            if let Some(on_files) = self.on_files {
                on_files(delta);
            }
        }
    }

    fn finish(&self, files_total: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.advance(&mut state, files_total);
    }
}

impl ProgressSink for JobReporter<'_> {
    fn report(&self, sample: ProgressSample) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.percent = state.percent.max(sample.percent);
        let mut event = Event::new(EventType::Progress, EventScope::Job, &self.job_id, &self.subject)
            .with_files(sample.files_done.max(state.files_done), sample.files_total)
            .with_percent(state.percent)
            .with_rate(sample.bytes_per_sec, sample.eta_seconds);
        if let Some(idle) = sample.stalled_for {
            event = event.with_message(format!("no progress for {}s", idle.as_secs()));
        }
        self.events.emit(event);
        self.advance(&mut state, sample.files_done);
    }
}

/// What a job resolved to just before its first strategy ran.
struct Plan {
    members: Vec<PathBuf>,
    /// The batch pattern matches nothing in the source but `members`
    exact: bool,
    /// Destination files present before the job touched anything
    preexisting: HashSet<OsString>,
    size: u64,
}

/// Run `job` to a terminal state and emit its terminal event.
pub(crate) fn run_job(mut job: TransferJob, ctx: &JobContext<'_>) -> Outcome {
    let started = Instant::now();

    if ctx.control.is_cancelled() {
        info!(job = job.id(), "job cancelled before start");
        job.fail(JobStatus::Cancelled, TransferError::Cancelled);
        return finish(job, None, ctx, started);
    }

    let plan = match plan(&mut job, ctx.config) {
        Ok(plan) => plan,
        Err(e) => {
            warn!(job = job.id(), error = %e, "job could not start");
            job.fail(JobStatus::Failed, e);
            return finish(job, None, ctx, started);
        }
    };

    info!(
        job = job.id(),
        mode = %job.mode(),
        subject = %job.subject_path().display(),
        files = plan.members.len(),
        "job started"
    );

    let reporter = JobReporter::new(&job, ctx);
    let strategy_ctx = StrategyContext {
        config: ctx.config,
        control: ctx.control,
        progress: &reporter,
    };
    let destination = job.destination().to_path_buf();
    let result = match job.source().clone() {
        JobSource::File(source) => {
            let target = CopyTarget::File {
                source: &source,
                destination: &destination,
                size: plan.size,
            };
            ctx.chain.run(&mut job, &target, &strategy_ctx)
        }
        JobSource::Batch { directory, pattern, .. } => {
            let target = CopyTarget::Batch {
                source_dir: &directory,
                pattern: &pattern,
                exact: plan.exact,
                destination_dir: &destination,
                members: &plan.members,
                total_bytes: plan.size,
                baseline: plan.preexisting.len() as u64,
            };
            ctx.chain.run(&mut job, &target, &strategy_ctx)
        }
    };

    match result {
        Ok(success) => {
            job.record_transfer(success.files_moved, success.bytes_moved);
            reporter.finish(success.files_moved);
            if job.mode() == Mode::Move {
                if let Err(e) = remove_sources(&plan.members, ctx.remover) {
                    warn!(job = job.id(), error = %e, "source kept after verified copy");
                    job.fail(JobStatus::CopiedButNotDeleted, e);
                    return finish(job, Some(success.strategy), ctx, started);
                }
            }
            job.transition(JobStatus::Completed);
            finish(job, Some(success.strategy), ctx, started)
        }
        Err(e) => {
            remove_created(&job, &plan);
            let status = if matches!(e, TransferError::Cancelled) {
                JobStatus::Cancelled
            } else {
                JobStatus::Failed
            };
            job.fail(status, e);
            finish(job, None, ctx, started)
        }
    }
}

fn plan(job: &mut TransferJob, config: &EngineConfig) -> Result<Plan, TransferError> {
    match job.source().clone() {
        JobSource::File(source) => {
            let size = fs_ops::validate_source(&source, SourceKind::File)?;
            job.set_expected_total_bytes(size);
            let preexisting = match (fs_ops::file_size(job.destination()), job.destination().file_name()) {
                (Some(_), Some(name)) => HashSet::from([name.to_os_string()]),
                _ => HashSet::new(),
            };
            Ok(Plan {
                members: vec![source],
                exact: true,
                preexisting,
                size,
            })
        }
        JobSource::Batch {
            directory,
            pattern,
            members: selected,
        } => {
            fs_ops::validate_source(&directory, SourceKind::Directory)?;
            let matches = fs_ops::list_matching(&directory, &pattern).map_err(|e| TransferError::InvalidInput {
                path: directory.clone(),
                reason: e.to_string(),
            })?;
            let (members, exact) = match selected {
                None => (matches, true),
                Some(selected) => {
                    for member in &selected {
                        fs_ops::validate_source(member, SourceKind::File)?;
                    }
                    let matched: HashSet<_> = matches.iter().filter_map(|m| m.file_name()).collect();
                    let exact = matched.len() == selected.len()
                        && selected.iter().all(|m| m.file_name().map_or(false, |n| matched.contains(n)));
                    (selected, exact)
                }
            };
            if members.is_empty() {
                return Err(TransferError::SourceNotFound {
                    path: directory.join(&pattern),
                });
            }
            job.set_expected_file_count(members.len() as u64);
            let size = if config.precompute_batch_sizes {
                job.set_expected_total_bytes(fs_ops::total_size(&members));
                job.expected_total_bytes()
            } else {
                0
            };
            let preexisting = fs_ops::list_matching(job.destination(), &pattern)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|path| path.file_name().map(|n| n.to_os_string()))
                .collect();
            Ok(Plan {
                members,
                exact,
                preexisting,
                size,
            })
        }
    }
}

/// Delete every source, attempting all of them and reporting the first failure.
fn remove_sources(sources: &[PathBuf], remover: &dyn SourceRemover) -> Result<(), TransferError> {
    let mut first_failure = None;
    for source in sources {
        if let Err(e) = remover.remove_file(source) {
            warn!(path = %source.display(), error = %e, "failed to delete source");
            first_failure.get_or_insert(TransferError::CopiedButNotDeleted {
                path: source.clone(),
                source: e,
            });
        }
    }
    first_failure.map_or(Ok(()), Err)
}

/// Best-effort removal of destination files this job created.
fn remove_created(job: &TransferJob, plan: &Plan) {
    let created: Vec<PathBuf> = match job.source() {
        JobSource::File(_) => {
            let destination = job.destination();
            let existed = destination
                .file_name()
                .map_or(false, |name| plan.preexisting.contains(name));
            if existed {
                Vec::new()
            } else {
                vec![destination.to_path_buf()]
            }
        }
        JobSource::Batch { .. } => plan
            .members
            .iter()
            .filter_map(|member| member.file_name())
            .filter(|name| !plan.preexisting.contains(*name))
            .map(|name| job.destination().join(name))
            .collect(),
    };
    fs_ops::remove_artifacts(&created);
}

/// Emit the job's single terminal event and convert it into its outcome.
fn finish(job: TransferJob, strategy: Option<&'static str>, ctx: &JobContext<'_>, started: Instant) -> Outcome {
    let subject = job.subject_path();
    let (event_type, message) = match (job.status(), job.error()) {
        (JobStatus::Completed, _) => (
            EventType::Success,
            format!("{} via {}", if job.mode() == Mode::Move { "moved" } else { "copied" }, strategy.unwrap_or("-")),
        ),
        (JobStatus::CopiedButNotDeleted, Some(e)) => (EventType::Warning, e.to_string()),
        (JobStatus::Cancelled, _) => (EventType::Cancelled, TransferError::Cancelled.to_string()),
        (_, Some(e)) => (EventType::Error, e.to_string()),
        (status, None) => (EventType::Error, format!("job ended as {:?}", status)),
    };

    let elapsed = started.elapsed().as_secs_f64();
    let rate = (elapsed > 0.0 && job.transferred_bytes() > 0).then(|| job.transferred_bytes() as f64 / elapsed);
    let mut event = Event::new(event_type, EventScope::Job, job.id(), &subject)
        .with_files(job.transferred_files(), job.expected_file_count())
        .with_rate(rate, None)
        .with_message(message);
    if job.transferred_files() > 0 {
        event = event.with_percent(100.0);
    }

    match event_type {
        EventType::Success => info!(job = job.id(), strategy = ?strategy, "job completed"),
        EventType::Cancelled => info!(job = job.id(), "job cancelled"),
        _ => error!(job = job.id(), status = ?job.status(), message = %event.message, "job did not complete"),
    }
    ctx.events.emit(event);
    job.into_outcome(strategy)
}
