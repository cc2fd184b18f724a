//! Session orchestration.
//!
//! A session classifies resolved items into jobs, runs sequence batches on
//! their own lane(s) and single files on a bounded worker pool, aggregates
//! per-job file deltas into one session counter, and ends with a summary.
//!
//! All events travel through one channel and are forwarded to the caller's
//! sink by the thread that started the session.

use crate::config::EngineConfig;
use crate::control::SessionControl;
use crate::error::TransferError;
use crate::events::{Event, EventBus, EventScope, EventSink, EventType};
use crate::fs_ops;
use crate::job::{self, JobContext, SourceRemover};
use crate::model::{JobKind, JobStatus, Mode, Outcome, ResolvedItem, TransferJob};
use crate::pattern;
use crate::strategy::StrategyChain;
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Final report of a session.
#[derive(Debug)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub copied_not_deleted: usize,
    pub aggregate_files_done: u64,
    pub aggregate_total_files: u64,
    /// Final job table, ordered by subject path
    pub jobs: Vec<JobEntry>,
    /// One per item, in completion order
    pub outcomes: Vec<Outcome>,
}

impl SessionSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.cancelled == 0 && self.copied_not_deleted == 0
    }

    fn event_type(&self) -> EventType {
        if self.failed > 0 {
            EventType::Error
        } else if self.cancelled > 0 {
            EventType::Cancelled
        } else if self.copied_not_deleted > 0 {
            EventType::Warning
        } else {
            EventType::Success
        }
    }

    fn message(&self) -> String {
        let mut message = format!(
            "{} succeeded, {} failed, {} cancelled",
            self.succeeded, self.failed, self.cancelled
        );
        if self.copied_not_deleted > 0 {
            message.push_str(&format!(", {} copied but not deleted", self.copied_not_deleted));
        }
        message
    }
}

/// Row of the session's job table.
#[derive(Debug, Clone)]
pub struct JobEntry {
    pub job_id: String,
    pub kind: JobKind,
    pub subject_path: PathBuf,
    pub files_total: u64,
    pub status: JobStatus,
}

struct SessionState {
    jobs: HashMap<String, JobEntry>,
    aggregate_files_done: u64,
    outcomes: Vec<Outcome>,
}

/// One run over a list of resolved items.
///
/// Owns the job table and the aggregate counter behind a single mutex.
pub(crate) struct BatchSession {
    id: String,
    started_at: DateTime<Utc>,
    started: Instant,
    aggregate_total_files: u64,
    /// Average bytes per file, 0 when sizes are unknown
    bytes_per_file: f64,
    state: Mutex<SessionState>,
}

impl BatchSession {
    fn new(aggregate_total_files: u64, total_bytes: u64) -> Self {
        let bytes_per_file = if aggregate_total_files > 0 {
            total_bytes as f64 / aggregate_total_files as f64
        } else {
            0.0
        };
        BatchSession {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            started: Instant::now(),
            aggregate_total_files,
            bytes_per_file,
            state: Mutex::new(SessionState {
                jobs: HashMap::new(),
                aggregate_files_done: 0,
                outcomes: Vec::new(),
            }),
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, job: &TransferJob) {
        self.lock().jobs.insert(
            job.id().to_string(),
            JobEntry {
                job_id: job.id().to_string(),
                kind: job.kind(),
                subject_path: job.subject_path(),
                files_total: job.expected_file_count(),
                status: job.status(),
            },
        );
    }

    fn set_status(&self, job_id: &str, status: JobStatus) {
        if let Some(entry) = self.lock().jobs.get_mut(job_id) {
            entry.status = status;
        }
    }

    /// Add a job's file delta and emit the session progress event while the
    /// lock is held, so session events leave in counter order.
    fn record_files(&self, delta: u64, events: &dyn EventSink) {
        let mut state = self.lock();
        let done = (state.aggregate_files_done + delta).min(self.aggregate_total_files);
        if done == state.aggregate_files_done {
            return;
        }
        state.aggregate_files_done = done;
        events.emit(self.progress_event(done));
    }

    fn progress_event(&self, done: u64) -> Event {
        let total = self.aggregate_total_files;
        let elapsed = self.started.elapsed().as_secs_f64();
        let percent = if total > 0 {
            done as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let files_per_sec = (elapsed > 0.0).then(|| done as f64 / elapsed);
        let speed = files_per_sec
            .filter(|_| self.bytes_per_file > 0.0)
            .map(|fps| fps * self.bytes_per_file);
        let eta = files_per_sec
            .filter(|fps| *fps > 0.0)
            .map(|fps| total.saturating_sub(done) as f64 / fps);

        Event::new(EventType::Progress, EventScope::Session, &self.id, Path::new(""))
            .with_files(done, total)
            .with_percent(percent)
            .with_rate(speed, eta)
    }

    /// Record a terminal outcome. Items rejected before they became jobs
    /// enter the table here.
    fn complete(&self, outcome: Outcome) {
        let mut state = self.lock();
        state
            .jobs
            .entry(outcome.job_id.clone())
            .and_modify(|entry| entry.status = outcome.status)
            .or_insert_with(|| JobEntry {
                job_id: outcome.job_id.clone(),
                kind: outcome.kind,
                subject_path: outcome.subject_path.clone(),
                files_total: outcome.files_expected,
                status: outcome.status,
            });
        state.outcomes.push(outcome);
    }

    fn into_summary(self) -> SessionSummary {
        let elapsed = self.started.elapsed();
        let state = self.state.into_inner().unwrap_or_else(|e| e.into_inner());
        let mut jobs: Vec<JobEntry> = state.jobs.into_values().collect();
        jobs.sort_by(|a, b| a.subject_path.cmp(&b.subject_path));
        let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();
        SessionSummary {
            session_id: self.id,
            started_at: self.started_at,
            elapsed,
            succeeded: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
            cancelled: count(JobStatus::Cancelled),
            copied_not_deleted: count(JobStatus::CopiedButNotDeleted),
            aggregate_files_done: state.aggregate_files_done,
            aggregate_total_files: self.aggregate_total_files,
            jobs,
            outcomes: state.outcomes,
        }
    }
}

/// Engine services shared by every job in a session.
pub(crate) struct SessionServices<'a> {
    pub chain: &'a StrategyChain,
    pub config: &'a EngineConfig,
    pub control: &'a SessionControl,
    pub remover: &'a dyn SourceRemover,
}

/// Items after classification.
struct Classified {
    batches: Vec<TransferJob>,
    files: Vec<TransferJob>,
    rejected: Vec<Outcome>,
}

/// Turn resolved items into jobs. Items that cannot become a job are
/// returned as failed outcomes.
fn classify(items: Vec<ResolvedItem>, mode: Mode, config: &EngineConfig) -> Classified {
    let mut classified = Classified {
        batches: Vec::new(),
        files: Vec::new(),
        rejected: Vec::new(),
    };
    for item in items {
        let id = job::new_job_id();
        match item {
            ResolvedItem::File { source, destination } => {
                match job::single_file_job(id.clone(), mode, &source, &destination) {
                    Ok(job) => classified.files.push(job),
                    Err(e) => classified
                        .rejected
                        .push(Outcome::rejected(id, JobKind::SingleFile, mode, source, 1, e)),
                }
            }
            ResolvedItem::Sequence { members, destination } => {
                let expected = members.len() as u64;
                match sequence_job(id.clone(), mode, &members, &destination, config) {
                    Ok(job) => classified.batches.push(job),
                    Err((subject, e)) => classified
                        .rejected
                        .push(Outcome::rejected(id, JobKind::SequenceBatch, mode, subject, expected, e)),
                }
            }
        }
    }
    classified
}

fn sequence_job(
    id: String,
    mode: Mode,
    members: &[PathBuf],
    destination: &Path,
    config: &EngineConfig,
) -> Result<TransferJob, (PathBuf, TransferError)> {
    let Some(first) = members.first() else {
        return Err((
            destination.to_path_buf(),
            TransferError::InvalidInput {
                path: destination.to_path_buf(),
                reason: "Sequence has no members".to_string(),
            },
        ));
    };
    let directory = first.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
    if members.iter().any(|m| m.parent() != first.parent()) {
        return Err((
            directory.clone(),
            TransferError::InvalidInput {
                path: directory,
                reason: "Sequence members are not in one directory".to_string(),
            },
        ));
    }
    let Some(glob) = pattern::sequence_pattern_for_paths(members) else {
        return Err((
            directory.clone(),
            TransferError::InvalidInput {
                path: directory,
                reason: "Sequence member names are not usable".to_string(),
            },
        ));
    };
    let mut seen = HashSet::new();
    let members: Vec<PathBuf> = members.iter().filter(|m| seen.insert(*m)).cloned().collect();
    let total_bytes = if config.precompute_batch_sizes {
        fs_ops::total_size(&members)
    } else {
        0
    };
    debug!(directory = %directory.display(), pattern = %glob, members = members.len(), "sequence classified");
    job::selected_batch_job(id, mode, &directory, &glob, members, destination, total_bytes)
        .map_err(|e| (directory.join(&glob), e))
}

/// Run every item to a terminal state and return the session summary.
///
/// `concurrency` bounds the single-file worker pool; sequence batches run on
/// `config.batch_lanes` lanes alongside it.
pub(crate) fn run_session(
    items: Vec<ResolvedItem>,
    mode: Mode,
    concurrency: usize,
    services: &SessionServices<'_>,
    sink: &dyn EventSink,
) -> SessionSummary {
    let Classified {
        batches,
        files,
        rejected,
    } = classify(items, mode, services.config);

    let queued = batches.iter().chain(files.iter());
    let total_files: u64 = queued.clone().map(|j| j.expected_file_count()).sum();
    let total_bytes: u64 = queued.clone().map(|j| j.expected_total_bytes()).sum();
    let session = BatchSession::new(total_files, total_bytes);
    for job in batches.iter().chain(files.iter()) {
        session.register(job);
    }

    info!(
        session = session.id(),
        mode = %mode,
        batches = batches.len(),
        files = files.len(),
        rejected = rejected.len(),
        total_files,
        "session started"
    );

    for outcome in rejected {
        warn!(job = %outcome.job_id, subject = %outcome.subject_path.display(), "item rejected");
        let message = outcome.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
        sink.emit(
            Event::new(EventType::Error, EventScope::Job, &outcome.job_id, &outcome.subject_path)
                .with_files(0, outcome.files_expected)
                .with_message(message),
        );
        session.complete(outcome);
    }

    let batch_lanes = services.config.batch_lanes.max(1).min(batches.len());
    let file_workers = concurrency.max(1).min(files.len());
    let batch_queue = queue(batches);
    let file_queue = queue(files);
    let (bus, events) = EventBus::new();

    thread::scope(|s| {
        for _ in 0..batch_lanes {
            let (session, queue, bus) = (&session, batch_queue.clone(), bus.clone());
            s.spawn(move || worker(session, queue, services, bus));
        }
        for _ in 0..file_workers {
            let (session, queue, bus) = (&session, file_queue.clone(), bus.clone());
            s.spawn(move || worker(session, queue, services, bus));
        }
        // The receiver drains once every worker has dropped its bus handle.
        drop(bus);
        for event in events.iter() {
            sink.emit(event);
        }
    });

    let summary = session.into_summary();
    info!(
        session = %summary.session_id,
        succeeded = summary.succeeded,
        failed = summary.failed,
        cancelled = summary.cancelled,
        copied_not_deleted = summary.copied_not_deleted,
        elapsed = ?summary.elapsed,
        "session finished"
    );
    sink.emit(
        Event::new(summary.event_type(), EventScope::Session, &summary.session_id, Path::new(""))
            .with_files(summary.aggregate_files_done, summary.aggregate_total_files)
            .with_percent(if summary.aggregate_total_files > 0 {
                summary.aggregate_files_done as f64 / summary.aggregate_total_files as f64 * 100.0
            } else {
                100.0
            })
            .with_message(summary.message()),
    );
    summary
}

fn queue(jobs: Vec<TransferJob>) -> Receiver<TransferJob> {
    let (sender, receiver) = unbounded();
    for job in jobs {
        // The receiver is alive; sending cannot fail.
        let _ = sender.send(job);
    }
    receiver
}

fn worker(session: &BatchSession, queue: Receiver<TransferJob>, services: &SessionServices<'_>, bus: EventBus) {
    let on_files = |delta: u64| session.record_files(delta, &bus);
    for job in queue.iter() {
        // Pause only holds back dispatch; a cancel is observed by the job itself.
        services.control.wait_for_dispatch();
        session.set_status(job.id(), JobStatus::Running);
        let outcome = job::run_job(
            job,
            &JobContext {
                chain: services.chain,
                config: services.config,
                control: services.control,
                remover: services.remover,
                events: &bus,
                on_files: Some(&on_files),
            },
        );
        session.complete(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FsRemover;
    use crate::strategy::PortableStrategy;
    use std::fs;
    use std::sync::Arc;

    #[derive(Default)]
    struct Collector {
        events: Mutex<Vec<Event>>,
    }

    impl EventSink for Collector {
        fn emit(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn services_run(items: Vec<ResolvedItem>, mode: Mode, concurrency: usize, control: &SessionControl, sink: &Collector) -> SessionSummary {
        let config = EngineConfig::default();
        let chain = StrategyChain::new(vec![Box::new(PortableStrategy)]);
        let services = SessionServices {
            chain: &chain,
            config: &config,
            control,
            remover: &FsRemover,
        };
        run_session(items, mode, concurrency, &services, sink)
    }

    fn make_sequence(dir: &Path, stem: &str, count: usize) -> Vec<PathBuf> {
        fs::create_dir_all(dir).expect("create sequence dir");
        (1..=count)
            .map(|i| {
                let path = dir.join(format!("{}.{:04}.exr", stem, i));
                fs::write(&path, vec![0u8; 100]).expect("write frame");
                path
            })
            .collect()
    }

    #[test]
    fn test_classification_synthesizes_pattern() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let members = make_sequence(&temp_dir.path().join("plates"), "seq", 3);
        let job = sequence_job("j".to_string(), Mode::Copy, &members, &temp_dir.path().join("out"), &EngineConfig::default())
            .expect("classify");
        assert_eq!(job.kind(), JobKind::SequenceBatch);
        assert_eq!(job.expected_file_count(), 3);
        assert_eq!(job.expected_total_bytes(), 300);
        assert_eq!(job.subject_path(), temp_dir.path().join("plates").join("seq.*.exr"));
    }

    #[test]
    fn test_move_sequence_touches_only_listed_members() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let plates = temp_dir.path().join("plates");
        let frames = make_sequence(&plates, "seq", 4);
        let out = temp_dir.path().join("out");

        let summary = services_run(
            vec![ResolvedItem::sequence(frames[..2].to_vec(), &out)],
            Mode::Move,
            1,
            &SessionControl::new(),
            &Collector::default(),
        );

        assert_eq!(summary.succeeded, 1);
        let outcome = &summary.outcomes[0];
        assert_eq!(outcome.files_expected, 2);
        assert_eq!(outcome.files_transferred, 2);
        assert_eq!((summary.aggregate_files_done, summary.aggregate_total_files), (2, 2));
        assert!(!frames[0].exists() && !frames[1].exists());
        assert!(frames[2].exists() && frames[3].exists());
        assert_eq!(fs_ops::count_matching(&out, "*"), 2);
    }

    #[test]
    fn test_copy_sequence_without_common_prefix_skips_unlisted_files() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let plates = temp_dir.path().join("plates");
        fs::create_dir_all(&plates).expect("create plates");
        for name in ["0001.exr", "0002.exr", "beauty.exr", "matte.exr"] {
            fs::write(plates.join(name), b"pixels").expect("write frame");
        }
        let out = temp_dir.path().join("out");
        let members = vec![plates.join("0001.exr"), plates.join("beauty.exr"), plates.join("0001.exr")];

        let summary = services_run(
            vec![ResolvedItem::sequence(members, &out)],
            Mode::Copy,
            1,
            &SessionControl::new(),
            &Collector::default(),
        );

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.outcomes[0].files_transferred, 2);
        assert!(out.join("0001.exr").exists());
        assert!(out.join("beauty.exr").exists());
        assert!(!out.join("0002.exr").exists());
        assert!(!out.join("matte.exr").exists());
        assert_eq!(fs_ops::count_matching(&plates, "*.exr"), 4);
    }

    #[test]
    fn test_summary_carries_final_job_table() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let good = temp_dir.path().join("a.bin");
        fs::write(&good, b"ok").expect("write source");
        let items = vec![
            ResolvedItem::file(&good, temp_dir.path().join("out/a.bin")),
            ResolvedItem::file(temp_dir.path().join("b.bin"), temp_dir.path().join("out/b.bin")),
        ];

        let summary = services_run(items, Mode::Copy, 2, &SessionControl::new(), &Collector::default());

        let statuses: Vec<(PathBuf, JobStatus)> = summary.jobs.iter().map(|j| (j.subject_path.clone(), j.status)).collect();
        assert_eq!(
            statuses,
            vec![(good, JobStatus::Completed), (temp_dir.path().join("b.bin"), JobStatus::Failed)]
        );
        assert!(summary
            .jobs
            .iter()
            .all(|j| summary.outcomes.iter().any(|o| o.job_id == j.job_id && o.status == j.status)));
    }

    #[test]
    fn test_sequence_across_directories_is_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut members = make_sequence(&temp_dir.path().join("a"), "seq", 2);
        members.extend(make_sequence(&temp_dir.path().join("b"), "seq", 2));

        let sink = Collector::default();
        let summary = services_run(
            vec![ResolvedItem::sequence(members, temp_dir.path().join("out"))],
            Mode::Copy,
            2,
            &SessionControl::new(),
            &sink,
        );
        assert_eq!(summary.failed, 1);
        assert!(matches!(
            summary.outcomes[0].error,
            Some(TransferError::InvalidInput { .. })
        ));
        let terminal: Vec<_> = sink.events.lock().unwrap().iter().filter(|e| e.is_terminal()).cloned().collect();
        assert_eq!(terminal.len(), 1);
    }

    #[test]
    fn test_one_failure_does_not_stop_siblings() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let good = temp_dir.path().join("good.bin");
        fs::write(&good, b"ok").expect("write source");

        let items = vec![
            ResolvedItem::file(&good, temp_dir.path().join("out/good.bin")),
            ResolvedItem::file(temp_dir.path().join("missing.bin"), temp_dir.path().join("out/missing.bin")),
        ];
        let summary = services_run(items, Mode::Copy, 2, &SessionControl::new(), &Collector::default());
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert!(temp_dir.path().join("out/good.bin").exists());
        assert!(!summary.all_succeeded());
    }

    #[test]
    fn test_session_events_are_monotonic_and_summary_last() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut items = Vec::new();
        for i in 0..6 {
            let src = temp_dir.path().join(format!("f{}.bin", i));
            fs::write(&src, vec![1u8; 512]).expect("write source");
            items.push(ResolvedItem::file(&src, temp_dir.path().join("out").join(format!("f{}.bin", i))));
        }
        items.push(ResolvedItem::sequence(
            make_sequence(&temp_dir.path().join("seq"), "shot", 8),
            temp_dir.path().join("out/seq"),
        ));

        let sink = Collector::default();
        let summary = services_run(items, Mode::Copy, 3, &SessionControl::new(), &sink);
        assert_eq!(summary.aggregate_files_done, 14);

        let events = sink.events.lock().unwrap();
        let session_progress: Vec<u64> = events
            .iter()
            .filter(|e| e.scope == EventScope::Session && e.event_type == EventType::Progress)
            .map(|e| e.files_done)
            .collect();
        assert!(session_progress.windows(2).all(|w| w[0] < w[1]), "{:?}", session_progress);
        assert_eq!(session_progress.last(), Some(&14));

        let last = events.last().expect("summary event");
        assert_eq!(last.scope, EventScope::Session);
        assert_eq!(last.event_type, EventType::Success);
        assert_eq!(last.message, "7 succeeded, 0 failed, 0 cancelled");
    }

    #[test]
    fn test_cancelled_session_cancels_remaining_jobs() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut items = Vec::new();
        for i in 0..4 {
            let src = temp_dir.path().join(format!("f{}.bin", i));
            fs::write(&src, b"data").expect("write source");
            items.push(ResolvedItem::file(&src, temp_dir.path().join("out").join(format!("f{}.bin", i))));
        }

        let control = SessionControl::new();
        control.cancel();
        let sink = Collector::default();
        let summary = services_run(items, Mode::Copy, 2, &control, &sink);
        assert_eq!(summary.cancelled, 4);
        assert!(!temp_dir.path().join("out").exists());
        assert_eq!(sink.events.lock().unwrap().last().map(|e| e.event_type), Some(EventType::Cancelled));
    }

    #[test]
    fn test_paused_session_waits_for_resume() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.bin");
        fs::write(&src, b"data").expect("write source");
        let dst = temp_dir.path().join("out/a.bin");

        let control = Arc::new(SessionControl::new());
        control.pause();
        let resumer = {
            let control = Arc::clone(&control);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                control.resume();
            })
        };
        let started = Instant::now();
        let summary = services_run(vec![ResolvedItem::file(&src, &dst)], Mode::Copy, 1, &control, &Collector::default());
        resumer.join().expect("resumer thread");

        assert_eq!(summary.succeeded, 1);
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
