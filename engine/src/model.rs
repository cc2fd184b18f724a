//! Core data model for transfer jobs.
//!
//! This module defines the main data structures for representing transfer operations:
//! - TransferJob: one single-file or sequence-batch unit of work
//! - JobStatus: the job lifecycle state machine
//! - ResolvedItem: what the scanning layer hands to a session
//! - Outcome: the terminal result of one job

use crate::error::TransferError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// The operation mode for a transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Copy files; source remains unchanged
    Copy,
    /// Move files; source deleted after a verified copy
    Move,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Copy => write!(f, "Copy"),
            Mode::Move => write!(f, "Move"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    SingleFile,
    SequenceBatch,
}

/// Where a job reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
    File(PathBuf),
    /// Files in `directory` matching `pattern`. With `members` set, only those
    /// files belong to the job and the pattern just describes them to tools.
    Batch {
        directory: PathBuf,
        pattern: String,
        members: Option<Vec<PathBuf>>,
    },
}

/// The state of a transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Created, not yet started
    Pending,
    /// First strategy executing
    Running,
    /// Fallback strategy `n` (index into the chain) executing
    RetryingWithStrategy(usize),
    /// Copied (and for moves, source removed)
    Completed,
    /// Move copied everything but the source could not be deleted
    CopiedButNotDeleted,
    /// All strategies failed or a fatal error occurred
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl JobStatus {
    /// Returns true if this state is terminal (no further changes expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::CopiedButNotDeleted
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }

    fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Cancelled) | (Pending, Failed) => true,
            (Running, RetryingWithStrategy(_)) => true,
            (RetryingWithStrategy(a), RetryingWithStrategy(b)) => b > *a,
            (Running | RetryingWithStrategy(_), next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// Represents a single transfer job (one file or one sequence batch).
///
/// Identity, source and destination are fixed at creation. Status and counters
/// are only mutated by the worker executing the job.
#[derive(Debug)]
pub struct TransferJob {
    id: String,
    mode: Mode,
    source: JobSource,
    destination: PathBuf,
    expected_file_count: u64,
    expected_total_bytes: u64,
    transferred_bytes: u64,
    transferred_files: u64,
    status: JobStatus,
    error: Option<TransferError>,
    start_time: Option<SystemTime>,
    end_time: Option<SystemTime>,
}

impl TransferJob {
    pub(crate) fn new(
        id: String,
        mode: Mode,
        source: JobSource,
        destination: PathBuf,
        expected_file_count: u64,
        expected_total_bytes: u64,
    ) -> Self {
        TransferJob {
            id,
            mode,
            source,
            destination,
            expected_file_count,
            expected_total_bytes,
            transferred_bytes: 0,
            transferred_files: 0,
            status: JobStatus::Pending,
            error: None,
            start_time: None,
            end_time: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn kind(&self) -> JobKind {
        match self.source {
            JobSource::File(_) => JobKind::SingleFile,
            JobSource::Batch { .. } => JobKind::SequenceBatch,
        }
    }

    pub fn source(&self) -> &JobSource {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Path shown to the user in events: the source file, or the batch's
    /// directory joined with its pattern.
    pub fn subject_path(&self) -> PathBuf {
        match &self.source {
            JobSource::File(path) => path.clone(),
            JobSource::Batch { directory, pattern, .. } => directory.join(pattern),
        }
    }

    pub fn expected_file_count(&self) -> u64 {
        self.expected_file_count
    }

    pub fn expected_total_bytes(&self) -> u64 {
        self.expected_total_bytes
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes
    }

    pub fn transferred_files(&self) -> u64 {
        self.transferred_files
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn error(&self) -> Option<&TransferError> {
        self.error.as_ref()
    }

    pub fn start_time(&self) -> Option<SystemTime> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<SystemTime> {
        self.end_time
    }

    /// Move the job to `next`.
    ///
    /// # Panics
    /// On a transition outside the state machine (e.g. terminal to running).
    pub(crate) fn transition(&mut self, next: JobStatus) {
        assert!(
            self.status.can_transition_to(next),
            "job {}: illegal status transition {:?} -> {:?}",
            self.id,
            self.status,
            next
        );
        if self.status == JobStatus::Pending {
            self.start_time = Some(SystemTime::now());
        }
        if next.is_terminal() {
            self.end_time = Some(SystemTime::now());
        }
        self.status = next;
    }

    /// Fill in a size estimate that was unknown at creation time.
    pub(crate) fn set_expected_total_bytes(&mut self, bytes: u64) {
        if self.expected_total_bytes == 0 {
            self.expected_total_bytes = bytes;
        }
    }

    pub(crate) fn set_expected_file_count(&mut self, count: u64) {
        if self.expected_file_count == 0 {
            self.expected_file_count = count;
        }
    }

    pub(crate) fn record_transfer(&mut self, files: u64, bytes: u64) {
        self.transferred_files = files;
        self.transferred_bytes = if self.expected_total_bytes > 0 {
            bytes.min(self.expected_total_bytes)
        } else {
            bytes
        };
    }

    pub(crate) fn fail(&mut self, status: JobStatus, error: TransferError) {
        self.transition(status);
        self.error = Some(error);
    }

    /// Consume the job into its terminal outcome.
    pub(crate) fn into_outcome(self, strategy: Option<&'static str>) -> Outcome {
        Outcome {
            job_id: self.id.clone(),
            kind: self.kind(),
            mode: self.mode,
            subject_path: self.subject_path(),
            status: self.status,
            files_expected: self.expected_file_count,
            files_transferred: self.transferred_files,
            bytes_transferred: self.transferred_bytes,
            strategy,
            error: self.error,
        }
    }
}

/// An item already resolved by the scanning layer. Destinations are trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResolvedItem {
    /// One file copied to an exact destination file path
    File { source: PathBuf, destination: PathBuf },
    /// Sequence members copied into a destination directory
    Sequence { members: Vec<PathBuf>, destination: PathBuf },
}

impl ResolvedItem {
    pub fn file(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        ResolvedItem::File {
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn sequence(members: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        ResolvedItem::Sequence {
            members,
            destination: destination.into(),
        }
    }

    pub fn file_count(&self) -> u64 {
        match self {
            ResolvedItem::File { .. } => 1,
            ResolvedItem::Sequence { members, .. } => members.len() as u64,
        }
    }
}

/// The terminal result of one job.
#[derive(Debug)]
pub struct Outcome {
    pub job_id: String,
    pub kind: JobKind,
    pub mode: Mode,
    pub subject_path: PathBuf,
    pub status: JobStatus,
    pub files_expected: u64,
    pub files_transferred: u64,
    pub bytes_transferred: u64,
    /// Strategy that produced the data, if any succeeded
    pub strategy: Option<&'static str>,
    pub error: Option<TransferError>,
}

impl Outcome {
    /// Outcome of an item that never became a runnable job.
    pub(crate) fn rejected(
        job_id: String,
        kind: JobKind,
        mode: Mode,
        subject_path: PathBuf,
        files_expected: u64,
        error: TransferError,
    ) -> Self {
        Outcome {
            job_id,
            kind,
            mode,
            subject_path,
            status: JobStatus::Failed,
            files_expected,
            files_transferred: 0,
            bytes_transferred: 0,
            strategy: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}
