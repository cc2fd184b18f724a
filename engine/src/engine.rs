//! Public entry points.
//!
//! `TransferEngine` bundles a validated configuration, the strategy chain and
//! the source remover. Single transfers run on the caller's thread; sessions
//! fan out to worker threads and forward every event back to the caller.

use crate::config::EngineConfig;
use crate::control::SessionControl;
use crate::error::TransferError;
use crate::events::{Event, EventScope, EventSink, EventType};
use crate::job::{self, FsRemover, JobContext, SourceRemover};
use crate::model::{JobKind, Mode, Outcome, ResolvedItem, TransferJob};
use crate::session::{self, SessionServices, SessionSummary};
use crate::strategy::StrategyChain;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A pattern batch to copy or move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub source_dir: PathBuf,
    pub destination_dir: PathBuf,
    pub pattern: String,
    /// 0 when unknown
    pub expected_file_count: u64,
    /// 0 when unknown; computed before the copy if enabled in the config
    pub expected_total_bytes: u64,
}

impl BatchRequest {
    pub fn new(source_dir: impl Into<PathBuf>, destination_dir: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        BatchRequest {
            source_dir: source_dir.into(),
            destination_dir: destination_dir.into(),
            pattern: pattern.into(),
            expected_file_count: 0,
            expected_total_bytes: 0,
        }
    }
}

pub struct TransferEngine {
    config: EngineConfig,
    chain: StrategyChain,
    remover: Box<dyn SourceRemover>,
}

impl TransferEngine {
    /// Engine with the configured platform chain.
    ///
    /// # Errors
    /// `TransferError::Config` if the configuration is invalid.
    pub fn new(config: EngineConfig) -> Result<Self, TransferError> {
        config.validate()?;
        let chain = StrategyChain::from_config(&config);
        Ok(TransferEngine {
            config,
            chain,
            remover: Box::new(FsRemover),
        })
    }

    /// Replace the strategy chain.
    pub fn with_chain(mut self, chain: StrategyChain) -> Self {
        self.chain = chain;
        self
    }

    /// Replace how move sources are deleted.
    pub fn with_remover(mut self, remover: impl SourceRemover + 'static) -> Self {
        self.remover = Box::new(remover);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.chain.names()
    }

    /// Copy one file to an exact destination path.
    pub fn copy(&self, source: &Path, destination: &Path, sink: &dyn EventSink, job_id: Option<&str>) -> Outcome {
        self.transfer_file(Mode::Copy, source, destination, sink, job_id)
    }

    /// Copy one file, then delete the source once the copy is verified.
    pub fn move_file(&self, source: &Path, destination: &Path, sink: &dyn EventSink, job_id: Option<&str>) -> Outcome {
        self.transfer_file(Mode::Move, source, destination, sink, job_id)
    }

    /// Copy every file matching the request's pattern.
    pub fn copy_batch(&self, request: &BatchRequest, sink: &dyn EventSink, job_id: Option<&str>) -> Outcome {
        self.transfer_batch(Mode::Copy, request, sink, job_id)
    }

    /// Batch copy followed by deletion of every matched source file.
    pub fn move_batch(&self, request: &BatchRequest, sink: &dyn EventSink, job_id: Option<&str>) -> Outcome {
        self.transfer_batch(Mode::Move, request, sink, job_id)
    }

    /// Run a whole session with a fresh control handle.
    ///
    /// `concurrency` bounds the single-file pool; 0 uses `worker_count`.
    pub fn run_session(&self, items: Vec<ResolvedItem>, mode: Mode, concurrency: usize, sink: &dyn EventSink) -> SessionSummary {
        self.run_session_with_control(items, mode, concurrency, sink, &Arc::new(SessionControl::new()))
    }

    /// Run a session that another thread may pause, resume or cancel via `control`.
    pub fn run_session_with_control(
        &self,
        items: Vec<ResolvedItem>,
        mode: Mode,
        concurrency: usize,
        sink: &dyn EventSink,
        control: &Arc<SessionControl>,
    ) -> SessionSummary {
        let concurrency = if concurrency == 0 {
            self.config.worker_count
        } else {
            concurrency
        };
        let services = SessionServices {
            chain: &self.chain,
            config: &self.config,
            control,
            remover: self.remover.as_ref(),
        };
        session::run_session(items, mode, concurrency, &services, sink)
    }

    fn transfer_file(&self, mode: Mode, source: &Path, destination: &Path, sink: &dyn EventSink, job_id: Option<&str>) -> Outcome {
        let id = job_id.map_or_else(job::new_job_id, str::to_string);
        let job = job::single_file_job(id.clone(), mode, source, destination)
            .map_err(|e| Outcome::rejected(id, JobKind::SingleFile, mode, source.to_path_buf(), 1, e));
        self.run(job, sink)
    }

    fn transfer_batch(&self, mode: Mode, request: &BatchRequest, sink: &dyn EventSink, job_id: Option<&str>) -> Outcome {
        let id = job_id.map_or_else(job::new_job_id, str::to_string);
        let job = job::batch_job(
            id.clone(),
            mode,
            &request.source_dir,
            &request.pattern,
            &request.destination_dir,
            request.expected_file_count,
            request.expected_total_bytes,
        )
        .map_err(|e| {
            let subject = request.source_dir.join(&request.pattern);
            Outcome::rejected(id, JobKind::SequenceBatch, mode, subject, request.expected_file_count, e)
        });
        self.run(job, sink)
    }

    fn run(&self, job: Result<TransferJob, Outcome>, sink: &dyn EventSink) -> Outcome {
        let job = match job {
            Ok(job) => job,
            Err(rejected) => {
                // Invalid input still ends with exactly one terminal event.
                let message = rejected.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
                sink.emit(
                    Event::new(EventType::Error, EventScope::Job, &rejected.job_id, &rejected.subject_path)
                        .with_files(0, rejected.files_expected)
                        .with_message(message),
                );
                return rejected;
            }
        };
        let control = SessionControl::new();
        job::run_job(
            job,
            &JobContext {
                chain: &self.chain,
                config: &self.config,
                control: &control,
                remover: self.remover.as_ref(),
                events: sink,
                on_files: None,
            },
        )
    }
}
