//! Execution strategy chain.
//!
//! A `CopyStrategy` performs one copy attempt. The `StrategyChain` tries its
//! strategies strictly in order, one at a time, until one succeeds and passes
//! independent verification. Strategy failures never leave the chain; only
//! fatal preconditions, cancellation or exhaustion are returned.

pub mod native;
pub mod portable;
pub mod tools;

use crate::config::{EngineConfig, StrategyKind};
use crate::control::SessionControl;
use crate::error::{SourceKind, StrategyFailure, TransferError};
use crate::fs_ops;
use crate::model::{JobStatus, TransferJob};
use crate::progress::{self, ProgressSink, WatchSettings, WatchTarget};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub use native::NativeStrategy;
pub use portable::PortableStrategy;
pub use tools::{BulkCopyReport, BulkCopyTool, Cp, Robocopy, Rsync, Xcopy};

/// What one strategy attempt must copy.
#[derive(Debug, Clone, Copy)]
pub enum CopyTarget<'a> {
    File {
        source: &'a Path,
        destination: &'a Path,
        /// Source size when the job started
        size: u64,
    },
    Batch {
        source_dir: &'a Path,
        pattern: &'a str,
        /// `pattern` matches nothing in `source_dir` besides `members`
        exact: bool,
        destination_dir: &'a Path,
        /// Files to copy, all matching `pattern`, fixed before the first attempt
        members: &'a [PathBuf],
        /// Sum of member sizes, or 0 when not precomputed
        total_bytes: u64,
        /// Pattern matches already present in the destination
        baseline: u64,
    },
}

impl CopyTarget<'_> {
    pub fn file_count(&self) -> u64 {
        match self {
            CopyTarget::File { .. } => 1,
            CopyTarget::Batch { members, .. } => members.len() as u64,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        match self {
            CopyTarget::File { size, .. } => *size,
            CopyTarget::Batch { total_bytes, .. } => *total_bytes,
        }
    }
}

/// Everything a strategy may consult while running.
pub struct StrategyContext<'a> {
    pub config: &'a EngineConfig,
    pub control: &'a SessionControl,
    pub progress: &'a dyn ProgressSink,
}

impl StrategyContext<'_> {
    /// Whether in-flight work should stop now.
    pub fn should_abort(&self) -> bool {
        self.config.kill_on_cancel && self.control.is_cancelled()
    }
}

/// Result of one attempt, consumed immediately by the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyResult {
    pub success: bool,
    pub bytes_moved: u64,
    pub files_moved: u64,
    /// Counts reported by the utility itself, when it reports any
    pub report: Option<BulkCopyReport>,
    pub error: Option<StrategyFailure>,
}

impl StrategyResult {
    pub fn succeeded(bytes_moved: u64, files_moved: u64, report: Option<BulkCopyReport>) -> Self {
        StrategyResult {
            success: true,
            bytes_moved,
            files_moved,
            report,
            error: None,
        }
    }

    pub fn failed(error: StrategyFailure) -> Self {
        StrategyResult {
            success: false,
            bytes_moved: 0,
            files_moved: 0,
            report: None,
            error: Some(error),
        }
    }
}

/// One interchangeable copy implementation.
pub trait CopyStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// True when the strategy gives no intermediate progress, so the chain
    /// must run a destination watcher alongside it.
    fn is_opaque(&self) -> bool;

    fn execute(&self, target: &CopyTarget<'_>, ctx: &StrategyContext<'_>) -> StrategyResult;
}

/// A verified successful attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSuccess {
    pub strategy: &'static str,
    pub bytes_moved: u64,
    pub files_moved: u64,
}

pub struct StrategyChain {
    strategies: Vec<Box<dyn CopyStrategy>>,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Box<dyn CopyStrategy>>) -> Self {
        StrategyChain { strategies }
    }

    /// Build the configured chain (portable strategy always last).
    pub fn from_config(config: &EngineConfig) -> Self {
        let strategies = config
            .strategy_chain()
            .into_iter()
            .map(|kind| -> Box<dyn CopyStrategy> {
                match kind {
                    StrategyKind::Robocopy => Box::new(NativeStrategy::new(Robocopy)),
                    StrategyKind::Xcopy => Box::new(NativeStrategy::new(Xcopy)),
                    StrategyKind::Rsync => Box::new(NativeStrategy::new(Rsync)),
                    StrategyKind::Cp => Box::new(NativeStrategy::new(Cp)),
                    StrategyKind::Portable => Box::new(PortableStrategy),
                }
            })
            .collect();
        StrategyChain::new(strategies)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Run the chain for `job`, moving its status through
    /// `Running` / `RetryingWithStrategy(i)`. The caller owns the terminal transition.
    pub(crate) fn run(
        &self,
        job: &mut TransferJob,
        target: &CopyTarget<'_>,
        ctx: &StrategyContext<'_>,
    ) -> Result<ChainSuccess, TransferError> {
        let settings = WatchSettings {
            interval: ctx.config.poll_interval(),
            stall_after: ctx.config.stall_after(),
        };
        let mut attempts = Vec::new();

        for (index, strategy) in self.strategies.iter().enumerate() {
            if ctx.should_abort() {
                return Err(TransferError::Cancelled);
            }
            if index == 0 {
                job.transition(JobStatus::Running);
            } else {
                job.transition(JobStatus::RetryingWithStrategy(index));
            }

            match prepare(target) {
                Ok(()) => {}
                Err(e) if e.is_fatal_for_chain() => return Err(e),
                Err(e) => {
                    attempts.push(StrategyFailure::execution(strategy.name(), e.to_string()));
                    continue;
                }
            }
            debug!(job = job.id(), strategy = strategy.name(), "attempting copy");

            let result = if strategy.is_opaque() {
                progress::watch_while(watch_target(target), settings, ctx.progress, || {
                    strategy.execute(target, ctx)
                })
            } else {
                strategy.execute(target, ctx)
            };

            let failure = match (result.success, result.error) {
                (true, _) => match verify(strategy.name(), target, result.report.as_ref()) {
                    Ok(()) => {
                        info!(job = job.id(), strategy = strategy.name(), "copy verified");
                        return Ok(ChainSuccess {
                            strategy: strategy.name(),
                            bytes_moved: result.bytes_moved.max(target.total_bytes()),
                            files_moved: target.file_count(),
                        });
                    }
                    Err(failure) => failure,
                },
                (false, Some(StrategyFailure::Cancelled { .. })) => return Err(TransferError::Cancelled),
                (false, Some(failure)) => failure,
                (false, None) => StrategyFailure::execution(strategy.name(), "reported failure without a reason"),
            };

            warn!(job = job.id(), error = %failure, "copy strategy failed, falling back");
            attempts.push(failure);
        }

        Err(TransferError::AllStrategiesExhausted { attempts })
    }
}

/// Source validation and destination directory creation before each attempt.
fn prepare(target: &CopyTarget<'_>) -> Result<(), TransferError> {
    match target {
        CopyTarget::File {
            source, destination, ..
        } => {
            fs_ops::validate_source(source, SourceKind::File)?;
            fs_ops::ensure_parent_dir_exists(destination)
        }
        CopyTarget::Batch {
            source_dir,
            destination_dir,
            ..
        } => {
            fs_ops::validate_source(source_dir, SourceKind::Directory)?;
            fs_ops::ensure_dir(destination_dir)
        }
    }
}

fn watch_target(target: &CopyTarget<'_>) -> WatchTarget {
    match *target {
        CopyTarget::File {
            destination, size, ..
        } => WatchTarget::File {
            path: destination.to_path_buf(),
            expected_bytes: size,
        },
        CopyTarget::Batch {
            pattern,
            destination_dir,
            members,
            total_bytes,
            baseline,
            ..
        } => WatchTarget::Pattern {
            dir: destination_dir.to_path_buf(),
            pattern: pattern.to_string(),
            expected_files: members.len() as u64,
            expected_bytes: total_bytes,
            baseline,
        },
    }
}

/// Independent check of a reported success.
///
/// Single files compare destination size with the source. Batches trust the
/// utility's own counts when it reports them and otherwise check every member
/// landed with its source size.
fn verify(strategy: &'static str, target: &CopyTarget<'_>, report: Option<&BulkCopyReport>) -> Result<(), StrategyFailure> {
    match *target {
        CopyTarget::File {
            destination, size, ..
        } => match fs_ops::file_size(destination) {
            Some(actual) if actual == size => Ok(()),
            other => Err(StrategyFailure::SizeValidation {
                strategy,
                expected: size,
                actual: other.unwrap_or(0),
            }),
        },
        CopyTarget::Batch {
            destination_dir,
            members,
            ..
        } => {
            let expected = members.len() as u64;
            let landed = match report {
                Some(report) if report.files_failed > 0 => {
                    return Err(StrategyFailure::execution(
                        strategy,
                        format!("{} file(s) failed", report.files_failed),
                    ));
                }
                Some(report) => report.files_copied + report.files_skipped,
                None => members
                    .iter()
                    .filter(|member| {
                        let landed = member
                            .file_name()
                            .and_then(|name| fs_ops::file_size(&destination_dir.join(name)));
                        landed.is_some() && landed == fs_ops::file_size(member)
                    })
                    .count() as u64,
            };
            if landed >= expected {
                Ok(())
            } else {
                Err(StrategyFailure::SizeValidation {
                    strategy,
                    expected,
                    actual: landed,
                })
            }
        }
    }
}
