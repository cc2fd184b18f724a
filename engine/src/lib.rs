//! # Xfer Engine - Resilient Batch File Transfer Library
//!
//! A headless engine that copies or moves single files and image-sequence
//! batches, falling back across native bulk-copy utilities and an in-process
//! copier until one verifiably succeeds.
//!
//! ## Overview
//!
//! The engine provides:
//! - An ordered strategy chain (robocopy/xcopy on Windows, rsync/cp elsewhere,
//!   portable chunked copy everywhere) with independent size verification
//! - Streaming progress for the portable copier and destination polling for
//!   utilities that report nothing until they exit
//! - Sessions: batch lanes plus a bounded file pool, with one aggregate counter
//! - Move semantics that only delete sources after a verified copy
//! - Typed events delivered to a single consumer
//!
//! ## Basic Usage
//!
//! ```no_run
//! use xfer_engine::{EngineConfig, Event, Mode, ResolvedItem, TransferEngine};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = TransferEngine::new(EngineConfig::default())?;
//!
//! // One file
//! let outcome = engine.copy(
//!     Path::new("/renders/plate.exr"),
//!     Path::new("/archive/plate.exr"),
//!     &|event: Event| println!("{:?} {:.0}%", event.event_type, event.percent),
//!     None,
//! );
//! println!("{:?}", outcome.status);
//!
//! // A session mixing files and a sequence
//! let items = vec![
//!     ResolvedItem::file("/renders/notes.txt", "/archive/notes.txt"),
//!     ResolvedItem::sequence(
//!         vec!["/renders/seq.0001.exr".into(), "/renders/seq.0002.exr".into()],
//!         "/archive/seq",
//!     ),
//! ];
//! let summary = engine.run_session(items, Mode::Copy, 4, &|_event: Event| {});
//! println!("{} succeeded", summary.succeeded);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Job model, resolved items, outcomes
//! - **error**: Error types and handling
//! - **config**: Engine configuration (TOML + environment)
//! - **events**: Event records, sinks and the event bus
//! - **control**: Session cancel and pause flags
//! - **pattern**: Sequence glob synthesis and matching
//! - **fs_ops**: Low-level filesystem operations
//! - **process**: Supervised native utility processes
//! - **progress**: Progress estimation and the destination watcher
//! - **strategy**: Copy strategies and the fallback chain
//! - **job**: Job creation and execution
//! - **session**: Session orchestration and aggregation
//! - **engine**: The `TransferEngine` facade

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod events;
pub mod fs_ops;
pub mod job;
pub mod model;
pub mod pattern;
pub mod process;
pub mod progress;
pub mod session;
pub mod strategy;

// Re-export main types and functions
pub use config::{EngineConfig, StrategyKind};
pub use control::SessionControl;
pub use engine::{BatchRequest, TransferEngine};
pub use error::{ConfigError, DirCreateFailure, SourceKind, StrategyFailure, TransferError};
pub use events::{Event, EventBus, EventScope, EventSink, EventType, NullSink};
pub use job::{create_batch_job, create_single_file_job, FsRemover, SourceRemover};
pub use model::{JobKind, JobSource, JobStatus, Mode, Outcome, ResolvedItem, TransferJob};
pub use pattern::sequence_pattern;
pub use session::{JobEntry, SessionSummary};
pub use strategy::{BulkCopyReport, CopyStrategy, StrategyChain};
