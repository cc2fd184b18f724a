//! Event reporting.
//!
//! This module defines the `Event` record and the `EventSink` trait, which
//! decouple the transfer engine from any specific UI technology (CLI, GUI, logs).
//! `EventBus` is a channel-backed sink: events sent from worker threads and
//! polling threads arrive at a single `Receiver` in send order.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::path::{Path, PathBuf};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Progress,
    Success,
    Error,
    Cancelled,
    Warning,
}

/// Whether an event describes one job or the session aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventScope {
    Job,
    Session,
}

/// One structured progress or outcome record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub event_type: EventType,
    pub scope: EventScope,
    pub job_id: String,
    pub subject_path: PathBuf,
    /// 0..=100
    pub percent: f64,
    /// Megabytes (2^20 bytes) per second; 0 when unknown
    pub speed_mbps: f64,
    pub eta_seconds: Option<f64>,
    pub files_done: u64,
    pub files_total: u64,
    pub message: String,
}

impl Event {
    pub fn new(event_type: EventType, scope: EventScope, job_id: &str, subject_path: &Path) -> Self {
        Event {
            event_type,
            scope,
            job_id: job_id.to_string(),
            subject_path: subject_path.to_path_buf(),
            percent: 0.0,
            speed_mbps: 0.0,
            eta_seconds: None,
            files_done: 0,
            files_total: 0,
            message: String::new(),
        }
    }

    pub fn with_files(mut self, done: u64, total: u64) -> Self {
        self.files_done = done;
        self.files_total = total;
        self
    }

    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent = percent.clamp(0.0, 100.0);
        self
    }

    pub fn with_rate(mut self, bytes_per_sec: Option<f64>, eta_seconds: Option<f64>) -> Self {
        self.speed_mbps = bytes_per_sec.map(|b| b / BYTES_PER_MB).unwrap_or(0.0);
        self.eta_seconds = eta_seconds;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// A job-scoped event that ends the job's event stream.
    pub fn is_terminal(&self) -> bool {
        self.scope == EventScope::Job && self.event_type != EventType::Progress
    }
}

/// Receives engine events.
///
/// Implementations must be thread-safe: the engine may emit from worker
/// threads and from destination-polling threads.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

impl<F> EventSink for F
where
    F: Fn(Event) + Send + Sync,
{
    fn emit(&self, event: Event) {
        self(event)
    }
}

/// Channel-backed sink with a single consumer on the other end.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: Sender<Event>,
}

impl EventBus {
    pub fn new() -> (EventBus, Receiver<Event>) {
        let (sender, receiver) = unbounded();
        (EventBus { sender }, receiver)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: Event) {
        // The consumer going away is not an engine error.
        let _ = self.sender.send(event);
    }
}

/// Sink that drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}
