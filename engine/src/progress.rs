//! Progress estimation.
//!
//! Two modes:
//! - streaming: the portable strategy knows exact byte counts
//! - opaque: native utilities report nothing until they exit, so a watcher
//!   thread polls the destination and infers progress from what has landed
//!
//! Both produce `ProgressSample`s for a `ProgressSink`.

use crate::fs_ops;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Opaque progress never reaches 100% before the utility has returned.
pub const OPAQUE_PERCENT_CAP: f64 = 99.0;

/// Smoothing factor for the observed files-per-second rate.
const RATE_SMOOTHING: f64 = 0.3;

/// One progress observation for a job.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    pub percent: f64,
    pub files_done: u64,
    pub files_total: u64,
    pub bytes_done: Option<u64>,
    pub bytes_per_sec: Option<f64>,
    pub eta_seconds: Option<f64>,
    /// Set when nothing has changed for at least the stall threshold
    pub stalled_for: Option<Duration>,
}

/// Trait for receiving progress samples from a running strategy.
///
/// Called from the strategy's own thread (streaming) or from the watcher
/// thread (opaque), so implementations must be thread-safe.
pub trait ProgressSink: Send + Sync {
    fn report(&self, sample: ProgressSample);
}

/// Sink that drops samples.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _sample: ProgressSample) {}
}

/// Byte-exact estimator used by the portable strategy.
#[derive(Debug)]
pub struct StreamingEstimator {
    total_bytes: u64,
    files_total: u64,
    started: Instant,
}

impl StreamingEstimator {
    pub fn new(total_bytes: u64, files_total: u64) -> Self {
        Self::starting_at(total_bytes, files_total, Instant::now())
    }

    pub fn starting_at(total_bytes: u64, files_total: u64, started: Instant) -> Self {
        StreamingEstimator {
            total_bytes,
            files_total,
            started,
        }
    }

    pub fn sample(&self, bytes_done: u64, files_done: u64) -> ProgressSample {
        self.sample_at(bytes_done, files_done, Instant::now())
    }

    pub fn sample_at(&self, bytes_done: u64, files_done: u64, now: Instant) -> ProgressSample {
        let percent = if self.total_bytes > 0 {
            (bytes_done as f64 / self.total_bytes as f64 * 100.0).min(100.0)
        } else if self.files_total > 0 {
            files_done as f64 / self.files_total as f64 * 100.0
        } else {
            0.0
        };
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        let speed = (elapsed > 0.0 && bytes_done > 0).then(|| bytes_done as f64 / elapsed);
        let eta = speed.map(|s| self.total_bytes.saturating_sub(bytes_done) as f64 / s);

        ProgressSample {
            percent,
            files_done,
            files_total: self.files_total,
            bytes_done: Some(bytes_done),
            bytes_per_sec: speed,
            eta_seconds: eta,
            stalled_for: None,
        }
    }
}

/// Estimator for strategies that expose no progress of their own.
#[derive(Debug)]
pub struct OpaqueEstimator {
    expected_files: u64,
    expected_bytes: u64,
    started: Instant,
    stall_after: Duration,
    last_value: u64,
    last_poll: Instant,
    last_change: Instant,
    rate: Option<f64>,
}

impl OpaqueEstimator {
    pub fn new(expected_files: u64, expected_bytes: u64, stall_after: Duration, started: Instant) -> Self {
        OpaqueEstimator {
            expected_files,
            expected_bytes,
            started,
            stall_after,
            last_value: 0,
            last_poll: started,
            last_change: started,
            rate: None,
        }
    }

    /// Observe the number of pattern matches that have appeared (batch jobs).
    pub fn observe_files(&mut self, files_seen: u64, now: Instant) -> ProgressSample {
        let files_seen = if self.expected_files > 0 {
            files_seen.min(self.expected_files)
        } else {
            files_seen
        };
        let stalled_for = self.track(files_seen, now);

        let fraction = if self.expected_files > 0 {
            files_seen as f64 / self.expected_files as f64
        } else {
            0.0
        };
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();

        // Speed only when there is a size estimate to scale the file fraction by.
        let (bytes_done, speed) = if self.expected_bytes > 0 {
            let estimated = (fraction * self.expected_bytes as f64) as u64;
            let speed = (elapsed > 0.0 && estimated > 0).then(|| estimated as f64 / elapsed);
            (Some(estimated), speed)
        } else {
            (None, None)
        };
        let eta = match (self.expected_bytes > 0, self.rate) {
            (true, Some(rate)) if rate > 0.0 => {
                Some(self.expected_files.saturating_sub(files_seen) as f64 / rate)
            }
            _ => None,
        };

        ProgressSample {
            percent: (fraction * 100.0).min(OPAQUE_PERCENT_CAP),
            files_done: files_seen,
            files_total: self.expected_files,
            bytes_done,
            bytes_per_sec: speed,
            eta_seconds: eta,
            stalled_for,
        }
    }

    /// Observe the destination size of a single-file copy.
    pub fn observe_bytes(&mut self, bytes_seen: u64, now: Instant) -> ProgressSample {
        let bytes_seen = if self.expected_bytes > 0 {
            bytes_seen.min(self.expected_bytes)
        } else {
            bytes_seen
        };
        let stalled_for = self.track(bytes_seen, now);

        let percent = if self.expected_bytes > 0 {
            bytes_seen as f64 / self.expected_bytes as f64 * 100.0
        } else {
            0.0
        };
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        let speed = (elapsed > 0.0 && bytes_seen > 0).then(|| bytes_seen as f64 / elapsed);
        let eta = speed.map(|s| self.expected_bytes.saturating_sub(bytes_seen) as f64 / s);

        ProgressSample {
            percent: percent.min(OPAQUE_PERCENT_CAP),
            files_done: 0,
            files_total: self.expected_files,
            bytes_done: Some(bytes_seen),
            bytes_per_sec: speed,
            eta_seconds: eta,
            stalled_for,
        }
    }

    /// Update the change-rate bookkeeping; returns the stall duration, if stalled.
    fn track(&mut self, value: u64, now: Instant) -> Option<Duration> {
        let poll_secs = now.saturating_duration_since(self.last_poll).as_secs_f64();
        let delta = value.saturating_sub(self.last_value);
        if poll_secs > 0.0 {
            let instant_rate = delta as f64 / poll_secs;
            self.rate = Some(match self.rate {
                Some(prev) => RATE_SMOOTHING * instant_rate + (1.0 - RATE_SMOOTHING) * prev,
                None => instant_rate,
            });
        }
        self.last_poll = now;
        if delta > 0 {
            self.last_value = value;
            self.last_change = now;
        }

        let idle = now.saturating_duration_since(self.last_change);
        (idle >= self.stall_after).then_some(idle)
    }
}

/// What the destination watcher polls.
#[derive(Debug, Clone)]
pub enum WatchTarget {
    /// Single-file copy: destination existence and size
    File { path: PathBuf, expected_bytes: u64 },
    /// Batch copy: number of new pattern matches in the destination directory
    Pattern {
        dir: PathBuf,
        pattern: String,
        expected_files: u64,
        expected_bytes: u64,
        /// Matches that were already present before the copy started
        baseline: u64,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    pub interval: Duration,
    pub stall_after: Duration,
}

/// Run `work` while a watcher thread polls `target` and reports to `sink`.
///
/// The watcher is stopped and joined before this function returns, so it can
/// never report after `work` has finished.
pub fn watch_while<T, F>(target: WatchTarget, settings: WatchSettings, sink: &dyn ProgressSink, work: F) -> T
where
    F: FnOnce() -> T,
{
    let (stop_tx, stop_rx) = bounded::<()>(0);
    thread::scope(|s| {
        s.spawn(move || poll_destination(target, settings, sink, stop_rx));
        let result = work();
        drop(stop_tx);
        result
    })
}

fn poll_destination(target: WatchTarget, settings: WatchSettings, sink: &dyn ProgressSink, stop: Receiver<()>) {
    let started = Instant::now();
    let (expected_files, expected_bytes) = match &target {
        WatchTarget::File { expected_bytes, .. } => (1, *expected_bytes),
        WatchTarget::Pattern {
            expected_files,
            expected_bytes,
            ..
        } => (*expected_files, *expected_bytes),
    };
    let mut estimator = OpaqueEstimator::new(expected_files, expected_bytes, settings.stall_after, started);
    let mut last_reported: Option<ProgressSample> = None;
    let mut last_emit = started;
    debug!(?target, "destination watcher started");

    loop {
        match stop.recv_timeout(settings.interval) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
        let now = Instant::now();
        let sample = match &target {
            WatchTarget::File { path, .. } => estimator.observe_bytes(fs_ops::file_size(path).unwrap_or(0), now),
            WatchTarget::Pattern {
                dir, pattern, baseline, ..
            } => estimator.observe_files(fs_ops::count_matching(dir, pattern).saturating_sub(*baseline), now),
        };

        let changed = last_reported.as_ref().map_or(true, |prev| {
            prev.files_done != sample.files_done || prev.bytes_done != sample.bytes_done
        });
        // Unchanged samples still go out at the stall cadence as heartbeats.
        if changed || now.saturating_duration_since(last_emit) >= settings.stall_after {
            last_emit = now;
            last_reported = Some(sample.clone());
            sink.report(sample);
        }
    }
    debug!("destination watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        samples: Mutex<Vec<ProgressSample>>,
    }

    impl ProgressSink for Recorder {
        fn report(&self, sample: ProgressSample) {
            self.samples.lock().unwrap().push(sample);
        }
    }

    #[test]
    fn test_streaming_sample() {
        let start = Instant::now();
        let estimator = StreamingEstimator::starting_at(1000, 1, start);
        let sample = estimator.sample_at(250, 0, start + Duration::from_secs(1));
        assert_eq!(sample.percent, 25.0);
        assert_eq!(sample.bytes_per_sec, Some(250.0));
        assert_eq!(sample.eta_seconds, Some(3.0));
    }

    #[test]
    fn test_opaque_files_capped_below_complete() {
        let start = Instant::now();
        let mut estimator = OpaqueEstimator::new(10, 10_000, Duration::from_secs(5), start);
        let sample = estimator.observe_files(10, start + Duration::from_secs(2));
        assert_eq!(sample.percent, OPAQUE_PERCENT_CAP);
        assert_eq!(sample.files_done, 10);
        assert_eq!(sample.bytes_done, Some(10_000));
        assert_eq!(sample.bytes_per_sec, Some(5_000.0));
    }

    #[test]
    fn test_opaque_without_size_estimate_omits_rate() {
        let start = Instant::now();
        let mut estimator = OpaqueEstimator::new(4, 0, Duration::from_secs(5), start);
        let sample = estimator.observe_files(1, start + Duration::from_secs(1));
        assert_eq!(sample.percent, 25.0);
        assert_eq!(sample.bytes_per_sec, None);
        assert_eq!(sample.eta_seconds, None);
    }

    #[test]
    fn test_opaque_eta_from_file_rate() {
        let start = Instant::now();
        let mut estimator = OpaqueEstimator::new(10, 1000, Duration::from_secs(5), start);
        let sample = estimator.observe_files(2, start + Duration::from_secs(1));
        // 2 files/s observed, 8 remaining
        assert_eq!(sample.eta_seconds, Some(4.0));
    }

    #[test]
    fn test_stall_holds_percent_flat() {
        let start = Instant::now();
        let mut estimator = OpaqueEstimator::new(10, 0, Duration::from_secs(2), start);
        let first = estimator.observe_files(3, start + Duration::from_secs(1));
        assert_eq!(first.stalled_for, None);

        let later = estimator.observe_files(3, start + Duration::from_secs(4));
        assert_eq!(later.percent, first.percent);
        assert_eq!(later.stalled_for, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_opaque_single_file_bytes() {
        let start = Instant::now();
        let mut estimator = OpaqueEstimator::new(1, 200, Duration::from_secs(5), start);
        let sample = estimator.observe_bytes(100, start + Duration::from_secs(1));
        assert_eq!(sample.percent, 50.0);
        assert_eq!(sample.files_done, 0);
        assert_eq!(sample.eta_seconds, Some(1.0));
    }

    #[test]
    fn test_watcher_sees_files_and_stops_with_work() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dir = temp_dir.path().to_path_buf();
        let recorder = Recorder::default();
        let settings = WatchSettings {
            interval: Duration::from_millis(20),
            stall_after: Duration::from_secs(5),
        };
        let target = WatchTarget::Pattern {
            dir: dir.clone(),
            pattern: "f.*.bin".to_string(),
            expected_files: 3,
            expected_bytes: 0,
            baseline: 0,
        };

        let value = watch_while(target, settings, &recorder, || {
            for i in 0..3 {
                std::fs::write(dir.join(format!("f.{}.bin", i)), b"x").expect("write");
                thread::sleep(Duration::from_millis(80));
            }
            42
        });
        assert_eq!(value, 42);

        let count_after_return = recorder.samples.lock().unwrap().len();
        thread::sleep(Duration::from_millis(100));
        let samples = recorder.samples.lock().unwrap();
        assert_eq!(samples.len(), count_after_return, "watcher must not outlive the work");
        assert!(samples.iter().any(|s| s.files_done >= 2));
        assert!(samples.windows(2).all(|w| w[0].files_done <= w[1].files_done));
        assert!(samples.iter().all(|s| s.percent < 100.0));
    }

    #[test]
    fn test_watcher_emits_heartbeat_when_stalled() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let recorder = Recorder::default();
        let settings = WatchSettings {
            interval: Duration::from_millis(20),
            stall_after: Duration::from_millis(100),
        };
        let target = WatchTarget::File {
            path: temp_dir.path().join("never.bin"),
            expected_bytes: 100,
        };

        watch_while(target, settings, &recorder, || thread::sleep(Duration::from_millis(450)));

        let samples = recorder.samples.lock().unwrap();
        assert!(samples.len() >= 2, "heartbeats expected, got {}", samples.len());
        assert!(samples.iter().all(|s| s.percent == 0.0));
        assert!(samples.iter().any(|s| s.stalled_for.is_some()));
    }
}
