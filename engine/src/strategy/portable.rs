use super::tools::BulkCopyReport;
use super::{CopyStrategy, CopyTarget, StrategyContext, StrategyResult};
use crate::error::StrategyFailure;
use crate::fs_ops;
use crate::progress::StreamingEstimator;
use std::ops::ControlFlow;
use std::path::Path;
use std::time::{Duration, Instant};

const NAME: &str = "portable";

/// Minimum spacing between streaming progress reports.
const REPORT_EVERY: Duration = Duration::from_millis(100);

/// In-process chunked copy. Always available, always last in the chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortableStrategy;

struct Streamer<'a, 'c> {
    ctx: &'a StrategyContext<'c>,
    estimator: StreamingEstimator,
    last_report: Option<Instant>,
}

impl Streamer<'_, '_> {
    fn report(&mut self, bytes_done: u64, files_done: u64, force: bool) {
        let now = Instant::now();
        let due = self
            .last_report
            .map_or(true, |last| now.saturating_duration_since(last) >= REPORT_EVERY);
        if force || due {
            self.last_report = Some(now);
            self.ctx.progress.report(self.estimator.sample_at(bytes_done, files_done, now));
        }
    }

    /// Copy one file; `Ok(None)` when cancelled midway.
    fn copy(&mut self, source: &Path, destination: &Path, bytes_before: u64, files_done: u64) -> Result<Option<u64>, String> {
        let ctx = self.ctx;
        fs_ops::copy_file_chunked(source, destination, ctx.config.chunk_size, |copied| {
            if ctx.should_abort() {
                return ControlFlow::Break(());
            }
            self.report(bytes_before + copied, files_done, false);
            ControlFlow::Continue(())
        })
        .map_err(|e| format!("{} -> {}: {}", source.display(), destination.display(), e))
    }
}

impl CopyStrategy for PortableStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_opaque(&self) -> bool {
        false
    }

    fn execute(&self, target: &CopyTarget<'_>, ctx: &StrategyContext<'_>) -> StrategyResult {
        let mut streamer = Streamer {
            ctx,
            estimator: StreamingEstimator::new(target.total_bytes(), target.file_count()),
            last_report: None,
        };
        let cancelled = || StrategyResult::failed(StrategyFailure::Cancelled { strategy: NAME });

        match *target {
            CopyTarget::File {
                source, destination, ..
            } => match streamer.copy(source, destination, 0, 0) {
                Ok(Some(bytes)) => {
                    streamer.report(bytes, 1, true);
                    StrategyResult::succeeded(bytes, 1, None)
                }
                Ok(None) => cancelled(),
                Err(message) => StrategyResult::failed(StrategyFailure::execution(NAME, message)),
            },
            CopyTarget::Batch {
                destination_dir,
                members,
                ..
            } => {
                let mut bytes_done = 0u64;
                let mut files_done = 0u64;
                for member in members {
                    let Some(name) = member.file_name() else {
                        return StrategyResult::failed(StrategyFailure::execution(
                            NAME,
                            format!("{} has no file name", member.display()),
                        ));
                    };
                    match streamer.copy(member, &destination_dir.join(name), bytes_done, files_done) {
                        Ok(Some(bytes)) => {
                            bytes_done += bytes;
                            files_done += 1;
                            streamer.report(bytes_done, files_done, true);
                        }
                        Ok(None) => return cancelled(),
                        Err(message) => {
                            return StrategyResult::failed(StrategyFailure::execution(NAME, message))
                        }
                    }
                }
                let report = BulkCopyReport {
                    files_copied: files_done,
                    ..BulkCopyReport::default()
                };
                StrategyResult::succeeded(bytes_done, files_done, Some(report))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::control::SessionControl;
    use crate::progress::{ProgressSample, ProgressSink};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressSample>>);

    impl ProgressSink for Recorder {
        fn report(&self, sample: ProgressSample) {
            self.0.lock().unwrap().push(sample);
        }
    }

    #[test]
    fn test_single_file_streams_to_completion() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("big.bin");
        let dst = temp_dir.path().join("big_copy.bin");
        fs::write(&src, vec![7u8; 10_000]).expect("write source");

        let config = EngineConfig {
            chunk_size: 1024,
            ..EngineConfig::default()
        };
        let control = SessionControl::new();
        let recorder = Recorder::default();
        let ctx = StrategyContext {
            config: &config,
            control: &control,
            progress: &recorder,
        };
        let result = PortableStrategy.execute(
            &CopyTarget::File {
                source: &src,
                destination: &dst,
                size: 10_000,
            },
            &ctx,
        );

        assert!(result.success);
        assert_eq!(result.bytes_moved, 10_000);
        assert_eq!(fs::read(&dst).expect("read dest").len(), 10_000);
        let samples = recorder.0.lock().unwrap();
        let last = samples.last().expect("at least one sample");
        assert_eq!(last.percent, 100.0);
        assert!(samples.windows(2).all(|w| w[0].percent <= w[1].percent));
    }

    #[test]
    fn test_batch_copies_members_and_reports() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_dir = temp_dir.path().join("plates");
        let dst_dir = temp_dir.path().join("out");
        fs::create_dir_all(&src_dir).expect("create src");
        fs::create_dir_all(&dst_dir).expect("create dst");
        let members: Vec<PathBuf> = (1..=4).map(|i| src_dir.join(format!("seq.{:04}.exr", i))).collect();
        for m in &members {
            fs::write(m, b"frame").expect("write member");
        }

        let config = EngineConfig::default();
        let control = SessionControl::new();
        let recorder = Recorder::default();
        let ctx = StrategyContext {
            config: &config,
            control: &control,
            progress: &recorder,
        };
        let result = PortableStrategy.execute(
            &CopyTarget::Batch {
                source_dir: &src_dir,
                pattern: "seq.*.exr",
                exact: true,
                destination_dir: &dst_dir,
                members: &members,
                total_bytes: 20,
                baseline: 0,
            },
            &ctx,
        );

        assert!(result.success);
        assert_eq!(result.files_moved, 4);
        assert_eq!(result.report.map(|r| r.files_copied), Some(4));
        assert!(dst_dir.join("seq.0004.exr").exists());
        let files: Vec<u64> = recorder.0.lock().unwrap().iter().map(|s| s.files_done).collect();
        assert_eq!(files.last(), Some(&4));
    }

    #[test]
    fn test_cancel_stops_between_chunks() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("big.bin");
        fs::write(&src, vec![1u8; 4096]).expect("write source");

        let config = EngineConfig {
            chunk_size: 512,
            ..EngineConfig::default()
        };
        let control = SessionControl::new();
        control.cancel();
        let ctx = StrategyContext {
            config: &config,
            control: &control,
            progress: &crate::progress::NoProgress,
        };
        let result = PortableStrategy.execute(
            &CopyTarget::File {
                source: &src,
                destination: &temp_dir.path().join("out.bin"),
                size: 4096,
            },
            &ctx,
        );
        assert_eq!(result.error, Some(StrategyFailure::Cancelled { strategy: "portable" }));
    }
}
