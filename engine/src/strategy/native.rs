use super::tools::{BulkCopyTool, Invocation};
use super::{CopyStrategy, CopyTarget, StrategyContext, StrategyResult};
use crate::error::StrategyFailure;
use crate::process::{self, ProcessError, Supervision};
use tracing::debug;

/// Runs an external bulk-copy utility under supervision.
///
/// Native utilities give no usable intermediate progress, so the strategy is
/// opaque and the chain watches the destination while it runs.
pub struct NativeStrategy<T: BulkCopyTool> {
    tool: T,
}

impl<T: BulkCopyTool> NativeStrategy<T> {
    pub fn new(tool: T) -> Self {
        NativeStrategy { tool }
    }

    fn invocation(&self, target: &CopyTarget<'_>, ctx: &StrategyContext<'_>) -> Result<Invocation, String> {
        match *target {
            CopyTarget::File {
                source, destination, ..
            } => self.tool.single_file(source, destination, ctx.config),
            CopyTarget::Batch {
                source_dir,
                pattern,
                exact,
                destination_dir,
                members,
                ..
            } => self
                .tool
                .batch(source_dir, exact.then_some(pattern), members, destination_dir, ctx.config),
        }
    }
}

impl<T: BulkCopyTool> CopyStrategy for NativeStrategy<T> {
    fn name(&self) -> &'static str {
        self.tool.name()
    }

    fn is_opaque(&self) -> bool {
        true
    }

    fn execute(&self, target: &CopyTarget<'_>, ctx: &StrategyContext<'_>) -> StrategyResult {
        let name = self.tool.name();
        let invocation = match self.invocation(target, ctx) {
            Ok(invocation) => invocation,
            Err(reason) => return StrategyResult::failed(StrategyFailure::execution(name, reason)),
        };

        let should_abort = || ctx.should_abort();
        let output = match process::run_supervised(
            invocation.command,
            Supervision {
                timeout: ctx.config.process_timeout(),
                cancelled: &should_abort,
                stdin: invocation.stdin.as_deref(),
            },
        ) {
            Ok(output) => output,
            Err(ProcessError::Cancelled) => {
                return StrategyResult::failed(StrategyFailure::Cancelled { strategy: name })
            }
            Err(e) => return StrategyResult::failed(StrategyFailure::execution(name, e.to_string())),
        };

        if !self.tool.exit_ok(&output.status) {
            let detail = last_line(&output.stderr)
                .or_else(|| last_line(&output.stdout))
                .unwrap_or("no output");
            return StrategyResult::failed(StrategyFailure::execution(
                name,
                format!("exited with {}: {}", output.status, detail),
            ));
        }

        let report = self.tool.parse_report(&output.stdout);
        debug!(strategy = name, ?report, "copy utility finished");
        StrategyResult::succeeded(target.total_bytes(), target.file_count(), report)
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}
