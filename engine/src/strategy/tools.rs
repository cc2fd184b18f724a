//! Native bulk-copy utilities.
//!
//! Each `BulkCopyTool` knows how to build its command line for a single file
//! or a sequence batch, which exit codes mean success, and how to recover
//! copied/skipped/failed counts from its textual summary. Nothing outside this
//! module parses utility output.

use crate::config::EngineConfig;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

/// Counts recovered from a utility's own summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BulkCopyReport {
    pub files_copied: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
}

/// A ready-to-run utility invocation.
#[derive(Debug)]
pub struct Invocation {
    pub command: Command,
    /// Bytes fed to stdin (answers to interactive prompts)
    pub stdin: Option<Vec<u8>>,
}

impl Invocation {
    fn new(command: Command) -> Self {
        Invocation { command, stdin: None }
    }
}

pub trait BulkCopyTool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Command copying `source` to the exact file path `destination`.
    /// `Err` explains why this utility cannot express the request.
    fn single_file(&self, source: &Path, destination: &Path, config: &EngineConfig) -> Result<Invocation, String>;

    /// Command copying `members` from `source_dir` into `destination_dir`.
    /// `pattern` is set when it selects exactly those members and nothing else.
    fn batch(
        &self,
        source_dir: &Path,
        pattern: Option<&str>,
        members: &[PathBuf],
        destination_dir: &Path,
        config: &EngineConfig,
    ) -> Result<Invocation, String>;

    fn exit_ok(&self, status: &ExitStatus) -> bool {
        status.success()
    }

    fn parse_report(&self, stdout: &str) -> Option<BulkCopyReport>;
}

fn split_file(path: &Path) -> Result<(&Path, &std::ffi::OsStr), String> {
    let name = path
        .file_name()
        .ok_or_else(|| format!("{} has no file name", path.display()))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
    Ok((dir, name))
}

/// Directory argument with a trailing separator so utilities treat it as a directory.
fn dir_arg(dir: &Path, separator: char) -> OsString {
    let mut arg = dir.as_os_str().to_os_string();
    if !arg.to_string_lossy().ends_with(['/', '\\']) {
        arg.push(separator.to_string());
    }
    arg
}

fn whole_pattern<'a>(pattern: Option<&'a str>, tool: &str) -> Result<&'a str, String> {
    pattern.ok_or_else(|| format!("{} can only copy whole pattern matches, not a selection", tool))
}

fn parse_count(token: &str) -> Option<u64> {
    token.replace([',', '.'], "").parse().ok()
}

/// Windows `robocopy`: unbuffered I/O, multithreaded, no retries, always overwrite.
#[derive(Debug, Clone, Copy)]
pub struct Robocopy;

impl Robocopy {
    fn command(source_dir: &Path, destination_dir: &Path, filter: &std::ffi::OsStr, config: &EngineConfig) -> Command {
        let mut cmd = Command::new("robocopy");
        cmd.arg(source_dir)
            .arg(destination_dir)
            .arg(filter)
            .arg("/J")
            .arg(format!("/MT:{}", config.bulk_threads.clamp(1, 128)))
            .args(["/R:0", "/W:0", "/IS", "/IT", "/NP", "/NDL", "/NFL", "/NJH", "/BYTES"]);
        cmd
    }
}

impl BulkCopyTool for Robocopy {
    fn name(&self) -> &'static str {
        "robocopy"
    }

    fn single_file(&self, source: &Path, destination: &Path, config: &EngineConfig) -> Result<Invocation, String> {
        let (source_dir, name) = split_file(source)?;
        let (destination_dir, dest_name) = split_file(destination)?;
        if name != dest_name {
            return Err("robocopy cannot rename while copying".to_string());
        }
        Ok(Invocation::new(Self::command(source_dir, destination_dir, name, config)))
    }

    fn batch(
        &self,
        source_dir: &Path,
        pattern: Option<&str>,
        _members: &[PathBuf],
        destination_dir: &Path,
        config: &EngineConfig,
    ) -> Result<Invocation, String> {
        let pattern = whole_pattern(pattern, self.name())?;
        Ok(Invocation::new(Self::command(
            source_dir,
            destination_dir,
            std::ffi::OsStr::new(pattern),
            config,
        )))
    }

    /// Exit codes below 8 are success (bit flags for copied/extra/mismatched).
    fn exit_ok(&self, status: &ExitStatus) -> bool {
        matches!(status.code(), Some(code) if (0..8).contains(&code))
    }

    /// Reads the `Files :` row of the job summary:
    /// `Total Copied Skipped Mismatch FAILED Extras`.
    fn parse_report(&self, stdout: &str) -> Option<BulkCopyReport> {
        stdout.lines().find_map(|line| {
            let rest = line.trim().strip_prefix("Files")?.trim_start().strip_prefix(':')?;
            let counts: Vec<u64> = rest.split_whitespace().filter_map(parse_count).collect();
            match counts.as_slice() {
                [_total, copied, skipped, mismatch, failed, ..] => Some(BulkCopyReport {
                    files_copied: *copied,
                    files_skipped: *skipped,
                    files_failed: failed + mismatch,
                }),
                _ => None,
            }
        })
    }
}

/// Windows `xcopy`: slower but present everywhere.
#[derive(Debug, Clone, Copy)]
pub struct Xcopy;

impl BulkCopyTool for Xcopy {
    fn name(&self) -> &'static str {
        "xcopy"
    }

    fn single_file(&self, source: &Path, destination: &Path, _config: &EngineConfig) -> Result<Invocation, String> {
        let mut cmd = Command::new("xcopy");
        cmd.arg(source).arg(destination).args(["/Y", "/J", "/Q"]);
        Ok(Invocation {
            command: cmd,
            // Answers "does the destination specify a file name or directory name".
            stdin: Some(b"F\r\n".to_vec()),
        })
    }

    fn batch(
        &self,
        source_dir: &Path,
        pattern: Option<&str>,
        _members: &[PathBuf],
        destination_dir: &Path,
        _config: &EngineConfig,
    ) -> Result<Invocation, String> {
        let pattern = whole_pattern(pattern, self.name())?;
        let mut cmd = Command::new("xcopy");
        cmd.arg(source_dir.join(pattern))
            .arg(dir_arg(destination_dir, '\\'))
            .args(["/Y", "/I", "/J", "/Q"]);
        Ok(Invocation::new(cmd))
    }

    /// Reads `N File(s) copied`.
    fn parse_report(&self, stdout: &str) -> Option<BulkCopyReport> {
        stdout.lines().find_map(|line| {
            let line = line.trim();
            let (count, rest) = line.split_once(char::is_whitespace)?;
            if !rest.trim_start().to_ascii_lowercase().starts_with("file(s) copied") {
                return None;
            }
            Some(BulkCopyReport {
                files_copied: parse_count(count)?,
                ..BulkCopyReport::default()
            })
        })
    }
}

/// `rsync` as the fast path on Unix. Whole-file transfers and
/// `--ignore-times` make it overwrite unconditionally.
#[derive(Debug, Clone, Copy)]
pub struct Rsync;

impl Rsync {
    fn base() -> Command {
        let mut cmd = Command::new("rsync");
        cmd.args(["--times", "--whole-file", "--ignore-times", "--stats"]);
        cmd
    }
}

impl BulkCopyTool for Rsync {
    fn name(&self) -> &'static str {
        "rsync"
    }

    fn single_file(&self, source: &Path, destination: &Path, _config: &EngineConfig) -> Result<Invocation, String> {
        let mut cmd = Self::base();
        cmd.arg(source).arg(destination);
        Ok(Invocation::new(cmd))
    }

    /// Member names go to `--files-from` on stdin, so only the selection is
    /// copied even when other files in the directory match the pattern.
    fn batch(
        &self,
        source_dir: &Path,
        _pattern: Option<&str>,
        members: &[PathBuf],
        destination_dir: &Path,
        _config: &EngineConfig,
    ) -> Result<Invocation, String> {
        if members.is_empty() {
            return Err("no files to copy".to_string());
        }
        let mut list = Vec::new();
        for member in members {
            let name = member
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| format!("{} has no usable file name", member.display()))?;
            list.extend_from_slice(name.as_bytes());
            list.push(0);
        }
        let mut cmd = Self::base();
        cmd.args(["--from0", "--files-from=-"])
            .arg(dir_arg(source_dir, '/'))
            .arg(dir_arg(destination_dir, '/'));
        Ok(Invocation {
            command: cmd,
            stdin: Some(list),
        })
    }

    /// Reads `Number of regular files transferred: N` (rsync >= 3.1) or
    /// `Number of files transferred: N` (older releases).
    fn parse_report(&self, stdout: &str) -> Option<BulkCopyReport> {
        stdout.lines().find_map(|line| {
            let line = line.trim();
            let value = line
                .strip_prefix("Number of regular files transferred:")
                .or_else(|| line.strip_prefix("Number of files transferred:"))?;
            Some(BulkCopyReport {
                files_copied: parse_count(value.trim())?,
                ..BulkCopyReport::default()
            })
        })
    }
}

/// Plain `cp`. The engine expands the pattern itself and passes the member list.
#[derive(Debug, Clone, Copy)]
pub struct Cp;

impl BulkCopyTool for Cp {
    fn name(&self) -> &'static str {
        "cp"
    }

    fn single_file(&self, source: &Path, destination: &Path, _config: &EngineConfig) -> Result<Invocation, String> {
        let mut cmd = Command::new("cp");
        cmd.arg("-f").arg(source).arg(destination);
        Ok(Invocation::new(cmd))
    }

    fn batch(
        &self,
        _source_dir: &Path,
        _pattern: Option<&str>,
        members: &[PathBuf],
        destination_dir: &Path,
        _config: &EngineConfig,
    ) -> Result<Invocation, String> {
        if members.is_empty() {
            return Err("no files to copy".to_string());
        }
        let mut cmd = Command::new("cp");
        cmd.arg("-f").args(members).arg(dir_arg(destination_dir, '/'));
        Ok(Invocation::new(cmd))
    }

    /// cp prints nothing on success; the chain verifies members instead.
    fn parse_report(&self, _stdout: &str) -> Option<BulkCopyReport> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_robocopy_summary() {
        let stdout = "
------------------------------------------------------------------------------

               Total    Copied   Skipped  Mismatch    FAILED    Extras
    Dirs :         1         0         1         0         0         0
   Files :        10         9         0         0         1         0
   Bytes :     10240      9216         0         0      1024         0
";
        let report = Robocopy.parse_report(stdout).expect("report");
        assert_eq!(
            report,
            BulkCopyReport {
                files_copied: 9,
                files_skipped: 0,
                files_failed: 1
            }
        );
    }

    #[test]
    fn test_robocopy_exit_codes() {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            let code = |c: i32| ExitStatus::from_raw(c << 8);
            assert!(Robocopy.exit_ok(&code(0)));
            assert!(Robocopy.exit_ok(&code(1)));
            assert!(Robocopy.exit_ok(&code(7)));
            assert!(!Robocopy.exit_ok(&code(8)));
            assert!(!Robocopy.exit_ok(&code(16)));
        }
    }

    #[test]
    fn test_robocopy_cannot_rename() {
        let config = EngineConfig::default();
        assert!(Robocopy
            .single_file(Path::new("in/a.exr"), Path::new("out/b.exr"), &config)
            .is_err());
        let invocation = Robocopy
            .single_file(Path::new("in/a.exr"), Path::new("out/a.exr"), &config)
            .expect("same name");
        let args = args(&invocation.command);
        assert_eq!(&args[..3], ["in", "out", "a.exr"]);
        assert!(args.contains(&"/MT:32".to_string()));
        assert!(args.contains(&"/J".to_string()));
        assert!(args.contains(&"/R:0".to_string()));
    }

    #[test]
    fn test_xcopy_summary_and_prompt_answer() {
        let report = Xcopy.parse_report("C:\\in\\a.exr\r\n1 File(s) copied\r\n").expect("report");
        assert_eq!(report.files_copied, 1);
        assert_eq!(Xcopy.parse_report("0 File(s) copied").map(|r| r.files_copied), Some(0));
        assert_eq!(Xcopy.parse_report("Invalid path"), None);

        let invocation = Xcopy
            .single_file(Path::new("a.exr"), Path::new("b.exr"), &EngineConfig::default())
            .expect("invocation");
        assert_eq!(invocation.stdin.as_deref(), Some(&b"F\r\n"[..]));
    }

    #[test]
    fn test_rsync_stats_both_formats() {
        let modern = "Number of files: 11 (reg: 10, dir: 1)\nNumber of regular files transferred: 10\nTotal file size: 10,240 bytes\n";
        assert_eq!(Rsync.parse_report(modern).map(|r| r.files_copied), Some(10));
        let legacy = "Number of files: 11\nNumber of files transferred: 1,234\n";
        assert_eq!(Rsync.parse_report(legacy).map(|r| r.files_copied), Some(1234));
        assert_eq!(Rsync.parse_report("rsync error: some files vanished"), None);
    }

    #[test]
    fn test_rsync_batch_lists_members_on_stdin() {
        let members = vec![PathBuf::from("/in/seq.0001.exr"), PathBuf::from("/in/seq.0002.exr")];
        let invocation = Rsync
            .batch(Path::new("/in"), None, &members, Path::new("/out"), &EngineConfig::default())
            .expect("invocation");
        let args = args(&invocation.command);
        assert!(args.contains(&"--files-from=-".to_string()));
        assert!(args.contains(&"--from0".to_string()));
        assert!(args.contains(&"--ignore-times".to_string()));
        assert_eq!(&args[args.len() - 2..], ["/in/", "/out/"]);
        assert_eq!(invocation.stdin.as_deref(), Some(&b"seq.0001.exr\0seq.0002.exr\0"[..]));
        assert!(Rsync
            .batch(Path::new("/in"), Some("*"), &[], Path::new("/out"), &EngineConfig::default())
            .is_err());
    }

    #[test]
    fn test_pattern_tools_refuse_partial_selection() {
        let config = EngineConfig::default();
        let members = vec![PathBuf::from("/in/seq.0001.exr")];
        for tool in [&Robocopy as &dyn BulkCopyTool, &Xcopy] {
            assert!(tool.batch(Path::new("/in"), None, &members, Path::new("/out"), &config).is_err());
        }
        let invocation = Robocopy
            .batch(Path::new("/in"), Some("seq.*.exr"), &members, Path::new("/out"), &config)
            .expect("invocation");
        assert_eq!(&args(&invocation.command)[..3], ["/in", "/out", "seq.*.exr"]);
    }

    #[test]
    fn test_cp_batch_lists_members() {
        let members = vec![PathBuf::from("/in/a.1.exr"), PathBuf::from("/in/a.2.exr")];
        let invocation = Cp
            .batch(Path::new("/in"), Some("a.*.exr"), &members, Path::new("/out"), &EngineConfig::default())
            .expect("invocation");
        assert_eq!(args(&invocation.command), ["-f", "/in/a.1.exr", "/in/a.2.exr", "/out/"]);
        assert!(Cp.batch(Path::new("/in"), Some("*"), &[], Path::new("/out"), &EngineConfig::default()).is_err());
        assert_eq!(Cp.parse_report("anything"), None);
    }
}
