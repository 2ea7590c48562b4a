//! Child processes with a wall-clock limit and bounded output capture.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Resource limits for one child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    pub timeout: Duration,
    /// Bytes of stdout and of stderr kept in memory; the rest is drained and counted.
    pub output_limit_bytes: usize,
}

/// Captured child process output.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_dropped: usize,
    pub stderr_dropped: usize,
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Render both streams for a log file.
    pub fn log_text(&self, label: &str) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        if self.stdout_dropped > 0 {
            buf.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_dropped
            ));
        }
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.stderr_dropped > 0 {
            buf.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_dropped
            ));
        }
        match (self.timed_out, self.status.code()) {
            (true, _) => buf.push_str(&format!("\n[{label} killed after timeout]\n")),
            (false, Some(code)) => buf.push_str(&format!("\n[{label} exit code {code}]\n")),
            (false, None) => buf.push_str(&format!("\n[{label} terminated by signal]\n")),
        }
        buf
    }

    /// Write [`Self::log_text`] to `path`.
    pub fn write_log(&self, path: &Path, label: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        fs::write(path, self.log_text(label))
            .with_context(|| format!("write {label} log {}", path.display()))
    }
}

/// Run `cmd` to completion or until `limits.timeout`, killing it on expiry.
///
/// stdin is closed. Both output pipes are drained on reader threads while the child
/// runs, so a chatty child can never block on a full pipe.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs()))]
pub fn run_with_limits(mut cmd: Command, limits: ProcessLimits) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let limit = limits.output_limit_bytes;
    let stdout_handle = thread::spawn(move || read_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || read_limited(stderr, limit));

    let mut timed_out = false;
    let status = match child.wait_timeout(limits.timeout).context("wait for child")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = limits.timeout.as_secs(), "child timed out, killing");
            timed_out = true;
            child.kill().context("kill child")?;
            child.wait().context("wait for child after kill")?
        }
    };

    let (stdout, stdout_dropped) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, stderr_dropped) = join_reader(stderr_handle).context("join stderr")?;
    if stdout_dropped > 0 || stderr_dropped > 0 {
        warn!(stdout_dropped, stderr_dropped, "child output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "child finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        stdout_dropped,
        stderr_dropped,
        timed_out,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .unwrap_or_else(|_| Err(anyhow!("output reader thread panicked")))
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(kept.len()));
        kept.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }
    Ok((kept, dropped))
}
