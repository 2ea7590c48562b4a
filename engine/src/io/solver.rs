//! Adapter around the external stock-assessment solver.
//!
//! The [`Solver`] trait decouples orchestration from the real binary. [`Ss3Solver`]
//! spawns the executable resolved once into a [`SolverContext`]; tests use scripted
//! solvers that write artifacts without spawning anything.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::error::{SimError, SimResult};
use crate::core::types::{ModelKind, SolveMode};
use crate::io::process::{ProcessLimits, run_with_limits};

/// Solver stdout/stderr, written next to the model files.
pub const SOLVER_LOG: &str = "solver.log";
/// Stable stem for renamed artifacts.
pub const STABLE_STEM: &str = "ss3";
/// Artifacts renamed from `<exe-stem>.<ext>` to `ss3.<ext>`.
pub const TAGGED_EXTENSIONS: [&str; 4] = ["par", "rep", "log", "bar"];
pub const REPORT_FILE: &str = "Report.sso";
pub const PAR_FILE: &str = "ss3.par";
/// Files a successful run must leave behind.
pub const EXPECTED_ARTIFACTS: [&str; 2] = [REPORT_FILE, PAR_FILE];

pub const NO_HESS: &str = "-nohess";
pub const NO_EST: &str = "-noest";

#[cfg(windows)]
const CANDIDATES: [&str; 2] = ["ss3.exe", "ss.exe"];
#[cfg(not(windows))]
const CANDIDATES: [&str; 2] = ["ss3", "ss"];

/// The resolved solver executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverContext {
    executable: PathBuf,
}

impl SolverContext {
    pub fn new(executable: PathBuf) -> Self {
        Self { executable }
    }

    /// Resolve `explicit` (a path, or a bare name looked up on `PATH`), or else the
    /// first platform candidate found on `PATH`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if path.components().count() > 1 || path.is_absolute() {
                if !path.is_file() {
                    bail!("solver executable {} does not exist", path.display());
                }
                return Ok(Self::new(path.to_path_buf()));
            }
            return search_path(path)
                .map(Self::new)
                .with_context(|| format!("solver {} not found on PATH", path.display()));
        }
        CANDIDATES
            .iter()
            .find_map(|name| search_path(Path::new(name)))
            .map(Self::new)
            .with_context(|| format!("no solver found on PATH (tried {CANDIDATES:?})"))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// File stem the solver uses for its version-tagged artifacts.
    pub fn stem(&self) -> String {
        self.executable
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| STABLE_STEM.to_string())
    }
}

fn search_path(name: &Path) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// How every solver run in a batch is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverOptions {
    /// Extra user flags, whitespace separated.
    pub extra_args: String,
    pub timeout: Duration,
    /// Wait after the process exits before looking for artifacts.
    pub settle: Duration,
    /// Keep the Hessian for estimation-model runs.
    pub hess: bool,
    pub output_limit_bytes: usize,
    pub env: BTreeMap<String, String>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            extra_args: String::new(),
            timeout: Duration::from_secs(30 * 60),
            settle: Duration::from_millis(500),
            hess: false,
            output_limit_bytes: 100_000,
            env: BTreeMap::new(),
        }
    }
}

/// One solver run in a prepared model directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveRequest {
    pub workdir: PathBuf,
    pub scenario: String,
    pub iteration: u32,
    pub model: ModelKind,
    pub mode: SolveMode,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SolveStatus {
    Ok,
    Exited { code: Option<i32> },
    TimedOut { secs: u64 },
    MissingArtifacts { missing: Vec<String> },
}

/// Result of one solver run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveOutcome {
    pub model: ModelKind,
    pub mode: SolveMode,
    pub status: SolveStatus,
    pub log_path: PathBuf,
    /// Stable-name artifacts present after the run.
    pub artifacts: Vec<PathBuf>,
}

impl SolveOutcome {
    pub fn success(&self) -> bool {
        self.status == SolveStatus::Ok
    }

    /// Map an unsuccessful run to its error.
    pub fn check(&self) -> SimResult<()> {
        let log = self.log_path.display();
        match &self.status {
            SolveStatus::Ok => Ok(()),
            SolveStatus::TimedOut { secs } => Err(SimError::SolverTimeout { secs: *secs }),
            SolveStatus::Exited { code: Some(code) } => Err(SimError::SolverFailure(format!(
                "{} run exited with code {code} (see {log})",
                self.model
            ))),
            SolveStatus::Exited { code: None } => Err(SimError::SolverFailure(format!(
                "{} run terminated by signal (see {log})",
                self.model
            ))),
            SolveStatus::MissingArtifacts { missing } => Err(SimError::SolverFailure(format!(
                "{} run left no {} (see {log})",
                self.model,
                missing.join(", ")
            ))),
        }
    }
}

/// Abstraction over solver backends.
pub trait Solver: Sync {
    /// Run the solver in `request.workdir`. Errors are reserved for failures to run it
    /// at all; an unsuccessful run is reported through [`SolveOutcome::status`].
    fn solve(&self, request: &SolveRequest) -> Result<SolveOutcome>;
}

/// Run the solver, append the outcome to `solves` and turn an unsuccessful outcome
/// into an error. Failed runs are appended too.
pub fn solve_recorded<S: Solver + ?Sized>(
    solver: &S,
    request: &SolveRequest,
    solves: &mut Vec<SolveOutcome>,
) -> Result<SolveOutcome> {
    let outcome = solver.solve(request)?;
    solves.push(outcome.clone());
    outcome.check().with_context(|| {
        format!(
            "solve {} for {}/{}",
            request.model, request.scenario, request.iteration
        )
    })?;
    Ok(outcome)
}

/// Flags the adapter always passes for a run.
pub fn injected_flags(model: ModelKind, mode: SolveMode, hess: bool) -> Vec<&'static str> {
    match (mode, model) {
        (SolveMode::NoEstimation, _) | (SolveMode::Standard, ModelKind::Om) => {
            vec![NO_HESS, NO_EST]
        }
        (SolveMode::Standard, ModelKind::Em) if hess => Vec::new(),
        (SolveMode::Standard, ModelKind::Em) => vec![NO_HESS],
    }
}

/// Split user options, dropping tokens that duplicate injected flags.
pub fn sanitize_options(options: &str, injected: &[&str]) -> Vec<String> {
    options
        .split_whitespace()
        .filter(|token| {
            let duplicate = injected.iter().any(|flag| flag.eq_ignore_ascii_case(token));
            if duplicate {
                warn!(flag = *token, "dropping solver option already injected by the adapter");
            }
            !duplicate
        })
        .map(str::to_string)
        .collect()
}

/// Solver backed by the real executable.
#[derive(Debug, Clone)]
pub struct Ss3Solver {
    context: SolverContext,
    options: SolverOptions,
}

impl Ss3Solver {
    pub fn new(context: SolverContext, options: SolverOptions) -> Self {
        Self { context, options }
    }

    pub fn args(&self, request: &SolveRequest) -> Vec<String> {
        let injected = injected_flags(request.model, request.mode, self.options.hess);
        let mut args = sanitize_options(&self.options.extra_args, &injected);
        args.extend(injected.into_iter().map(str::to_string));
        args
    }
}

impl Solver for Ss3Solver {
    #[instrument(skip_all, fields(scenario = %request.scenario, iteration = request.iteration, model = %request.model))]
    fn solve(&self, request: &SolveRequest) -> Result<SolveOutcome> {
        let args = self.args(request);
        info!(workdir = %request.workdir.display(), ?args, "starting solver");
        let stem = self.context.stem();
        clear_stale_outputs(&request.workdir, &stem)?;
        let before: Vec<(&str, Option<Snapshot>)> = EXPECTED_ARTIFACTS
            .iter()
            .map(|name| (*name, Snapshot::take(&request.workdir.join(name))))
            .collect();

        let mut cmd = Command::new(self.context.executable());
        cmd.args(&args)
            .current_dir(&request.workdir)
            .envs(&self.options.env);
        let output = run_with_limits(
            cmd,
            ProcessLimits {
                timeout: self.options.timeout,
                output_limit_bytes: self.options.output_limit_bytes,
            },
        )
        .with_context(|| format!("run solver in {}", request.workdir.display()))?;

        let log_path = request.workdir.join(SOLVER_LOG);
        output.write_log(&log_path, "solver")?;

        if !self.options.settle.is_zero() {
            thread::sleep(self.options.settle);
        }
        rename_artifacts(&request.workdir, &stem)?;

        let status = if output.timed_out {
            SolveStatus::TimedOut {
                secs: self.options.timeout.as_secs(),
            }
        } else if !output.status.success() {
            SolveStatus::Exited {
                code: output.status.code(),
            }
        } else {
            let missing: Vec<String> = before
                .iter()
                .filter(|(name, snapshot)| {
                    !written(&request.workdir.join(name), snapshot.as_ref())
                })
                .map(|(name, _)| name.to_string())
                .collect();
            if missing.is_empty() {
                SolveStatus::Ok
            } else {
                SolveStatus::MissingArtifacts { missing }
            }
        };
        if status != SolveStatus::Ok {
            warn!(?status, "solver run unsuccessful");
        }

        Ok(SolveOutcome {
            model: request.model,
            mode: request.mode,
            status,
            log_path,
            artifacts: stable_artifacts(&request.workdir),
        })
    }
}

/// Remove outputs an earlier run left behind, so only this run can produce them.
///
/// `ss3.par` stays: the solver reads it when the starter says so. It is checked for
/// changes instead.
fn clear_stale_outputs(workdir: &Path, stem: &str) -> Result<()> {
    let mut stale = vec![workdir.join(REPORT_FILE)];
    for ext in TAGGED_EXTENSIONS {
        if ext != "par" {
            stale.push(workdir.join(format!("{STABLE_STEM}.{ext}")));
        }
        if stem != STABLE_STEM {
            stale.push(workdir.join(format!("{stem}.{ext}")));
        }
    }
    for path in stale.iter().filter(|path| path.is_file()) {
        fs::remove_file(path).with_context(|| format!("remove stale {}", path.display()))?;
        debug!(path = %path.display(), "removed stale solver output");
    }
    Ok(())
}

/// An expected artifact as it was before the run.
#[derive(Debug)]
struct Snapshot {
    modified: Option<SystemTime>,
    contents: Vec<u8>,
}

impl Snapshot {
    fn take(path: &Path) -> Option<Self> {
        let contents = fs::read(path).ok()?;
        let modified = fs::metadata(path).and_then(|meta| meta.modified()).ok();
        Some(Self { modified, contents })
    }
}

/// Whether the run left `path` behind: created, or rewritten since `before`.
fn written(path: &Path, before: Option<&Snapshot>) -> bool {
    if !path.is_file() {
        return false;
    }
    let Some(before) = before else {
        return true;
    };
    let modified = fs::metadata(path).and_then(|meta| meta.modified()).ok();
    modified != before.modified || fs::read(path).is_ok_and(|now| now != before.contents)
}

/// Rename `<stem>.<ext>` artifacts to `ss3.<ext>`, replacing older copies.
pub fn rename_artifacts(workdir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
    let mut renamed = Vec::new();
    if stem == STABLE_STEM {
        return Ok(renamed);
    }
    for ext in TAGGED_EXTENSIONS {
        let from = workdir.join(format!("{stem}.{ext}"));
        if !from.is_file() {
            continue;
        }
        let to = workdir.join(format!("{STABLE_STEM}.{ext}"));
        fs::rename(&from, &to)
            .with_context(|| format!("rename {} to {}", from.display(), to.display()))?;
        debug!(from = %from.display(), to = %to.display(), "renamed solver artifact");
        renamed.push(to);
    }
    Ok(renamed)
}

fn stable_artifacts(workdir: &Path) -> Vec<PathBuf> {
    TAGGED_EXTENSIONS
        .iter()
        .map(|ext| workdir.join(format!("{STABLE_STEM}.{ext}")))
        .chain(std::iter::once(workdir.join(REPORT_FILE)))
        .filter(|path| path.is_file())
        .collect()
}
