//! External Tool Capability
//!
//! Compilers and translators are modelled as a typed [`ExternalTool`]: every
//! call is a [`ToolInvocation`] with an explicit argument vector (never a
//! shell string), and every result carries the exit status plus captured
//! stdout/stderr so diagnostics can be surfaced verbatim.
//!
//! [`ProcessTool`] is the production implementation. Tests substitute an
//! in-process tool that records invocations and writes deterministic output.

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, Result};
use crate::fingerprint::Fingerprint;

/// Role a tool plays in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    StageCompiler,
    Translator,
    NativeCompiler,
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StageCompiler => "stage compiler",
            Self::Translator => "translator",
            Self::NativeCompiler => "native compiler",
        })
    }
}

/// Program plus fixed leading arguments, e.g. `xcrun -sdk macosx metal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolSpec {
    #[must_use]
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_args(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    /// Digest of program and arguments; a changed spec invalidates every
    /// artifact the tool produced.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut bytes = self.program.as_bytes().to_vec();
        for arg in &self.args {
            bytes.push(0);
            bytes.extend_from_slice(arg.as_bytes());
        }
        Fingerprint::of(&bytes)
    }
}

/// One fully-resolved call of an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub kind: ToolKind,
    pub program: String,
    pub args: Vec<String>,
    /// Primary input file.
    pub input: PathBuf,
    /// File the tool is expected to produce.
    pub output: PathBuf,
}

impl ToolInvocation {
    /// Starts an invocation from a spec; its fixed arguments come first.
    #[must_use]
    pub fn new(kind: ToolKind, spec: &ToolSpec, input: &Path, output: &Path) -> Self {
        Self {
            kind,
            program: spec.program.clone(),
            args: spec.args.clone(),
            input: input.to_path_buf(),
            output: output.to_path_buf(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg:?}")?;
        }
        Ok(())
    }
}

/// Exit status and captured streams of a finished tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stderr followed by stdout, trimmed; what a user needs to see.
    #[must_use]
    pub fn diagnostics(&self) -> String {
        let mut text = String::new();
        for stream in [&self.stderr, &self.stdout] {
            let stream = stream.trim();
            if stream.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stream);
        }
        if text.is_empty() {
            match self.status {
                Some(code) => format!("exited with status {code}"),
                None => "terminated by signal".to_string(),
            }
        } else {
            text
        }
    }
}

/// Something that can execute a [`ToolInvocation`].
///
/// `Err` is reserved for failing to run the tool at all; a tool that ran and
/// rejected its input returns `Ok` with a non-zero status.
pub trait ExternalTool: Send + Sync {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput>;
}

/// Runs tools as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessTool {
    timeout: Option<Duration>,
}

impl ProcessTool {
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl ExternalTool for ProcessTool {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        log::debug!("Running {}: {invocation}", invocation.kind);

        let spawn_error = |e: std::io::Error| PipelineError::Tool {
            program: invocation.program.clone(),
            reason: e.to_string(),
        };

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        let Some(timeout) = self.timeout else {
            let output = child.wait_with_output().map_err(spawn_error)?;
            return Ok(ToolOutput {
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        };

        // Drain both pipes on their own threads so a chatty tool cannot block
        // on a full pipe while we poll for exit.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait().map_err(spawn_error)? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PipelineError::Tool {
                    program: invocation.program.clone(),
                    reason: format!("timed out after {}s", timeout.as_secs_f32()),
                });
            }
            thread::sleep(Duration::from_millis(10));
        };

        Ok(ToolOutput {
            status: status.code(),
            stdout: stdout.map(join_drain).unwrap_or_default(),
            stderr: stderr.map(join_drain).unwrap_or_default(),
        })
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_drain(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Runs `invocation` and enforces the output contract.
///
/// Returns `Ok(Err(diagnostics))` when the tool ran but failed: non-zero
/// exit, or a zero exit without a non-empty output file. Any partial output
/// is removed so a failed step never leaves a file that looks like a cache
/// hit.
pub(crate) fn execute(
    tool: &dyn ExternalTool,
    invocation: &ToolInvocation,
) -> Result<std::result::Result<(), String>> {
    if let Some(parent) = invocation.output.parent() {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }

    let output = match tool.run(invocation) {
        Ok(output) => output,
        Err(e) => {
            remove_partial(&invocation.output);
            return Err(e);
        }
    };

    if !output.success() {
        remove_partial(&invocation.output);
        return Ok(Err(output.diagnostics()));
    }

    let produced = fs::metadata(&invocation.output).is_ok_and(|m| m.is_file() && m.len() > 0);
    if !produced {
        remove_partial(&invocation.output);
        let mut diagnostics = format!(
            "{} exited successfully but did not produce {}",
            invocation.program,
            invocation.output.display()
        );
        if !output.stderr.trim().is_empty() || !output.stdout.trim().is_empty() {
            diagnostics.push('\n');
            diagnostics.push_str(&output.diagnostics());
        }
        return Ok(Err(diagnostics));
    }

    Ok(Ok(()))
}

fn remove_partial(path: &Path) {
    if path.exists()
        && let Err(e) = fs::remove_file(path)
    {
        log::warn!("Could not remove partial output {}: {e}", path.display());
    }
}
