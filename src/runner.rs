//src/runner.rs

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::error::{Result, ShovillError};
use crate::logging::RunLog;

/// How often a running tool is checked for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One external tool invocation as a program plus an argument list.
/// Nothing is ever passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<OsString>,
    /// Redirect stdout into this file instead of capturing it.
    pub stdout: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdout: None,
            env: Vec::new(),
            dir: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        if let Some(path) = &self.stdout {
            write!(f, " > {}", path.display())?;
        }
        Ok(())
    }
}

/// Captured text from a finished tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs tool commands one at a time, blocking until each finishes.
pub trait CommandRunner {
    fn run(&mut self, stage: &str, cmd: &ToolCommand) -> Result<ToolOutput>;

    /// Run `first | second`. The output describes `second`.
    fn run_piped(
        &mut self,
        stage: &str,
        first: &ToolCommand,
        second: &ToolCommand,
    ) -> Result<ToolOutput>;
}

/// Shared stop request. Set by the signal thread, polled while a tool runs.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    requested: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Route SIGINT and SIGTERM into this flag instead of killing the process,
    /// so the running tool can be stopped and temporary files removed.
    pub fn install_signal_handlers(&self) -> Result<()> {
        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
            ShovillError::config(format!("failed to register signal handlers: {e}"))
        })?;
        let flag = self.clone();
        thread::spawn(move || {
            if let Some(signal) = signals.forever().next() {
                log::warn!("Received signal {signal}, stopping");
                flag.cancel();
            }
        });
        Ok(())
    }
}

/// Runs real processes and mirrors their output into the run log.
pub struct ProcessRunner {
    log: RunLog,
    cancel: CancelFlag,
}

impl ProcessRunner {
    pub fn new(log: RunLog) -> Self {
        Self {
            log,
            cancel: CancelFlag::new(),
        }
    }

    /// Stop the running tool when `cancel` is set.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    fn stdout_stdio(stage: &str, cmd: &ToolCommand) -> Result<Stdio> {
        match &cmd.stdout {
            Some(path) => {
                let file = File::create(path).map_err(|e| {
                    ShovillError::stage(stage, format!("cannot create {}: {e}", path.display()))
                })?;
                Ok(Stdio::from(file))
            }
            None => Ok(Stdio::piped()),
        }
    }

    fn ensure_running(&self, stage: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ShovillError::interrupted(format!("stopped before {stage}")));
        }
        Ok(())
    }

    /// Block until `child` exits, killing it if a stop is requested.
    fn wait_child(&self, stage: &str, cmd: &ToolCommand, child: &mut Child) -> Result<ExitStatus> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if self.cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ShovillError::interrupted(format!(
                    "'{}' was stopped during {stage}",
                    cmd.program
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn finish(&self, stage: &str, cmd: &ToolCommand, output: Output) -> Result<ToolOutput> {
        let out = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !out.stdout.is_empty() {
            self.log.append(&out.stdout);
        }
        if !out.stderr.is_empty() {
            self.log.append(&out.stderr);
        }
        check_status(stage, cmd, &output.status, &out.stderr)?;
        Ok(out)
    }
}

/// Read a child's pipe to the end on its own thread so the child never
/// blocks on a full pipe while we poll it.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn spawn_error(stage: &str, cmd: &ToolCommand, e: std::io::Error) -> ShovillError {
    ShovillError::stage(stage, format!("could not start '{}': {e}", cmd.program))
}

fn check_status(
    stage: &str,
    cmd: &ToolCommand,
    status: &ExitStatus,
    stderr: &str,
) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
    let detail = if tail.is_empty() {
        String::new()
    } else {
        format!(": {}", tail.into_iter().rev().collect::<Vec<_>>().join(" | "))
    };
    Err(ShovillError::stage(
        stage,
        format!("'{}' exited with {status}{detail}", cmd.program),
    ))
}

impl CommandRunner for ProcessRunner {
    fn run(&mut self, stage: &str, cmd: &ToolCommand) -> Result<ToolOutput> {
        self.ensure_running(stage)?;
        log::info!("Running: {cmd}");
        self.log.append(&format!("Running: {cmd}"));

        let mut child = cmd
            .to_command()
            .stdin(Stdio::null())
            .stdout(Self::stdout_stdio(stage, cmd)?)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(stage, cmd, e))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait_child(stage, cmd, &mut child)?;
        let output = Output {
            status,
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        };
        self.finish(stage, cmd, output)
    }

    fn run_piped(
        &mut self,
        stage: &str,
        first: &ToolCommand,
        second: &ToolCommand,
    ) -> Result<ToolOutput> {
        self.ensure_running(stage)?;
        log::info!("Running: {first} | {second}");
        self.log.append(&format!("Running: {first} | {second}"));

        // First stage's stderr can be large, so it streams to the log file
        // rather than a pipe nobody drains until the end.
        let first_stderr = match self.log.try_clone_file() {
            Some(f) => Stdio::from(f),
            None => Stdio::null(),
        };
        let mut upstream = first
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(first_stderr)
            .spawn()
            .map_err(|e| spawn_error(stage, first, e))?;

        let pipe = upstream
            .stdout
            .take()
            .ok_or_else(|| ShovillError::stage(stage, "no stdout from upstream process"))?;

        let downstream = second
            .to_command()
            .stdin(Stdio::from(pipe))
            .stdout(Self::stdout_stdio(stage, second)?)
            .stderr(Stdio::piped())
            .spawn();
        let mut downstream = match downstream {
            Ok(child) => child,
            Err(e) => {
                let _ = upstream.kill();
                let _ = upstream.wait();
                return Err(spawn_error(stage, second, e));
            }
        };
        let stdout = drain(downstream.stdout.take());
        let stderr = drain(downstream.stderr.take());

        let status = match self.wait_child(stage, second, &mut downstream) {
            Ok(status) => status,
            Err(e) => {
                let _ = upstream.kill();
                let _ = upstream.wait();
                return Err(e);
            }
        };
        let upstream_status = self.wait_child(stage, first, &mut upstream)?;
        check_status(stage, first, &upstream_status, "")?;

        let output = Output {
            status,
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        };
        self.finish(stage, second, output)
    }
}

/// Fail the stage unless `path` exists. An empty file passes; assemblers
/// that find nothing still write one.
pub fn check_created(stage: &str, path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(ShovillError::stage(
            stage,
            format!("output file {} was not created", path.display()),
        ))
    }
}

/// Fail the stage unless `path` exists and is non-empty.
pub fn check_output(stage: &str, path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(ShovillError::stage(
            stage,
            format!("output file {} is empty", path.display()),
        )),
        Err(_) => Err(ShovillError::stage(
            stage,
            format!("output file {} was not created", path.display()),
        )),
    }
}
