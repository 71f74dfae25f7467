//! Launching the agent subprocess and classifying launch failures.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::startup::{
    EarlyExit, ResolvedBinary, StartupError, StartupErrorCode, classify_early_exit,
    classify_spawn_error,
};
use crate::io::config::RuntimeConfig;

/// Launches one attempt of the agent subprocess.
///
/// Tests use scripted launchers that return predetermined outcomes without
/// spawning processes.
pub trait Launcher {
    type Handle;

    fn launch(&self, binary: &ResolvedBinary) -> Result<Self::Handle, StartupError>;
}

/// How long to wait for stderr to reach EOF once the agent has exited.
///
/// Grandchildren can inherit the pipe and keep it open long after the agent
/// itself is gone.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// A running agent subprocess.
///
/// Dropping the handle kills the process if it is still running.
#[derive(Debug)]
pub struct AgentProcess {
    child: Child,
    stderr_reader: Option<StderrReader>,
    pub binary: ResolvedBinary,
}

impl AgentProcess {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Exit status if the process has already exited.
    pub fn try_exit_status(&mut self) -> Result<Option<ExitStatus>> {
        self.child.try_wait().context("poll agent process")
    }

    /// Kill the process and reap it.
    pub fn stop(mut self) -> Result<ExitStatus> {
        info!(pid = self.child.id(), "stopping agent process");
        if self.child.try_wait().context("poll agent process")?.is_none() {
            self.child.kill().context("kill agent process")?;
        }
        let status = self.child.wait().context("wait agent process")?;
        if let Some(reader) = self.stderr_reader.take() {
            reader.finish(STDERR_DRAIN_TIMEOUT);
        }
        Ok(status)
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!(pid = self.child.id(), "agent handle dropped, killing process");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Background thread copying agent stderr into the debug log.
#[derive(Debug)]
struct StderrReader {
    handle: thread::JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

impl StderrReader {
    fn spawn<R: Read + Send + 'static>(stderr: R, tail: Arc<Mutex<Option<String>>>) -> Self {
        let (done_tx, done) = mpsc::channel();
        let handle = thread::spawn(move || {
            track_stderr(stderr, &tail);
            drop(done_tx);
        });
        Self { handle, done }
    }

    /// Wait up to `timeout` for EOF, then detach the thread if still reading.
    fn finish(self, timeout: Duration) {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                debug!("stderr still open after exit, detaching reader");
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    warn!("stderr reader thread panicked");
                }
            }
        }
    }
}

/// Spawns `<binary> <args>` and watches it through a startup grace window.
///
/// A child still running when the window closes counts as started. One that
/// exits inside it failed to start and is classified from its exit status.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub startup_grace: Duration,
}

impl ProcessLauncher {
    pub fn new(startup_grace: Duration) -> Self {
        Self {
            args: vec!["serve".to_string()],
            envs: Vec::new(),
            cwd: None,
            startup_grace,
        }
    }

    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self::new(cfg.startup_grace())
    }
}

impl Launcher for ProcessLauncher {
    type Handle = AgentProcess;

    #[instrument(skip_all, fields(path = %binary.path, source = ?binary.source))]
    fn launch(&self, binary: &ResolvedBinary) -> Result<AgentProcess, StartupError> {
        let mut cmd = Command::new(&binary.path);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        debug!("spawning agent process");
        let mut child = cmd.spawn().map_err(|err| {
            error!(err = %err, "failed to spawn agent process");
            classify_spawn_error(&err, &binary.path)
        })?;

        let stderr_tail = Arc::new(Mutex::new(None));
        let stderr_reader = child
            .stderr
            .take()
            .map(|stderr| StderrReader::spawn(stderr, Arc::clone(&stderr_tail)));

        match child.wait_timeout(self.startup_grace) {
            Ok(None) => {
                info!(pid = child.id(), "agent process started");
                Ok(AgentProcess {
                    child,
                    stderr_reader,
                    binary: binary.clone(),
                })
            }
            Ok(Some(status)) => {
                if let Some(reader) = stderr_reader {
                    reader.finish(STDERR_DRAIN_TIMEOUT);
                }
                let tail = stderr_tail
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                let err = classify_early_exit(&early_exit(status, tail));
                warn!(
                    exit_code = ?status.code(),
                    code = %err.code,
                    "agent process exited during startup"
                );
                Err(err)
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(StartupError::new(
                    StartupErrorCode::ProcessTerminated,
                    "failed to wait for agent process",
                )
                .with_detail(err.to_string()))
            }
        }
    }
}

fn track_stderr<R: Read>(stderr: R, tail: &Mutex<Option<String>>) {
    for line in BufReader::new(stderr).lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!(line, "agent stderr");
        *tail.lock().unwrap_or_else(PoisonError::into_inner) = Some(line.to_string());
    }
}

fn early_exit(status: ExitStatus, stderr_tail: Option<String>) -> EarlyExit {
    EarlyExit {
        code: status.code(),
        signal: exit_signal(status),
        stderr_tail,
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}
