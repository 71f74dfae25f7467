//! Orchestration for starting the agent subprocess.
//!
//! Resolves the binary once, then launches it with a bounded number of
//! attempts. Only retryable failures are retried; a missing binary, an
//! ENOENT spawn or a signature kill fail immediately since another attempt
//! cannot succeed.

use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::core::startup::{BinaryPathInputs, ResolvedBinary, StartupError, resolve_binary_path};
use crate::io::config::StartConfig;
use crate::io::process::Launcher;

/// Attempt budget for one start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPolicy {
    /// Total attempts including the first. Zero behaves as one.
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for StartPolicy {
    fn default() -> Self {
        Self::from_config(&StartConfig::default())
    }
}

impl StartPolicy {
    pub fn from_config(cfg: &StartConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Outcome of a successful start.
#[derive(Debug)]
pub struct StartOutcome<H> {
    pub handle: H,
    pub binary: ResolvedBinary,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Resolve the agent binary and launch it, retrying transient failures.
///
/// The returned error is the last attempt's; its `Display` is the wire form
/// (`[CODE] message`) the front-end classifies.
pub fn start_agent<L: Launcher>(
    launcher: &L,
    inputs: &BinaryPathInputs,
    policy: StartPolicy,
) -> Result<StartOutcome<L::Handle>, StartupError> {
    let binary = resolve_binary_path(inputs).inspect_err(|err| {
        error!(code = %err.code, "agent binary not resolved");
    })?;
    info!(path = %binary.path, source = ?binary.source, "resolved agent binary");

    let max_attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        debug!(attempt, max_attempts, "launching agent");
        match launcher.launch(&binary) {
            Ok(handle) => {
                info!(attempt, "agent started");
                return Ok(StartOutcome {
                    handle,
                    binary,
                    attempts: attempt,
                });
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                warn!(
                    attempt,
                    max_attempts,
                    err = %err,
                    delay_ms = policy.retry_delay.as_millis() as u64,
                    "agent start failed, retrying"
                );
                if !policy.retry_delay.is_zero() {
                    thread::sleep(policy.retry_delay);
                }
                attempt += 1;
            }
            Err(err) => {
                error!(attempt, err = %err, "agent start failed");
                return Err(err);
            }
        }
    }
}
