//! Agent subprocess startup: binary path resolution and failure classification.
//!
//! Failures are carried as [`StartupError`] end-to-end. The string form
//! `[<CODE>] <message>[: <detail>]` is only produced when an error crosses a
//! boundary that carries plain strings, and [`StartupError::parse`] turns it
//! back into the tagged type.

use std::fmt;
use std::io;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Bare command name used when development builds fall back to `PATH`.
pub const DEV_BINARY_NAME: &str = "opencode";

/// Environment variable overriding the agent binary path.
pub const BINARY_PATH_ENV: &str = "OPENCODE_PATH";

/// SIGKILL. macOS kills binaries with an invalid code signature this way.
const SIGKILL: i32 = 9;

static WIRE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(OPENCODE_[A-Z_]+)\] ?(.*)$").expect("startup error pattern is valid")
});

/// Closed set of startup failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StartupErrorCode {
    #[serde(rename = "OPENCODE_BINARY_NOT_FOUND")]
    BinaryNotFound,
    #[serde(rename = "OPENCODE_SPAWN_ENOENT")]
    SpawnEnoent,
    #[serde(rename = "OPENCODE_SPAWN_EACCES")]
    SpawnEacces,
    #[serde(rename = "OPENCODE_CODE_SIGNATURE_INVALID")]
    CodeSignatureInvalid,
    #[serde(rename = "OPENCODE_PROCESS_TERMINATED")]
    ProcessTerminated,
}

impl StartupErrorCode {
    pub const ALL: [StartupErrorCode; 5] = [
        StartupErrorCode::BinaryNotFound,
        StartupErrorCode::SpawnEnoent,
        StartupErrorCode::SpawnEacces,
        StartupErrorCode::CodeSignatureInvalid,
        StartupErrorCode::ProcessTerminated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StartupErrorCode::BinaryNotFound => "OPENCODE_BINARY_NOT_FOUND",
            StartupErrorCode::SpawnEnoent => "OPENCODE_SPAWN_ENOENT",
            StartupErrorCode::SpawnEacces => "OPENCODE_SPAWN_EACCES",
            StartupErrorCode::CodeSignatureInvalid => "OPENCODE_CODE_SIGNATURE_INVALID",
            StartupErrorCode::ProcessTerminated => "OPENCODE_PROCESS_TERMINATED",
        }
    }

    pub fn from_wire(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == code)
    }

    /// Deterministic failures that will not resolve by launching again.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            StartupErrorCode::BinaryNotFound
                | StartupErrorCode::SpawnEnoent
                | StartupErrorCode::CodeSignatureInvalid
        )
    }
}

impl fmt::Display for StartupErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured startup failure. `Display` renders the wire format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{code}] {message}{}", detail_suffix(.detail))]
pub struct StartupError {
    pub code: StartupErrorCode,
    pub message: String,
    pub detail: Option<String>,
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail.as_deref() {
        Some(detail) if !detail.is_empty() => format!(": {detail}"),
        _ => String::new(),
    }
}

impl StartupError {
    pub fn new(code: StartupErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    /// Attach a detail. An empty detail is stored as none, matching how it
    /// renders on the wire.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        self.detail = (!detail.is_empty()).then_some(detail);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Decode the wire format.
    ///
    /// Returns `None` for strings that do not start with a known `[CODE]`.
    /// The first `": "` after the code separates message from detail.
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = WIRE_RE.captures(raw.trim())?;
        let code = StartupErrorCode::from_wire(caps.get(1)?.as_str())?;
        let rest = caps.get(2).map_or("", |m| m.as_str());
        let (message, detail) = match rest.split_once(": ") {
            Some((message, detail)) => {
                (message, Some(detail.to_string()).filter(|d| !d.is_empty()))
            }
            None => (rest, None),
        };
        Some(Self {
            code,
            message: message.to_string(),
            detail,
        })
    }
}

/// Extract the startup code from an arbitrary error.
///
/// Typed [`StartupError`]s anywhere in the chain win; otherwise the rendered
/// message is matched against the wire format.
pub fn startup_error_code(err: &anyhow::Error) -> Option<StartupErrorCode> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<StartupError>().map(|e| e.code))
        .or_else(|| StartupError::parse(&err.to_string()).map(|e| e.code))
}

/// Whether a failed launch is worth retrying.
///
/// Unclassified errors are assumed transient.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    startup_error_code(err).is_none_or(StartupErrorCode::is_retryable)
}

/// Where the agent binary path came from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinaryPathSource {
    Options,
    Env,
    Bundled,
    DevPath,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedBinary {
    pub path: String,
    pub source: BinaryPathSource,
}

/// Candidate binary locations supplied by the packaging layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinaryPathInputs {
    pub options_path: Option<String>,
    pub env_path: Option<String>,
    pub bundled_path: Option<String>,
    pub is_packaged: bool,
}

impl BinaryPathInputs {
    /// Fill `env_path` from `OPENCODE_PATH`.
    pub fn with_env(mut self) -> Self {
        self.env_path = std::env::var(BINARY_PATH_ENV).ok();
        self
    }
}

/// Pick the agent binary: options, env, bundled, then `PATH` in dev builds.
///
/// Packaged builds never fall back to `PATH`; a missing binary there is a
/// deterministic `BINARY_NOT_FOUND`.
pub fn resolve_binary_path(inputs: &BinaryPathInputs) -> Result<ResolvedBinary, StartupError> {
    let candidates = [
        (&inputs.options_path, BinaryPathSource::Options),
        (&inputs.env_path, BinaryPathSource::Env),
        (&inputs.bundled_path, BinaryPathSource::Bundled),
    ];
    for (path, source) in candidates {
        if let Some(path) = path.as_deref().filter(|p| !p.is_empty()) {
            return Ok(ResolvedBinary {
                path: path.to_string(),
                source,
            });
        }
    }

    if !inputs.is_packaged {
        return Ok(ResolvedBinary {
            path: DEV_BINARY_NAME.to_string(),
            source: BinaryPathSource::DevPath,
        });
    }

    Err(StartupError::new(
        StartupErrorCode::BinaryNotFound,
        "Bundled agent binary not found in packaged app",
    )
    .with_detail("Reinstall the app or update to a build with vendor binaries"))
}

/// Map a spawn failure to a startup code.
pub fn classify_spawn_error(err: &io::Error, path: &str) -> StartupError {
    let (code, message) = match err.kind() {
        io::ErrorKind::NotFound => (
            StartupErrorCode::SpawnEnoent,
            format!("agent binary not found at {path}"),
        ),
        io::ErrorKind::PermissionDenied => (
            StartupErrorCode::SpawnEacces,
            format!("agent binary at {path} is not executable"),
        ),
        _ => (
            StartupErrorCode::ProcessTerminated,
            format!("failed to spawn agent binary at {path}"),
        ),
    };
    StartupError::new(code, message).with_detail(err.to_string())
}

/// How a child exited before it became ready.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EarlyExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// Last non-empty stderr line, if any.
    pub stderr_tail: Option<String>,
}

/// Classify a child that exited during startup.
pub fn classify_early_exit(exit: &EarlyExit) -> StartupError {
    let err = if exit.signal == Some(SIGKILL) {
        StartupError::new(
            StartupErrorCode::CodeSignatureInvalid,
            "agent binary was killed at launch (code signature rejected)",
        )
    } else {
        let status = match (exit.code, exit.signal) {
            (Some(code), _) => format!("code={code}"),
            (None, Some(signal)) => format!("signal={signal}"),
            (None, None) => "unknown status".to_string(),
        };
        StartupError::new(
            StartupErrorCode::ProcessTerminated,
            format!("agent process terminated unexpectedly ({status})"),
        )
    };
    match exit.stderr_tail.as_deref().filter(|s| !s.is_empty()) {
        Some(tail) => err.with_detail(tail),
        None => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn inputs(
        options: Option<&str>,
        env: Option<&str>,
        bundled: Option<&str>,
        is_packaged: bool,
    ) -> BinaryPathInputs {
        BinaryPathInputs {
            options_path: options.map(str::to_string),
            env_path: env.map(str::to_string),
            bundled_path: bundled.map(str::to_string),
            is_packaged,
        }
    }

    #[test]
    fn options_path_wins() {
        let resolved =
            resolve_binary_path(&inputs(Some("/a"), Some("/b"), Some("/c"), true)).expect("path");
        assert_eq!(resolved.path, "/a");
        assert_eq!(resolved.source, BinaryPathSource::Options);
    }

    #[test]
    fn env_then_bundled() {
        let env = resolve_binary_path(&inputs(None, Some("/b"), Some("/c"), true)).expect("env");
        assert_eq!((env.path.as_str(), env.source), ("/b", BinaryPathSource::Env));

        let bundled = resolve_binary_path(&inputs(None, None, Some("/c"), true)).expect("bundled");
        assert_eq!(
            (bundled.path.as_str(), bundled.source),
            ("/c", BinaryPathSource::Bundled)
        );
    }

    #[test]
    fn empty_strings_are_absent() {
        let resolved =
            resolve_binary_path(&inputs(Some(""), Some(""), Some("/c"), true)).expect("path");
        assert_eq!(resolved.source, BinaryPathSource::Bundled);
    }

    #[test]
    fn dev_builds_fall_back_to_path() {
        let resolved = resolve_binary_path(&inputs(None, None, None, false)).expect("dev path");
        assert_eq!(resolved.path, "opencode");
        assert_eq!(resolved.source, BinaryPathSource::DevPath);
    }

    #[test]
    fn packaged_build_without_binary_fails() {
        let err = resolve_binary_path(&inputs(None, None, None, true)).unwrap_err();
        assert_eq!(err.code, StartupErrorCode::BinaryNotFound);
        assert!(err.to_string().starts_with("[OPENCODE_BINARY_NOT_FOUND]"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn wire_format_with_and_without_detail() {
        let plain = StartupError::new(StartupErrorCode::SpawnEnoent, "msg");
        assert_eq!(plain.to_string(), "[OPENCODE_SPAWN_ENOENT] msg");

        let detailed = plain.clone().with_detail("no such file");
        assert_eq!(
            detailed.to_string(),
            "[OPENCODE_SPAWN_ENOENT] msg: no such file"
        );
        assert_eq!(StartupError::parse(&detailed.to_string()), Some(detailed));
        assert_eq!(StartupError::parse(&plain.to_string()), Some(plain));
    }

    #[test]
    fn empty_detail_round_trips_as_none() {
        let err = StartupError::new(StartupErrorCode::ProcessTerminated, "exited").with_detail("");
        assert_eq!(err.detail, None);
        assert_eq!(err.to_string(), "[OPENCODE_PROCESS_TERMINATED] exited");
        assert_eq!(StartupError::parse(&err.to_string()), Some(err));
    }

    #[test]
    fn parse_rejects_unstructured_and_unknown_codes() {
        assert_eq!(StartupError::parse("plain error"), None);
        assert_eq!(StartupError::parse("[OPENCODE_NOT_A_CODE] x"), None);
        assert_eq!(StartupError::parse("prefix [OPENCODE_SPAWN_ENOENT] x"), None);
    }

    #[test]
    fn code_extracted_from_typed_and_string_errors() {
        let typed = anyhow::Error::new(StartupError::new(StartupErrorCode::SpawnEnoent, "msg"));
        assert_eq!(startup_error_code(&typed), Some(StartupErrorCode::SpawnEnoent));

        let wrapped = typed.context("start agent");
        assert_eq!(
            startup_error_code(&wrapped),
            Some(StartupErrorCode::SpawnEnoent)
        );

        let stringly = anyhow!("[OPENCODE_PROCESS_TERMINATED] crashed: boom");
        assert_eq!(
            startup_error_code(&stringly),
            Some(StartupErrorCode::ProcessTerminated)
        );

        assert_eq!(startup_error_code(&anyhow!("plain error")), None);
    }

    #[test]
    fn retryability_by_code() {
        let fatal = [
            StartupErrorCode::BinaryNotFound,
            StartupErrorCode::SpawnEnoent,
            StartupErrorCode::CodeSignatureInvalid,
        ];
        for code in fatal {
            let err = anyhow::Error::new(StartupError::new(code, "x"));
            assert!(!is_retryable(&err), "{code} should be fatal");
        }
        for code in [StartupErrorCode::ProcessTerminated, StartupErrorCode::SpawnEacces] {
            let err = anyhow::Error::new(StartupError::new(code, "x"));
            assert!(is_retryable(&err), "{code} should be retryable");
        }
        assert!(is_retryable(&anyhow!("unknown")));
    }

    #[test]
    fn spawn_errors_map_by_kind() {
        let enoent = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(
            classify_spawn_error(&enoent, "/x").code,
            StartupErrorCode::SpawnEnoent
        );
        let eacces = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(
            classify_spawn_error(&eacces, "/x").code,
            StartupErrorCode::SpawnEacces
        );
        let other = io::Error::other("boom");
        assert_eq!(
            classify_spawn_error(&other, "/x").code,
            StartupErrorCode::ProcessTerminated
        );
    }

    #[test]
    fn early_exit_classification() {
        let killed = classify_early_exit(&EarlyExit {
            code: None,
            signal: Some(9),
            stderr_tail: None,
        });
        assert_eq!(killed.code, StartupErrorCode::CodeSignatureInvalid);

        let crashed = classify_early_exit(&EarlyExit {
            code: Some(1),
            signal: None,
            stderr_tail: Some("address in use".to_string()),
        });
        assert_eq!(crashed.code, StartupErrorCode::ProcessTerminated);
        assert_eq!(crashed.detail.as_deref(), Some("address in use"));
        assert!(crashed.message.contains("code=1"));
    }
}
