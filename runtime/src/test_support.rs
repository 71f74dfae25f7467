//! Test-only fakes and builders.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};

use crate::core::startup::{ResolvedBinary, StartupError, StartupErrorCode};
use crate::core::types::{
    ConsentDecision, ConsentRecord, Message, TodoItem, TodoPriority, TodoStatus,
};
use crate::io::config::{DEFAULT_CONFIG_PATH, RuntimeConfig, write_config};
use crate::io::consent_store::{ConsentStore, JsonConsentStore, MemoryConsentStore};
use crate::io::process::Launcher;
use crate::io::todo_store::TodoStore;

/// Temporary workspace root with the runtime's on-disk layout.
pub struct TestWorkspace {
    dir: tempfile::TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.root().join(DEFAULT_CONFIG_PATH)
    }

    pub fn write_config(&self, cfg: &RuntimeConfig) -> Result<PathBuf> {
        let path = self.config_path();
        write_config(&path, cfg)?;
        Ok(path)
    }

    /// Write raw TOML, bypassing validation.
    pub fn write_raw_config(&self, contents: &str) -> Result<PathBuf> {
        let path = self.config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn consent_store(&self) -> JsonConsentStore {
        JsonConsentStore::at_root(self.root())
    }

    pub fn todo_store(&self) -> TodoStore {
        TodoStore::at_root(self.root())
    }
}

/// Alternating user/assistant history, starting with the user.
pub fn conversation(texts: &[&str]) -> Vec<Message> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            if i % 2 == 0 {
                Message::user(*text)
            } else {
                Message::assistant(*text)
            }
        })
        .collect()
}

/// Todo with medium priority.
pub fn todo(content: &str, status: TodoStatus) -> TodoItem {
    TodoItem {
        content: content.to_string(),
        status,
        priority: TodoPriority::Medium,
    }
}

/// Launcher that replays scripted attempt outcomes in order.
///
/// Once the script runs out every launch fails with a retryable error.
pub struct ScriptedLauncher {
    script: Mutex<VecDeque<Result<(), StartupError>>>,
    calls: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn new(script: impl IntoIterator<Item = Result<(), StartupError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Launch attempts made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Launcher for ScriptedLauncher {
    type Handle = ();

    fn launch(&self, _binary: &ResolvedBinary) -> Result<(), StartupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(StartupError::new(
                    StartupErrorCode::ProcessTerminated,
                    "launch script exhausted",
                ))
            })
    }
}

/// Store whose reads or writes can be made to fail.
#[derive(Default)]
pub struct FlakyConsentStore {
    pub inner: MemoryConsentStore,
    pub fail_get: bool,
    pub fail_upsert: bool,
    upserts: AtomicUsize,
}

impl FlakyConsentStore {
    pub fn failing_get() -> Self {
        Self {
            fail_get: true,
            ..Default::default()
        }
    }

    pub fn failing_upsert() -> Self {
        Self {
            fail_upsert: true,
            ..Default::default()
        }
    }

    /// Upsert calls, including failed ones.
    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

impl ConsentStore for FlakyConsentStore {
    fn get(&self, tool_name: &str) -> Result<Option<ConsentRecord>> {
        if self.fail_get {
            return Err(anyhow!("consent store unavailable"));
        }
        self.inner.get(tool_name)
    }

    fn upsert(&self, tool_name: &str, consent: ConsentDecision) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_upsert {
            return Err(anyhow!("consent store is read-only"));
        }
        self.inner.upsert(tool_name, consent)
    }

    fn remove(&self, tool_name: &str) -> Result<bool> {
        self.inner.remove(tool_name)
    }

    fn list(&self) -> Result<Vec<ConsentRecord>> {
        self.inner.list()
    }
}
