//! Persistence for "always allow" tool consent decisions.
//!
//! Records are keyed by tool name only, so one decision trusts a tool across
//! every chat. Writes are upserts: at most one record exists per tool.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{ConsentDecision, ConsentRecord};

/// Durable key-value store for consent records.
pub trait ConsentStore: Send + Sync {
    fn get(&self, tool_name: &str) -> Result<Option<ConsentRecord>>;

    /// Insert or replace the record for `tool_name` (last write wins).
    fn upsert(&self, tool_name: &str, consent: ConsentDecision) -> Result<()>;

    /// Remove the record for `tool_name`. Returns whether one existed.
    fn remove(&self, tool_name: &str) -> Result<bool>;

    /// All records ordered by tool name.
    fn list(&self) -> Result<Vec<ConsentRecord>>;
}

/// On-disk layout: `{"tools": {"<tool>": "accept-always"}}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConsentFile {
    tools: BTreeMap<String, ConsentDecision>,
}

/// JSON-file backed store (`.anyon/state/tool_consents.json`).
///
/// The mutex serializes read-modify-write cycles so concurrent chats upserting
/// the same tool never lose an update.
pub struct JsonConsentStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonConsentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Default location under a workspace root.
    pub fn at_root(root: &Path) -> Self {
        Self::new(root.join(".anyon").join("state").join("tool_consents.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| anyhow!("consent store lock poisoned"))
    }

    fn read(&self) -> Result<ConsentFile> {
        if !self.path.exists() {
            return Ok(ConsentFile::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read consent store {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parse consent store {}", self.path.display()))
    }

    fn write(&self, file: &ConsentFile) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(file)?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}

impl ConsentStore for JsonConsentStore {
    fn get(&self, tool_name: &str) -> Result<Option<ConsentRecord>> {
        let _guard = self.guard()?;
        let file = self.read()?;
        Ok(file.tools.get(tool_name).map(|consent| ConsentRecord {
            tool_name: tool_name.to_string(),
            consent: *consent,
        }))
    }

    fn upsert(&self, tool_name: &str, consent: ConsentDecision) -> Result<()> {
        let _guard = self.guard()?;
        let mut file = self.read()?;
        file.tools.insert(tool_name.to_string(), consent);
        debug!(tool = tool_name, ?consent, "upserting consent record");
        self.write(&file)
    }

    fn remove(&self, tool_name: &str) -> Result<bool> {
        let _guard = self.guard()?;
        let mut file = self.read()?;
        let existed = file.tools.remove(tool_name).is_some();
        if existed {
            self.write(&file)?;
        }
        Ok(existed)
    }

    fn list(&self) -> Result<Vec<ConsentRecord>> {
        let _guard = self.guard()?;
        let file = self.read()?;
        Ok(file
            .tools
            .into_iter()
            .map(|(tool_name, consent)| ConsentRecord { tool_name, consent })
            .collect())
    }
}

/// In-memory store for embedding and tests.
#[derive(Default)]
pub struct MemoryConsentStore {
    records: Mutex<BTreeMap<String, ConsentDecision>>,
}

impl MemoryConsentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<MutexGuard<'_, BTreeMap<String, ConsentDecision>>> {
        self.records
            .lock()
            .map_err(|_| anyhow!("consent store lock poisoned"))
    }
}

impl ConsentStore for MemoryConsentStore {
    fn get(&self, tool_name: &str) -> Result<Option<ConsentRecord>> {
        Ok(self.records()?.get(tool_name).map(|consent| ConsentRecord {
            tool_name: tool_name.to_string(),
            consent: *consent,
        }))
    }

    fn upsert(&self, tool_name: &str, consent: ConsentDecision) -> Result<()> {
        self.records()?.insert(tool_name.to_string(), consent);
        Ok(())
    }

    fn remove(&self, tool_name: &str) -> Result<bool> {
        Ok(self.records()?.remove(tool_name).is_some())
    }

    fn list(&self) -> Result<Vec<ConsentRecord>> {
        Ok(self
            .records()?
            .iter()
            .map(|(tool_name, consent)| ConsentRecord {
                tool_name: tool_name.clone(),
                consent: *consent,
            })
            .collect())
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("consent store path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp consent store {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace consent store {}", path.display()))?;
    Ok(())
}
