//! Session-state store
//!
//! Persists the metadata needed to bring every registered agent session
//! back after a process restart. The snapshot is a single JSON document at
//! `~/.crewly/session-state.json`; every mutation triggers a best-effort
//! asynchronous auto-save, and `save_state` offers a synchronous, error-
//! propagating write for shutdown.
//!
//! Restoring is two-phase by design: this layer recreates *processes* from
//! the stored shell command verbatim and marks them "restored"; the runtime
//! adapter layer later decides whether to resume the CLI conversation. The
//! resume flag therefore never appears in the persisted command.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use term_session::{SessionBackend, SessionSpec};

use crate::config::SESSION_STATE_VERSION;
use crate::runtime::RuntimeType;

/// Durable snapshot of one registered session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSessionInfo {
    pub name: String,
    pub cwd: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    pub runtime_type: RuntimeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_id: Option<String>,
    /// Opaque handle the runtime uses to resume its own conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_session_id: Option<String>,
}

impl PersistedSessionInfo {
    /// The spec to hand back to the backend on restore, verbatim
    pub fn session_spec(&self) -> SessionSpec {
        SessionSpec {
            cwd: self.cwd.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone().unwrap_or_default(),
        }
    }
}

/// On-disk document, version 1
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionStateFile {
    version: u32,
    saved_at: DateTime<Utc>,
    sessions: Vec<PersistedSessionInfo>,
}

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<String, PersistedSessionInfo>,
    restored: HashSet<String>,
}

/// Registry of session metadata with restart persistence
pub struct SessionStateStore {
    path: PathBuf,
    inner: Arc<RwLock<StoreInner>>,
}

impl SessionStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: Arc::new(RwLock::new(StoreInner::default())),
        }
    }

    /// Add or overwrite metadata for a session. Re-registering replaces the
    /// previous entry wholesale.
    pub fn register_session(
        &self,
        name: &str,
        spec: &SessionSpec,
        runtime_type: RuntimeType,
        role: Option<String>,
        team_id: Option<String>,
        member_id: Option<String>,
    ) {
        let info = PersistedSessionInfo {
            name: name.to_string(),
            cwd: spec.cwd.clone(),
            command: spec.command.clone(),
            args: spec.args.clone(),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            runtime_type,
            role,
            team_id,
            member_id,
            runtime_session_id: None,
        };
        self.inner
            .write()
            .unwrap()
            .sessions
            .insert(name.to_string(), info);
        self.auto_save();
    }

    /// Remove a session's metadata
    pub fn unregister_session(&self, name: &str) {
        {
            let mut inner = self.inner.write().unwrap();
            inner.sessions.remove(name);
            inner.restored.remove(name);
        }
        self.auto_save();
    }

    /// Record the adapter-supplied resume handle
    pub fn update_session_id(&self, name: &str, runtime_session_id: &str) {
        {
            let mut inner = self.inner.write().unwrap();
            match inner.sessions.get_mut(name) {
                Some(info) => info.runtime_session_id = Some(runtime_session_id.to_string()),
                None => {
                    tracing::warn!(session = name, "update_session_id for unregistered session");
                    return;
                }
            }
        }
        self.auto_save();
    }

    /// Metadata for one session
    pub fn get(&self, name: &str) -> Option<PersistedSessionInfo> {
        self.inner.read().unwrap().sessions.get(name).cloned()
    }

    /// The stored resume handle, if any
    pub fn runtime_session_id(&self, name: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .sessions
            .get(name)
            .and_then(|info| info.runtime_session_id.clone())
    }

    /// Whether the session was recreated from a persisted snapshot
    pub fn is_restored(&self, name: &str) -> bool {
        self.inner.read().unwrap().restored.contains(name)
    }

    /// Write all registered metadata, whether or not the processes are
    /// still live; shutdown runs after the sessions are gone and must still
    /// record the intent to resume.
    pub fn save_state(&self) -> Result<()> {
        let document = self.snapshot();
        write_document(&self.path, &document)
            .with_context(|| format!("Failed to save session state to '{}'", self.path.display()))
    }

    /// Recreate every persisted session through the backend. Each entry's
    /// stored command and args are passed as-is; successfully recreated
    /// entries are marked restored. Returns the number recreated.
    pub async fn restore_state(&self, backend: &dyn SessionBackend) -> Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read '{}'", self.path.display()))?;

        let value: serde_json::Value =
            serde_json::from_str(&raw).context("Failed to parse session state")?;
        let version = value.get("version").and_then(|v| v.as_u64()).unwrap_or(0);
        if version != SESSION_STATE_VERSION as u64 {
            tracing::warn!(
                version,
                expected = SESSION_STATE_VERSION,
                "unknown session-state version, skipping restore"
            );
            return Ok(0);
        }

        let document: SessionStateFile =
            serde_json::from_value(value).context("Failed to decode session state")?;

        let mut restored = 0;
        for info in document.sessions {
            let spec = info.session_spec();
            match backend.create_session(&info.name, &spec).await {
                Ok(()) => {
                    let mut inner = self.inner.write().unwrap();
                    inner.restored.insert(info.name.clone());
                    inner.sessions.insert(info.name.clone(), info);
                    restored += 1;
                }
                Err(e) => {
                    tracing::warn!(session = %info.name, error = %e, "failed to restore session");
                }
            }
        }
        tracing::info!(restored, "session state restored");
        Ok(restored)
    }

    /// Delete the persisted snapshot file
    pub fn clear_state(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove '{}'", self.path.display()))?;
        }
        Ok(())
    }

    /// Forget all in-memory metadata, including the restored set
    pub fn clear_metadata(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.sessions.clear();
        inner.restored.clear();
    }

    /// Both of the above
    pub fn clear_state_and_metadata(&self) -> Result<()> {
        self.clear_metadata();
        self.clear_state()
    }

    /// Names of all registered sessions
    pub fn registered_sessions(&self) -> Vec<String> {
        self.inner.read().unwrap().sessions.keys().cloned().collect()
    }

    fn snapshot(&self) -> SessionStateFile {
        snapshot_of(&self.inner)
    }

    /// Fire-and-forget save. Failures are logged, never surfaced; callers
    /// that need durability use `save_state`. The snapshot is taken when
    /// the write actually runs, so a late write can never resurrect state
    /// an intervening mutation removed.
    fn auto_save(&self) {
        let inner = Arc::clone(&self.inner);
        let path = self.path.clone();
        let write = move || {
            let document = snapshot_of(&inner);
            if let Err(e) = write_document(&path, &document) {
                tracing::warn!(error = %e, "session-state auto-save failed");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { write() });
            }
            Err(_) => write(),
        }
    }
}

fn snapshot_of(inner: &RwLock<StoreInner>) -> SessionStateFile {
    let inner = inner.read().unwrap();
    let mut sessions: Vec<PersistedSessionInfo> = inner.sessions.values().cloned().collect();
    sessions.sort_by(|a, b| a.name.cmp(&b.name));
    SessionStateFile {
        version: SESSION_STATE_VERSION,
        saved_at: Utc::now(),
        sessions,
    }
}

/// Write the document to a temp file in the target directory, then rename.
/// The temp file shares the target filesystem, so the rename is atomic.
fn write_document(path: &Path, document: &SessionStateFile) -> Result<()> {
    let parent = path.parent().context("state path has no parent")?;
    std::fs::create_dir_all(parent)?;
    let json = serde_json::to_string_pretty(document)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(json.as_bytes())?;
    tmp.persist(path)
        .map_err(|e| anyhow::anyhow!("rename failed: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use term_session::InMemoryBackend;

    fn spec_for(cwd: &str) -> SessionSpec {
        SessionSpec {
            cwd: cwd.to_string(),
            command: "bash".to_string(),
            args: vec!["-l".to_string()],
            env: HashMap::new(),
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> SessionStateStore {
        SessionStateStore::new(dir.path().join("session-state.json"))
    }

    #[tokio::test]
    async fn test_save_and_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.register_session(
            "agentmux-orc",
            &spec_for("/work/a"),
            RuntimeType::ClaudeCode,
            Some("orchestrator".to_string()),
            None,
            None,
        );
        store.register_session(
            "dev-1",
            &spec_for("/work/b"),
            RuntimeType::ClaudeCode,
            Some("developer".to_string()),
            Some("team-1".to_string()),
            Some("member-1".to_string()),
        );
        store.save_state().unwrap();

        // Fresh store, fresh backend: simulated restart
        let store2 = store_in(&dir);
        let backend = InMemoryBackend::new();
        let restored = store2.restore_state(&backend).await.unwrap();

        assert_eq!(restored, 2);
        assert!(backend.has_session("agentmux-orc").await);
        assert!(backend.has_session("dev-1").await);
        assert!(store2.is_restored("agentmux-orc"));
        assert!(store2.is_restored("dev-1"));

        // Commands came back verbatim
        let spec = backend.session_spec("dev-1").unwrap();
        assert_eq!(spec.command, "bash");
        assert_eq!(spec.args, vec!["-l"]);
    }

    #[tokio::test]
    async fn test_unknown_version_restores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session-state.json");
        std::fs::write(
            &path,
            r#"{"version": 99, "savedAt": "2026-01-01T00:00:00Z", "sessions": []}"#,
        )
        .unwrap();

        let store = SessionStateStore::new(&path);
        let backend = InMemoryBackend::new();
        assert_eq!(store.restore_state(&backend).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_restores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let backend = InMemoryBackend::new();
        assert_eq!(store.restore_state(&backend).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_latest_registration_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.register_session(
            "dev-1",
            &spec_for("/old"),
            RuntimeType::Shell,
            Some("old-role".to_string()),
            None,
            None,
        );
        store.unregister_session("dev-1");
        store.register_session(
            "dev-1",
            &spec_for("/new"),
            RuntimeType::ClaudeCode,
            Some("new-role".to_string()),
            None,
            None,
        );
        store.save_state().unwrap();

        let raw = std::fs::read_to_string(dir.path().join("session-state.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let sessions = doc["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["cwd"], "/new");
        assert_eq!(sessions[0]["role"], "new-role");
        assert_eq!(sessions[0]["runtimeType"], "claude-code");
    }

    #[tokio::test]
    async fn test_runtime_session_id_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.register_session(
            "dev-1",
            &spec_for("/work"),
            RuntimeType::ClaudeCode,
            None,
            None,
            None,
        );
        store.update_session_id("dev-1", "2c4e029f-3411-442a-b24c-33001c78cd14");
        store.save_state().unwrap();

        let store2 = store_in(&dir);
        let backend = InMemoryBackend::new();
        store2.restore_state(&backend).await.unwrap();
        assert_eq!(
            store2.runtime_session_id("dev-1").as_deref(),
            Some("2c4e029f-3411-442a-b24c-33001c78cd14")
        );
    }

    #[tokio::test]
    async fn test_clear_state_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.register_session(
            "dev-1",
            &spec_for("/work"),
            RuntimeType::Shell,
            None,
            None,
            None,
        );
        store.save_state().unwrap();

        store.clear_state_and_metadata().unwrap();
        assert!(store.registered_sessions().is_empty());
        assert!(!dir.path().join("session-state.json").exists());
    }

    #[tokio::test]
    async fn test_schema_shape_is_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.register_session(
            "dev-1",
            &spec_for("/work"),
            RuntimeType::GeminiCli,
            None,
            Some("t".to_string()),
            Some("m".to_string()),
        );
        store.save_state().unwrap();

        let raw = std::fs::read_to_string(dir.path().join("session-state.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["version"], 1);
        assert!(doc["savedAt"].is_string());
        let entry = &doc["sessions"][0];
        assert_eq!(entry["runtimeType"], "gemini-cli");
        assert_eq!(entry["teamId"], "t");
        assert_eq!(entry["memberId"], "m");
    }
}
