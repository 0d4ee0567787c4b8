//! Conversational wizard (spec §4.9): a multi-turn ambiguity resolver
//! sitting in front of the orchestrator.
//!
//! Sessions are serializable per-id (a keyed mutex map, so concurrent calls
//! for two different sessions never block each other, but two calls for the
//! same session id are strictly ordered) and persisted atomically via
//! [`crate::persistence`].

pub mod runner;
pub mod session;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use tokio::sync::Mutex as AsyncMutex;

use crate::prelude::*;

pub use session::{SessionRecord, WizardDecisionInputs};

pub type SessionHandle = Arc<AsyncMutex<SessionRecord>>;

/// Owns every in-memory session, keyed by session id, and persists each to
/// disk under `base_dir`.
pub struct SessionManager {
    base_dir: PathBuf,
    sessions: StdMutex<HashMap<String, SessionHandle>>,
}

impl SessionManager {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    /// The default per-user sessions directory: `~/.config/prompt-improve/sessions/`,
    /// following the same `BaseDirs::home_dir().join(".config").join(...)`
    /// layout the pack's prompt-storage backends use.
    pub fn default_base_dir() -> Option<PathBuf> {
        directories::BaseDirs::new()
            .map(|d| d.home_dir().join(".config").join("prompt-improve").join("sessions"))
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    /// Start a new session and return a handle to it.
    pub async fn create(&self, inputs: WizardDecisionInputs) -> Result<SessionHandle> {
        let record = SessionRecord::new(inputs);
        let handle = Arc::new(AsyncMutex::new(record));
        {
            let mut sessions = self.sessions.lock().expect("session map lock poisoned");
            let id = {
                let record = handle.try_lock().expect("freshly created session can't be locked elsewhere");
                record.id.clone()
            };
            sessions.insert(id, handle.clone());
        }
        self.persist(&handle).await?;
        Ok(handle)
    }

    /// Load an existing session from disk into the in-memory map, or return
    /// the already-loaded handle if present.
    pub async fn get_or_load(&self, id: &str) -> Result<Option<SessionHandle>> {
        if let Some(existing) = self
            .sessions
            .lock()
            .expect("session map lock poisoned")
            .get(id)
            .cloned()
        {
            return Ok(Some(existing));
        }

        let path = self.session_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read session file {:?}", path))?;
        let record: SessionRecord = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse session file {:?}", path))?;
        let handle = Arc::new(AsyncMutex::new(record));
        self.sessions
            .lock()
            .expect("session map lock poisoned")
            .insert(id.to_owned(), handle.clone());
        Ok(Some(handle))
    }

    /// Append a user message to `session` and persist the result.
    pub async fn append_user_message(&self, session: &SessionHandle, text: String) -> Result<()> {
        {
            let mut record = session.lock().await;
            record.append_user_message(text);
        }
        self.persist(session).await
    }

    /// Append an assistant message to `session` and persist the result.
    pub async fn append_assistant_message(
        &self,
        session: &SessionHandle,
        text: String,
        confidence: f64,
        is_ambiguous: bool,
    ) -> Result<()> {
        {
            let mut record = session.lock().await;
            record.append_assistant_message(text, confidence, is_ambiguous);
        }
        self.persist(session).await
    }

    /// Mark `session` resolved and persist the result.
    pub async fn complete(&self, session: &SessionHandle) -> Result<()> {
        {
            let mut record = session.lock().await;
            record.complete();
        }
        self.persist(session).await
    }

    async fn persist(&self, session: &SessionHandle) -> Result<()> {
        let (id, json) = {
            let record = session.lock().await;
            let json = serde_json::to_string_pretty(&*record)
                .context("failed to serialize session record")?;
            (record.id.clone(), json)
        };

        let path = self.session_path(&id);
        if let Err(error) = crate::persistence::write_atomic(&path, &json).await {
            // Per spec §9's Design Notes: never make persistence failure
            // fail the request.
            warn!(%error, session_id = %id, "failed to persist wizard session, continuing in-memory");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::WizardMode,
        model::{Complexity, Intent},
    };

    fn inputs() -> WizardDecisionInputs {
        WizardDecisionInputs {
            mode: WizardMode::Always,
            max_turns: 3,
            confidence: 0.5,
            intent: Intent::Debug,
            complexity: Complexity::Simple,
        }
    }

    #[tokio::test]
    async fn test_create_persists_and_can_be_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path().to_path_buf());
        let handle = manager.create(inputs()).await.unwrap();
        let id = handle.lock().await.id.clone();

        let fresh_manager = SessionManager::new(dir.path().to_path_buf());
        let reloaded = fresh_manager.get_or_load(&id).await.unwrap();
        assert!(reloaded.is_some());
    }

    #[tokio::test]
    async fn test_get_or_load_missing_session_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path().to_path_buf());
        let result = manager.get_or_load("does-not-exist").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_append_messages_round_trip_through_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path().to_path_buf());
        let handle = manager.create(inputs()).await.unwrap();
        manager
            .append_user_message(&handle, "hello".to_owned())
            .await
            .unwrap();
        let record = handle.lock().await;
        assert_eq!(record.messages.len(), 1);
    }
}
