//! Append-only improvement history (spec §3, §4.10, §6).
//!
//! One JSONL file under a user-scoped directory, one compact JSON object per
//! line, newest entries last on disk. Writes are serialized by a
//! process-level lock and land via [`crate::persistence::write_atomic`] on
//! compaction, matching spec §5's "concurrent writes to the same file are
//! serialized by a process-level mutex" rule. Reads tolerate a missing file
//! (treated as an empty history, not an error) and skip malformed lines with
//! a warning rather than failing the whole read.

use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use crate::{model::HistoryEntry, prelude::*};

/// Once the file holds more than this many entries, the next save compacts
/// it down to the most recent [`DEFAULT_MAX_ENTRIES`] rows.
const DEFAULT_MAX_ENTRIES: usize = 20;

pub struct HistoryStore {
    path: PathBuf,
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            max_entries: DEFAULT_MAX_ENTRIES,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// The default per-user history file: `~/.config/prompt-improve/history.jsonl`,
    /// the same `BaseDirs`-rooted layout [`crate::wizard::SessionManager`] uses
    /// for sessions.
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new()
            .map(|d| d.home_dir().join(".config").join("prompt-improve").join("history.jsonl"))
    }

    /// Append `entry`, then compact the file to `max_entries` most-recent
    /// rows if it has grown past that bound.
    pub async fn save(&self, entry: HistoryEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory {:?}", parent))?;
        }

        let line = serde_json::to_string(&entry).context("failed to serialize history entry")?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open history file {:?}", self.path))?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        drop(file);

        self.compact_if_needed().await
    }

    async fn compact_if_needed(&self) -> Result<()> {
        let entries = self.read_all_unlocked().await?;
        if entries.len() <= self.max_entries {
            return Ok(());
        }

        let keep_from = entries.len() - self.max_entries;
        let mut buf = String::new();
        for entry in &entries[keep_from..] {
            buf.push_str(&serde_json::to_string(entry).context("failed to serialize history entry")?);
            buf.push('\n');
        }
        crate::persistence::write_atomic(&self.path, &buf).await
    }

    /// The `limit` most recent entries, newest first.
    pub async fn list(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut entries = self.read_all().await?;
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<HistoryEntry>> {
        let entries = self.read_all().await?;
        Ok(entries.into_iter().find(|e| e.id == id))
    }

    /// Delete the entire history file. Not an error if it didn't exist.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error).with_context(|| format!("failed to remove history file {:?}", self.path)),
        }
    }

    async fn read_all(&self) -> Result<Vec<HistoryEntry>> {
        let _guard = self.write_lock.lock().await;
        self.read_all_unlocked().await
    }

    async fn read_all_unlocked(&self) -> Result<Vec<HistoryEntry>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(error).with_context(|| format!("failed to read history file {:?}", self.path));
            }
        };

        let mut entries = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(error) => {
                    warn!(line = line_no + 1, %error, path = ?self.path, "skipping malformed history line");
                }
            }
        }
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EngineTag, Preset};

    fn entry(id: &str, prompt: &str) -> HistoryEntry {
        HistoryEntry {
            id: id.to_owned(),
            timestamp: chrono::Utc::now(),
            prompt: prompt.to_owned(),
            confidence: Some(0.8),
            questions: vec![],
            assumptions: vec![],
            source: EngineTag::Ollama,
            input_length: prompt.len(),
            preset: Preset::Default,
        }
    }

    #[tokio::test]
    async fn test_list_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.jsonl"));
        let entries = store.list(10).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_list_round_trips_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.jsonl"));
        store.save(entry("a", "first")).await.unwrap();
        store.save(entry("b", "second")).await.unwrap();

        let entries = store.list(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "b");
        assert_eq!(entries[1].id, "a");
    }

    #[tokio::test]
    async fn test_get_by_id_finds_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.jsonl"));
        store.save(entry("a", "first")).await.unwrap();

        let found = store.get_by_id("a").await.unwrap();
        assert_eq!(found.unwrap().prompt, "first");
        assert!(store.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_removes_file_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.jsonl"));
        store.save(entry("a", "first")).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.list(10).await.unwrap().is_empty());
        // Clearing an already-empty history is not an error.
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_compacts_past_max_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.jsonl")).with_max_entries(3);
        for i in 0..5 {
            store.save(entry(&format!("id{i}"), "p")).await.unwrap();
        }
        let entries = store.list(10).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].id, "id4");
        assert_eq!(entries[2].id, "id2");
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let store = HistoryStore::new(path.clone());
        store.save(entry("a", "first")).await.unwrap();

        let mut text = fs::read_to_string(&path).await.unwrap();
        text.push_str("not valid json\n");
        fs::write(&path, text).await.unwrap();

        let entries = store.list(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "a");
    }
}
