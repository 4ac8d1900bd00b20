//! Bounded most-recent-first history of finished generations.
//!
//! The whole history is stored as one JSON document. When the backend
//! rejects it for size, the oldest entries are dropped until it fits.

use crate::{
    error::{GenerationError, Result},
    models::{GenerationKind, GenerationOutput, GenerationState, Snapshot},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

pub const DEFAULT_CAPACITY: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub topic: String,
    pub kind: GenerationKind,
    pub output: GenerationOutput,
}

impl HistoryEntry {
    /// Only completed generations with content are worth keeping.
    pub fn from_snapshot(topic: impl Into<String>, snapshot: &Snapshot) -> Option<Self> {
        if snapshot.state != GenerationState::Completed
            || snapshot.output == GenerationOutput::Pending
        {
            return None;
        }
        Some(Self {
            id: snapshot.generation_id,
            created_at: snapshot.timestamp,
            topic: topic.into(),
            kind: snapshot.kind,
            output: snapshot.output.clone(),
        })
    }
}

#[async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Stored document, `None` if nothing was saved yet.
    async fn load(&self) -> Result<Option<String>>;

    /// Replaces the stored document. Fails with
    /// [`GenerationError::StorageQuota`] when it does not fit.
    async fn store(&self, payload: &str) -> Result<()>;
}

fn check_quota(quota: Option<usize>, payload: &str) -> Result<()> {
    match quota {
        Some(limit) if payload.len() > limit => Err(GenerationError::StorageQuota(format!(
            "{} bytes exceeds {} byte limit",
            payload.len(),
            limit
        ))),
        _ => Ok(()),
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: Mutex<Option<String>>,
    quota_bytes: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    pub fn raw(&self) -> Option<String> {
        self.data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl HistoryBackend for MemoryBackend {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.raw())
    }

    async fn store(&self, payload: &str) -> Result<()> {
        check_quota(self.quota_bytes, payload)?;
        *self
            .data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(payload.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    quota_bytes: Option<usize>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            quota_bytes: None,
        }
    }

    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }
}

#[async_trait]
impl HistoryBackend for FileBackend {
    async fn load(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GenerationError::Storage(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn store(&self, payload: &str) -> Result<()> {
        check_quota(self.quota_bytes, payload)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GenerationError::Storage(e.to_string()))?;
        }
        tokio::fs::write(&self.path, payload)
            .await
            .map_err(|e| GenerationError::Storage(format!("{}: {}", self.path.display(), e)))
    }
}

pub struct History<B: HistoryBackend> {
    backend: B,
    entries: Vec<HistoryEntry>,
    capacity: usize,
}

impl<B: HistoryBackend> History<B> {
    /// Loads existing entries. An unreadable document is logged and
    /// replaced on the next save rather than failing startup.
    pub async fn open(backend: B, capacity: usize) -> Result<Self> {
        let capacity = capacity.max(1);
        let mut entries = match backend.load().await? {
            Some(raw) => serde_json::from_str::<Vec<HistoryEntry>>(&raw).unwrap_or_else(|e| {
                log::warn!("Discarding unreadable history: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        entries.truncate(capacity);
        Ok(Self {
            backend,
            entries,
            capacity,
        })
    }

    /// Newest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn get(&self, id: Uuid) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Inserts at the front, replacing any entry with the same id.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.retain(|e| e.id != entry.id);
        self.entries.insert(0, entry);
        self.entries.truncate(self.capacity);
    }

    /// Writes all entries, dropping the oldest while the backend reports a
    /// quota error. Returns how many entries were saved.
    pub async fn persist(&mut self) -> Result<usize> {
        loop {
            let payload = serde_json::to_string(&self.entries)?;
            match self.backend.store(&payload).await {
                Ok(()) => return Ok(self.entries.len()),
                Err(GenerationError::StorageQuota(reason)) if !self.entries.is_empty() => {
                    let dropped = self.entries.pop();
                    log::warn!(
                        "History over storage quota ({}), dropped {:?}",
                        reason,
                        dropped.map(|e| e.id)
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn add(&mut self, entry: HistoryEntry) -> Result<usize> {
        self.push(entry);
        self.persist().await
    }

    pub async fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.persist().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::testing::PNG_BASE64;
    use crate::models::MemeResult;

    fn meme_entry(topic: &str) -> HistoryEntry {
        HistoryEntry {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            topic: topic.to_string(),
            kind: GenerationKind::Single,
            output: GenerationOutput::Meme(MemeResult {
                visual_prompt: "A developer resolving a merge conflict".into(),
                top_text: "<<<<<<< HEAD".into(),
                bottom_text: ">>>>>>> main".into(),
                image_url: Some(format!("data:image/png;base64,{}", PNG_BASE64)),
            }),
        }
    }

    #[tokio::test]
    async fn test_meme_round_trip_is_identical() {
        let entry = meme_entry("merge conflict");
        let mut history = History::open(MemoryBackend::new(), 5).await.unwrap();
        history.add(entry.clone()).await.unwrap();

        let raw = history.backend().raw().unwrap();
        let copy = MemoryBackend::new();
        copy.store(&raw).await.unwrap();
        let reloaded = History::open(copy, 5).await.unwrap();

        assert_eq!(reloaded.entries(), &[entry.clone()]);
        let (GenerationOutput::Meme(before), GenerationOutput::Meme(after)) =
            (&entry.output, &reloaded.entries()[0].output)
        else {
            panic!("expected memes");
        };
        assert_eq!(
            serde_json::to_vec(before).unwrap(),
            serde_json::to_vec(after).unwrap()
        );
    }

    #[tokio::test]
    async fn test_capacity_keeps_newest() {
        let mut history = History::open(MemoryBackend::new(), 3).await.unwrap();
        for i in 0..5 {
            history.push(meme_entry(&format!("topic {}", i)));
        }
        let topics: Vec<_> = history.entries().iter().map(|e| e.topic.as_str()).collect();
        assert_eq!(topics, vec!["topic 4", "topic 3", "topic 2"]);
    }

    #[tokio::test]
    async fn test_same_id_replaces_entry() {
        let mut history = History::open(MemoryBackend::new(), 5).await.unwrap();
        let mut entry = meme_entry("first");
        history.push(entry.clone());
        history.push(meme_entry("other"));
        entry.topic = "edited".into();
        history.push(entry.clone());

        assert_eq!(history.entries().len(), 2);
        assert_eq!(history.entries()[0].topic, "edited");
        assert_eq!(history.get(entry.id).unwrap().topic, "edited");
    }

    #[tokio::test]
    async fn test_quota_failure_trims_oldest() {
        // Timestamps vary by a few bytes, so leave slack for two entries.
        let one = serde_json::to_string(&vec![meme_entry("topic 0")]).unwrap().len();
        let backend = MemoryBackend::new().with_quota(one * 2 + 20);
        let mut history = History::open(backend, 10).await.unwrap();
        for i in 0..4 {
            history.push(meme_entry(&format!("topic {}", i)));
        }

        let saved = history.persist().await.unwrap();
        assert_eq!(saved, 2);
        assert_eq!(history.entries()[0].topic, "topic 3");
        assert_eq!(history.entries()[1].topic, "topic 2");
    }

    #[tokio::test]
    async fn test_corrupt_history_starts_empty() {
        let backend = MemoryBackend::new();
        backend.store("{not json").await.unwrap();
        let history = History::open(backend, 5).await.unwrap();
        assert!(history.entries().is_empty());
    }

    #[tokio::test]
    async fn test_file_backend_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");
        let entry = meme_entry("file");

        let mut history = History::open(FileBackend::new(&path), 5).await.unwrap();
        history.add(entry.clone()).await.unwrap();

        let reopened = History::open(FileBackend::new(&path), 5).await.unwrap();
        assert_eq!(reopened.entries(), &[entry]);
    }

    #[test]
    fn test_only_completed_snapshots_are_recorded() {
        let entry = meme_entry("snap");
        let mut snapshot = Snapshot {
            generation_id: entry.id,
            sequence: 3,
            timestamp: entry.created_at,
            kind: GenerationKind::Single,
            state: GenerationState::Aborted,
            progress: None,
            output: entry.output.clone(),
            message: None,
        };
        assert!(HistoryEntry::from_snapshot("snap", &snapshot).is_none());

        snapshot.state = GenerationState::Completed;
        assert_eq!(HistoryEntry::from_snapshot("snap", &snapshot), Some(entry));
    }
}
