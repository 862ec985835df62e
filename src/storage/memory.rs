use super::document::DocumentStore;
use crate::core::{DayStateError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// In-memory document store.
///
/// Counts writes and can be told to fail them, which makes it the store of choice
/// for exercising flush and retry paths.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    files: RwLock<BTreeMap<String, String>>,
    folders: RwLock<BTreeSet<String>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a file directly, without counting it as a write.
    pub async fn insert_file(&self, path: &str, content: &str) {
        self.files
            .write()
            .await
            .insert(path.to_string(), content.to_string());
    }

    pub async fn contents(&self, path: &str) -> Option<String> {
        self.files.read().await.get(path).cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.files.read().await.contains_key(path))
    }

    async fn read(&self, path: &str) -> Result<String> {
        self.files
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| DayStateError::Io(format!("File '{}' not found", path)))
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DayStateError::Io(format!("Write to '{}' rejected", path)));
        }
        self.files
            .write()
            .await
            .insert(path.to_string(), content.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ensure_folder(&self, path: &str) -> Result<()> {
        self.folders.write().await.insert(path.to_string());
        Ok(())
    }

    async fn list(&self, folder: &str) -> Result<Vec<String>> {
        let prefix = match folder.trim_end_matches('/') {
            "" => String::new(),
            trimmed => format!("{}/", trimmed),
        };
        Ok(self
            .files
            .read()
            .await
            .keys()
            .filter(|path| {
                path.strip_prefix(prefix.as_str())
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .cloned()
            .collect())
    }
}
