//! The host document store: the narrow file interface this crate consumes.

use crate::core::{DayStateError, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Path-addressed text storage provided by the host application.
///
/// Paths are `/`-separated and relative to the store's root.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;

    async fn read(&self, path: &str) -> Result<String>;

    /// Creates the file or overwrites its content.
    async fn write(&self, path: &str, content: &str) -> Result<()>;

    async fn ensure_folder(&self, path: &str) -> Result<()>;

    /// Paths of the files directly inside `folder`. A missing folder lists as empty.
    async fn list(&self, folder: &str) -> Result<Vec<String>>;
}

/// A [`DocumentStore`] over a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(DayStateError::Io(format!(
                "Path '{}' must be relative to the store root",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        fs::try_exists(&full).await.map_err(|err| {
            DayStateError::Io(format!("Failed to stat '{}': {}", full.display(), err))
        })
    }

    async fn read(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        fs::read_to_string(&full).await.map_err(|err| {
            DayStateError::Io(format!("Failed to read '{}': {}", full.display(), err))
        })
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(path)?;
        atomic_write(&full, content.as_bytes()).await
    }

    async fn ensure_folder(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full).await.map_err(|err| {
            DayStateError::Io(format!(
                "Failed to create folder '{}': {}",
                full.display(),
                err
            ))
        })
    }

    async fn list(&self, folder: &str) -> Result<Vec<String>> {
        let full = self.resolve(folder)?;
        let mut entries = match fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(DayStateError::Io(format!(
                    "Failed to list '{}': {}",
                    full.display(),
                    err
                )));
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|err| {
            DayStateError::Io(format!("Failed to list '{}': {}", full.display(), err))
        })? {
            let is_file = entry
                .file_type()
                .await
                .map(|kind| kind.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let trimmed = folder.trim_end_matches('/');
            files.push(if trimmed.is_empty() {
                name
            } else {
                format!("{}/{}", trimmed, name)
            });
        }
        files.sort();
        Ok(files)
    }
}

/// Writes through a uniquely named sibling temp file that is then renamed over `path`.
///
/// Readers never see a torn file, and concurrent writers never share a temp file.
pub(crate) async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).await.map_err(|err| {
        DayStateError::Io(format!("Cannot create '{}': {}", parent.display(), err))
    })?;

    let target = path.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || persist_via_temp(&parent, &target, &bytes))
        .await
        .map_err(|err| DayStateError::Worker(format!("write task failed: {}", err)))?
}

fn persist_via_temp(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let mut staged = tempfile::Builder::new()
        .prefix(".daystate-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|err| DayStateError::Io(format!("No temp file in '{}': {}", dir.display(), err)))?;
    staged
        .write_all(bytes)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|err| {
            DayStateError::Io(format!("Staging '{}' failed: {}", target.display(), err))
        })?;
    staged.persist(target).map_err(|err| {
        DayStateError::Io(format!("Replacing '{}' failed: {}", target.display(), err.error))
    })?;
    Ok(())
}
