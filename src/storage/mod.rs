use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Join blob-store key segments with forward slashes, skipping empty parts.
pub fn path_join(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Durable hierarchical object store with directory semantics.
///
/// Keys are forward-slash separated, relative to the store root. Expected
/// absence (a key that does not exist yet) is an explicit boolean check, not
/// an error path. Listing a missing directory yields an empty list.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, path: &str) -> bool;
    async fn list_dirs(&self, path: &str) -> Result<Vec<String>>;
    async fn list_files(&self, path: &str) -> Result<Vec<String>>;
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;
    async fn mkdir_recursive(&self, path: &str) -> Result<()>;
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Blob store backed by a local filesystem root.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn exists(&self, path: &str) -> bool {
        tokio::fs::metadata(self.resolve(path)).await.is_ok()
    }

    async fn list_dirs(&self, path: &str) -> Result<Vec<String>> {
        list_entries(self.resolve(path), true).await
    }

    async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        list_entries(self.resolve(path), false).await
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let resolved = self.resolve(path);
        tokio::fs::read(&resolved)
            .await
            .with_context(|| format!("reading {}", resolved.display()))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let resolved = self.resolve(path);
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(&resolved, bytes)
            .await
            .with_context(|| format!("writing {}", resolved.display()))?;
        debug!("Wrote {} bytes to {}", bytes.len(), path);
        Ok(())
    }

    async fn mkdir_recursive(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path);
        tokio::fs::create_dir_all(&resolved)
            .await
            .with_context(|| format!("creating {}", resolved.display()))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path);
        tokio::fs::remove_file(&resolved)
            .await
            .with_context(|| format!("removing {}", resolved.display()))
    }
}

async fn list_entries(dir: PathBuf, want_dirs: bool) -> Result<Vec<String>> {
    let mut reader = match tokio::fs::read_dir(&dir).await {
        Ok(reader) => reader,
        // Missing directory lists as empty rather than erroring.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
    };

    let mut names = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .with_context(|| format!("listing {}", dir.display()))?
    {
        let file_type = entry
            .file_type()
            .await
            .with_context(|| format!("inspecting {}", entry.path().display()))?;
        if file_type.is_dir() == want_dirs {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
