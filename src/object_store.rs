//! Key-addressed object storage
//!
//! Keys are `/`-separated strings. [`LocalObjectStore`] maps them onto a
//! directory tree and [`MemoryObjectStore`] keeps them in a map for tests.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use walkdir::WalkDir;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `path` under `key`, replacing any existing object.
    async fn put_file(&self, key: &str, path: &Path) -> Result<()>;

    /// Download the object at `key` into `dest`, creating parent directories.
    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<()>;

    /// All keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        bail!("object key must not be empty");
    }
    let escapes = Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes || key.starts_with('/') {
        bail!("invalid object key {key:?}");
    }
    Ok(())
}

/// Filesystem-backed store rooted at a directory
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let target = self.object_path(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::copy(path, &target)
            .await
            .with_context(|| format!("failed to upload {} to {key}", path.display()))?;
        Ok(())
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<()> {
        let source = self.object_path(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::copy(&source, dest)
            .await
            .with_context(|| format!("failed to download {key}"))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || {
            if !root.exists() {
                return Ok(Vec::new());
            }
            let mut keys = Vec::new();
            for entry in WalkDir::new(&root).follow_links(true) {
                let entry = entry.context("failed to walk object store")?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry.path().strip_prefix(&root)?;
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(&prefix) {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .context("object store listing task panicked")?
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.lock().insert(key.into(), data.into());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A poisoned map is still a valid map.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        check_key(key)?;
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        self.insert(key, data);
        Ok(())
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<()> {
        let data = self
            .get(key)
            .with_context(|| format!("object {key} not found"))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, data)
            .await
            .with_context(|| format!("failed to write {}", dest.display()))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
