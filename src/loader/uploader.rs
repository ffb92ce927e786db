use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;

use crate::metrics;
use crate::object_store::ObjectStore;

/// Object key for a file at `relative` under the tree uploaded to `prefix`
pub fn object_key(prefix: &str, relative: &Path) -> String {
    let mut key = prefix.trim_end_matches('/').to_string();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            key.push('/');
            key.push_str(&part.to_string_lossy());
        }
    }
    key
}

/// Files uploaded so far, shared with the progress reporter
#[derive(Debug, Default)]
pub struct UploadCounter(AtomicUsize);

impl UploadCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    counter: Arc<UploadCounter>,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, counter: Arc<UploadCounter>) -> Self {
        Self { store, counter }
    }

    /// Upload `files` (relative to `root`) under `prefix`, returning the keys
    /// in the same order. Stops at the first failure; objects already written
    /// are left in place.
    pub async fn upload(&self, root: &Path, files: &[PathBuf], prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::with_capacity(files.len());
        for file in files {
            let key = object_key(prefix, file);
            tracing::debug!(key = %key, "Uploading file");
            self.store.put_file(&key, &root.join(file)).await?;
            self.counter.increment();
            keys.push(key);
        }

        metrics::record_uploaded_files(keys.len());
        tracing::info!(prefix = %prefix, files = keys.len(), "Uploaded model files");
        Ok(keys)
    }
}
