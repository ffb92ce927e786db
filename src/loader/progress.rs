//! Periodic download/upload progress messages

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::classifier;
use super::uploader::UploadCounter;
use crate::service::{LoadingResult, ModelClient};

pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Row that receives the progress messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusTarget {
    BaseModel { model_id: String, project_id: String },
    Model { model_id: String },
}

pub struct ProgressReporter {
    client: Arc<dyn ModelClient>,
    tenant_id: String,
    target: StatusTarget,
    download_dir: PathBuf,
    uploaded: Arc<UploadCounter>,
    interval: Duration,
}

impl ProgressReporter {
    pub fn new(
        client: Arc<dyn ModelClient>,
        tenant_id: impl Into<String>,
        target: StatusTarget,
        download_dir: impl Into<PathBuf>,
        uploaded: Arc<UploadCounter>,
    ) -> Self {
        Self {
            client,
            tenant_id: tenant_id.into(),
            target,
            download_dir: download_dir.into(),
            uploaded,
            interval: DEFAULT_STATUS_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Current progress line
    pub async fn message(&self) -> anyhow::Result<String> {
        let dir = self.download_dir.clone();
        let downloaded = tokio::task::spawn_blocking(move || classifier::list_files(&dir))
            .await??
            .len();
        Ok(format!(
            "downloaded files: {}, uploaded files: {}",
            downloaded,
            self.uploaded.get()
        ))
    }

    async fn send(&self) -> anyhow::Result<()> {
        let result = LoadingResult::StatusMessage {
            message: self.message().await?,
        };
        match &self.target {
            StatusTarget::BaseModel {
                model_id,
                project_id,
            } => {
                self.client
                    .update_base_model_loading_status(&self.tenant_id, model_id, project_id, result)
                    .await?
            }
            StatusTarget::Model { model_id } => {
                self.client
                    .update_model_loading_status(&self.tenant_id, model_id, result)
                    .await?
            }
        }
        Ok(())
    }

    /// Send a message every interval until `token` is cancelled. Send
    /// failures are logged and the next tick tries again.
    pub async fn run(self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.send().await {
                        tracing::warn!(status_target = ?self.target, error = %e, "Failed to send load progress");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::WorkerService;
    use crate::store::{ModelKey, SourceRepository, Store};

    #[tokio::test]
    async fn test_message_counts_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a"), b"").unwrap();
        std::fs::write(dir.path().join("sub/b"), b"").unwrap();

        let service = WorkerService::new(Store::in_memory().await.unwrap());
        let counter = Arc::new(UploadCounter::default());
        let reporter = ProgressReporter::new(
            Arc::new(service),
            "tenant0",
            StatusTarget::Model {
                model_id: "m0".to_string(),
            },
            dir.path(),
            counter,
        );

        assert_eq!(
            reporter.message().await.unwrap(),
            "downloaded files: 2, uploaded files: 0"
        );
    }

    #[tokio::test]
    async fn test_run_writes_message_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("weights.gguf"), b"").unwrap();

        let store = Store::in_memory().await.unwrap();
        let service = Arc::new(WorkerService::new(store.clone()));
        service
            .request_base_model("tenant0", "m0", SourceRepository::HuggingFace, "")
            .await
            .unwrap();
        service
            .acquire_unloaded_base_model("tenant0")
            .await
            .unwrap()
            .unwrap();

        let token = CancellationToken::new();
        let reporter = ProgressReporter::new(
            service,
            "tenant0",
            StatusTarget::BaseModel {
                model_id: "m0".to_string(),
                project_id: String::new(),
            },
            dir.path(),
            Arc::new(UploadCounter::default()),
        )
        .with_interval(Duration::from_millis(50));
        let handle = tokio::spawn(reporter.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(300)).await;
        token.cancel();
        handle.await.unwrap();

        let row = store
            .get_base_model(&ModelKey::global("m0", "tenant0"))
            .await
            .unwrap();
        assert_eq!(
            row.loading_status_message,
            "downloaded files: 1, uploaded files: 0"
        );
        assert_eq!(row.loading_status, crate::store::LoadingStatus::Loading);
    }
}
