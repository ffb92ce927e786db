//! Loader worker
//!
//! Polls the service for REQUESTED models, claims one at a time, downloads it
//! into a private temp directory, classifies and uploads the tree, then
//! reports the outcome. Any number of loaders may run against one service;
//! claims are arbitrated by the store's conditional updates.

pub mod classifier;
pub mod downloader;
pub mod progress;
pub mod uploader;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempDir;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ModelConfig};
use crate::error::{Code, StatusResult};
use crate::identity;
use crate::metrics;
use crate::object_store::ObjectStore;
use crate::queue::{AcquiredBaseModel, AcquiredModel};
use crate::service::{CreateBaseModel, LoadingResult, ModelClient, RegisterModel};
use crate::store::SourceRepository;
use classifier::Layout;
use downloader::{Downloaders, ModelDownloader};
use progress::{ProgressReporter, StatusTarget};
use uploader::{UploadCounter, Uploader};

/// Loader settings resolved from [`Config`]
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub tenant_id: String,
    pub path_prefix: String,
    pub base_model_path_prefix: String,
    pub work_dir: PathBuf,
    pub poll_interval: Duration,
    pub status_interval: Duration,
    pub run_once: bool,
    pub base_models: Vec<String>,
    pub base_model_source: SourceRepository,
    pub models: Vec<ModelConfig>,
}

impl LoaderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tenant_id: config.loader.tenant_id.clone(),
            path_prefix: config.object_store.path_prefix.clone(),
            base_model_path_prefix: config.object_store.base_model_path_prefix.clone(),
            work_dir: config.loader.work_dir.clone(),
            poll_interval: config.loader.poll_interval(),
            status_interval: config.loader.status_interval(),
            run_once: config.loader.run_once,
            base_models: config.loader.base_models.clone(),
            base_model_source: config.loader.base_model_source,
            models: config.loader.models.clone(),
        }
    }

    fn base_model_root(&self) -> String {
        format!("{}/{}", self.path_prefix, self.base_model_path_prefix)
    }
}

/// Ok unless the error is `code`
fn tolerate<T>(result: StatusResult<T>, code: Code) -> StatusResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.code() == code => Ok(None),
        Err(e) => Err(e),
    }
}

pub struct Loader {
    client: Arc<dyn ModelClient>,
    object_store: Arc<dyn ObjectStore>,
    downloaders: Downloaders,
    settings: LoaderSettings,
}

impl Loader {
    pub fn new(
        client: Arc<dyn ModelClient>,
        object_store: Arc<dyn ObjectStore>,
        downloaders: Downloaders,
        settings: LoaderSettings,
    ) -> Self {
        Self {
            client,
            object_store,
            downloaders,
            settings,
        }
    }

    fn tenant(&self) -> &str {
        &self.settings.tenant_id
    }

    /// Make sure the tenant has a storage config and queue the configured
    /// models. Rows that already exist are left alone.
    pub async fn register_startup_models(&self) -> Result<()> {
        let tenant = self.tenant();
        if tolerate(self.client.get_storage_config(tenant).await, Code::NotFound)?.is_none() {
            tolerate(
                self.client
                    .create_storage_config(tenant, &self.settings.path_prefix)
                    .await,
                Code::AlreadyExists,
            )?;
            tracing::info!(tenant_id = %tenant, "Created storage config");
        }

        let base_models = self
            .settings
            .base_models
            .iter()
            .chain(self.settings.models.iter().map(|m| &m.base_model));
        for base_model in base_models {
            let requested = self
                .client
                .request_base_model(tenant, base_model, self.settings.base_model_source, "")
                .await;
            if tolerate(requested, Code::AlreadyExists)?.is_some() {
                tracing::info!(model_id = %base_model, "Queued configured base model");
            }
        }

        for model in &self.settings.models {
            let req = RegisterModel {
                id: identity::to_model_id(&model.model),
                base_model: identity::to_model_id(&model.base_model),
                organization_id: String::new(),
                project_id: String::new(),
                path: Some(format!(
                    "{}/{}/{}",
                    self.settings.path_prefix, tenant, model.model
                )),
                adapter: model.adapter()?,
                quantization: model.quantization()?,
                source_repository: self.settings.base_model_source,
                file_location: model.model.clone(),
                requested: true,
            };
            if tolerate(self.client.register_model(tenant, req).await, Code::AlreadyExists)?
                .is_some()
            {
                tracing::info!(model = %model.model, "Queued configured fine-tuned model");
            }
        }

        Ok(())
    }

    /// Register startup models, then drain the queues on every tick until
    /// `token` is cancelled (or once, with `run_once`).
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        self.register_startup_models().await?;

        if self.settings.run_once {
            return self.drain(&token).await;
        }

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Loader stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            self.drain(&token).await?;
        }
    }

    /// Claim and load models until both queues are empty. Lost claim races
    /// are retried right away; other claim errors are fatal.
    pub async fn drain(&self, token: &CancellationToken) -> Result<()> {
        while !token.is_cancelled() {
            match self.client.acquire_unloaded_base_model(self.tenant()).await {
                Ok(Some(acquired)) => self.load_base_model(acquired, token).await,
                Ok(None) => break,
                Err(e) if e.is_race() => {
                    tracing::debug!("Lost base model claim race, retrying");
                }
                Err(e) => return Err(e).context("failed to acquire base model"),
            }
        }

        while !token.is_cancelled() {
            match self.client.acquire_unloaded_model(self.tenant()).await {
                Ok(Some(acquired)) => self.load_model(acquired, token).await,
                Ok(None) => break,
                Err(e) if e.is_race() => {
                    tracing::debug!("Lost model claim race, retrying");
                }
                Err(e) => return Err(e).context("failed to acquire model"),
            }
        }

        Ok(())
    }

    async fn load_base_model(&self, acquired: AcquiredBaseModel, token: &CancellationToken) {
        tracing::info!(
            model_id = %acquired.model_id,
            project_id = %acquired.project_id,
            source = %acquired.source_repository,
            "Loading base model"
        );

        metrics::update_active_loads(1);
        let result = tokio::select! {
            _ = token.cancelled() => None,
            r = self.try_load_base_model(&acquired) => Some(r),
        };
        metrics::update_active_loads(0);

        let Some(outcome) = self.outcome("base_model", &acquired.model_id, result) else {
            return;
        };
        if let Err(e) = self
            .client
            .update_base_model_loading_status(
                self.tenant(),
                &acquired.model_id,
                &acquired.project_id,
                outcome,
            )
            .await
        {
            tracing::error!(model_id = %acquired.model_id, error = %e, "Failed to report base model status");
        }
    }

    async fn load_model(&self, acquired: AcquiredModel, token: &CancellationToken) {
        tracing::info!(
            model_id = %acquired.model_id,
            source = %acquired.source_repository,
            "Loading fine-tuned model"
        );

        metrics::update_active_loads(1);
        let result = tokio::select! {
            _ = token.cancelled() => None,
            r = self.try_load_model(&acquired) => Some(r),
        };
        metrics::update_active_loads(0);

        let Some(outcome) = self.outcome("model", &acquired.model_id, result) else {
            return;
        };
        if let Err(e) = self
            .client
            .update_model_loading_status(self.tenant(), &acquired.model_id, outcome)
            .await
        {
            tracing::error!(model_id = %acquired.model_id, error = %e, "Failed to report model status");
        }
    }

    /// Status to report for a finished load; `None` when it was cancelled
    fn outcome(
        &self,
        kind: &'static str,
        model_id: &str,
        result: Option<Result<()>>,
    ) -> Option<LoadingResult> {
        match result {
            None => {
                tracing::info!(model_id = %model_id, "Load cancelled, leaving model in LOADING");
                metrics::record_load(kind, "cancelled");
                None
            }
            Some(Ok(())) => {
                tracing::info!(model_id = %model_id, "Load succeeded");
                metrics::record_load(kind, "succeeded");
                Some(LoadingResult::Success)
            }
            Some(Err(e)) => {
                tracing::error!(model_id = %model_id, error = %format!("{e:#}"), "Load failed");
                metrics::record_load(kind, "failed");
                Some(LoadingResult::Failure {
                    reason: format!("{e:#}"),
                })
            }
        }
    }

    fn downloader(&self, source: SourceRepository) -> Result<&Arc<dyn ModelDownloader>> {
        self.downloaders
            .get(&source)
            .with_context(|| format!("no downloader configured for {source}"))
    }

    fn temp_dir(&self, prefix: &str) -> Result<TempDir> {
        let work_dir = downloader::resolve_work_dir(&self.settings.work_dir)?;
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&work_dir)
            .with_context(|| format!("failed to create temp dir in {}", work_dir.display()))
    }

    /// Start a progress reporter that stops when the returned guard drops
    fn start_progress(
        &self,
        target: StatusTarget,
        dir: &TempDir,
        counter: Arc<UploadCounter>,
    ) -> tokio_util::sync::DropGuard {
        let stop = CancellationToken::new();
        let reporter = ProgressReporter::new(
            self.client.clone(),
            self.tenant(),
            target,
            dir.path(),
            counter,
        )
        .with_interval(self.settings.status_interval);
        tokio::spawn(reporter.run(stop.clone()));
        stop.drop_guard()
    }

    async fn try_load_base_model(&self, acquired: &AcquiredBaseModel) -> Result<()> {
        let tenant = self.tenant();
        let source = acquired.source_repository;
        let project_id = acquired.project_id.as_str();

        let (name, file) = match source {
            SourceRepository::HuggingFace => {
                let target = identity::split_hf_repo_and_file(&acquired.model_id)?;
                (target.repo, target.file)
            }
            _ => (acquired.model_id.clone(), None),
        };
        let model_name = match &file {
            Some(file) => format!("{name}/{file}"),
            None => name.clone(),
        };

        let existing = self
            .client
            .get_base_model_path(tenant, &identity::to_model_id(&model_name), Some(project_id))
            .await;
        if tolerate(existing, Code::NotFound)?.is_some() {
            tracing::info!(model = %model_name, "Base model already loaded");
            return Ok(());
        }

        // A repository that was split into per-file models has no row under
        // its own name, so the repo record is what marks it as done.
        let whole_hf_repo = source == SourceRepository::HuggingFace && file.is_none();
        if whole_hf_repo
            && tolerate(
                self.client.get_hf_model_repo(tenant, &name, project_id).await,
                Code::NotFound,
            )?
            .is_some()
        {
            tracing::info!(repo = %name, "Hugging Face repo already downloaded");
            return Ok(());
        }

        let downloader = self.downloader(source)?;
        let tmp = self.temp_dir("base-model")?;
        let counter = Arc::new(UploadCounter::default());
        let _progress = self.start_progress(
            StatusTarget::BaseModel {
                model_id: acquired.model_id.clone(),
                project_id: project_id.to_string(),
            },
            &tmp,
            counter.clone(),
        );

        tracing::info!(model = %model_name, dir = %tmp.path().display(), "Downloading base model");
        downloader
            .download(&name, file.as_deref(), tmp.path())
            .await
            .with_context(|| format!("failed to download {model_name}"))?;

        let root = tmp.path().to_path_buf();
        let classification =
            tokio::task::spawn_blocking(move || classifier::classify(&root)).await??;
        tracing::info!(
            model = %model_name,
            files = classification.files.len(),
            layout = ?classification.layout,
            "Classified download"
        );

        let root_prefix = self.settings.base_model_root();
        let key_prefix = format!(
            "{root_prefix}/{}",
            identity::object_key_segment(&name, source)
        );
        Uploader::new(self.object_store.clone(), counter)
            .upload(tmp.path(), &classification.files, &key_prefix)
            .await?;

        for candidate in classification.candidates(&model_name) {
            let path = match classification.layout {
                Layout::Split { .. } => format!(
                    "{root_prefix}/{}",
                    identity::object_key_segment(&candidate.name, source)
                ),
                _ => key_prefix.clone(),
            };
            let gguf_model_path = candidate
                .gguf
                .as_deref()
                .map(|gguf| uploader::object_key(&key_prefix, gguf))
                .unwrap_or_default();
            let req = CreateBaseModel {
                id: identity::to_model_id(&candidate.name),
                path,
                formats: candidate.formats,
                gguf_model_path,
                source_repository: source,
                project_id: project_id.to_string(),
            };

            let id = req.id.clone();
            match tolerate(self.client.create_base_model(tenant, req).await, Code::AlreadyExists)? {
                Some(created) => {
                    tracing::info!(model_id = %id, path = %created.path, "Created base model")
                }
                None => tracing::info!(model_id = %id, "Base model already exists"),
            }
        }

        if whole_hf_repo {
            tolerate(
                self.client
                    .create_hf_model_repo(tenant, &name, project_id)
                    .await,
                Code::AlreadyExists,
            )?;
        }

        Ok(())
    }

    async fn try_load_model(&self, acquired: &AcquiredModel) -> Result<()> {
        let source = acquired.source_repository;
        let (name, file) = match source {
            SourceRepository::HuggingFace => {
                let target = identity::split_hf_repo_and_file(&acquired.file_location)?;
                (target.repo, target.file)
            }
            _ => (acquired.file_location.clone(), None),
        };

        let downloader = self.downloader(source)?;
        let tmp = self.temp_dir("model")?;
        let counter = Arc::new(UploadCounter::default());
        let _progress = self.start_progress(
            StatusTarget::Model {
                model_id: acquired.model_id.clone(),
            },
            &tmp,
            counter.clone(),
        );

        downloader
            .download(&name, file.as_deref(), tmp.path())
            .await
            .with_context(|| format!("failed to download {}", acquired.file_location))?;

        let root = tmp.path().to_path_buf();
        let files = tokio::task::spawn_blocking(move || classifier::list_files(&root)).await??;
        if files.is_empty() {
            anyhow::bail!("no files downloaded");
        }

        Uploader::new(self.object_store.clone(), counter)
            .upload(tmp.path(), &files, &acquired.dest_path)
            .await?;
        Ok(())
    }
}
