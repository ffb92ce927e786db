use async_trait::async_trait;

use super::{
    CreateBaseModel, LoadingResult, ModelClient, ModelPath, RegisterModel, RegisteredModel,
    not_found_as, require,
};
use crate::error::{Status, StatusResult};
use crate::identity;
use crate::queue::{AcquiredBaseModel, AcquiredModel, JobQueue};
use crate::store::{
    BaseModel, HfModelRepo, LoadingStatus, ModelFormat, ModelKey, NewBaseModel, NewModel,
    SourceRepository, StorageConfig, Store, StoreError, SucceededFields,
};

/// In-process implementation of the worker-facing service
#[derive(Clone)]
pub struct WorkerService {
    store: Store,
    queue: JobQueue,
}

impl WorkerService {
    pub fn new(store: Store) -> Self {
        let queue = JobQueue::new(store.clone());
        Self { store, queue }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Mark a fine-tuned model registered by a trainer as published.
    pub async fn publish_model(&self, tenant_id: &str, model_id: &str) -> StatusResult<()> {
        require(model_id, "id")?;
        self.store
            .publish_model(model_id, tenant_id)
            .await
            .map_err(|e| not_found_as(e, || format!("model {model_id:?}")))?;

        tracing::info!(model_id = %model_id, tenant_id = %tenant_id, "Published model");
        Ok(())
    }

    async fn default_model_path(&self, tenant_id: &str, req: &RegisterModel) -> StatusResult<String> {
        let config = self
            .store
            .get_storage_config(tenant_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => Status::failed_precondition(format!(
                    "storage config for tenant {tenant_id:?} not found"
                )),
                other => Status::from(other),
            })?;

        Ok(if req.project_id.is_empty() {
            format!("{}/{}/{}", config.path_prefix, tenant_id, req.id)
        } else {
            format!(
                "{}/{}/{}/{}",
                config.path_prefix, tenant_id, req.project_id, req.id
            )
        })
    }
}

fn model_path_of(model: &BaseModel) -> ModelPath {
    let mut formats = model.formats.clone();
    // Rows written before formats were recorded only carry the GGUF path.
    if formats.is_empty() && !model.gguf_model_path.is_empty() {
        formats.push(ModelFormat::Gguf);
    }
    ModelPath {
        path: model.path.clone(),
        formats,
        gguf_model_path: model.gguf_model_path.clone(),
    }
}

#[async_trait]
impl ModelClient for WorkerService {
    async fn acquire_unloaded_base_model(
        &self,
        tenant_id: &str,
    ) -> StatusResult<Option<AcquiredBaseModel>> {
        Ok(self.queue.claim_base_model(tenant_id).await?)
    }

    async fn acquire_unloaded_model(&self, tenant_id: &str) -> StatusResult<Option<AcquiredModel>> {
        Ok(self.queue.claim_model(tenant_id).await?)
    }

    async fn update_base_model_loading_status(
        &self,
        tenant_id: &str,
        model_id: &str,
        project_id: &str,
        result: LoadingResult,
    ) -> StatusResult<()> {
        require(model_id, "id")?;
        result.validate()?;

        let key = ModelKey::new(model_id, tenant_id, project_id);
        let current = self
            .store
            .get_base_model(&key)
            .await
            .map_err(|e| not_found_as(e, || format!("model {model_id:?}")))?;

        match result {
            LoadingResult::Success => {
                // The loader creates the real rows through create_base_model
                // before reporting success. A requested row still in LOADING
                // was superseded by rows with other IDs (normalization or a
                // per-file split), so it no longer names an artifact.
                if current.loading_status == LoadingStatus::Loading {
                    self.store.delete_base_model(&key).await?;
                    tracing::info!(
                        key = %key,
                        "Deleted requested base model superseded by loaded models"
                    );
                }
                Ok(())
            }
            LoadingResult::Failure { reason } => {
                self.store.update_base_model_to_failed(&key, &reason).await?;
                tracing::warn!(key = %key, reason = %reason, "Base model load failed");
                Ok(())
            }
            LoadingResult::StatusMessage { message } => {
                self.store
                    .update_base_model_status_message(&key, &message)
                    .await?;
                Ok(())
            }
        }
    }

    async fn update_model_loading_status(
        &self,
        tenant_id: &str,
        model_id: &str,
        result: LoadingResult,
    ) -> StatusResult<()> {
        require(model_id, "id")?;
        result.validate()?;

        self.store
            .get_model(model_id, tenant_id)
            .await
            .map_err(|e| not_found_as(e, || format!("model {model_id:?}")))?;

        match result {
            LoadingResult::Success => {
                self.store
                    .update_model_to_succeeded(model_id, tenant_id)
                    .await?
            }
            LoadingResult::Failure { reason } => {
                self.store
                    .update_model_to_failed(model_id, tenant_id, &reason)
                    .await?
            }
            LoadingResult::StatusMessage { message } => {
                self.store
                    .update_model_status_message(model_id, tenant_id, &message)
                    .await?
            }
        }
        Ok(())
    }

    async fn create_base_model(
        &self,
        tenant_id: &str,
        req: CreateBaseModel,
    ) -> StatusResult<BaseModel> {
        require(&req.id, "id")?;
        require(&req.path, "path")?;

        let formats = if req.formats.is_empty() {
            vec![ModelFormat::Gguf]
        } else {
            req.formats
        };
        if formats.contains(&ModelFormat::Gguf) && req.gguf_model_path.is_empty() {
            return Err(Status::invalid_argument(
                "gguf_model_path is required for the GGUF format",
            ));
        }

        let key = ModelKey::new(&req.id, tenant_id, &req.project_id);
        let existing = match self.store.get_base_model(&key).await {
            Ok(existing) => existing,
            Err(StoreError::NotFound) => {
                let created = self
                    .store
                    .create_base_model(NewBaseModel {
                        key: key.clone(),
                        path: req.path,
                        formats,
                        gguf_model_path: req.gguf_model_path,
                        source_repository: req.source_repository,
                        loading_status: LoadingStatus::Succeeded,
                    })
                    .await?;
                tracing::info!(key = %key, path = %created.path, "Created base model");
                return Ok(created);
            }
            Err(e) => return Err(e.into()),
        };

        if existing.is_loaded() {
            return Err(Status::already_exists(format!(
                "model {:?} already exists",
                req.id
            )));
        }

        // The requested row itself is being loaded under its own ID.
        self.store
            .update_base_model_to_succeeded(
                &key,
                &SucceededFields {
                    path: req.path,
                    formats,
                    gguf_model_path: req.gguf_model_path,
                },
            )
            .await?;
        tracing::info!(key = %key, "Completed requested base model in place");
        Ok(self.store.get_base_model(&key).await?)
    }

    async fn create_hf_model_repo(
        &self,
        tenant_id: &str,
        name: &str,
        project_id: &str,
    ) -> StatusResult<HfModelRepo> {
        require(name, "name")?;

        let repo = HfModelRepo {
            name: name.to_string(),
            model_id: identity::to_model_id(name),
            tenant_id: tenant_id.to_string(),
            project_id: project_id.to_string(),
        };
        self.store.create_hf_model_repo(&repo).await?;
        Ok(repo)
    }

    async fn get_hf_model_repo(
        &self,
        tenant_id: &str,
        name: &str,
        project_id: &str,
    ) -> StatusResult<HfModelRepo> {
        require(name, "name")?;
        self.store
            .get_hf_model_repo(name, tenant_id, project_id)
            .await
            .map_err(|e| not_found_as(e, || format!("hugging-face model repo {name:?}")))
    }

    async fn get_base_model_path(
        &self,
        tenant_id: &str,
        model_id: &str,
        project_id: Option<&str>,
    ) -> StatusResult<ModelPath> {
        require(model_id, "id")?;
        let not_found = || Status::not_found(format!("model {model_id:?} not found"));

        // An explicit scope, including the empty global one, is exact.
        match project_id {
            Some(project_id) => {
                let model = self
                    .store
                    .get_base_model(&ModelKey::new(model_id, tenant_id, project_id))
                    .await
                    .map_err(|e| not_found_as(e, || format!("model {model_id:?}")))?;
                if !model.is_loaded() {
                    return Err(not_found());
                }
                Ok(model_path_of(&model))
            }
            None => {
                let candidates = self
                    .store
                    .list_base_models_by_model_id(model_id, tenant_id)
                    .await?;
                identity::resolve_loaded(&candidates, None)
                    .map(model_path_of)
                    .ok_or_else(not_found)
            }
        }
    }

    async fn get_model_path(&self, tenant_id: &str, model_id: &str) -> StatusResult<ModelPath> {
        require(model_id, "id")?;
        let model = self
            .store
            .get_model(model_id, tenant_id)
            .await
            .map_err(|e| not_found_as(e, || format!("model {model_id:?}")))?;
        if !model.is_published || !model.is_loaded() {
            return Err(Status::not_found(format!("model {model_id:?} not found")));
        }

        Ok(ModelPath {
            path: model.path,
            formats: Vec::new(),
            gguf_model_path: String::new(),
        })
    }

    async fn request_base_model(
        &self,
        tenant_id: &str,
        model_id: &str,
        source_repository: SourceRepository,
        project_id: &str,
    ) -> StatusResult<BaseModel> {
        require(model_id, "id")?;
        let key = ModelKey::new(model_id, tenant_id, project_id);
        let model = self
            .store
            .create_base_model(NewBaseModel::requested(key.clone(), source_repository))
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists => {
                    Status::already_exists(format!("model {model_id:?} already exists"))
                }
                other => Status::from(other),
            })?;

        tracing::info!(key = %key, source = %source_repository, "Requested base model load");
        Ok(model)
    }

    async fn register_model(
        &self,
        tenant_id: &str,
        req: RegisterModel,
    ) -> StatusResult<RegisteredModel> {
        require(&req.id, "id")?;
        require(&req.base_model, "base_model")?;

        match self.store.get_model(&req.id, tenant_id).await {
            Ok(_) => {
                return Err(Status::already_exists(format!(
                    "model {:?} already exists",
                    req.id
                )));
            }
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let path = match req.path.clone().filter(|p| !p.is_empty()) {
            Some(path) => path,
            None => self.default_model_path(tenant_id, &req).await?,
        };
        let loading_status = if req.requested {
            LoadingStatus::Requested
        } else {
            LoadingStatus::Loading
        };

        self.store
            .create_model(NewModel {
                model_id: req.id.clone(),
                tenant_id: tenant_id.to_string(),
                organization_id: req.organization_id,
                project_id: req.project_id,
                path: path.clone(),
                is_published: false,
                base_model_id: req.base_model,
                adapter: req.adapter,
                quantization: req.quantization,
                source_repository: req.source_repository,
                model_file_location: req.file_location,
                loading_status,
            })
            .await?;

        tracing::info!(model_id = %req.id, path = %path, status = %loading_status, "Registered model");
        Ok(RegisteredModel { id: req.id, path })
    }

    async fn get_storage_config(&self, tenant_id: &str) -> StatusResult<StorageConfig> {
        self.store
            .get_storage_config(tenant_id)
            .await
            .map_err(|e| not_found_as(e, || format!("storage config for tenant {tenant_id:?}")))
    }

    async fn create_storage_config(
        &self,
        tenant_id: &str,
        path_prefix: &str,
    ) -> StatusResult<StorageConfig> {
        require(path_prefix, "path_prefix")?;
        let config = StorageConfig {
            tenant_id: tenant_id.to_string(),
            path_prefix: path_prefix.to_string(),
        };
        self.store.create_storage_config(&config).await?;
        Ok(config)
    }
}
