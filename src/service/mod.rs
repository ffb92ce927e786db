//! Worker-facing and read-facing model services
//!
//! [`ModelClient`] is the seam between the loader and the service. The loader
//! only talks to this trait, so it can run in-process against
//! [`WorkerService`] or against any other implementation (tests use the real
//! service over an in-memory store).

mod catalog;
mod worker;

pub use catalog::{CatalogService, ListBaseModels};
pub use worker::WorkerService;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Status, StatusResult};
use crate::queue::{AcquiredBaseModel, AcquiredModel};
use crate::store::{
    AdapterType, BaseModel, HfModelRepo, ModelFormat, QuantizationType, SourceRepository,
    StorageConfig, StoreError,
};

/// Outcome reported for a claimed model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoadingResult {
    Success,
    Failure { reason: String },
    /// Progress only; the status is left as is
    StatusMessage { message: String },
}

impl LoadingResult {
    fn validate(&self) -> StatusResult<()> {
        match self {
            LoadingResult::Success => Ok(()),
            LoadingResult::Failure { reason } if reason.is_empty() => {
                Err(Status::invalid_argument("reason is required"))
            }
            LoadingResult::StatusMessage { message } if message.is_empty() => Err(
                Status::invalid_argument("loading_result or status_message is required"),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBaseModel {
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub formats: Vec<ModelFormat>,
    #[serde(default)]
    pub gguf_model_path: String,
    pub source_repository: SourceRepository,
    #[serde(default)]
    pub project_id: String,
}

/// Storage location of a loaded model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPath {
    pub path: String,
    pub formats: Vec<ModelFormat>,
    pub gguf_model_path: String,
}

/// Registration of a fine-tuned model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterModel {
    pub id: String,
    pub base_model: String,
    #[serde(default)]
    pub organization_id: String,
    #[serde(default)]
    pub project_id: String,
    /// Defaults to `{storage prefix}/{tenant}/{project}/{id}`
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub adapter: AdapterType,
    #[serde(default)]
    pub quantization: QuantizationType,
    pub source_repository: SourceRepository,
    #[serde(default)]
    pub file_location: String,
    /// Queue the model for a loader (REQUESTED) instead of LOADING
    #[serde(default)]
    pub requested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub id: String,
    pub path: String,
}

/// Operations a loader worker needs from the model service
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn acquire_unloaded_base_model(
        &self,
        tenant_id: &str,
    ) -> StatusResult<Option<AcquiredBaseModel>>;

    async fn acquire_unloaded_model(&self, tenant_id: &str) -> StatusResult<Option<AcquiredModel>>;

    async fn update_base_model_loading_status(
        &self,
        tenant_id: &str,
        model_id: &str,
        project_id: &str,
        result: LoadingResult,
    ) -> StatusResult<()>;

    async fn update_model_loading_status(
        &self,
        tenant_id: &str,
        model_id: &str,
        result: LoadingResult,
    ) -> StatusResult<()>;

    async fn create_base_model(
        &self,
        tenant_id: &str,
        req: CreateBaseModel,
    ) -> StatusResult<BaseModel>;

    async fn create_hf_model_repo(
        &self,
        tenant_id: &str,
        name: &str,
        project_id: &str,
    ) -> StatusResult<HfModelRepo>;

    async fn get_hf_model_repo(
        &self,
        tenant_id: &str,
        name: &str,
        project_id: &str,
    ) -> StatusResult<HfModelRepo>;

    async fn get_base_model_path(
        &self,
        tenant_id: &str,
        model_id: &str,
        project_id: Option<&str>,
    ) -> StatusResult<ModelPath>;

    async fn get_model_path(&self, tenant_id: &str, model_id: &str) -> StatusResult<ModelPath>;

    async fn request_base_model(
        &self,
        tenant_id: &str,
        model_id: &str,
        source_repository: SourceRepository,
        project_id: &str,
    ) -> StatusResult<BaseModel>;

    async fn register_model(
        &self,
        tenant_id: &str,
        req: RegisterModel,
    ) -> StatusResult<RegisteredModel>;

    async fn get_storage_config(&self, tenant_id: &str) -> StatusResult<StorageConfig>;

    async fn create_storage_config(
        &self,
        tenant_id: &str,
        path_prefix: &str,
    ) -> StatusResult<StorageConfig>;
}

/// NOT_FOUND with a message naming the missing thing; other errors map as usual
pub(crate) fn not_found_as(err: StoreError, what: impl FnOnce() -> String) -> Status {
    match err {
        StoreError::NotFound => Status::not_found(format!("{} not found", what())),
        other => Status::from(other),
    }
}

pub(crate) fn require(value: &str, field: &str) -> StatusResult<()> {
    if value.is_empty() {
        return Err(Status::invalid_argument(format!("{field} is required")));
    }
    Ok(())
}
