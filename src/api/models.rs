//! API request and response models

use serde::{Deserialize, Serialize};

use crate::service::LoadingResult;
use crate::store::{BaseModel, LoadingStatus, ModelFormat, SourceRepository};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Loading status report from a loader
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateLoadingStatusRequest {
    pub id: String,
    /// Base models only
    #[serde(default)]
    pub project_id: String,
    pub result: LoadingResult,
}

/// Queue a base model for loading
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestBaseModelRequest {
    pub id: String,
    pub source_repository: SourceRepository,
    #[serde(default)]
    pub project_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IdQuery {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishModelRequest {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HfModelRepoRequest {
    pub name: String,
    #[serde(default)]
    pub project_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HfModelRepoQuery {
    pub name: String,
    #[serde(default)]
    pub project_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StorageConfigRequest {
    pub path_prefix: String,
}

/// Base model as returned by the API
#[derive(Debug, Serialize, Deserialize)]
pub struct BaseModelInfo {
    pub id: String,
    pub project_id: String,
    pub path: String,
    pub formats: Vec<ModelFormat>,
    pub gguf_model_path: String,
    pub source_repository: SourceRepository,
    pub loading_status: LoadingStatus,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub loading_failure_reason: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub loading_status_message: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<BaseModel> for BaseModelInfo {
    fn from(model: BaseModel) -> Self {
        Self {
            id: model.model_id,
            project_id: model.project_id,
            path: model.path,
            formats: model.formats,
            gguf_model_path: model.gguf_model_path,
            source_repository: model.source_repository,
            loading_status: model.loading_status,
            loading_failure_reason: model.loading_failure_reason,
            loading_status_message: model.loading_status_message,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListBaseModelsResponse {
    pub data: Vec<BaseModelInfo>,
    pub has_more: bool,
}
