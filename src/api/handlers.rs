//! API request handlers

use super::models::{
    BaseModelInfo, HealthResponse, HfModelRepoQuery, HfModelRepoRequest, IdQuery,
    ListBaseModelsResponse, PublishModelRequest, RequestBaseModelRequest, StorageConfigRequest,
    UpdateLoadingStatusRequest,
};
use super::routes::AppState;
use crate::error::StatusResult;
use crate::service::{
    CreateBaseModel, ListBaseModels, ModelClient, ModelPath, RegisterModel, RegisteredModel,
};
use crate::store::{HfModelRepo, StorageConfig};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// 200 with the claimed model, or 204 when the queue is empty
fn acquired<T: serde::Serialize>(claim: Option<T>) -> Response {
    match claim {
        Some(model) => Json(model).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// GET /health - Manager health check
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

// ============================================================================
// Base models
// ============================================================================

/// POST /v1/tenants/{tenant}/base-models/acquire
pub async fn acquire_base_model(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> StatusResult<Response> {
    Ok(acquired(
        state.worker.acquire_unloaded_base_model(&tenant).await?,
    ))
}

/// POST /v1/tenants/{tenant}/base-models - Record a loaded base model
pub async fn create_base_model(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<CreateBaseModel>,
) -> StatusResult<(StatusCode, Json<BaseModelInfo>)> {
    let model = state.worker.create_base_model(&tenant, req).await?;
    Ok((StatusCode::CREATED, Json(model.into())))
}

/// POST /v1/tenants/{tenant}/base-models/requests - Queue a base model
pub async fn request_base_model(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<RequestBaseModelRequest>,
) -> StatusResult<(StatusCode, Json<BaseModelInfo>)> {
    let model = state
        .worker
        .request_base_model(&tenant, &req.id, req.source_repository, &req.project_id)
        .await?;
    Ok((StatusCode::CREATED, Json(model.into())))
}

/// POST /v1/tenants/{tenant}/base-models/status
pub async fn update_base_model_status(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<UpdateLoadingStatusRequest>,
) -> StatusResult<StatusCode> {
    state
        .worker
        .update_base_model_loading_status(&tenant, &req.id, &req.project_id, req.result)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/tenants/{tenant}/base-models/path?id=&project_id=
pub async fn get_base_model_path(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(query): Query<IdQuery>,
) -> StatusResult<Json<ModelPath>> {
    let path = state
        .worker
        .get_base_model_path(&tenant, &query.id, query.project_id.as_deref())
        .await?;
    Ok(Json(path))
}

/// GET /v1/tenants/{tenant}/base-models - List loaded base models
pub async fn list_base_models(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(params): Query<ListBaseModels>,
) -> StatusResult<Json<ListBaseModelsResponse>> {
    let page = state.catalog.list_base_models(&tenant, &params).await?;
    Ok(Json(ListBaseModelsResponse {
        data: page.items.into_iter().map(BaseModelInfo::from).collect(),
        has_more: page.has_more,
    }))
}

/// DELETE /v1/tenants/{tenant}/base-models?id=&project_id=
pub async fn delete_base_model(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(query): Query<IdQuery>,
) -> StatusResult<StatusCode> {
    state
        .catalog
        .delete_base_model(&tenant, &query.id, query.project_id.as_deref().unwrap_or(""))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Fine-tuned models
// ============================================================================

/// POST /v1/tenants/{tenant}/models/acquire
pub async fn acquire_model(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> StatusResult<Response> {
    Ok(acquired(state.worker.acquire_unloaded_model(&tenant).await?))
}

/// POST /v1/tenants/{tenant}/models - Register a fine-tuned model
pub async fn register_model(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<RegisterModel>,
) -> StatusResult<(StatusCode, Json<RegisteredModel>)> {
    let registered = state.worker.register_model(&tenant, req).await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

/// POST /v1/tenants/{tenant}/models/status
pub async fn update_model_status(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<UpdateLoadingStatusRequest>,
) -> StatusResult<StatusCode> {
    state
        .worker
        .update_model_loading_status(&tenant, &req.id, req.result)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/tenants/{tenant}/models/publish
pub async fn publish_model(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<PublishModelRequest>,
) -> StatusResult<StatusCode> {
    state.worker.publish_model(&tenant, &req.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/tenants/{tenant}/models/path?id=
pub async fn get_model_path(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(query): Query<IdQuery>,
) -> StatusResult<Json<ModelPath>> {
    Ok(Json(state.worker.get_model_path(&tenant, &query.id).await?))
}

// ============================================================================
// Hugging Face repos and storage config
// ============================================================================

/// POST /v1/tenants/{tenant}/hf-model-repos
pub async fn create_hf_model_repo(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<HfModelRepoRequest>,
) -> StatusResult<(StatusCode, Json<HfModelRepo>)> {
    let repo = state
        .worker
        .create_hf_model_repo(&tenant, &req.name, &req.project_id)
        .await?;
    Ok((StatusCode::CREATED, Json(repo)))
}

/// GET /v1/tenants/{tenant}/hf-model-repos?name=&project_id=
pub async fn get_hf_model_repo(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(query): Query<HfModelRepoQuery>,
) -> StatusResult<Json<HfModelRepo>> {
    let repo = state
        .worker
        .get_hf_model_repo(&tenant, &query.name, &query.project_id)
        .await?;
    Ok(Json(repo))
}

/// GET /v1/tenants/{tenant}/storage-config
pub async fn get_storage_config(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> StatusResult<Json<StorageConfig>> {
    Ok(Json(state.worker.get_storage_config(&tenant).await?))
}

/// POST /v1/tenants/{tenant}/storage-config
pub async fn create_storage_config(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<StorageConfigRequest>,
) -> StatusResult<(StatusCode, Json<StorageConfig>)> {
    let config = state
        .worker
        .create_storage_config(&tenant, &req.path_prefix)
        .await?;
    Ok((StatusCode::CREATED, Json(config)))
}
