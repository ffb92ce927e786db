use serde::{Deserialize, Serialize};

use super::{not_found_as, require};
use crate::error::{Status, StatusResult};
use crate::identity::{self, Page};
use crate::store::{ActivationStatus, BaseModel, ModelKey, Store};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

/// Listing parameters for loaded base models
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBaseModels {
    pub project_id: Option<String>,
    pub activation_status: Option<ActivationStatus>,
    /// Exclusive model ID cursor
    pub after: Option<String>,
    pub limit: Option<usize>,
}

/// Read-facing view of loaded base models
#[derive(Clone)]
pub struct CatalogService {
    store: Store,
}

impl CatalogService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// One page of loaded base models, one entry per model ID resolved to
    /// the row visible from the caller's project.
    pub async fn list_base_models(
        &self,
        tenant_id: &str,
        params: &ListBaseModels,
    ) -> StatusResult<Page<BaseModel>> {
        let limit = match params.limit {
            None | Some(0) => DEFAULT_PAGE_SIZE,
            Some(n) if n > MAX_PAGE_SIZE => {
                return Err(Status::invalid_argument(format!(
                    "limit must be at most {MAX_PAGE_SIZE}"
                )));
            }
            Some(n) => n,
        };
        let project_id = params.project_id.as_deref().filter(|p| !p.is_empty());

        // One extra visible ID tells whether another page exists.
        let rows = self
            .store
            .list_loaded_base_models_after(
                tenant_id,
                project_id,
                params.activation_status,
                params.after.as_deref().filter(|a| !a.is_empty()),
                limit + 1,
            )
            .await?;

        Ok(identity::assemble_page(
            rows,
            project_id,
            params.activation_status,
            limit,
        ))
    }

    pub async fn get_base_model(
        &self,
        tenant_id: &str,
        model_id: &str,
        project_id: Option<&str>,
    ) -> StatusResult<BaseModel> {
        require(model_id, "id")?;
        let candidates = self
            .store
            .list_base_models_by_model_id(model_id, tenant_id)
            .await?;
        identity::resolve_loaded(&candidates, project_id.filter(|p| !p.is_empty()))
            .cloned()
            .ok_or_else(|| Status::not_found(format!("model {model_id:?} not found")))
    }

    /// Delete a base model in one scope along with its activation row and
    /// any Hugging Face repo records pointing at it.
    pub async fn delete_base_model(
        &self,
        tenant_id: &str,
        model_id: &str,
        project_id: &str,
    ) -> StatusResult<()> {
        require(model_id, "id")?;
        let key = ModelKey::new(model_id, tenant_id, project_id);
        self.store
            .delete_base_model_and_repos(&key)
            .await
            .map_err(|e| not_found_as(e, || format!("model {model_id:?}")))?;

        tracing::info!(key = %key, "Deleted base model");
        Ok(())
    }
}
