//! Claim-one-unclaimed-model queue over the store
//!
//! A claim lists REQUESTED rows for the tenant oldest first and moves the
//! first one to LOADING with a conditional update. Losing that race returns
//! [`StoreError::ConcurrentUpdate`] and the caller is expected to retry right
//! away. A worker that dies after claiming leaves its row in LOADING; claims
//! are never released automatically.

use serde::{Deserialize, Serialize};

use crate::metrics;
use crate::store::{SourceRepository, Store, StoreError, StoreResult};

/// A base model claimed for loading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquiredBaseModel {
    pub model_id: String,
    pub source_repository: SourceRepository,
    pub project_id: String,
}

/// A fine-tuned model claimed for loading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquiredModel {
    pub model_id: String,
    pub source_repository: SourceRepository,
    /// Where the source bytes live (repo name or object-store prefix)
    pub file_location: String,
    /// Object-store prefix to upload to
    pub dest_path: String,
}

#[derive(Clone)]
pub struct JobQueue {
    store: Store,
}

impl JobQueue {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Claim the oldest REQUESTED base model of the tenant.
    ///
    /// `Ok(None)` means the queue is drained for now.
    pub async fn claim_base_model(&self, tenant_id: &str) -> StoreResult<Option<AcquiredBaseModel>> {
        let candidates = self.store.list_unloaded_base_models(tenant_id).await?;
        let Some(first) = candidates.into_iter().next() else {
            return Ok(None);
        };

        match self.store.update_base_model_to_loading(&first.key()).await {
            Ok(()) => {
                metrics::record_claim("base_model");
                tracing::info!(
                    model_id = %first.model_id,
                    project_id = %first.project_id,
                    tenant_id = %tenant_id,
                    "Claimed base model"
                );
                Ok(Some(AcquiredBaseModel {
                    model_id: first.model_id,
                    source_repository: first.source_repository,
                    project_id: first.project_id,
                }))
            }
            Err(StoreError::ConcurrentUpdate) => {
                metrics::record_claim_conflict("base_model");
                tracing::debug!(model_id = %first.model_id, "Lost base model claim race");
                Err(StoreError::ConcurrentUpdate)
            }
            Err(e) => Err(e),
        }
    }

    /// Claim the oldest REQUESTED fine-tuned model of the tenant.
    pub async fn claim_model(&self, tenant_id: &str) -> StoreResult<Option<AcquiredModel>> {
        let candidates = self.store.list_unloaded_models(tenant_id).await?;
        let Some(first) = candidates.into_iter().next() else {
            return Ok(None);
        };

        match self
            .store
            .update_model_to_loading(&first.model_id, tenant_id)
            .await
        {
            Ok(()) => {
                metrics::record_claim("model");
                tracing::info!(model_id = %first.model_id, tenant_id = %tenant_id, "Claimed model");
                Ok(Some(AcquiredModel {
                    model_id: first.model_id,
                    source_repository: first.source_repository,
                    file_location: first.model_file_location,
                    dest_path: first.path,
                }))
            }
            Err(StoreError::ConcurrentUpdate) => {
                metrics::record_claim_conflict("model");
                tracing::debug!(model_id = %first.model_id, "Lost model claim race");
                Err(StoreError::ConcurrentUpdate)
            }
            Err(e) => Err(e),
        }
    }
}
