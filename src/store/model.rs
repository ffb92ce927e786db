use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{
    ActivationStatus, AdapterType, LoadingStatus, Model, ModelKey, QuantizationType,
    SourceRepository, Store, StoreError, StoreResult, map_insert_error,
};

/// Fields of a fine-tuned model row to insert
#[derive(Debug, Clone)]
pub struct NewModel {
    pub model_id: String,
    pub tenant_id: String,
    pub organization_id: String,
    pub project_id: String,
    pub path: String,
    pub is_published: bool,
    pub base_model_id: String,
    pub adapter: AdapterType,
    pub quantization: QuantizationType,
    pub source_repository: SourceRepository,
    pub model_file_location: String,
    pub loading_status: LoadingStatus,
}

impl NewModel {
    fn activation_key(&self) -> ModelKey {
        ModelKey::new(&self.model_id, &self.tenant_id, &self.project_id)
    }
}

fn model_from_row(row: &SqliteRow) -> StoreResult<Model> {
    Ok(Model {
        id: row.try_get("id")?,
        model_id: row.try_get("model_id")?,
        tenant_id: row.try_get("tenant_id")?,
        organization_id: row.try_get("organization_id")?,
        project_id: row.try_get("project_id")?,
        path: row.try_get("path")?,
        is_published: row.try_get("is_published")?,
        base_model_id: row.try_get("base_model_id")?,
        adapter: row.try_get::<&str, _>("adapter")?.parse()?,
        quantization: row.try_get::<&str, _>("quantization")?.parse()?,
        source_repository: row.try_get::<&str, _>("source_repository")?.parse()?,
        model_file_location: row.try_get("model_file_location")?,
        loading_status: row.try_get::<&str, _>("loading_status")?.parse()?,
        loading_failure_reason: row.try_get("loading_failure_reason")?,
        loading_status_message: row.try_get("loading_status_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn create_model_in(conn: &mut SqliteConnection, new: &NewModel) -> StoreResult<Model> {
    let now = Utc::now();
    let row = sqlx::query(
        "INSERT INTO models \
         (model_id, tenant_id, organization_id, project_id, path, is_published, \
          base_model_id, adapter, quantization, source_repository, model_file_location, \
          loading_status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(&new.model_id)
    .bind(&new.tenant_id)
    .bind(&new.organization_id)
    .bind(&new.project_id)
    .bind(&new.path)
    .bind(new.is_published)
    .bind(&new.base_model_id)
    .bind(new.adapter.as_str())
    .bind(new.quantization.as_str())
    .bind(new.source_repository.as_str())
    .bind(&new.model_file_location)
    .bind(new.loading_status.as_str())
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_insert_error)?;

    model_from_row(&row)
}

impl Store {
    /// Create a fine-tuned model together with its INACTIVE activation row.
    pub async fn create_model(&self, new: NewModel) -> StoreResult<Model> {
        let mut tx = self.begin().await?;
        let model = create_model_in(&mut tx, &new).await?;
        super::activation::create_activation_status_in(
            &mut tx,
            &new.activation_key(),
            ActivationStatus::Inactive,
        )
        .await?;
        tx.commit().await?;

        tracing::debug!(
            model_id = %new.model_id,
            tenant_id = %new.tenant_id,
            status = %new.loading_status,
            "Created model"
        );
        Ok(model)
    }

    pub async fn get_model(&self, model_id: &str, tenant_id: &str) -> StoreResult<Model> {
        let row = sqlx::query("SELECT * FROM models WHERE model_id = ? AND tenant_id = ?")
            .bind(model_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;

        model_from_row(&row)
    }

    /// Rows waiting to be claimed, first-created first
    pub async fn list_unloaded_models(&self, tenant_id: &str) -> StoreResult<Vec<Model>> {
        let rows = sqlx::query(
            "SELECT * FROM models WHERE tenant_id = ? AND loading_status = ? ORDER BY id ASC",
        )
        .bind(tenant_id)
        .bind(LoadingStatus::Requested.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(model_from_row).collect()
    }

    async fn transition_model(
        &self,
        model_id: &str,
        tenant_id: &str,
        from: LoadingStatus,
        to: LoadingStatus,
        failure_reason: Option<&str>,
    ) -> StoreResult<()> {
        // Success publishes the model; base models have no such flag.
        let result = sqlx::query(
            "UPDATE models SET \
               loading_status = ?, \
               is_published = CASE WHEN ? = 'SUCCEEDED' THEN 1 ELSE is_published END, \
               loading_failure_reason = COALESCE(?, loading_failure_reason), \
               updated_at = ? \
             WHERE model_id = ? AND tenant_id = ? AND loading_status = ?",
        )
        .bind(to.as_str())
        .bind(to.as_str())
        .bind(failure_reason)
        .bind(Utc::now())
        .bind(model_id)
        .bind(tenant_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ConcurrentUpdate);
        }

        tracing::debug!(model_id = %model_id, from = %from, to = %to, "Model transitioned");
        Ok(())
    }

    /// REQUESTED -> LOADING
    pub async fn update_model_to_loading(&self, model_id: &str, tenant_id: &str) -> StoreResult<()> {
        self.transition_model(
            model_id,
            tenant_id,
            LoadingStatus::Requested,
            LoadingStatus::Loading,
            None,
        )
        .await
    }

    /// LOADING -> SUCCEEDED
    pub async fn update_model_to_succeeded(
        &self,
        model_id: &str,
        tenant_id: &str,
    ) -> StoreResult<()> {
        self.transition_model(
            model_id,
            tenant_id,
            LoadingStatus::Loading,
            LoadingStatus::Succeeded,
            None,
        )
        .await
    }

    /// LOADING -> FAILED
    pub async fn update_model_to_failed(
        &self,
        model_id: &str,
        tenant_id: &str,
        failure_reason: &str,
    ) -> StoreResult<()> {
        self.transition_model(
            model_id,
            tenant_id,
            LoadingStatus::Loading,
            LoadingStatus::Failed,
            Some(failure_reason),
        )
        .await
    }

    pub async fn update_model_status_message(
        &self,
        model_id: &str,
        tenant_id: &str,
        message: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE models SET loading_status_message = ?, updated_at = ? \
             WHERE model_id = ? AND tenant_id = ?",
        )
        .bind(message)
        .bind(Utc::now())
        .bind(model_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Publish a model registered by a trainer, marking it loaded.
    pub async fn publish_model(&self, model_id: &str, tenant_id: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE models SET is_published = 1, loading_status = ?, updated_at = ? \
             WHERE model_id = ? AND tenant_id = ?",
        )
        .bind(LoadingStatus::Succeeded.as_str())
        .bind(Utc::now())
        .bind(model_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
