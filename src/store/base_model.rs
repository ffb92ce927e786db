use chrono::Utc;
use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::records::{decode_formats, encode_formats};
use crate::identity::{self, ListedModel};
use super::{
    ActivationStatus, BaseModel, LoadingStatus, ModelFormat, ModelKey, SourceRepository, Store,
    StoreError, StoreResult, map_insert_error,
};

/// Fields of a base model row to insert
#[derive(Debug, Clone)]
pub struct NewBaseModel {
    pub key: ModelKey,
    pub path: String,
    pub formats: Vec<ModelFormat>,
    pub gguf_model_path: String,
    pub source_repository: SourceRepository,
    pub loading_status: LoadingStatus,
}

impl NewBaseModel {
    /// A row waiting to be claimed by a loader
    pub fn requested(key: ModelKey, source_repository: SourceRepository) -> Self {
        Self {
            key,
            path: String::new(),
            formats: Vec::new(),
            gguf_model_path: String::new(),
            source_repository,
            loading_status: LoadingStatus::Requested,
        }
    }
}

/// Artifact location written when a load succeeds
#[derive(Debug, Clone)]
pub struct SucceededFields {
    pub path: String,
    pub formats: Vec<ModelFormat>,
    pub gguf_model_path: String,
}

#[derive(Default)]
struct Transition<'a> {
    path: Option<&'a str>,
    formats: Option<String>,
    gguf_model_path: Option<&'a str>,
    failure_reason: Option<&'a str>,
}

fn base_model_from_row(row: &SqliteRow) -> StoreResult<BaseModel> {
    Ok(BaseModel {
        id: row.try_get("id")?,
        model_id: row.try_get("model_id")?,
        tenant_id: row.try_get("tenant_id")?,
        project_id: row.try_get("project_id")?,
        path: row.try_get("path")?,
        formats: decode_formats(row.try_get("formats")?)?,
        gguf_model_path: row.try_get("gguf_model_path")?,
        source_repository: row.try_get::<&str, _>("source_repository")?.parse()?,
        loading_status: row.try_get::<&str, _>("loading_status")?.parse()?,
        loading_failure_reason: row.try_get("loading_failure_reason")?,
        loading_status_message: row.try_get("loading_status_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn base_models_from_rows(rows: &[SqliteRow]) -> StoreResult<Vec<BaseModel>> {
    rows.iter().map(base_model_from_row).collect()
}

/// Insert a base model row on an open connection or transaction
pub(crate) async fn create_base_model_in(
    conn: &mut SqliteConnection,
    new: &NewBaseModel,
) -> StoreResult<BaseModel> {
    let now = Utc::now();
    let row = sqlx::query(
        "INSERT INTO base_models \
         (model_id, tenant_id, project_id, path, formats, gguf_model_path, \
          source_repository, loading_status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(&new.key.model_id)
    .bind(&new.key.tenant_id)
    .bind(&new.key.project_id)
    .bind(&new.path)
    .bind(encode_formats(&new.formats)?)
    .bind(&new.gguf_model_path)
    .bind(new.source_repository.as_str())
    .bind(new.loading_status.as_str())
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_insert_error)?;

    base_model_from_row(&row)
}

pub(crate) async fn delete_base_model_in(
    conn: &mut SqliteConnection,
    key: &ModelKey,
) -> StoreResult<()> {
    let result = sqlx::query(
        "DELETE FROM base_models WHERE model_id = ? AND tenant_id = ? AND project_id = ?",
    )
    .bind(&key.model_id)
    .bind(&key.tenant_id)
    .bind(&key.project_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

impl Store {
    /// Create a base model together with its INACTIVE activation row.
    pub async fn create_base_model(&self, new: NewBaseModel) -> StoreResult<BaseModel> {
        let mut tx = self.begin().await?;
        let model = create_base_model_in(&mut tx, &new).await?;
        super::activation::create_activation_status_in(
            &mut tx,
            &new.key,
            ActivationStatus::Inactive,
        )
        .await?;
        tx.commit().await?;

        tracing::debug!(key = %new.key, status = %new.loading_status, "Created base model");
        Ok(model)
    }

    /// Delete a base model row and its activation row in one transaction.
    /// A missing activation row is tolerated.
    pub async fn delete_base_model(&self, key: &ModelKey) -> StoreResult<()> {
        let mut tx = self.begin().await?;
        delete_base_model_in(&mut tx, key).await?;
        match super::activation::delete_activation_status_in(&mut tx, key).await {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => return Err(e),
        }
        tx.commit().await?;
        Ok(())
    }

    /// Like [`Store::delete_base_model`], also dropping Hugging Face repo
    /// markers that point at the model so a later request downloads again.
    pub async fn delete_base_model_and_repos(&self, key: &ModelKey) -> StoreResult<()> {
        let mut tx = self.begin().await?;
        delete_base_model_in(&mut tx, key).await?;
        match super::activation::delete_activation_status_in(&mut tx, key).await {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => return Err(e),
        }
        let repos = super::hf_model_repo::delete_hf_model_repos_by_model_id_in(
            &mut tx,
            &key.model_id,
            &key.tenant_id,
            &key.project_id,
        )
        .await?;
        tx.commit().await?;

        tracing::debug!(key = %key, repos, "Deleted base model");
        Ok(())
    }

    pub async fn get_base_model(&self, key: &ModelKey) -> StoreResult<BaseModel> {
        let row = sqlx::query(
            "SELECT * FROM base_models WHERE model_id = ? AND tenant_id = ? AND project_id = ?",
        )
        .bind(&key.model_id)
        .bind(&key.tenant_id)
        .bind(&key.project_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        base_model_from_row(&row)
    }

    /// All scoped copies of one model ID, oldest first
    pub async fn list_base_models_by_model_id(
        &self,
        model_id: &str,
        tenant_id: &str,
    ) -> StoreResult<Vec<BaseModel>> {
        let rows = sqlx::query(
            "SELECT * FROM base_models WHERE model_id = ? AND tenant_id = ? ORDER BY id ASC",
        )
        .bind(model_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        base_models_from_rows(&rows)
    }

    pub async fn list_base_models(&self, tenant_id: &str) -> StoreResult<Vec<BaseModel>> {
        let rows = sqlx::query("SELECT * FROM base_models WHERE tenant_id = ? ORDER BY id ASC")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;

        base_models_from_rows(&rows)
    }

    /// Rows waiting to be claimed, first-created first
    pub async fn list_unloaded_base_models(&self, tenant_id: &str) -> StoreResult<Vec<BaseModel>> {
        self.list_base_models_by_status(tenant_id, LoadingStatus::Requested)
            .await
    }

    pub async fn list_loading_base_models(&self, tenant_id: &str) -> StoreResult<Vec<BaseModel>> {
        self.list_base_models_by_status(tenant_id, LoadingStatus::Loading)
            .await
    }

    async fn list_base_models_by_status(
        &self,
        tenant_id: &str,
        status: LoadingStatus,
    ) -> StoreResult<Vec<BaseModel>> {
        let rows = sqlx::query(
            "SELECT * FROM base_models WHERE tenant_id = ? AND loading_status = ? ORDER BY id ASC",
        )
        .bind(tenant_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        base_models_from_rows(&rows)
    }

    /// Loaded rows ordered by model ID, each with its scope's activation
    /// status. A row is visible to `project_id` when it is global or belongs
    /// to that project; with no project every scope is visible.
    ///
    /// Reading stops once `max_visible` IDs resolve to a copy whose activation
    /// matches `activation`. Only whole ID groups are returned.
    pub async fn list_loaded_base_models_after(
        &self,
        tenant_id: &str,
        project_id: Option<&str>,
        activation: Option<ActivationStatus>,
        after: Option<&str>,
        max_visible: usize,
    ) -> StoreResult<Vec<ListedModel>> {
        let mut stream = sqlx::query(
            "SELECT b.*, COALESCE(a.status, 'INACTIVE') AS activation_status \
             FROM base_models b \
             LEFT JOIN model_activation_statuses a \
               ON a.model_id = b.model_id AND a.tenant_id = b.tenant_id \
              AND a.project_id = b.project_id \
             WHERE b.tenant_id = ?1 AND b.loading_status = 'SUCCEEDED' \
               AND (?2 IS NULL OR b.project_id = '' OR b.project_id = ?2) \
               AND (?3 IS NULL OR b.model_id > ?3) \
             ORDER BY b.model_id ASC, b.id ASC",
        )
        .bind(tenant_id)
        .bind(project_id)
        .bind(after)
        .fetch(&self.pool);

        let mut rows: Vec<ListedModel> = Vec::new();
        let mut group_start = 0usize;
        let mut visible = 0usize;
        while let Some(row) = stream.try_next().await? {
            let listed = ListedModel {
                model: base_model_from_row(&row)?,
                activation: row.try_get::<&str, _>("activation_status")?.parse()?,
            };
            let is_new_id = rows
                .last()
                .is_some_and(|prev| prev.model.model_id != listed.model.model_id);
            if is_new_id {
                let group = &rows[group_start..];
                if identity::resolve_listed(group, project_id, activation).is_some() {
                    visible += 1;
                    if visible == max_visible {
                        break;
                    }
                }
                group_start = rows.len();
            }
            rows.push(listed);
        }

        Ok(rows)
    }

    async fn transition_base_model(
        &self,
        key: &ModelKey,
        from: LoadingStatus,
        to: LoadingStatus,
        fields: Transition<'_>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE base_models SET \
               loading_status = ?, \
               path = COALESCE(?, path), \
               formats = COALESCE(?, formats), \
               gguf_model_path = COALESCE(?, gguf_model_path), \
               loading_failure_reason = COALESCE(?, loading_failure_reason), \
               updated_at = ? \
             WHERE model_id = ? AND tenant_id = ? AND project_id = ? AND loading_status = ?",
        )
        .bind(to.as_str())
        .bind(fields.path)
        .bind(fields.formats)
        .bind(fields.gguf_model_path)
        .bind(fields.failure_reason)
        .bind(Utc::now())
        .bind(&key.model_id)
        .bind(&key.tenant_id)
        .bind(&key.project_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ConcurrentUpdate);
        }

        tracing::debug!(key = %key, from = %from, to = %to, "Base model transitioned");
        Ok(())
    }

    /// REQUESTED -> LOADING
    pub async fn update_base_model_to_loading(&self, key: &ModelKey) -> StoreResult<()> {
        self.transition_base_model(
            key,
            LoadingStatus::Requested,
            LoadingStatus::Loading,
            Transition::default(),
        )
        .await
    }

    /// LOADING -> SUCCEEDED, recording where the artifact landed
    pub async fn update_base_model_to_succeeded(
        &self,
        key: &ModelKey,
        fields: &SucceededFields,
    ) -> StoreResult<()> {
        self.transition_base_model(
            key,
            LoadingStatus::Loading,
            LoadingStatus::Succeeded,
            Transition {
                path: Some(&fields.path),
                formats: Some(encode_formats(&fields.formats)?),
                gguf_model_path: Some(&fields.gguf_model_path),
                failure_reason: None,
            },
        )
        .await
    }

    /// LOADING -> FAILED
    pub async fn update_base_model_to_failed(
        &self,
        key: &ModelKey,
        failure_reason: &str,
    ) -> StoreResult<()> {
        self.transition_base_model(
            key,
            LoadingStatus::Loading,
            LoadingStatus::Failed,
            Transition {
                failure_reason: Some(failure_reason),
                ..Default::default()
            },
        )
        .await
    }

    /// Overwrite the free-text progress message. Never touches the status.
    pub async fn update_base_model_status_message(
        &self,
        key: &ModelKey,
        message: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE base_models SET loading_status_message = ?, updated_at = ? \
             WHERE model_id = ? AND tenant_id = ? AND project_id = ?",
        )
        .bind(message)
        .bind(Utc::now())
        .bind(&key.model_id)
        .bind(&key.tenant_id)
        .bind(&key.project_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
