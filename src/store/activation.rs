use sqlx::{Row, SqliteConnection};

use super::{ActivationStatus, ModelKey, Store, StoreError, StoreResult, map_insert_error};

pub(crate) async fn create_activation_status_in(
    conn: &mut SqliteConnection,
    key: &ModelKey,
    status: ActivationStatus,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO model_activation_statuses (model_id, tenant_id, project_id, status) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(&key.model_id)
    .bind(&key.tenant_id)
    .bind(&key.project_id)
    .bind(status.as_str())
    .execute(&mut *conn)
    .await
    .map_err(map_insert_error)?;
    Ok(())
}

pub(crate) async fn delete_activation_status_in(
    conn: &mut SqliteConnection,
    key: &ModelKey,
) -> StoreResult<()> {
    let result = sqlx::query(
        "DELETE FROM model_activation_statuses \
         WHERE model_id = ? AND tenant_id = ? AND project_id = ?",
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
    pub async fn get_activation_status(&self, key: &ModelKey) -> StoreResult<ActivationStatus> {
        let row = sqlx::query(
            "SELECT status FROM model_activation_statuses \
             WHERE model_id = ? AND tenant_id = ? AND project_id = ?",
        )
        .bind(&key.model_id)
        .bind(&key.tenant_id)
        .bind(&key.project_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        row.try_get::<&str, _>("status")?.parse()
    }

    /// Activation is owned by external listing logic; the loader never calls this.
    pub async fn set_activation_status(
        &self,
        key: &ModelKey,
        status: ActivationStatus,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE model_activation_statuses SET status = ? \
             WHERE model_id = ? AND tenant_id = ? AND project_id = ?",
        )
        .bind(status.as_str())
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
