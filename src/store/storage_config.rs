use sqlx::Row;

use super::{StorageConfig, Store, StoreError, StoreResult, map_insert_error};

impl Store {
    pub async fn get_storage_config(&self, tenant_id: &str) -> StoreResult<StorageConfig> {
        let row = sqlx::query("SELECT tenant_id, path_prefix FROM storage_configs WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;

        Ok(StorageConfig {
            tenant_id: row.try_get("tenant_id")?,
            path_prefix: row.try_get("path_prefix")?,
        })
    }

    pub async fn create_storage_config(&self, config: &StorageConfig) -> StoreResult<()> {
        sqlx::query("INSERT INTO storage_configs (tenant_id, path_prefix) VALUES (?, ?)")
            .bind(&config.tenant_id)
            .bind(&config.path_prefix)
            .execute(&self.pool)
            .await
            .map_err(map_insert_error)?;
        Ok(())
    }
}
