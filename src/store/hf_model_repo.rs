use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{HfModelRepo, Store, StoreError, StoreResult, map_insert_error};

fn repo_from_row(row: &SqliteRow) -> StoreResult<HfModelRepo> {
    Ok(HfModelRepo {
        name: row.try_get("name")?,
        model_id: row.try_get("model_id")?,
        tenant_id: row.try_get("tenant_id")?,
        project_id: row.try_get("project_id")?,
    })
}

/// Removes repo markers pointing at `model_id`. Absence is not an error.
pub(crate) async fn delete_hf_model_repos_by_model_id_in(
    conn: &mut SqliteConnection,
    model_id: &str,
    tenant_id: &str,
    project_id: &str,
) -> StoreResult<u64> {
    let result = sqlx::query(
        "DELETE FROM hf_model_repos WHERE model_id = ? AND tenant_id = ? AND project_id = ?",
    )
    .bind(model_id)
    .bind(tenant_id)
    .bind(project_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

impl Store {
    pub async fn create_hf_model_repo(&self, repo: &HfModelRepo) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO hf_model_repos (name, model_id, tenant_id, project_id) VALUES (?, ?, ?, ?)",
        )
        .bind(&repo.name)
        .bind(&repo.model_id)
        .bind(&repo.tenant_id)
        .bind(&repo.project_id)
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;

        tracing::debug!(name = %repo.name, tenant_id = %repo.tenant_id, "Recorded Hugging Face repo");
        Ok(())
    }

    pub async fn get_hf_model_repo(
        &self,
        name: &str,
        tenant_id: &str,
        project_id: &str,
    ) -> StoreResult<HfModelRepo> {
        let row = sqlx::query(
            "SELECT * FROM hf_model_repos WHERE name = ? AND tenant_id = ? AND project_id = ?",
        )
        .bind(name)
        .bind(tenant_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        repo_from_row(&row)
    }
}
