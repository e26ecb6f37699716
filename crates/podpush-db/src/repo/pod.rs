//! Pods and pod versions.

use async_trait::async_trait;
use podpush_core::{PodVersionInfo, Registry, ResourceId};
use sqlx::PgPool;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
struct PodVersionRow {
    id: uuid::Uuid,
    pod_name: String,
    version: String,
    url: String,
    specification_data: String,
    published: bool,
}

impl From<PodVersionRow> for PodVersionInfo {
    fn from(row: PodVersionRow) -> Self {
        Self {
            id: row.id.into(),
            pod_name: row.pod_name,
            version: row.version,
            url: row.url,
            document_payload: row.specification_data,
            published: row.published,
        }
    }
}

/// PostgreSQL implementation of Registry.
#[derive(Clone)]
pub struct PgRegistry {
    pool: PgPool,
}

impl PgRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a validated version, creating the pod on first sight.
    pub async fn register(
        &self,
        pod_name: &str,
        version: &str,
        url: &str,
        specification_data: &str,
    ) -> DbResult<PodVersionInfo> {
        let mut tx = self.pool.begin().await?;

        let pod_id: uuid::Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO pods (id, name, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (name) DO UPDATE SET updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(pod_name)
        .fetch_one(&mut *tx)
        .await?;

        let version_id: uuid::Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO pod_versions (id, pod_id, name, url, specification_data, published, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, FALSE, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(pod_id)
        .bind(version)
        .bind(url)
        .bind(specification_data)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            let exists = e
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation());
            if exists {
                DbError::Duplicate(format!("{} {}", pod_name, version))
            } else {
                DbError::Database(e)
            }
        })?;

        tx.commit().await?;

        Ok(PodVersionInfo {
            id: version_id.into(),
            pod_name: pod_name.to_string(),
            version: version.to_string(),
            url: url.to_string(),
            document_payload: specification_data.to_string(),
            published: false,
        })
    }

    async fn fetch(&self, id: ResourceId) -> DbResult<PodVersionInfo> {
        let row = sqlx::query_as::<_, PodVersionRow>(
            r#"
            SELECT pv.id, p.name AS pod_name, pv.name AS version, pv.url,
                   pv.specification_data, pv.published
            FROM pod_versions pv
            JOIN pods p ON p.id = pv.pod_id
            WHERE pv.id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("pod version {}", id)))?;
        Ok(row.into())
    }
}

#[async_trait]
impl Registry for PgRegistry {
    async fn pod_version(&self, id: ResourceId) -> podpush_core::Result<PodVersionInfo> {
        Ok(self.fetch(id).await?)
    }
}
