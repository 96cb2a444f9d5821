// PostgreSQL-backed catalog store
//
// Expected schema (search keys unique case-insensitively):
//
//   catalog_labels  (entity_id BIGINT PRIMARY KEY, search_key TEXT NOT NULL,
//                    external_id BIGINT NOT NULL, title TEXT NOT NULL,
//                    weight BIGINT NOT NULL DEFAULT 0)
//   CREATE UNIQUE INDEX ON catalog_labels (lower(search_key));
//   catalog_details (entity_id BIGINT PRIMARY KEY, external_id BIGINT NOT NULL,
//                    title TEXT NOT NULL, developer TEXT NOT NULL DEFAULT '',
//                    publisher TEXT NOT NULL DEFAULT '', genre TEXT NOT NULL DEFAULT '',
//                    release_date INTEGER NOT NULL DEFAULT 0,
//                    verified BOOLEAN NOT NULL DEFAULT FALSE,
//                    manually_modified BOOLEAN NOT NULL DEFAULT FALSE)

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::contracts::{CatalogStore, StoreError, WriteBack};
use crate::types::{DetailRecord, EntityId, ExternalId, LabelRow, NewCatalogEntry, ReleaseDate, SearchKey, Title};

#[derive(Debug, Clone, sqlx::FromRow)]
struct LabelDbRow {
    entity_id: i64,
    search_key: String,
    external_id: i64,
    title: String,
    weight: i64,
}

impl TryFrom<LabelDbRow> for LabelRow {
    type Error = StoreError;

    fn try_from(row: LabelDbRow) -> Result<Self, Self::Error> {
        let invalid = |reason: String| StoreError::Rejected {
            operation: "load_labels",
            reason: format!("entity {}: {reason}", row.entity_id),
        };
        Ok(LabelRow {
            search_key: SearchKey::new(row.search_key.clone()).map_err(|e| invalid(e.to_string()))?,
            entity_id: EntityId(row.entity_id),
            external_id: ExternalId(row.external_id),
            title: Title::new(row.title.clone()).map_err(|e| invalid(e.to_string()))?,
            weight: u64::try_from(row.weight).unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct DetailDbRow {
    entity_id: i64,
    external_id: i64,
    title: String,
    developer: String,
    publisher: String,
    genre: String,
    release_date: i32,
    verified: bool,
    manually_modified: bool,
}

impl TryFrom<DetailDbRow> for DetailRecord {
    type Error = StoreError;

    fn try_from(row: DetailDbRow) -> Result<Self, Self::Error> {
        let title = Title::new(row.title).map_err(|e| StoreError::Rejected {
            operation: "load_details",
            reason: format!("entity {}: {e}", row.entity_id),
        })?;
        let release_date = u32::try_from(row.release_date)
            .ok()
            .and_then(|d| ReleaseDate::new(d).ok())
            .unwrap_or_else(|| {
                warn!(entity_id = row.entity_id, raw = row.release_date, "Ignoring invalid release date");
                ReleaseDate::UNKNOWN
            });
        Ok(DetailRecord {
            entity_id: EntityId(row.entity_id),
            external_id: ExternalId(row.external_id),
            title,
            developer: row.developer,
            publisher: row.publisher,
            genre: row.genre,
            release_date,
            verified: row.verified,
            manually_modified: row.manually_modified,
        })
    }
}

/// Connection errors and timeouts are retryable; constraint violations are not
fn map_sqlx(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
            StoreError::Rejected {
                operation,
                reason: db.message().to_string(),
            }
        }
        other => StoreError::unavailable(operation, other),
    }
}

const DETAIL_COLUMNS: &str = "entity_id, external_id, title, developer, publisher, genre, \
                              release_date, verified, manually_modified";

#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    #[instrument(skip(self))]
    async fn load_labels(&self) -> Result<Vec<LabelRow>, StoreError> {
        let rows = sqlx::query_as::<_, LabelDbRow>(
            "SELECT entity_id, search_key, external_id, title, weight FROM catalog_labels",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("load_labels", e))?;
        rows.into_iter().map(LabelRow::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn load_details(&self) -> Result<Vec<DetailRecord>, StoreError> {
        let rows = sqlx::query_as::<_, DetailDbRow>(&format!("SELECT {DETAIL_COLUMNS} FROM catalog_details"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx("load_details", e))?;
        rows.into_iter().map(DetailRecord::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn get_detail(&self, id: EntityId) -> Result<Option<DetailRecord>, StoreError> {
        let row = sqlx::query_as::<_, DetailDbRow>(&format!(
            "SELECT {DETAIL_COLUMNS} FROM catalog_details WHERE entity_id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("get_detail", e))?;
        row.map(DetailRecord::try_from).transpose()
    }

    #[instrument(skip(self, record), fields(entity_id = %record.entity_id))]
    async fn write_back(&self, record: &DetailRecord, weight: Option<u64>) -> Result<WriteBack, StoreError> {
        let id = record.entity_id.get();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx("write_back", e))?;

        // verified only moves forward; manually_modified is owned by operators
        let result = sqlx::query(
            r#"
            UPDATE catalog_details
               SET developer = $2,
                   publisher = $3,
                   genre = $4,
                   release_date = $5,
                   verified = verified OR $6
             WHERE entity_id = $1
               AND NOT manually_modified
            "#,
        )
        .bind(id)
        .bind(&record.developer)
        .bind(&record.publisher)
        .bind(&record.genre)
        .bind(record.release_date.get() as i32)
        .bind(record.verified)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx("write_back", e))?;

        if result.rows_affected() == 0 {
            let manually_modified = sqlx::query_scalar::<_, bool>(
                "SELECT manually_modified FROM catalog_details WHERE entity_id = $1",
            )
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx("write_back", e))?;

            return match manually_modified {
                Some(true) => Ok(WriteBack::Blocked),
                _ => Err(StoreError::Rejected {
                    operation: "write_back",
                    reason: format!("no detail record for entity {}", record.entity_id),
                }),
            };
        }

        if let Some(weight) = weight {
            let result = sqlx::query("UPDATE catalog_labels SET weight = $2 WHERE entity_id = $1")
                .bind(id)
                .bind(i64::try_from(weight).unwrap_or(i64::MAX))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx("write_back", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Rejected {
                    operation: "write_back",
                    reason: format!("no label for entity {}", record.entity_id),
                });
            }
        }

        // Any early return above drops the transaction and rolls it back
        tx.commit().await.map_err(|e| map_sqlx("write_back", e))?;
        Ok(WriteBack::Applied)
    }

    #[instrument(skip(self))]
    async fn update_weight(&self, id: EntityId, weight: u64) -> Result<(), StoreError> {
        let weight = i64::try_from(weight).unwrap_or(i64::MAX);
        let result = sqlx::query("UPDATE catalog_labels SET weight = $2 WHERE entity_id = $1")
            .bind(id.get())
            .bind(weight)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("update_weight", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Rejected {
                operation: "update_weight",
                reason: format!("no label for entity {id}"),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, entries), fields(count = entries.len()))]
    async fn insert_batch(&self, entries: &[NewCatalogEntry]) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx("insert_batch", e))?;

        for entry in entries {
            let label = &entry.label;
            sqlx::query(
                r#"
                INSERT INTO catalog_labels (entity_id, search_key, external_id, title, weight)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(label.entity_id.get())
            .bind(label.search_key.as_str())
            .bind(label.external_id.get())
            .bind(label.title.as_str())
            .bind(i64::try_from(label.weight).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx("insert_batch", e))?;

            let detail = &entry.detail;
            sqlx::query(
                r#"
                INSERT INTO catalog_details (
                    entity_id, external_id, title, developer, publisher, genre,
                    release_date, verified, manually_modified
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(detail.entity_id.get())
            .bind(detail.external_id.get())
            .bind(detail.title.as_str())
            .bind(&detail.developer)
            .bind(&detail.publisher)
            .bind(&detail.genre)
            .bind(detail.release_date.get() as i32)
            .bind(detail.verified)
            .bind(detail.manually_modified)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx("insert_batch", e))?;
        }

        // Dropping the transaction on any error above rolls it back
        tx.commit().await.map_err(|e| map_sqlx("insert_batch", e))
    }

    #[instrument(skip(self))]
    async fn max_entity_id(&self) -> Result<Option<EntityId>, StoreError> {
        let max = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(entity_id) FROM catalog_details")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx("max_entity_id", e))?;
        Ok(max.map(EntityId))
    }

    #[instrument(skip(self))]
    async fn search_keys(&self) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar::<_, String>("SELECT search_key FROM catalog_labels")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx("search_keys", e))
    }
}
