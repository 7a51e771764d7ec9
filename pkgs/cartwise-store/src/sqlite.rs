//! SQLite backend - durable cache entries stored through Sea-ORM

use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Set,
};
use sea_orm_migration::MigratorTrait;
use tracing::{debug, info};

use crate::backend::CacheBackend;
use crate::entities::cache_entries;
use crate::error::StoreError;
use crate::CacheConfig;

/// Cache backend persisted in a SQLite database
pub struct SqliteBackend {
    db: DatabaseConnection,
}

impl SqliteBackend {
    /// Open (or create) the database at `config.db_path` and run migrations
    pub async fn open(config: &CacheConfig) -> Result<Self, StoreError> {
        let db_path_str = config
            .db_path
            .to_str()
            .ok_or_else(|| StoreError::InvalidPath(config.db_path.display().to_string()))?
            .replace('\\', "/");

        let db_url = format!("sqlite:{}?mode=rwc", db_path_str);
        let db = Database::connect(db_url.as_str()).await?;

        let backend = Self::with_connection(db).await?;
        info!("Cache store initialized at {}", config.db_path.display());
        Ok(backend)
    }

    /// Use an existing database connection, running migrations on it
    pub async fn with_connection(db: DatabaseConnection) -> Result<Self, StoreError> {
        crate::migration::Migrator::up(&db, None).await?;
        Ok(Self { db })
    }

    /// Underlying connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl CacheBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let result = cache_entries::Entity::find_by_id(key.to_string())
            .one(&self.db)
            .await?;

        Ok(result.map(|model| model.value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        debug!("Writing cache key: {}", key);

        let entry = cache_entries::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
            updated_at: Set(chrono::Utc::now().timestamp_millis()),
        };

        cache_entries::Entity::insert(entry)
            .on_conflict(
                OnConflict::column(cache_entries::Column::Key)
                    .update_columns([
                        cache_entries::Column::Value,
                        cache_entries::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        debug!("Removing cache key: {}", key);

        let result = cache_entries::Entity::delete_many()
            .filter(cache_entries::Column::Key.eq(key))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let keys: Vec<String> = cache_entries::Entity::find()
            .select_only()
            .column(cache_entries::Column::Key)
            .order_by_asc(cache_entries::Column::Key)
            .into_tuple()
            .all(&self.db)
            .await?;

        Ok(keys)
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        info!("Clearing all cache entries");

        let result = cache_entries::Entity::delete_many().exec(&self.db).await?;
        Ok(result.rows_affected)
    }
}
