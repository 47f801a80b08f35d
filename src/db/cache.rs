use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::warn;

use crate::models::{Batch, Meal, MealId};

const MEAL_PREFIX: &str = "meal_";
const CONFLICT_PREFIX: &str = "conflict_meal_";
const BATCH_PREFIX: &str = "meals_";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("Failed to encode cache value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable key/value store for meals, conflict shadows and page snapshots.
///
/// Ordering is only guaranteed per key: a read observes the latest write to
/// the same key. A stored value that fails to decode reads as a miss.
#[derive(Clone)]
pub struct LocalCache {
    pool: SqlitePool,
}

pub(crate) fn meal_key(id: MealId) -> String {
    format!("{}{}", MEAL_PREFIX, id)
}

pub(crate) fn conflict_key(id: MealId) -> String {
    format!("{}{}", CONFLICT_PREFIX, id)
}

pub(crate) fn batch_key(fingerprint: &str) -> String {
    format!("{}{}", BATCH_PREFIX, fingerprint)
}

impl LocalCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: MealId) -> Result<Option<Meal>, CacheError> {
        self.read_json(&meal_key(id)).await
    }

    pub async fn set(&self, id: MealId, meal: &Meal) -> Result<(), CacheError> {
        self.write_json(&meal_key(id), meal).await
    }

    pub async fn remove(&self, id: MealId) -> Result<(), CacheError> {
        self.delete_key(&meal_key(id)).await
    }

    pub async fn get_conflict(&self, id: MealId) -> Result<Option<Meal>, CacheError> {
        self.read_json(&conflict_key(id)).await
    }

    pub async fn set_conflict(&self, id: MealId, meal: &Meal) -> Result<(), CacheError> {
        self.write_json(&conflict_key(id), meal).await
    }

    pub async fn remove_conflict(&self, id: MealId) -> Result<(), CacheError> {
        self.delete_key(&conflict_key(id)).await
    }

    /// Removes the record and its conflict shadow.
    pub async fn purge(&self, id: MealId) -> Result<(), CacheError> {
        self.remove(id).await?;
        self.remove_conflict(id).await
    }

    pub async fn get_batch(&self, fingerprint: &str) -> Result<Option<Batch>, CacheError> {
        self.read_json(&batch_key(fingerprint)).await
    }

    pub async fn set_batch(&self, fingerprint: &str, batch: &Batch) -> Result<(), CacheError> {
        self.write_json(&batch_key(fingerprint), batch).await
    }

    pub async fn contains(&self, id: MealId) -> Result<bool, CacheError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM cache_entries WHERE key = ?")
            .bind(meal_key(id))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM cache_entries ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    /// Every decodable meal record in the cache. Conflict shadows and page
    /// snapshots are not included.
    pub async fn meals(&self) -> Result<Vec<Meal>, CacheError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM cache_entries WHERE key LIKE 'meal\\_%' ESCAPE '\\'")
                .fetch_all(&self.pool)
                .await?;

        let mut meals = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            match serde_json::from_str::<Meal>(&value) {
                Ok(meal) => meals.push(meal),
                Err(e) => warn!(key = %key, error = %e, "Skipping malformed cache entry"),
            }
        }
        Ok(meals)
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some((value,)) = row else {
            return Ok(None);
        };

        match serde_json::from_str(&value) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                warn!(key = %key, error = %e, "Treating malformed cache entry as a miss");
                Ok(None)
            }
        }
    }

    async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let json = serde_json::to_string(value)?;
        self.write_raw(key, &json).await
    }

    pub(crate) async fn write_raw(&self, key: &str, value: &str) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::models::EntityState;
    use chrono::TimeZone;
    use tempfile::TempDir;

    pub(crate) struct TestContext {
        pub cache: LocalCache,
        _temp_dir: TempDir, // Keep alive for duration of test
    }

    pub(crate) async fn setup_cache() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cache.db");
        let pool = init_db(&db_path).await.unwrap();
        TestContext {
            cache: LocalCache::new(pool),
            _temp_dir: temp_dir,
        }
    }

    fn meal(id: MealId, comment: &str) -> Meal {
        Meal::new(comment, Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()).with_id(id)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let ctx = setup_cache().await;
        let cache = &ctx.cache;

        assert!(cache.get(1).await.unwrap().is_none());

        let stored = meal(1, "Oatmeal");
        cache.set(1, &stored).await.unwrap();
        assert_eq!(cache.get(1).await.unwrap(), Some(stored));
        assert!(cache.contains(1).await.unwrap());
        assert!(!cache.contains(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_last_write_wins_per_key() {
        let ctx = setup_cache().await;
        let cache = &ctx.cache;

        cache.set(1, &meal(1, "first")).await.unwrap();
        cache.set(1, &meal(1, "second")).await.unwrap();

        assert_eq!(cache.get(1).await.unwrap().unwrap().comment, "second");
        assert_eq!(cache.keys().await.unwrap(), vec!["meal_1".to_string()]);
    }

    #[tokio::test]
    async fn test_conflict_is_keyed_separately() {
        let ctx = setup_cache().await;
        let cache = &ctx.cache;

        cache.set(3, &meal(3, "mine")).await.unwrap();
        cache.set_conflict(3, &meal(3, "theirs")).await.unwrap();

        assert_eq!(cache.get(3).await.unwrap().unwrap().comment, "mine");
        assert_eq!(
            cache.get_conflict(3).await.unwrap().unwrap().comment,
            "theirs"
        );

        let keys = cache.keys().await.unwrap();
        assert_eq!(keys, vec!["conflict_meal_3".to_string(), "meal_3".to_string()]);

        // Shadows never show up as meals.
        assert_eq!(cache.meals().await.unwrap().len(), 1);

        cache.remove_conflict(3).await.unwrap();
        assert!(cache.get_conflict(3).await.unwrap().is_none());
        assert!(cache.get(3).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_removes_record_and_shadow() {
        let ctx = setup_cache().await;
        let cache = &ctx.cache;

        cache.set(4, &meal(4, "mine")).await.unwrap();
        cache.set_conflict(4, &meal(4, "theirs")).await.unwrap();
        cache.purge(4).await.unwrap();

        assert!(cache.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batches() {
        let ctx = setup_cache().await;
        let cache = &ctx.cache;

        let batch = Batch::new(0, vec![meal(1, "a"), meal(2, "b")], Some("\"e1\"".into()));
        cache.set_batch("abc", &batch).await.unwrap();

        assert_eq!(cache.get_batch("abc").await.unwrap(), Some(batch));
        assert!(cache.get_batch("def").await.unwrap().is_none());
        assert!(cache.meals().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_value_is_a_miss() {
        let ctx = setup_cache().await;
        let cache = &ctx.cache;

        cache.write_raw("meal_9", "{not json").await.unwrap();
        cache.write_raw("meals_xyz", "[]").await.unwrap();
        cache.set(10, &meal(10, "fine")).await.unwrap();

        assert!(cache.get(9).await.unwrap().is_none());
        assert!(cache.get_batch("xyz").await.unwrap().is_none());

        let meals = cache.meals().await.unwrap();
        assert_eq!(meals.len(), 1);
        assert_eq!(meals[0].id, Some(10));
    }

    #[tokio::test]
    async fn test_local_fields_persist() {
        let ctx = setup_cache().await;
        let cache = &ctx.cache;

        let mut pending = meal(-77, "offline");
        pending.entity_state = EntityState::Added;
        cache.set(-77, &pending).await.unwrap();

        let loaded = cache.get(-77).await.unwrap().unwrap();
        assert_eq!(loaded.entity_state, EntityState::Added);
        assert!(loaded.is_temporary());
    }
}
