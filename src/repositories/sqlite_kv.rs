use std::time::Duration;

use chrono::Utc;
use diesel::prelude::*;

use crate::{
    models::lead_models::KvEntry,
    repositories::kv_store::{expiry_from, KeyValueStore, StorageError},
    schema::kv_entries,
    DbPool,
};

/// `KeyValueStore` over the `kv_entries` table.
pub struct SqliteKvStore {
    pool: DbPool,
}

impl SqliteKvStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(
        &self,
    ) -> Result<diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<SqliteConnection>>, StorageError>
    {
        self.pool
            .get()
            .map_err(|e| StorageError::Pool(e.to_string()))
    }
}

impl KeyValueStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.conn()?;
        let entry = kv_entries::table
            .find(key)
            .first::<KvEntry>(&mut conn)
            .optional()?;

        match entry {
            Some(entry) => {
                let now = Utc::now().timestamp();
                if entry.expires_at.is_some_and(|at| at <= now) {
                    diesel::delete(kv_entries::table.find(key)).execute(&mut conn)?;
                    Ok(None)
                } else {
                    Ok(Some(entry.value))
                }
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let entry = KvEntry {
            key: key.to_string(),
            value: value.to_string(),
            expires_at: expiry_from(Utc::now(), ttl).map(|at| at.timestamp()),
        };
        diesel::replace_into(kv_entries::table)
            .values(&entry)
            .execute(&mut conn)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        diesel::delete(kv_entries::table.find(key)).execute(&mut conn)?;
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize, StorageError> {
        let mut conn = self.conn()?;
        let now = Utc::now().timestamp();
        let purged = diesel::delete(
            kv_entries::table
                .filter(kv_entries::expires_at.is_not_null())
                .filter(kv_entries::expires_at.le(now)),
        )
        .execute(&mut conn)?;
        Ok(purged)
    }
}
