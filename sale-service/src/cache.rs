//! Short-lived memoization of display availability.
//!
//! Entries are advisory. Admission never reads them; every mutation deletes
//! the affected product's entry after commit.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use shared::SaleError;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

pub fn availability_key(product_id: Uuid) -> String {
    format!("product:{product_id}:available_stock")
}

#[async_trait]
pub trait AvailabilityCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<i64>, SaleError>;

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<(), SaleError>;

    async fn delete(&self, key: &str) -> Result<(), SaleError>;
}

#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, (i64, Instant)>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AvailabilityCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<i64>, SaleError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(&(value, expires_at)) if expires_at > Instant::now() => Ok(Some(value)),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<(), SaleError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SaleError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Redis-backed cache shared between service instances.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, SaleError> {
        let client = redis::Client::open(url).map_err(cache_error)?;
        let conn = ConnectionManager::new(client).await.map_err(cache_error)?;
        Ok(Self { conn })
    }
}

fn cache_error(err: redis::RedisError) -> SaleError {
    SaleError::Cache(err.to_string())
}

#[async_trait]
impl AvailabilityCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<i64>, SaleError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(cache_error)
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<(), SaleError> {
        let mut conn = self.conn.clone();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        conn.pset_ex::<_, _, ()>(key, value, millis).await.map_err(cache_error)
    }

    async fn delete(&self, key: &str) -> Result<(), SaleError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(cache_error)
    }
}
