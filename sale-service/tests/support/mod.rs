#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use sale_service::cache::{availability_key, AvailabilityCache, InMemoryCache};
use sale_service::store::InMemoryStore;
use sale_service::SaleEngine;
use shared::{Hold, ManualClock, Product, SaleError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Wraps the in-process cache and remembers every key it was asked to delete.
#[derive(Default)]
pub struct RecordingCache {
    inner: InMemoryCache,
    deleted: Mutex<Vec<String>>,
}

impl RecordingCache {
    pub fn deletes_for(&self, product_id: Uuid) -> usize {
        let key = availability_key(product_id);
        self.deleted.lock().unwrap().iter().filter(|k| **k == key).count()
    }
}

#[async_trait]
impl AvailabilityCache for RecordingCache {
    async fn get(&self, key: &str) -> Result<Option<i64>, SaleError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<(), SaleError> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), SaleError> {
        self.deleted.lock().unwrap().push(key.to_string());
        self.inner.delete(key).await
    }
}

pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub cache: Arc<RecordingCache>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<SaleEngine<InMemoryStore>>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 29, 12, 0, 0).unwrap()
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(RecordingCache::default());
        let clock = Arc::new(ManualClock::new(start_time()));
        let engine = Arc::new(SaleEngine::new(
            Arc::clone(&store),
            cache.clone(),
            clock.clone(),
            Duration::from_secs(1),
        ));
        Self {
            store,
            cache,
            clock,
            engine,
        }
    }

    pub fn product(&self, stock: i32) -> Product {
        let product = Product::new("Flash Sale Product", "49.99".parse::<BigDecimal>().unwrap(), stock);
        self.store.insert_product(product.clone());
        product
    }

    pub async fn available(&self, product_id: Uuid) -> i64 {
        self.engine.availability.available(product_id).await.unwrap()
    }

    pub async fn hold(&self, product_id: Uuid, quantity: i32) -> Hold {
        self.engine
            .holds
            .create_hold(product_id, quantity, None)
            .await
            .unwrap()
    }
}
