use chrono::{DateTime, Utc};
use shared::{Clock, Product, SaleError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{availability_key, AvailabilityCache};
use crate::store::{Store, UnitOfWork};

/// `max(0, stock - live holds - pending and completed orders)` as seen by `tx`.
///
/// Admission calls this with the product row locked; display calls it
/// without a lock and may observe a transient overshoot, which clamps to 0.
pub async fn available_in(
    tx: &mut dyn UnitOfWork,
    product: &Product,
    as_of: DateTime<Utc>,
) -> Result<i64, SaleError> {
    let held = tx.live_hold_quantity(product.id, as_of).await?;
    let ordered = tx.order_demand_quantity(product.id).await?;
    Ok((i64::from(product.stock) - held - ordered).max(0))
}

pub struct Availability<S> {
    store: Arc<S>,
    cache: Arc<dyn AvailabilityCache>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl<S: Store> Availability<S> {
    pub fn new(store: Arc<S>, cache: Arc<dyn AvailabilityCache>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, cache, clock, ttl }
    }

    /// Uncached availability, computed in its own read-only unit of work.
    pub async fn available(&self, product_id: Uuid) -> Result<i64, SaleError> {
        let (_, available) = self.compute(product_id).await?;
        Ok(available)
    }

    /// Product plus display availability, served from the cache when fresh.
    pub async fn product(&self, product_id: Uuid) -> Result<(Product, i64), SaleError> {
        let key = availability_key(product_id);
        let cached = match self.cache.get(&key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Availability cache read failed for {}: {}", product_id, e);
                None
            }
        };

        if let Some(available) = cached {
            let product = self.load_product(product_id).await?;
            return Ok((product, available));
        }

        let (product, available) = self.compute(product_id).await?;
        if let Err(e) = self.cache.set(&key, available, self.ttl).await {
            warn!("Availability cache write failed for {}: {}", product_id, e);
        }
        Ok((product, available))
    }

    /// Drops the cached entry for `product_id`. Called after every committed mutation.
    pub async fn invalidate(&self, product_id: Uuid) {
        match self.cache.delete(&availability_key(product_id)).await {
            Ok(()) => debug!("Invalidated availability for product {}", product_id),
            Err(e) => warn!("Availability cache invalidation failed for {}: {}", product_id, e),
        }
    }

    async fn load_product(&self, product_id: Uuid) -> Result<Product, SaleError> {
        self.store
            .transaction(move |tx| {
                Box::pin(async move {
                    tx.find_product(product_id)
                        .await?
                        .ok_or(SaleError::ProductNotFound(product_id))
                })
            })
            .await
    }

    async fn compute(&self, product_id: Uuid) -> Result<(Product, i64), SaleError> {
        let as_of = self.clock.now();
        self.store
            .transaction(move |tx| {
                Box::pin(async move {
                    let product = tx
                        .find_product(product_id)
                        .await?
                        .ok_or(SaleError::ProductNotFound(product_id))?;
                    let available = available_in(tx, &product, as_of).await?;
                    Ok((product, available))
                })
            })
            .await
    }
}
