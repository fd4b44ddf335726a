use chrono::Duration;
use shared::{
    Clock, Hold, SaleError, DEFAULT_HOLD_TTL_SECONDS, MAX_HOLD_TTL_SECONDS, MIN_HOLD_TTL_SECONDS,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::availability::{available_in, Availability};
use crate::store::Store;

pub struct HoldManager<S> {
    store: Arc<S>,
    availability: Arc<Availability<S>>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> HoldManager<S> {
    pub fn new(store: Arc<S>, availability: Arc<Availability<S>>, clock: Arc<dyn Clock>) -> Self {
        Self { store, availability, clock }
    }

    /// Reserves `quantity` units of a product for `ttl_seconds` (default 120).
    ///
    /// The product row stays locked from the availability read through the
    /// insert, so concurrent admissions for one product are totally ordered.
    pub async fn create_hold(
        &self,
        product_id: Uuid,
        quantity: i32,
        ttl_seconds: Option<i64>,
    ) -> Result<Hold, SaleError> {
        if quantity < 1 {
            return Err(SaleError::Validation("quantity must be at least 1".to_string()));
        }
        let ttl = hold_ttl(ttl_seconds)?;
        let clock = Arc::clone(&self.clock);

        let result = self
            .store
            .transaction(move |tx| {
                Box::pin(async move {
                    let product = tx
                        .lock_product(product_id)
                        .await?
                        .ok_or(SaleError::ProductNotFound(product_id))?;

                    let now = clock.now();
                    let available = available_in(tx, &product, now).await?;
                    if available < i64::from(quantity) {
                        return Err(SaleError::InsufficientStock {
                            requested: quantity,
                            available,
                        });
                    }

                    let hold = Hold::new(product_id, quantity, ttl, now);
                    tx.insert_hold(&hold).await?;
                    Ok(hold)
                })
            })
            .await;

        match result {
            Ok(hold) => {
                self.availability.invalidate(product_id).await;
                info!(
                    "Hold {} created for product {} (quantity {}, expires {})",
                    hold.id, product_id, quantity, hold.expires_at
                );
                Ok(hold)
            }
            Err(e @ SaleError::InsufficientStock { .. }) => {
                warn!("Hold rejected for product {}: {}", product_id, e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

fn hold_ttl(ttl_seconds: Option<i64>) -> Result<Duration, SaleError> {
    let seconds = ttl_seconds.unwrap_or(DEFAULT_HOLD_TTL_SECONDS);
    if !(MIN_HOLD_TTL_SECONDS..=MAX_HOLD_TTL_SECONDS).contains(&seconds) {
        return Err(SaleError::Validation(format!(
            "ttl_seconds must be between {MIN_HOLD_TTL_SECONDS} and {MAX_HOLD_TTL_SECONDS}"
        )));
    }
    Ok(Duration::seconds(seconds))
}
