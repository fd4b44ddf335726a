use shared::{validate_idempotency_key, Clock, HoldStatus, Order, SaleError, UniqueKey};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::availability::Availability;
use crate::store::Store;

enum Conversion {
    Created(Order),
    Replayed(Order),
}

pub struct OrderWorkflow<S> {
    store: Arc<S>,
    availability: Arc<Availability<S>>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> OrderWorkflow<S> {
    pub fn new(store: Arc<S>, availability: Arc<Availability<S>>, clock: Arc<dyn Clock>) -> Self {
        Self { store, availability, clock }
    }

    /// Turns a live hold into a pending order, once per idempotency key.
    ///
    /// A key that already names an order returns that order untouched,
    /// whatever state its hold is in now.
    pub async fn create_order(&self, hold_id: Uuid, idempotency_key: String) -> Result<Order, SaleError> {
        validate_idempotency_key(&idempotency_key)?;
        let clock = Arc::clone(&self.clock);
        let key = idempotency_key.clone();

        let result = self
            .store
            .transaction(move |tx| {
                Box::pin(async move {
                    if let Some(existing) = tx.find_order_by_key(&key).await? {
                        return Ok(Conversion::Replayed(existing));
                    }

                    let hold = tx
                        .lock_hold(hold_id)
                        .await?
                        .ok_or(SaleError::HoldNotFound(hold_id))?;

                    // A caller holding the same key may have committed while we waited for the lock.
                    if let Some(existing) = tx.find_order_by_key(&key).await? {
                        return Ok(Conversion::Replayed(existing));
                    }

                    let now = clock.now();
                    if !hold.is_live(now) {
                        return Err(SaleError::HoldExpiredOrInvalid(hold_id));
                    }
                    let consumed = hold.status.consume()?;

                    let moved = tx
                        .transition_hold(hold_id, HoldStatus::Active, consumed, now)
                        .await?;
                    if moved != 1 {
                        return Err(SaleError::HoldExpiredOrInvalid(hold_id));
                    }

                    let order = Order::from_hold(&hold, key, now);
                    tx.insert_order(&order).await?;
                    Ok(Conversion::Created(order))
                })
            })
            .await;

        match result {
            Ok(Conversion::Created(order)) => {
                self.availability.invalidate(order.product_id).await;
                info!(
                    "Order {} created from hold {} (product {}, quantity {})",
                    order.id, hold_id, order.product_id, order.quantity
                );
                Ok(order)
            }
            Ok(Conversion::Replayed(order)) => {
                info!("Order {} replayed for idempotency key {}", order.id, idempotency_key);
                Ok(order)
            }
            Err(SaleError::DuplicateKey(UniqueKey::OrderIdempotencyKey)) => {
                // Lost the insert race on this key; the winner's order is committed now.
                self.find_by_key(idempotency_key).await
            }
            Err(e @ SaleError::HoldExpiredOrInvalid(_)) => {
                warn!("Order rejected: {}", e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn find_by_key(&self, idempotency_key: String) -> Result<Order, SaleError> {
        self.store
            .transaction(move |tx| {
                Box::pin(async move {
                    tx.find_order_by_key(&idempotency_key).await?.ok_or_else(|| {
                        SaleError::Store(format!(
                            "order for idempotency key {idempotency_key} vanished after a key conflict"
                        ))
                    })
                })
            })
            .await
    }
}
