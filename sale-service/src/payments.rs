use shared::{
    validate_idempotency_key, Clock, OrderStatus, PaymentOutcome, PaymentWebhookRecord, SaleError, UniqueKey,
    WebhookResult,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::availability::Availability;
use crate::store::Store;

/// One payment notification as delivered by the notifier.
#[derive(Debug, Clone)]
pub struct PaymentNotice {
    pub order_id: Uuid,
    pub outcome: PaymentOutcome,
    pub idempotency_key: String,
    pub payment_id: Option<String>,
}

enum Settlement {
    Applied { product_id: Uuid, status: OrderStatus },
    /// Recorded, but the order was already terminal.
    Ignored(OrderStatus),
    Duplicate,
}

pub struct PaymentSettlement<S> {
    store: Arc<S>,
    availability: Arc<Availability<S>>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> PaymentSettlement<S> {
    pub fn new(store: Arc<S>, availability: Arc<Availability<S>>, clock: Arc<dyn Clock>) -> Self {
        Self { store, availability, clock }
    }

    /// Applies a payment outcome to a pending order exactly once per delivery key.
    ///
    /// The status transition, the hold release on failure and the dedup
    /// record commit together or not at all.
    pub async fn handle_webhook(&self, notice: PaymentNotice) -> Result<WebhookResult, SaleError> {
        validate_idempotency_key(&notice.idempotency_key)?;
        if let Some(payment_id) = &notice.payment_id {
            if payment_id.trim().is_empty() {
                return Err(SaleError::Validation("payment_id must not be empty".to_string()));
            }
        }

        let clock = Arc::clone(&self.clock);
        let PaymentNotice {
            order_id,
            outcome,
            idempotency_key,
            payment_id,
        } = notice.clone();

        let result = self
            .store
            .transaction(move |tx| {
                Box::pin(async move {
                    if tx.find_webhook_by_key(&idempotency_key).await?.is_some() {
                        return Ok(Settlement::Duplicate);
                    }

                    let order = tx
                        .lock_order(order_id)
                        .await?
                        .ok_or(SaleError::OrderNotFound(order_id))?;

                    // Concurrent delivery of the same key may have committed while we waited.
                    if tx.find_webhook_by_key(&idempotency_key).await?.is_some() {
                        return Ok(Settlement::Duplicate);
                    }

                    let now = clock.now();
                    let record = PaymentWebhookRecord::new(order_id, outcome, idempotency_key, now);

                    if order.status.is_terminal() {
                        tx.insert_webhook(&record).await?;
                        return Ok(Settlement::Ignored(order.status));
                    }

                    let settled = outcome.settle(order.status)?;
                    let moved = tx
                        .transition_order(order_id, order.status, settled, payment_id, now)
                        .await?;
                    if moved != 1 {
                        return Err(SaleError::InvalidTransition {
                            entity: "order",
                            from: order.status.as_str(),
                            to: settled.as_str(),
                        });
                    }

                    if outcome == PaymentOutcome::Failure {
                        if let Some(hold_id) = order.hold_id {
                            if let Some(hold) = tx.lock_hold(hold_id).await? {
                                let released = hold.status.release()?;
                                tx.transition_hold(hold_id, hold.status, released, now).await?;
                            }
                        }
                    }

                    tx.insert_webhook(&record).await?;
                    Ok(Settlement::Applied {
                        product_id: order.product_id,
                        status: settled,
                    })
                })
            })
            .await;

        match result {
            Ok(Settlement::Applied { product_id, status }) => {
                self.availability.invalidate(product_id).await;
                info!(
                    "Payment {} applied to order {}: now {}",
                    outcome.as_str(),
                    order_id,
                    status
                );
                Ok(WebhookResult::Processed)
            }
            Ok(Settlement::Ignored(status)) => {
                warn!(
                    "Payment {} for order {} recorded without effect: order already {}",
                    outcome.as_str(),
                    order_id,
                    status
                );
                Ok(WebhookResult::AlreadyProcessed)
            }
            Ok(Settlement::Duplicate) | Err(SaleError::DuplicateKey(UniqueKey::WebhookIdempotencyKey)) => {
                info!("Webhook {} already processed", notice.idempotency_key);
                Ok(WebhookResult::AlreadyProcessed)
            }
            Err(SaleError::DuplicateKey(UniqueKey::OrderPaymentId)) => Err(SaleError::PaymentIdInUse(
                notice.payment_id.unwrap_or_default(),
            )),
            Err(e) => Err(e),
        }
    }
}
