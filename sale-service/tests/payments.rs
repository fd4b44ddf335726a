mod support;

use futures::future::join_all;
use sale_service::payments::PaymentNotice;
use shared::{ErrorKind, HoldStatus, Order, OrderStatus, PaymentOutcome, SaleError, WebhookResult};
use std::sync::Arc;
use support::{start_time, Fixture};
use uuid::Uuid;

fn notice(order_id: Uuid, outcome: PaymentOutcome, key: &str) -> PaymentNotice {
    PaymentNotice {
        order_id,
        outcome,
        idempotency_key: key.to_string(),
        payment_id: None,
    }
}

async fn pending_order(f: &Fixture, product_id: Uuid, quantity: i32, key: &str) -> Order {
    let hold = f.hold(product_id, quantity).await;
    f.engine.orders.create_order(hold.id, key.to_string()).await.unwrap()
}

#[tokio::test]
async fn success_completes_the_order() {
    let f = Fixture::new();
    let product = f.product(10);
    let order = pending_order(&f, product.id, 2, "o-1").await;

    let result = f
        .engine
        .payments
        .handle_webhook(notice(order.id, PaymentOutcome::Success, "w-1"))
        .await
        .unwrap();

    assert_eq!(result, WebhookResult::Processed);
    assert_eq!(f.store.order(order.id).unwrap().status, OrderStatus::Completed);
    assert_eq!(f.store.webhooks().len(), 1);
    assert_eq!(f.available(product.id).await, 8);
}

#[tokio::test]
async fn redelivery_is_acknowledged_without_effect() {
    let f = Fixture::new();
    let product = f.product(10);
    let order = pending_order(&f, product.id, 1, "o-1").await;

    let first = f
        .engine
        .payments
        .handle_webhook(notice(order.id, PaymentOutcome::Success, "w-1"))
        .await
        .unwrap();
    let deletes_after_first = f.cache.deletes_for(product.id);
    assert_eq!(deletes_after_first, 3);
    let second = f
        .engine
        .payments
        .handle_webhook(notice(order.id, PaymentOutcome::Failure, "w-1"))
        .await
        .unwrap();

    assert_eq!(first, WebhookResult::Processed);
    assert_eq!(second, WebhookResult::AlreadyProcessed);
    assert_eq!(f.store.order(order.id).unwrap().status, OrderStatus::Completed);
    assert_eq!(f.store.webhooks().len(), 1);
    assert_eq!(f.cache.deletes_for(product.id), deletes_after_first);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deliveries_apply_once() {
    let f = Fixture::new();
    let product = f.product(10);
    let order_id = pending_order(&f, product.id, 1, "o-1").await.id;

    let deliveries = (0..8).map(|_| {
        let engine = Arc::clone(&f.engine);
        tokio::spawn(async move {
            engine
                .payments
                .handle_webhook(notice(order_id, PaymentOutcome::Success, "w-1"))
                .await
        })
    });
    let results: Vec<WebhookResult> = join_all(deliveries)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| **r == WebhookResult::Processed).count(), 1);
    assert_eq!(f.store.webhooks().len(), 1);
}

#[tokio::test]
async fn failure_cancels_and_returns_capacity() {
    let f = Fixture::new();
    let product = f.product(3);
    let order = pending_order(&f, product.id, 3, "o-1").await;
    assert_eq!(f.available(product.id).await, 0);

    let result = f
        .engine
        .payments
        .handle_webhook(notice(order.id, PaymentOutcome::Failure, "w-1"))
        .await
        .unwrap();

    assert_eq!(result, WebhookResult::Processed);
    assert_eq!(f.store.order(order.id).unwrap().status, OrderStatus::Canceled);
    let hold_id = order.hold_id.unwrap();
    assert_eq!(f.store.hold(hold_id).unwrap().status, HoldStatus::Released);
    assert_eq!(f.available(product.id).await, 3);

    // the released units can be held again
    f.hold(product.id, 3).await;
}

#[tokio::test(start_paused = true)]
async fn failure_clears_cached_availability() {
    let f = Fixture::new();
    let product = f.product(4);
    let order = pending_order(&f, product.id, 3, "o-1").await;
    let (_, cached) = f.engine.availability.product(product.id).await.unwrap();
    assert_eq!(cached, 1);
    let deletes_before = f.cache.deletes_for(product.id);

    f.engine
        .payments
        .handle_webhook(notice(order.id, PaymentOutcome::Failure, "w-1"))
        .await
        .unwrap();

    assert_eq!(f.cache.deletes_for(product.id), deletes_before + 1);
    // paused clock: the old entry would still be fresh had it survived
    let (_, shown) = f.engine.availability.product(product.id).await.unwrap();
    assert_eq!(shown, 4);
}

#[tokio::test(start_paused = true)]
async fn success_clears_cached_availability() {
    let f = Fixture::new();
    let product = f.product(4);
    let order = pending_order(&f, product.id, 3, "o-1").await;
    f.engine.availability.product(product.id).await.unwrap();
    let deletes_before = f.cache.deletes_for(product.id);

    f.engine
        .payments
        .handle_webhook(notice(order.id, PaymentOutcome::Success, "w-1"))
        .await
        .unwrap();

    assert_eq!(f.cache.deletes_for(product.id), deletes_before + 1);
    let (_, shown) = f.engine.availability.product(product.id).await.unwrap();
    assert_eq!(shown, 1);
}

#[tokio::test]
async fn released_hold_cannot_be_converted_again() {
    let f = Fixture::new();
    let product = f.product(5);
    let order = pending_order(&f, product.id, 1, "o-1").await;
    f.engine
        .payments
        .handle_webhook(notice(order.id, PaymentOutcome::Failure, "w-1"))
        .await
        .unwrap();

    let hold_id = order.hold_id.unwrap();
    let err = f.engine.orders.create_order(hold_id, "o-2".into()).await.unwrap_err();

    assert_eq!(err, SaleError::HoldExpiredOrInvalid(hold_id));
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn outcome_for_settled_order_is_recorded_but_ignored() {
    let f = Fixture::new();
    let product = f.product(5);
    let order = pending_order(&f, product.id, 1, "o-1").await;
    f.engine
        .payments
        .handle_webhook(notice(order.id, PaymentOutcome::Success, "w-1"))
        .await
        .unwrap();

    let late = f
        .engine
        .payments
        .handle_webhook(notice(order.id, PaymentOutcome::Failure, "w-2"))
        .await
        .unwrap();

    assert_eq!(late, WebhookResult::AlreadyProcessed);
    assert_eq!(f.store.order(order.id).unwrap().status, OrderStatus::Completed);
    assert_eq!(
        f.store.hold(order.hold_id.unwrap()).unwrap().status,
        HoldStatus::Consumed
    );
    assert_eq!(f.store.webhooks().len(), 2);
}

#[tokio::test]
async fn webhook_before_its_order_commits_can_be_retried() {
    let f = Fixture::new();
    let product = f.product(5);
    let hold = f.hold(product.id, 1).await;
    let order = Order::from_hold(&hold, "o-1".into(), start_time());

    let early = f
        .engine
        .payments
        .handle_webhook(notice(order.id, PaymentOutcome::Success, "w-1"))
        .await
        .unwrap_err();
    assert_eq!(early, SaleError::OrderNotFound(order.id));
    assert!(f.store.webhooks().is_empty());

    f.store.insert_order(order.clone());
    let retried = f
        .engine
        .payments
        .handle_webhook(notice(order.id, PaymentOutcome::Success, "w-1"))
        .await
        .unwrap();

    assert_eq!(retried, WebhookResult::Processed);
    assert_eq!(f.store.order(order.id).unwrap().status, OrderStatus::Completed);
}

#[tokio::test]
async fn payment_id_is_attached_once() {
    let f = Fixture::new();
    let product = f.product(5);
    let first = pending_order(&f, product.id, 1, "o-1").await;
    let second = pending_order(&f, product.id, 1, "o-2").await;

    let paid = PaymentNotice {
        payment_id: Some("pay-1".into()),
        ..notice(first.id, PaymentOutcome::Success, "w-1")
    };
    f.engine.payments.handle_webhook(paid).await.unwrap();
    assert_eq!(f.store.order(first.id).unwrap().payment_id.as_deref(), Some("pay-1"));

    let reused = PaymentNotice {
        payment_id: Some("pay-1".into()),
        ..notice(second.id, PaymentOutcome::Success, "w-2")
    };
    let err = f.engine.payments.handle_webhook(reused).await.unwrap_err();

    assert_eq!(err, SaleError::PaymentIdInUse("pay-1".into()));
    assert_eq!(f.store.order(second.id).unwrap().status, OrderStatus::Pending);
    assert_eq!(f.store.webhooks().len(), 1);
}

#[tokio::test]
async fn bad_deliveries_are_rejected() {
    let f = Fixture::new();
    let product = f.product(5);
    let order = pending_order(&f, product.id, 1, "o-1").await;

    let blank_key = f
        .engine
        .payments
        .handle_webhook(notice(order.id, PaymentOutcome::Success, " "))
        .await
        .unwrap_err();
    let blank_payment = f
        .engine
        .payments
        .handle_webhook(PaymentNotice {
            payment_id: Some(String::new()),
            ..notice(order.id, PaymentOutcome::Success, "w-1")
        })
        .await
        .unwrap_err();

    assert_eq!(blank_key.kind(), ErrorKind::Validation);
    assert_eq!(blank_payment.kind(), ErrorKind::Validation);
    assert_eq!(f.store.order(order.id).unwrap().status, OrderStatus::Pending);
}
