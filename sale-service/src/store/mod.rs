//! Transactional storage for holds, orders and webhook deliveries.
//!
//! Every engine operation runs inside [`Store::transaction`]. The closure
//! receives a [`UnitOfWork`]; returning `Ok` commits, returning `Err` rolls
//! everything back. Row locks taken through `lock_*` are held until the
//! unit of work ends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use shared::{Hold, HoldStatus, Order, OrderStatus, PaymentWebhookRecord, Product, SaleError};
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::{DbPool, PgStore};

pub type TxFuture<'c, R> = BoxFuture<'c, Result<R, SaleError>>;

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn transaction<R, F>(&self, work: F) -> Result<R, SaleError>
    where
        R: Send + 'static,
        F: for<'c> FnOnce(&'c mut dyn UnitOfWork) -> TxFuture<'c, R> + Send + 'static;
}

#[async_trait]
pub trait UnitOfWork: Send {
    /// Exclusive lock on the product row. Serializes admission per product.
    async fn lock_product(&mut self, id: Uuid) -> Result<Option<Product>, SaleError>;

    async fn find_product(&mut self, id: Uuid) -> Result<Option<Product>, SaleError>;

    /// Sum of quantities of holds that are live at `as_of`.
    async fn live_hold_quantity(&mut self, product_id: Uuid, as_of: DateTime<Utc>) -> Result<i64, SaleError>;

    /// Sum of quantities of orders in [`OrderStatus::DEMAND`].
    async fn order_demand_quantity(&mut self, product_id: Uuid) -> Result<i64, SaleError>;

    async fn insert_hold(&mut self, hold: &Hold) -> Result<(), SaleError>;

    /// Exclusive lock on the hold row. Serializes conversion per hold.
    async fn lock_hold(&mut self, id: Uuid) -> Result<Option<Hold>, SaleError>;

    /// Compare-and-update. Returns the number of rows moved from `from` to `to`.
    async fn transition_hold(
        &mut self,
        id: Uuid,
        from: HoldStatus,
        to: HoldStatus,
        at: DateTime<Utc>,
    ) -> Result<usize, SaleError>;

    async fn find_order_by_key(&mut self, idempotency_key: &str) -> Result<Option<Order>, SaleError>;

    async fn insert_order(&mut self, order: &Order) -> Result<(), SaleError>;

    async fn lock_order(&mut self, id: Uuid) -> Result<Option<Order>, SaleError>;

    /// Compare-and-update. `payment_id`, when given, is stored alongside the new status.
    async fn transition_order(
        &mut self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        payment_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<usize, SaleError>;

    async fn find_webhook_by_key(&mut self, idempotency_key: &str)
        -> Result<Option<PaymentWebhookRecord>, SaleError>;

    async fn insert_webhook(&mut self, record: &PaymentWebhookRecord) -> Result<(), SaleError>;
}
