use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::sum;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel_async::pooled_connection::{bb8::Pool, PoolError};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{Hold, HoldStatus, Order, OrderStatus, PaymentWebhookRecord, Product, SaleError};
use tracing::info;
use uuid::Uuid;

use super::{Store, TxFuture, UnitOfWork};
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

/// Postgres-backed store. Row locks are `SELECT ... FOR UPDATE`; the unit of
/// work is a single database transaction on one pooled connection.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts `product` unless a product with the same name already exists.
    pub async fn seed_product(&self, product: &Product) -> Result<Product, SaleError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(pool_error)?;

        let existing = products::table
            .filter(products::name.eq(&product.name))
            .first::<ProductRow>(&mut conn)
            .await
            .optional()?;
        if let Some(row) = existing {
            return Ok(row.into());
        }

        diesel::insert_into(products::table)
            .values(NewProductRow::from(product))
            .execute(&mut conn)
            .await?;
        info!("Seeded product {} ({})", product.name, product.id);
        Ok(product.clone())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn transaction<R, F>(&self, work: F) -> Result<R, SaleError>
    where
        R: Send + 'static,
        F: for<'c> FnOnce(&'c mut dyn UnitOfWork) -> TxFuture<'c, R> + Send + 'static,
    {
        let mut pooled = self
            .pool
            .get()
            .await
            .map_err(pool_error)?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<R, SaleError, _>(|conn| {
            Box::pin(async move {
                let mut uow = PgUnitOfWork { conn };
                work(&mut uow).await
            })
        })
        .await
    }
}

fn pool_error(err: bb8::RunError<PoolError>) -> SaleError {
    SaleError::Store(format!("connection pool: {err}"))
}

struct PgUnitOfWork<'c> {
    conn: &'c mut AsyncPgConnection,
}

/// SQL side of [`HoldStatus::is_live`].
fn live_holds(product_id: Uuid, as_of: DateTime<Utc>) -> holds::BoxedQuery<'static, Pg> {
    holds::table
        .filter(holds::product_id.eq(product_id))
        .filter(holds::status.eq(HoldStatus::Active.as_str()))
        .filter(holds::expires_at.gt(as_of))
        .into_boxed()
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork<'_> {
    async fn lock_product(&mut self, id: Uuid) -> Result<Option<Product>, SaleError> {
        let row = products::table
            .filter(products::id.eq(id))
            // Leaves FOR KEY SHARE free, so foreign-key checks from order inserts don't queue here.
            .for_no_key_update()
            .first::<ProductRow>(self.conn)
            .await
            .optional()?;
        Ok(row.map(Product::from))
    }

    async fn find_product(&mut self, id: Uuid) -> Result<Option<Product>, SaleError> {
        let row = products::table
            .filter(products::id.eq(id))
            .first::<ProductRow>(self.conn)
            .await
            .optional()?;
        Ok(row.map(Product::from))
    }

    async fn live_hold_quantity(&mut self, product_id: Uuid, as_of: DateTime<Utc>) -> Result<i64, SaleError> {
        let held = live_holds(product_id, as_of)
            .select(sum(holds::quantity))
            .first::<Option<i64>>(self.conn)
            .await?;
        Ok(held.unwrap_or(0))
    }

    async fn order_demand_quantity(&mut self, product_id: Uuid) -> Result<i64, SaleError> {
        let statuses: Vec<&'static str> = OrderStatus::DEMAND.iter().map(|s| s.as_str()).collect();
        let ordered = orders::table
            .filter(orders::product_id.eq(product_id))
            .filter(orders::status.eq_any(statuses))
            .select(sum(orders::quantity))
            .first::<Option<i64>>(self.conn)
            .await?;
        Ok(ordered.unwrap_or(0))
    }

    async fn insert_hold(&mut self, hold: &Hold) -> Result<(), SaleError> {
        diesel::insert_into(holds::table)
            .values(HoldRow::from(hold))
            .execute(self.conn)
            .await?;
        Ok(())
    }

    async fn lock_hold(&mut self, id: Uuid) -> Result<Option<Hold>, SaleError> {
        holds::table
            .filter(holds::id.eq(id))
            .for_update()
            .first::<HoldRow>(self.conn)
            .await
            .optional()?
            .map(Hold::try_from)
            .transpose()
    }

    async fn transition_hold(
        &mut self,
        id: Uuid,
        from: HoldStatus,
        to: HoldStatus,
        at: DateTime<Utc>,
    ) -> Result<usize, SaleError> {
        let updated = diesel::update(
            holds::table
                .filter(holds::id.eq(id))
                .filter(holds::status.eq(from.as_str())),
        )
        .set((holds::status.eq(to.as_str()), holds::updated_at.eq(at)))
        .execute(self.conn)
        .await?;
        Ok(updated)
    }

    async fn find_order_by_key(&mut self, idempotency_key: &str) -> Result<Option<Order>, SaleError> {
        orders::table
            .filter(orders::idempotency_key.eq(idempotency_key))
            .first::<OrderRow>(self.conn)
            .await
            .optional()?
            .map(Order::try_from)
            .transpose()
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), SaleError> {
        diesel::insert_into(orders::table)
            .values(OrderRow::from(order))
            .execute(self.conn)
            .await?;
        Ok(())
    }

    async fn lock_order(&mut self, id: Uuid) -> Result<Option<Order>, SaleError> {
        orders::table
            .filter(orders::id.eq(id))
            .for_update()
            .first::<OrderRow>(self.conn)
            .await
            .optional()?
            .map(Order::try_from)
            .transpose()
    }

    async fn transition_order(
        &mut self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        payment_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<usize, SaleError> {
        let target = orders::table
            .filter(orders::id.eq(id))
            .filter(orders::status.eq(from.as_str()));

        let updated = match payment_id {
            Some(payment_id) => {
                diesel::update(target)
                    .set((
                        orders::status.eq(to.as_str()),
                        orders::payment_id.eq(payment_id),
                        orders::updated_at.eq(at),
                    ))
                    .execute(self.conn)
                    .await?
            }
            None => {
                diesel::update(target)
                    .set((orders::status.eq(to.as_str()), orders::updated_at.eq(at)))
                    .execute(self.conn)
                    .await?
            }
        };
        Ok(updated)
    }

    async fn find_webhook_by_key(
        &mut self,
        idempotency_key: &str,
    ) -> Result<Option<PaymentWebhookRecord>, SaleError> {
        payment_webhooks::table
            .filter(payment_webhooks::idempotency_key.eq(idempotency_key))
            .first::<PaymentWebhookRow>(self.conn)
            .await
            .optional()?
            .map(PaymentWebhookRecord::try_from)
            .transpose()
    }

    async fn insert_webhook(&mut self, record: &PaymentWebhookRecord) -> Result<(), SaleError> {
        diesel::insert_into(payment_webhooks::table)
            .values(PaymentWebhookRow::from(record))
            .execute(self.conn)
            .await?;
        Ok(())
    }
}
