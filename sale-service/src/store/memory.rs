use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{Hold, HoldStatus, Order, OrderStatus, PaymentWebhookRecord, Product, SaleError, UniqueKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Store, TxFuture, UnitOfWork};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Product(Uuid),
    Hold(Uuid),
    Order(Uuid),
}

#[derive(Debug, Default, Clone)]
struct Tables {
    products: HashMap<Uuid, Product>,
    holds: HashMap<Uuid, Hold>,
    orders: HashMap<Uuid, Order>,
    webhooks: HashMap<Uuid, PaymentWebhookRecord>,
}

/// Process-local store with the same locking contract as [`super::PgStore`]:
/// `lock_*` blocks until the holder's unit of work ends, reads see committed
/// rows plus the unit's own writes, and writes become visible atomically on
/// commit.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<RowMutex<()>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Products are owned by the catalog; this is how they get here.
    pub fn insert_product(&self, product: Product) {
        self.committed().products.insert(product.id, product);
    }

    /// Writes an order row directly, bypassing the order workflow.
    pub fn insert_order(&self, order: Order) {
        self.committed().orders.insert(order.id, order);
    }

    pub fn product_by_name(&self, name: &str) -> Option<Product> {
        self.committed().products.values().find(|p| p.name == name).cloned()
    }

    pub fn hold(&self, id: Uuid) -> Option<Hold> {
        self.committed().holds.get(&id).cloned()
    }

    pub fn order(&self, id: Uuid) -> Option<Order> {
        self.committed().orders.get(&id).cloned()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.committed().orders.values().cloned().collect()
    }

    pub fn webhooks(&self) -> Vec<PaymentWebhookRecord> {
        self.committed().webhooks.values().cloned().collect()
    }

    fn committed(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, key: RowKey) -> Arc<RowMutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key).or_default())
    }

    /// Drops lock entries nobody holds or waits on. Waiters keep a clone of
    /// the `Arc`, so a count of one means the map is the only owner.
    fn prune_row_locks(&self, keys: impl IntoIterator<Item = RowKey>) {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            if locks.get(&key).is_some_and(|row| Arc::strong_count(row) == 1) {
                locks.remove(&key);
            }
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn transaction<R, F>(&self, work: F) -> Result<R, SaleError>
    where
        R: Send + 'static,
        F: for<'c> FnOnce(&'c mut dyn UnitOfWork) -> TxFuture<'c, R> + Send + 'static,
    {
        let mut uow = MemoryUnitOfWork::new(self);
        let value = work(&mut uow).await?;
        uow.commit()?;
        Ok(value)
    }
}

struct MemoryUnitOfWork<'s> {
    store: &'s InMemoryStore,
    locks: HashMap<RowKey, OwnedMutexGuard<()>>,
    writes: Tables,
}

impl<'s> MemoryUnitOfWork<'s> {
    fn new(store: &'s InMemoryStore) -> Self {
        Self {
            store,
            locks: HashMap::new(),
            writes: Tables::default(),
        }
    }

    async fn acquire(&mut self, key: RowKey) {
        if self.locks.contains_key(&key) {
            return;
        }
        let row = self.store.row_lock(key);
        let guard = row.lock_owned().await;
        self.locks.insert(key, guard);
    }

    fn product(&self, id: Uuid) -> Option<Product> {
        self.writes
            .products
            .get(&id)
            .cloned()
            .or_else(|| self.store.committed().products.get(&id).cloned())
    }

    fn hold(&self, id: Uuid) -> Option<Hold> {
        self.writes
            .holds
            .get(&id)
            .cloned()
            .or_else(|| self.store.committed().holds.get(&id).cloned())
    }

    fn order(&self, id: Uuid) -> Option<Order> {
        self.writes
            .orders
            .get(&id)
            .cloned()
            .or_else(|| self.store.committed().orders.get(&id).cloned())
    }

    fn visible_holds(&self) -> Vec<Hold> {
        let mut rows = self.store.committed().holds.clone();
        rows.extend(self.writes.holds.iter().map(|(id, hold)| (*id, hold.clone())));
        rows.into_values().collect()
    }

    fn visible_orders(&self) -> Vec<Order> {
        let mut rows = self.store.committed().orders.clone();
        rows.extend(self.writes.orders.iter().map(|(id, order)| (*id, order.clone())));
        rows.into_values().collect()
    }

    fn visible_webhooks(&self) -> Vec<PaymentWebhookRecord> {
        let mut rows = self.store.committed().webhooks.clone();
        rows.extend(self.writes.webhooks.iter().map(|(id, record)| (*id, record.clone())));
        rows.into_values().collect()
    }

    /// Applies buffered writes. Unique constraints are checked again against
    /// rows committed after this unit first wrote its own.
    fn commit(&mut self) -> Result<(), SaleError> {
        let store = self.store;
        let mut tables = store.committed();

        for order in self.writes.orders.values() {
            if let Some(key) = order_conflict(tables.orders.values(), order) {
                return Err(SaleError::DuplicateKey(key));
            }
        }
        for record in self.writes.webhooks.values() {
            if tables
                .webhooks
                .values()
                .any(|w| w.id != record.id && w.idempotency_key == record.idempotency_key)
            {
                return Err(SaleError::DuplicateKey(UniqueKey::WebhookIdempotencyKey));
            }
        }

        let writes = std::mem::take(&mut self.writes);
        tables.products.extend(writes.products);
        tables.holds.extend(writes.holds);
        tables.orders.extend(writes.orders);
        tables.webhooks.extend(writes.webhooks);
        Ok(())
    }
}

impl Drop for MemoryUnitOfWork<'_> {
    fn drop(&mut self) {
        let keys: Vec<RowKey> = self.locks.keys().copied().collect();
        self.locks.clear();
        self.store.prune_row_locks(keys);
    }
}

fn order_conflict<'a>(mut existing: impl Iterator<Item = &'a Order>, candidate: &Order) -> Option<UniqueKey> {
    existing.find_map(|other| {
        if other.id == candidate.id {
            None
        } else if other.idempotency_key == candidate.idempotency_key {
            Some(UniqueKey::OrderIdempotencyKey)
        } else if candidate.payment_id.is_some() && other.payment_id == candidate.payment_id {
            Some(UniqueKey::OrderPaymentId)
        } else {
            None
        }
    })
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork<'_> {
    async fn lock_product(&mut self, id: Uuid) -> Result<Option<Product>, SaleError> {
        self.acquire(RowKey::Product(id)).await;
        Ok(self.product(id))
    }

    async fn find_product(&mut self, id: Uuid) -> Result<Option<Product>, SaleError> {
        Ok(self.product(id))
    }

    async fn live_hold_quantity(&mut self, product_id: Uuid, as_of: DateTime<Utc>) -> Result<i64, SaleError> {
        Ok(self
            .visible_holds()
            .iter()
            .filter(|hold| hold.product_id == product_id && hold.is_live(as_of))
            .map(|hold| i64::from(hold.quantity))
            .sum())
    }

    async fn order_demand_quantity(&mut self, product_id: Uuid) -> Result<i64, SaleError> {
        Ok(self
            .visible_orders()
            .iter()
            .filter(|order| order.product_id == product_id && order.status.counts_toward_demand())
            .map(|order| i64::from(order.quantity))
            .sum())
    }

    async fn insert_hold(&mut self, hold: &Hold) -> Result<(), SaleError> {
        if self.product(hold.product_id).is_none() {
            return Err(SaleError::Store(format!(
                "hold {} references missing product {}",
                hold.id, hold.product_id
            )));
        }
        self.writes.holds.insert(hold.id, hold.clone());
        Ok(())
    }

    async fn lock_hold(&mut self, id: Uuid) -> Result<Option<Hold>, SaleError> {
        self.acquire(RowKey::Hold(id)).await;
        Ok(self.hold(id))
    }

    async fn transition_hold(
        &mut self,
        id: Uuid,
        from: HoldStatus,
        to: HoldStatus,
        at: DateTime<Utc>,
    ) -> Result<usize, SaleError> {
        self.acquire(RowKey::Hold(id)).await;
        match self.hold(id) {
            Some(mut hold) if hold.status == from => {
                hold.status = to;
                hold.updated_at = at;
                self.writes.holds.insert(id, hold);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn find_order_by_key(&mut self, idempotency_key: &str) -> Result<Option<Order>, SaleError> {
        Ok(self
            .visible_orders()
            .into_iter()
            .find(|order| order.idempotency_key == idempotency_key))
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), SaleError> {
        if let Some(key) = order_conflict(self.visible_orders().iter(), order) {
            return Err(SaleError::DuplicateKey(key));
        }
        self.writes.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn lock_order(&mut self, id: Uuid) -> Result<Option<Order>, SaleError> {
        self.acquire(RowKey::Order(id)).await;
        Ok(self.order(id))
    }

    async fn transition_order(
        &mut self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        payment_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<usize, SaleError> {
        self.acquire(RowKey::Order(id)).await;
        let Some(mut order) = self.order(id).filter(|order| order.status == from) else {
            return Ok(0);
        };
        order.status = to;
        order.updated_at = at;
        if payment_id.is_some() {
            order.payment_id = payment_id;
            if let Some(key) = order_conflict(self.visible_orders().iter(), &order) {
                return Err(SaleError::DuplicateKey(key));
            }
        }
        self.writes.orders.insert(id, order);
        Ok(1)
    }

    async fn find_webhook_by_key(
        &mut self,
        idempotency_key: &str,
    ) -> Result<Option<PaymentWebhookRecord>, SaleError> {
        Ok(self
            .visible_webhooks()
            .into_iter()
            .find(|record| record.idempotency_key == idempotency_key))
    }

    async fn insert_webhook(&mut self, record: &PaymentWebhookRecord) -> Result<(), SaleError> {
        if self.order(record.order_id).is_none() {
            return Err(SaleError::Store(format!(
                "webhook {} references missing order {}",
                record.id, record.order_id
            )));
        }
        if self
            .visible_webhooks()
            .iter()
            .any(|w| w.idempotency_key == record.idempotency_key)
        {
            return Err(SaleError::DuplicateKey(UniqueKey::WebhookIdempotencyKey));
        }
        self.writes.webhooks.insert(record.id, record.clone());
        Ok(())
    }
}
