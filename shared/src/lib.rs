use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

mod error;

pub use error::{ErrorKind, SaleError, UniqueKey};

pub const MIN_HOLD_TTL_SECONDS: i64 = 10;
pub const MAX_HOLD_TTL_SECONDS: i64 = 3600;
pub const DEFAULT_HOLD_TTL_SECONDS: i64 = 120;

/// Longest idempotency key either ledger accepts.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 191;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldStatus {
    Active,
    Consumed,
    Released,
}

impl HoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::Active => "active",
            HoldStatus::Consumed => "consumed",
            HoldStatus::Released => "released",
        }
    }

    /// Converting a hold into an order. Only an active hold can be consumed.
    pub fn consume(self) -> Result<HoldStatus, SaleError> {
        match self {
            HoldStatus::Active => Ok(HoldStatus::Consumed),
            other => Err(other.rejected(HoldStatus::Consumed)),
        }
    }

    /// Giving capacity back after a failed payment. A consumed hold is released
    /// when the order it became is canceled.
    pub fn release(self) -> Result<HoldStatus, SaleError> {
        match self {
            HoldStatus::Active | HoldStatus::Consumed => Ok(HoldStatus::Released),
            other => Err(other.rejected(HoldStatus::Released)),
        }
    }

    /// The one liveness rule for holds: a stored `active` status counts only
    /// until `expires_at`. Every status check on a hold goes through here.
    pub fn is_live(self, expires_at: DateTime<Utc>, as_of: DateTime<Utc>) -> bool {
        self == HoldStatus::Active && expires_at > as_of
    }

    fn rejected(self, to: HoldStatus) -> SaleError {
        SaleError::InvalidTransition {
            entity: "hold",
            from: self.as_str(),
            to: to.as_str(),
        }
    }
}

impl fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HoldStatus {
    type Err = SaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(HoldStatus::Active),
            "consumed" => Ok(HoldStatus::Consumed),
            "released" => Ok(HoldStatus::Released),
            other => Err(SaleError::Store(format!("unknown hold status {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
    Canceled,
}

impl OrderStatus {
    /// Statuses whose quantity is committed against a product's stock.
    pub const DEMAND: [OrderStatus; 2] = [OrderStatus::Pending, OrderStatus::Completed];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
            OrderStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    pub fn counts_toward_demand(&self) -> bool {
        Self::DEMAND.contains(self)
    }

    pub fn complete(self) -> Result<OrderStatus, SaleError> {
        match self {
            OrderStatus::Pending => Ok(OrderStatus::Completed),
            other => Err(other.rejected(OrderStatus::Completed)),
        }
    }

    pub fn cancel(self) -> Result<OrderStatus, SaleError> {
        match self {
            OrderStatus::Pending => Ok(OrderStatus::Canceled),
            other => Err(other.rejected(OrderStatus::Canceled)),
        }
    }

    fn rejected(self, to: OrderStatus) -> SaleError {
        SaleError::InvalidTransition {
            entity: "order",
            from: self.as_str(),
            to: to.as_str(),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = SaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "completed" => Ok(OrderStatus::Completed),
            "canceled" => Ok(OrderStatus::Canceled),
            other => Err(SaleError::Store(format!("unknown order status {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    Success,
    Failure,
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Success => "success",
            PaymentOutcome::Failure => "failure",
        }
    }

    /// Where a pending order lands once this outcome is applied.
    pub fn settle(self, current: OrderStatus) -> Result<OrderStatus, SaleError> {
        match self {
            PaymentOutcome::Success => current.complete(),
            PaymentOutcome::Failure => current.cancel(),
        }
    }
}

impl FromStr for PaymentOutcome {
    type Err = SaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(PaymentOutcome::Success),
            "failure" => Ok(PaymentOutcome::Failure),
            other => Err(SaleError::Validation(format!(
                "status must be one of success, failure (got {other:?})"
            ))),
        }
    }
}

/// Acknowledgement returned to the payment notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookResult {
    Processed,
    AlreadyProcessed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub stock: i32,
}

impl Product {
    pub fn new(name: impl Into<String>, price: BigDecimal, stock: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            price,
            stock,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub expires_at: DateTime<Utc>,
    pub status: HoldStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Hold {
    pub fn new(product_id: Uuid, quantity: i32, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            quantity,
            expires_at: now + ttl,
            status: HoldStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_live(&self, as_of: DateTime<Utc>) -> bool {
        self.status.is_live(self.expires_at, as_of)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub status: OrderStatus,
    pub hold_id: Option<Uuid>,
    pub idempotency_key: String,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// A fresh pending order carrying the hold's product and quantity.
    pub fn from_hold(hold: &Hold, idempotency_key: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id: hold.product_id,
            quantity: hold.quantity,
            status: OrderStatus::Pending,
            hold_id: Some(hold.id),
            idempotency_key,
            payment_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Dedup ledger entry: one row per applied webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentWebhookRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: PaymentOutcome,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

impl PaymentWebhookRecord {
    pub fn new(order_id: Uuid, status: PaymentOutcome, idempotency_key: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            status,
            idempotency_key,
            created_at: now,
        }
    }
}

pub fn validate_idempotency_key(key: &str) -> Result<(), SaleError> {
    if key.trim().is_empty() {
        return Err(SaleError::Validation("idempotency_key must not be empty".to_string()));
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(SaleError::Validation(format!(
            "idempotency_key must be at most {MAX_IDEMPOTENCY_KEY_LEN} characters"
        )));
    }
    Ok(())
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: RwLock::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(PoisonError::into_inner)
    }
}
