use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;
use uuid::Uuid;

/// Unique constraints the sale tables enforce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueKey {
    OrderIdempotencyKey,
    OrderPaymentId,
    WebhookIdempotencyKey,
}

impl UniqueKey {
    pub const ORDER_IDEMPOTENCY_KEY: &'static str = "orders_idempotency_key_unique";
    pub const ORDER_PAYMENT_ID: &'static str = "orders_payment_id_unique";
    pub const WEBHOOK_IDEMPOTENCY_KEY: &'static str = "payment_webhooks_idempotency_key_unique";

    pub fn constraint_name(&self) -> &'static str {
        match self {
            UniqueKey::OrderIdempotencyKey => Self::ORDER_IDEMPOTENCY_KEY,
            UniqueKey::OrderPaymentId => Self::ORDER_PAYMENT_ID,
            UniqueKey::WebhookIdempotencyKey => Self::WEBHOOK_IDEMPOTENCY_KEY,
        }
    }

    pub fn from_constraint(name: &str) -> Option<Self> {
        match name {
            Self::ORDER_IDEMPOTENCY_KEY => Some(UniqueKey::OrderIdempotencyKey),
            Self::ORDER_PAYMENT_ID => Some(UniqueKey::OrderPaymentId),
            Self::WEBHOOK_IDEMPOTENCY_KEY => Some(UniqueKey::WebhookIdempotencyKey),
            _ => None,
        }
    }
}

/// Coarse classification used by callers that only care about the failure family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Internal,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SaleError {
    #[error("product {0} not found")]
    ProductNotFound(Uuid),

    #[error("hold {0} not found")]
    HoldNotFound(Uuid),

    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("insufficient stock to create hold: requested {requested}, available {available}")]
    InsufficientStock { requested: i32, available: i64 },

    #[error("hold {0} is expired or no longer active")]
    HoldExpiredOrInvalid(Uuid),

    #[error("payment {0} is already attached to another order")]
    PaymentIdInUse(String),

    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: &'static str,
        to: &'static str,
    },

    #[error("{0}")]
    Validation(String),

    #[error("unique constraint {} violated", .0.constraint_name())]
    DuplicateKey(UniqueKey),

    #[error("store error: {0}")]
    Store(String),

    #[error("cache error: {0}")]
    Cache(String),
}

impl SaleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SaleError::ProductNotFound(_) | SaleError::HoldNotFound(_) | SaleError::OrderNotFound(_) => {
                ErrorKind::NotFound
            }
            SaleError::InsufficientStock { .. }
            | SaleError::HoldExpiredOrInvalid(_)
            | SaleError::PaymentIdInUse(_)
            | SaleError::InvalidTransition { .. }
            | SaleError::DuplicateKey(_) => ErrorKind::Conflict,
            SaleError::Validation(_) => ErrorKind::Validation,
            SaleError::Store(_) | SaleError::Cache(_) => ErrorKind::Internal,
        }
    }
}

impl From<DieselError> for SaleError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                match info.constraint_name().and_then(UniqueKey::from_constraint) {
                    Some(key) => SaleError::DuplicateKey(key),
                    None => SaleError::Store(info.message().to_string()),
                }
            }
            other => SaleError::Store(other.to_string()),
        }
    }
}
