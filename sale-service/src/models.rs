use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::{Hold, Order, PaymentWebhookRecord, Product, SaleError};
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::products)]
pub struct ProductRow {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub stock: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::products)]
pub struct NewProductRow {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub stock: i32,
}

#[derive(Debug, Clone, Queryable, Insertable, Identifiable)]
#[diesel(table_name = crate::schema::holds)]
pub struct HoldRow {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub expires_at: DateTime<Utc>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable, Identifiable)]
#[diesel(table_name = crate::schema::orders)]
pub struct OrderRow {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub status: String,
    pub hold_id: Option<Uuid>,
    pub idempotency_key: String,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable, Identifiable)]
#[diesel(table_name = crate::schema::payment_webhooks)]
pub struct PaymentWebhookRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            price: row.price,
            stock: row.stock,
        }
    }
}

impl From<&Product> for NewProductRow {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            price: product.price.clone(),
            stock: product.stock,
        }
    }
}

impl From<&Hold> for HoldRow {
    fn from(hold: &Hold) -> Self {
        Self {
            id: hold.id,
            product_id: hold.product_id,
            quantity: hold.quantity,
            expires_at: hold.expires_at,
            status: hold.status.as_str().to_string(),
            created_at: hold.created_at,
            updated_at: hold.updated_at,
        }
    }
}

impl TryFrom<HoldRow> for Hold {
    type Error = SaleError;

    fn try_from(row: HoldRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            product_id: row.product_id,
            quantity: row.quantity,
            expires_at: row.expires_at,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&Order> for OrderRow {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            product_id: order.product_id,
            quantity: order.quantity,
            status: order.status.as_str().to_string(),
            hold_id: order.hold_id,
            idempotency_key: order.idempotency_key.clone(),
            payment_id: order.payment_id.clone(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

impl TryFrom<OrderRow> for Order {
    type Error = SaleError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            product_id: row.product_id,
            quantity: row.quantity,
            status: row.status.parse()?,
            hold_id: row.hold_id,
            idempotency_key: row.idempotency_key,
            payment_id: row.payment_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&PaymentWebhookRecord> for PaymentWebhookRow {
    fn from(record: &PaymentWebhookRecord) -> Self {
        Self {
            id: record.id,
            order_id: record.order_id,
            status: record.status.as_str().to_string(),
            idempotency_key: record.idempotency_key.clone(),
            created_at: record.created_at,
        }
    }
}

impl TryFrom<PaymentWebhookRow> for PaymentWebhookRecord {
    type Error = SaleError;

    fn try_from(row: PaymentWebhookRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|_| SaleError::Store(format!("unknown webhook status {:?}", row.status)))?;
        Ok(Self {
            id: row.id,
            order_id: row.order_id,
            status,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
        })
    }
}
