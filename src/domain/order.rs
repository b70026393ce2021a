//! Order aggregate.
//! Framework-agnostic representation of an order as it travels through the
//! stream, the store and the cache. Field names match the wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Prefix of every cache key holding an order.
pub const ORDER_CACHE_PREFIX: &str = "order:";

/// Aggregate root, identified by `order_uid`.
///
/// Missing JSON fields decode to their defaults so the validator can report
/// every absent field at once instead of the decoder failing on the first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Order {
    pub order_uid: String,
    pub track_number: String,
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    pub locale: String,
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: i32,
    pub date_created: Option<DateTime<Utc>>,
    pub oof_shard: String,
}

/// Shipping contact of an order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// Payment transaction attached to an order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Payment {
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i64,
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    pub custom_fee: i64,
}

/// Single line item.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    pub name: String,
    pub sale: i32,
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}

impl Order {
    /// Key under which this order lives in the cache.
    pub fn cache_key(&self) -> String {
        cache_key(&self.order_uid)
    }
}

/// Cache key for an order identifier: `order:<order_uid>`.
pub fn cache_key(order_uid: &str) -> String {
    format!("{}{}", ORDER_CACHE_PREFIX, order_uid)
}
