//! Domain types shared by the pipeline, the adapters and the HTTP layer.

pub mod order;

pub use order::{cache_key, Delivery, Item, Order, Payment, ORDER_CACHE_PREFIX};
