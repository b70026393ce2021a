//! Port implementations: Postgres store, Redis cache and stream, and
//! in-memory substitutes.

pub mod in_memory;
pub mod postgres_order_repository;
pub mod redis_order_cache;
pub mod redis_stream;

pub use in_memory::{
    in_memory_stream, InMemoryConsumer, InMemoryOrderCache, InMemoryOrderRepository, InMemoryStream,
};
pub use postgres_order_repository::PostgresOrderRepository;
pub use redis_order_cache::RedisOrderCache;
pub use redis_stream::{RedisStreamConsumer, RedisStreamProducer, StreamSettings};
