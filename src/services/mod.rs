pub mod ingestion;
pub mod order_service;

pub use ingestion::{IngestionLoop, IngestionStats, MessageOutcome};
pub use order_service::{OrderService, OrderServiceError};
