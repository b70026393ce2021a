pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod lifecycle;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod startup;
pub mod validation;

use axum::{middleware as axum_middleware, routing::get, Router};
use std::sync::Arc;

use crate::health::HealthCheck;
use crate::services::OrderService;

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub health: Arc<HealthCheck>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/order/:order_uid", get(handlers::orders::get_order))
        .route("/health", get(handlers::health))
        .route("/api-docs/openapi.json", get(handlers::openapi_json))
        .layer(axum_middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .with_state(state)
}
