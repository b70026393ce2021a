pub mod orders;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use utoipa::OpenApi;

use crate::domain::{Delivery, Item, Order, Payment};
use crate::health::{DependencyStatus, HealthResponse};
use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(health, orders::get_order, openapi_json),
    components(schemas(
        Order,
        Delivery,
        Payment,
        Item,
        HealthResponse,
        DependencyStatus,
        orders::ErrorBody
    )),
    tags(
        (name = "Orders", description = "Order lookup"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy or degraded", body = HealthResponse),
        (status = 503, description = "A critical dependency is down", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = state.health.check().await;

    // Return 503 only when a critical dependency is down
    let status_code = if response.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(response))
}

#[utoipa::path(
    get,
    path = "/api-docs/openapi.json",
    responses((status = 200, description = "OpenAPI document")),
    tag = "Health"
)]
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
