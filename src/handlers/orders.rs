use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::Order;
use crate::error::AppError;
use crate::AppState;

/// Error body returned by the order endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub status: u16,
}

#[utoipa::path(
    get,
    path = "/order/{order_uid}",
    params(("order_uid" = String, Path, description = "Order identifier")),
    responses(
        (status = 200, description = "Order found", body = Order),
        (status = 404, description = "Order not found", body = ErrorBody),
        (status = 500, description = "Backend failure", body = ErrorBody)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_uid): Path<String>,
) -> Result<Json<Order>, AppError> {
    tracing::debug!(order_uid = %order_uid, "Order lookup");
    let order = state.orders.get_order_by_uid(&order_uid).await?;
    Ok(Json(order))
}
