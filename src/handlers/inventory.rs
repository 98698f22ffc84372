use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commands::inventory::adjust_inventory_command::AdjustInventoryCommand;
use crate::services::allocation::AvailableLot;
use crate::{errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub struct AvailableQuery {
    pub brand: String,
    pub name: String,
    pub size: String,
}

#[derive(Debug, Serialize)]
pub struct AvailableResponse {
    pub product_id: Uuid,
    pub brand: String,
    pub name: String,
    pub size: String,
    pub total_available: i32,
    /// Lots oldest-first, the order allocation consumes them in
    pub lots: Vec<AvailableLot>,
}

/// GET /api/v1/inventory/available?brand=&name=&size=
pub async fn available(
    State(state): State<AppState>,
    Query(query): Query<AvailableQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let (item, lots) = state
        .services
        .inventory
        .available_for_identity(&query.brand, &query.name, &query.size)
        .await?;
    Ok(Json(ApiResponse::success(AvailableResponse {
        product_id: item.id,
        brand: item.brand,
        name: item.name,
        size: item.size,
        total_available: lots.iter().map(|lot| lot.remaining).sum(),
        lots,
    })))
}

/// POST /api/v1/inventory/adjustments
pub async fn adjust(
    State(state): State<AppState>,
    Json(command): Json<AdjustInventoryCommand>,
) -> Result<impl IntoResponse, ServiceError> {
    let adjustment = state.services.inventory.adjust_inventory(command).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(adjustment))))
}

/// GET /api/v1/inventory/lots/:id/adjustments
pub async fn adjustments_for_lot(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let adjustments = state.services.inventory.adjustments_for_lot(id).await?;
    Ok(Json(ApiResponse::success(adjustments)))
}
