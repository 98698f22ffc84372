use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::shipment::ShipmentStatus;
use crate::services::shipments::CreateShipmentRequest;
use crate::{errors::ServiceError, ApiResponse, AppState, ListQuery};

/// POST /api/v1/shipments
pub async fn create_shipment(
    State(state): State<AppState>,
    Json(request): Json<CreateShipmentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let shipment = state.services.shipments.create_shipment(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(shipment))))
}

/// GET /api/v1/shipments/:id
pub async fn get_shipment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let shipment = state
        .services
        .shipments
        .get_shipment(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Shipment {} not found", id)))?;
    Ok(Json(ApiResponse::success(shipment)))
}

/// GET /api/v1/shipments
pub async fn list_shipments(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let shipments = state
        .services
        .shipments
        .list_shipments(query.page, query.limit, query.status)
        .await?;
    Ok(Json(ApiResponse::success(shipments)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// PUT /api/v1/shipments/:id/status
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let new_status: ShipmentStatus = request
        .status
        .parse()
        .map_err(ServiceError::ValidationError)?;
    let shipment = state
        .services
        .shipments
        .update_status(id, new_status)
        .await?;
    Ok(Json(ApiResponse::success(shipment)))
}

/// POST /api/v1/shipments/:id/settlement/recompute
///
/// Reconciliation: rebuilds the shipment's revenue and profit aggregates
/// from its allocation records.
pub async fn recompute_settlement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let shipment = state.services.settlement.recompute(id).await?;
    Ok(Json(ApiResponse::success(shipment)))
}
