use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::commands::sales::update_payment_command::LinePayment;
use crate::services::sales::CreateSaleRequest;
use crate::{errors::ServiceError, ApiResponse, AppState, ListQuery};

/// POST /api/v1/sales
pub async fn create_sale(
    State(state): State<AppState>,
    Json(request): Json<CreateSaleRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let sale = state.services.sales.create_sale(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(sale))))
}

/// GET /api/v1/sales/:id
pub async fn get_sale(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let sale = state
        .services
        .sales
        .get_sale(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Sale {} not found", id)))?;
    Ok(Json(ApiResponse::success(sale)))
}

/// GET /api/v1/sales
pub async fn list_sales(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let sales = state
        .services
        .sales
        .list_sales(query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(sales)))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentRequest {
    pub payments: Vec<LinePayment>,
}

/// POST /api/v1/sales/:id/payments
pub async fn update_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let sale = state
        .services
        .sales
        .update_payment(id, request.payments)
        .await?;
    Ok(Json(ApiResponse::success(sale)))
}

/// POST /api/v1/sales/:id/payments/pay-all
pub async fn pay_all(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let sale = state.services.sales.pay_all(id).await?;
    Ok(Json(ApiResponse::success_with_message(
        sale,
        "Sale settled in full",
    )))
}
