pub mod inventory;
pub mod sales;
pub mod shipments;

use crate::db::DbPool;
use crate::events::EventSender;
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use rust_decimal::Decimal;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub sales: Arc<crate::services::sales::SaleService>,
    pub inventory: Arc<crate::services::inventory::InventoryService>,
    pub shipments: Arc<crate::services::shipments::ShipmentService>,
    pub customers: Arc<crate::services::customers::CustomerService>,
    pub settlement: Arc<crate::services::settlement::SettlementService>,
}

impl AppServices {
    /// Builds the service container shared by all handlers
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        default_usd_dop_rate: Decimal,
    ) -> Self {
        Self {
            sales: Arc::new(crate::services::sales::SaleService::new(
                db_pool.clone(),
                event_sender.clone(),
                default_usd_dop_rate,
            )),
            inventory: Arc::new(crate::services::inventory::InventoryService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            shipments: Arc::new(crate::services::shipments::ShipmentService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            customers: Arc::new(crate::services::customers::CustomerService::new(
                db_pool.clone(),
                event_sender,
            )),
            settlement: Arc::new(crate::services::settlement::SettlementService::new(db_pool)),
        }
    }
}

/// Builds the full application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest(
            "/api/v1",
            Router::new()
                .route("/sales", post(sales::create_sale).get(sales::list_sales))
                .route("/sales/:id", get(sales::get_sale))
                .route("/sales/:id/payments", post(sales::update_payment))
                .route("/sales/:id/payments/pay-all", post(sales::pay_all))
                .route("/inventory/available", get(inventory::available))
                .route("/inventory/adjustments", post(inventory::adjust))
                .route(
                    "/inventory/lots/:id/adjustments",
                    get(inventory::adjustments_for_lot),
                )
                .route(
                    "/shipments",
                    post(shipments::create_shipment).get(shipments::list_shipments),
                )
                .route("/shipments/:id", get(shipments::get_shipment))
                .route("/shipments/:id/status", put(shipments::update_status))
                .route(
                    "/shipments/:id/settlement/recompute",
                    post(shipments::recompute_settlement),
                ),
        )
        .with_state(state)
}

/// Liveness/readiness probe; pings the database
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.ping().await {
        Ok(()) => Json(serde_json::json!({ "status": "ok" })),
        Err(e) => Json(serde_json::json!({ "status": "degraded", "database": e.to_string() })),
    }
}
