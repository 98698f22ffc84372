#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use scentstock_api::{
    commands::sales::create_sale_command::SaleLineRequest,
    config::AppConfig,
    db::{self, DbConfig},
    entities::{sale_item_allocation, shipment, shipment_item},
    events::{self, EventSender},
    handlers::AppServices,
    services::shipments::{CreateShipmentRequest, ShipmentLineRequest, ShipmentResponse},
    AppState,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Helper harness building the full service stack over an in-memory
/// SQLite database with migrations applied.
pub struct TestApp {
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );

        // A single connection keeps every query on the same in-memory
        // database.
        let db_config = DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(5),
        };
        let db_pool = db::establish_connection_with_config(&db_config)
            .await
            .expect("connect to in-memory sqlite");
        db::run_migrations(&db_pool).await.expect("run migrations");
        let db_arc = Arc::new(db_pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            cfg.default_usd_dop_rate,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        Self {
            state,
            _event_task: event_task,
        }
    }

    /// Receives a single-lot shipment of one product and returns it.
    pub async fn seed_shipment(
        &self,
        lines: Vec<ShipmentLineRequest>,
        shipping_cost: Decimal,
        additional_costs: Decimal,
        arrived_at: DateTime<Utc>,
    ) -> ShipmentResponse {
        self.state
            .services
            .shipments
            .create_shipment(CreateShipmentRequest {
                lines,
                shipping_cost,
                additional_costs,
                arrived_at: Some(arrived_at),
            })
            .await
            .expect("seed shipment")
    }

    pub async fn lot_remaining(&self, lot_id: Uuid) -> i32 {
        shipment_item::Entity::find_by_id(lot_id)
            .one(&*self.state.db)
            .await
            .expect("query lot")
            .expect("lot exists")
            .remaining_inventory
    }

    pub async fn shipment_row(&self, shipment_id: Uuid) -> shipment::Model {
        shipment::Entity::find_by_id(shipment_id)
            .one(&*self.state.db)
            .await
            .expect("query shipment")
            .expect("shipment exists")
    }

    pub async fn allocations_for_lot(&self, lot_id: Uuid) -> Vec<sale_item_allocation::Model> {
        sale_item_allocation::Entity::find()
            .filter(sale_item_allocation::Column::ShipmentItemId.eq(lot_id))
            .all(&*self.state.db)
            .await
            .expect("query allocations")
    }
}

pub fn shipment_line(
    brand: &str,
    name: &str,
    size: &str,
    quantity: i32,
    unit_cost: Decimal,
) -> ShipmentLineRequest {
    ShipmentLineRequest {
        brand: brand.to_string(),
        name: name.to_string(),
        size: size.to_string(),
        quantity,
        unit_cost,
    }
}

pub fn sale_line(
    brand: &str,
    name: &str,
    size: &str,
    quantity: i32,
    unit_price: Decimal,
) -> SaleLineRequest {
    SaleLineRequest {
        brand: brand.to_string(),
        name: name.to_string(),
        size: size.to_string(),
        quantity,
        unit_price,
    }
}
