use crate::{
    db::DbPool,
    entities::{
        shipment::{self, ShipmentStatus},
        shipment_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::inventory,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ShipmentLineRequest {
    #[validate(length(min = 1, message = "Brand is required"))]
    pub brand: String,
    #[validate(length(min = 1, message = "Product name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Size is required"))]
    pub size: String,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
    pub unit_cost: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateShipmentRequest {
    #[validate(length(min = 1, message = "At least one shipment line is required"))]
    pub lines: Vec<ShipmentLineRequest>,
    #[serde(default)]
    pub shipping_cost: Decimal,
    #[serde(default)]
    pub additional_costs: Decimal,
    /// Arrival order key for FIFO; defaults to now
    pub arrived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShipmentItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_cost: Decimal,
    pub remaining_inventory: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShipmentResponse {
    pub id: Uuid,
    pub status: String,
    pub shipping_cost: Decimal,
    pub additional_costs: Decimal,
    pub total_cost: Decimal,
    pub total_revenue: Decimal,
    pub net_profit: Decimal,
    pub arrived_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<ShipmentItemResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShipmentListResponse {
    pub shipments: Vec<ShipmentResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Service for managing inbound shipments and their lots
#[derive(Clone)]
pub struct ShipmentService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl ShipmentService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a shipment and its lots in one transaction.
    ///
    /// `total_cost` is computed here, once: lot costs plus shipping plus
    /// additional costs. Settlement only ever rewrites revenue and profit.
    #[instrument(skip(self, request), fields(lines = request.lines.len()))]
    pub async fn create_shipment(
        &self,
        request: CreateShipmentRequest,
    ) -> Result<ShipmentResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        for line in &request.lines {
            line.validate()
                .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
            if line.unit_cost < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Unit cost must not be negative".to_string(),
                ));
            }
        }
        if request.shipping_cost < Decimal::ZERO || request.additional_costs < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Shipment costs must not be negative".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let now = Utc::now();
        let shipment_id = Uuid::new_v4();

        let goods_cost: Decimal = request
            .lines
            .iter()
            .map(|line| Decimal::from(line.quantity) * line.unit_cost)
            .sum();
        let total_cost = goods_cost + request.shipping_cost + request.additional_costs;

        let txn = db.begin().await?;

        let shipment_row = shipment::ActiveModel {
            id: Set(shipment_id),
            status: Set(ShipmentStatus::Preparing),
            shipping_cost: Set(request.shipping_cost),
            additional_costs: Set(request.additional_costs),
            total_cost: Set(total_cost),
            total_revenue: Set(Decimal::ZERO),
            net_profit: Set(-total_cost),
            arrived_at: Set(request.arrived_at.unwrap_or(now)),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            let item =
                inventory::find_or_create_product(&txn, &line.brand, &line.name, &line.size)
                    .await?;
            let lot = shipment_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                shipment_id: Set(shipment_id),
                product_id: Set(item.id),
                quantity: Set(line.quantity),
                unit_cost: Set(line.unit_cost),
                remaining_inventory: Set(line.quantity),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            }
            .insert(&txn)
            .await?;
            items.push(lot);
        }

        txn.commit().await?;

        info!(shipment_id = %shipment_id, total_cost = %total_cost, "shipment created");

        if let Err(e) = self.event_sender.send(Event::ShipmentCreated(shipment_id)).await {
            warn!(error = %e, shipment_id = %shipment_id, "failed to send shipment created event");
        }

        Ok(model_to_response(shipment_row, items))
    }

    /// Advances a shipment's status through the receiving pipeline
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        shipment_id: Uuid,
        new_status: ShipmentStatus,
    ) -> Result<ShipmentResponse, ServiceError> {
        let db = &*self.db_pool;

        let shipment_row = shipment::Entity::find_by_id(shipment_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Shipment {} not found", shipment_id)))?;

        let old_status = shipment_row.status;
        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot move shipment {} from {} to {}",
                shipment_id, old_status, new_status
            )));
        }

        let mut active: shipment::ActiveModel = shipment_row.into();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(db).await?;

        info!(shipment_id = %shipment_id, old_status = %old_status, new_status = %new_status, "shipment status updated");

        if let Err(e) = self
            .event_sender
            .send(Event::ShipmentStatusChanged {
                shipment_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await
        {
            warn!(error = %e, shipment_id = %shipment_id, "failed to send shipment status event");
        }

        if new_status == ShipmentStatus::Settled {
            if let Err(e) = self
                .event_sender
                .send(Event::ShipmentSettled {
                    shipment_id,
                    total_revenue: updated.total_revenue,
                    net_profit: updated.net_profit,
                    settled_at: Utc::now(),
                })
                .await
            {
                warn!(error = %e, shipment_id = %shipment_id, "failed to send shipment settled event");
            }
        }

        let items = self.lots_for(shipment_id).await?;
        Ok(model_to_response(updated, items))
    }

    /// Gets a shipment with its lots
    #[instrument(skip(self))]
    pub async fn get_shipment(
        &self,
        shipment_id: Uuid,
    ) -> Result<Option<ShipmentResponse>, ServiceError> {
        let shipment_row = shipment::Entity::find_by_id(shipment_id)
            .one(&*self.db_pool)
            .await?;
        match shipment_row {
            Some(row) => {
                let items = self.lots_for(shipment_id).await?;
                Ok(Some(model_to_response(row, items)))
            }
            None => Ok(None),
        }
    }

    /// Lists shipments with pagination and an optional status filter
    #[instrument(skip(self))]
    pub async fn list_shipments(
        &self,
        page: u64,
        limit: u64,
        status: Option<String>,
    ) -> Result<ShipmentListResponse, ServiceError> {
        let mut query = shipment::Entity::find();

        if let Some(status_filter) = status {
            match status_filter.parse::<ShipmentStatus>() {
                Ok(parsed) => query = query.filter(shipment::Column::Status.eq(parsed)),
                Err(_) => {
                    return Ok(ShipmentListResponse {
                        shipments: vec![],
                        total: 0,
                        page,
                        per_page: limit,
                    })
                }
            }
        }

        let paginator = query
            .order_by_desc(shipment::Column::CreatedAt)
            .paginate(&*self.db_pool, limit);

        let total = paginator.num_items().await?;
        let shipments = paginator
            .fetch_page(page.saturating_sub(1))
            .await?
            .into_iter()
            .map(|row| model_to_response(row, Vec::new()))
            .collect();

        Ok(ShipmentListResponse {
            shipments,
            total,
            page,
            per_page: limit,
        })
    }

    async fn lots_for(&self, shipment_id: Uuid) -> Result<Vec<shipment_item::Model>, ServiceError> {
        let items = shipment_item::Entity::find()
            .filter(shipment_item::Column::ShipmentId.eq(shipment_id))
            .order_by_asc(shipment_item::Column::CreatedAt)
            .order_by_asc(shipment_item::Column::Id)
            .all(&*self.db_pool)
            .await?;
        Ok(items)
    }
}

/// Converts a shipment model plus lots to response format
fn model_to_response(row: shipment::Model, items: Vec<shipment_item::Model>) -> ShipmentResponse {
    ShipmentResponse {
        id: row.id,
        status: row.status.to_string(),
        shipping_cost: row.shipping_cost,
        additional_costs: row.additional_costs,
        total_cost: row.total_cost,
        total_revenue: row.total_revenue,
        net_profit: row.net_profit,
        arrived_at: row.arrived_at,
        created_at: row.created_at,
        items: items
            .into_iter()
            .map(|lot| ShipmentItemResponse {
                id: lot.id,
                product_id: lot.product_id,
                quantity: lot.quantity,
                unit_cost: lot.unit_cost,
                remaining_inventory: lot.remaining_inventory,
            })
            .collect(),
    }
}
