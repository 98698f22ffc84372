use crate::{
    commands::inventory::adjust_inventory_command::AdjustInventoryCommand,
    commands::Command,
    db::DbPool,
    entities::{inventory_adjustment, product, shipment, shipment_item},
    errors::ServiceError,
    events::EventSender,
    services::allocation::AvailableLot,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, JoinType, QueryFilter, QueryOrder,
    QuerySelect, RelationTrait, Set,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Looks a product up by its natural key.
pub async fn find_product<C: ConnectionTrait>(
    conn: &C,
    brand: &str,
    name: &str,
    size: &str,
) -> Result<product::Model, ServiceError> {
    product::Entity::find()
        .filter(product::Column::Brand.eq(brand))
        .filter(product::Column::Name.eq(name))
        .filter(product::Column::Size.eq(size))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::ProductNotFound {
            brand: brand.to_string(),
            name: name.to_string(),
            size: size.to_string(),
        })
}

/// Resolves a product by natural key, creating the catalog entry when
/// receiving stock introduces a new one.
pub async fn find_or_create_product<C: ConnectionTrait>(
    conn: &C,
    brand: &str,
    name: &str,
    size: &str,
) -> Result<product::Model, ServiceError> {
    match find_product(conn, brand, name, size).await {
        Ok(found) => Ok(found),
        Err(ServiceError::ProductNotFound { .. }) => {
            let created = product::ActiveModel {
                id: Set(Uuid::new_v4()),
                brand: Set(brand.to_string()),
                name: Set(name.to_string()),
                size: Set(size.to_string()),
                created_at: Set(Utc::now()),
                updated_at: Set(None),
            }
            .insert(conn)
            .await?;
            Ok(created)
        }
        Err(other) => Err(other),
    }
}

/// Fetches a product's lots with stock left, oldest first.
///
/// This is the read the FIFO planner consumes: ordered by the owning
/// shipment's arrival, then lot creation, then lot id so two lots sharing
/// an ordering key still come back in a stable, reproducible order. Always
/// reads current ledger state; callers must not substitute a cached copy.
pub async fn fetch_available_lots<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<Vec<AvailableLot>, ServiceError> {
    let lots = shipment_item::Entity::find()
        .filter(shipment_item::Column::ProductId.eq(product_id))
        .filter(shipment_item::Column::RemainingInventory.gt(0))
        .join(JoinType::InnerJoin, shipment_item::Relation::Shipment.def())
        .order_by_asc(shipment::Column::ArrivedAt)
        .order_by_asc(shipment_item::Column::CreatedAt)
        .order_by_asc(shipment_item::Column::Id)
        .all(conn)
        .await?;

    Ok(lots
        .into_iter()
        .map(|lot| AvailableLot {
            lot_id: lot.id,
            shipment_id: lot.shipment_id,
            remaining: lot.remaining_inventory,
            unit_cost: lot.unit_cost,
        })
        .collect())
}

/// Service for the inventory ledger: available stock views and explicit
/// adjustments.
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// The FIFO-ordered available-inventory view for a product identity
    #[instrument(skip(self))]
    pub async fn available_for_identity(
        &self,
        brand: &str,
        name: &str,
        size: &str,
    ) -> Result<(product::Model, Vec<AvailableLot>), ServiceError> {
        let db = &*self.db_pool;
        let item = find_product(db, brand, name, size).await?;
        let lots = fetch_available_lots(db, item.id).await?;
        Ok((item, lots))
    }

    /// Total units on hand across all of a product's lots
    #[instrument(skip(self))]
    pub async fn on_hand(&self, product_id: Uuid) -> Result<i32, ServiceError> {
        let lots = fetch_available_lots(&*self.db_pool, product_id).await?;
        Ok(lots.iter().map(|lot| lot.remaining).sum())
    }

    /// Applies an explicit inventory adjustment
    #[instrument(skip(self))]
    pub async fn adjust_inventory(
        &self,
        command: AdjustInventoryCommand,
    ) -> Result<inventory_adjustment::Model, ServiceError> {
        command
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await
    }

    /// Adjustment history for one lot, newest first
    #[instrument(skip(self))]
    pub async fn adjustments_for_lot(
        &self,
        shipment_item_id: Uuid,
    ) -> Result<Vec<inventory_adjustment::Model>, ServiceError> {
        let rows = inventory_adjustment::Entity::find()
            .filter(inventory_adjustment::Column::ShipmentItemId.eq(shipment_item_id))
            .order_by_desc(inventory_adjustment::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?;
        Ok(rows)
    }
}
