use crate::{
    commands::Command,
    db::DbPool,
    entities::{inventory_adjustment, shipment_item},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Explicit correction of a lot's remaining inventory, outside the
/// allocation path. Negative deltas write off stock; positive deltas
/// restore it. Restoring beyond the lot's original quantity requires the
/// explicit confirmation flag.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AdjustInventoryCommand {
    pub shipment_item_id: Uuid,
    pub quantity_delta: i32,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    #[serde(default)]
    pub allow_exceeding_original: bool,
}

#[async_trait::async_trait]
impl Command for AdjustInventoryCommand {
    type Result = inventory_adjustment::Model;

    #[instrument(skip(self, db_pool, event_sender), fields(shipment_item_id = %self.shipment_item_id, quantity_delta = self.quantity_delta))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        if self.quantity_delta == 0 {
            return Err(ServiceError::ValidationError(
                "Adjustment delta must be non-zero".to_string(),
            ));
        }

        let db = db_pool.as_ref();
        let txn = db.begin().await?;

        let lot = shipment_item::Entity::find_by_id(self.shipment_item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Lot {} not found", self.shipment_item_id))
            })?;

        let previous_remaining = lot.remaining_inventory;
        let new_remaining = previous_remaining + self.quantity_delta;

        if new_remaining < 0 {
            return Err(ServiceError::InvalidAdjustment(format!(
                "Adjustment would drive remaining inventory to {} (lot has {})",
                new_remaining, previous_remaining
            )));
        }
        if new_remaining > lot.quantity && !self.allow_exceeding_original {
            return Err(ServiceError::InvalidAdjustment(format!(
                "Adjustment would raise remaining inventory to {} above the original quantity {}; \
                 confirm with allow_exceeding_original",
                new_remaining, lot.quantity
            )));
        }

        // Guarded against concurrent allocation draining the lot between
        // the read above and this write.
        let update = shipment_item::Entity::update_many()
            .col_expr(
                shipment_item::Column::RemainingInventory,
                sea_orm::sea_query::Expr::value(new_remaining),
            )
            .col_expr(
                shipment_item::Column::UpdatedAt,
                sea_orm::sea_query::Expr::value(Utc::now()),
            )
            .filter(shipment_item::Column::Id.eq(self.shipment_item_id))
            .filter(shipment_item::Column::RemainingInventory.eq(previous_remaining))
            .exec(&txn)
            .await?;

        if update.rows_affected == 0 {
            let _ = txn.rollback().await;
            return Err(ServiceError::InvalidOperation(format!(
                "Lot {} changed concurrently; retry the adjustment",
                self.shipment_item_id
            )));
        }

        let adjustment = inventory_adjustment::ActiveModel {
            id: Set(Uuid::new_v4()),
            shipment_item_id: Set(self.shipment_item_id),
            quantity_delta: Set(self.quantity_delta),
            previous_remaining: Set(previous_remaining),
            new_remaining: Set(new_remaining),
            reason: Set(self.reason.clone()),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(
            shipment_item_id = %self.shipment_item_id,
            previous_remaining,
            new_remaining,
            "inventory adjusted"
        );

        if let Err(e) = event_sender
            .send(Event::InventoryAdjusted {
                shipment_item_id: self.shipment_item_id,
                previous_remaining,
                new_remaining,
                reason: self.reason.clone(),
            })
            .await
        {
            warn!(error = %e, shipment_item_id = %self.shipment_item_id, "failed to send inventory adjusted event");
        }

        Ok(adjustment)
    }
}
