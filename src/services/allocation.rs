use crate::{
    entities::{sale_item_allocation, shipment_item},
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

/// A lot as seen by the planner: current remaining stock and the cost it
/// was received at. Slices handed to `plan_fifo` are ordered oldest-first
/// by the ledger query (`fetch_available_lots`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableLot {
    pub lot_id: Uuid,
    pub shipment_id: Uuid,
    pub remaining: i32,
    pub unit_cost: Decimal,
}

/// One planned draw against a lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAllocation {
    pub lot_id: Uuid,
    pub shipment_id: Uuid,
    pub quantity: i32,
    pub unit_cost: Decimal,
}

/// The outcome of planning one sale line: which lots supply it and the
/// FIFO-weighted cost of the units drawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub product_id: Uuid,
    pub quantity: i32,
    pub total_cost: Decimal,
    pub allocations: Vec<PlannedAllocation>,
}

/// Plans a FIFO allocation of `quantity_needed` units against `lots`.
///
/// Pure decision logic: nothing is read or written here. Lots are walked
/// in the order given, each contributing `min(remaining, still_needed)`.
/// All-or-nothing: a shortfall returns `InsufficientInventory` and no
/// partial plan.
pub fn plan_fifo(
    product_id: Uuid,
    lots: &[AvailableLot],
    quantity_needed: i32,
) -> Result<AllocationPlan, ServiceError> {
    if quantity_needed <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "Allocation quantity must be positive, got {quantity_needed}"
        )));
    }

    let available: i32 = lots.iter().map(|lot| lot.remaining).sum();
    if available < quantity_needed {
        return Err(ServiceError::InsufficientInventory {
            needed: quantity_needed,
            available,
        });
    }

    let mut allocations = Vec::new();
    let mut total_cost = Decimal::ZERO;
    let mut still_needed = quantity_needed;

    for lot in lots {
        if still_needed == 0 {
            break;
        }
        if lot.remaining <= 0 {
            continue;
        }
        let taken = lot.remaining.min(still_needed);
        total_cost += Decimal::from(taken) * lot.unit_cost;
        allocations.push(PlannedAllocation {
            lot_id: lot.lot_id,
            shipment_id: lot.shipment_id,
            quantity: taken,
            unit_cost: lot.unit_cost,
        });
        still_needed -= taken;
    }

    debug_assert_eq!(still_needed, 0);

    Ok(AllocationPlan {
        product_id,
        quantity: quantity_needed,
        total_cost,
        allocations,
    })
}

/// Applies a planned allocation for one sale line.
///
/// Runs on the caller's connection, which for sale creation is the sale's
/// transaction: a failure on any lot rolls back every earlier write of the
/// same sale. Per entry this inserts the provenance record with the
/// unit_cost captured at planning time, then decrements the lot with a
/// conditional update (`remaining_inventory >= quantity`). Zero rows
/// affected means a concurrent sale consumed the lot after planning;
/// surfaced as `AllocationConflict` so the caller can re-plan.
#[instrument(skip(conn, plan), fields(sale_item_id = %sale_item_id, lots = plan.allocations.len()))]
pub async fn apply_plan<C: ConnectionTrait>(
    conn: &C,
    sale_item_id: Uuid,
    plan: &AllocationPlan,
) -> Result<(), ServiceError> {
    let now = Utc::now();

    for entry in &plan.allocations {
        sale_item_allocation::ActiveModel {
            id: Set(Uuid::new_v4()),
            sale_item_id: Set(sale_item_id),
            shipment_item_id: Set(entry.lot_id),
            quantity: Set(entry.quantity),
            unit_cost: Set(entry.unit_cost),
            allocated_at: Set(now),
            created_at: Set(now),
        }
        .insert(conn)
        .await?;

        let update = shipment_item::Entity::update_many()
            .col_expr(
                shipment_item::Column::RemainingInventory,
                Expr::col(shipment_item::Column::RemainingInventory).sub(entry.quantity),
            )
            .col_expr(shipment_item::Column::UpdatedAt, Expr::value(now))
            .filter(shipment_item::Column::Id.eq(entry.lot_id))
            .filter(shipment_item::Column::RemainingInventory.gte(entry.quantity))
            .exec(conn)
            .await?;

        if update.rows_affected == 0 {
            debug!(lot_id = %entry.lot_id, quantity = entry.quantity, "lot consumed since planning");
            return Err(ServiceError::AllocationConflict(entry.lot_id));
        }
    }

    Ok(())
}
