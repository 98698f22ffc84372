use crate::{
    db::DbPool,
    entities::{sale, sale_item, sale_item_allocation, shipment, shipment_item},
    errors::ServiceError,
    services::allocation::AllocationPlan,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// The settlement contribution of one sale to one shipment: revenue in
/// USD (converted at the sale's frozen rate) and the FIFO cost of the
/// units drawn from that shipment's lots.
#[derive(Debug, Clone, PartialEq)]
pub struct ShipmentDelta {
    pub shipment_id: Uuid,
    pub revenue_usd: Decimal,
    pub cost: Decimal,
}

/// Groups a sale's applied allocation plans by owning shipment.
///
/// Revenue per allocation is `quantity x line unit_price` in the sale's
/// currency, converted to USD; cost is the allocation's
/// `quantity x unit_cost`, already USD. Pure computation, deterministic
/// order (shipments sorted by id).
pub fn compute_shipment_deltas(
    sale: &sale::Model,
    lines: &[(sale_item::Model, AllocationPlan)],
) -> Vec<ShipmentDelta> {
    let mut grouped: BTreeMap<Uuid, (Decimal, Decimal)> = BTreeMap::new();

    for (line, plan) in lines {
        for entry in &plan.allocations {
            let revenue = sale.to_usd(Decimal::from(entry.quantity) * line.unit_price);
            let cost = Decimal::from(entry.quantity) * entry.unit_cost;
            let slot = grouped
                .entry(entry.shipment_id)
                .or_insert((Decimal::ZERO, Decimal::ZERO));
            slot.0 += revenue;
            slot.1 += cost;
        }
    }

    grouped
        .into_iter()
        .map(|(shipment_id, (revenue_usd, cost))| ShipmentDelta {
            shipment_id,
            revenue_usd,
            cost,
        })
        .collect()
}

/// Applies settlement deltas to each affected shipment.
///
/// `total_revenue` accumulates; `net_profit` is recomputed from the new
/// revenue and the fixed `total_cost` rather than incremented, so repeated
/// settlements cannot drift it. Runs on the sale's transaction.
#[instrument(skip(conn, deltas), fields(shipments = deltas.len()))]
pub async fn apply_deltas<C: ConnectionTrait>(
    conn: &C,
    deltas: &[ShipmentDelta],
) -> Result<(), ServiceError> {
    for delta in deltas {
        let owning = shipment::Entity::find_by_id(delta.shipment_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Shipment {} not found", delta.shipment_id))
            })?;

        let new_revenue = owning.total_revenue + delta.revenue_usd;
        let total_cost = owning.total_cost;

        let mut active: shipment::ActiveModel = owning.into();
        active.total_revenue = Set(new_revenue);
        active.net_profit = Set(new_revenue - total_cost);
        active.updated_at = Set(Some(Utc::now()));
        active.update(conn).await?;

        info!(
            shipment_id = %delta.shipment_id,
            revenue_delta = %delta.revenue_usd,
            cost_delta = %delta.cost,
            "shipment aggregates settled"
        );
    }

    Ok(())
}

/// Recomputes a shipment's aggregates from scratch out of its allocation
/// records, for reconciliation and audit. Idempotent, and must agree with
/// the incremental path.
#[instrument(skip(conn), fields(shipment_id = %shipment_id))]
pub async fn recompute_shipment<C: ConnectionTrait>(
    conn: &C,
    shipment_id: Uuid,
) -> Result<shipment::Model, ServiceError> {
    let owning = shipment::Entity::find_by_id(shipment_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Shipment {} not found", shipment_id)))?;

    let lot_ids: Vec<Uuid> = shipment_item::Entity::find()
        .filter(shipment_item::Column::ShipmentId.eq(shipment_id))
        .all(conn)
        .await?
        .into_iter()
        .map(|lot| lot.id)
        .collect();

    let allocations = if lot_ids.is_empty() {
        Vec::new()
    } else {
        sale_item_allocation::Entity::find()
            .filter(sale_item_allocation::Column::ShipmentItemId.is_in(lot_ids))
            .all(conn)
            .await?
    };

    let line_ids: Vec<Uuid> = allocations.iter().map(|a| a.sale_item_id).collect();
    let lines: HashMap<Uuid, sale_item::Model> = if line_ids.is_empty() {
        HashMap::new()
    } else {
        sale_item::Entity::find()
            .filter(sale_item::Column::Id.is_in(line_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|line| (line.id, line))
            .collect()
    };

    let sale_ids: Vec<Uuid> = lines.values().map(|line| line.sale_id).collect();
    let sales: HashMap<Uuid, sale::Model> = if sale_ids.is_empty() {
        HashMap::new()
    } else {
        sale::Entity::find()
            .filter(sale::Column::Id.is_in(sale_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect()
    };

    let mut total_revenue = Decimal::ZERO;
    for allocation in &allocations {
        let line = lines.get(&allocation.sale_item_id).ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Allocation {} references missing sale line {}",
                allocation.id, allocation.sale_item_id
            ))
        })?;
        let owning_sale = sales.get(&line.sale_id).ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Sale line {} references missing sale {}",
                line.id, line.sale_id
            ))
        })?;
        total_revenue += owning_sale.to_usd(Decimal::from(allocation.quantity) * line.unit_price);
    }

    let total_cost = owning.total_cost;
    let mut active: shipment::ActiveModel = owning.into();
    active.total_revenue = Set(total_revenue);
    active.net_profit = Set(total_revenue - total_cost);
    active.updated_at = Set(Some(Utc::now()));
    let updated = active.update(conn).await?;

    info!(
        shipment_id = %shipment_id,
        total_revenue = %updated.total_revenue,
        net_profit = %updated.net_profit,
        "shipment aggregates recomputed"
    );

    Ok(updated)
}

/// Service wrapper exposing the reconciliation recompute to handlers
#[derive(Clone)]
pub struct SettlementService {
    db_pool: Arc<DbPool>,
}

impl SettlementService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    pub async fn recompute(&self, shipment_id: Uuid) -> Result<shipment::Model, ServiceError> {
        recompute_shipment(&*self.db_pool, shipment_id).await
    }
}
