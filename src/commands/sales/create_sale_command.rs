use crate::{
    commands::Command,
    db::DbPool,
    entities::{
        customer, product,
        sale::{self, PaymentStatus, SaleCurrency},
        sale_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        allocation::{self, AllocationPlan},
        customers, inventory,
        sales::apportion_payment,
        settlement,
    },
};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseTransaction, EntityTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

lazy_static! {
    static ref SALES_CREATED: IntCounter =
        IntCounter::new("sales_created_total", "Total number of sales created")
            .expect("metric can be created");
    static ref SALE_CREATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "sale_creation_failures_total",
            "Total number of failed sale creations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
    static ref UNITS_ALLOCATED: IntCounter = IntCounter::new(
        "sale_units_allocated_total",
        "Total units drawn from inventory lots by sales"
    )
    .expect("metric can be created");
}

/// Re-planning attempts when a concurrent sale wins a lot between our
/// planning read and the conditional decrement.
const MAX_ALLOCATION_ATTEMPTS: usize = 3;

/// The customer a sale is attached to: an existing id, or a name to
/// find-or-create by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRef {
    pub customer_id: Option<Uuid>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaleLineRequest {
    #[validate(length(min = 1, message = "Brand is required"))]
    pub brand: String,
    #[validate(length(min = 1, message = "Product name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Size is required"))]
    pub size: String,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// The "create a sale" unit of work: resolve the customer, plan every
/// line against fresh inventory reads, then persist the sale, its lines,
/// their allocations, and the shipment settlement in one transaction.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateSaleCommand {
    pub customer: CustomerRef,
    #[validate(length(min = 1, message = "At least one sale line is required"))]
    pub lines: Vec<SaleLineRequest>,
    pub currency: SaleCurrency,
    /// USD->DOP rate to freeze into the sale; DOP sales without one take
    /// the configured fallback
    pub exchange_rate: Option<Decimal>,
    pub amount_paid: Decimal,
    pub sale_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    /// Fallback rate injected from configuration by the sale service
    #[serde(skip)]
    pub fallback_exchange_rate: Decimal,
}

#[derive(Debug, Clone)]
pub struct CreateSaleResult {
    pub sale: sale::Model,
    pub items: Vec<sale_item::Model>,
    pub plans: Vec<AllocationPlan>,
}

#[async_trait::async_trait]
impl Command for CreateSaleCommand {
    type Result = CreateSaleResult;

    #[instrument(skip(self, db_pool, event_sender), fields(lines = self.lines.len(), currency = %self.currency))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate().map_err(|e| {
            SALE_CREATION_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            ServiceError::ValidationError(e.to_string())
        })?;
        for line in &self.lines {
            line.validate()
                .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
            if line.unit_price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Unit price must not be negative".to_string(),
                ));
            }
        }
        if self.amount_paid < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Amount paid must not be negative".to_string(),
            ));
        }

        let exchange_rate_used = match self.currency {
            SaleCurrency::Usd => Decimal::ONE,
            SaleCurrency::Dop => self.exchange_rate.unwrap_or(self.fallback_exchange_rate),
        };
        if exchange_rate_used <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Exchange rate must be positive, got {exchange_rate_used}"
            )));
        }

        let db = db_pool.as_ref();

        let buyer = self.resolve_customer(db, &event_sender).await?;

        // Products are stable across allocation retries; resolve once.
        let mut products = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            products.push(inventory::find_product(db, &line.brand, &line.name, &line.size).await?);
        }

        for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
            // Plan every line before applying any of them: a shortfall on
            // one line aborts the whole sale without touching the ledger.
            let mut plans: Vec<AllocationPlan> = Vec::with_capacity(self.lines.len());
            for (line, item) in self.lines.iter().zip(&products) {
                let lots = inventory::fetch_available_lots(db, item.id).await?;
                let plan = allocation::plan_fifo(item.id, &lots, line.quantity).map_err(|e| {
                    if matches!(e, ServiceError::InsufficientInventory { .. }) {
                        SALE_CREATION_FAILURES
                            .with_label_values(&["insufficient_inventory"])
                            .inc();
                    }
                    e
                })?;
                plans.push(plan);
            }

            match self
                .apply(db, &buyer, &products, &plans, exchange_rate_used)
                .await
            {
                Ok(result) => {
                    SALES_CREATED.inc();
                    UNITS_ALLOCATED.inc_by(plans.iter().map(|p| p.quantity as u64).sum());

                    info!(
                        sale_id = %result.sale.id,
                        customer_id = %buyer.id,
                        total_amount = %result.sale.total_amount,
                        "sale created"
                    );

                    if let Err(e) = event_sender.send(Event::SaleCreated(result.sale.id)).await {
                        warn!(error = %e, sale_id = %result.sale.id, "failed to send sale created event");
                    }
                    for (item, plan) in result.items.iter().zip(&result.plans) {
                        if let Err(e) = event_sender
                            .send(Event::InventoryAllocated {
                                sale_item_id: item.id,
                                lot_count: plan.allocations.len(),
                                quantity: plan.quantity,
                            })
                            .await
                        {
                            warn!(error = %e, sale_item_id = %item.id, "failed to send allocation event");
                        }
                    }

                    return Ok(result);
                }
                Err(ServiceError::AllocationConflict(lot_id)) => {
                    SALE_CREATION_FAILURES
                        .with_label_values(&["allocation_conflict"])
                        .inc();
                    warn!(
                        attempt,
                        lot_id = %lot_id,
                        "lot consumed by a concurrent sale; re-planning"
                    );
                }
                Err(other) => {
                    SALE_CREATION_FAILURES
                        .with_label_values(&["write_failure"])
                        .inc();
                    return Err(other);
                }
            }
        }

        error!(
            attempts = MAX_ALLOCATION_ATTEMPTS,
            "sale allocation kept conflicting; giving up"
        );
        Err(ServiceError::InvalidOperation(format!(
            "Sale allocation conflicted {MAX_ALLOCATION_ATTEMPTS} times; inventory is contended, retry the sale"
        )))
    }
}

impl CreateSaleCommand {
    async fn resolve_customer(
        &self,
        db: &DbPool,
        event_sender: &EventSender,
    ) -> Result<customer::Model, ServiceError> {
        match self.customer.customer_id {
            Some(id) => customer::Entity::find_by_id(id)
                .one(db)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Customer {} not found", id))),
            None => {
                let name = self.customer.name.as_deref().ok_or_else(|| {
                    ServiceError::ValidationError(
                        "Either customer_id or customer name is required".to_string(),
                    )
                })?;
                let (found, created) =
                    customers::find_or_create_customer(db, name, self.customer.phone.as_deref())
                        .await?;
                if created {
                    if let Err(e) = event_sender.send(Event::CustomerCreated(found.id)).await {
                        warn!(error = %e, customer_id = %found.id, "failed to send customer created event");
                    }
                }
                Ok(found)
            }
        }
    }

    async fn apply(
        &self,
        db: &DbPool,
        buyer: &customer::Model,
        products: &[product::Model],
        plans: &[AllocationPlan],
        exchange_rate_used: Decimal,
    ) -> Result<CreateSaleResult, ServiceError> {
        let txn = db.begin().await?;
        match self
            .apply_in_txn(&txn, buyer, products, plans, exchange_rate_used)
            .await
        {
            Ok(result) => {
                txn.commit().await?;
                Ok(result)
            }
            Err(err) => {
                let _ = txn.rollback().await;
                Err(err)
            }
        }
    }

    async fn apply_in_txn(
        &self,
        txn: &DatabaseTransaction,
        buyer: &customer::Model,
        products: &[product::Model],
        plans: &[AllocationPlan],
        exchange_rate_used: Decimal,
    ) -> Result<CreateSaleResult, ServiceError> {
        let now = Utc::now();
        let sale_id = Uuid::new_v4();

        let line_totals: Vec<Decimal> = self
            .lines
            .iter()
            .map(|line| Decimal::from(line.quantity) * line.unit_price)
            .collect();
        let total_amount: Decimal = line_totals.iter().copied().sum();

        if self.amount_paid > total_amount {
            return Err(ServiceError::ValidationError(format!(
                "Amount paid {} exceeds sale total {}",
                self.amount_paid, total_amount
            )));
        }

        let sale_row = sale::ActiveModel {
            id: Set(sale_id),
            customer_id: Set(buyer.id),
            sale_date: Set(self.sale_date.unwrap_or(now)),
            currency: Set(self.currency),
            exchange_rate_used: Set(exchange_rate_used),
            total_amount: Set(total_amount),
            amount_paid: Set(self.amount_paid),
            outstanding_balance: Set(total_amount - self.amount_paid),
            payment_status: Set(PaymentStatus::derive(total_amount, self.amount_paid)),
            notes: Set(self.notes.clone()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(txn)
        .await?;

        // Line-level payment tracking starts reconciled with the sale.
        let shares = apportion_payment(self.amount_paid, &line_totals);

        let mut items = Vec::with_capacity(self.lines.len());
        let mut settled_lines = Vec::with_capacity(self.lines.len());
        for (idx, (line, item)) in self.lines.iter().zip(products).enumerate() {
            let sale_line = sale_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                sale_id: Set(sale_id),
                product_id: Set(item.id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                line_total: Set(line_totals[idx]),
                amount_paid: Set(Some(shares[idx])),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            }
            .insert(txn)
            .await?;

            allocation::apply_plan(txn, sale_line.id, &plans[idx]).await?;
            settled_lines.push((sale_line.clone(), plans[idx].clone()));
            items.push(sale_line);
        }

        let deltas = settlement::compute_shipment_deltas(&sale_row, &settled_lines);
        settlement::apply_deltas(txn, &deltas).await?;

        Ok(CreateSaleResult {
            sale: sale_row,
            items,
            plans: plans.to_vec(),
        })
    }
}
