use crate::{
    commands::{sales::update_payment_command::PaymentUpdateResult, Command},
    db::DbPool,
    entities::{
        sale::{self, PaymentStatus},
        sale_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Settles a sale in full: every line's amount_paid becomes its line
/// total in one operation, equivalent to a batch of maximal per-line
/// payments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayAllCommand {
    pub sale_id: Uuid,
}

#[async_trait::async_trait]
impl Command for PayAllCommand {
    type Result = PaymentUpdateResult;

    #[instrument(skip(self, db_pool, event_sender), fields(sale_id = %self.sale_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        let db = db_pool.as_ref();
        let txn = db.begin().await?;

        let sale_row = sale::Entity::find_by_id(self.sale_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Sale {} not found", self.sale_id)))?;

        let lines = sale_item::Entity::find()
            .filter(sale_item::Column::SaleId.eq(self.sale_id))
            .order_by_asc(sale_item::Column::CreatedAt)
            .order_by_asc(sale_item::Column::Id)
            .all(&txn)
            .await?;

        let now = Utc::now();
        let mut updated_items = Vec::with_capacity(lines.len());
        for line in lines {
            if line.amount_paid == Some(line.line_total) {
                updated_items.push(line);
                continue;
            }
            let line_total = line.line_total;
            let mut active: sale_item::ActiveModel = line.into();
            active.amount_paid = Set(Some(line_total));
            active.updated_at = Set(Some(now));
            updated_items.push(active.update(&txn).await?);
        }

        let total_amount = sale_row.total_amount;
        let mut active_sale: sale::ActiveModel = sale_row.into();
        active_sale.amount_paid = Set(total_amount);
        active_sale.outstanding_balance = Set(Decimal::ZERO);
        active_sale.payment_status = Set(PaymentStatus::derive(total_amount, total_amount));
        active_sale.updated_at = Set(Some(now));
        let updated_sale = active_sale.update(&txn).await?;

        txn.commit().await?;

        info!(sale_id = %self.sale_id, total_amount = %total_amount, "sale paid in full");

        if let Err(e) = event_sender
            .send(Event::PaymentRecorded {
                sale_id: self.sale_id,
                amount_paid: updated_sale.amount_paid,
                outstanding_balance: updated_sale.outstanding_balance,
            })
            .await
        {
            warn!(error = %e, sale_id = %self.sale_id, "failed to send payment recorded event");
        }

        Ok(PaymentUpdateResult {
            sale: updated_sale,
            items: updated_items,
        })
    }
}
