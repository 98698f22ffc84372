use crate::{
    commands::Command,
    db::DbPool,
    entities::{
        sale::{self, PaymentStatus},
        sale_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::sales::apportion_payment,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinePayment {
    pub sale_item_id: Uuid,
    pub additional_amount: Decimal,
}

/// Records additional payments against individual sale lines, then
/// re-derives the sale-level amount_paid, outstanding_balance and
/// payment_status from the lines.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdatePaymentCommand {
    pub sale_id: Uuid,
    #[validate(length(min = 1, message = "At least one line payment is required"))]
    pub payments: Vec<LinePayment>,
}

#[derive(Debug, Clone)]
pub struct PaymentUpdateResult {
    pub sale: sale::Model,
    pub items: Vec<sale_item::Model>,
}

#[async_trait::async_trait]
impl Command for UpdatePaymentCommand {
    type Result = PaymentUpdateResult;

    #[instrument(skip(self, db_pool, event_sender), fields(sale_id = %self.sale_id, payments = self.payments.len()))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        for payment in &self.payments {
            if payment.additional_amount <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Additional payment for line {} must be positive",
                    payment.sale_item_id
                )));
            }
        }

        // Multiple entries for one line collapse into a single payment.
        let mut additional_by_line: HashMap<Uuid, Decimal> = HashMap::new();
        for payment in &self.payments {
            *additional_by_line
                .entry(payment.sale_item_id)
                .or_insert(Decimal::ZERO) += payment.additional_amount;
        }

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

        for line_id in additional_by_line.keys() {
            if !lines.iter().any(|line| line.id == *line_id) {
                return Err(ServiceError::NotFound(format!(
                    "Sale line {} does not belong to sale {}",
                    line_id, self.sale_id
                )));
            }
        }

        let baselines = materialize_baselines(&sale_row, &lines);

        // Everything is computed and checked before any write.
        let mut new_amounts = Vec::with_capacity(lines.len());
        for (line, baseline) in lines.iter().zip(&baselines) {
            let additional = additional_by_line
                .get(&line.id)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let attempted = *baseline + additional;
            if attempted > line.line_total {
                return Err(ServiceError::PaymentExceedsTotal {
                    line_total: line.line_total,
                    attempted,
                });
            }
            new_amounts.push(attempted);
        }

        let now = Utc::now();
        let mut updated_items = Vec::with_capacity(lines.len());
        for (line, new_amount) in lines.into_iter().zip(&new_amounts) {
            if line.amount_paid == Some(*new_amount) {
                updated_items.push(line);
                continue;
            }
            let mut active: sale_item::ActiveModel = line.into();
            active.amount_paid = Set(Some(*new_amount));
            active.updated_at = Set(Some(now));
            updated_items.push(active.update(&txn).await?);
        }

        let amount_paid: Decimal = new_amounts.iter().copied().sum();
        let total_amount = sale_row.total_amount;
        let mut active_sale: sale::ActiveModel = sale_row.into();
        active_sale.amount_paid = Set(amount_paid);
        active_sale.outstanding_balance = Set(total_amount - amount_paid);
        active_sale.payment_status = Set(PaymentStatus::derive(total_amount, amount_paid));
        active_sale.updated_at = Set(Some(now));
        let updated_sale = active_sale.update(&txn).await?;

        txn.commit().await?;

        info!(
            sale_id = %self.sale_id,
            amount_paid = %updated_sale.amount_paid,
            outstanding_balance = %updated_sale.outstanding_balance,
            "payment recorded"
        );

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

/// Baseline amount paid per line before this payment applies.
///
/// Lines carrying a figure keep it. Legacy lines without one share the
/// sale-level amount not yet attributed to any line, apportioned by
/// line-total share with the last such line absorbing the rounding
/// remainder, so the lines reconcile exactly with the sale.
pub(crate) fn materialize_baselines(
    sale_row: &sale::Model,
    lines: &[sale_item::Model],
) -> Vec<Decimal> {
    let attributed: Decimal = lines.iter().filter_map(|line| line.amount_paid).sum();
    let unattributed = (sale_row.amount_paid - attributed).max(Decimal::ZERO);

    let legacy_totals: Vec<Decimal> = lines
        .iter()
        .filter(|line| line.amount_paid.is_none())
        .map(|line| line.line_total)
        .collect();
    let mut legacy_shares = apportion_payment(unattributed, &legacy_totals).into_iter();

    lines
        .iter()
        .map(|line| match line.amount_paid {
            Some(paid) => paid,
            None => legacy_shares.next().unwrap_or(Decimal::ZERO),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::sale::SaleCurrency;
    use rust_decimal_macros::dec;

    fn sale_with(total: Decimal, paid: Decimal) -> sale::Model {
        sale::Model {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            sale_date: Utc::now(),
            currency: SaleCurrency::Usd,
            exchange_rate_used: dec!(1),
            total_amount: total,
            amount_paid: paid,
            outstanding_balance: total - paid,
            payment_status: PaymentStatus::derive(total, paid),
            notes: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn line_with(sale_id: Uuid, line_total: Decimal, paid: Option<Decimal>) -> sale_item::Model {
        sale_item::Model {
            id: Uuid::new_v4(),
            sale_id,
            product_id: Uuid::new_v4(),
            quantity: 1,
            unit_price: line_total,
            line_total,
            amount_paid: paid,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn keeps_existing_line_figures() {
        let sale_row = sale_with(dec!(100), dec!(40));
        let lines = vec![
            line_with(sale_row.id, dec!(60), Some(dec!(30))),
            line_with(sale_row.id, dec!(40), Some(dec!(10))),
        ];
        assert_eq!(
            materialize_baselines(&sale_row, &lines),
            vec![dec!(30), dec!(10)]
        );
    }

    #[test]
    fn apportions_legacy_lines_by_revenue_share() {
        let sale_row = sale_with(dec!(100), dec!(50));
        let lines = vec![
            line_with(sale_row.id, dec!(60), None),
            line_with(sale_row.id, dec!(40), None),
        ];
        let baselines = materialize_baselines(&sale_row, &lines);
        assert_eq!(baselines, vec![dec!(30), dec!(20)]);
        // The lines reconcile exactly with the sale-level figure.
        assert_eq!(baselines.iter().copied().sum::<Decimal>(), dec!(50));
    }

    #[test]
    fn last_legacy_line_absorbs_the_rounding_remainder() {
        let sale_row = sale_with(dec!(100), dec!(10));
        let lines = vec![
            line_with(sale_row.id, dec!(33.33), None),
            line_with(sale_row.id, dec!(33.33), None),
            line_with(sale_row.id, dec!(33.34), None),
        ];
        let baselines = materialize_baselines(&sale_row, &lines);
        assert_eq!(baselines.iter().copied().sum::<Decimal>(), dec!(10));
    }

    #[test]
    fn mixed_lines_apportion_only_the_unattributed_amount() {
        let sale_row = sale_with(dec!(100), dec!(45));
        let lines = vec![
            line_with(sale_row.id, dec!(50), Some(dec!(25))),
            line_with(sale_row.id, dec!(30), None),
            line_with(sale_row.id, dec!(20), None),
        ];
        let baselines = materialize_baselines(&sale_row, &lines);
        assert_eq!(baselines[0], dec!(25));
        // RD 20 unattributed splits 12/8 across the 30/20 legacy lines
        assert_eq!(baselines[1], dec!(12));
        assert_eq!(baselines[2], dec!(8));
    }
}
