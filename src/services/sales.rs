use crate::{
    commands::sales::{
        create_sale_command::{CreateSaleCommand, CreateSaleResult, CustomerRef, SaleLineRequest},
        pay_all_command::PayAllCommand,
        update_payment_command::{LinePayment, PaymentUpdateResult, UpdatePaymentCommand},
    },
    commands::Command,
    db::DbPool,
    entities::{sale, sale_item},
    errors::ServiceError,
    events::EventSender,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

/// Splits a sale-level payment across lines by their share of the sale
/// total. All shares round to cents except the last, which absorbs the
/// remainder so the lines always sum back to the input exactly.
pub fn apportion_payment(total_paid: Decimal, line_totals: &[Decimal]) -> Vec<Decimal> {
    if line_totals.is_empty() {
        return Vec::new();
    }
    let grand_total: Decimal = line_totals.iter().copied().sum();
    if grand_total.is_zero() || total_paid.is_zero() {
        return vec![Decimal::ZERO; line_totals.len()];
    }

    let mut shares = Vec::with_capacity(line_totals.len());
    let mut assigned = Decimal::ZERO;
    for (idx, line_total) in line_totals.iter().enumerate() {
        if idx == line_totals.len() - 1 {
            shares.push(total_paid - assigned);
        } else {
            let share = (total_paid * line_total / grand_total).round_dp(2);
            assigned += share;
            shares.push(share);
        }
    }
    shares
}

/// Request/Response types for the sale service
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateSaleRequest {
    pub customer_id: Option<Uuid>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    #[validate(length(min = 1, message = "At least one sale line is required"))]
    pub lines: Vec<SaleLineRequest>,
    #[validate(length(min = 3, max = 3, message = "Currency must be 3 characters"))]
    pub currency: String,
    pub exchange_rate: Option<Decimal>,
    #[serde(default)]
    pub amount_paid: Decimal,
    pub sale_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaleItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub amount_paid: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaleResponse {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub sale_date: DateTime<Utc>,
    pub currency: String,
    pub exchange_rate_used: Decimal,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub outstanding_balance: Decimal,
    pub payment_status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<SaleItemResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaleListResponse {
    pub sales: Vec<SaleResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Service wrapping the sale and payment lifecycle commands
#[derive(Clone)]
pub struct SaleService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    default_usd_dop_rate: Decimal,
}

impl SaleService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        default_usd_dop_rate: Decimal,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            default_usd_dop_rate,
        }
    }

    /// Creates a sale: allocates every line FIFO, persists the sale with
    /// its provenance, and settles the touched shipments.
    #[instrument(skip(self, request), fields(lines = request.lines.len()))]
    pub async fn create_sale(&self, request: CreateSaleRequest) -> Result<SaleResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        let currency = request
            .currency
            .parse()
            .map_err(ServiceError::ValidationError)?;

        let command = CreateSaleCommand {
            customer: CustomerRef {
                customer_id: request.customer_id,
                name: request.customer_name,
                phone: request.customer_phone,
            },
            lines: request.lines,
            currency,
            exchange_rate: request.exchange_rate,
            amount_paid: request.amount_paid,
            sale_date: request.sale_date,
            notes: request.notes,
            fallback_exchange_rate: self.default_usd_dop_rate,
        };

        let CreateSaleResult { sale, items, .. } = command
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await?;
        Ok(model_to_response(sale, items))
    }

    /// Records additional per-line payments against a sale
    #[instrument(skip(self))]
    pub async fn update_payment(
        &self,
        sale_id: Uuid,
        payments: Vec<LinePayment>,
    ) -> Result<SaleResponse, ServiceError> {
        let command = UpdatePaymentCommand { sale_id, payments };
        let PaymentUpdateResult { sale, items } = command
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await?;
        Ok(model_to_response(sale, items))
    }

    /// Settles every line of a sale in full
    #[instrument(skip(self))]
    pub async fn pay_all(&self, sale_id: Uuid) -> Result<SaleResponse, ServiceError> {
        let command = PayAllCommand { sale_id };
        let PaymentUpdateResult { sale, items } = command
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await?;
        Ok(model_to_response(sale, items))
    }

    /// Retrieves a sale with its lines
    #[instrument(skip(self))]
    pub async fn get_sale(&self, sale_id: Uuid) -> Result<Option<SaleResponse>, ServiceError> {
        let db = &*self.db_pool;
        let Some(sale_row) = sale::Entity::find_by_id(sale_id).one(db).await? else {
            return Ok(None);
        };
        let items = sale_item::Entity::find()
            .filter(sale_item::Column::SaleId.eq(sale_id))
            .order_by_asc(sale_item::Column::CreatedAt)
            .order_by_asc(sale_item::Column::Id)
            .all(db)
            .await?;
        Ok(Some(model_to_response(sale_row, items)))
    }

    /// Lists sales with pagination, newest first; lines are not expanded
    #[instrument(skip(self))]
    pub async fn list_sales(&self, page: u64, per_page: u64) -> Result<SaleListResponse, ServiceError> {
        let paginator = sale::Entity::find()
            .order_by_desc(sale::Column::SaleDate)
            .paginate(&*self.db_pool, per_page);

        let total = paginator.num_items().await?;
        let sales = paginator
            .fetch_page(page.saturating_sub(1))
            .await?
            .into_iter()
            .map(|row| model_to_response(row, Vec::new()))
            .collect();

        Ok(SaleListResponse {
            sales,
            total,
            page,
            per_page,
        })
    }
}

/// Converts a sale model plus its lines to response format
fn model_to_response(sale_row: sale::Model, items: Vec<sale_item::Model>) -> SaleResponse {
    SaleResponse {
        id: sale_row.id,
        customer_id: sale_row.customer_id,
        sale_date: sale_row.sale_date,
        currency: sale_row.currency.to_string(),
        exchange_rate_used: sale_row.exchange_rate_used,
        total_amount: sale_row.total_amount,
        amount_paid: sale_row.amount_paid,
        outstanding_balance: sale_row.outstanding_balance,
        payment_status: sale_row.payment_status.to_string(),
        notes: sale_row.notes,
        created_at: sale_row.created_at,
        items: items
            .into_iter()
            .map(|item| SaleItemResponse {
                id: item.id,
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total,
                amount_paid: item.amount_paid,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn apportions_by_revenue_share() {
        let shares = apportion_payment(dec!(50), &[dec!(60), dec!(40)]);
        assert_eq!(shares, vec![dec!(30), dec!(20)]);
    }

    #[test]
    fn last_line_absorbs_rounding() {
        let shares = apportion_payment(dec!(10), &[dec!(33.33), dec!(33.33), dec!(33.34)]);
        assert_eq!(shares.iter().copied().sum::<Decimal>(), dec!(10));
        assert_eq!(shares[0], dec!(3.33));
        assert_eq!(shares[1], dec!(3.33));
        assert_eq!(shares[2], dec!(3.34));
    }

    #[test]
    fn zero_payment_yields_zero_shares() {
        let shares = apportion_payment(Decimal::ZERO, &[dec!(25), dec!(75)]);
        assert_eq!(shares, vec![Decimal::ZERO, Decimal::ZERO]);
    }

    #[test]
    fn empty_lines_yield_no_shares() {
        assert!(apportion_payment(dec!(10), &[]).is_empty());
    }

    #[test]
    fn zero_total_lines_take_no_share() {
        let shares = apportion_payment(dec!(0), &[dec!(0), dec!(0)]);
        assert_eq!(shares, vec![Decimal::ZERO, Decimal::ZERO]);
    }
}
