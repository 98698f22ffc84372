use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A transaction with a customer. `exchange_rate_used` is frozen at
/// creation; historical figures never move with the live rate.
///
/// Invariant: `outstanding_balance = total_amount - amount_paid`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sales")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub customer_id: Uuid,
    pub sale_date: DateTime<Utc>,
    pub currency: SaleCurrency,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub exchange_rate_used: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub amount_paid: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub outstanding_balance: Decimal,
    pub payment_status: PaymentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    /// Converts an amount in this sale's currency into USD at the frozen rate.
    pub fn to_usd(&self, amount: Decimal) -> Decimal {
        match self.currency {
            SaleCurrency::Usd => amount,
            SaleCurrency::Dop => amount / self.exchange_rate_used,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
    #[sea_orm(has_many = "super::sale_item::Entity")]
    SaleItems,
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::sale_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SaleItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Transaction currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum SaleCurrency {
    #[sea_orm(string_value = "USD")]
    Usd,
    #[sea_orm(string_value = "DOP")]
    Dop,
}

impl fmt::Display for SaleCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaleCurrency::Usd => write!(f, "USD"),
            SaleCurrency::Dop => write!(f, "DOP"),
        }
    }
}

impl FromStr for SaleCurrency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Ok(SaleCurrency::Usd),
            "DOP" => Ok(SaleCurrency::Dop),
            other => Err(format!("Unknown currency: {other}")),
        }
    }
}

/// Payment status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "partial")]
    Partial,
    #[sea_orm(string_value = "layaway")]
    Layaway,
}

impl PaymentStatus {
    /// Derives the status from the paid/total pair: paid when nothing is
    /// outstanding, layaway when nothing has been paid, partial otherwise.
    pub fn derive(total_amount: Decimal, amount_paid: Decimal) -> Self {
        if amount_paid >= total_amount {
            PaymentStatus::Paid
        } else if amount_paid.is_zero() {
            PaymentStatus::Layaway
        } else {
            PaymentStatus::Partial
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Partial => write!(f, "partial"),
            PaymentStatus::Layaway => write!(f, "layaway"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn derives_payment_status_from_amounts() {
        assert_eq!(
            PaymentStatus::derive(dec!(100), dec!(100)),
            PaymentStatus::Paid
        );
        assert_eq!(
            PaymentStatus::derive(dec!(100), dec!(0)),
            PaymentStatus::Layaway
        );
        assert_eq!(
            PaymentStatus::derive(dec!(100), dec!(40)),
            PaymentStatus::Partial
        );
        // A zero-total sale has nothing outstanding
        assert_eq!(PaymentStatus::derive(dec!(0), dec!(0)), PaymentStatus::Paid);
    }

    #[test]
    fn converts_dop_amounts_at_the_frozen_rate() {
        let sale = Model {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            sale_date: Utc::now(),
            currency: SaleCurrency::Dop,
            exchange_rate_used: dec!(60),
            total_amount: dec!(6000),
            amount_paid: dec!(0),
            outstanding_balance: dec!(6000),
            payment_status: PaymentStatus::Layaway,
            notes: None,
            created_at: Utc::now(),
            updated_at: None,
        };
        assert_eq!(sale.to_usd(dec!(6000)), dec!(100));
    }
}
