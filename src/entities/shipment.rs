use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// An inbound batch of stock. All monetary columns are USD.
///
/// `total_cost` is fixed at creation (lot costs plus shipping plus
/// additional costs). `total_revenue` and `net_profit` are derived and
/// written only by settlement.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "shipments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub status: ShipmentStatus,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub shipping_cost: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub additional_costs: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_cost: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_revenue: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub net_profit: rust_decimal::Decimal,
    /// FIFO ordering key for this shipment's lots
    pub arrived_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::shipment_item::Entity")]
    ShipmentItems,
}

impl Related<super::shipment_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ShipmentItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Shipment status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum ShipmentStatus {
    #[sea_orm(string_value = "preparing")]
    Preparing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "settled")]
    Settled,
}

impl ShipmentStatus {
    /// Statuses advance strictly forward through the receiving pipeline
    pub fn can_transition_to(self, next: ShipmentStatus) -> bool {
        matches!(
            (self, next),
            (ShipmentStatus::Preparing, ShipmentStatus::Shipped)
                | (ShipmentStatus::Shipped, ShipmentStatus::Delivered)
                | (ShipmentStatus::Delivered, ShipmentStatus::Settled)
        )
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShipmentStatus::Preparing => write!(f, "preparing"),
            ShipmentStatus::Shipped => write!(f, "shipped"),
            ShipmentStatus::Delivered => write!(f, "delivered"),
            ShipmentStatus::Settled => write!(f, "settled"),
        }
    }
}

impl FromStr for ShipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "preparing" => Ok(ShipmentStatus::Preparing),
            "shipped" => Ok(ShipmentStatus::Shipped),
            "delivered" => Ok(ShipmentStatus::Delivered),
            "settled" => Ok(ShipmentStatus::Settled),
            other => Err(format!("Unknown shipment status: {other}")),
        }
    }
}
