use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Sale events
    SaleCreated(Uuid),
    PaymentRecorded {
        sale_id: Uuid,
        amount_paid: Decimal,
        outstanding_balance: Decimal,
    },

    // Inventory events
    InventoryAllocated {
        sale_item_id: Uuid,
        lot_count: usize,
        quantity: i32,
    },
    InventoryAdjusted {
        shipment_item_id: Uuid,
        previous_remaining: i32,
        new_remaining: i32,
        reason: Option<String>,
    },

    // Shipment events
    ShipmentCreated(Uuid),
    ShipmentStatusChanged {
        shipment_id: Uuid,
        old_status: String,
        new_status: String,
    },
    ShipmentSettled {
        shipment_id: Uuid,
        total_revenue: Decimal,
        net_profit: Decimal,
        settled_at: DateTime<Utc>,
    },

    // Customer events
    CustomerCreated(Uuid),
}

/// Drains the event channel, logging each event as it arrives.
/// Spawned once at startup; ends when every sender is dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::SaleCreated(sale_id) => {
                info!(sale_id = %sale_id, "sale created");
            }
            Event::PaymentRecorded {
                sale_id,
                amount_paid,
                outstanding_balance,
            } => {
                info!(sale_id = %sale_id, amount_paid = %amount_paid, outstanding_balance = %outstanding_balance, "payment recorded");
            }
            Event::ShipmentSettled {
                shipment_id,
                total_revenue,
                net_profit,
                ..
            } => {
                info!(shipment_id = %shipment_id, total_revenue = %total_revenue, net_profit = %net_profit, "shipment settled");
            }
            other => {
                debug!(event = ?other, "event processed");
            }
        }
    }
    info!("Event processor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_events_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        let sale_id = Uuid::new_v4();
        sender.send(Event::SaleCreated(sale_id)).await.unwrap();
        sender.send(Event::CustomerCreated(sale_id)).await.unwrap();

        assert!(matches!(rx.recv().await, Some(Event::SaleCreated(id)) if id == sale_id));
        assert!(matches!(rx.recv().await, Some(Event::CustomerCreated(_))));
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        let result = sender.send(Event::ShipmentCreated(Uuid::new_v4())).await;
        assert!(result.is_err());
    }
}
