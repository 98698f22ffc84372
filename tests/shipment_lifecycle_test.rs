mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use rust_decimal_macros::dec;
use scentstock_api::{
    commands::inventory::adjust_inventory_command::AdjustInventoryCommand,
    entities::shipment::ShipmentStatus, errors::ServiceError,
};

use common::{shipment_line, TestApp};

#[tokio::test]
async fn shipment_creation_fixes_total_cost_and_opens_full_lots() {
    let app = TestApp::new().await;

    let shipment = app
        .seed_shipment(
            vec![
                shipment_line("Dior", "Sauvage", "100ml", 10, dec!(5)),
                shipment_line("Chanel", "No 5", "50ml", 4, dec!(30)),
            ],
            dec!(35),
            dec!(15),
            Utc::now(),
        )
        .await;

    // 10 x 5 + 4 x 30 + 35 + 15
    assert_eq!(shipment.total_cost, dec!(220));
    assert_eq!(shipment.total_revenue, dec!(0));
    assert_eq!(shipment.net_profit, dec!(-220));
    assert_eq!(shipment.status, "preparing");
    for lot in &shipment.items {
        assert_eq!(lot.remaining_inventory, lot.quantity);
    }
}

#[tokio::test]
async fn status_advances_through_the_pipeline_only_in_order() {
    let app = TestApp::new().await;
    let shipment = app
        .seed_shipment(
            vec![shipment_line("Prada", "Luna Rossa", "100ml", 3, dec!(28))],
            dec!(0),
            dec!(0),
            Utc::now(),
        )
        .await;

    // Skipping a stage is rejected.
    let err = app
        .state
        .services
        .shipments
        .update_status(shipment.id, ShipmentStatus::Delivered)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));

    for next in [
        ShipmentStatus::Shipped,
        ShipmentStatus::Delivered,
        ShipmentStatus::Settled,
    ] {
        app.state
            .services
            .shipments
            .update_status(shipment.id, next)
            .await
            .expect("advance status");
    }

    // Terminal state cannot move.
    let err = app
        .state
        .services
        .shipments
        .update_status(shipment.id, ShipmentStatus::Shipped)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn adjustments_guard_the_remaining_inventory_invariant() {
    let app = TestApp::new().await;
    let shipment = app
        .seed_shipment(
            vec![shipment_line("Hermes", "Terre", "100ml", 10, dec!(40))],
            dec!(0),
            dec!(0),
            Utc::now(),
        )
        .await;
    let lot_id = shipment.items[0].id;

    // Below zero is a hard reject.
    let err = app
        .state
        .services
        .inventory
        .adjust_inventory(AdjustInventoryCommand {
            shipment_item_id: lot_id,
            quantity_delta: -11,
            reason: Some("broken in storage".to_string()),
            allow_exceeding_original: false,
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidAdjustment(_));
    assert_eq!(app.lot_remaining(lot_id).await, 10);

    // A write-off lands and leaves an audit row.
    let adjustment = app
        .state
        .services
        .inventory
        .adjust_inventory(AdjustInventoryCommand {
            shipment_item_id: lot_id,
            quantity_delta: -2,
            reason: Some("bottles damaged in transit".to_string()),
            allow_exceeding_original: false,
        })
        .await
        .expect("write off two units");
    assert_eq!(adjustment.previous_remaining, 10);
    assert_eq!(adjustment.new_remaining, 8);
    assert_eq!(app.lot_remaining(lot_id).await, 8);

    // Raising remaining above the original quantity needs the explicit
    // confirmation flag.
    let err = app
        .state
        .services
        .inventory
        .adjust_inventory(AdjustInventoryCommand {
            shipment_item_id: lot_id,
            quantity_delta: 5,
            reason: Some("recount".to_string()),
            allow_exceeding_original: false,
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidAdjustment(_));

    app.state
        .services
        .inventory
        .adjust_inventory(AdjustInventoryCommand {
            shipment_item_id: lot_id,
            quantity_delta: 5,
            reason: Some("recount found extra stock".to_string()),
            allow_exceeding_original: true,
        })
        .await
        .expect("confirmed adjustment");
    assert_eq!(app.lot_remaining(lot_id).await, 13);

    let history = app
        .state
        .services
        .inventory
        .adjustments_for_lot(lot_id)
        .await
        .expect("adjustment history");
    assert_eq!(history.len(), 2);
}
