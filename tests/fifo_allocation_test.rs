mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scentstock_api::{errors::ServiceError, services::sales::CreateSaleRequest};

use common::{sale_line, shipment_line, TestApp};

fn usd_sale(lines: Vec<scentstock_api::commands::sales::create_sale_command::SaleLineRequest>) -> CreateSaleRequest {
    CreateSaleRequest {
        customer_id: None,
        customer_name: Some("Maria Perez".to_string()),
        customer_phone: None,
        lines,
        currency: "USD".to_string(),
        exchange_rate: None,
        amount_paid: Decimal::ZERO,
        sale_date: None,
        notes: None,
    }
}

#[tokio::test]
async fn sale_consumes_lots_oldest_first_and_settles_each_shipment() {
    let app = TestApp::new().await;
    let arrival = Utc::now() - Duration::days(30);

    // Two arrivals of the same perfume at different costs.
    let older = app
        .seed_shipment(
            vec![shipment_line("Dior", "Sauvage", "100ml", 10, dec!(5))],
            dec!(0),
            dec!(0),
            arrival,
        )
        .await;
    let newer = app
        .seed_shipment(
            vec![shipment_line("Dior", "Sauvage", "100ml", 10, dec!(8))],
            dec!(0),
            dec!(0),
            arrival + Duration::days(10),
        )
        .await;

    let sale = app
        .state
        .services
        .sales
        .create_sale(usd_sale(vec![sale_line(
            "Dior",
            "Sauvage",
            "100ml",
            15,
            dec!(20),
        )]))
        .await
        .expect("create sale");

    assert_eq!(sale.total_amount, dec!(300));
    assert_eq!(sale.outstanding_balance, dec!(300));
    assert_eq!(sale.payment_status, "layaway");

    // The older lot is drained before the newer one is touched.
    let older_lot = older.items[0].id;
    let newer_lot = newer.items[0].id;
    assert_eq!(app.lot_remaining(older_lot).await, 0);
    assert_eq!(app.lot_remaining(newer_lot).await, 5);

    // Provenance records carry the lot costs captured at planning time.
    let older_allocations = app.allocations_for_lot(older_lot).await;
    assert_eq!(older_allocations.len(), 1);
    assert_eq!(older_allocations[0].quantity, 10);
    assert_eq!(older_allocations[0].unit_cost, dec!(5));
    let newer_allocations = app.allocations_for_lot(newer_lot).await;
    assert_eq!(newer_allocations.len(), 1);
    assert_eq!(newer_allocations[0].quantity, 5);
    assert_eq!(newer_allocations[0].unit_cost, dec!(8));

    // Each shipment settles only the revenue its lots produced.
    let older_row = app.shipment_row(older.id).await;
    assert_eq!(older_row.total_revenue, dec!(200));
    assert_eq!(older_row.net_profit, dec!(200) - older_row.total_cost);
    let newer_row = app.shipment_row(newer.id).await;
    assert_eq!(newer_row.total_revenue, dec!(100));
    assert_eq!(newer_row.net_profit, dec!(100) - newer_row.total_cost);

    // The next unit sold must come from the newer lot at its own cost.
    app.state
        .services
        .sales
        .create_sale(usd_sale(vec![sale_line(
            "Dior",
            "Sauvage",
            "100ml",
            1,
            dec!(20),
        )]))
        .await
        .expect("follow-up sale");
    assert_eq!(app.lot_remaining(older_lot).await, 0);
    assert_eq!(app.lot_remaining(newer_lot).await, 4);
    let newer_allocations = app.allocations_for_lot(newer_lot).await;
    assert_eq!(newer_allocations.len(), 2);
    assert!(newer_allocations.iter().all(|a| a.unit_cost == dec!(8)));
}

#[tokio::test]
async fn shortfall_aborts_without_touching_the_ledger() {
    let app = TestApp::new().await;

    let shipment = app
        .seed_shipment(
            vec![shipment_line("Chanel", "No 5", "50ml", 5, dec!(30))],
            dec!(0),
            dec!(0),
            Utc::now(),
        )
        .await;
    let lot_id = shipment.items[0].id;

    let err = app
        .state
        .services
        .sales
        .create_sale(usd_sale(vec![sale_line(
            "Chanel",
            "No 5",
            "50ml",
            6,
            dec!(90),
        )]))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ServiceError::InsufficientInventory {
            needed: 6,
            available: 5
        }
    );

    // No partial allocation, no decrement, no settlement.
    assert_eq!(app.lot_remaining(lot_id).await, 5);
    assert!(app.allocations_for_lot(lot_id).await.is_empty());
    let row = app.shipment_row(shipment.id).await;
    assert_eq!(row.total_revenue, Decimal::ZERO);
}

#[tokio::test]
async fn one_short_line_aborts_the_whole_multi_line_sale() {
    let app = TestApp::new().await;

    let stocked = app
        .seed_shipment(
            vec![shipment_line("Creed", "Aventus", "100ml", 10, dec!(100))],
            dec!(0),
            dec!(0),
            Utc::now(),
        )
        .await;
    app.seed_shipment(
        vec![shipment_line("Versace", "Eros", "100ml", 1, dec!(15))],
        dec!(0),
        dec!(0),
        Utc::now(),
    )
    .await;

    let err = app
        .state
        .services
        .sales
        .create_sale(usd_sale(vec![
            sale_line("Creed", "Aventus", "100ml", 2, dec!(250)),
            sale_line("Versace", "Eros", "100ml", 3, dec!(40)),
        ]))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InsufficientInventory { .. });

    // The fully stocked line was planned but never applied.
    assert_eq!(app.lot_remaining(stocked.items[0].id).await, 10);
    assert!(app.allocations_for_lot(stocked.items[0].id).await.is_empty());
}

#[tokio::test]
async fn exact_exhaustion_leaves_the_lot_at_zero() {
    let app = TestApp::new().await;

    let shipment = app
        .seed_shipment(
            vec![shipment_line("Tom Ford", "Noir", "50ml", 4, dec!(60))],
            dec!(0),
            dec!(0),
            Utc::now(),
        )
        .await;
    let lot_id = shipment.items[0].id;

    app.state
        .services
        .sales
        .create_sale(usd_sale(vec![sale_line(
            "Tom Ford",
            "Noir",
            "50ml",
            4,
            dec!(120),
        )]))
        .await
        .expect("sale of the entire lot");

    assert_eq!(app.lot_remaining(lot_id).await, 0);

    // The lot is spent; another unit cannot be sold.
    let err = app
        .state
        .services
        .sales
        .create_sale(usd_sale(vec![sale_line(
            "Tom Ford",
            "Noir",
            "50ml",
            1,
            dec!(120),
        )]))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InsufficientInventory {
            needed: 1,
            available: 0
        }
    );
}

#[tokio::test]
async fn unknown_product_fails_the_sale_line() {
    let app = TestApp::new().await;

    let err = app
        .state
        .services
        .sales
        .create_sale(usd_sale(vec![sale_line(
            "Ghost",
            "Brand",
            "1ml",
            1,
            dec!(10),
        )]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ProductNotFound { .. });
}

#[tokio::test]
async fn dop_sale_settles_revenue_at_the_frozen_rate() {
    let app = TestApp::new().await;

    let shipment = app
        .seed_shipment(
            vec![shipment_line("Carolina Herrera", "Good Girl", "80ml", 10, dec!(10))],
            dec!(0),
            dec!(0),
            Utc::now(),
        )
        .await;

    let sale = app
        .state
        .services
        .sales
        .create_sale(CreateSaleRequest {
            customer_id: None,
            customer_name: Some("Ana Garcia".to_string()),
            customer_phone: None,
            lines: vec![sale_line("Carolina Herrera", "Good Girl", "80ml", 2, dec!(1200))],
            currency: "DOP".to_string(),
            exchange_rate: Some(dec!(60)),
            amount_paid: Decimal::ZERO,
            sale_date: None,
            notes: None,
        })
        .await
        .expect("create DOP sale");

    assert_eq!(sale.currency, "DOP");
    assert_eq!(sale.exchange_rate_used, dec!(60));
    // Sale totals stay in DOP.
    assert_eq!(sale.total_amount, dec!(2400));

    // The USD-denominated shipment gains (2 x 1200) / 60 = $40.
    let row = app.shipment_row(shipment.id).await;
    assert_eq!(row.total_revenue, dec!(40));
    assert_eq!(row.net_profit, dec!(40) - row.total_cost);
}

#[tokio::test]
async fn allocations_reconcile_with_lot_decrements() {
    let app = TestApp::new().await;
    let arrival = Utc::now() - Duration::days(5);

    let first = app
        .seed_shipment(
            vec![
                shipment_line("Dior", "Homme", "100ml", 7, dec!(12)),
                shipment_line("Chanel", "Bleu", "100ml", 4, dec!(25)),
            ],
            dec!(10),
            dec!(0),
            arrival,
        )
        .await;
    let second = app
        .seed_shipment(
            vec![shipment_line("Dior", "Homme", "100ml", 6, dec!(14))],
            dec!(0),
            dec!(0),
            arrival + Duration::days(1),
        )
        .await;

    for (qty, price) in [(3, dec!(30)), (5, dec!(28)), (2, dec!(35))] {
        app.state
            .services
            .sales
            .create_sale(usd_sale(vec![sale_line("Dior", "Homme", "100ml", qty, price)]))
            .await
            .expect("sale");
    }
    app.state
        .services
        .sales
        .create_sale(usd_sale(vec![sale_line("Chanel", "Bleu", "100ml", 3, dec!(70))]))
        .await
        .expect("sale");

    // Per lot: allocated quantities equal original minus remaining.
    for lot in first.items.iter().chain(second.items.iter()) {
        let allocated: i32 = app
            .allocations_for_lot(lot.id)
            .await
            .iter()
            .map(|a| a.quantity)
            .sum();
        let remaining = app.lot_remaining(lot.id).await;
        assert_eq!(allocated, lot.quantity - remaining);
        assert!(remaining >= 0);
    }
}

#[tokio::test]
async fn full_recompute_matches_the_incremental_settlement_path() {
    let app = TestApp::new().await;

    let shipment = app
        .seed_shipment(
            vec![shipment_line("Armani", "Code", "75ml", 20, dec!(9))],
            dec!(25),
            dec!(5),
            Utc::now(),
        )
        .await;

    app.state
        .services
        .sales
        .create_sale(usd_sale(vec![sale_line("Armani", "Code", "75ml", 6, dec!(25))]))
        .await
        .expect("usd sale");
    app.state
        .services
        .sales
        .create_sale(CreateSaleRequest {
            customer_id: None,
            customer_name: Some("Luis Mendez".to_string()),
            customer_phone: None,
            lines: vec![sale_line("Armani", "Code", "75ml", 4, dec!(1500))],
            currency: "DOP".to_string(),
            exchange_rate: Some(dec!(60)),
            amount_paid: Decimal::ZERO,
            sale_date: None,
            notes: None,
        })
        .await
        .expect("dop sale");

    let incremental = app.shipment_row(shipment.id).await;
    // 6 x $25 + (4 x RD$1500)/60 = 150 + 100
    assert_eq!(incremental.total_revenue, dec!(250));

    let recomputed = app
        .state
        .services
        .settlement
        .recompute(shipment.id)
        .await
        .expect("recompute");
    assert_eq!(recomputed.total_revenue, incremental.total_revenue);
    assert_eq!(recomputed.net_profit, incremental.net_profit);

    // Idempotent: a second recompute changes nothing.
    let again = app
        .state
        .services
        .settlement
        .recompute(shipment.id)
        .await
        .expect("second recompute");
    assert_eq!(again.total_revenue, recomputed.total_revenue);
    assert_eq!(again.net_profit, recomputed.net_profit);
}
