//! # Demo Store Seeder
//!
//! Builds a small demo store through the engine's own operations: catalog,
//! a supplier delivery, one shift with a sale, and the shift's close.
//!
//! ## Usage
//! ```bash
//! # Seed the database named in tally.toml (or the platform default)
//! cargo run -p tally-engine --bin seed
//!
//! # Specify database path
//! cargo run -p tally-engine --bin seed -- --db ./data/tally.db
//!
//! # Use a specific config file
//! cargo run -p tally-engine --bin seed -- --config ./tally.toml
//! ```
//!
//! Set `RUST_LOG=debug` to see every commit unit.

use std::env;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use tally_core::validation::validate_id;
use tally_core::{
    Actor, Cart, CartDiscount, CartLine, CoreError, PaymentMethod, ReceiptLine, Role, ValidationError,
};
use tally_engine::{EngineConfig, NewProduct, NewPurchaseOrder, NewSupplier, OrderLine, PosEngine};

/// (sku, name, unit price in cents)
const CATALOG: &[(&str, &str, i64)] = &[
    ("COFFEE-1KG", "House Blend Coffee 1kg", 10000),
    ("MUFFIN-BB", "Blueberry Muffin", 2500),
    ("MILK-1L", "Whole Milk 1L", 450),
    ("CROISSANT", "Butter Croissant", 1800),
    ("TEA-GRN", "Green Tea 50 bags", 3200),
];

const OPENING_FLOAT: i64 = 20_000;
const DELIVERY_QTY: i64 = 24;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tally=debug,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut db_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tally POS Demo Store Seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Config file (default: platform config dir)");
                println!("  -d, --db <PATH>      Database file path (overrides config)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    init_tracing();

    let mut config = EngineConfig::load(config_path)?;
    if let Some(path) = db_path {
        config.database.path = path;
    }
    validate_id("store.id", config.store_id())?;

    println!("Tally POS Demo Store Seeder");
    println!("===========================");
    println!("Database: {}", config.database.path.display());
    println!("Store:    {}", config.store_id());
    println!();

    let store_id = config.store_id().to_string();
    let engine = PosEngine::connect(config).await?;
    let manager = Actor::new("seed-manager", Role::Manager, store_id);

    // Catalog
    let mut products = Vec::with_capacity(CATALOG.len());
    for (sku, name, price) in CATALOG {
        let registered = engine
            .register_product(
                &manager,
                NewProduct {
                    sku: sku.to_string(),
                    name: name.to_string(),
                    unit_price_cents: *price,
                },
            )
            .await;

        match registered {
            Ok(product) => products.push(product),
            Err(CoreError::Validation(ValidationError::Duplicate { .. })) => {
                println!("⚠ Product {} already exists, database was seeded before.", sku);
                println!("  Delete the database file to regenerate.");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
    println!("✓ Registered {} products", products.len());

    // Delivery
    let supplier = engine
        .register_supplier(
            &manager,
            NewSupplier {
                name: "Northside Wholesale".into(),
                contact: Some("orders@northside.example".into()),
            },
        )
        .await?;

    let order = engine
        .create_purchase_order(
            &manager,
            NewPurchaseOrder {
                supplier_id: supplier.id.clone(),
                lines: products
                    .iter()
                    .map(|p| OrderLine {
                        product_id: p.id.clone(),
                        quantity: DELIVERY_QTY,
                        unit_cost_cents: p.unit_price_cents / 2,
                    })
                    .collect(),
            },
        )
        .await?;

    let order = engine
        .receive_purchase_order(
            &manager,
            &order.id,
            products
                .iter()
                .map(|p| ReceiptLine {
                    product_id: p.id.clone(),
                    quantity: DELIVERY_QTY,
                })
                .collect(),
        )
        .await?;
    println!("✓ Received purchase order {} ({:?})", order.id, order.status);

    // Shift and a sale
    let shift = engine.open_shift(&manager, OPENING_FLOAT).await?;
    println!("✓ Opened shift {} with float {}", shift.id, tally_core::Money::from_cents(OPENING_FLOAT));

    let cart = Cart::new(
        vec![
            CartLine::new(products[0].id.clone(), 2, products[0].unit_price_cents),
            CartLine::new(products[1].id.clone(), 1, products[1].unit_price_cents),
        ],
        PaymentMethod::Cash,
    )
    .with_discount(CartDiscount::Percentage { bps: 1000 });

    let key = format!("seed:{}", shift.id);
    let sale = engine.checkout(&manager, &cart, &key).await?;
    let replay = engine.checkout(&manager, &cart, &key).await?;
    println!("✓ Sale {} total {}", sale.transaction.id, sale.transaction.grand_total());
    println!(
        "  Replayed key returned the same sale: {}",
        replay.transaction.id == sale.transaction.id
    );
    println!("  Suggested at checkout: {}", sale.recommendations.items.len());

    let suggestions = engine
        .recommend(
            &manager,
            &Cart::new(
                vec![CartLine::new(products[0].id.clone(), 1, products[0].unit_price_cents)],
                PaymentMethod::Cash,
            ),
        )
        .await?;
    println!("  Customers who bought {} also bought:", products[0].name);
    for item in &suggestions.items {
        println!("    {} (score {})", item.product_id, item.score);
    }

    // Close out
    let report = engine.shift_report(&manager, &shift.id).await?;
    let closure = engine
        .close_shift(&manager, &shift.id, report.expected_cash.cents())
        .await?;
    println!(
        "✓ Closed shift: expected {}, counted {}, variance {}",
        closure.expected_cash, closure.closing_cash, closure.variance
    );

    for product in &products {
        let level = engine.stock_level(&manager, &product.id).await?;
        println!("  {:<12} stock {}", product.sku, level);
    }

    println!();
    println!("✓ Seed complete!");

    Ok(())
}
