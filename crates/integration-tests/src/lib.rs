//! Integration tests for the Toybox storefront client.
//!
//! The scenarios in `tests/` run the full client stack (stores, checkout
//! session, payment widget) against [`InMemoryGateway`], which implements
//! the real backend semantics: server-computed totals, duplicate-product
//! merging, cart clearing on payment confirmation.
//!
//! Run with: `cargo test -p toybox-integration-tests`

use std::sync::Arc;
use std::sync::Once;

use rust_decimal::Decimal;
use rust_decimal::dec;
use toybox_core::{AddressId, ProductId};
use toybox_storefront::api::{AddressInput, InMemoryGateway};
use toybox_storefront::checkout::InMemoryPaymentWidget;
use toybox_storefront::state::AppState;

static INIT_TRACING: Once = Once::new();

/// Install a test subscriber once per process. Quiet unless `RUST_LOG`
/// says otherwise.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Everything a scenario needs: the app state, the backend double, a
/// scripted widget, and a seeded address.
pub struct TestContext {
    pub state: AppState,
    pub gateway: InMemoryGateway,
    pub widget: Arc<InMemoryPaymentWidget>,
    pub address_id: AddressId,
}

impl TestContext {
    /// A context with a small seeded toy catalog and one default address.
    #[must_use]
    pub fn new() -> Self {
        init_tracing();
        let gateway = InMemoryGateway::new();
        gateway.stock_product(ProductId::new(1), "Wooden Train", dec!(24.99), 10);
        gateway.stock_product(ProductId::new(2), "Plush Dino", dec!(12.50), 5);
        gateway.stock_product(ProductId::new(3), "Marble Run", dec!(49.00), 2);
        let address_id = gateway.seed_address(sample_address("Robin Reader"), true);

        let state = AppState::with_gateway(Arc::new(gateway.clone()));
        Self {
            state,
            gateway,
            widget: Arc::new(InMemoryPaymentWidget::new()),
            address_id,
        }
    }

    /// Seed a product with a specific price and stock.
    pub fn stock_product(&self, id: i32, name: &str, price: Decimal, stock: i64) {
        self.gateway
            .stock_product(ProductId::new(id), name, price, stock);
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A well-formed address input for seeding and CRUD tests.
#[must_use]
pub fn sample_address(recipient: &str) -> AddressInput {
    AddressInput {
        recipient_name: recipient.to_string(),
        phone_number: "555-0100".to_string(),
        line1: "1 Toy Lane".to_string(),
        line2: None,
        city: "Springfield".to_string(),
        state: "IL".to_string(),
        postal_code: "62704".to_string(),
        country: "US".to_string(),
    }
}
