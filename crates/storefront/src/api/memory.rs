//! In-memory gateway for testing.
//!
//! Implements the real server semantics the stores rely on: duplicate
//! products merge into one line, totals are computed server-side, every
//! mutation returns the full updated cart, and order confirmation clears
//! the cart. Tests use the failure-injection switches and call counters to
//! drive the scenarios the stores must survive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Notify;
use toybox_core::{AddressId, CurrencyCode, ItemId, OrderId, OrderStatus, Price, ProductId};

use super::{
    AddItemInput, AddressInput, ApiError, ApiGateway, Cart, CartItem, CreateOrderInput, Order,
    OrderLineItem, PaymentFields, ShippingAddress,
};

/// A product known to the in-memory backend.
#[derive(Debug, Clone)]
struct ProductRecord {
    name: String,
    unit_price: Decimal,
    stock: i64,
}

/// A cart line as the backend stores it (quantities only; prices and
/// totals are derived from the catalog on every response).
#[derive(Debug, Clone)]
struct LineRecord {
    id: ItemId,
    product_id: ProductId,
    quantity: i64,
}

#[derive(Debug, Default)]
struct MemoryState {
    products: HashMap<ProductId, ProductRecord>,
    lines: Vec<LineRecord>,
    orders: HashMap<OrderId, Order>,
    addresses: Vec<ShippingAddress>,
    next_item_id: i32,
    next_order_id: i32,
    next_address_id: i32,
    next_gateway_seq: u32,
    create_order_calls: u32,
    update_item_calls: u32,
    confirm_calls: u32,
    fail_on_fetch: bool,
    fail_on_update: bool,
    fail_on_create_order: bool,
    fail_on_confirm: bool,
}

/// In-memory API gateway for tests.
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<RwLock<MemoryState>>,
    paused: Arc<AtomicBool>,
    resume: Arc<Notify>,
}

impl InMemoryGateway {
    /// Creates a new in-memory gateway with an empty catalog and cart.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Add a product to the backend catalog.
    pub fn stock_product(&self, id: ProductId, name: &str, unit_price: Decimal, stock: i64) {
        self.lock().products.insert(
            id,
            ProductRecord {
                name: name.to_string(),
                unit_price,
                stock,
            },
        );
    }

    /// Seed an address directly, bypassing the CRUD surface.
    pub fn seed_address(&self, input: AddressInput, is_default: bool) -> AddressId {
        let mut state = self.lock();
        state.next_address_id += 1;
        let id = AddressId::new(state.next_address_id);
        let address = build_address(id, &input, is_default);
        state.addresses.push(address);
        id
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Failure injection and flow control
    // ─────────────────────────────────────────────────────────────────────────

    /// Make the next `fetch_cart` calls fail with a server error.
    pub fn set_fail_on_fetch(&self, fail: bool) {
        self.lock().fail_on_fetch = fail;
    }

    /// Make the next `update_cart_item` calls fail with a server error.
    pub fn set_fail_on_update(&self, fail: bool) {
        self.lock().fail_on_update = fail;
    }

    /// Make the next `create_order` calls fail with a server error.
    pub fn set_fail_on_create_order(&self, fail: bool) {
        self.lock().fail_on_create_order = fail;
    }

    /// Make the next `confirm_payment` calls fail signature verification.
    pub fn set_fail_on_confirm(&self, fail: bool) {
        self.lock().fail_on_confirm = fail;
    }

    /// Suspend `update_cart_item` calls until [`Self::resume_updates`].
    ///
    /// Lets a test hold a mutation in flight while it attempts a second one.
    pub fn pause_updates(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Release updates suspended by [`Self::pause_updates`].
    pub fn resume_updates(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume.notify_waiters();
    }

    async fn wait_if_paused(&self) {
        while self.paused.load(Ordering::SeqCst) {
            let notified = self.resume.notified();
            if !self.paused.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Call counters
    // ─────────────────────────────────────────────────────────────────────────

    /// Number of `create_order` requests received.
    #[must_use]
    pub fn create_order_calls(&self) -> u32 {
        self.lock().create_order_calls
    }

    /// Number of `update_cart_item` requests received.
    #[must_use]
    pub fn update_item_calls(&self) -> u32 {
        self.lock().update_item_calls
    }

    /// Number of `confirm_payment` requests received.
    #[must_use]
    pub fn confirm_calls(&self) -> u32 {
        self.lock().confirm_calls
    }

    /// A stored order, if it exists.
    #[must_use]
    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.lock().orders.get(&id).cloned()
    }
}

/// Synthesize a retriable backend failure.
fn unavailable() -> ApiError {
    ApiError::Server {
        status: 503,
        message: "service unavailable".to_string(),
    }
}

fn build_address(id: AddressId, input: &AddressInput, is_default: bool) -> ShippingAddress {
    ShippingAddress {
        id,
        recipient_name: input.recipient_name.clone(),
        phone_number: input.phone_number.clone(),
        line1: input.line1.clone(),
        line2: input.line2.clone(),
        city: input.city.clone(),
        state: input.state.clone(),
        postal_code: input.postal_code.clone(),
        country: input.country.clone(),
        is_default,
    }
}

impl MemoryState {
    /// Render the stored lines as a full cart response, deriving prices,
    /// stock snapshots, and totals from the catalog.
    fn render_cart(&self) -> Cart {
        let items: Vec<CartItem> = self
            .lines
            .iter()
            .filter_map(|line| {
                let product = self.products.get(&line.product_id)?;
                let subtotal = product.unit_price * Decimal::from(line.quantity);
                Some(CartItem {
                    id: line.id,
                    product_id: line.product_id,
                    product_name: product.name.clone(),
                    unit_price: Price::new(product.unit_price, CurrencyCode::USD),
                    quantity: line.quantity,
                    stock_quantity: product.stock,
                    subtotal: Price::new(subtotal, CurrencyCode::USD),
                })
            })
            .collect();

        let total_items = items.iter().map(|item| item.quantity).sum();
        let subtotal = items
            .iter()
            .map(|item| item.subtotal.amount)
            .sum::<Decimal>();

        Cart {
            items,
            total_items,
            subtotal: Price::new(subtotal, CurrencyCode::USD),
        }
    }

    fn check_stock(&self, product_id: ProductId, requested: i64) -> Result<(), ApiError> {
        let product = self
            .products
            .get(&product_id)
            .ok_or_else(|| ApiError::NotFound(format!("product {product_id}")))?;
        if requested > product.stock {
            return Err(ApiError::Validation(format!(
                "quantity {requested} exceeds available stock {}",
                product.stock
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ApiGateway for InMemoryGateway {
    async fn fetch_cart(&self) -> Result<Cart, ApiError> {
        let state = self.lock();
        if state.fail_on_fetch {
            return Err(unavailable());
        }
        Ok(state.render_cart())
    }

    async fn add_cart_item(&self, input: AddItemInput) -> Result<Cart, ApiError> {
        let mut state = self.lock();
        if input.quantity < 1 {
            return Err(ApiError::Validation("quantity must be at least 1".into()));
        }

        // Duplicate products merge into the existing line, server-side.
        let merged_quantity = state
            .lines
            .iter()
            .find(|line| line.product_id == input.product_id)
            .map_or(input.quantity, |line| line.quantity + input.quantity);
        state.check_stock(input.product_id, merged_quantity)?;

        if let Some(line) = state
            .lines
            .iter_mut()
            .find(|line| line.product_id == input.product_id)
        {
            line.quantity = merged_quantity;
        } else {
            state.next_item_id += 1;
            let id = ItemId::new(state.next_item_id);
            state.lines.push(LineRecord {
                id,
                product_id: input.product_id,
                quantity: input.quantity,
            });
        }
        Ok(state.render_cart())
    }

    async fn update_cart_item(&self, item_id: ItemId, quantity: i64) -> Result<Cart, ApiError> {
        {
            let mut state = self.lock();
            state.update_item_calls += 1;
        }
        self.wait_if_paused().await;

        let mut state = self.lock();
        if state.fail_on_update {
            return Err(unavailable());
        }
        if quantity < 1 {
            return Err(ApiError::Validation("quantity must be at least 1".into()));
        }

        let product_id = state
            .lines
            .iter()
            .find(|line| line.id == item_id)
            .map(|line| line.product_id)
            .ok_or_else(|| ApiError::NotFound(format!("cart item {item_id}")))?;
        state.check_stock(product_id, quantity)?;

        if let Some(line) = state.lines.iter_mut().find(|line| line.id == item_id) {
            line.quantity = quantity;
        }
        Ok(state.render_cart())
    }

    async fn remove_cart_item(&self, item_id: ItemId) -> Result<Cart, ApiError> {
        let mut state = self.lock();
        let before = state.lines.len();
        state.lines.retain(|line| line.id != item_id);
        if state.lines.len() == before {
            return Err(ApiError::NotFound(format!("cart item {item_id}")));
        }
        Ok(state.render_cart())
    }

    async fn clear_cart(&self) -> Result<Cart, ApiError> {
        let mut state = self.lock();
        state.lines.clear();
        Ok(state.render_cart())
    }

    async fn create_order(&self, input: CreateOrderInput) -> Result<Order, ApiError> {
        let mut state = self.lock();
        state.create_order_calls += 1;
        if state.fail_on_create_order {
            return Err(unavailable());
        }
        if !state
            .addresses
            .iter()
            .any(|address| address.id == input.shipping_address_id)
        {
            return Err(ApiError::Validation(format!(
                "unknown shipping address {}",
                input.shipping_address_id
            )));
        }

        let cart = state.render_cart();
        if cart.items.is_empty() {
            return Err(ApiError::Validation("cart is empty".into()));
        }

        state.next_order_id += 1;
        state.next_gateway_seq += 1;
        let id = OrderId::new(state.next_order_id);
        let order = Order {
            id,
            order_number: format!("ORD-{}", state.next_order_id),
            status: OrderStatus::Pending,
            gateway_order_id: format!("gw_{}", state.next_gateway_seq),
            total_amount: cart.subtotal,
            shipping_address_id: input.shipping_address_id,
            line_items: cart
                .items
                .iter()
                .map(|item| OrderLineItem {
                    product_id: item.product_id,
                    product_name: item.product_name.clone(),
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                    subtotal: item.subtotal,
                })
                .collect(),
            created_at: Utc::now(),
        };
        state.orders.insert(id, order.clone());
        // The cart is NOT cleared here; that happens on confirmation.
        Ok(order)
    }

    async fn confirm_payment(
        &self,
        order_id: OrderId,
        payment: PaymentFields,
    ) -> Result<Order, ApiError> {
        let mut state = self.lock();
        state.confirm_calls += 1;
        if state.fail_on_confirm {
            return Err(ApiError::Validation(
                "payment signature verification failed".into(),
            ));
        }

        let order = state
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("order {order_id}")))?;
        if payment.gateway_order_id != order.gateway_order_id {
            return Err(ApiError::Validation(
                "payment references a different gateway order".into(),
            ));
        }
        if order.status != OrderStatus::Pending {
            return Err(ApiError::Validation(format!(
                "order is {}, expected PENDING",
                order.status
            )));
        }

        let mut confirmed = order;
        confirmed.status = OrderStatus::Confirmed;
        state.orders.insert(order_id, confirmed.clone());
        // Confirmation clears the server cart; clients refetch rather
        // than assuming.
        state.lines.clear();
        Ok(confirmed)
    }

    async fn list_orders(&self) -> Result<Vec<Order>, ApiError> {
        let state = self.lock();
        let mut orders: Vec<Order> = state.orders.values().cloned().collect();
        orders.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(orders)
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<Order, ApiError> {
        let mut state = self.lock();
        let order = state
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("order {order_id}")))?;
        if !order.status.can_cancel() {
            return Err(ApiError::Validation(format!(
                "order in {} cannot be cancelled",
                order.status
            )));
        }
        let mut cancelled = order;
        cancelled.status = OrderStatus::Cancelled;
        state.orders.insert(order_id, cancelled.clone());
        Ok(cancelled)
    }

    async fn list_addresses(&self) -> Result<Vec<ShippingAddress>, ApiError> {
        Ok(self.lock().addresses.clone())
    }

    async fn create_address(&self, input: AddressInput) -> Result<ShippingAddress, ApiError> {
        let mut state = self.lock();
        state.next_address_id += 1;
        let id = AddressId::new(state.next_address_id);
        // The first address a customer creates becomes their default.
        let is_default = state.addresses.is_empty();
        let address = build_address(id, &input, is_default);
        state.addresses.push(address.clone());
        Ok(address)
    }

    async fn update_address(
        &self,
        id: AddressId,
        input: AddressInput,
    ) -> Result<ShippingAddress, ApiError> {
        let mut state = self.lock();
        let address = state
            .addresses
            .iter_mut()
            .find(|address| address.id == id)
            .ok_or_else(|| ApiError::NotFound(format!("address {id}")))?;
        *address = build_address(id, &input, address.is_default);
        Ok(address.clone())
    }

    async fn delete_address(&self, id: AddressId) -> Result<(), ApiError> {
        let mut state = self.lock();
        let before = state.addresses.len();
        state.addresses.retain(|address| address.id != id);
        if state.addresses.len() == before {
            return Err(ApiError::NotFound(format!("address {id}")));
        }
        Ok(())
    }

    async fn set_default_address(&self, id: AddressId) -> Result<ShippingAddress, ApiError> {
        let mut state = self.lock();
        if !state.addresses.iter().any(|address| address.id == id) {
            return Err(ApiError::NotFound(format!("address {id}")));
        }
        // Atomic exclusivity change: exactly one default after this call.
        for address in &mut state.addresses {
            address.is_default = address.id == id;
        }
        let address = state
            .addresses
            .iter()
            .find(|address| address.id == id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("address {id}")))?;
        Ok(address)
    }
}
