//! Local cart mirror.
//!
//! The server owns the cart. This store keeps a local copy, sends
//! mutations through the gateway, and wholesale-replaces the mirror with
//! whatever cart the server returns. It never patches the mirror itself,
//! so local totals can never drift from server totals.
//!
//! Two guards keep concurrent mutations safe:
//! - a per-item lock rejects a second update/remove for an item that
//!   already has one in flight, before any request is sent
//! - a short busy window after a successful add absorbs rapid repeat
//!   clicks on the same button

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::{instrument, warn};
use toybox_core::{CurrencyCode, ItemId, ProductId};

use crate::api::{AddItemInput, ApiError, ApiGateway, Cart};

/// How long the store refuses further adds after a successful one.
const ADD_BUSY_WINDOW: Duration = Duration::from_millis(500);

/// Errors surfaced by cart operations.
#[derive(Debug, thiserror::Error)]
pub enum CartError {
    /// Quantity below 1; update callers should use remove instead.
    #[error("quantity must be at least 1, got {0}")]
    InvalidQuantity(i64),

    /// Requested quantity exceeds the last known stock for the item.
    #[error("requested {requested} but only {available} in stock")]
    InsufficientStock { requested: i64, available: i64 },

    /// The item already has a mutation in flight.
    #[error("item {0} has a mutation in flight")]
    ItemLocked(ItemId),

    /// An add landed inside the busy window after a previous add.
    #[error("an add is already in progress")]
    AddInProgress,

    /// The gateway call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug)]
struct CartState {
    cart: Cart,
    locked: HashSet<ItemId>,
    add_busy_until: Option<Instant>,
    last_error: Option<String>,
}

/// Shared handle to the local cart mirror.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Clone)]
pub struct CartStore {
    gateway: Arc<dyn ApiGateway>,
    state: Arc<RwLock<CartState>>,
}

impl CartStore {
    #[must_use]
    pub fn new(gateway: Arc<dyn ApiGateway>) -> Self {
        Self {
            gateway,
            state: Arc::new(RwLock::new(CartState {
                cart: Cart::empty(CurrencyCode::USD),
                locked: HashSet::new(),
                add_busy_until: None,
                last_error: None,
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CartState> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CartState> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Replace the mirror with a server-provided cart and clear the last
    /// recorded error. Every successful operation funnels through here.
    fn replace(&self, cart: Cart) {
        let mut state = self.write();
        state.cart = cart;
        state.last_error = None;
    }

    fn record_error(&self, err: &CartError) {
        self.write().last_error = Some(err.to_string());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Current snapshot of the mirror.
    #[must_use]
    pub fn snapshot(&self) -> Cart {
        self.read().cart.clone()
    }

    /// Total units across all lines, as last reported by the server.
    #[must_use]
    pub fn total_items(&self) -> i64 {
        self.read().cart.total_items
    }

    /// Whether the given item has a mutation in flight.
    #[must_use]
    pub fn is_item_locked(&self, item_id: ItemId) -> bool {
        self.read().locked.contains(&item_id)
    }

    /// Whether adds are currently refused by the busy window.
    #[must_use]
    pub fn is_add_busy(&self) -> bool {
        self.read()
            .add_busy_until
            .is_some_and(|until| Instant::now() < until)
    }

    /// The message of the most recent failed operation, if the mirror has
    /// not been refreshed since.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.read().last_error.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Refetch the cart from the server.
    ///
    /// On failure the stale mirror is kept and the error recorded; callers
    /// keep rendering the last good state.
    ///
    /// # Errors
    ///
    /// Returns the gateway error on network or server failure.
    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Result<(), CartError> {
        match self.gateway.fetch_cart().await {
            Ok(cart) => {
                self.replace(cart);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "cart fetch failed, keeping stale mirror");
                let err = CartError::from(err);
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Add `quantity` units of a product to the cart.
    ///
    /// Validates quantity and the last known stock snapshot locally before
    /// any request goes out. A successful add opens a short busy window
    /// during which further adds are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::InvalidQuantity`] for quantities below 1,
    /// [`CartError::InsufficientStock`] when the request exceeds the last
    /// known stock, [`CartError::AddInProgress`] inside the busy window,
    /// or the gateway error.
    #[instrument(skip(self), fields(product_id = %product_id, quantity))]
    pub async fn add_item(&self, product_id: ProductId, quantity: i64) -> Result<(), CartError> {
        if quantity < 1 {
            return Err(CartError::InvalidQuantity(quantity));
        }
        {
            let state = self.read();
            if state.add_busy_until.is_some_and(|until| Instant::now() < until) {
                return Err(CartError::AddInProgress);
            }
            // Stock is checked against the mirror when we already carry the
            // product; for unknown products the server has the only answer.
            if let Some(item) = state
                .cart
                .items
                .iter()
                .find(|item| item.product_id == product_id)
            {
                let merged = item.quantity + quantity;
                if merged > item.stock_quantity {
                    return Err(CartError::InsufficientStock {
                        requested: merged,
                        available: item.stock_quantity,
                    });
                }
            }
        }

        match self
            .gateway
            .add_cart_item(AddItemInput {
                product_id,
                quantity,
            })
            .await
        {
            Ok(cart) => {
                self.replace(cart);
                self.write().add_busy_until = Some(Instant::now() + ADD_BUSY_WINDOW);
                Ok(())
            }
            Err(err) => {
                let err = CartError::from(err);
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Set the quantity of an existing cart line.
    ///
    /// Rejected locally when the item is locked or the quantity invalid;
    /// no request is sent in either case. The item stays locked for the
    /// duration of the request and is unlocked on success and failure
    /// alike.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::ItemLocked`] when a mutation for the item is
    /// already in flight, [`CartError::InvalidQuantity`] for quantities
    /// below 1, [`CartError::InsufficientStock`] past the stock snapshot,
    /// or the gateway error.
    #[instrument(skip(self), fields(item_id = %item_id, quantity))]
    pub async fn update_quantity(&self, item_id: ItemId, quantity: i64) -> Result<(), CartError> {
        if quantity < 1 {
            return Err(CartError::InvalidQuantity(quantity));
        }
        {
            let state = self.read();
            if let Some(item) = state.cart.item(item_id)
                && quantity > item.stock_quantity
            {
                return Err(CartError::InsufficientStock {
                    requested: quantity,
                    available: item.stock_quantity,
                });
            }
        }
        self.lock_item(item_id)?;

        let result = self.gateway.update_cart_item(item_id, quantity).await;
        self.unlock_item(item_id);

        match result {
            Ok(cart) => {
                self.replace(cart);
                Ok(())
            }
            Err(err) => {
                let err = CartError::from(err);
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Remove a line from the cart. Same lock discipline as
    /// [`Self::update_quantity`].
    ///
    /// # Errors
    ///
    /// Returns [`CartError::ItemLocked`] when a mutation for the item is
    /// already in flight, or the gateway error.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn remove_item(&self, item_id: ItemId) -> Result<(), CartError> {
        self.lock_item(item_id)?;

        let result = self.gateway.remove_cart_item(item_id).await;
        self.unlock_item(item_id);

        match result {
            Ok(cart) => {
                self.replace(cart);
                Ok(())
            }
            Err(err) => {
                let err = CartError::from(err);
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Empty the cart.
    ///
    /// # Errors
    ///
    /// Returns the gateway error on failure.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<(), CartError> {
        match self.gateway.clear_cart().await {
            Ok(cart) => {
                self.replace(cart);
                Ok(())
            }
            Err(err) => {
                let err = CartError::from(err);
                self.record_error(&err);
                Err(err)
            }
        }
    }

    fn lock_item(&self, item_id: ItemId) -> Result<(), CartError> {
        let mut state = self.write();
        if !state.locked.insert(item_id) {
            return Err(CartError::ItemLocked(item_id));
        }
        Ok(())
    }

    fn unlock_item(&self, item_id: ItemId) {
        self.write().locked.remove(&item_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::InMemoryGateway;
    use rust_decimal::dec;

    fn store_with_product() -> (CartStore, InMemoryGateway) {
        let gateway = InMemoryGateway::new();
        gateway.stock_product(ProductId::new(1), "Plush Dino", dec!(12.50), 5);
        let store = CartStore::new(Arc::new(gateway.clone()));
        (store, gateway)
    }

    #[tokio::test]
    async fn test_add_replaces_mirror_with_server_cart() {
        let (store, _gateway) = store_with_product();
        store.add_item(ProductId::new(1), 2).await.unwrap();

        let cart = store.snapshot();
        assert_eq!(cart.total_items, 2);
        assert_eq!(cart.subtotal.amount, dec!(25.00));
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_quantity_without_request() {
        let (store, _gateway) = store_with_product();
        let err = store.add_item(ProductId::new(1), 0).await.unwrap_err();
        assert!(matches!(err, CartError::InvalidQuantity(0)));
        assert!(store.snapshot().items.is_empty());
    }

    #[tokio::test]
    async fn test_add_busy_window_rejects_rapid_repeat() {
        let (store, _gateway) = store_with_product();
        store.add_item(ProductId::new(1), 1).await.unwrap();
        assert!(store.is_add_busy());

        let err = store.add_item(ProductId::new(1), 1).await.unwrap_err();
        assert!(matches!(err, CartError::AddInProgress));
        assert_eq!(store.total_items(), 1);
    }

    #[tokio::test]
    async fn test_add_rejects_over_local_stock_snapshot() {
        let (store, _gateway) = store_with_product();
        store.add_item(ProductId::new(1), 4).await.unwrap();

        // Wait out the busy window so the stock check is what rejects.
        tokio::time::sleep(ADD_BUSY_WINDOW + Duration::from_millis(50)).await;
        let err = store.add_item(ProductId::new(1), 3).await.unwrap_err();
        assert!(matches!(err, CartError::InsufficientStock { .. }));
    }

    #[tokio::test]
    async fn test_update_unlocks_item_on_failure() {
        let (store, gateway) = store_with_product();
        store.add_item(ProductId::new(1), 2).await.unwrap();
        let item_id = store.snapshot().items.first().unwrap().id;

        gateway.set_fail_on_update(true);
        let err = store.update_quantity(item_id, 3).await.unwrap_err();
        assert!(matches!(err, CartError::Api(_)));
        assert!(!store.is_item_locked(item_id), "lock released on failure");
        assert_eq!(store.snapshot().items.first().unwrap().quantity, 2);

        gateway.set_fail_on_update(false);
        store.update_quantity(item_id, 3).await.unwrap();
        assert_eq!(store.snapshot().items.first().unwrap().quantity, 3);
    }

    #[tokio::test]
    async fn test_second_update_rejected_while_first_in_flight() {
        let (store, gateway) = store_with_product();
        store.add_item(ProductId::new(1), 2).await.unwrap();
        let item_id = store.snapshot().items.first().unwrap().id;

        gateway.pause_updates();
        let first = tokio::spawn({
            let store = store.clone();
            async move { store.update_quantity(item_id, 3).await }
        });

        // Let the first update reach the gateway and park.
        while gateway.update_item_calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(store.is_item_locked(item_id));

        let err = store.update_quantity(item_id, 5).await.unwrap_err();
        assert!(matches!(err, CartError::ItemLocked(_)));
        assert_eq!(gateway.update_item_calls(), 1, "rejection sent no request");

        gateway.resume_updates();
        first.await.unwrap().unwrap();
        assert!(!store.is_item_locked(item_id));
        assert_eq!(store.snapshot().items.first().unwrap().quantity, 3);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_stale_mirror() {
        let (store, gateway) = store_with_product();
        store.add_item(ProductId::new(1), 2).await.unwrap();

        gateway.set_fail_on_fetch(true);
        assert!(store.fetch().await.is_err());
        assert_eq!(store.total_items(), 2, "stale mirror survives the failure");
        assert!(store.last_error().is_some());

        gateway.set_fail_on_fetch(false);
        store.fetch().await.unwrap();
        assert!(store.last_error().is_none());
    }

    #[tokio::test]
    async fn test_remove_item_updates_mirror() {
        let (store, _gateway) = store_with_product();
        store.add_item(ProductId::new(1), 2).await.unwrap();
        let item_id = store.snapshot().items.first().unwrap().id;

        store.remove_item(item_id).await.unwrap();
        assert!(store.snapshot().items.is_empty());
        assert_eq!(store.total_items(), 0);
    }
}
