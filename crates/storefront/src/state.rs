//! Shared application state.

use std::sync::Arc;

use crate::account::{AddressBook, OrderHistory};
use crate::api::{ApiError, ApiGateway, HttpGateway};
use crate::cart::CartStore;
use crate::checkout::{CheckoutSession, PaymentWidget};
use crate::config::StorefrontConfig;

struct AppStateInner {
    gateway: Arc<dyn ApiGateway>,
    cart: CartStore,
    addresses: AddressBook,
    orders: OrderHistory,
}

/// Composition root for the storefront client.
///
/// Owns the gateway and the three long-lived stores; checkout sessions
/// are created per checkout and discarded after.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

impl AppState {
    /// Build the state over an HTTP gateway configured from the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn from_config(config: &StorefrontConfig) -> Result<Self, ApiError> {
        Ok(Self::with_gateway(Arc::new(HttpGateway::new(config)?)))
    }

    /// Build the state over any gateway. Tests pass an
    /// [`crate::api::InMemoryGateway`] here.
    #[must_use]
    pub fn with_gateway(gateway: Arc<dyn ApiGateway>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                cart: CartStore::new(gateway.clone()),
                addresses: AddressBook::new(gateway.clone()),
                orders: OrderHistory::new(gateway.clone()),
                gateway,
            }),
        }
    }

    #[must_use]
    pub fn cart(&self) -> &CartStore {
        &self.inner.cart
    }

    #[must_use]
    pub fn addresses(&self) -> &AddressBook {
        &self.inner.addresses
    }

    #[must_use]
    pub fn orders(&self) -> &OrderHistory {
        &self.inner.orders
    }

    /// Start a checkout over the current cart with the given payment
    /// widget.
    #[must_use]
    pub fn begin_checkout(&self, widget: Arc<dyn PaymentWidget>) -> CheckoutSession {
        CheckoutSession::new(self.inner.gateway.clone(), widget, self.inner.cart.clone())
    }
}
