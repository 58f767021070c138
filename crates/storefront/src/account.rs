//! Customer account data: shipping addresses and order history.
//!
//! Both stores are local mirrors over the gateway, in the same style as
//! [`crate::cart::CartStore`]: mutations go to the server and the mirror
//! is updated from the response, never patched speculatively.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::instrument;
use toybox_core::{AddressId, OrderId, OrderStatus};

use crate::api::{AddressInput, ApiError, ApiGateway, Order, ShippingAddress};

/// Errors surfaced by account operations.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    /// Cancellation requested for an order whose status forbids it.
    #[error("order in {0} cannot be cancelled")]
    NotCancellable(OrderStatus),

    /// The order is not in the local mirror; refresh first.
    #[error("unknown order {0}")]
    UnknownOrder(OrderId),

    /// The gateway call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Address book
// ─────────────────────────────────────────────────────────────────────────────

/// Shared handle to the customer's shipping addresses.
#[derive(Clone)]
pub struct AddressBook {
    gateway: Arc<dyn ApiGateway>,
    addresses: Arc<RwLock<Vec<ShippingAddress>>>,
}

impl AddressBook {
    #[must_use]
    pub fn new(gateway: Arc<dyn ApiGateway>) -> Self {
        Self {
            gateway,
            addresses: Arc::new(RwLock::new(Vec::new())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ShippingAddress>> {
        self.addresses
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ShippingAddress>> {
        self.addresses
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current snapshot of the mirror.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ShippingAddress> {
        self.read().clone()
    }

    /// The default address, if one exists.
    #[must_use]
    pub fn default_address(&self) -> Option<ShippingAddress> {
        self.read().iter().find(|a| a.is_default).cloned()
    }

    /// Replace the mirror with the server's address list.
    ///
    /// # Errors
    ///
    /// Returns the gateway error on failure; the mirror is kept.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), AccountError> {
        let addresses = self.gateway.list_addresses().await?;
        *self.write() = addresses;
        Ok(())
    }

    /// Create an address and append the server's version to the mirror.
    ///
    /// # Errors
    ///
    /// Returns the gateway error on failure.
    #[instrument(skip(self, input))]
    pub async fn create(&self, input: AddressInput) -> Result<ShippingAddress, AccountError> {
        let created = self.gateway.create_address(input).await?;
        let mut addresses = self.write();
        if created.is_default {
            for address in addresses.iter_mut() {
                address.is_default = false;
            }
        }
        addresses.push(created.clone());
        Ok(created)
    }

    /// Update an address in place with the server's version.
    ///
    /// # Errors
    ///
    /// Returns the gateway error on failure.
    #[instrument(skip(self, input), fields(address_id = %id))]
    pub async fn update(
        &self,
        id: AddressId,
        input: AddressInput,
    ) -> Result<ShippingAddress, AccountError> {
        let updated = self.gateway.update_address(id, input).await?;
        let mut addresses = self.write();
        if let Some(slot) = addresses.iter_mut().find(|a| a.id == id) {
            *slot = updated.clone();
        } else {
            addresses.push(updated.clone());
        }
        Ok(updated)
    }

    /// Delete an address and drop it from the mirror.
    ///
    /// # Errors
    ///
    /// Returns the gateway error on failure.
    #[instrument(skip(self), fields(address_id = %id))]
    pub async fn delete(&self, id: AddressId) -> Result<(), AccountError> {
        self.gateway.delete_address(id).await?;
        self.write().retain(|a| a.id != id);
        Ok(())
    }

    /// Make an address the default.
    ///
    /// The server returns only the newly-default address; exclusivity is
    /// re-derived locally by clearing the flag on every other entry, so
    /// the mirror never shows two defaults.
    ///
    /// # Errors
    ///
    /// Returns the gateway error on failure.
    #[instrument(skip(self), fields(address_id = %id))]
    pub async fn set_default(&self, id: AddressId) -> Result<ShippingAddress, AccountError> {
        let updated = self.gateway.set_default_address(id).await?;
        let mut addresses = self.write();
        for address in addresses.iter_mut() {
            address.is_default = false;
        }
        if let Some(slot) = addresses.iter_mut().find(|a| a.id == updated.id) {
            *slot = updated.clone();
        } else {
            addresses.push(updated.clone());
        }
        Ok(updated)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Order history
// ─────────────────────────────────────────────────────────────────────────────

/// Shared handle to the customer's past orders, newest first.
#[derive(Clone)]
pub struct OrderHistory {
    gateway: Arc<dyn ApiGateway>,
    orders: Arc<RwLock<Vec<Order>>>,
}

impl OrderHistory {
    #[must_use]
    pub fn new(gateway: Arc<dyn ApiGateway>) -> Self {
        Self {
            gateway,
            orders: Arc::new(RwLock::new(Vec::new())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Order>> {
        self.orders
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current snapshot of the mirror, newest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Order> {
        self.read().clone()
    }

    /// Look up a mirrored order.
    #[must_use]
    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.read().iter().find(|o| o.id == id).cloned()
    }

    /// Replace the mirror with the server's order list.
    ///
    /// # Errors
    ///
    /// Returns the gateway error on failure; the mirror is kept.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), AccountError> {
        let orders = self.gateway.list_orders().await?;
        *self
            .orders
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = orders;
        Ok(())
    }

    /// Cancel an order.
    ///
    /// Checked against the mirrored status before any request goes out;
    /// orders past PROCESSING are rejected locally.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::UnknownOrder`] when the order is not in
    /// the mirror, [`AccountError::NotCancellable`] when its status
    /// forbids cancellation, or the gateway error.
    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn cancel(&self, id: OrderId) -> Result<Order, AccountError> {
        let status = self
            .order(id)
            .map(|o| o.status)
            .ok_or(AccountError::UnknownOrder(id))?;
        if !status.can_cancel() {
            return Err(AccountError::NotCancellable(status));
        }

        let cancelled = self.gateway.cancel_order(id).await?;
        let mut orders = self
            .orders
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(slot) = orders.iter_mut().find(|o| o.id == id) {
            *slot = cancelled.clone();
        }
        Ok(cancelled)
    }
}
