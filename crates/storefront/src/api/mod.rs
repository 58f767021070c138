//! Toybox REST API gateway.
//!
//! # Architecture
//!
//! - The backend is the source of truth - the stores in this crate keep
//!   mirrors, never authoritative state
//! - Every mutation response carries the full updated object graph (whole
//!   cart, whole order, whole address), replacing the local mirror wholesale
//! - Responses arrive in a discriminated envelope parsed at this boundary;
//!   a shape mismatch fails fast instead of falling through shape variants
//!
//! # Implementations
//!
//! - [`HttpGateway`] - reqwest client with bearer auth and a single silent
//!   token refresh on 401
//! - [`InMemoryGateway`] - in-process server double with real server
//!   semantics, used by unit and scenario tests

mod http;
mod memory;
pub mod types;

pub use http::HttpGateway;
pub use memory::InMemoryGateway;
pub use types::*;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use toybox_core::{AddressId, ItemId, OrderId};

/// Errors surfaced by the API gateway, normalized from transport and
/// backend failures.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No response from the backend (connectivity, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Business-rule rejection (4xx). Not retriable without changed input.
    #[error("validation rejected: {0}")]
    Validation(String),

    /// 401 surviving the refresh attempt, or 403. The caller must treat
    /// this as a forced logout.
    #[error("authentication failed")]
    Auth,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Rate limited by the backend.
    #[error("rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Response did not match the expected envelope shape.
    #[error("response decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Backend-side failure (5xx).
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Backend-provided message, possibly empty.
        message: String,
    },
}

impl ApiError {
    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited(_) | Self::Server { .. }
        )
    }
}

/// Discriminated response envelope wrapping every backend payload.
///
/// ```json
/// {"status": "ok", "data": {...}}
/// {"status": "error", "code": "validation", "message": "..."}
/// ```
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Envelope<T> {
    /// Successful response carrying the payload.
    Ok {
        /// The payload.
        data: T,
    },
    /// Backend-signaled failure.
    Error {
        /// Machine-readable error code.
        code: String,
        /// Human-readable message.
        message: String,
    },
}

impl<T> Envelope<T> {
    /// Unwrap the envelope into the payload or a normalized error.
    ///
    /// # Errors
    ///
    /// Returns the backend error mapped onto the [`ApiError`] taxonomy.
    pub fn into_result(self) -> Result<T, ApiError> {
        match self {
            Self::Ok { data } => Ok(data),
            Self::Error { code, message } => Err(match code.as_str() {
                "validation" => ApiError::Validation(message),
                "not_found" => ApiError::NotFound(message),
                "auth" => ApiError::Auth,
                _ => ApiError::Server {
                    status: 500,
                    message,
                },
            }),
        }
    }
}

/// The seam between the stores and the backend.
///
/// Every cart mutation returns the full updated cart; the stores replace
/// their mirrors with it and never merge.
#[async_trait]
pub trait ApiGateway: Send + Sync {
    /// `GET /cart`
    async fn fetch_cart(&self) -> Result<Cart, ApiError>;

    /// `POST /cart/items`
    async fn add_cart_item(&self, input: AddItemInput) -> Result<Cart, ApiError>;

    /// `PUT /cart/items/{itemId}`
    async fn update_cart_item(&self, item_id: ItemId, quantity: i64) -> Result<Cart, ApiError>;

    /// `DELETE /cart/items/{itemId}`
    async fn remove_cart_item(&self, item_id: ItemId) -> Result<Cart, ApiError>;

    /// `DELETE /cart`
    async fn clear_cart(&self) -> Result<Cart, ApiError>;

    /// `POST /orders`
    async fn create_order(&self, input: CreateOrderInput) -> Result<Order, ApiError>;

    /// `POST /orders/{id}/confirm`
    async fn confirm_payment(
        &self,
        order_id: OrderId,
        fields: PaymentFields,
    ) -> Result<Order, ApiError>;

    /// `GET /orders`
    async fn list_orders(&self) -> Result<Vec<Order>, ApiError>;

    /// `POST /orders/{id}/cancel`
    async fn cancel_order(&self, order_id: OrderId) -> Result<Order, ApiError>;

    /// `GET /addresses`
    async fn list_addresses(&self) -> Result<Vec<ShippingAddress>, ApiError>;

    /// `POST /addresses`
    async fn create_address(&self, input: AddressInput) -> Result<ShippingAddress, ApiError>;

    /// `PUT /addresses/{id}`
    async fn update_address(
        &self,
        id: AddressId,
        input: AddressInput,
    ) -> Result<ShippingAddress, ApiError>;

    /// `DELETE /addresses/{id}`
    async fn delete_address(&self, id: AddressId) -> Result<(), ApiError>;

    /// `PUT /addresses/{id}/default`
    async fn set_default_address(&self, id: AddressId) -> Result<ShippingAddress, ApiError>;
}
