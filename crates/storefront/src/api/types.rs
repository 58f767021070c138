//! Domain types for the Toybox REST API.
//!
//! These mirror the wire shapes the backend returns. The backend speaks
//! camelCase JSON; every struct here renames accordingly so the gateway can
//! deserialize responses without field-by-field annotations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use toybox_core::{AddressId, ItemId, OrderId, OrderStatus, Price, ProductId};

// =============================================================================
// Cart Types
// =============================================================================

/// The server-owned shopping cart.
///
/// The client never computes `total_items` or `subtotal` itself - every
/// mutation response carries the entire updated cart and replaces the local
/// mirror wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    /// Line items in server-assigned order.
    pub items: Vec<CartItem>,
    /// Total quantity across all items.
    pub total_items: i64,
    /// Subtotal across all items.
    pub subtotal: Price,
}

impl Cart {
    /// An empty cart in the given currency.
    #[must_use]
    pub const fn empty(currency: toybox_core::CurrencyCode) -> Self {
        Self {
            items: Vec::new(),
            total_items: 0,
            subtotal: Price::zero(currency),
        }
    }

    /// Look up a line item by its ID.
    #[must_use]
    pub fn item(&self, id: ItemId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.id == id)
    }
}

/// A line item in the cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Line item ID, unique within the cart.
    pub id: ItemId,
    /// The product this line refers to.
    pub product_id: ProductId,
    /// Product display name.
    pub product_name: String,
    /// Price per unit.
    pub unit_price: Price,
    /// Quantity, always >= 1 (removal is the only path below 1).
    pub quantity: i64,
    /// Advisory stock snapshot at the time of the response.
    pub stock_quantity: i64,
    /// Server-derived quantity x unit price.
    pub subtotal: Price,
}

/// Request body for `POST /cart/items`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemInput {
    /// Product to add.
    pub product_id: ProductId,
    /// Quantity to add, >= 1.
    pub quantity: i64,
}

/// Request body for `PUT /cart/items/{itemId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItemInput {
    /// New absolute quantity, >= 1.
    pub quantity: i64,
}

// =============================================================================
// Order Types
// =============================================================================

/// An order as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Order ID.
    pub id: OrderId,
    /// Human-readable order number, server-generated.
    pub order_number: String,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// Handle assigned by the payment gateway at creation time.
    pub gateway_order_id: String,
    /// Total amount presented to the payment gateway.
    pub total_amount: Price,
    /// Shipping address selected at checkout.
    pub shipping_address_id: AddressId,
    /// Frozen copy of the cart items at creation time, independent of
    /// later cart mutations.
    pub line_items: Vec<OrderLineItem>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A frozen order line, snapshotted from the cart at order creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineItem {
    /// The product ordered.
    pub product_id: ProductId,
    /// Product display name at creation time.
    pub product_name: String,
    /// Price per unit at creation time.
    pub unit_price: Price,
    /// Quantity ordered.
    pub quantity: i64,
    /// Line subtotal at creation time.
    pub subtotal: Price,
}

/// Request body for `POST /orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderInput {
    /// Shipping address for the order.
    pub shipping_address_id: AddressId,
}

/// Opaque payment confirmation fields handed back by the payment widget.
///
/// The client cannot validate these; it forwards them verbatim to
/// `POST /orders/{id}/confirm` and the backend verifies the signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFields {
    /// Payment ID assigned by the gateway.
    pub gateway_payment_id: String,
    /// Gateway-side order handle the payment was taken against.
    pub gateway_order_id: String,
    /// Gateway signature over the payment, verified server-side.
    pub signature: String,
}

// =============================================================================
// Address Types
// =============================================================================

/// A customer shipping address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    /// Address ID.
    pub id: AddressId,
    /// Name of the person receiving the shipment.
    pub recipient_name: String,
    /// Contact phone number.
    pub phone_number: String,
    /// Street address, first line.
    pub line1: String,
    /// Street address, second line.
    pub line2: Option<String>,
    /// City.
    pub city: String,
    /// State or province.
    pub state: String,
    /// Postal code.
    pub postal_code: String,
    /// Country.
    pub country: String,
    /// Whether this is the customer's default address. At most one address
    /// per customer carries this flag.
    pub is_default: bool,
}

/// Request body for address create/update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInput {
    /// Name of the person receiving the shipment.
    pub recipient_name: String,
    /// Contact phone number.
    pub phone_number: String,
    /// Street address, first line.
    pub line1: String,
    /// Street address, second line.
    pub line2: Option<String>,
    /// City.
    pub city: String,
    /// State or province.
    pub state: String,
    /// Postal code.
    pub postal_code: String,
    /// Country.
    pub country: String,
}
