//! HTTP implementation of the API gateway.
//!
//! Wraps `reqwest` with bearer auth, a single silent token refresh on 401,
//! and normalization of transport/backend failures into [`ApiError`].

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use toybox_core::{AddressId, ItemId, OrderId};

use crate::config::StorefrontConfig;

use super::{
    AddItemInput, AddressInput, ApiError, ApiGateway, Cart, CreateOrderInput, Envelope, Order,
    PaymentFields, ShippingAddress, UpdateItemInput,
};

/// Gateway for the Toybox REST API over HTTP.
///
/// Cheaply cloneable via `Arc`; all clones share the connection pool and
/// the refreshed access token.
#[derive(Clone)]
pub struct HttpGateway {
    inner: Arc<HttpGatewayInner>,
}

struct HttpGatewayInner {
    client: reqwest::Client,
    base_url: String,
    access_token: RwLock<SecretString>,
    refresh_token: SecretString,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshedToken {
    access_token: String,
}

impl HttpGateway {
    /// Create a new HTTP gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &StorefrontConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpGatewayInner {
                client,
                base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
                access_token: RwLock::new(config.access_token.clone()),
                refresh_token: config.refresh_token.clone(),
            }),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.inner.base_url)
    }

    fn bearer(&self) -> String {
        let token = self
            .inner
            .access_token
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        format!("Bearer {}", token.expose_secret())
    }

    /// Issue one request, decoding a 2xx body through the envelope.
    ///
    /// A 401 is returned as `ApiError::Auth` so the caller can decide
    /// whether a refresh-and-retry is still available.
    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, ApiError> {
        let mut request = self
            .inner
            .client
            .request(method, self.url(path))
            .header("Authorization", self.bearer());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(ApiError::RateLimited(retry_after));
        }

        // Read the body as text first for better error diagnostics
        let text = response.text().await?;

        if !status.is_success() {
            return Err(normalize_failure(status, &text));
        }

        let envelope: Envelope<T> = serde_json::from_str(&text).map_err(|e| {
            warn!(
                status = %status,
                body = %text.chars().take(200).collect::<String>(),
                "Response did not match the expected envelope"
            );
            ApiError::Decode(e)
        })?;
        envelope.into_result()
    }

    /// Issue a request with the single silent refresh-and-retry on 401.
    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, ApiError> {
        match self.send_once(method.clone(), path, body).await {
            Err(ApiError::Auth) => {
                debug!(path, "Access token rejected, attempting refresh");
                self.refresh_access_token().await?;
                self.send_once(method, path, body).await
            }
            other => other,
        }
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Any failure here surfaces as `ApiError::Auth`: the session cannot be
    /// recovered silently and the caller must log out.
    async fn refresh_access_token(&self) -> Result<(), ApiError> {
        let body = serde_json::json!({
            "refreshToken": self.inner.refresh_token.expose_secret(),
        });

        let response = self
            .inner
            .client
            .post(self.url("/auth/refresh"))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Token refresh rejected");
            return Err(ApiError::Auth);
        }

        let text = response.text().await?;
        let envelope: Envelope<RefreshedToken> =
            serde_json::from_str(&text).map_err(|_| ApiError::Auth)?;
        let refreshed = envelope.into_result().map_err(|_| ApiError::Auth)?;

        let mut token = self
            .inner
            .access_token
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *token = SecretString::from(refreshed.access_token);

        Ok(())
    }
}

/// Map a non-2xx response onto the error taxonomy, pulling the message out
/// of the error envelope when one is present.
fn normalize_failure(status: StatusCode, text: &str) -> ApiError {
    let message = serde_json::from_str::<Envelope<serde_json::Value>>(text)
        .ok()
        .and_then(|envelope| match envelope {
            Envelope::Error { message, .. } => Some(message),
            Envelope::Ok { .. } => None,
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Auth,
        StatusCode::NOT_FOUND => ApiError::NotFound(message),
        s if s.is_client_error() => ApiError::Validation(message),
        s => ApiError::Server {
            status: s.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl ApiGateway for HttpGateway {
    #[instrument(skip(self))]
    async fn fetch_cart(&self) -> Result<Cart, ApiError> {
        self.send(Method::GET, "/cart", None).await
    }

    #[instrument(skip(self), fields(product_id = %input.product_id))]
    async fn add_cart_item(&self, input: AddItemInput) -> Result<Cart, ApiError> {
        let body = serde_json::to_value(&input)?;
        self.send(Method::POST, "/cart/items", Some(&body)).await
    }

    #[instrument(skip(self), fields(item_id = %item_id))]
    async fn update_cart_item(&self, item_id: ItemId, quantity: i64) -> Result<Cart, ApiError> {
        let body = serde_json::to_value(UpdateItemInput { quantity })?;
        self.send(Method::PUT, &format!("/cart/items/{item_id}"), Some(&body))
            .await
    }

    #[instrument(skip(self), fields(item_id = %item_id))]
    async fn remove_cart_item(&self, item_id: ItemId) -> Result<Cart, ApiError> {
        self.send(Method::DELETE, &format!("/cart/items/{item_id}"), None)
            .await
    }

    #[instrument(skip(self))]
    async fn clear_cart(&self) -> Result<Cart, ApiError> {
        self.send(Method::DELETE, "/cart", None).await
    }

    #[instrument(skip(self), fields(shipping_address_id = %input.shipping_address_id))]
    async fn create_order(&self, input: CreateOrderInput) -> Result<Order, ApiError> {
        let body = serde_json::to_value(&input)?;
        self.send(Method::POST, "/orders", Some(&body)).await
    }

    #[instrument(skip(self, payment), fields(order_id = %order_id))]
    async fn confirm_payment(
        &self,
        order_id: OrderId,
        payment: PaymentFields,
    ) -> Result<Order, ApiError> {
        let body = serde_json::to_value(&payment)?;
        self.send(Method::POST, &format!("/orders/{order_id}/confirm"), Some(&body))
            .await
    }

    #[instrument(skip(self))]
    async fn list_orders(&self) -> Result<Vec<Order>, ApiError> {
        self.send(Method::GET, "/orders", None).await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn cancel_order(&self, order_id: OrderId) -> Result<Order, ApiError> {
        self.send(Method::POST, &format!("/orders/{order_id}/cancel"), None)
            .await
    }

    #[instrument(skip(self))]
    async fn list_addresses(&self) -> Result<Vec<ShippingAddress>, ApiError> {
        self.send(Method::GET, "/addresses", None).await
    }

    #[instrument(skip(self, input))]
    async fn create_address(&self, input: AddressInput) -> Result<ShippingAddress, ApiError> {
        let body = serde_json::to_value(&input)?;
        self.send(Method::POST, "/addresses", Some(&body)).await
    }

    #[instrument(skip(self, input), fields(address_id = %id))]
    async fn update_address(
        &self,
        id: AddressId,
        input: AddressInput,
    ) -> Result<ShippingAddress, ApiError> {
        let body = serde_json::to_value(&input)?;
        self.send(Method::PUT, &format!("/addresses/{id}"), Some(&body))
            .await
    }

    #[instrument(skip(self), fields(address_id = %id))]
    async fn delete_address(&self, id: AddressId) -> Result<(), ApiError> {
        self.send(Method::DELETE, &format!("/addresses/{id}"), None)
            .await
    }

    #[instrument(skip(self), fields(address_id = %id))]
    async fn set_default_address(&self, id: AddressId) -> Result<ShippingAddress, ApiError> {
        self.send(Method::PUT, &format!("/addresses/{id}/default"), None)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_failure_prefers_envelope_message() {
        let text = r#"{"status":"error","code":"validation","message":"quantity exceeds stock"}"#;
        let err = normalize_failure(StatusCode::UNPROCESSABLE_ENTITY, text);
        assert!(matches!(err, ApiError::Validation(m) if m == "quantity exceeds stock"));
    }

    #[test]
    fn test_normalize_failure_falls_back_to_status_reason() {
        let err = normalize_failure(StatusCode::BAD_REQUEST, "not json at all");
        assert!(matches!(err, ApiError::Validation(m) if m == "Bad Request"));
    }

    #[test]
    fn test_normalize_failure_auth_statuses() {
        assert!(matches!(
            normalize_failure(StatusCode::UNAUTHORIZED, ""),
            ApiError::Auth
        ));
        assert!(matches!(
            normalize_failure(StatusCode::FORBIDDEN, ""),
            ApiError::Auth
        ));
    }

    #[test]
    fn test_normalize_failure_server_errors() {
        let err = normalize_failure(StatusCode::BAD_GATEWAY, "");
        assert!(matches!(err, ApiError::Server { status: 502, .. }));
    }
}
