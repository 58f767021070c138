//! Checkout scenarios covering order creation, payment, and failure modes.
//!
//! Run with: `cargo test -p toybox-integration-tests --test checkout_flow`

#![allow(clippy::unwrap_used)]

use rust_decimal::dec;
use toybox_core::{OrderStatus, ProductId};
use toybox_integration_tests::TestContext;
use toybox_storefront::api::ApiGateway;
use toybox_storefront::checkout::{CheckoutError, CheckoutStep};

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_full_checkout_walk() {
    let ctx = TestContext::new();
    let cart = ctx.state.cart();
    cart.add_item(ProductId::new(1), 2).await.unwrap();

    let session = ctx.state.begin_checkout(ctx.widget.clone());
    assert_eq!(session.step(), CheckoutStep::Address);

    session.select_address(ctx.address_id);
    assert_eq!(session.advance().unwrap(), CheckoutStep::Review);
    assert_eq!(session.advance().unwrap(), CheckoutStep::Payment);

    let order = session.place_order().await.unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.total_amount.amount, dec!(49.98));
    assert_eq!(order.line_items.len(), 1);

    // Confirmation cleared the server cart and the mirror followed.
    assert!(cart.snapshot().items.is_empty());
    assert_eq!(cart.total_items(), 0);
}

#[tokio::test]
async fn test_back_navigation_preserves_selection() {
    let ctx = TestContext::new();
    ctx.state.cart().add_item(ProductId::new(1), 1).await.unwrap();

    let session = ctx.state.begin_checkout(ctx.widget.clone());
    session.select_address(ctx.address_id);
    session.advance().unwrap();
    session.advance().unwrap();

    assert_eq!(session.go_back().unwrap(), CheckoutStep::Review);
    assert_eq!(session.go_back().unwrap(), CheckoutStep::Address);
    assert!(matches!(
        session.go_back().unwrap_err(),
        CheckoutError::InvalidTransition { .. }
    ));
    assert_eq!(session.selected_address(), Some(ctx.address_id));
}

// ============================================================================
// At-most-once order creation
// ============================================================================

#[tokio::test]
async fn test_dismissed_widget_reuses_the_pending_order() {
    let ctx = TestContext::new();
    ctx.state.cart().add_item(ProductId::new(1), 2).await.unwrap();

    let session = ctx.state.begin_checkout(ctx.widget.clone());
    session.select_address(ctx.address_id);
    session.advance().unwrap();
    session.advance().unwrap();

    // Customer closes the widget twice before following through.
    ctx.widget.script_dismiss();
    ctx.widget.script_dismiss();
    for _ in 0..2 {
        let err = session.place_order().await.unwrap_err();
        assert!(matches!(err, CheckoutError::PaymentNotAttempted));
        assert!(session.can_retry_payment());
    }

    let order = session.place_order().await.unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(
        ctx.gateway.create_order_calls(),
        1,
        "three attempts, one order"
    );
    assert_eq!(order.gateway_order_id, "gw_1");

    let requests = ctx.widget.requests();
    assert_eq!(requests.len(), 3);
    assert!(
        requests.iter().all(|r| r.gateway_order_id == "gw_1"),
        "every attempt reuses the same gateway handle"
    );
}

#[tokio::test]
async fn test_widget_amount_comes_from_the_order_not_the_cart() {
    let ctx = TestContext::new();
    ctx.state.cart().add_item(ProductId::new(1), 2).await.unwrap();

    let session = ctx.state.begin_checkout(ctx.widget.clone());
    session.select_address(ctx.address_id);
    session.advance().unwrap();
    session.advance().unwrap();
    ctx.widget.script_dismiss();
    let _ = session.place_order().await;

    // The cart grows in another tab between attempts.
    ctx.gateway
        .add_cart_item(toybox_storefront::api::AddItemInput {
            product_id: ProductId::new(2),
            quantity: 4,
        })
        .await
        .unwrap();

    session.place_order().await.unwrap();
    for request in ctx.widget.requests() {
        assert_eq!(
            request.amount.amount,
            dec!(49.98),
            "amount frozen at order creation"
        );
    }
}

// ============================================================================
// Failure modes
// ============================================================================

#[tokio::test]
async fn test_verification_failure_is_sticky() {
    let ctx = TestContext::new();
    ctx.state.cart().add_item(ProductId::new(1), 1).await.unwrap();

    let session = ctx.state.begin_checkout(ctx.widget.clone());
    session.select_address(ctx.address_id);
    session.advance().unwrap();
    session.advance().unwrap();
    ctx.gateway.set_fail_on_confirm(true);

    // The widget approved, so this is a verification failure, not a
    // dismissal.
    let err = session.place_order().await.unwrap_err();
    assert!(matches!(err, CheckoutError::PaymentVerificationFailed(_)));
    assert!(!session.can_retry_payment());
    assert_eq!(ctx.gateway.confirm_calls(), 1);

    // Even with the backend healthy again, the session refuses to retry.
    ctx.gateway.set_fail_on_confirm(false);
    let err = session.place_order().await.unwrap_err();
    assert!(matches!(err, CheckoutError::PaymentVerificationFailed(_)));
    assert_eq!(ctx.gateway.confirm_calls(), 1, "no further confirmation sent");

    // The cart was not cleared; nothing was bought.
    assert!(!ctx.gateway.fetch_cart().await.unwrap().items.is_empty());
}

#[tokio::test]
async fn test_order_creation_failure_leaves_session_retriable() {
    let ctx = TestContext::new();
    ctx.state.cart().add_item(ProductId::new(1), 1).await.unwrap();

    let session = ctx.state.begin_checkout(ctx.widget.clone());
    session.select_address(ctx.address_id);
    session.advance().unwrap();
    session.advance().unwrap();
    ctx.gateway.set_fail_on_create_order(true);

    let err = session.place_order().await.unwrap_err();
    assert!(matches!(err, CheckoutError::Api(_)));
    assert!(session.pending_order().is_none());
    assert!(ctx.widget.requests().is_empty(), "widget never opened");

    ctx.gateway.set_fail_on_create_order(false);
    let order = session.place_order().await.unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
}

#[tokio::test]
async fn test_empty_cart_cannot_place_an_order() {
    let ctx = TestContext::new();
    let session = ctx.state.begin_checkout(ctx.widget.clone());
    session.select_address(ctx.address_id);
    session.advance().unwrap();
    session.advance().unwrap();

    let err = session.place_order().await.unwrap_err();
    assert!(matches!(err, CheckoutError::Api(_)));
    assert!(session.pending_order().is_none());
}
