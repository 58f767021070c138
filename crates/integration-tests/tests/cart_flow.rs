//! Cart scenarios run through the full client stack.
//!
//! Run with: `cargo test -p toybox-integration-tests --test cart_flow`

#![allow(clippy::unwrap_used)]

use rust_decimal::dec;
use toybox_core::ProductId;
use toybox_integration_tests::TestContext;
use toybox_storefront::cart::CartError;

// ============================================================================
// Quantity and mirror invariants
// ============================================================================

#[tokio::test]
async fn test_invalid_quantities_never_reach_the_server() {
    let ctx = TestContext::new();
    let cart = ctx.state.cart();
    cart.add_item(ProductId::new(1), 1).await.unwrap();
    let item_id = cart.snapshot().items.first().unwrap().id;

    for quantity in [0, -1, -50] {
        let err = cart.update_quantity(item_id, quantity).await.unwrap_err();
        assert!(matches!(err, CartError::InvalidQuantity(_)));
    }
    assert_eq!(
        ctx.gateway.update_item_calls(),
        0,
        "invalid quantities are rejected before any request"
    );
    assert_eq!(cart.snapshot().items.first().unwrap().quantity, 1);
}

#[tokio::test]
async fn test_mirror_always_carries_server_totals() {
    let ctx = TestContext::new();
    let cart = ctx.state.cart();

    cart.add_item(ProductId::new(1), 2).await.unwrap();
    let snapshot = cart.snapshot();
    assert_eq!(snapshot.total_items, 2);
    assert_eq!(snapshot.subtotal.amount, dec!(49.98));

    // A second product lands while the first is mirrored; totals still
    // come wholesale from the response, never from local arithmetic.
    tokio::time::sleep(std::time::Duration::from_millis(550)).await;
    cart.add_item(ProductId::new(2), 3).await.unwrap();
    let snapshot = cart.snapshot();
    assert_eq!(snapshot.items.len(), 2);
    assert_eq!(snapshot.total_items, 5);
    assert_eq!(snapshot.subtotal.amount, dec!(87.48));
}

#[tokio::test]
async fn test_stale_mirror_survives_fetch_failure() {
    let ctx = TestContext::new();
    let cart = ctx.state.cart();
    cart.add_item(ProductId::new(1), 2).await.unwrap();

    ctx.gateway.set_fail_on_fetch(true);
    assert!(cart.fetch().await.is_err());
    assert_eq!(cart.total_items(), 2);
    assert!(cart.last_error().is_some());

    ctx.gateway.set_fail_on_fetch(false);
    cart.fetch().await.unwrap();
    assert_eq!(cart.total_items(), 2);
    assert!(cart.last_error().is_none());
}

// ============================================================================
// Per-item lock discipline
// ============================================================================

#[tokio::test]
async fn test_overlapping_updates_for_one_item() {
    let ctx = TestContext::new();
    ctx.stock_product(10, "Rocking Horse", dec!(100.00), 20);
    let cart = ctx.state.cart();
    cart.add_item(ProductId::new(10), 2).await.unwrap();
    let item_id = cart.snapshot().items.first().unwrap().id;

    // Hold the first update in flight at the server.
    ctx.gateway.pause_updates();
    let first = tokio::spawn({
        let cart = cart.clone();
        async move { cart.update_quantity(item_id, 3).await }
    });
    while ctx.gateway.update_item_calls() == 0 {
        tokio::task::yield_now().await;
    }

    // The second update is rejected locally; no request goes out.
    let err = cart.update_quantity(item_id, 5).await.unwrap_err();
    assert!(matches!(err, CartError::ItemLocked(_)));
    assert_eq!(ctx.gateway.update_item_calls(), 1);

    ctx.gateway.resume_updates();
    first.await.unwrap().unwrap();

    let snapshot = cart.snapshot();
    assert_eq!(snapshot.items.first().unwrap().quantity, 3);
    assert_eq!(snapshot.subtotal.amount, dec!(300.00));

    // With the lock released, the rejected update now goes through.
    cart.update_quantity(item_id, 5).await.unwrap();
    let snapshot = cart.snapshot();
    assert_eq!(snapshot.items.first().unwrap().quantity, 5);
    assert_eq!(snapshot.subtotal.amount, dec!(500.00));
}

#[tokio::test]
async fn test_locks_do_not_accumulate_across_operations() {
    let ctx = TestContext::new();
    ctx.stock_product(10, "Rocking Horse", dec!(100.00), 50);
    let cart = ctx.state.cart();
    cart.add_item(ProductId::new(10), 1).await.unwrap();
    let item_id = cart.snapshot().items.first().unwrap().id;

    for quantity in 2..=10 {
        cart.update_quantity(item_id, quantity).await.unwrap();
        assert!(!cart.is_item_locked(item_id));
    }

    // Failures release the lock too.
    ctx.gateway.set_fail_on_update(true);
    assert!(cart.update_quantity(item_id, 11).await.is_err());
    assert!(!cart.is_item_locked(item_id));

    ctx.gateway.set_fail_on_update(false);
    cart.remove_item(item_id).await.unwrap();
    assert!(!cart.is_item_locked(item_id));
    assert!(cart.snapshot().items.is_empty());
}

// ============================================================================
// Add debounce and stock bound
// ============================================================================

#[tokio::test]
async fn test_rapid_adds_collapse_to_one_request() {
    let ctx = TestContext::new();
    let cart = ctx.state.cart();

    cart.add_item(ProductId::new(2), 1).await.unwrap();
    for _ in 0..5 {
        let err = cart.add_item(ProductId::new(2), 1).await.unwrap_err();
        assert!(matches!(err, CartError::AddInProgress));
    }
    assert_eq!(cart.total_items(), 1);
}

#[tokio::test]
async fn test_add_beyond_stock_snapshot_is_rejected_locally() {
    let ctx = TestContext::new();
    let cart = ctx.state.cart();

    // Marble Run has stock 2; a third unit must not even be requested.
    cart.add_item(ProductId::new(3), 2).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(550)).await;
    let err = cart.add_item(ProductId::new(3), 1).await.unwrap_err();
    assert!(matches!(err, CartError::InsufficientStock { .. }));
    assert_eq!(cart.total_items(), 2);
}
