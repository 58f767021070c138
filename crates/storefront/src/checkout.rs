//! Checkout orchestration.
//!
//! A [`CheckoutSession`] walks a customer through address selection,
//! review, and payment. Order creation happens at most once per session:
//! a dismissed or failed payment widget reuses the already-created order
//! instead of creating a second one. Payment verification failure is
//! terminal for the session; a merely dismissed widget is retriable.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{info, instrument, warn};
use toybox_core::{AddressId, Price};

use crate::api::{ApiError, ApiGateway, CreateOrderInput, Order, PaymentFields};
use crate::cart::CartStore;

// ─────────────────────────────────────────────────────────────────────────────
// Step machine
// ─────────────────────────────────────────────────────────────────────────────

/// The steps of a checkout, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutStep {
    /// Pick or create a shipping address.
    Address,
    /// Review line items and totals.
    Review,
    /// Hand off to the payment widget.
    Payment,
}

impl CheckoutStep {
    /// The step after this one, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Address => Some(Self::Review),
            Self::Review => Some(Self::Payment),
            Self::Payment => None,
        }
    }

    /// The step before this one, if any.
    #[must_use]
    pub const fn back(self) -> Option<Self> {
        match self {
            Self::Address => None,
            Self::Review => Some(Self::Address),
            Self::Payment => Some(Self::Review),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Address => "ADDRESS",
            Self::Review => "REVIEW",
            Self::Payment => "PAYMENT",
        }
    }
}

impl std::fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payment widget seam
// ─────────────────────────────────────────────────────────────────────────────

/// What the payment widget is asked to collect.
///
/// The amount comes from the created order, never from the live cart, so
/// a cart edit in another tab cannot change what the customer is charged.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// Amount frozen into the order at creation time.
    pub amount: Price,
    /// Payment gateway's handle for the order.
    pub gateway_order_id: String,
    /// Customer name to prefill in the widget, if known.
    pub prefill_name: Option<String>,
}

/// How the payment widget concluded.
#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    /// The customer completed payment; the gateway returned these fields.
    Approved(PaymentFields),
    /// The customer closed the widget without paying.
    Dismissed,
}

/// Seam to the third-party payment widget.
#[async_trait]
pub trait PaymentWidget: Send + Sync {
    /// Open the widget and wait for the customer to finish or dismiss it.
    async fn collect_payment(&self, request: PaymentRequest) -> PaymentOutcome;
}

/// Scripted payment widget for tests.
///
/// Outcomes are consumed in order; when the script runs out the widget
/// approves with fields derived from the request.
#[derive(Default)]
pub struct InMemoryPaymentWidget {
    script: Mutex<Vec<ScriptedOutcome>>,
    requests: Mutex<Vec<PaymentRequest>>,
    payment_seq: Mutex<u32>,
}

enum ScriptedOutcome {
    Dismiss,
    ApproveWithGatewayOrder(String),
}

impl InMemoryPaymentWidget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Vec<ScriptedOutcome>> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue a dismissal for the next widget open.
    pub fn script_dismiss(&self) {
        self.script().push(ScriptedOutcome::Dismiss);
    }

    /// Queue an approval whose fields reference the given gateway order,
    /// regardless of what the request asked for.
    pub fn script_approve_for(&self, gateway_order_id: &str) {
        self.script()
            .push(ScriptedOutcome::ApproveWithGatewayOrder(
                gateway_order_id.to_string(),
            ));
    }

    /// Every request the widget has been opened with, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<PaymentRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn approve(&self, gateway_order_id: String) -> PaymentOutcome {
        let mut seq = self
            .payment_seq
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *seq += 1;
        let payment_id = format!("pay_{seq}");
        PaymentOutcome::Approved(PaymentFields {
            signature: format!("sig_{payment_id}"),
            gateway_payment_id: payment_id,
            gateway_order_id,
        })
    }
}

#[async_trait]
impl PaymentWidget for InMemoryPaymentWidget {
    async fn collect_payment(&self, request: PaymentRequest) -> PaymentOutcome {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request.clone());

        let scripted = {
            let mut script = self.script();
            if script.is_empty() {
                None
            } else {
                Some(script.remove(0))
            }
        };
        match scripted {
            Some(ScriptedOutcome::Dismiss) => PaymentOutcome::Dismissed,
            Some(ScriptedOutcome::ApproveWithGatewayOrder(id)) => self.approve(id),
            None => self.approve(request.gateway_order_id),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Errors surfaced by checkout operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    /// Tried to leave the address step without selecting an address.
    #[error("a shipping address must be selected before review")]
    AddressRequired,

    /// The requested step is not adjacent to the current one.
    #[error("cannot move {direction} from {from}")]
    InvalidTransition {
        from: CheckoutStep,
        direction: &'static str,
    },

    /// Tried to place an order before reaching the payment step.
    #[error("placing an order requires the PAYMENT step, currently on {0}")]
    NotOnPaymentStep(CheckoutStep),

    /// A payment attempt is already running on this session.
    #[error("a payment attempt is already in progress")]
    PaymentInProgress,

    /// The customer dismissed the widget without paying. The order is
    /// still pending and payment can be retried.
    #[error("payment was not attempted")]
    PaymentNotAttempted,

    /// The backend rejected payment verification. The money may have
    /// moved; retrying is not allowed until support resolves the order.
    #[error("payment verification failed: {0}")]
    PaymentVerificationFailed(#[source] ApiError),

    /// A gateway call failed for reasons other than verification.
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug)]
struct SessionState {
    step: CheckoutStep,
    selected_address: Option<AddressId>,
    pending_order: Option<Order>,
    payment_in_flight: bool,
    verification_failed: bool,
}

/// A single customer's walk through checkout.
///
/// Created by [`crate::state::AppState::begin_checkout`]; dropped when
/// the checkout finishes or the customer abandons it.
pub struct CheckoutSession {
    gateway: Arc<dyn ApiGateway>,
    widget: Arc<dyn PaymentWidget>,
    cart: CartStore,
    state: Mutex<SessionState>,
}

impl CheckoutSession {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn ApiGateway>,
        widget: Arc<dyn PaymentWidget>,
        cart: CartStore,
    ) -> Self {
        Self {
            gateway,
            widget,
            cart,
            state: Mutex::new(SessionState {
                step: CheckoutStep::Address,
                selected_address: None,
                pending_order: None,
                payment_in_flight: false,
                verification_failed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The step the session is currently on.
    #[must_use]
    pub fn step(&self) -> CheckoutStep {
        self.lock().step
    }

    /// The address selected for this checkout, if any.
    #[must_use]
    pub fn selected_address(&self) -> Option<AddressId> {
        self.lock().selected_address
    }

    /// The order created by this session, if one exists yet.
    #[must_use]
    pub fn pending_order(&self) -> Option<Order> {
        self.lock().pending_order.clone()
    }

    /// Whether another payment attempt is allowed.
    ///
    /// False once verification has failed; a dismissed widget does not
    /// affect this.
    #[must_use]
    pub fn can_retry_payment(&self) -> bool {
        !self.lock().verification_failed
    }

    /// Select the shipping address for this checkout.
    pub fn select_address(&self, address_id: AddressId) {
        self.lock().selected_address = Some(address_id);
    }

    /// Advance to the next step.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::AddressRequired`] when leaving the
    /// address step without a selection, or
    /// [`CheckoutError::InvalidTransition`] past the last step.
    pub fn advance(&self) -> Result<CheckoutStep, CheckoutError> {
        let mut state = self.lock();
        if state.step == CheckoutStep::Address && state.selected_address.is_none() {
            return Err(CheckoutError::AddressRequired);
        }
        let next = state.step.next().ok_or(CheckoutError::InvalidTransition {
            from: state.step,
            direction: "forward",
        })?;
        state.step = next;
        Ok(next)
    }

    /// Go back one step.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::InvalidTransition`] from the first step.
    pub fn go_back(&self) -> Result<CheckoutStep, CheckoutError> {
        let mut state = self.lock();
        let prev = state.step.back().ok_or(CheckoutError::InvalidTransition {
            from: state.step,
            direction: "back",
        })?;
        state.step = prev;
        Ok(prev)
    }

    /// Run the payment step: create the order if this session has not
    /// created one yet, open the payment widget for it, and confirm the
    /// payment with the backend.
    ///
    /// Re-entering after a dismissal reuses the pending order instead of
    /// creating another. On success the cart mirror is refetched, since
    /// the backend clears the cart as part of confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::NotOnPaymentStep`] unless the session has
    /// advanced to the payment step,
    /// [`CheckoutError::PaymentInProgress`] when called while a
    /// previous call is still running,
    /// [`CheckoutError::PaymentVerificationFailed`] when this session has
    /// already failed verification or the backend rejects the
    /// confirmation, [`CheckoutError::PaymentNotAttempted`] when the
    /// customer dismisses the widget, or the gateway error from order
    /// creation.
    #[instrument(skip(self))]
    pub async fn place_order(&self) -> Result<Order, CheckoutError> {
        let (order, address_id) = {
            let mut state = self.lock();
            if state.step != CheckoutStep::Payment {
                return Err(CheckoutError::NotOnPaymentStep(state.step));
            }
            if state.payment_in_flight {
                return Err(CheckoutError::PaymentInProgress);
            }
            if state.verification_failed {
                return Err(CheckoutError::PaymentVerificationFailed(
                    ApiError::Validation("payment verification already failed".into()),
                ));
            }
            let address_id = state
                .selected_address
                .ok_or(CheckoutError::AddressRequired)?;
            state.payment_in_flight = true;
            (state.pending_order.clone(), address_id)
        };

        let result = self.run_payment(order, address_id).await;
        self.lock().payment_in_flight = false;
        result
    }

    async fn run_payment(
        &self,
        existing: Option<Order>,
        address_id: AddressId,
    ) -> Result<Order, CheckoutError> {
        let order = match existing {
            Some(order) => {
                info!(order_id = %order.id, "reusing pending order for payment retry");
                order
            }
            None => {
                let order = self
                    .gateway
                    .create_order(CreateOrderInput {
                        shipping_address_id: address_id,
                    })
                    .await?;
                info!(order_id = %order.id, order_number = %order.order_number, "order created");
                self.lock().pending_order = Some(order.clone());
                order
            }
        };

        let request = PaymentRequest {
            amount: order.total_amount,
            gateway_order_id: order.gateway_order_id.clone(),
            prefill_name: None,
        };
        let outcome = self.widget.collect_payment(request).await;

        let fields = match outcome {
            PaymentOutcome::Approved(fields) => fields,
            PaymentOutcome::Dismissed => {
                info!(order_id = %order.id, "payment widget dismissed, order kept pending");
                return Err(CheckoutError::PaymentNotAttempted);
            }
        };

        match self.gateway.confirm_payment(order.id, fields).await {
            Ok(confirmed) => {
                // Confirmation cleared the server cart; resync the mirror
                // rather than guessing. A failed refetch is non-fatal.
                if let Err(err) = self.cart.fetch().await {
                    warn!(error = %err, "cart refetch after confirmation failed");
                }
                self.lock().pending_order = Some(confirmed.clone());
                info!(order_id = %confirmed.id, "payment confirmed");
                Ok(confirmed)
            }
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "payment verification failed");
                self.lock().verification_failed = true;
                Err(CheckoutError::PaymentVerificationFailed(err))
            }
        }
    }
}
