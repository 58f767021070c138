//! Client-side core for the Toybox storefront.
//!
//! Talks to the Toybox REST API through [`api::ApiGateway`] and keeps
//! local mirrors of the customer's cart, addresses, and orders. The
//! server is the source of truth for all of them; every mutation sends a
//! request and replaces the mirror with the response.
//!
//! [`state::AppState`] wires the stores together;
//! [`checkout::CheckoutSession`] runs the address, review, and payment
//! steps of a purchase.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod account;
pub mod api;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod state;
