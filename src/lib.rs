//! Subgate - subscription checkout and payment capture core
//!
//! This library provides the core functionality for the Subgate billing
//! service: checkout, webhook intake with provider adapters, exactly-once
//! payment capture, and the token ledger.

pub mod capture;
pub mod checkout;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod extractors;
pub mod handlers;
pub mod idempotency;
pub mod ledger;
pub mod models;
pub mod providers;
