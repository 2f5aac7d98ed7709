//! Lead Core Library
//!
//! This library provides a concurrent, observable key-value cache and a
//! circuit-breaker guarded processor that classifies sales-lead states.
//!
//! # Modules
//!
//! - `cache`: Fire-and-forget key-value cache with hit/miss accounting.
//! - `circuit_breaker`: Closed/open/half-open failure guard.
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `events`: Transition event records.
//! - `handlers`: Health and OpenAPI HTTP handlers.
//! - `lead_state`: Lead lifecycle states and their classification.
//! - `processor`: Guarded lead-state processing.
//! - `telemetry`: Injected metrics sink and its implementations.

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod lead_state;
pub mod processor;
pub mod telemetry;
