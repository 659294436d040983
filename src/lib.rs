//! # Audio Ingest Backend
//!
//! Receives audio from remote recording clients and persists or relays it.
//!
//! ## Application Architecture:
//! - **ingest**: transport-independent core (registry, chunk receiver, uploads, relay)
//! - **sink**: where bytes end up (filesystem or memory)
//! - **websocket**: `/ws/audio` actor feeding the chunk receiver
//! - **handlers**: HTTP endpoints for uploads, relays and diagnostics
//! - **config**: layered configuration (defaults, config.toml, environment)
//! - **state**: shared application state and request metrics
//! - **health**: health and metrics endpoints
//! - **middleware**: request metrics collection
//! - **error**: HTTP error type and JSON error responses

pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod ingest;
pub mod middleware;
pub mod sink;
pub mod state;
pub mod websocket;
