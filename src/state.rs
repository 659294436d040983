//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor through
//! `web::Data<AppState>`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - Multiple requests and connection tasks hold the same registry, sink and counters
//! - Cloning an `AppState` clones the pointers, never the data behind them
//!
//! ### RwLock (Reader-Writer Lock)
//! - Many requests may read the configuration at once; a config update writes it
//! - Request metrics are updated by the metrics middleware on every request
//!
//! ### Trait objects
//! - `Arc<dyn Sink>` lets the same handlers run against the filesystem or the
//!   in-memory backend, chosen at startup
//!
//! Lock poisoning is not treated as fatal: a panicked writer leaves plain data
//! behind, so readers recover the guard and carry on.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::ingest::{ChunkReceiver, ConnectionRegistry, IngestStats, UploadHandler};
use crate::sink::Sink;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Per-request metrics, updated by the metrics middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    pub start_time: Instant,

    /// Live streaming connections
    pub registry: Arc<ConnectionRegistry>,

    /// Where received audio is persisted
    pub sink: Arc<dyn Sink>,

    /// Ingestion counters
    pub stats: Arc<IngestStats>,
}

/// Request metrics collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,

    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, sink: Arc<dyn Sink>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            registry: Arc::new(ConnectionRegistry::new()),
            sink,
            stats: Arc::new(IngestStats::new()),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so a slow caller never blocks a
    /// config update.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply a partial JSON update to the configuration.
    ///
    /// Returns the configuration now in effect. A rejected update leaves the
    /// current configuration untouched.
    pub fn update_config(&self, json_str: &str) -> AppResult<AppConfig> {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        config
            .update_from_json(json_str)
            .map_err(|e| AppError::ValidationError(e.to_string()))?;
        Ok(config.clone())
    }

    /// Chunk receiver for a new streaming connection, using the current config.
    pub fn chunk_receiver(&self) -> ChunkReceiver {
        ChunkReceiver::new(
            self.registry.clone(),
            self.sink.clone(),
            self.stats.clone(),
            self.get_config().stream.ack_timeout(),
        )
    }

    /// Upload handler for one request, using the current config.
    pub fn upload_handler(&self) -> UploadHandler {
        UploadHandler::new(
            self.sink.clone(),
            self.stats.clone(),
            self.get_config().upload.max_bytes,
        )
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.error_count += 1;
    }

    /// Record one finished request against its endpoint.
    ///
    /// The first request to an endpoint creates its entry.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the request metrics, taken under one read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
