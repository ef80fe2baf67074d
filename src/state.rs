//! # Application State Management
//!
//! Shared state that every HTTP request handler and every WebSocket
//! connection can reach: the runtime configuration, the process-wide
//! metrics, and the upstream service handles wired once at startup.
//!
//! ## The Arc<RwLock<T>> Pattern:
//! - **Arc**: many handlers hold a reference to the same data at once
//! - **RwLock**: many concurrent readers OR one writer, never both
//! - Requests read the config far more often than `PUT /config` writes
//!   it, which is exactly the workload a reader-writer lock favors
//!
//! Session-local state (conversation history, processing flag) does NOT
//! live here: it belongs to each connection's `SessionController`, so
//! concurrent connections cannot leak state into one another.

use crate::config::AppConfig;
use crate::services::{GeminiClient, ServiceSet};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared across all request handlers and connections.
#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration; updatable through `PUT /api/v1/config`.
    /// Upstream clients read their settings once at startup, so endpoint
    /// and timeout changes take effect on restart.
    pub config: Arc<RwLock<AppConfig>>,

    /// Process-wide request/session metrics
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (read-only, no lock needed)
    pub start_time: Instant,

    /// Service handles every session controller drives
    services: Arc<ServiceSet>,

    /// Concrete Gemini client for the diagnostics endpoints
    /// (`/test-api`, `/models`), which need more than the trait exposes
    gemini: Arc<GeminiClient>,
}

/// Counters collected across all requests and connections.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// HTTP requests processed since startup
    pub request_count: u64,

    /// Requests that ended in an error response
    pub error_count: u64,

    /// Live WebSocket sessions right now
    pub active_sessions: u32,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Statistics for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Wire up the shared state from a validated configuration and the
    /// startup-constructed service handles.
    pub fn new(config: AppConfig, services: Arc<ServiceSet>, gemini: Arc<GeminiClient>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            services,
            gemini,
        }
    }

    /// A copy of the current configuration. Cloning releases the read
    /// lock immediately instead of holding it through the caller's work.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating the candidate.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// The service handles a new session controller should drive.
    pub fn services(&self) -> Arc<ServiceSet> {
        self.services.clone()
    }

    /// The concrete generation client, for the diagnostics endpoints.
    pub fn gemini(&self) -> Arc<GeminiClient> {
        self.gemini.clone()
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record one finished request against its endpoint's statistics.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// A WebSocket session opened.
    pub fn increment_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_sessions += 1;
    }

    /// A WebSocket session closed. Guarded against underflow so a double
    /// decrement cannot wrap the counter.
    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// Current number of live WebSocket sessions.
    pub fn active_sessions(&self) -> u32 {
        self.metrics.read().unwrap().active_sessions
    }

    /// Consistent copy of the metrics for serialization, taken under the
    /// read lock and released before any response is built.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time: total duration over request count.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate between 0.0 (none failed) and 1.0 (all failed).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
