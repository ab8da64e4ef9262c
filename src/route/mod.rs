//! Upstream route management.
//!
//! A [`Route`] is one configured upstream SMSC peer. The
//! [`RouteManager`](manager::RouteManager) keeps the registry ordered for
//! selection, the [`HealthChecker`](health::HealthChecker) drives
//! activation, the [`RouteSelector`](selector::RouteSelector) picks a peer
//! per submission, and the [`ConnectionManager`](connection::ConnectionManager)
//! maintains the persistent binds.

pub mod connection;
pub mod health;
pub mod manager;
pub mod selector;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pdu::Status;

/// Which bind a route (or client) uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindType {
    Transmitter,
    Receiver,
    Transceiver,
}

impl fmt::Display for BindType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindType::Transmitter => write!(f, "transmitter"),
            BindType::Receiver => write!(f, "receiver"),
            BindType::Transceiver => write!(f, "transceiver"),
        }
    }
}

/// Route health as reported by the active checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Degraded,
    Down,
    Maintenance,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Up => write!(f, "UP"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Down => write!(f, "DOWN"),
            HealthStatus::Maintenance => write!(f, "MAINTENANCE"),
        }
    }
}

/// Route-level failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RouteError {
    #[error("route '{0}' already exists")]
    RouteExists(String),

    #[error("route '{0}' not found")]
    RouteNotFound(String),

    #[error("no active routes")]
    NoActiveRoutes,

    #[error("no routes satisfy the selection criteria")]
    NoEligibleRoutes,

    #[error("route '{0}' is unhealthy")]
    RouteUnhealthy(String),

    #[error("no available connections for route '{0}'")]
    NoAvailableConnections(String),

    #[error("connect timeout")]
    ConnectTimeout,

    #[error("upstream rejected request: {status}")]
    Rejected { status: Status },

    #[error("request timed out waiting for upstream response")]
    RequestTimeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(String),
}

/// Performance counters embedded in a route.
///
/// `average_latency` is a weight-0.5 exponential moving average:
/// `avg = (avg + sample) / 2`, with the first sample assigned directly.
/// Cheap to update and biased toward recent traffic, which is what the
/// health thresholds want to see.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteMetrics {
    pub total_messages: u64,
    pub success_messages: u64,
    pub failed_messages: u64,
    pub average_latency: Duration,
    pub last_latency: Duration,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
}

impl RouteMetrics {
    /// Fold one submission outcome into the counters.
    pub fn record(&mut self, success: bool, latency: Duration) {
        self.total_messages += 1;
        self.last_latency = latency;

        if self.average_latency.is_zero() {
            self.average_latency = latency;
        } else {
            self.average_latency = (self.average_latency + latency) / 2;
        }

        if success {
            self.success_messages += 1;
        } else {
            self.failed_messages += 1;
        }
    }

    /// Fraction of successful messages; 1.0 when nothing was sent yet.
    pub fn success_rate(&self) -> f64 {
        if self.total_messages == 0 {
            return 1.0;
        }
        self.success_messages as f64 / self.total_messages as f64
    }
}

/// One configured upstream peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub system_id: String,
    pub password: String,
    pub bind_type: BindType,
    pub priority: i32,
    pub weight: u32,
    pub max_connections: usize,
    pub cost_per_message: f64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub health_status: HealthStatus,
    pub metrics: RouteMetrics,
}

impl Route {
    /// A route with neutral defaults; callers set priority, weight and
    /// credentials as needed.
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let now = Utc::now();
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            host: host.into(),
            port,
            system_id: String::new(),
            password: String::new(),
            bind_type: BindType::Transceiver,
            priority: 0,
            weight: 1,
            max_connections: 1,
            cost_per_message: 0.0,
            enabled: true,
            created_at: now,
            updated_at: now,
            last_health_check: None,
            health_status: HealthStatus::Up,
            metrics: RouteMetrics::default(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_assigns_the_first_sample_then_halves() {
        let mut metrics = RouteMetrics::default();

        metrics.record(true, Duration::from_millis(100));
        assert_eq!(metrics.average_latency, Duration::from_millis(100));

        metrics.record(true, Duration::from_millis(300));
        assert_eq!(metrics.average_latency, Duration::from_millis(200));

        metrics.record(false, Duration::from_millis(400));
        assert_eq!(metrics.average_latency, Duration::from_millis(300));

        assert_eq!(metrics.total_messages, 3);
        assert_eq!(metrics.success_messages, 2);
        assert_eq!(metrics.failed_messages, 1);
    }

    #[test]
    fn success_rate_defaults_to_one_with_no_traffic() {
        let metrics = RouteMetrics::default();
        assert_eq!(metrics.success_rate(), 1.0);

        let mut metrics = RouteMetrics::default();
        metrics.record(true, Duration::from_millis(1));
        metrics.record(false, Duration::from_millis(1));
        assert_eq!(metrics.success_rate(), 0.5);
    }
}
