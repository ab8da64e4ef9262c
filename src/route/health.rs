//! Route health checking.
//!
//! Checks are pluggable per bind type; the default SMPP checker grades a
//! route from its accumulated metrics.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::shutdown::ShutdownSignal;

use super::manager::RouteManager;
use super::{BindType, HealthStatus, Route, RouteError};

/// One health probe for a route.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, route: &Route) -> Result<HealthStatus, RouteError>;
}

/// Default SMPP checker.
///
/// Down after three or more consecutive errors; degraded when the success
/// rate drops below 90% over at least 100 messages or the average latency
/// exceeds one second; otherwise up.
pub struct SmppHealthCheck;

impl SmppHealthCheck {
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;
    pub const MIN_SAMPLE: u64 = 100;
    pub const MIN_SUCCESS_RATE: f64 = 0.9;
    pub const MAX_AVG_LATENCY: Duration = Duration::from_secs(1);
}

#[async_trait]
impl HealthCheck for SmppHealthCheck {
    async fn check(&self, route: &Route) -> Result<HealthStatus, RouteError> {
        if route.metrics.consecutive_errors >= Self::MAX_CONSECUTIVE_ERRORS {
            return Err(RouteError::RouteUnhealthy(route.id.clone()));
        }

        if route.metrics.total_messages >= Self::MIN_SAMPLE
            && route.metrics.success_rate() < Self::MIN_SUCCESS_RATE
        {
            return Ok(HealthStatus::Degraded);
        }

        if route.metrics.average_latency > Self::MAX_AVG_LATENCY {
            return Ok(HealthStatus::Degraded);
        }

        Ok(HealthStatus::Up)
    }
}

/// Periodic health check driver.
pub struct HealthChecker {
    manager: Arc<RouteManager>,
    interval: Duration,
    check_timeout: Duration,
    checkers: RwLock<HashMap<BindType, Arc<dyn HealthCheck>>>,
}

impl HealthChecker {
    /// Build a checker with the default SMPP probe registered for every
    /// bind type.
    pub fn new(manager: Arc<RouteManager>, interval: Duration, check_timeout: Duration) -> Self {
        let mut checkers: HashMap<BindType, Arc<dyn HealthCheck>> = HashMap::new();
        let default: Arc<dyn HealthCheck> = Arc::new(SmppHealthCheck);
        checkers.insert(BindType::Transmitter, default.clone());
        checkers.insert(BindType::Receiver, default.clone());
        checkers.insert(BindType::Transceiver, default);

        Self {
            manager,
            interval,
            check_timeout,
            checkers: RwLock::new(checkers),
        }
    }

    /// Replace the probe for one bind type.
    pub fn register_checker(&self, bind_type: BindType, checker: Arc<dyn HealthCheck>) {
        self.checkers
            .write()
            .expect("health checker lock poisoned")
            .insert(bind_type, checker);
    }

    /// Run until shutdown, probing every enabled route each interval.
    /// Deactivated routes stay on the schedule so they can recover.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        info!(interval_secs = self.interval.as_secs(), "health checker started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("health checker shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    self.check_all_routes().await;
                }
            }
        }
    }

    /// One pass over every enabled route.
    pub async fn check_all_routes(&self) {
        for route in self.manager.get_enabled_routes() {
            self.check_route(&route).await;
        }
    }

    async fn check_route(&self, route: &Route) {
        let checker = {
            let checkers = self.checkers.read().expect("health checker lock poisoned");
            match checkers.get(&route.bind_type) {
                Some(checker) => checker.clone(),
                None => return,
            }
        };

        let outcome = timeout(self.check_timeout, checker.check(route)).await;
        let result = match outcome {
            Ok(Ok(status)) => {
                debug!(route = %route.id, status = %status, "health check");
                self.manager.update_route_status(&route.id, status, None)
            }
            Ok(Err(err)) => self.manager.update_route_status(
                &route.id,
                HealthStatus::Down,
                Some(&err.to_string()),
            ),
            Err(_) => self.manager.update_route_status(
                &route.id,
                HealthStatus::Down,
                Some("health check timeout"),
            ),
        };

        if let Err(err) = result {
            warn!(route = %route.id, error = %err, "failed to record health status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(route: Route) -> Arc<RouteManager> {
        let manager = Arc::new(RouteManager::new());
        manager.add_route(route).unwrap();
        manager
    }

    fn checker(manager: &Arc<RouteManager>) -> HealthChecker {
        HealthChecker::new(
            manager.clone(),
            Duration::from_secs(30),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn healthy_route_stays_up() {
        let manager = manager_with(Route::new("r1", "smsc", 2775));
        checker(&manager).check_all_routes().await;

        let route = manager.get_route("r1").unwrap();
        assert_eq!(route.health_status, HealthStatus::Up);
        assert!(manager.is_active("r1"));
        assert!(route.last_health_check.is_some());
    }

    #[tokio::test]
    async fn three_consecutive_errors_take_the_route_down() {
        let manager = manager_with(Route::new("r1", "smsc", 2775));

        // Two upstream failures reported from outside the checker.
        for _ in 0..2 {
            manager
                .update_route_status("r1", HealthStatus::Down, Some("connect refused"))
                .unwrap();
        }
        // Not yet at the threshold: the probe marks it back up.
        checker(&manager).check_all_routes().await;
        assert!(manager.is_active("r1"));

        for _ in 0..3 {
            manager
                .update_route_status("r1", HealthStatus::Down, Some("connect refused"))
                .unwrap();
        }
        checker(&manager).check_all_routes().await;

        let route = manager.get_route("r1").unwrap();
        assert_eq!(route.health_status, HealthStatus::Down);
        assert!(!manager.is_active("r1"));
    }

    #[tokio::test]
    async fn low_success_rate_over_sample_is_degraded() {
        let manager = manager_with(Route::new("r1", "smsc", 2775));
        for i in 0..120 {
            manager
                .record_metrics("r1", i % 2 == 0, Duration::from_millis(10))
                .unwrap();
        }

        checker(&manager).check_all_routes().await;
        let route = manager.get_route("r1").unwrap();
        assert_eq!(route.health_status, HealthStatus::Degraded);
        // Degraded routes remain active.
        assert!(manager.is_active("r1"));
    }

    #[tokio::test]
    async fn slow_average_latency_is_degraded() {
        let manager = manager_with(Route::new("r1", "smsc", 2775));
        manager
            .record_metrics("r1", true, Duration::from_secs(3))
            .unwrap();

        checker(&manager).check_all_routes().await;
        assert_eq!(
            manager.get_route("r1").unwrap().health_status,
            HealthStatus::Degraded
        );
    }
}
