//! Route registry with selection ordering and metric tracking.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{HealthStatus, Route, RouteError, RouteMetrics};

#[derive(Default)]
struct Inner {
    routes: HashMap<String, Route>,
    /// Activation flags driven by health checks. Routes start active and
    /// are toggled off by failing checks.
    active: HashMap<String, bool>,
    /// Ids in insertion order; the tie-break for equal (priority, weight).
    insertion: Vec<String>,
    /// Ids ordered for selection: priority desc, weight desc, stable.
    order: Vec<String>,
}

impl Inner {
    fn reorder(&mut self) {
        let mut ordered: Vec<&Route> = self
            .insertion
            .iter()
            .filter_map(|id| self.routes.get(id))
            .collect();
        ordered.sort_by_key(|r| (std::cmp::Reverse(r.priority), std::cmp::Reverse(r.weight)));
        self.order = ordered.iter().map(|r| r.id.clone()).collect();
    }
}

/// Registry of upstream peers behind one reader-writer lock.
#[derive(Default)]
pub struct RouteManager {
    inner: RwLock<Inner>,
}

impl RouteManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new route. Fresh routes are active until a health check
    /// says otherwise.
    pub fn add_route(&self, mut route: Route) -> Result<(), RouteError> {
        let mut inner = self.inner.write().expect("route lock poisoned");
        if inner.routes.contains_key(&route.id) {
            return Err(RouteError::RouteExists(route.id));
        }

        route.created_at = Utc::now();
        route.updated_at = Utc::now();
        route.metrics = RouteMetrics::default();

        info!(
            route = %route.id,
            host = %route.host,
            port = route.port,
            priority = route.priority,
            weight = route.weight,
            "route added"
        );

        inner.active.insert(route.id.clone(), true);
        inner.insertion.push(route.id.clone());
        inner.routes.insert(route.id.clone(), route);
        inner.reorder();
        Ok(())
    }

    /// Replace an existing route's configuration, preserving its creation
    /// time and accumulated metrics.
    pub fn update_route(&self, mut route: Route) -> Result<(), RouteError> {
        let mut inner = self.inner.write().expect("route lock poisoned");
        let existing = inner
            .routes
            .get(&route.id)
            .ok_or_else(|| RouteError::RouteNotFound(route.id.clone()))?;

        route.created_at = existing.created_at;
        route.metrics = existing.metrics.clone();
        route.updated_at = Utc::now();

        debug!(route = %route.id, "route updated");
        inner.routes.insert(route.id.clone(), route);
        inner.reorder();
        Ok(())
    }

    pub fn remove_route(&self, id: &str) -> Result<(), RouteError> {
        let mut inner = self.inner.write().expect("route lock poisoned");
        if inner.routes.remove(id).is_none() {
            return Err(RouteError::RouteNotFound(id.to_string()));
        }
        inner.active.remove(id);
        inner.insertion.retain(|r| r != id);
        inner.reorder();
        info!(route = %id, "route removed");
        Ok(())
    }

    pub fn get_route(&self, id: &str) -> Result<Route, RouteError> {
        self.inner
            .read()
            .expect("route lock poisoned")
            .routes
            .get(id)
            .cloned()
            .ok_or_else(|| RouteError::RouteNotFound(id.to_string()))
    }

    /// Enabled, health-active routes in selection order.
    pub fn get_active_routes(&self) -> Vec<Route> {
        let inner = self.inner.read().expect("route lock poisoned");
        inner
            .order
            .iter()
            .filter_map(|id| inner.routes.get(id))
            .filter(|r| r.enabled && inner.active.get(&r.id).copied().unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Enabled routes regardless of activation, in selection order. The
    /// health checker walks this list so deactivated routes can recover.
    pub fn get_enabled_routes(&self) -> Vec<Route> {
        let inner = self.inner.read().expect("route lock poisoned");
        inner
            .order
            .iter()
            .filter_map(|id| inner.routes.get(id))
            .filter(|r| r.enabled)
            .cloned()
            .collect()
    }

    /// All routes in selection order.
    pub fn get_all_routes(&self) -> Vec<Route> {
        let inner = self.inner.read().expect("route lock poisoned");
        inner
            .order
            .iter()
            .filter_map(|id| inner.routes.get(id))
            .cloned()
            .collect()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.inner
            .read()
            .expect("route lock poisoned")
            .active
            .get(id)
            .copied()
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("route lock poisoned").routes.is_empty()
    }

    /// Record one health check outcome. An error deactivates the route and
    /// bumps its consecutive-error counter; success reactivates it and
    /// resets the counter.
    pub fn update_route_status(
        &self,
        id: &str,
        status: HealthStatus,
        error: Option<&str>,
    ) -> Result<(), RouteError> {
        let mut inner = self.inner.write().expect("route lock poisoned");
        let route = inner
            .routes
            .get_mut(id)
            .ok_or_else(|| RouteError::RouteNotFound(id.to_string()))?;

        route.health_status = status;
        route.last_health_check = Some(Utc::now());

        match error {
            Some(message) => {
                route.metrics.last_error = Some(message.to_string());
                route.metrics.last_error_time = Some(Utc::now());
                route.metrics.consecutive_errors += 1;
                warn!(
                    route = %id,
                    status = %status,
                    consecutive_errors = route.metrics.consecutive_errors,
                    error = message,
                    "route deactivated by health check"
                );
                inner.active.insert(id.to_string(), false);
            }
            None => {
                route.metrics.consecutive_errors = 0;
                debug!(route = %id, status = %status, "health check passed");
                inner.active.insert(id.to_string(), true);
            }
        }
        Ok(())
    }

    /// Fold one submission outcome into the route's metrics.
    pub fn record_metrics(
        &self,
        id: &str,
        success: bool,
        latency: Duration,
    ) -> Result<(), RouteError> {
        let mut inner = self.inner.write().expect("route lock poisoned");
        let route = inner
            .routes
            .get_mut(id)
            .ok_or_else(|| RouteError::RouteNotFound(id.to_string()))?;
        route.metrics.record(success, latency);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(id: &str, priority: i32, weight: u32) -> Route {
        let mut r = Route::new(id, "smsc.example.net", 2775);
        r.priority = priority;
        r.weight = weight;
        r
    }

    #[test]
    fn ordering_is_priority_then_weight_then_insertion() {
        let manager = RouteManager::new();
        manager.add_route(route("a", 5, 1)).unwrap();
        manager.add_route(route("b", 10, 2)).unwrap();
        manager.add_route(route("c", 10, 5)).unwrap();
        manager.add_route(route("d", 10, 2)).unwrap();

        let ids: Vec<String> = manager
            .get_active_routes()
            .into_iter()
            .map(|r| r.id)
            .collect();
        // c wins on weight within priority 10; b precedes d by insertion.
        assert_eq!(ids, vec!["c", "b", "d", "a"]);
    }

    #[test]
    fn order_is_non_increasing_after_updates() {
        let manager = RouteManager::new();
        manager.add_route(route("a", 1, 1)).unwrap();
        manager.add_route(route("b", 2, 1)).unwrap();
        manager.add_route(route("c", 3, 1)).unwrap();

        let mut updated = route("a", 9, 4);
        updated.name = "a".into();
        manager.update_route(updated).unwrap();

        let routes = manager.get_active_routes();
        let keys: Vec<(i32, u32)> = routes.iter().map(|r| (r.priority, r.weight)).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] >= pair[1], "order must be non-increasing: {:?}", keys);
        }
        assert_eq!(routes[0].id, "a");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let manager = RouteManager::new();
        manager.add_route(route("a", 1, 1)).unwrap();
        assert!(matches!(
            manager.add_route(route("a", 2, 2)),
            Err(RouteError::RouteExists(_))
        ));
    }

    #[test]
    fn update_preserves_creation_time_and_metrics() {
        let manager = RouteManager::new();
        manager.add_route(route("a", 1, 1)).unwrap();
        manager
            .record_metrics("a", true, Duration::from_millis(50))
            .unwrap();
        let before = manager.get_route("a").unwrap();

        manager.update_route(route("a", 7, 3)).unwrap();
        let after = manager.get_route("a").unwrap();

        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.metrics.total_messages, 1);
        assert_eq!(after.priority, 7);
    }

    #[test]
    fn failing_health_checks_deactivate_and_success_reactivates() {
        let manager = RouteManager::new();
        manager.add_route(route("a", 1, 1)).unwrap();
        assert!(manager.is_active("a"));

        manager
            .update_route_status("a", HealthStatus::Down, Some("connection refused"))
            .unwrap();
        assert!(!manager.is_active("a"));
        assert!(manager.get_active_routes().is_empty());
        assert_eq!(manager.get_route("a").unwrap().metrics.consecutive_errors, 1);

        manager
            .update_route_status("a", HealthStatus::Up, None)
            .unwrap();
        assert!(manager.is_active("a"));
        assert_eq!(manager.get_route("a").unwrap().metrics.consecutive_errors, 0);
    }

    #[test]
    fn disabled_routes_never_surface_as_active() {
        let manager = RouteManager::new();
        let mut r = route("off", 1, 1);
        r.enabled = false;
        manager.add_route(r).unwrap();
        assert!(manager.get_active_routes().is_empty());
        assert_eq!(manager.get_enabled_routes().len(), 0);
    }
}
