//! Route selection: criteria filter, priority grouping, weighted random.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::manager::RouteManager;
use super::{BindType, Route, RouteError};

/// Constraints a submission places on route choice. Zero/None fields do
/// not constrain.
#[derive(Debug, Clone, Default)]
pub struct RouteCriteria {
    /// Maximum cost per message; ignored when not positive.
    pub max_cost: f64,
    /// Require a specific upstream bind type.
    pub required_bind_type: Option<BindType>,
    /// Minimum success rate, applied once a route has traffic.
    pub min_success_rate: f64,
    /// Maximum average latency.
    pub max_latency: Option<Duration>,
}

/// Picks one active route per submission.
pub struct RouteSelector {
    manager: Arc<RouteManager>,
}

impl RouteSelector {
    pub fn new(manager: Arc<RouteManager>) -> Self {
        Self { manager }
    }

    /// Select a route: filter the active set by `criteria`, keep the
    /// highest-priority group, then pick within it by weighted random.
    pub fn select_route(&self, criteria: &RouteCriteria) -> Result<Route, RouteError> {
        self.select_with(criteria, &mut rand::rng())
    }

    fn select_with(&self, criteria: &RouteCriteria, rng: &mut impl Rng) -> Result<Route, RouteError> {
        let active = self.manager.get_active_routes();
        if active.is_empty() {
            return Err(RouteError::NoActiveRoutes);
        }

        let eligible: Vec<Route> = active
            .into_iter()
            .filter(|r| meets_criteria(r, criteria))
            .collect();
        if eligible.is_empty() {
            return Err(RouteError::NoEligibleRoutes);
        }

        let top_priority = eligible.iter().map(|r| r.priority).max().expect("non-empty");
        let group: Vec<Route> = eligible
            .into_iter()
            .filter(|r| r.priority == top_priority)
            .collect();

        let selected = pick_weighted(&group, rng);
        debug!(route = %selected.id, priority = selected.priority, "route selected");
        Ok(selected.clone())
    }
}

fn meets_criteria(route: &Route, criteria: &RouteCriteria) -> bool {
    if criteria.max_cost > 0.0 && route.cost_per_message > criteria.max_cost {
        return false;
    }

    if let Some(required) = criteria.required_bind_type {
        if route.bind_type != required {
            return false;
        }
    }

    if criteria.min_success_rate > 0.0
        && route.metrics.total_messages > 0
        && route.metrics.success_rate() < criteria.min_success_rate
    {
        return false;
    }

    if let Some(max_latency) = criteria.max_latency {
        if route.metrics.average_latency > max_latency {
            return false;
        }
    }

    true
}

/// Weighted random choice: pick an integer in [0, Σweights), walk the
/// cumulative sum in group order. Falls back to a uniform pick when every
/// weight is zero.
fn pick_weighted<'a>(group: &'a [Route], rng: &mut impl Rng) -> &'a Route {
    let total: u64 = group.iter().map(|r| r.weight as u64).sum();
    if total > 0 {
        let pick = rng.random_range(0..total);
        let mut cumulative = 0u64;
        for route in group {
            cumulative += route.weight as u64;
            if pick < cumulative {
                return route;
            }
        }
    }
    &group[rng.random_range(0..group.len())]
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::super::HealthStatus;
    use super::*;

    fn route(id: &str, priority: i32, weight: u32) -> Route {
        let mut r = Route::new(id, "smsc.example.net", 2775);
        r.priority = priority;
        r.weight = weight;
        r
    }

    fn selector_with(routes: Vec<Route>) -> (Arc<RouteManager>, RouteSelector) {
        let manager = Arc::new(RouteManager::new());
        for r in routes {
            manager.add_route(r).unwrap();
        }
        let selector = RouteSelector::new(manager.clone());
        (manager, selector)
    }

    #[test]
    fn empty_registry_reports_no_active_routes() {
        let (_, selector) = selector_with(vec![]);
        assert_eq!(
            selector.select_route(&RouteCriteria::default()),
            Err(RouteError::NoActiveRoutes)
        );
    }

    #[test]
    fn highest_priority_group_wins() {
        let (_, selector) = selector_with(vec![route("low", 1, 100), route("high", 9, 1)]);
        for _ in 0..20 {
            let picked = selector.select_route(&RouteCriteria::default()).unwrap();
            assert_eq!(picked.id, "high");
        }
    }

    #[test]
    fn cost_filter_excludes_expensive_routes() {
        let mut cheap = route("cheap", 5, 1);
        cheap.cost_per_message = 0.002;
        let mut pricey = route("pricey", 9, 1);
        pricey.cost_per_message = 0.02;

        let (_, selector) = selector_with(vec![cheap, pricey]);
        let criteria = RouteCriteria {
            max_cost: 0.01,
            ..Default::default()
        };
        assert_eq!(selector.select_route(&criteria).unwrap().id, "cheap");
    }

    #[test]
    fn bind_type_filter_applies() {
        let mut tx = route("tx", 5, 1);
        tx.bind_type = BindType::Transmitter;
        let mut rx = route("rx", 9, 1);
        rx.bind_type = BindType::Receiver;

        let (_, selector) = selector_with(vec![tx, rx]);
        let criteria = RouteCriteria {
            required_bind_type: Some(BindType::Transmitter),
            ..Default::default()
        };
        assert_eq!(selector.select_route(&criteria).unwrap().id, "tx");
    }

    #[test]
    fn success_rate_filter_ignores_untried_routes() {
        let (manager, selector) = selector_with(vec![route("tried", 9, 1), route("fresh", 5, 1)]);
        // 50% success on the tried route.
        manager.record_metrics("tried", true, Duration::from_millis(5)).unwrap();
        manager.record_metrics("tried", false, Duration::from_millis(5)).unwrap();

        let criteria = RouteCriteria {
            min_success_rate: 0.8,
            ..Default::default()
        };
        // The untried route has no sample and passes the filter.
        assert_eq!(selector.select_route(&criteria).unwrap().id, "fresh");
    }

    #[test]
    fn latency_filter_excludes_slow_routes() {
        let (manager, selector) = selector_with(vec![route("slow", 9, 1), route("fast", 5, 1)]);
        manager.record_metrics("slow", true, Duration::from_millis(900)).unwrap();
        manager.record_metrics("fast", true, Duration::from_millis(20)).unwrap();

        let criteria = RouteCriteria {
            max_latency: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        assert_eq!(selector.select_route(&criteria).unwrap().id, "fast");
    }

    #[test]
    fn all_filtered_out_reports_no_eligible_routes() {
        let mut r = route("only", 5, 1);
        r.cost_per_message = 1.0;
        let (_, selector) = selector_with(vec![r]);

        let criteria = RouteCriteria {
            max_cost: 0.5,
            ..Default::default()
        };
        assert_eq!(
            selector.select_route(&criteria),
            Err(RouteError::NoEligibleRoutes)
        );
    }

    #[test]
    fn weighted_pick_tracks_the_weights() {
        let (_, selector) = selector_with(vec![route("a", 5, 9), route("b", 5, 1)]);
        let mut rng = StdRng::seed_from_u64(7);

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..1000 {
            let picked = selector
                .select_with(&RouteCriteria::default(), &mut rng)
                .unwrap();
            *counts.entry(picked.id).or_default() += 1;
        }

        let a = counts.get("a").copied().unwrap_or(0);
        let b = counts.get("b").copied().unwrap_or(0);
        assert_eq!(a + b, 1000);
        // 9:1 weights; allow generous slack around the expectation.
        assert!(a > 800, "a picked {a} times");
        assert!(b > 30, "b picked {b} times");
    }

    #[test]
    fn zero_weights_fall_back_to_uniform() {
        let (_, selector) = selector_with(vec![route("a", 5, 0), route("b", 5, 0)]);
        let mut rng = StdRng::seed_from_u64(11);

        let mut saw_a = false;
        let mut saw_b = false;
        for _ in 0..100 {
            match selector
                .select_with(&RouteCriteria::default(), &mut rng)
                .unwrap()
                .id
                .as_str()
            {
                "a" => saw_a = true,
                "b" => saw_b = true,
                other => panic!("unexpected route {other}"),
            }
        }
        assert!(saw_a && saw_b);
    }

    #[test]
    fn failover_to_lower_priority_when_primary_goes_down() {
        let (manager, selector) = selector_with(vec![route("r1", 10, 1), route("r2", 5, 1)]);

        assert_eq!(selector.select_route(&RouteCriteria::default()).unwrap().id, "r1");

        for _ in 0..3 {
            manager
                .update_route_status("r1", HealthStatus::Down, Some("enquire_link timeout"))
                .unwrap();
        }

        assert_eq!(selector.select_route(&RouteCriteria::default()).unwrap().id, "r2");
    }
}
