//! Outbound forwarding: the glue between inbound sessions and the
//! upstream route machinery.
//!
//! A submission picks a route, checks out a bound connection, sends
//! submit_sm and waits for its response by sequence number. Transient
//! upstream failures are handed to the retry manager and the message is
//! acknowledged to the client; routing dead-ends are surfaced
//! immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pdu::{SmFields, Status};
use crate::retry::{RetryAttempt, RetryCallback, RetryError, RetryManager};
use crate::route::connection::ConnectionManager;
use crate::route::manager::RouteManager;
use crate::route::selector::{RouteCriteria, RouteSelector};
use crate::route::RouteError;

/// Submission failures as seen by the session layer.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error(transparent)]
    Route(#[from] RouteError),
}

impl ForwardError {
    /// Status code for the client's submit_sm_resp.
    pub fn status(&self) -> Status {
        match self {
            ForwardError::Route(err) => match err {
                RouteError::NoActiveRoutes
                | RouteError::NoEligibleRoutes
                | RouteError::NoAvailableConnections(_)
                | RouteError::RouteNotFound(_) => Status::MessageQueueFull,
                RouteError::RequestTimeout | RouteError::ConnectTimeout => Status::SystemError,
                _ => Status::SubmitFailed,
            },
        }
    }
}

/// Forwarder policy.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Retry profile applied to transient upstream failures. None turns
    /// the retry path off.
    pub retry_profile: Option<String>,
    /// How long to wait for an upstream submit_sm_resp.
    pub request_timeout: Duration,
    /// Selection constraints applied to every submission.
    pub criteria: RouteCriteria,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            retry_profile: None,
            request_timeout: Duration::from_secs(30),
            criteria: RouteCriteria::default(),
        }
    }
}

/// Routes submissions upstream.
pub struct Forwarder {
    routes: Arc<RouteManager>,
    selector: RouteSelector,
    connections: Arc<ConnectionManager>,
    retries: Arc<RetryManager>,
    config: ForwarderConfig,
    message_seq: AtomicU64,
    /// Payloads of messages awaiting a retry, keyed by message id. Dropped
    /// on success or exhaustion; in-flight state does not survive a
    /// restart.
    queued: Mutex<HashMap<String, SmFields>>,
}

impl Forwarder {
    pub fn new(
        routes: Arc<RouteManager>,
        connections: Arc<ConnectionManager>,
        retries: Arc<RetryManager>,
        config: ForwarderConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            selector: RouteSelector::new(routes.clone()),
            routes,
            connections,
            retries,
            config,
            message_seq: AtomicU64::new(1),
            queued: Mutex::new(HashMap::new()),
        })
    }

    /// Allocate a gateway message id.
    pub fn next_message_id(&self) -> String {
        format!("MSG-{}", self.message_seq.fetch_add(1, Ordering::SeqCst))
    }

    /// Forward a submission. Returns the message id acknowledged to the
    /// client.
    ///
    /// With no routes configured at all the gateway terminates the
    /// message itself and acknowledges it directly.
    pub async fn submit(&self, sm: &SmFields) -> Result<String, ForwardError> {
        if self.routes.is_empty() {
            let message_id = self.next_message_id();
            debug!(message_id = %message_id, dest = %sm.dest_addr, "terminating locally, no routes configured");
            return Ok(message_id);
        }

        let route_id = self.selector.select_route(&self.config.criteria)?.id;
        match self.send_via_route(&route_id, sm).await {
            Ok(message_id) => Ok(message_id),
            Err(err) => self.queue_retry(sm, &route_id, err),
        }
    }

    /// One upstream attempt over a specific route. Records route metrics.
    async fn send_via_route(&self, route_id: &str, sm: &SmFields) -> Result<String, RouteError> {
        let conn = self.connections.get_connection(route_id)?;
        let started = Instant::now();

        let outcome = conn.submit(sm.clone(), self.config.request_timeout).await;
        let success = outcome.is_ok();
        if let Err(err) = self.routes.record_metrics(route_id, success, started.elapsed()) {
            warn!(route = %route_id, error = %err, "failed to record route metrics");
        }

        let resp = outcome?;
        let message_id = if resp.message_id.is_empty() {
            self.next_message_id()
        } else {
            resp.message_id
        };
        debug!(route = %route_id, message_id = %message_id, "upstream accepted");
        Ok(message_id)
    }

    /// A transient upstream failure becomes a queued retry and a positive
    /// acknowledgement; anything else propagates to the client.
    fn queue_retry(
        &self,
        sm: &SmFields,
        route_id: &str,
        err: RouteError,
    ) -> Result<String, ForwardError> {
        let transient = matches!(
            err,
            RouteError::RequestTimeout
                | RouteError::ConnectionClosed
                | RouteError::NoAvailableConnections(_)
                | RouteError::Io(_)
        );

        let profile = match (&self.config.retry_profile, transient) {
            (Some(profile), true) => profile.clone(),
            _ => return Err(err.into()),
        };

        let message_id = self.next_message_id();
        match self.retries.record_failure(
            &message_id,
            &profile,
            &err.to_string(),
            category_for(&err),
        ) {
            Ok(attempt) => {
                self.queued
                    .lock()
                    .expect("forwarder lock poisoned")
                    .insert(message_id.clone(), sm.clone());
                info!(
                    message_id = %message_id,
                    route = %route_id,
                    attempt = attempt.attempt_count,
                    error = %err,
                    "submission queued for retry"
                );
                Ok(message_id)
            }
            Err(retry_err) => {
                warn!(error = %retry_err, "could not queue retry");
                Err(err.into())
            }
        }
    }

    fn take_queued(&self, message_id: &str) -> Option<SmFields> {
        self.queued
            .lock()
            .expect("forwarder lock poisoned")
            .get(message_id)
            .cloned()
    }

    fn drop_queued(&self, message_id: &str) {
        self.queued
            .lock()
            .expect("forwarder lock poisoned")
            .remove(message_id);
    }
}

fn category_for(err: &RouteError) -> &'static str {
    match err {
        RouteError::RequestTimeout
        | RouteError::ConnectTimeout
        | RouteError::ConnectionClosed
        | RouteError::Io(_) => "network",
        RouteError::Rejected { .. } => "upstream",
        _ => "routing",
    }
}

/// Scheduler callback: re-drive a queued submission through route
/// selection.
pub struct ForwarderRetryCallback {
    forwarder: Arc<Forwarder>,
}

impl ForwarderRetryCallback {
    pub fn new(forwarder: Arc<Forwarder>) -> Arc<Self> {
        Arc::new(Self { forwarder })
    }
}

#[async_trait]
impl RetryCallback for ForwarderRetryCallback {
    async fn retry(&self, attempt: &RetryAttempt) -> Result<(), RetryError> {
        let sm = match self.forwarder.take_queued(&attempt.message_id) {
            Some(sm) => sm,
            None => {
                debug!(message_id = %attempt.message_id, "no queued payload, dropping retry");
                return Ok(());
            }
        };

        let route_id = self
            .forwarder
            .selector
            .select_route(&self.forwarder.config.criteria)
            .map_err(|e| RetryError::CallbackFailed(e.to_string()))?
            .id;

        match self.forwarder.send_via_route(&route_id, &sm).await {
            Ok(upstream_id) => {
                info!(
                    message_id = %attempt.message_id,
                    upstream_id = %upstream_id,
                    route = %route_id,
                    attempt = attempt.attempt_count,
                    "retry delivered"
                );
                self.forwarder.drop_queued(&attempt.message_id);
                Ok(())
            }
            Err(err) => Err(RetryError::CallbackFailed(err.to_string())),
        }
    }

    async fn on_exhausted(&self, attempt: &RetryAttempt) {
        warn!(
            message_id = %attempt.message_id,
            attempts = attempt.attempt_count,
            last_error = %attempt.last_error,
            "retries exhausted, dropping queued payload"
        );
        self.forwarder.drop_queued(&attempt.message_id);
    }
}

/// Full gateway assembly: wires the registries, background tasks and the
/// listener from one [`Config`].
pub struct Gateway {
    config: crate::config::Config,
    shutdown: crate::shutdown::Shutdown,
    auth: Arc<crate::auth::ClientManager>,
    routes: Arc<RouteManager>,
    connections: Arc<ConnectionManager>,
    retries: Arc<RetryManager>,
    forwarder: Arc<Forwarder>,
    server: Arc<crate::server::Server>,
}

impl Gateway {
    pub fn new(config: crate::config::Config) -> anyhow::Result<Self> {
        use crate::auth::{Client, ClientGroup, ClientManager};
        use crate::route::connection::ConnectionConfig;
        use crate::route::Route;

        let shutdown = crate::shutdown::Shutdown::new();

        let auth = Arc::new(ClientManager::new());
        for group_config in &config.groups {
            let mut group = ClientGroup::new(
                group_config.id.clone(),
                group_config
                    .name
                    .clone()
                    .unwrap_or_else(|| group_config.id.clone()),
                group_config.max_binds,
            );
            group.rate_limit = group_config.rate_limit;
            group.tls_required = group_config.tls_required;
            group.allowed_networks = group_config.allowed_networks.clone();
            auth.add_group(group)
                .map_err(|e| anyhow::anyhow!("invalid group config: {e}"))?;
        }
        for client_config in &config.clients {
            auth.add_client(Client::new(
                client_config.system_id.clone(),
                client_config.password.clone(),
                client_config.group.clone(),
            ))
            .map_err(|e| anyhow::anyhow!("invalid client config: {e}"))?;
        }

        // Standalone mode: no client list, one account from the server
        // credentials.
        if config.clients.is_empty() {
            if let Some(password) = &config.server.password {
                auth.add_group(ClientGroup::new(
                    "default",
                    "Default",
                    config.server.max_connections as u32,
                ))
                .map_err(|e| anyhow::anyhow!("invalid default group: {e}"))?;
                auth.add_client(Client::new(
                    config.server.system_id.clone(),
                    password.clone(),
                    "default",
                ))
                .map_err(|e| anyhow::anyhow!("invalid default client: {e}"))?;
            }
        }

        let routes = Arc::new(RouteManager::new());
        for route_config in &config.routes {
            let mut route = Route::new(
                route_config.id.clone(),
                route_config.host.clone(),
                route_config.port,
            );
            route.name = route_config
                .name
                .clone()
                .unwrap_or_else(|| route_config.id.clone());
            route.system_id = route_config.system_id.clone();
            route.password = route_config.password.clone();
            route.bind_type = route_config.bind_type;
            route.priority = route_config.priority;
            route.weight = route_config.weight;
            route.max_connections = route_config.max_connections;
            route.cost_per_message = route_config.cost_per_message;
            route.enabled = route_config.enabled;
            routes
                .add_route(route)
                .map_err(|e| anyhow::anyhow!("invalid route config: {e}"))?;
        }

        let retries = Arc::new(RetryManager::new());
        for profile_config in &config.retry_profiles {
            retries.add_profile(crate::retry::RetryProfile {
                id: profile_config.id.clone(),
                name: profile_config
                    .name
                    .clone()
                    .unwrap_or_else(|| profile_config.id.clone()),
                max_attempts: profile_config.max_attempts,
                initial_delay: profile_config.initial_delay,
                max_delay: profile_config.max_delay,
                backoff_multiplier: profile_config.backoff_multiplier,
                jitter: profile_config.jitter,
                expiry: profile_config.expiry,
                error_categories: profile_config.error_categories.clone(),
            });
        }

        let connections = ConnectionManager::new(
            routes.clone(),
            ConnectionConfig {
                max_retries: config.upstream.max_retries,
                retry_backoff: config.upstream.retry_backoff,
                connect_timeout: config.upstream.connect_timeout,
                bind_timeout: config.server.bind_timeout,
                check_interval: config.upstream.check_interval,
            },
        );

        let forwarder = Forwarder::new(
            routes.clone(),
            connections.clone(),
            retries.clone(),
            ForwarderConfig {
                retry_profile: config.upstream.retry_profile.clone(),
                request_timeout: config.upstream.request_timeout,
                criteria: RouteCriteria::default(),
            },
        );

        let server = crate::server::Server::new(
            config.server.clone(),
            auth.clone(),
            forwarder.clone(),
            shutdown.clone(),
        )?;

        Ok(Self {
            config,
            shutdown,
            auth,
            routes,
            connections,
            retries,
            forwarder,
            server,
        })
    }

    pub fn shutdown_handle(&self) -> crate::shutdown::Shutdown {
        self.shutdown.clone()
    }

    pub fn routes(&self) -> Arc<RouteManager> {
        self.routes.clone()
    }

    pub fn auth(&self) -> Arc<crate::auth::ClientManager> {
        self.auth.clone()
    }

    pub fn registry(&self) -> Arc<crate::server::SessionRegistry> {
        self.server.registry()
    }

    /// Spawn the background tasks and the listener. Returns the bound
    /// listener address.
    pub async fn start(&self) -> anyhow::Result<std::net::SocketAddr> {
        let health = Arc::new(crate::route::health::HealthChecker::new(
            self.routes.clone(),
            self.config.health.interval,
            self.config.health.timeout,
        ));
        tokio::spawn(health.run(self.shutdown.subscribe()));

        tokio::spawn(self.connections.clone().run(self.shutdown.subscribe()));

        let scheduler = crate::retry::RetryScheduler::new(
            self.retries.clone(),
            self.config.scheduler.interval,
            self.config.scheduler.workers,
            ForwarderRetryCallback::new(self.forwarder.clone()),
        );
        tokio::spawn(scheduler.run(self.shutdown.subscribe()));

        self.server.start().await
    }

    /// Start, then run until SIGINT.
    pub async fn run(self) -> anyhow::Result<()> {
        let address = self.start().await?;
        info!(%address, "gateway running");

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| anyhow::anyhow!("failed to listen for shutdown signal: {e}"))?;
        info!("shutdown signal received");

        self.shutdown.trigger();
        // Give tasks a moment to flush responses and close sockets.
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::connection::ConnectionConfig;
    use crate::route::Route;

    fn forwarder_with_routes(routes: Vec<Route>) -> Arc<Forwarder> {
        let manager = Arc::new(RouteManager::new());
        for route in routes {
            manager.add_route(route).unwrap();
        }
        let connections = ConnectionManager::new(manager.clone(), ConnectionConfig::default());
        let retries = Arc::new(RetryManager::new());
        Forwarder::new(manager, connections, retries, ForwarderConfig::default())
    }

    #[tokio::test]
    async fn no_routes_configured_terminates_locally_with_generated_ids() {
        let forwarder = forwarder_with_routes(vec![]);
        let first = forwarder.submit(&SmFields::default()).await.unwrap();
        let second = forwarder.submit(&SmFields::default()).await.unwrap();
        assert_eq!(first, "MSG-1");
        assert_eq!(second, "MSG-2");
    }

    #[tokio::test]
    async fn routes_without_connections_surface_queue_full() {
        let forwarder = forwarder_with_routes(vec![Route::new("r1", "10.0.0.1", 2775)]);
        let err = forwarder.submit(&SmFields::default()).await.unwrap_err();
        assert_eq!(err.status(), Status::MessageQueueFull);
    }

    #[tokio::test]
    async fn transient_failure_with_a_profile_queues_a_retry() {
        let manager = Arc::new(RouteManager::new());
        manager.add_route(Route::new("r1", "10.0.0.1", 2775)).unwrap();
        let connections = ConnectionManager::new(manager.clone(), ConnectionConfig::default());
        let retries = Arc::new(RetryManager::new());
        retries.add_profile(crate::retry::RetryProfile::new(
            "default",
            3,
            Duration::from_millis(100),
        ));

        let forwarder = Forwarder::new(
            manager,
            connections,
            retries.clone(),
            ForwarderConfig {
                retry_profile: Some("default".into()),
                ..Default::default()
            },
        );

        // Route exists but has no pool: NoAvailableConnections is
        // transient, so the message is accepted and queued.
        let message_id = forwarder.submit(&SmFields::default()).await.unwrap();
        assert!(retries.get_attempt(&message_id).is_some());
        assert!(forwarder.take_queued(&message_id).is_some());
    }
}
