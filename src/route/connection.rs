//! Persistent upstream binds.
//!
//! One [`Connection`] is a live bind to a route. The
//! [`ConnectionManager`] tops pools up to each route's `max_connections`
//! on a maintenance tick, dials with a timeout, retries with a linear
//! backoff and tears down pools whose routes fall out of the active set.
//! Checkout is least-recently-used over the bound connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::pdu::{
    BindFields, Pdu, PduEvent, PduFrame, SmFields, SmppCodec, SmRespFields, IF_VERSION_34,
};
use crate::session::SequenceCounter;
use crate::shutdown::ShutdownSignal;

use super::manager::RouteManager;
use super::{BindType, Route, RouteError};

/// Upstream connection lifecycle. The bound states mirror session states;
/// the transport-only states cover dialing and failure parking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Open,
    BoundTx,
    BoundRx,
    BoundTrx,
    Error,
    Closed,
}

impl ConnState {
    pub fn is_bound(&self) -> bool {
        matches!(self, ConnState::BoundTx | ConnState::BoundRx | ConnState::BoundTrx)
    }
}

impl BindType {
    fn bound_state(self) -> ConnState {
        match self {
            BindType::Transmitter => ConnState::BoundTx,
            BindType::Receiver => ConnState::BoundRx,
            BindType::Transceiver => ConnState::BoundTrx,
        }
    }

    fn bind_pdu(self, fields: BindFields) -> Pdu {
        match self {
            BindType::Transmitter => Pdu::BindTransmitter(fields),
            BindType::Receiver => Pdu::BindReceiver(fields),
            BindType::Transceiver => Pdu::BindTransceiver(fields),
        }
    }
}

struct UpstreamRequest {
    pdu: Pdu,
    resp_tx: oneshot::Sender<Result<PduFrame, RouteError>>,
}

/// One live (or recovering) bind to a route.
pub struct Connection {
    id: String,
    route_id: String,
    state: RwLock<ConnState>,
    last_activity: RwLock<Instant>,
    last_error: RwLock<Option<String>>,
    last_error_time: RwLock<Option<Instant>>,
    retry_count: AtomicU32,
    sequence: SequenceCounter,
    /// Request channel into the I/O task; present only while bound.
    request_tx: RwLock<Option<mpsc::Sender<UpstreamRequest>>>,
}

impl Connection {
    pub fn new(id: impl Into<String>, route_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            route_id: route_id.into(),
            state: RwLock::new(ConnState::Disconnected),
            last_activity: RwLock::new(Instant::now()),
            last_error: RwLock::new(None),
            last_error_time: RwLock::new(None),
            retry_count: AtomicU32::new(0),
            sequence: SequenceCounter::new(),
            request_tx: RwLock::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn state(&self) -> ConnState {
        *self.state.read().expect("conn lock poisoned")
    }

    pub fn set_state(&self, state: ConnState) {
        let mut guard = self.state.write().expect("conn lock poisoned");
        trace!(conn = %self.id, from = ?*guard, to = ?state, "connection state");
        *guard = state;
    }

    pub fn touch(&self) {
        *self.last_activity.write().expect("conn lock poisoned") = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.read().expect("conn lock poisoned")
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().expect("conn lock poisoned").clone()
    }

    fn record_error(&self, message: &str) {
        *self.last_error.write().expect("conn lock poisoned") = Some(message.to_string());
        *self.last_error_time.write().expect("conn lock poisoned") = Some(Instant::now());
        self.set_state(ConnState::Error);
    }

    /// Send a request PDU and await its response, correlated by sequence
    /// number inside the I/O task.
    pub async fn request(&self, pdu: Pdu, wait: Duration) -> Result<PduFrame, RouteError> {
        let tx = self
            .request_tx
            .read()
            .expect("conn lock poisoned")
            .clone()
            .ok_or(RouteError::ConnectionClosed)?;

        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send(UpstreamRequest { pdu, resp_tx })
            .await
            .map_err(|_| RouteError::ConnectionClosed)?;

        match timeout(wait, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RouteError::ConnectionClosed),
            Err(_) => Err(RouteError::RequestTimeout),
        }
    }

    /// Submit a short message over this bind.
    pub async fn submit(&self, sm: SmFields, wait: Duration) -> Result<SmRespFields, RouteError> {
        let resp = self.request(Pdu::SubmitSm(Box::new(sm)), wait).await?;
        let status = resp.status();
        match resp.pdu {
            Pdu::SubmitSmResp(fields) => {
                if status.is_ok() {
                    Ok(fields)
                } else {
                    Err(RouteError::Rejected { status })
                }
            }
            other => Err(RouteError::Io(format!(
                "unexpected response to submit_sm: {:?}",
                other.command_id()
            ))),
        }
    }

    /// Tear the connection down; in-flight requests fail with
    /// `ConnectionClosed`.
    pub fn close(&self) {
        self.request_tx.write().expect("conn lock poisoned").take();
        self.set_state(ConnState::Closed);
    }
}

/// Dial-and-bind policy knobs.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub connect_timeout: Duration,
    pub bind_timeout: Duration,
    pub check_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            bind_timeout: Duration::from_secs(5),
            check_interval: Duration::from_secs(30),
        }
    }
}

/// Per-route connection list.
pub struct ConnectionPool {
    route_id: String,
    connections: RwLock<Vec<Arc<Connection>>>,
}

impl ConnectionPool {
    pub fn new(route_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            route_id: route_id.into(),
            connections: RwLock::new(Vec::new()),
        })
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn add(&self, conn: Arc<Connection>) {
        self.connections.write().expect("pool lock poisoned").push(conn);
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read().expect("pool lock poisoned").clone()
    }

    pub fn bound_count(&self) -> usize {
        self.connections
            .read()
            .expect("pool lock poisoned")
            .iter()
            .filter(|c| c.state().is_bound())
            .count()
    }

    /// Connections being dialed or already usable; parked failures don't
    /// count toward the top-up target.
    fn live_count(&self) -> usize {
        self.connections
            .read()
            .expect("pool lock poisoned")
            .iter()
            .filter(|c| {
                matches!(
                    c.state(),
                    ConnState::Connecting | ConnState::Open
                ) || c.state().is_bound()
            })
            .count()
    }

    /// Drop entries that ended in Error or Closed.
    fn prune(&self) {
        self.connections
            .write()
            .expect("pool lock poisoned")
            .retain(|c| !matches!(c.state(), ConnState::Error | ConnState::Closed));
    }

    /// The bound connection with the oldest activity stamp.
    fn least_recently_used(&self) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .expect("pool lock poisoned")
            .iter()
            .filter(|c| c.state().is_bound())
            .min_by_key(|c| c.last_activity())
            .cloned()
    }

    fn close_all(&self) {
        for conn in self.connections.read().expect("pool lock poisoned").iter() {
            conn.close();
        }
    }
}

/// Maintains pools of persistent binds, one per active route.
pub struct ConnectionManager {
    routes: Arc<RouteManager>,
    pools: RwLock<HashMap<String, Arc<ConnectionPool>>>,
    config: ConnectionConfig,
    next_conn_seq: AtomicU64,
}

impl ConnectionManager {
    pub fn new(routes: Arc<RouteManager>, config: ConnectionConfig) -> Arc<Self> {
        Arc::new(Self {
            routes,
            pools: RwLock::new(HashMap::new()),
            config,
            next_conn_seq: AtomicU64::new(1),
        })
    }

    /// Maintenance loop; runs until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        info!(
            interval_secs = self.config.check_interval.as_secs(),
            "connection manager started"
        );
        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("connection manager shutting down");
                    self.close_all();
                    break;
                }

                _ = ticker.tick() => {
                    self.maintain(&shutdown).await;
                }
            }
        }
    }

    /// One maintenance pass: create missing pools, top up missing binds,
    /// drop pools for routes no longer active.
    pub async fn maintain(self: &Arc<Self>, shutdown: &ShutdownSignal) {
        let active = self.routes.get_active_routes();

        for route in &active {
            let pool = self.ensure_pool(&route.id);
            pool.prune();

            let live = pool.live_count();
            if live < route.max_connections {
                let missing = route.max_connections - live;
                debug!(route = %route.id, live, missing, "topping up connection pool");
                for _ in 0..missing {
                    self.spawn_connect(route.clone(), pool.clone(), shutdown.clone());
                }
            }
        }

        // Tear down pools for routes that are gone or deactivated.
        let stale: Vec<String> = {
            let pools = self.pools.read().expect("pools lock poisoned");
            pools
                .keys()
                .filter(|id| !active.iter().any(|r| r.id.as_str() == id.as_str()))
                .cloned()
                .collect()
        };
        for route_id in stale {
            if let Some(pool) = self
                .pools
                .write()
                .expect("pools lock poisoned")
                .remove(&route_id)
            {
                info!(route = %route_id, "dropping pool for inactive route");
                pool.close_all();
            }
        }
    }

    fn ensure_pool(&self, route_id: &str) -> Arc<ConnectionPool> {
        let mut pools = self.pools.write().expect("pools lock poisoned");
        pools
            .entry(route_id.to_string())
            .or_insert_with(|| ConnectionPool::new(route_id))
            .clone()
    }

    /// Expose a pool for inspection; mainly used by the health surface.
    pub fn pool(&self, route_id: &str) -> Option<Arc<ConnectionPool>> {
        self.pools
            .read()
            .expect("pools lock poisoned")
            .get(route_id)
            .cloned()
    }

    /// LRU checkout of a bound connection for the route.
    ///
    /// A route known to the registry but without a pool yet reports
    /// `NoAvailableConnections` (the maintenance loop has not caught up);
    /// an unknown route reports `RouteNotFound`.
    pub fn get_connection(&self, route_id: &str) -> Result<Arc<Connection>, RouteError> {
        let pool = match self.pool(route_id) {
            Some(pool) => pool,
            None if self.routes.get_route(route_id).is_ok() => {
                return Err(RouteError::NoAvailableConnections(route_id.to_string()));
            }
            None => return Err(RouteError::RouteNotFound(route_id.to_string())),
        };

        let conn = pool
            .least_recently_used()
            .ok_or_else(|| RouteError::NoAvailableConnections(route_id.to_string()))?;
        conn.touch();
        Ok(conn)
    }

    fn close_all(&self) {
        let pools: Vec<Arc<ConnectionPool>> = self
            .pools
            .write()
            .expect("pools lock poisoned")
            .drain()
            .map(|(_, pool)| pool)
            .collect();
        for pool in pools {
            pool.close_all();
        }
    }

    fn spawn_connect(
        self: &Arc<Self>,
        route: Route,
        pool: Arc<ConnectionPool>,
        shutdown: ShutdownSignal,
    ) {
        let seq = self.next_conn_seq.fetch_add(1, Ordering::SeqCst);
        let conn = Connection::new(format!("{}-{}", route.id, seq), route.id.clone());
        pool.add(conn.clone());

        let config = self.config.clone();
        tokio::spawn(async move {
            connect_worker(conn, route, config, shutdown).await;
        });
    }
}

/// Dial, bind and hand the socket to the I/O task; retry with a linear
/// backoff (`retry_backoff × retry_count`) up to `max_retries`, then park
/// the connection in Error.
async fn connect_worker(
    conn: Arc<Connection>,
    route: Route,
    config: ConnectionConfig,
    mut shutdown: ShutdownSignal,
) {
    loop {
        if shutdown.is_triggered() {
            conn.close();
            return;
        }

        match establish(&conn, &route, &config).await {
            Ok(()) => return,
            Err(err) => {
                let retries = conn.retry_count.fetch_add(1, Ordering::SeqCst) + 1;
                conn.record_error(&err.to_string());
                warn!(
                    conn = %conn.id(),
                    route = %route.id,
                    attempt = retries,
                    error = %err,
                    "upstream connect failed"
                );

                if retries >= config.max_retries {
                    error!(
                        conn = %conn.id(),
                        route = %route.id,
                        "giving up after {retries} attempts"
                    );
                    return;
                }

                let backoff = config.retry_backoff * retries;
                tokio::select! {
                    _ = shutdown.recv() => {
                        conn.close();
                        return;
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

/// One dial + bind attempt. On success the connection is bound and its
/// I/O task is running.
async fn establish(
    conn: &Arc<Connection>,
    route: &Route,
    config: &ConnectionConfig,
) -> Result<(), RouteError> {
    conn.set_state(ConnState::Connecting);

    let address = route.address();
    let stream = match timeout(config.connect_timeout, TcpStream::connect(&address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => return Err(RouteError::Io(err.to_string())),
        Err(_) => return Err(RouteError::ConnectTimeout),
    };
    stream
        .set_nodelay(true)
        .map_err(|e| RouteError::Io(e.to_string()))?;
    conn.set_state(ConnState::Open);

    let mut framed = Framed::new(stream, SmppCodec::new());

    // Bind handshake before the I/O task takes over.
    let bind = BindFields {
        system_id: route.system_id.clone(),
        password: route.password.clone(),
        system_type: String::new(),
        interface_version: IF_VERSION_34,
        addr_ton: 0,
        addr_npi: 0,
        address_range: String::new(),
        tlvs: Default::default(),
    };
    let sequence = conn.sequence.next();
    let request = PduFrame::request(sequence, route.bind_type.bind_pdu(bind));
    framed
        .send(request)
        .await
        .map_err(|e| RouteError::Io(e.to_string()))?;

    let resp = match timeout(config.bind_timeout, framed.next()).await {
        Ok(Some(Ok(PduEvent::Frame(frame)))) => frame,
        Ok(Some(Ok(PduEvent::Malformed(err)))) => {
            return Err(RouteError::Io(err.to_string()))
        }
        Ok(Some(Err(err))) => return Err(RouteError::Io(err.to_string())),
        Ok(None) => return Err(RouteError::ConnectionClosed),
        Err(_) => return Err(RouteError::RequestTimeout),
    };

    if resp.sequence() != sequence || !resp.is_response() {
        return Err(RouteError::Io(format!(
            "unexpected bind reply {} seq {}",
            resp.command(),
            resp.sequence()
        )));
    }
    if !resp.status().is_ok() {
        return Err(RouteError::Rejected {
            status: resp.status(),
        });
    }

    let (request_tx, request_rx) = mpsc::channel(64);
    *conn.request_tx.write().expect("conn lock poisoned") = Some(request_tx);
    conn.set_state(route.bind_type.bound_state());
    conn.touch();

    info!(
        conn = %conn.id(),
        route = %route.id,
        address = %address,
        bind_type = %route.bind_type,
        "upstream bound"
    );

    tokio::spawn(io_task(conn.clone(), framed, request_rx));
    Ok(())
}

/// Socket owner: multiplexes requests by sequence number and answers
/// upstream keepalives.
async fn io_task(
    conn: Arc<Connection>,
    mut framed: Framed<TcpStream, SmppCodec>,
    mut request_rx: mpsc::Receiver<UpstreamRequest>,
) {
    let mut pending: HashMap<u32, oneshot::Sender<Result<PduFrame, RouteError>>> = HashMap::new();

    loop {
        tokio::select! {
            request = request_rx.recv() => match request {
                Some(UpstreamRequest { pdu, resp_tx }) => {
                    let sequence = conn.sequence.next();
                    let frame = PduFrame::request(sequence, pdu);
                    match framed.send(frame).await {
                        Ok(()) => {
                            pending.insert(sequence, resp_tx);
                            conn.touch();
                        }
                        Err(err) => {
                            let _ = resp_tx.send(Err(RouteError::Io(err.to_string())));
                            conn.record_error(&err.to_string());
                            break;
                        }
                    }
                }
                None => {
                    debug!(conn = %conn.id(), "request channel closed");
                    break;
                }
            },

            frame = framed.next() => match frame {
                Some(Ok(PduEvent::Malformed(err))) => {
                    warn!(conn = %conn.id(), error = %err, "malformed upstream frame, skipping");
                }
                Some(Ok(PduEvent::Frame(frame))) => {
                    conn.touch();
                    if frame.is_response() {
                        if let Some(resp_tx) = pending.remove(&frame.sequence()) {
                            let _ = resp_tx.send(Ok(frame));
                        } else {
                            warn!(
                                conn = %conn.id(),
                                sequence = frame.sequence(),
                                "unmatched upstream response"
                            );
                        }
                    } else if frame.command() == crate::pdu::CommandId::EnquireLink {
                        let reply = PduFrame::response(
                            frame.sequence(),
                            crate::pdu::Status::Ok,
                            Pdu::EnquireLinkResp,
                        );
                        if framed.send(reply).await.is_err() {
                            break;
                        }
                    } else {
                        trace!(
                            conn = %conn.id(),
                            command = %frame.command(),
                            "ignoring unsolicited upstream pdu"
                        );
                    }
                }
                Some(Err(err)) => {
                    warn!(conn = %conn.id(), error = %err, "upstream framing error");
                    conn.record_error(&err.to_string());
                    break;
                }
                None => {
                    debug!(conn = %conn.id(), "upstream closed connection");
                    break;
                }
            },
        }
    }

    conn.close();
    for (_, resp_tx) in pending.drain() {
        let _ = resp_tx.send(Err(RouteError::ConnectionClosed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(id: &str, route: &str, activity_offset: Duration) -> Arc<Connection> {
        let conn = Connection::new(id, route);
        conn.set_state(ConnState::BoundTrx);
        *conn.last_activity.write().unwrap() = Instant::now() - activity_offset;
        conn
    }

    #[test]
    fn lru_checkout_returns_the_stalest_bound_connection() {
        let routes = Arc::new(RouteManager::new());
        let manager = ConnectionManager::new(routes, ConnectionConfig::default());

        let pool = manager.ensure_pool("r1");
        pool.add(bound("r1-1", "r1", Duration::from_secs(5)));
        pool.add(bound("r1-2", "r1", Duration::from_secs(60)));
        pool.add(bound("r1-3", "r1", Duration::from_secs(30)));

        let picked = manager.get_connection("r1").unwrap();
        assert_eq!(picked.id(), "r1-2");

        // Checkout stamps activity, so the next pick rotates.
        let picked = manager.get_connection("r1").unwrap();
        assert_eq!(picked.id(), "r1-3");
    }

    #[test]
    fn checkout_skips_unbound_connections() {
        let routes = Arc::new(RouteManager::new());
        let manager = ConnectionManager::new(routes, ConnectionConfig::default());

        let pool = manager.ensure_pool("r1");
        let dialing = Connection::new("r1-1", "r1");
        dialing.set_state(ConnState::Connecting);
        pool.add(dialing);
        let broken = Connection::new("r1-2", "r1");
        broken.set_state(ConnState::Error);
        pool.add(broken);

        assert!(matches!(
            manager.get_connection("r1"),
            Err(RouteError::NoAvailableConnections(_))
        ));
    }

    #[test]
    fn unknown_route_is_reported() {
        let routes = Arc::new(RouteManager::new());
        let manager = ConnectionManager::new(routes, ConnectionConfig::default());
        assert!(matches!(
            manager.get_connection("nope"),
            Err(RouteError::RouteNotFound(_))
        ));
    }

    #[test]
    fn prune_discards_failed_and_closed_entries() {
        let pool = ConnectionPool::new("r1");
        pool.add(bound("r1-1", "r1", Duration::ZERO));
        let failed = Connection::new("r1-2", "r1");
        failed.set_state(ConnState::Error);
        pool.add(failed);
        let closed = Connection::new("r1-3", "r1");
        closed.set_state(ConnState::Closed);
        pool.add(closed);

        pool.prune();
        let remaining = pool.connections();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id(), "r1-1");
    }

    #[test]
    fn bound_count_never_exceeds_live_entries() {
        let pool = ConnectionPool::new("r1");
        for i in 0..3 {
            pool.add(bound(&format!("r1-{i}"), "r1", Duration::ZERO));
        }
        assert_eq!(pool.bound_count(), 3);
        assert_eq!(pool.live_count(), 3);
    }

    #[tokio::test]
    async fn request_on_an_unbound_connection_fails_fast() {
        let conn = Connection::new("r1-1", "r1");
        let err = conn
            .request(Pdu::EnquireLink, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, RouteError::ConnectionClosed);
    }

    #[tokio::test]
    async fn maintain_tops_up_and_tears_down_pools() {
        let routes = Arc::new(RouteManager::new());
        let mut route = Route::new("r1", "127.0.0.1", 1);
        route.max_connections = 2;
        routes.add_route(route).unwrap();

        let config = ConnectionConfig {
            max_retries: 1,
            retry_backoff: Duration::from_millis(1),
            connect_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let manager = ConnectionManager::new(routes.clone(), config);
        let shutdown = crate::shutdown::Shutdown::new();

        manager.maintain(&shutdown.subscribe()).await;
        let pool = manager.pool("r1").expect("pool created for active route");
        assert_eq!(pool.connections().len(), 2);

        // Deactivate the route; the next pass drops its pool.
        routes
            .update_route_status("r1", super::super::HealthStatus::Down, Some("down"))
            .unwrap();
        manager.maintain(&shutdown.subscribe()).await;
        assert!(manager.pool("r1").is_none());
    }
}
