//! Listener front end: accept loop, TLS termination, accept-path policy
//! and the session registry.

pub mod security;
pub mod tls;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn, Instrument, Level};

use crate::auth::ClientManager;
use crate::config::ServerConfig;
use crate::gateway::Forwarder;
use crate::pdu::{SmFields, SmppCodec};
use crate::session::{SessionConn, SessionId, SmppSession};
use crate::shutdown::Shutdown;

pub use security::{IpFilter, RateLimiter};

/// Live sessions, indexed by id. Sessions hold no back-reference to the
/// server; cleanup goes through here.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionConn>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn: Arc<SessionConn>) {
        self.sessions
            .write()
            .expect("registry lock poisoned")
            .insert(conn.id(), conn);
    }

    pub fn deregister(&self, id: SessionId) {
        self.sessions
            .write()
            .expect("registry lock poisoned")
            .remove(&id);
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<SessionConn>> {
        self.sessions
            .read()
            .expect("registry lock poisoned")
            .get(&id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue a mobile-terminated message onto a receiving session bound
    /// as `system_id`. Returns false when no session can take it.
    pub fn deliver_to(&self, system_id: &str, message: SmFields) -> bool {
        let candidates: Vec<Arc<SessionConn>> = {
            let sessions = self.sessions.read().expect("registry lock poisoned");
            sessions
                .values()
                .filter(|s| s.system_id().as_deref() == Some(system_id))
                .cloned()
                .collect()
        };

        let mut message = message;
        for session in candidates {
            match session.deliver(message) {
                Ok(()) => return true,
                Err(returned) => message = returned,
            }
        }
        false
    }

    /// Ask every session to wind down.
    pub fn close_all(&self) {
        let sessions = self.sessions.read().expect("registry lock poisoned");
        for session in sessions.values() {
            session.initiate_close();
        }
    }
}

/// The SMPP listener.
pub struct Server {
    config: ServerConfig,
    auth: Arc<ClientManager>,
    forwarder: Arc<Forwarder>,
    registry: Arc<SessionRegistry>,
    ip_filter: Arc<IpFilter>,
    rate_limiter: Arc<RateLimiter>,
    tls_acceptor: Option<TlsAcceptor>,
    connection_limit: Arc<Semaphore>,
    next_session_id: AtomicU64,
    shutdown: Shutdown,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        auth: Arc<ClientManager>,
        forwarder: Arc<Forwarder>,
        shutdown: Shutdown,
    ) -> Result<Arc<Self>> {
        let tls_acceptor = match &config.tls {
            Some(tls_config) => Some(
                tls::build_tls_acceptor(tls_config).context("failed to load TLS configuration")?,
            ),
            None => None,
        };

        let ip_filter = Arc::new(IpFilter::new(config.default_allow));
        for entry in &config.allow {
            ip_filter
                .add_to_whitelist(entry)
                .with_context(|| format!("invalid allow entry: {entry}"))?;
        }
        for entry in &config.deny {
            ip_filter
                .add_to_blacklist(entry)
                .with_context(|| format!("invalid deny entry: {entry}"))?;
        }

        Ok(Arc::new(Self {
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit, config.rate_burst)),
            ip_filter,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            registry: Arc::new(SessionRegistry::new()),
            tls_acceptor,
            next_session_id: AtomicU64::new(1),
            config,
            auth,
            forwarder,
            shutdown,
        }))
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Bind the listener and spawn the accept loop. Returns the bound
    /// address (useful with port 0).
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.address)
            .await
            .with_context(|| format!("failed to bind listener on {}", self.config.address))?;
        let address = listener.local_addr()?;

        info!(
            %address,
            tls = self.tls_acceptor.is_some(),
            max_connections = self.config.max_connections,
            "listener started"
        );

        let server = self.clone();
        tokio::spawn(async move {
            server.accept_loop(listener).await;
        });

        let server = self.clone();
        tokio::spawn(async move {
            server.reaper_loop().await;
        });

        Ok(address)
    }

    /// Close sessions past their idle or lifetime budget. Keepalive
    /// traffic refreshes the activity stamp, so only truly dead peers
    /// (and sessions over `max_lifetime`) are reaped.
    async fn reaper_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    let stale: Vec<Arc<crate::session::SessionConn>> = {
                        let sessions = self.registry.sessions.read().expect("registry lock poisoned");
                        sessions
                            .values()
                            .filter(|s| {
                                s.idle_time() > self.config.idle_timeout * 2
                                    || s.uptime() > self.config.max_lifetime
                            })
                            .cloned()
                            .collect()
                    };
                    for session in stale {
                        warn!(
                            session = %session.id(),
                            idle_secs = session.idle_time().as_secs(),
                            uptime_secs = session.uptime().as_secs(),
                            "reaping stale session"
                        );
                        session.initiate_close();
                    }
                }
            }
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("listener shutting down");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        self.clone().handle_accept(stream, peer_addr).await;
                    }
                    Err(err) => {
                        error!(error = %err, "accept error");
                    }
                },
            }
        }

        self.registry.close_all();
    }

    async fn handle_accept(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let peer_ip = peer_addr.ip();

        if !self.ip_filter.is_allowed(peer_ip) {
            warn!(peer = %peer_addr, "connection denied by IP filter");
            return;
        }

        if !self.rate_limiter.allow(peer_ip) {
            // Silent close per the accept-path contract.
            debug!(peer = %peer_addr, "connection rate limited");
            return;
        }

        let permit = match self.connection_limit.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(peer = %peer_addr, "connection limit reached, rejecting");
                return;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            error!(peer = %peer_addr, error = %err, "socket configuration failed");
            return;
        }

        let session_id = SessionId(self.next_session_id.fetch_add(1, Ordering::SeqCst));
        let span = tracing::span!(Level::INFO, "session", id = %session_id, peer = %peer_addr);

        let (conn, deliver_rx) = SessionConn::new(session_id, peer_addr, Some(permit));
        let conn = Arc::new(conn);
        self.registry.register(conn.clone());

        debug!(parent: &span, "connection accepted");

        let server = self.clone();
        tokio::spawn(
            async move {
                let mut session = SmppSession::new(
                    conn.clone(),
                    server.auth.clone(),
                    server.forwarder.clone(),
                    server.config.system_id.clone(),
                    server.config.read_timeout,
                    server.config.write_timeout,
                    server.config.bind_timeout,
                    deliver_rx,
                );

                let result = match &server.tls_acceptor {
                    Some(acceptor) => {
                        match tokio::time::timeout(
                            server.config.bind_timeout,
                            acceptor.accept(stream),
                        )
                        .await
                        {
                            Ok(Ok(tls_stream)) => {
                                debug!("TLS handshake completed");
                                conn.set_secure(true);
                                let mut framed = Framed::new(tls_stream, SmppCodec::new());
                                session.run(&mut framed).await
                            }
                            Ok(Err(err)) => {
                                warn!(error = %err, "TLS handshake failed");
                                Ok(())
                            }
                            Err(_) => {
                                warn!("TLS handshake timeout");
                                Ok(())
                            }
                        }
                    }
                    None => {
                        let mut framed = Framed::new(stream, SmppCodec::new());
                        session.run(&mut framed).await
                    }
                };

                if let Err(err) = result {
                    debug!(error = %err, "session ended with error");
                }

                server.registry.deregister(session_id);
                debug!("connection closed");
            }
            .instrument(span),
        );
    }
}
