//! Per-connection session record.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tracing::debug;

use crate::pdu::SmFields;

use super::SequenceCounter;

/// Unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SMPP session state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// TCP established, no bind yet
    Open,
    /// Bound as transmitter
    BoundTx,
    /// Bound as receiver
    BoundRx,
    /// Bound as transceiver
    BoundTrx,
    /// Session over
    Closed,
}

impl SessionState {
    /// May the client submit messages in this state.
    pub fn can_send(&self) -> bool {
        matches!(self, SessionState::BoundTx | SessionState::BoundTrx)
    }

    /// May the server deliver messages to the client in this state.
    pub fn can_receive(&self) -> bool {
        matches!(self, SessionState::BoundRx | SessionState::BoundTrx)
    }

    pub fn is_bound(&self) -> bool {
        self.can_send() || self.can_receive()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Open => write!(f, "OPEN"),
            SessionState::BoundTx => write!(f, "BOUND_TX"),
            SessionState::BoundRx => write!(f, "BOUND_RX"),
            SessionState::BoundTrx => write!(f, "BOUND_TRX"),
            SessionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Shared state for one accepted connection.
///
/// The session task owns the socket; everything here is the bookkeeping
/// other components may observe. No lock is held across I/O.
pub struct SessionConn {
    id: SessionId,
    peer_addr: SocketAddr,
    state: RwLock<SessionState>,
    system_id: RwLock<Option<String>>,
    sequence: SequenceCounter,
    last_activity: RwLock<Instant>,
    busy: AtomicBool,
    /// Whether the transport is TLS.
    secure: AtomicBool,
    closing: AtomicBool,
    created_at: Instant,
    /// Queue of server-originated deliveries consumed by the session loop.
    deliver_tx: mpsc::Sender<SmFields>,
    /// Held for the lifetime of the connection; caps accepted sessions.
    _permit: Option<OwnedSemaphorePermit>,
}

impl SessionConn {
    pub fn new(
        id: SessionId,
        peer_addr: SocketAddr,
        permit: Option<OwnedSemaphorePermit>,
    ) -> (Self, mpsc::Receiver<SmFields>) {
        let (deliver_tx, deliver_rx) = mpsc::channel(32);
        let conn = Self {
            id,
            peer_addr,
            state: RwLock::new(SessionState::Open),
            system_id: RwLock::new(None),
            sequence: SequenceCounter::new(),
            last_activity: RwLock::new(Instant::now()),
            busy: AtomicBool::new(false),
            secure: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            created_at: Instant::now(),
            deliver_tx,
            _permit: permit,
        };
        (conn, deliver_rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().expect("session state lock poisoned")
    }

    pub fn set_state(&self, state: SessionState) {
        let mut guard = self.state.write().expect("session state lock poisoned");
        debug!(session = %self.id, from = %*guard, to = %state, "state transition");
        *guard = state;
    }

    pub fn system_id(&self) -> Option<String> {
        self.system_id
            .read()
            .expect("session lock poisoned")
            .clone()
    }

    pub fn set_system_id(&self, system_id: String) {
        *self.system_id.write().expect("session lock poisoned") = Some(system_id);
    }

    /// Allocate the next outbound sequence number.
    pub fn next_sequence(&self) -> u32 {
        self.sequence.next()
    }

    pub fn touch(&self) {
        *self.last_activity.write().expect("session lock poisoned") = Instant::now();
    }

    pub fn idle_time(&self) -> Duration {
        self.last_activity
            .read()
            .expect("session lock poisoned")
            .elapsed()
    }

    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_bound(&self) -> bool {
        self.state().is_bound()
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Mark the transport as TLS; set by the listener after the handshake.
    pub fn set_secure(&self, secure: bool) {
        self.secure.store(secure, Ordering::SeqCst);
    }

    pub fn is_secure(&self) -> bool {
        self.secure.load(Ordering::SeqCst)
    }

    /// Ask the session loop to wind down.
    pub fn initiate_close(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Queue a mobile-terminated message for this session. Fails when the
    /// session is not in a receiving state or its queue is gone.
    pub fn deliver(&self, message: SmFields) -> Result<(), SmFields> {
        if !self.state().can_receive() {
            return Err(message);
        }
        self.deliver_tx.try_send(message).map_err(|e| e.into_inner())
    }
}

impl fmt::Debug for SessionConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConn")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> SessionConn {
        let (conn, rx) = SessionConn::new(
            SessionId(1),
            "127.0.0.1:5000".parse().unwrap(),
            None,
        );
        // Keep the receiver open for the lifetime of the test; dropping it
        // here would close the channel and make `deliver` fail regardless
        // of session state.
        std::mem::forget(rx);
        conn
    }

    #[test]
    fn new_sessions_open_unbound() {
        let conn = conn();
        assert_eq!(conn.state(), SessionState::Open);
        assert!(!conn.is_bound());
        assert!(conn.system_id().is_none());
    }

    #[test]
    fn state_predicates() {
        assert!(SessionState::BoundTx.can_send());
        assert!(!SessionState::BoundTx.can_receive());
        assert!(SessionState::BoundRx.can_receive());
        assert!(!SessionState::BoundRx.can_send());
        assert!(SessionState::BoundTrx.can_send());
        assert!(SessionState::BoundTrx.can_receive());
        assert!(!SessionState::Open.is_bound());
        assert!(!SessionState::Closed.is_bound());
    }

    #[test]
    fn deliver_requires_a_receiving_state() {
        let conn = conn();
        assert!(conn.deliver(SmFields::default()).is_err());

        conn.set_state(SessionState::BoundRx);
        assert!(conn.deliver(SmFields::default()).is_ok());

        conn.set_state(SessionState::BoundTx);
        assert!(conn.deliver(SmFields::default()).is_err());
    }
}
