//! ESME authentication: clients grouped under shared bind policies.
//!
//! A [`ClientGroup`] is the policy bucket (allowed networks, concurrent
//! bind ceiling, rate limit, TLS requirement); a [`Client`] is one
//! system_id with a password and a live bind count. Validation never
//! mutates state; the caller registers the bind after a successful
//! handshake.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use thiserror::Error;
use tracing::{debug, warn};

use crate::pdu::Status;

/// Authentication failures, ordered by check: lookup, group resolution,
/// password, source IP, bind ceiling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("unknown system_id")]
    ClientNotFound,

    #[error("client group '{0}' does not exist")]
    GroupNotFound(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("client is suspended")]
    ClientSuspended,

    #[error("source IP not allowed for this client group")]
    IpNotAllowed,

    #[error("client group requires a TLS connection")]
    TlsRequired,

    #[error("maximum concurrent binds exceeded")]
    MaxBindsExceeded,
}

impl AuthError {
    /// The bind response status for this failure.
    pub fn status(&self) -> Status {
        match self {
            AuthError::ClientNotFound => Status::InvalidSystemId,
            AuthError::InvalidCredentials => Status::InvalidPassword,
            AuthError::GroupNotFound(_)
            | AuthError::ClientSuspended
            | AuthError::IpNotAllowed
            | AuthError::TlsRequired
            | AuthError::MaxBindsExceeded => Status::BindFailed,
        }
    }
}

/// Shared policy for a set of clients.
#[derive(Debug, Clone)]
pub struct ClientGroup {
    pub id: String,
    pub name: String,
    pub max_binds: u32,
    pub rate_limit: Option<u32>,
    pub tls_required: bool,
    /// CIDR allow-list; empty means no restriction.
    pub allowed_networks: Vec<IpNet>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClientGroup {
    pub fn new(id: impl Into<String>, name: impl Into<String>, max_binds: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            max_binds,
            rate_limit: None,
            tls_required: false,
            allowed_networks: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn allows_ip(&self, ip: IpAddr) -> bool {
        if self.allowed_networks.is_empty() {
            return true;
        }
        self.allowed_networks.iter().any(|net| net.contains(&ip))
    }
}

/// One ESME account.
#[derive(Debug, Clone)]
pub struct Client {
    pub system_id: String,
    pub password: String,
    pub group_id: String,
    pub bind_count: u32,
    pub last_bind: Option<DateTime<Utc>>,
    pub last_ping: Option<DateTime<Utc>>,
    pub status: ClientStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Active,
    Suspended,
}

impl Client {
    pub fn new(
        system_id: impl Into<String>,
        password: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            system_id: system_id.into(),
            password: password.into(),
            group_id: group_id.into(),
            bind_count: 0,
            last_bind: None,
            last_ping: None,
            status: ClientStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("group '{0}' already exists")]
    GroupExists(String),

    #[error("client '{0}' already exists")]
    ClientExists(String),

    #[error("group '{0}' does not exist")]
    GroupNotFound(String),
}

#[derive(Default)]
struct Inner {
    groups: HashMap<String, ClientGroup>,
    clients: HashMap<String, Client>,
}

/// Registry of groups and clients behind one reader-writer lock.
#[derive(Default)]
pub struct ClientManager {
    inner: RwLock<Inner>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&self, group: ClientGroup) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().expect("auth lock poisoned");
        if inner.groups.contains_key(&group.id) {
            return Err(RegistryError::GroupExists(group.id));
        }
        inner.groups.insert(group.id.clone(), group);
        Ok(())
    }

    /// Add a client. The referenced group must already exist.
    pub fn add_client(&self, client: Client) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().expect("auth lock poisoned");
        if !inner.groups.contains_key(&client.group_id) {
            return Err(RegistryError::GroupNotFound(client.group_id));
        }
        if inner.clients.contains_key(&client.system_id) {
            return Err(RegistryError::ClientExists(client.system_id));
        }
        inner.clients.insert(client.system_id.clone(), client);
        Ok(())
    }

    /// Validate a bind attempt without mutating any state.
    ///
    /// Checks run in a fixed order: client lookup, group resolution,
    /// password (constant time), account status, source IP against the
    /// group's CIDR list (empty list allows all), the group's transport
    /// requirement, then its bind ceiling. `secure` reports whether the
    /// connection arrived over TLS.
    pub fn validate(
        &self,
        system_id: &str,
        password: &str,
        ip: IpAddr,
        secure: bool,
    ) -> Result<(), AuthError> {
        let inner = self.inner.read().expect("auth lock poisoned");

        let client = inner
            .clients
            .get(system_id)
            .ok_or(AuthError::ClientNotFound)?;
        let group = inner
            .groups
            .get(&client.group_id)
            .ok_or_else(|| AuthError::GroupNotFound(client.group_id.clone()))?;

        if !constant_time_eq(client.password.as_bytes(), password.as_bytes()) {
            warn!(system_id, "bind with invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        if client.status != ClientStatus::Active {
            warn!(system_id, "bind from suspended client");
            return Err(AuthError::ClientSuspended);
        }

        if !group.allows_ip(ip) {
            warn!(system_id, %ip, group = %group.id, "bind from disallowed source");
            return Err(AuthError::IpNotAllowed);
        }

        if group.tls_required && !secure {
            warn!(system_id, group = %group.id, "bind without required TLS");
            return Err(AuthError::TlsRequired);
        }

        if client.bind_count >= group.max_binds {
            warn!(
                system_id,
                bind_count = client.bind_count,
                max_binds = group.max_binds,
                "bind ceiling reached"
            );
            return Err(AuthError::MaxBindsExceeded);
        }

        Ok(())
    }

    /// Record a successful bind: increment the count and stamp the time.
    pub fn register_bind(&self, system_id: &str) {
        let mut inner = self.inner.write().expect("auth lock poisoned");
        if let Some(client) = inner.clients.get_mut(system_id) {
            client.bind_count += 1;
            client.last_bind = Some(Utc::now());
            client.updated_at = Utc::now();
            debug!(system_id, bind_count = client.bind_count, "bind registered");
        }
    }

    /// Release one bind slot when a bound session ends.
    pub fn release_bind(&self, system_id: &str) {
        let mut inner = self.inner.write().expect("auth lock poisoned");
        if let Some(client) = inner.clients.get_mut(system_id) {
            client.bind_count = client.bind_count.saturating_sub(1);
            client.updated_at = Utc::now();
            debug!(system_id, bind_count = client.bind_count, "bind released");
        }
    }

    /// Suspend or reinstate an account.
    pub fn set_client_status(&self, system_id: &str, status: ClientStatus) {
        let mut inner = self.inner.write().expect("auth lock poisoned");
        if let Some(client) = inner.clients.get_mut(system_id) {
            client.status = status;
            client.updated_at = Utc::now();
        }
    }

    /// Stamp keepalive activity for a bound client.
    pub fn record_ping(&self, system_id: &str) {
        let mut inner = self.inner.write().expect("auth lock poisoned");
        if let Some(client) = inner.clients.get_mut(system_id) {
            client.last_ping = Some(Utc::now());
        }
    }

    pub fn client(&self, system_id: &str) -> Option<Client> {
        self.inner
            .read()
            .expect("auth lock poisoned")
            .clients
            .get(system_id)
            .cloned()
    }

    pub fn group_for(&self, system_id: &str) -> Option<ClientGroup> {
        let inner = self.inner.read().expect("auth lock poisoned");
        let client = inner.clients.get(system_id)?;
        inner.groups.get(&client.group_id).cloned()
    }
}

/// Compare two byte strings without early exit on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
