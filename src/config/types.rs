use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::route::BindType;

/// Root configuration for smppgw.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener front end
    #[serde(default)]
    pub server: ServerConfig,

    /// Client group policies
    #[serde(default)]
    pub groups: Vec<GroupConfig>,

    /// ESME accounts
    #[serde(default)]
    pub clients: Vec<ClientConfig>,

    /// Upstream SMSC peers
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Retry policy buckets
    #[serde(default)]
    pub retry_profiles: Vec<RetryProfileConfig>,

    /// Upstream connection management
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Route health checking
    #[serde(default)]
    pub health: HealthConfig,

    /// Retry scheduler
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_address")]
    pub address: SocketAddr,

    /// system_id announced in bind responses
    #[serde(default = "default_system_id")]
    pub system_id: String,

    /// Standalone-mode password; used when no clients are configured
    #[serde(default)]
    pub password: Option<String>,

    /// Maximum concurrent inbound connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Idle period before a keepalive probe / unbound disconnect
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Hard ceiling on session lifetime
    #[serde(default = "default_max_lifetime", with = "humantime_serde")]
    pub max_lifetime: Duration,

    /// Per-IP token bucket refill rate (tokens/second)
    #[serde(default = "default_rate_limit")]
    pub rate_limit: f64,

    /// Per-IP token bucket capacity
    #[serde(default = "default_rate_burst")]
    pub rate_burst: u32,

    /// Verdict for peers matching neither allow nor deny lists
    #[serde(default = "default_true")]
    pub default_allow: bool,

    /// IPs or CIDR ranges always allowed
    #[serde(default)]
    pub allow: Vec<String>,

    /// IPs always denied
    #[serde(default)]
    pub deny: Vec<String>,

    /// Socket read deadline
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Socket write deadline
    #[serde(default = "default_write_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Wait for a bind ack (upstream) / enquire_link reply (inbound)
    #[serde(default = "default_bind_timeout", with = "humantime_serde")]
    pub bind_timeout: Duration,

    /// TLS termination
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            system_id: default_system_id(),
            password: None,
            max_connections: default_max_connections(),
            idle_timeout: default_idle_timeout(),
            max_lifetime: default_max_lifetime(),
            rate_limit: default_rate_limit(),
            rate_burst: default_rate_burst(),
            default_allow: true,
            allow: Vec::new(),
            deny: Vec::new(),
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
            bind_timeout: default_bind_timeout(),
            tls: None,
        }
    }
}

/// Client certificate policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuth {
    #[default]
    NoClientCert,
    RequestClientCert,
    RequireClientCert,
    VerifyClientCertIfGiven,
    RequireAndVerifyClientCert,
}

impl ClientAuth {
    pub fn requires_ca(&self) -> bool {
        !matches!(self, ClientAuth::NoClientCert)
    }
}

/// Minimum TLS protocol version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVersion {
    #[default]
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    Tls13,
}

/// TLS termination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Certificate chain (PEM)
    pub cert: PathBuf,

    /// Private key (PEM)
    pub key: PathBuf,

    /// CA bundle for client certificate verification
    #[serde(default)]
    pub ca: Option<PathBuf>,

    #[serde(default)]
    pub client_auth: ClientAuth,

    #[serde(default)]
    pub min_version: TlsVersion,
}

/// Client group policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_max_binds")]
    pub max_binds: u32,

    #[serde(default)]
    pub rate_limit: Option<u32>,

    #[serde(default)]
    pub tls_required: bool,

    /// CIDR allow-list; empty means no restriction
    #[serde(default)]
    pub allowed_networks: Vec<IpNet>,
}

/// One ESME account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub system_id: String,
    pub password: String,
    pub group: String,
}

/// One upstream peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    pub host: String,
    pub port: u16,

    pub system_id: String,
    pub password: String,

    #[serde(default = "default_bind_type")]
    pub bind_type: BindType,

    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_weight")]
    pub weight: u32,

    #[serde(default = "default_route_connections")]
    pub max_connections: usize,

    #[serde(default)]
    pub cost_per_message: f64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Retry policy bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryProfileConfig {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,

    /// Jitter fraction in [0, 1]
    #[serde(default)]
    pub jitter: f64,

    #[serde(default = "default_expiry", with = "humantime_serde")]
    pub expiry: Duration,

    #[serde(default)]
    pub error_categories: Vec<String>,
}

/// Upstream connection management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,

    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(default = "default_check_interval", with = "humantime_serde")]
    pub check_interval: Duration,

    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Retry profile applied to transient submission failures
    #[serde(default)]
    pub retry_profile: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff: default_retry_backoff(),
            connect_timeout: default_connect_timeout(),
            check_interval: default_check_interval(),
            request_timeout: default_request_timeout(),
            retry_profile: None,
        }
    }
}

/// Route health checking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_health_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: default_health_interval(),
            timeout: default_health_timeout(),
        }
    }
}

/// Retry scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: default_scheduler_interval(),
            workers: default_workers(),
        }
    }
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_address() -> SocketAddr {
    "0.0.0.0:2775".parse().expect("valid default address")
}

fn default_system_id() -> String {
    "smppgw".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> usize {
    1000
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_lifetime() -> Duration {
    Duration::from_secs(3600)
}

fn default_rate_limit() -> f64 {
    100.0
}

fn default_rate_burst() -> u32 {
    200
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_bind_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_binds() -> u32 {
    1
}

fn default_bind_type() -> BindType {
    BindType::Transceiver
}

fn default_weight() -> u32 {
    1
}

fn default_route_connections() -> usize {
    1
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(300)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_expiry() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_check_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_health_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_scheduler_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_workers() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}
