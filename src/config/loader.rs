use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::types::Config;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        debug!(path = %path.display(), "loading configuration");

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(yaml).context("failed to parse YAML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-check references and value ranges.
    pub fn validate(&self) -> Result<()> {
        let mut group_ids = HashSet::new();
        for group in &self.groups {
            if !group_ids.insert(&group.id) {
                anyhow::bail!("duplicate group id: {}", group.id);
            }
            if group.max_binds == 0 {
                anyhow::bail!("group '{}' must allow at least one bind", group.id);
            }
        }

        let mut client_ids = HashSet::new();
        for client in &self.clients {
            if !client_ids.insert(&client.system_id) {
                anyhow::bail!("duplicate client system_id: {}", client.system_id);
            }
            if !group_ids.contains(&client.group) {
                anyhow::bail!(
                    "client '{}' references unknown group: {}",
                    client.system_id,
                    client.group
                );
            }
        }

        let mut route_ids = HashSet::new();
        for route in &self.routes {
            if !route_ids.insert(&route.id) {
                anyhow::bail!("duplicate route id: {}", route.id);
            }
            if route.max_connections == 0 {
                anyhow::bail!("route '{}' must allow at least one connection", route.id);
            }
        }

        let mut profile_ids = HashSet::new();
        for profile in &self.retry_profiles {
            if !profile_ids.insert(&profile.id) {
                anyhow::bail!("duplicate retry profile id: {}", profile.id);
            }
            if !(0.0..=1.0).contains(&profile.jitter) {
                anyhow::bail!(
                    "retry profile '{}' jitter must be within [0, 1]",
                    profile.id
                );
            }
            if profile.max_attempts == 0 {
                anyhow::bail!("retry profile '{}' needs at least one attempt", profile.id);
            }
        }

        if let Some(profile) = &self.upstream.retry_profile {
            if !profile_ids.contains(profile) {
                anyhow::bail!("upstream.retry_profile references unknown profile: {profile}");
            }
        }

        if let Some(tls) = &self.server.tls {
            if tls.client_auth.requires_ca() && tls.ca.is_none() {
                anyhow::bail!(
                    "tls.client_auth {:?} requires a CA bundle",
                    tls.client_auth
                );
            }
        }

        info!(
            groups = self.groups.len(),
            clients = self.clients.len(),
            routes = self.routes.len(),
            profiles = self.retry_profiles.len(),
            "configuration validated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = Config::from_yaml("server:\n  address: 127.0.0.1:2775\n").unwrap();
        assert_eq!(config.server.system_id, "smppgw");
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.server.idle_timeout, Duration::from_secs(30));
        assert!(config.server.default_allow);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let yaml = r#"
server:
  address: 0.0.0.0:2775
  system_id: smsc
  max_connections: 500
  idle_timeout: 45s
  rate_limit: 50.0
  rate_burst: 100
groups:
  - id: wholesale
    max_binds: 4
    allowed_networks: ["10.0.0.0/8"]
clients:
  - system_id: acme
    password: secret
    group: wholesale
routes:
  - id: r1
    host: smsc1.example.net
    port: 2775
    system_id: gw
    password: pw
    bind_type: transceiver
    priority: 10
    weight: 5
    max_connections: 3
retry_profiles:
  - id: default
    max_attempts: 5
    initial_delay: 500ms
    max_delay: 30s
    backoff_multiplier: 2.0
    jitter: 0.2
    expiry: 2h
    error_categories: [network]
upstream:
  retry_profile: default
  check_interval: 15s
scheduler:
  interval: 2s
  workers: 8
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.routes[0].weight, 5);
        assert_eq!(config.retry_profiles[0].initial_delay, Duration::from_millis(500));
        assert_eq!(config.scheduler.workers, 8);
        assert_eq!(config.upstream.check_interval, Duration::from_secs(15));
    }

    #[test]
    fn client_with_unknown_group_is_rejected() {
        let yaml = r#"
clients:
  - system_id: acme
    password: secret
    group: missing
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn duplicate_route_ids_are_rejected() {
        let yaml = r#"
routes:
  - {id: r1, host: a, port: 2775, system_id: x, password: y}
  - {id: r1, host: b, port: 2775, system_id: x, password: y}
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn jitter_outside_unit_interval_is_rejected() {
        let yaml = r#"
retry_profiles:
  - id: p
    jitter: 1.5
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn require_and_verify_without_ca_is_rejected() {
        let yaml = r#"
server:
  tls:
    cert: /etc/smppgw/cert.pem
    key: /etc/smppgw/key.pem
    client_auth: require_and_verify_client_cert
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }
}
