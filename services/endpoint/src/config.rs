//! Endpoint configuration loading (spec §6 "Persisted configuration").
//!
//! TOML is the sole config source. Sections: `[parameters]`,
//! `[[client-services]]`.

use std::path::Path;

use overlay_protocol::{ServiceKind, Uid};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceLocality {
    Local,
    Remote,
}

#[derive(Debug, Clone)]
pub struct ClientService {
    pub name: String,
    pub locality: ServiceLocality,
    pub kind: ServiceKind,
}

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub app_name: String,
    pub adapter: Option<String>,
    pub uid: Option<Uid>,
    /// Hubs this endpoint is willing to connect to, ordered highest priority
    /// first. Empty means "accept whichever Hub beacons first".
    pub hub_priority: Vec<String>,
    pub reversion_enabled: bool,
    pub static_hub: Option<String>,
    pub hub_port: u16,
    pub beacon_port: u16,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_intervals: u32,
    pub max_message_bytes: u32,
    pub tls: Option<TlsConfig>,
    pub client_services: Vec<ClientService>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            app_name: "endpoint".to_owned(),
            adapter: None,
            uid: None,
            hub_priority: Vec::new(),
            reversion_enabled: false,
            static_hub: None,
            hub_port: overlay_protocol::DEFAULT_ENDPOINT_PORT,
            beacon_port: overlay_protocol::DEFAULT_BEACON_BASE_PORT,
            heartbeat_interval_ms: overlay_protocol::HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_intervals: overlay_protocol::HEARTBEAT_TIMEOUT_INTERVALS,
            max_message_bytes: overlay_protocol::DEFAULT_MAX_MESSAGE_BYTES,
            tls: None,
            client_services: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    parameters: Option<RawParameters>,
    #[serde(rename = "client-services")]
    client_services: Option<Vec<RawClientService>>,
}

#[derive(Debug, Deserialize)]
struct RawParameters {
    app_name: Option<String>,
    adapter: Option<String>,
    uid: Option<String>,
    hub_priority: Option<Vec<String>>,
    reversion_enabled: Option<bool>,
    static_hub: Option<String>,
    hub_port: Option<u16>,
    beacon_port: Option<u16>,
    heartbeat_interval_ms: Option<u64>,
    heartbeat_timeout_intervals: Option<u32>,
    max_message_bytes: Option<u32>,
    tls_cert: Option<String>,
    tls_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawClientService {
    name: Option<String>,
    locality: Option<String>,
    kind: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

pub fn load_config_from_path(path: &Path) -> Result<EndpointConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

pub fn load_config() -> Result<EndpointConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/overlay/endpoint.toml"))
}

pub fn load_config_from_str(toml_str: &str) -> Result<EndpointConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut cfg = EndpointConfig::default();

    if let Some(p) = raw.parameters {
        if let Some(v) = p.app_name {
            cfg.app_name = v;
        }
        cfg.adapter = p.adapter;
        if let Some(v) = p.uid {
            cfg.uid = Some(
                v.parse()
                    .map_err(|_| ConfigError::InvalidValue(format!("parameters.uid '{v}' is not a valid UID")))?,
            );
        }
        if let Some(v) = p.hub_priority {
            cfg.hub_priority = v;
        }
        if let Some(v) = p.reversion_enabled {
            cfg.reversion_enabled = v;
        }
        cfg.static_hub = p.static_hub;
        if let Some(v) = p.hub_port {
            cfg.hub_port = v;
        }
        if let Some(v) = p.beacon_port {
            cfg.beacon_port = v;
        }
        if let Some(v) = p.heartbeat_interval_ms {
            cfg.heartbeat_interval_ms = v;
        }
        if let Some(v) = p.heartbeat_timeout_intervals {
            cfg.heartbeat_timeout_intervals = v;
        }
        if let Some(v) = p.max_message_bytes {
            cfg.max_message_bytes = v;
        }
        match (p.tls_cert, p.tls_key) {
            (Some(cert_path), Some(key_path)) => cfg.tls = Some(TlsConfig { cert_path, key_path }),
            (None, None) => {}
            _ => {
                return Err(ConfigError::InvalidValue(
                    "tls_cert and tls_key must both be set or both omitted".to_owned(),
                ))
            }
        }
    }

    if let Some(services) = raw.client_services {
        for (i, s) in services.into_iter().enumerate() {
            let name = s.name.ok_or_else(|| ConfigError::InvalidValue(format!("client-services[{i}].name missing")))?;
            let locality = match s.locality.as_deref() {
                Some("local") => ServiceLocality::Local,
                Some("remote") => ServiceLocality::Remote,
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "client-services[{i}].locality must be 'local' or 'remote', got {other:?}"
                    )))
                }
            };
            let kind = match s.kind.as_deref() {
                Some("multicast") => ServiceKind::Multicast,
                Some("e2e") => ServiceKind::E2e,
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "client-services[{i}].kind must be 'multicast' or 'e2e', got {other:?}"
                    )))
                }
            };
            cfg.client_services.push(ClientService { name, locality, kind });
        }
    }

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_parameters_is_absent() {
        let cfg = load_config_from_str("").unwrap();
        assert_eq!(cfg.hub_port, overlay_protocol::DEFAULT_ENDPOINT_PORT);
        assert!(!cfg.reversion_enabled);
    }

    #[test]
    fn parses_parameters_and_client_services() {
        let toml_str = r#"
            [parameters]
            app_name = "camera-1"
            hub_priority = ["hub-east", "hub-west"]
            reversion_enabled = true

            [[client-services]]
            name = "video"
            locality = "local"
            kind = "multicast"
        "#;
        let cfg = load_config_from_str(toml_str).unwrap();
        assert_eq!(cfg.app_name, "camera-1");
        assert_eq!(cfg.hub_priority, vec!["hub-east", "hub-west"]);
        assert!(cfg.reversion_enabled);
        assert_eq!(cfg.client_services.len(), 1);
        assert_eq!(cfg.client_services[0].locality, ServiceLocality::Local);
    }

    #[test]
    fn rejects_unknown_service_kind() {
        let toml_str = r#"
            [[client-services]]
            name = "video"
            locality = "local"
            kind = "bogus"
        "#;
        assert!(load_config_from_str(toml_str).is_err());
    }
}
