//! Hub configuration loading (spec §6 "Persisted configuration").
//!
//! TOML is the sole config source. Sections: `[parameters]`,
//! `[[static-tunnels]]`, `valid-tunnel-sources`.

use std::path::Path;

use overlay_protocol::Uid;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone)]
pub struct StaticTunnel {
    pub name: String,
    pub primary: String,
    pub backup: Option<String>,
    pub tls: bool,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub app_name: String,
    pub adapter: Option<String>,
    pub uid: Option<Uid>,
    pub priority: u8,
    pub endpoint_port: u16,
    pub tunnel_port: u16,
    pub beacon_port: u16,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_intervals: u32,
    pub max_message_bytes: u32,
    pub tls: Option<TlsConfig>,
    pub static_tunnels: Vec<StaticTunnel>,
    pub valid_tunnel_sources: Vec<Uid>,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            app_name: "hub".to_owned(),
            adapter: None,
            uid: None,
            priority: 1,
            endpoint_port: overlay_protocol::DEFAULT_ENDPOINT_PORT,
            tunnel_port: overlay_protocol::DEFAULT_TUNNEL_PORT,
            beacon_port: overlay_protocol::DEFAULT_BEACON_BASE_PORT,
            heartbeat_interval_ms: overlay_protocol::HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_intervals: overlay_protocol::HEARTBEAT_TIMEOUT_INTERVALS,
            max_message_bytes: overlay_protocol::DEFAULT_MAX_MESSAGE_BYTES,
            tls: None,
            static_tunnels: Vec::new(),
            valid_tunnel_sources: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    parameters: Option<RawParameters>,
    #[serde(rename = "static-tunnels")]
    static_tunnels: Option<Vec<RawStaticTunnel>>,
    #[serde(rename = "valid-tunnel-sources")]
    valid_tunnel_sources: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawParameters {
    app_name: Option<String>,
    adapter: Option<String>,
    uid: Option<String>,
    priority: Option<u8>,
    endpoint_port: Option<u16>,
    tunnel_port: Option<u16>,
    beacon_port: Option<u16>,
    heartbeat_interval_ms: Option<u64>,
    heartbeat_timeout_intervals: Option<u32>,
    max_message_bytes: Option<u32>,
    tls_cert: Option<String>,
    tls_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStaticTunnel {
    name: Option<String>,
    primary: Option<String>,
    backup: Option<String>,
    tls: Option<bool>,
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

pub fn load_config_from_path(path: &Path) -> Result<HubConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

pub fn load_config() -> Result<HubConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/overlay/hub.toml"))
}

pub fn load_config_from_str(toml_str: &str) -> Result<HubConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut cfg = HubConfig::default();

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
        if let Some(v) = p.priority {
            cfg.priority = v;
        }
        if let Some(v) = p.endpoint_port {
            cfg.endpoint_port = v;
        }
        if let Some(v) = p.tunnel_port {
            cfg.tunnel_port = v;
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

    if let Some(tunnels) = raw.static_tunnels {
        for (i, t) in tunnels.into_iter().enumerate() {
            let name = t.name.ok_or_else(|| ConfigError::InvalidValue(format!("static-tunnels[{i}].name missing")))?;
            let primary = t
                .primary
                .ok_or_else(|| ConfigError::InvalidValue(format!("static-tunnels[{i}].primary missing")))?;
            cfg.static_tunnels.push(StaticTunnel {
                name,
                primary,
                backup: t.backup,
                tls: t.tls.unwrap_or(false),
            });
        }
    }

    if let Some(uids) = raw.valid_tunnel_sources {
        for (i, u) in uids.into_iter().enumerate() {
            let parsed = u
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("valid-tunnel-sources[{i}] '{u}' is not a valid UID")))?;
            cfg.valid_tunnel_sources.push(parsed);
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
        assert_eq!(cfg.endpoint_port, overlay_protocol::DEFAULT_ENDPOINT_PORT);
        assert_eq!(cfg.tunnel_port, overlay_protocol::DEFAULT_TUNNEL_PORT);
    }

    #[test]
    fn parses_parameters_and_static_tunnels() {
        let toml_str = r#"
            [parameters]
            app_name = "hub-east"
            priority = 5
            endpoint_port = 7000

            [[static-tunnels]]
            name = "west"
            primary = "10.0.0.2:7934"
            tls = true

            valid-tunnel-sources = ["0102030405060000"]
        "#;
        let cfg = load_config_from_str(toml_str).unwrap();
        assert_eq!(cfg.app_name, "hub-east");
        assert_eq!(cfg.priority, 5);
        assert_eq!(cfg.endpoint_port, 7000);
        assert_eq!(cfg.static_tunnels.len(), 1);
        assert_eq!(cfg.static_tunnels[0].name, "west");
        assert!(cfg.static_tunnels[0].tls);
        assert_eq!(cfg.valid_tunnel_sources.len(), 1);
    }

    #[test]
    fn rejects_one_sided_tls_config() {
        let toml_str = r#"
            [parameters]
            tls_cert = "/etc/overlay/cert.pem"
        "#;
        assert!(load_config_from_str(toml_str).is_err());
    }
}
