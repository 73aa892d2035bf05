//! TLS helpers for the endpoint- and tunnel-facing listeners (spec §4.6,
//! §4.8). Async, built on `tokio-rustls`, adapted from the synchronous
//! acceptor/connector split in `hdds`'s transport layer (`hdds/src/transport
//! /tcp/tls.rs`) to the tokio socket model every other part of this crate
//! uses.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::TlsConfig;
use crate::error::HubError;

/// Build a server-side acceptor from a PEM certificate chain + PKCS8 key.
pub fn build_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor, HubError> {
    let chain = load_certs(Path::new(&tls.cert_path))?;
    let key = load_key(Path::new(&tls.key_path))?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| HubError::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build a client-side connector trusting the same certificate the tunnel
/// peer presents. Overlay Hubs exchange certificates out of band rather than
/// through a public CA, so the configured cert doubles as the trust anchor.
pub fn build_connector(tls: &TlsConfig) -> Result<TlsConnector, HubError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(Path::new(&tls.cert_path))? {
        roots.add(cert).map_err(|e| HubError::Tls(e.to_string()))?;
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Build the `ServerName` a tunnel dial presents during the TLS handshake.
/// Tunnel peers are addressed by IP, not hostname, so this always produces
/// an IP-address server name.
pub fn server_name_for_ip(addr: IpAddr) -> ServerName<'static> {
    ServerName::IpAddress(addr.into())
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, HubError> {
    let bytes = std::fs::read(path)?;
    certs(&mut bytes.as_slice())
        .collect::<Result<Vec<_>, std::io::Error>>()
        .map_err(HubError::Io)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, HubError> {
    let bytes = std::fs::read(path)?;
    let mut keys = pkcs8_private_keys(&mut bytes.as_slice())
        .collect::<Result<Vec<_>, std::io::Error>>()
        .map_err(HubError::Io)?;
    let key = keys.pop().ok_or_else(|| HubError::Tls("no PKCS8 private key found".into()))?;
    Ok(PrivateKeyDer::Pkcs8(key))
}
