//! Client-side TLS for the Hub uplink (spec §4.7), adapted from the same
//! synchronous acceptor/connector split in `hdds`'s transport layer
//! (`hdds/src/transport/tcp/tls.rs`) that the Hub's own `tls.rs` follows.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use rustls_pemfile::certs;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::config::TlsConfig;
use crate::error::EndpointError;

/// Build a client-side connector trusting the Hub's own certificate.
/// Overlay components exchange certificates out of band rather than
/// through a public CA, so the configured cert doubles as the trust anchor.
pub fn build_connector(tls: &TlsConfig) -> Result<TlsConnector, EndpointError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(Path::new(&tls.cert_path))? {
        roots.add(cert).map_err(|e| EndpointError::Tls(e.to_string()))?;
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Hubs are addressed by IP, not hostname, so the TLS handshake always
/// presents an IP-address server name.
pub fn server_name_for_ip(addr: IpAddr) -> ServerName<'static> {
    ServerName::IpAddress(addr.into())
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, EndpointError> {
    let bytes = std::fs::read(path)?;
    certs(&mut bytes.as_slice())
        .collect::<Result<Vec<_>, std::io::Error>>()
        .map_err(EndpointError::Io)
}
