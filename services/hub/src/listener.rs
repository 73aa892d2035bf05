//! Accept loops for the Hub's two stream-socket ports (spec §4.6 "Accept"):
//! the endpoint-facing port and the tunnel-facing port, each optionally
//! wrapped in TLS.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::conn::ConnRole;
use crate::conn_task::run_connection;
use crate::state::HubState;
use crate::stream::HubStream;
use crate::tls;

pub async fn run_endpoint_listener(state: Arc<HubState>) -> std::io::Result<()> {
    run_listener(state, ConnRole::Endpoint).await
}

pub async fn run_tunnel_listener(state: Arc<HubState>) -> std::io::Result<()> {
    run_listener(state, ConnRole::Tunnel).await
}

async fn run_listener(state: Arc<HubState>, role: ConnRole) -> std::io::Result<()> {
    let port = match role {
        ConnRole::Endpoint => state.config.endpoint_port,
        ConnRole::Tunnel => state.config.tunnel_port,
    };
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    info!(port, ?role, "listening");

    let acceptor = match &state.config.tls {
        Some(tls_cfg) => Some(tls::build_acceptor(tls_cfg).map_err(std::io::Error::other)?),
        None => None,
    };

    loop {
        let (tcp, peer) = listener.accept().await?;
        let state = state.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            let stream = match acceptor {
                Some(acceptor) => match acceptor.accept(tcp).await {
                    Ok(tls_stream) => HubStream::ServerTls(Box::new(tls_stream)),
                    Err(e) => {
                        warn!(error = %e, %peer, "TLS handshake failed");
                        return;
                    }
                },
                None => HubStream::Plain(tcp),
            };
            run_connection(state, stream, role, None).await;
        });
    }
}
