//! Per-connection actor: one tokio task per accepted/dialed socket, owning
//! its `Link`, its inbound mpsc queue, and its heartbeat cadence (spec §4.6,
//! §5 "each connection's I/O is driven by its own task").

use std::sync::Arc;
use std::time::{Duration, Instant};

use overlay_link::{Frame, Link};
use overlay_protocol::{HeartbeatPayload, MessageType, Priority};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::conn::ConnRole;
use crate::dispatch;
use crate::state::HubState;

/// Drive one connection until it closes, times out, or is kicked by the
/// liveness sweep. Registers and tears down all shared state itself so
/// callers only need to spawn this.
pub async fn run_connection<S>(state: Arc<HubState>, stream: S, role: ConnRole, tunnel_name: Option<String>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let now = Instant::now();
    let mut link = Link::with_max_message_bytes(stream, state.config.max_message_bytes);
    let (tx, mut inbox) = mpsc::unbounded_channel::<Frame>();
    let conn = state.conns.insert(role, tx, now);
    if let Some(name) = tunnel_name {
        state.conns.set_tunnel_name(conn, name);
    }
    let notify = Arc::new(Notify::new());
    state.register_close_signal(conn, notify.clone());

    let interval = Duration::from_millis(state.config.heartbeat_interval_ms);
    let mut heartbeat_ticker = tokio::time::interval(interval);
    heartbeat_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat_ticker.tick().await; // first tick fires immediately; we send our own below
    let mut heartbeat_count: u32 = 0;

    send_heartbeat(&state, &mut link, conn, role, &mut heartbeat_count);
    if let Err(e) = link.pump().await {
        warn!(error = %e, conn, "initial heartbeat send failed");
        state.cleanup_connection(conn);
        return;
    }

    loop {
        tokio::select! {
            biased;
            () = notify.notified() => {
                debug!(conn, "connection kicked by liveness sweep");
                break;
            }
            maybe_frame = inbox.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        let len = frame.payload.len();
                        link.send(frame);
                        if let Err(e) = link.pump().await {
                            warn!(error = %e, conn, "send failed");
                            break;
                        }
                        state.conns.record_out(conn, len, Instant::now());
                    }
                    None => break,
                }
            }
            received = link.recv() => {
                match received {
                    Ok(Some(frame)) => {
                        let now = Instant::now();
                        state.conns.record_in(conn, frame.payload.len(), now);
                        dispatch::process_message(&state, conn, frame, now);
                    }
                    Ok(None) => {
                        debug!(conn, "peer closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, conn, "link error, closing connection");
                        break;
                    }
                }
            }
            _ = heartbeat_ticker.tick() => {
                send_heartbeat(&state, &mut link, conn, role, &mut heartbeat_count);
                if let Err(e) = link.pump().await {
                    warn!(error = %e, conn, "heartbeat send failed");
                    break;
                }
            }
        }
    }

    state.cleanup_connection(conn);
}

fn send_heartbeat<S>(state: &HubState, link: &mut Link<S>, conn: crate::state::ConnIdx, role: ConnRole, count: &mut u32)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    *count += 1;
    let directory = if *count % overlay_protocol::HEARTBEAT_DIRECTORY_EVERY == 1 {
        let trunk = role == ConnRole::Tunnel;
        state.dir.build_directory(trunk, &state.own_de(), Some(conn))
    } else {
        Vec::new()
    };
    let hb = HeartbeatPayload {
        uid: state.local_uid,
        is_hub: true,
        directory,
    };
    link.send(Frame::new(MessageType::Heartbeat, Priority::MedHigh, hb.encode()));
}
