//! Per-connection session loop.
//!
//! A session pumps events in both directions between one transport
//! connection and the router until either side ends it.

use crate::metrics::{self, ConnectionMetricsGuard};
use std::sync::Arc;
use std::time::Instant;
use switchboard_core::{Delivery, Router};
use switchboard_protocol::{codec, ConnectionId, Encoding, InboundEvent, OutboundEvent, WireMessage};
use switchboard_transport::{Connection, TransportError};
use tracing::{debug, info, trace, warn};

/// Drive a connection until it closes.
///
/// The connection is always removed from the router on return.
pub async fn drive<C: Connection>(mut conn: C, router: Arc<Router>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection_id = conn.id().clone();

    let mut mailbox = match router.connect(&connection_id) {
        Ok(mailbox) => mailbox,
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "Rejecting connection");
            metrics::record_error("connect");
            let _ = conn.close(Some(e.to_string())).await;
            return;
        }
    };

    debug!(
        connection = %connection_id,
        remote = conn.remote_addr().as_deref().unwrap_or("unknown"),
        "Session started"
    );

    // Replies follow the encoding the peer last used.
    let mut encoding = Encoding::default();

    loop {
        tokio::select! {
            biased;

            delivery = mailbox.recv() => match delivery {
                Some(Delivery::Event(event)) => {
                    if let Err(e) = send_event(&mut conn, &event, encoding).await {
                        debug!(connection = %connection_id, error = %e, "Send failed");
                        break;
                    }
                }
                Some(Delivery::Close(reason)) => {
                    info!(connection = %connection_id, reason = %reason, "Closing connection");
                    if let Err(e) = conn.close(Some(reason.to_string())).await {
                        debug!(connection = %connection_id, error = %e, "Close failed");
                    }
                    break;
                }
                None => {
                    debug!(connection = %connection_id, "Mailbox closed by router");
                    let _ = conn.close(None).await;
                    break;
                }
            },

            message = conn.recv() => match message {
                Ok(Some(message)) => {
                    encoding = message.encoding();
                    handle_message(&router, &connection_id, &message);
                }
                Ok(None) => {
                    debug!(connection = %connection_id, "Peer closed connection");
                    break;
                }
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "Transport error");
                    metrics::record_error("transport");
                    break;
                }
            },
        }
    }

    router.disconnect(&connection_id);
    metrics::record_router_stats(&router.stats());
    debug!(connection = %connection_id, "Session ended");
}

/// Decode and dispatch one inbound message. Failures only drop the message,
/// except an unreadable announce, which is still answered.
fn handle_message(router: &Router, connection_id: &ConnectionId, message: &WireMessage) {
    let start = Instant::now();

    let event: InboundEvent = match codec::decode(message) {
        Ok(event) => event,
        Err(e) => {
            metrics::record_error("decode");
            if codec::event_name(message).as_deref() == Some("authenticate") {
                warn!(connection = %connection_id, error = %e, "Unreadable announce");
                metrics::record_event("authenticate", "inbound");
                let outcome = router.reject_announce(connection_id, "invalid authenticate payload");
                debug!(connection = %connection_id, outcome = ?outcome, "Announce refused");
            } else {
                warn!(connection = %connection_id, error = %e, "Dropping undecodable message");
            }
            return;
        }
    };

    let name = event.name();
    metrics::record_event(name, "inbound");

    match router.dispatch(connection_id, event) {
        Ok(delivered) => {
            trace!(connection = %connection_id, event = name, delivered, "Event routed");
        }
        Err(e) => {
            warn!(connection = %connection_id, event = name, error = %e, "Event dropped");
            metrics::record_error("dispatch");
        }
    }
    if name == "authenticate" {
        metrics::record_router_stats(&router.stats());
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
}

async fn send_event<C: Connection>(
    conn: &mut C,
    event: &OutboundEvent,
    encoding: Encoding,
) -> Result<(), TransportError> {
    let message = match codec::encode(event, encoding) {
        Ok(message) => message,
        Err(e) => {
            warn!(connection = %conn.id(), event = event.name(), error = %e, "Failed to encode event");
            metrics::record_error("encode");
            return Ok(());
        }
    };
    conn.send(message).await?;
    metrics::record_event(event.name(), "outbound");
    Ok(())
}
