use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use murmur_types::api::Identity;
use murmur_types::error::ChatError;

use crate::router::BroadcastRouter;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a pre-authenticated WebSocket connection.
/// The JWT was already validated at the HTTP upgrade layer, so the identity
/// is trusted as-is.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    router: BroadcastRouter,
    identity: Identity,
) {
    let (mut sender, mut receiver) = socket.split();
    let display_name = identity.display_name.clone();
    let user_id = identity.user_id;

    let (conn_id, mut events) = match router.connect(identity).await {
        Ok(accepted) => accepted,
        Err(e) => {
            warn!("{} ({}) rejected: {}", display_name, user_id, e);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode event for {}: {}", conn_id, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client. Each one finishes before the next frame is
    // read, which is what keeps a connection's commands in order.
    let router_recv = router.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    router_recv.handle_text(conn_id, text.as_str()).await;
                }
                Message::Binary(_) => {
                    let err = ChatError::validation("binary frames are not supported");
                    router_recv.report_error(conn_id, &err, None).await;
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    router.disconnect(conn_id).await;
    info!("{} ({}) disconnected from gateway", display_name, user_id);
}
