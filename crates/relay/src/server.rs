//! WebSocket front door for the relay.
//!
//! Each accepted socket becomes one participant channel: the relay assigns
//! an id, sends `hello`, and from then on every inbound text frame goes
//! through the router while a pump task drains queued outbound messages to
//! the socket. When the socket goes away, for any reason, the participant
//! is removed and its room notified per the registry rules.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use roomcast_core::{protocol, SignalMessage};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::RoomRegistry;
use crate::router::MessageRouter;
use crate::Result;

/// Accept loop: one task per inbound connection, running until the
/// listener itself fails.
pub async fn serve(listener: TcpListener, registry: Arc<RoomRegistry>) -> Result<()> {
    info!(addr = %listener.local_addr()?, "relay listening");
    loop {
        let (stream, addr) = listener.accept().await?;
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, registry).await {
                debug!(%addr, error = %e, "connection ended with error");
            }
        });
    }
}

/// Handle one participant channel for its whole lifetime.
pub async fn handle_connection(stream: TcpStream, registry: Arc<RoomRegistry>) -> Result<()> {
    let addr = stream.peer_addr()?;
    let ws_stream = accept_async(stream).await?;
    info!(%addr, "new connection");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let participant_id = Uuid::new_v4().to_string();
    registry.connect(&participant_id, tx.clone());

    // Assign the participant id before anything else can be routed to it.
    match protocol::encode(&SignalMessage::Hello {
        id: participant_id.clone(),
    }) {
        Ok(text) => {
            let _ = tx.send(Message::Text(text));
        }
        Err(e) => warn!(error = %e, "failed to encode hello"),
    }

    // Pump queued outbound messages into the socket.
    let forward_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    let router = MessageRouter::new(Arc::clone(&registry));
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => match protocol::decode(&text) {
                Ok(msg) => router.route(&participant_id, msg),
                Err(e) => debug!(%addr, error = %e, "dropping unparsable frame"),
            },
            Ok(Message::Ping(data)) => {
                let _ = tx.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                info!(%addr, "connection closed by peer");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(%addr, error = %e, "websocket error");
                break;
            }
        }
    }

    registry.disconnect(&participant_id);
    forward_task.abort();

    Ok(())
}
