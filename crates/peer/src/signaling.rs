//! WebSocket signaling client.
//!
//! Connects to the relay, splits the socket, and pumps both directions
//! through typed channels: outbound [`SignalMessage`]s become text frames,
//! inbound text frames become messages (unparsable frames are dropped, as
//! on the relay side). Relay loss surfaces as channel closure.

use futures_util::{SinkExt, StreamExt};
use roomcast_core::{protocol, SignalMessage};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::Result;

pub struct SignalingClient {
    outbound: mpsc::UnboundedSender<SignalMessage>,
    inbound: mpsc::UnboundedReceiver<SignalMessage>,
}

impl SignalingClient {
    /// Connect to the relay at `url` (a `ws://` or `wss://` address).
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        info!(%url, "connected to relay");

        let (mut write, mut read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let text = match protocol::encode(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to encode outbound message");
                        continue;
                    }
                };
                if write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match protocol::decode(&text) {
                        Ok(msg) => {
                            if inbound_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!(error = %e, "dropping unparsable frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "websocket error");
                        break;
                    }
                }
            }
        });

        Ok(Self { outbound, inbound })
    }

    /// Clonable sender for the session state machines.
    pub fn sender(&self) -> mpsc::UnboundedSender<SignalMessage> {
        self.outbound.clone()
    }

    /// Next inbound message; `None` once the relay connection is gone.
    pub async fn recv(&mut self) -> Option<SignalMessage> {
        self.inbound.recv().await
    }

    /// Split into raw channel halves for a state machine's run loop.
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<SignalMessage>,
        mpsc::UnboundedReceiver<SignalMessage>,
    ) {
        (self.outbound, self.inbound)
    }
}
