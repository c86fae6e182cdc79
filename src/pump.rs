//! Transport pumps
//!
//! The reader turns inbound frames into hub commands; the writer drains the
//! connection's outbound queue to the transport and sends liveness pings.
//! These are the only functions that touch the WebSocket halves.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, error, warn};

use crate::error::AppError;
use crate::hub::HubHandle;
use crate::message::{ClientFrame, ControlFrame, Message, MessageDraft};
use crate::types::ConnectionId;

/// Deadlines and heartbeat period for one connection
#[derive(Debug, Clone)]
pub struct PumpConfig {
    pub ping_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

/// Reader side of a connection
pub struct Reader {
    connection_id: ConnectionId,
    /// Identity bound so far (from handshake or first message)
    identity: Option<String>,
    hub: HubHandle,
    read_timeout: Duration,
}

impl Reader {
    pub fn new(
        connection_id: ConnectionId,
        identity: Option<String>,
        hub: HubHandle,
        read_timeout: Duration,
    ) -> Self {
        Self {
            connection_id,
            identity,
            hub,
            read_timeout,
        }
    }

    /// Read until the peer closes, the transport fails or the deadline expires
    ///
    /// Any frame, pongs included, refreshes the read deadline. Oversized
    /// frames surface as a transport error from the stream.
    pub async fn run<S>(mut self, mut stream: S) -> Result<(), AppError>
    where
        S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
    {
        loop {
            let next = timeout(self.read_timeout, stream.next())
                .await
                .map_err(|_| AppError::ReadTimeout)?;

            let Some(frame) = next else {
                debug!("Stream ended for {}", self.connection_id);
                return Ok(());
            };

            match frame? {
                WsMessage::Text(text) => self.handle_text(text.as_str()).await?,
                WsMessage::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => self.handle_text(text).await?,
                    Err(e) => warn!("Non-UTF-8 binary frame from {}: {}", self.connection_id, e),
                },
                WsMessage::Close(_) => {
                    debug!("Connection {} sent close frame", self.connection_id);
                    return Ok(());
                }
                WsMessage::Ping(_) => debug!("Ping from {}", self.connection_id),
                WsMessage::Pong(_) => debug!("Pong from {}", self.connection_id),
                WsMessage::Frame(_) => {}
            }
        }
    }

    /// Decode one frame and forward it to the hub
    ///
    /// Decode failures are logged and skipped; only a closed hub is fatal.
    async fn handle_text(&mut self, text: &str) -> Result<(), AppError> {
        let frame = match ClientFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Invalid frame from {}: {}", self.connection_id, e);
                return Ok(());
            }
        };

        match frame {
            ClientFrame::Publish(draft) => {
                if self.identity.is_none() && !draft.sender.is_empty() {
                    self.identity = Some(draft.sender.clone());
                    self.hub
                        .identify(self.connection_id, draft.sender.clone(), draft.room.clone())
                        .await?;
                }
                self.hub.broadcast(draft).await
            }
            ClientFrame::Control(ControlFrame::JoinGroup { group }) => {
                self.hub.join_group(self.connection_id, group).await
            }
            ClientFrame::Control(ControlFrame::LeaveGroup { group }) => {
                self.hub.leave_group(self.connection_id, group).await
            }
            ClientFrame::Control(ControlFrame::GroupMessage { group, body }) => {
                let sender = self.identity.clone().unwrap_or_default();
                self.hub
                    .send_to_group(group, MessageDraft::new(sender, body, ""))
                    .await
            }
        }
    }
}

/// Drain the outbound queue to the transport
///
/// Exits when the queue is closed (unregister) or a write fails. Either way
/// the writer sends the close frame itself, so the close sequence has one
/// owner.
pub async fn writer_pump<K>(
    mut sink: K,
    mut outbound: mpsc::Receiver<Arc<Message>>,
    config: PumpConfig,
    connection_id: ConnectionId,
) -> Result<(), AppError>
where
    K: Sink<WsMessage, Error = WsError> + Unpin,
{
    let mut ticker = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(message) = next else {
                    debug!("Outbound queue closed for {}", connection_id);
                    break Ok(());
                };
                let json = match serde_json::to_string(&*message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize message {}: {}", message.id, e);
                        continue;
                    }
                };
                if let Err(e) = send_with_deadline(&mut sink, WsMessage::Text(json.into()), config.write_timeout).await {
                    break Err(e);
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = send_with_deadline(&mut sink, WsMessage::Ping(Vec::<u8>::new().into()), config.write_timeout).await {
                    break Err(e);
                }
            }
        }
    };

    if let Err(e) = &result {
        debug!("Write side of {} failed: {}", connection_id, e);
    }
    let _ = timeout(config.write_timeout, sink.close()).await;
    debug!("Writer ended for {}", connection_id);

    result
}

async fn send_with_deadline<K>(
    sink: &mut K,
    frame: WsMessage,
    deadline: Duration,
) -> Result<(), AppError>
where
    K: Sink<WsMessage, Error = WsError> + Unpin,
{
    timeout(deadline, sink.send(frame))
        .await
        .map_err(|_| AppError::WriteTimeout)?
        .map_err(AppError::from)
}
