//! WebSocket connection handler
//!
//! Handles individual connections: handshake (auth stub, identity from the
//! query string, frame limits), registration with the hub, and the
//! reader/writer pump lifecycle.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::connection::{Connection, StateCell};
use crate::error::AppError;
use crate::hub::HubHandle;
use crate::message::{Message, MessageKind};
use crate::pump::{writer_pump, Reader};
use crate::types::ConnectionId;

/// Parameters taken from the upgrade request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpgradeParams {
    pub identity: Option<String>,
    pub room: String,
}

/// Inspect the upgrade request
///
/// Reads `user`, `room` and `token` from the query string. When an auth
/// token is configured, requests without the matching `token` get a 401.
pub fn check_upgrade(
    request: &Request,
    auth_token: Option<&str>,
) -> Result<UpgradeParams, ErrorResponse> {
    let mut params = UpgradeParams::default();
    let mut token = None;

    for pair in request.uri().query().unwrap_or_default().split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "user" if !value.is_empty() => params.identity = Some(value.to_string()),
            "room" => params.room = value.to_string(),
            "token" => token = Some(value),
            _ => {}
        }
    }

    if let Some(expected) = auth_token {
        if token != Some(expected) {
            let mut response = ErrorResponse::new(Some("Unauthorized".to_string()));
            *response.status_mut() = StatusCode::UNAUTHORIZED;
            return Err(response);
        }
    }

    Ok(params)
}

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, registers the connection, runs the
/// reader inline and the writer as its own task, and tears down once either
/// pump exits.
pub async fn handle_connection(
    stream: TcpStream,
    hub: HubHandle,
    config: Arc<HubConfig>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let mut upgrade = None;
    let mut rejected = false;
    let auth_token = config.auth_token.as_deref();
    let callback = |request: &Request,
                    response: Response|
     -> Result<Response, ErrorResponse> {
        match check_upgrade(request, auth_token) {
            Ok(params) => {
                upgrade = Some(params);
                Ok(response)
            }
            Err(error_response) => {
                rejected = true;
                Err(error_response)
            }
        }
    };
    let handshake_deadline = config.pump_config().write_timeout;
    let handshake = timeout(
        handshake_deadline,
        tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            callback,
            Some(config.websocket_config()),
        ),
    )
    .await
    .map_err(|_| {
        debug!("Handshake from {} timed out", peer_addr);
        AppError::HandshakeTimeout
    })?;

    let mut ws_stream = match handshake {
        Ok(ws_stream) => ws_stream,
        Err(_) if rejected => {
            warn!("Rejected unauthorized upgrade from {}", peer_addr);
            return Err(AppError::Unauthorized);
        }
        Err(e) => return Err(e.into()),
    };
    let params = upgrade.unwrap_or_default();

    let connection_id = ConnectionId::new();
    info!("Connection {} established from {}", connection_id, peer_addr);

    // Tell the peer its id before anything else is queued
    let welcome = Message::notice(MessageKind::System, connection_id.to_string(), params.room.clone());
    let welcome = WsMessage::Text(serde_json::to_string(&welcome)?.into());
    timeout(handshake_deadline, ws_stream.send(welcome))
        .await
        .map_err(|_| AppError::WriteTimeout)??;

    let (ws_sender, ws_receiver) = ws_stream.split();

    // Hub -> writer queue
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
    let state = StateCell::new();
    let mut connection = Connection::new(connection_id, outbound_tx, state.clone());
    connection.room = params.room.clone();
    if let Some(identity) = &params.identity {
        connection = connection.with_identity(identity.clone(), params.room.clone());
    }

    hub.register(connection).await?;

    let pump_config = config.pump_config();
    let drain_deadline = pump_config.write_timeout;
    let mut writer = tokio::spawn(writer_pump(
        ws_sender,
        outbound_rx,
        pump_config.clone(),
        connection_id,
    ));
    let reader = Reader::new(
        connection_id,
        params.identity,
        hub.clone(),
        pump_config.read_timeout,
    );

    // Wait for either pump to finish
    let mut writer_done = false;
    tokio::select! {
        result = reader.run(ws_receiver) => {
            if let Err(e) = result {
                debug!("Reader for {} ended: {}", connection_id, e);
            }
        }
        result = &mut writer => {
            writer_done = true;
            if let Ok(Err(e)) = result {
                debug!("Writer for {} ended: {}", connection_id, e);
            }
        }
    }

    if state.begin_drain() {
        debug!("Connection {} draining", connection_id);
    }
    let _ = hub.unregister(connection_id).await;

    // Unregister closes the queue; the writer flushes and sends the close frame
    if !writer_done && timeout(drain_deadline, &mut writer).await.is_err() {
        writer.abort();
    }

    state.close();
    info!("Connection {} closed", connection_id);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::{client_async, MaybeTlsStream, WebSocketStream};

    use crate::hub::Hub;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn test_config() -> HubConfig {
        HubConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ping_interval_secs: 1,
            read_timeout_secs: 5,
            write_timeout_secs: 1,
            stats_log_interval_secs: 0,
            ..Default::default()
        }
    }

    /// Start a hub and an accept loop, returning the address and hub handle
    async fn start_server(config: HubConfig) -> (String, HubHandle) {
        let config = Arc::new(config);
        let (hub, handle) = Hub::channel(config.command_capacity);
        tokio::spawn(hub.run());

        let listener = TcpListener::bind(&config.bind_addr).await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept_handle = handle.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(
                    stream,
                    accept_handle.clone(),
                    Arc::clone(&config),
                ));
            }
        });

        (addr, handle)
    }

    async fn connect(addr: &str, query: &str) -> Result<Client, tokio_tungstenite::tungstenite::Error> {
        let stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("ws://{}/{}", addr, query).into_client_request()?;
        let (ws, _) = client_async(request, MaybeTlsStream::Plain(stream)).await?;
        Ok(ws)
    }

    /// Next hub message, skipping control frames
    async fn next_message(ws: &mut Client) -> Message {
        loop {
            let frame = timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for a message")
                .expect("stream ended")
                .expect("transport error");
            if let WsMessage::Text(json) = frame {
                return serde_json::from_str(json.as_str()).unwrap();
            }
        }
    }

    async fn wait_for_active(hub: &HubHandle, expected: usize) {
        for _ in 0..100 {
            if hub.connections().await.unwrap().len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("registry never reached {} connections", expected);
    }

    fn request(uri: &str) -> Request {
        uri.into_client_request().unwrap()
    }

    #[test]
    fn test_check_upgrade_reads_query() {
        let params = check_upgrade(&request("ws://localhost/ws?user=alice&room=lobby"), None).unwrap();
        assert_eq!(params.identity.as_deref(), Some("alice"));
        assert_eq!(params.room, "lobby");

        let params = check_upgrade(&request("ws://localhost/ws"), None).unwrap();
        assert_eq!(params, UpgradeParams::default());

        let params = check_upgrade(&request("ws://localhost/?user=&room"), None).unwrap();
        assert!(params.identity.is_none());
        assert!(params.room.is_empty());
    }

    #[test]
    fn test_check_upgrade_enforces_token() {
        let denied = check_upgrade(&request("ws://localhost/?user=a"), Some("s3cret")).unwrap_err();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let denied = check_upgrade(&request("ws://localhost/?token=nope"), Some("s3cret"));
        assert!(denied.is_err());

        assert!(check_upgrade(&request("ws://localhost/?token=s3cret"), Some("s3cret")).is_ok());
    }

    #[tokio::test]
    async fn test_welcome_join_and_room_delivery() {
        let (addr, hub) = start_server(test_config()).await;

        let mut firehose = connect(&addr, "").await.unwrap();
        let welcome = next_message(&mut firehose).await;
        assert_eq!(welcome.kind, MessageKind::System);
        wait_for_active(&hub, 1).await;

        let mut alice = connect(&addr, "?user=alice&room=lobby").await.unwrap();
        assert_eq!(next_message(&mut alice).await.kind, MessageKind::System);

        // Both see alice's join notice
        let join = next_message(&mut firehose).await;
        assert_eq!(join.kind, MessageKind::Join);
        assert_eq!(join.body, "alice joined the chat");
        assert_eq!(next_message(&mut alice).await.kind, MessageKind::Join);

        let mut gamer = connect(&addr, "?room=game").await.unwrap();
        next_message(&mut gamer).await;
        wait_for_active(&hub, 3).await;

        alice
            .send(WsMessage::Text(
                r#"{"sender": "alice", "body": "hi", "room": "lobby"}"#.into(),
            ))
            .await
            .unwrap();
        alice
            .send(WsMessage::Text(r#"{"sender": "alice", "body": "all", "type": "system"}"#.into()))
            .await
            .unwrap();

        let got = next_message(&mut firehose).await;
        assert_eq!(got.body, "hi");
        assert!(got.id.starts_with("msg_"));
        assert_eq!(next_message(&mut alice).await.body, "hi");

        // The game room skips "hi" and only sees the system notice
        let got = next_message(&mut gamer).await;
        assert_eq!(got.body, "all");
        assert_eq!(got.kind, MessageKind::System);
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection() {
        let (addr, hub) = start_server(test_config()).await;
        let mut ws = connect(&addr, "").await.unwrap();
        next_message(&mut ws).await;

        ws.send(WsMessage::Text("definitely not json".into()))
            .await
            .unwrap();
        ws.send(WsMessage::Text(r#"{"sender": "bob", "body": "still here"}"#.into()))
            .await
            .unwrap();

        assert_eq!(next_message(&mut ws).await.body, "still here");
        assert_eq!(hub.stats().active_connections, 1);
    }

    #[tokio::test]
    async fn test_group_frames() {
        let (addr, hub) = start_server(test_config()).await;
        let mut member = connect(&addr, "?user=ann&room=a").await.unwrap();
        next_message(&mut member).await;
        next_message(&mut member).await;
        let mut outsider = connect(&addr, "?room=b").await.unwrap();
        next_message(&mut outsider).await;

        member
            .send(WsMessage::Text(r#"{"action": "join_group", "group": "ops"}"#.into()))
            .await
            .unwrap();
        member
            .send(WsMessage::Text(
                r#"{"action": "group_message", "group": "ops", "body": "page"}"#.into(),
            ))
            .await
            .unwrap();

        let got = next_message(&mut member).await;
        assert_eq!(got.body, "page");
        assert_eq!(got.sender, "ann");
        assert_eq!(hub.group_members("ops").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_unregisters_and_announces_leave() {
        let (addr, hub) = start_server(test_config()).await;
        let mut watcher = connect(&addr, "").await.unwrap();
        next_message(&mut watcher).await;
        wait_for_active(&hub, 1).await;

        let mut carol = connect(&addr, "?user=carol").await.unwrap();
        assert_eq!(next_message(&mut watcher).await.kind, MessageKind::Join);

        carol.close(None).await.unwrap();

        let leave = next_message(&mut watcher).await;
        assert_eq!(leave.kind, MessageKind::Leave);
        assert_eq!(leave.body, "carol left the chat");
        wait_for_active(&hub, 1).await;

        let stats = hub.stats();
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.total_connections, 2);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let config = HubConfig {
            max_frame_bytes: 256,
            ..test_config()
        };
        let (addr, hub) = start_server(config).await;
        let mut ws = connect(&addr, "").await.unwrap();
        next_message(&mut ws).await;
        wait_for_active(&hub, 1).await;

        let body = "x".repeat(4096);
        let _ = ws
            .send(WsMessage::Text(format!(r#"{{"body": "{}"}}"#, body).into()))
            .await;

        wait_for_active(&hub, 0).await;
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let config = HubConfig {
            ping_interval_secs: 1,
            read_timeout_secs: 2,
            ..test_config()
        };
        let (addr, hub) = start_server(config).await;

        // Never polled, so pings go unanswered
        let _idle = connect(&addr, "").await.unwrap();
        wait_for_active(&hub, 1).await;

        tokio::time::sleep(Duration::from_millis(2500)).await;
        wait_for_active(&hub, 0).await;
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (hub, handle) = Hub::channel(16);
        tokio::spawn(hub.run());

        // Connects but never sends the upgrade request
        let _silent = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();

        let result = timeout(
            Duration::from_secs(3),
            handle_connection(stream, handle.clone(), Arc::new(test_config())),
        )
        .await
        .expect("handshake deadline never fired");

        assert!(matches!(result, Err(AppError::HandshakeTimeout)));
        assert!(handle.connections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_upgrade_rejected() {
        let config = HubConfig {
            auth_token: Some("s3cret".to_string()),
            ..test_config()
        };
        let (addr, hub) = start_server(config).await;

        assert!(connect(&addr, "?user=eve").await.is_err());

        let mut ws = connect(&addr, "?user=dan&token=s3cret").await.unwrap();
        assert_eq!(next_message(&mut ws).await.kind, MessageKind::System);
        wait_for_active(&hub, 1).await;
    }
}
