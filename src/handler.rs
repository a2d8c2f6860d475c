//! WebSocket connection handler
//!
//! Handles individual client connections: authenticated upgrade, the
//! inbound decode loop, the outbound flush loop with heartbeat, and a
//! single teardown that unregisters from the hub exactly once.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConnectionConfig};
use crate::connection::{ConnectionHandle, Session};
use crate::error::AppError;
use crate::events;
use crate::hub::Hub;
use crate::message::ClientEvent;
use crate::store::SessionResolver;
use crate::types::{ConnectionId, Frame, UserId};

/// Cookie carrying the session token
pub const SESSION_COOKIE: &str = "session_id";

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Handle a new TCP connection
///
/// Performs the authenticated WebSocket handshake, registers with the hub,
/// runs both pumps until either one stops, then unregisters.
pub async fn handle_connection(
    stream: TcpStream,
    hub: Hub,
    sessions: Arc<dyn SessionResolver>,
    config: Arc<Config>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake; auth happens before the protocol switch
    let mut authorized: Option<UserId> = None;
    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let user_id = authorize(req, &config.ws_path, sessions.as_ref())?;
        authorized = Some(user_id);
        Ok(response)
    };
    let ws_config = config.connection.websocket_config();
    let ws_stream =
        match tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config))
            .await
        {
            Ok(ws_stream) => ws_stream,
            Err(WsError::Http(response)) if response.status() == StatusCode::UNAUTHORIZED => {
                debug!("Rejected unauthenticated upgrade from {}", peer_addr);
                return Err(AppError::Unauthorized);
            }
            Err(e) => return Err(e.into()),
        };
    let Some(user_id) = authorized else {
        return Err(AppError::Unauthorized);
    };

    let (ws_sender, ws_receiver) = ws_stream.split();

    // Create the bounded queue for hub -> client frames
    let (frame_tx, frame_rx) = mpsc::channel::<Frame>(config.connection.queue_capacity);
    let handle = ConnectionHandle::new(ConnectionId::new(), user_id, frame_tx);
    let session = handle.session();

    hub.register(handle).await?;
    info!(
        user_id = %user_id,
        connection_id = %session.connection_id,
        "Client connected from {}", peer_addr
    );

    let mut read_task = tokio::spawn(read_loop(
        ws_receiver,
        hub.clone(),
        session,
        config.connection.pong_wait,
    ));
    let mut write_task = tokio::spawn(write_loop(
        ws_sender,
        frame_rx,
        session,
        config.connection.clone(),
    ));

    // Whichever pump stops first ends the connection
    tokio::select! {
        _ = &mut read_task => {
            debug!("Read task completed for {}", session.connection_id);
            write_task.abort();
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", session.connection_id);
            read_task.abort();
        }
    }

    hub.unregister(session.connection_id).await?;

    info!(
        user_id = %user_id,
        connection_id = %session.connection_id,
        "Client disconnected"
    );

    Ok(())
}

/// Resolve the upgrade request to a user, or build the refusal
fn authorize(
    req: &Request,
    ws_path: &str,
    sessions: &dyn SessionResolver,
) -> Result<UserId, ErrorResponse> {
    if req.uri().path() != ws_path {
        return Err(refusal(StatusCode::NOT_FOUND, "Not Found"));
    }

    let Some(token) = session_token(req) else {
        return Err(refusal(StatusCode::UNAUTHORIZED, "Unauthorized"));
    };

    match sessions.resolve(token) {
        Ok(Some(user_id)) => Ok(user_id),
        Ok(None) => Err(refusal(StatusCode::UNAUTHORIZED, "Unauthorized")),
        Err(e) => {
            error!("Session lookup failed: {}", e);
            Err(refusal(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"))
        }
    }
}

/// Extract the session token from the request cookies
fn session_token(req: &Request) -> Option<&str> {
    req.headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

fn refusal(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Inbound loop (WebSocket -> handlers)
///
/// Any frame refreshes the read deadline. Malformed envelopes are dropped
/// and the loop continues; transport errors and a missed deadline end it.
async fn read_loop(mut ws_receiver: WsSource, hub: Hub, session: Session, pong_wait: Duration) {
    loop {
        let next = match timeout(pong_wait, ws_receiver.next()).await {
            Ok(next) => next,
            Err(_) => {
                warn!(
                    user_id = %session.user_id,
                    "No frame or heartbeat within {:?}, closing", pong_wait
                );
                break;
            }
        };

        match next {
            Some(Ok(Message::Text(text))) => match ClientEvent::decode(&text) {
                Ok(event) => match events::dispatch(&hub, session, event).await {
                    Ok(()) => {}
                    Err(AppError::Store(e)) => {
                        error!(user_id = %session.user_id, "Event aborted: {}", e);
                    }
                    Err(e) => {
                        warn!(user_id = %session.user_id, "Event dropped: {}", e);
                    }
                },
                Err(e) => {
                    warn!("Invalid JSON from {}: {}", session.user_id, e);
                }
            },
            Some(Ok(Message::Close(_))) => {
                debug!("Client {} sent close frame", session.user_id);
                break;
            }
            Some(Ok(Message::Pong(_))) => {
                debug!("Pong from {}", session.user_id);
            }
            Some(Ok(Message::Ping(_))) => {
                // Pong is handled automatically by tungstenite
                debug!("Ping from {}", session.user_id);
            }
            Some(Ok(_)) => {
                debug!("Ignoring non-text frame from {}", session.user_id);
            }
            Some(Err(e)) => {
                warn!("WebSocket error for {}: {}", session.user_id, e);
                break;
            }
            None => break,
        }
    }
    debug!("Read task ended for {}", session.connection_id);
}

/// Outbound loop (queue -> WebSocket)
///
/// Frames are written strictly in queue order. A heartbeat ping goes out
/// every `ping_period`. A closed queue sends a close frame and stops.
async fn write_loop(
    mut ws_sender: WsSink,
    mut frames: mpsc::Receiver<Frame>,
    session: Session,
    config: ConnectionConfig,
) {
    let mut heartbeat = interval_at(Instant::now() + config.ping_period, config.ping_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    debug!("Queue closed for {}", session.connection_id);
                    // Send close frame when done
                    let _ = timeout(config.write_wait, ws_sender.close()).await;
                    break;
                };
                let message = Message::Text(frame.to_string());
                if let Err(e) = send_with_deadline(&mut ws_sender, message, config.write_wait).await {
                    debug!("WebSocket send failed for {}: {}", session.connection_id, e);
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = send_with_deadline(&mut ws_sender, Message::Ping(Vec::new()), config.write_wait).await {
                    debug!("Heartbeat failed for {}: {}", session.connection_id, e);
                    break;
                }
            }
        }
    }
    debug!("Write task ended for {}", session.connection_id);
}

async fn send_with_deadline(
    ws_sender: &mut WsSink,
    message: Message,
    write_wait: Duration,
) -> Result<(), AppError> {
    match timeout(write_wait, ws_sender.send(message)).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(AppError::WriteTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn request(uri: &str, cookie: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(()).unwrap()
    }

    fn sessions() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_user(UserId(1), "alice", "red");
        store.insert_session(
            "valid".to_string(),
            UserId(1),
            chrono::Utc::now() + chrono::Duration::hours(1),
        );
        store
    }

    #[test]
    fn test_session_token_parsing() {
        let req = request("/ws", Some("theme=dark; session_id=abc123; lang=en"));
        assert_eq!(session_token(&req), Some("abc123"));

        let req = request("/ws", Some("theme=dark"));
        assert_eq!(session_token(&req), None);

        let req = request("/ws", Some("session_id="));
        assert_eq!(session_token(&req), None);

        let req = request("/ws", None);
        assert_eq!(session_token(&req), None);
    }

    #[test]
    fn test_authorize_valid_session() {
        let store = sessions();
        let req = request("/ws", Some("session_id=valid"));
        assert_eq!(authorize(&req, "/ws", &store).unwrap(), UserId(1));
    }

    #[test]
    fn test_authorize_rejections() {
        let store = sessions();

        let req = request("/ws", Some("session_id=bogus"));
        let refused = authorize(&req, "/ws", &store).unwrap_err();
        assert_eq!(refused.status(), StatusCode::UNAUTHORIZED);

        let req = request("/ws", None);
        let refused = authorize(&req, "/ws", &store).unwrap_err();
        assert_eq!(refused.status(), StatusCode::UNAUTHORIZED);

        let req = request("/other", Some("session_id=valid"));
        let refused = authorize(&req, "/ws", &store).unwrap_err();
        assert_eq!(refused.status(), StatusCode::NOT_FOUND);
    }
}
