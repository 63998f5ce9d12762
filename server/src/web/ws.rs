use axum::extract::{
    ConnectInfo, State,
    ws::{self, WebSocket, WebSocketUpgrade},
};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::game_logic::messages::{
    ClientToServerMessage, ServerToClientMessage, client_message_from_ws_text,
};
use crate::game_logic::{ConnectionId, GameError, GameId};
use crate::session::SessionHandle;
use crate::state::AppState;

const CLIENT_QUEUE_SIZE: usize = 64;

pub async fn ws_handler(
    ws_upgrade: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    tracing::debug!(client.addr = %peer, "WebSocket: Connection attempt");
    ws_upgrade.on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// Sessions this connection has talked to, so that each one hears about the
/// disconnect.
type SessionBindings = HashMap<GameId, SessionHandle>;

pub async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let connection_id: ConnectionId = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (client_tx, mut client_rx) = mpsc::channel::<ws::Message>(CLIENT_QUEUE_SIZE);

    tracing::info!(client.id = %connection_id, "WebSocket: Client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(message_to_send) = client_rx.recv().await {
            if ws_sender.send(message_to_send).await.is_err() {
                tracing::info!(
                    client.id = %connection_id,
                    "WS send error, client likely disconnected"
                );
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut bindings = SessionBindings::new();

    loop {
        tokio::select! {
            _ = &mut send_task => {
                tracing::debug!(client.id = %connection_id, "Send task finished, stopping receive loop");
                break;
            }
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(ws::Message::Text(text))) => {
                    tracing::trace!(client.id = %connection_id, event.raw = %text.as_str(), "Received text frame");
                    route_text(&app_state, connection_id, &client_tx, &mut bindings, text.as_str()).await;
                }
                Some(Ok(ws::Message::Binary(_))) => {
                    tracing::debug!(client.id = %connection_id, "Received binary message (ignored)");
                }
                Some(Ok(ws::Message::Ping(_))) | Some(Ok(ws::Message::Pong(_))) => {
                    tracing::trace!(client.id = %connection_id, "Received ping/pong");
                }
                Some(Ok(ws::Message::Close(_))) => {
                    tracing::info!(client.id = %connection_id, "WebSocket closed by client");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(client.id = %connection_id, error = %e, "WebSocket receive error");
                    break;
                }
                None => {
                    tracing::info!(client.id = %connection_id, "WebSocket stream ended");
                    break;
                }
            }
        }
    }

    send_task.abort();

    for (game_id, handle) in bindings {
        tracing::debug!(client.id = %connection_id, session.id = %game_id, "Notifying session of disconnect");
        handle.client_disconnected(connection_id).await;
    }
    tracing::info!(client.id = %connection_id, "WebSocket: Client fully disconnected");
}

/// Parses, authorizes and forwards one inbound frame. Failures go back to
/// this connection only.
async fn route_text(
    app_state: &AppState,
    connection_id: ConnectionId,
    client_tx: &mpsc::Sender<ws::Message>,
    bindings: &mut SessionBindings,
    text: &str,
) {
    let command = match client_message_from_ws_text(text) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!(client.id = %connection_id, error = %e, "Failed to deserialize client frame");
            let err = GameError::BadRequest(format!("Invalid message format: {}", e));
            send_error(client_tx, connection_id, &err).await;
            return;
        }
    };

    if let Some(token) = command.admin_token()
        && !token.is_some_and(|t| app_state.is_admin_token(t))
    {
        tracing::warn!(
            client.id = %connection_id,
            event.type = command.event_name(),
            session.id = %command.game_id(),
            "Rejected admin command with invalid token"
        );
        send_error(client_tx, connection_id, &GameError::Unauthorized).await;
        return;
    }

    let game_id = command.game_id().clone();
    let handle = match resolve_session(app_state, bindings, &command).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::debug!(client.id = %connection_id, session.id = %game_id, error = %e, "Session lookup failed");
            send_error(client_tx, connection_id, &e).await;
            return;
        }
    };

    match handle
        .send_command(connection_id, client_tx.clone(), command)
        .await
    {
        Ok(()) => {
            bindings.insert(game_id, handle);
        }
        Err(e) => {
            bindings.remove(&game_id);
            send_error(client_tx, connection_id, &e).await;
        }
    }
}

async fn resolve_session(
    app_state: &AppState,
    bindings: &SessionBindings,
    command: &ClientToServerMessage,
) -> Result<SessionHandle, GameError> {
    let game_id = command.game_id();
    if let Some(handle) = bindings.get(game_id)
        && handle.is_live()
    {
        return Ok(handle.clone());
    }

    match command {
        ClientToServerMessage::AdminInitGame(_) => {
            app_state
                .sessions
                .create_or_get_session(game_id.clone())
                .await
        }
        _ => app_state
            .sessions
            .get_session(game_id.clone())
            .await
            .ok_or_else(|| GameError::SessionNotFound(game_id.clone())),
    }
}

async fn send_error(client_tx: &mpsc::Sender<ws::Message>, connection_id: ConnectionId, err: &GameError) {
    match ServerToClientMessage::error(err).to_ws_text() {
        Ok(ws_msg) => {
            if client_tx.send(ws_msg).await.is_err() {
                tracing::debug!(client.id = %connection_id, "Failed to send error response to client");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize error response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::StaticCatalogSource;
    use crate::catalog::{CatalogParser, GameCatalogCache};
    use crate::config::GameRulesConfig;
    use crate::session::SessionRegistryHandle;
    use serde_json::Value;
    use std::collections::HashSet;
    use std::sync::Arc;

    const CATALOG: &str = r#"{"games": [{"id": 3, "name": "Raffle", "game_kind": "lottery"}]}"#;

    fn app_state() -> AppState {
        let snapshot = CatalogParser::parse_structured_data(CATALOG).unwrap();
        let catalog = Arc::new(GameCatalogCache::from_snapshot(
            snapshot,
            Box::new(StaticCatalogSource(CATALOG.to_string())),
        ));
        AppState {
            sessions: SessionRegistryHandle::spawn(4, catalog.clone(), GameRulesConfig::default()),
            catalog,
            admin_tokens: Arc::new(HashSet::from(["tok".to_string()])),
        }
    }

    struct Conn {
        id: ConnectionId,
        tx: mpsc::Sender<ws::Message>,
        rx: mpsc::Receiver<ws::Message>,
        bindings: SessionBindings,
    }

    impl Conn {
        fn new() -> Self {
            let (tx, rx) = mpsc::channel(32);
            Self {
                id: Uuid::new_v4(),
                tx,
                rx,
                bindings: SessionBindings::new(),
            }
        }

        async fn send(&mut self, state: &AppState, raw: &str) {
            route_text(state, self.id, &self.tx, &mut self.bindings, raw).await;
        }

        async fn next(&mut self) -> Value {
            match self.rx.recv().await {
                Some(ws::Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
                other => panic!("unexpected frame {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn malformed_frame_is_bad_request() {
        let state = app_state();
        let mut conn = Conn::new();
        conn.send(&state, "{not json").await;
        let frame = conn.next().await;
        assert_eq!(frame["event"], "ERROR");
        assert_eq!(frame["data"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn unauthorized_init_creates_no_session() {
        let state = app_state();
        let mut conn = Conn::new();
        conn.send(&state, r#"{"event":"ADMIN_INIT_GAME","data":{"gameId":3,"token":"nope"}}"#)
            .await;
        assert_eq!(conn.next().await["data"]["code"], "UNAUTHORIZED");
        conn.send(&state, r#"{"event":"ADMIN_INIT_GAME","data":{"gameId":3}}"#)
            .await;
        assert_eq!(conn.next().await["data"]["code"], "UNAUTHORIZED");

        assert!(state.sessions.list_sessions().await.is_empty());
        assert!(conn.bindings.is_empty());
    }

    #[tokio::test]
    async fn join_before_init_is_session_not_found() {
        let state = app_state();
        let mut conn = Conn::new();
        conn.send(
            &state,
            r#"{"event":"JOIN_GAME","data":{"gameId":3,"playerId":"p","name":"P"}}"#,
        )
        .await;
        assert_eq!(conn.next().await["data"]["code"], "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn init_then_join_binds_both_connections() {
        let state = app_state();
        let mut host = Conn::new();
        host.send(&state, r#"{"event":"ADMIN_INIT_GAME","data":{"gameId":"3","token":"tok"}}"#)
            .await;
        assert_eq!(host.next().await["event"], "GAME_STATE_SYNC");
        assert!(host.bindings.contains_key("3"));

        let mut player = Conn::new();
        player
            .send(
                &state,
                r#"{"event":"JOIN_GAME","data":{"gameId":3,"playerId":"p","name":"P"}}"#,
            )
            .await;
        assert_eq!(player.next().await["event"], "PLAYERS_UPDATE");
        assert!(player.bindings.contains_key("3"));

        let sessions = state.sessions.list_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].game_id, "3");
    }
}
