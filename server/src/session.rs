use axum::extract::ws;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::catalog::{GameCatalogCache, GameDefinition};
use crate::config::GameRulesConfig;
use crate::connections::{ConnectionRegistry, ConnectionRole};
use crate::game_logic::messages::GameStateSync;
use crate::game_logic::players::JoinRequest;
use crate::game_logic::{
    Audience, ClientToServerMessage, ConnectionId, GameError, GameId, GameKind, GameSession,
    Outbound, Phase, ServerToClientMessage,
};

const SESSION_QUEUE_SIZE: usize = 64;

/// Distinguishes successive sessions that reuse the same game id.
pub type InstanceId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: Phase,
    pub game_kind: GameKind,
    pub player_count: usize,
    pub connected_count: usize,
}

impl SessionStatus {
    fn of(session: &GameSession) -> Self {
        Self {
            phase: session.phase(),
            game_kind: session.game_kind(),
            player_count: session.player_count(),
            connected_count: session.connected_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub game_id: GameId,
    pub instance_id: InstanceId,
    pub name: String,
    pub game_kind: GameKind,
    pub phase: Phase,
    pub player_count: usize,
    pub connected_count: usize,
}

#[derive(Debug)]
pub enum SessionMessage {
    Client {
        connection_id: ConnectionId,
        client_tx: mpsc::Sender<ws::Message>,
        command: ClientToServerMessage,
    },
    Disconnected {
        connection_id: ConnectionId,
    },
    Snapshot {
        respond_to: oneshot::Sender<GameStateSync>,
    },
    Shutdown,
}

enum Flow {
    Continue,
    Stop,
}

pub struct SessionActor {
    receiver: mpsc::Receiver<SessionMessage>,
    instance_id: InstanceId,
    session: GameSession,
    connections: ConnectionRegistry,
    status_tx: watch::Sender<SessionStatus>,
    registry: SessionRegistryHandle,
}

impl SessionActor {
    #[tracing::instrument(skip(self, msg), fields(
        session.id = %self.session.game_id(),
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    fn handle_message(&mut self, msg: SessionMessage) -> Flow {
        match msg {
            SessionMessage::Client {
                connection_id,
                client_tx,
                command,
            } => {
                if self.connections.touch(connection_id, client_tx) {
                    tracing::debug!(client.id = %connection_id, "Connection attached to session");
                }
                tracing::debug!(
                    client.id = %connection_id,
                    event.type = command.event_name(),
                    "Processing command"
                );

                let out = match self.apply(connection_id, command) {
                    Ok(out) => out,
                    Err(e) => {
                        tracing::info!(client.id = %connection_id, error = %e, "Command rejected");
                        vec![Outbound {
                            audience: Audience::Connection(connection_id),
                            message: ServerToClientMessage::error(&e),
                        }]
                    }
                };
                self.deliver(out);
            }
            SessionMessage::Disconnected { connection_id } => {
                let out = self.detach(connection_id);
                self.deliver(out);
            }
            SessionMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.session.snapshot());
            }
            SessionMessage::Shutdown => {
                tracing::info!("Session destroyed by registry");
                let notice = ServerToClientMessage::error(&GameError::SessionNotFound(
                    self.session.game_id().clone(),
                ));
                self.deliver(vec![Outbound {
                    audience: Audience::Everyone,
                    message: notice,
                }]);
                return Flow::Stop;
            }
        }

        if self.session.is_finished() {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    fn apply(
        &mut self,
        connection_id: ConnectionId,
        command: ClientToServerMessage,
    ) -> Result<Vec<Outbound>, GameError> {
        match command {
            ClientToServerMessage::JoinGame(payload) => {
                let player_id = payload.player_id.clone();
                let joined = self.session.join(
                    connection_id,
                    JoinRequest {
                        player_id: payload.player_id,
                        name: payload.name,
                        avatar: payload.avatar,
                        extra: payload.extra,
                    },
                )?;
                let mut out = joined;
                if let Some(previous) = self.connections.bind_player(connection_id, &player_id) {
                    out.extend(self.session.leave(&previous, connection_id));
                }
                Ok(out)
            }
            ClientToServerMessage::SubmitAnswer(payload) => {
                let Some(player_id) = self.connections.player_of(connection_id).cloned() else {
                    tracing::debug!(client.id = %connection_id, "Answer from connection without player");
                    return Ok(Vec::new());
                };
                Ok(self
                    .session
                    .submit_answer(&player_id, connection_id, payload.option_index))
            }
            ClientToServerMessage::RequestSync(_) => Ok(self.session.sync_for(connection_id)),
            ClientToServerMessage::AdminInitGame(_) => {
                self.connections.bind_host(connection_id);
                self.session.attach_host(connection_id)
            }
            ClientToServerMessage::AdminStartQuestion(payload) => {
                self.connections.bind_host(connection_id);
                self.session
                    .start_question(connection_id, payload.question_index)
            }
            ClientToServerMessage::AdminCloseQuestion(_) => {
                self.connections.bind_host(connection_id);
                self.session.close_question(connection_id)
            }
            ClientToServerMessage::AdminAdvance(_) => {
                self.connections.bind_host(connection_id);
                self.session.advance(connection_id)
            }
            ClientToServerMessage::AdminStartLottery(_) => {
                self.connections.bind_host(connection_id);
                self.session.start_lottery(connection_id)
            }
            ClientToServerMessage::AdminFinishGame(_) => {
                self.connections.bind_host(connection_id);
                self.session.finish(connection_id)
            }
        }
    }

    fn detach(&mut self, connection_id: ConnectionId) -> Vec<Outbound> {
        let Some(entry) = self.connections.remove(connection_id) else {
            return Vec::new();
        };
        tracing::debug!(
            client.id = %connection_id,
            connection.role = ?entry.role,
            connection.age_secs = entry.connected_at.elapsed().as_secs(),
            connection.idle_secs = entry.last_seen.elapsed().as_secs(),
            connections.remaining = self.connections.len(),
            "Connection detached from session"
        );
        match entry.role {
            ConnectionRole::Player(player_id) => self.session.leave(&player_id, connection_id),
            ConnectionRole::Viewer | ConnectionRole::Host => Vec::new(),
        }
    }

    /// Fans out deliveries; connections found closed or backed up are
    /// detached, which may produce further deliveries.
    fn deliver(&mut self, mut out: Vec<Outbound>) {
        while !out.is_empty() {
            let dead = self.connections.deliver(&out);
            out = dead
                .into_iter()
                .flat_map(|connection_id| self.detach(connection_id))
                .collect();
        }
        self.status_tx.send_replace(SessionStatus::of(&self.session));
    }

    fn on_deadline(&mut self) {
        tracing::debug!("Session deadline elapsed");
        let out = self.session.deadline_elapsed();
        self.deliver(out);
    }
}

#[tracing::instrument(skip(actor), fields(
    session.id = %actor.session.game_id(),
    session.instance = %actor.instance_id,
    game.kind = ?actor.session.game_kind()
))]
pub async fn run_session_actor(mut actor: SessionActor) {
    tracing::info!("Session actor started");

    loop {
        let deadline = actor.session.deadline();
        tokio::select! {
            maybe_msg = actor.receiver.recv() => {
                match maybe_msg {
                    Some(msg) => {
                        if let Flow::Stop = actor.handle_message(msg) {
                            tracing::info!("Session stop requested by message handler");
                            break;
                        }
                    }
                    None => {
                        tracing::info!("Session channel closed. Shutting down");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                actor.on_deadline();
            }
        }
    }

    actor.receiver.close();
    actor.status_tx.send_replace(SessionStatus::of(&actor.session));
    tracing::info!(
        hosts = actor.connections.host_count(),
        connections = actor.connections.len(),
        "Session actor stopping"
    );

    let game_id = actor.session.game_id().clone();
    if let Err(e) = actor
        .registry
        .notify_session_stopped(game_id, actor.instance_id)
        .await
    {
        tracing::error!(error = %e, "Failed to notify registry of session stop");
    }
}

#[derive(Clone, Debug)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    status: watch::Receiver<SessionStatus>,
    pub game_id: GameId,
    pub instance_id: InstanceId,
    pub name: String,
}

impl SessionHandle {
    pub fn spawn(
        definition: &GameDefinition,
        rules: &GameRulesConfig,
        buffer_size: usize,
        registry: SessionRegistryHandle,
    ) -> Self {
        Self::spawn_session(GameSession::new(definition, rules), definition, buffer_size, registry)
    }

    fn spawn_session(
        session: GameSession,
        definition: &GameDefinition,
        buffer_size: usize,
        registry: SessionRegistryHandle,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let (status_tx, status) = watch::channel(SessionStatus::of(&session));
        let instance_id = Uuid::new_v4();
        let actor = SessionActor {
            receiver,
            instance_id,
            session,
            connections: ConnectionRegistry::new(),
            status_tx,
            registry,
        };
        tokio::spawn(run_session_actor(actor));
        Self {
            sender,
            status,
            game_id: definition.id.clone(),
            instance_id,
            name: definition.name.clone(),
        }
    }

    /// A finished session, or one whose actor is gone, counts as absent.
    pub fn is_live(&self) -> bool {
        !self.sender.is_closed() && self.status.borrow().phase != Phase::Finished
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn summary(&self) -> SessionSummary {
        let status = self.status();
        SessionSummary {
            game_id: self.game_id.clone(),
            instance_id: self.instance_id,
            name: self.name.clone(),
            game_kind: status.game_kind,
            phase: status.phase,
            player_count: status.player_count,
            connected_count: status.connected_count,
        }
    }

    pub async fn send_command(
        &self,
        connection_id: ConnectionId,
        client_tx: mpsc::Sender<ws::Message>,
        command: ClientToServerMessage,
    ) -> Result<(), GameError> {
        self.sender
            .send(SessionMessage::Client {
                connection_id,
                client_tx,
                command,
            })
            .await
            .map_err(|_| GameError::SessionNotFound(self.game_id.clone()))
    }

    pub async fn client_disconnected(&self, connection_id: ConnectionId) {
        if self
            .sender
            .send(SessionMessage::Disconnected { connection_id })
            .await
            .is_err()
        {
            tracing::debug!(session.id = %self.game_id, "Session already stopped on disconnect");
        }
    }

    pub async fn snapshot(&self) -> Option<GameStateSync> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Snapshot { respond_to })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn shutdown(&self) {
        if self.sender.send(SessionMessage::Shutdown).await.is_err() {
            tracing::debug!(session.id = %self.game_id, "Session already stopped");
        }
    }
}

#[derive(Debug)]
pub enum SessionRegistryMessage {
    CreateOrGetSession {
        game_id: GameId,
        respond_to: oneshot::Sender<Result<SessionHandle, GameError>>,
    },
    GetSession {
        game_id: GameId,
        respond_to: oneshot::Sender<Option<SessionHandle>>,
    },
    DestroySession {
        game_id: GameId,
        respond_to: oneshot::Sender<bool>,
    },
    ListSessions {
        respond_to: oneshot::Sender<Vec<SessionSummary>>,
    },
    SessionStopped {
        game_id: GameId,
        instance_id: InstanceId,
    },
}

pub struct SessionRegistryActor {
    receiver: mpsc::Receiver<SessionRegistryMessage>,
    self_sender: mpsc::Sender<SessionRegistryMessage>,
    sessions: HashMap<GameId, SessionHandle>,
    catalog: Arc<GameCatalogCache>,
    rules: GameRulesConfig,
}

impl SessionRegistryActor {
    fn live(&mut self, game_id: &str) -> Option<SessionHandle> {
        match self.sessions.get(game_id) {
            Some(handle) if handle.is_live() => Some(handle.clone()),
            Some(_) => {
                tracing::debug!(session.id = %game_id, "Dropping stale session handle");
                self.sessions.remove(game_id);
                None
            }
            None => None,
        }
    }

    #[tracing::instrument(skip(self, msg), fields(
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    async fn handle_message(&mut self, msg: SessionRegistryMessage) {
        match msg {
            SessionRegistryMessage::CreateOrGetSession {
                game_id,
                respond_to,
            } => {
                if let Some(existing) = self.live(&game_id) {
                    tracing::debug!(session.id = %game_id, "Returning existing session");
                    let _ = respond_to.send(Ok(existing));
                    return;
                }

                let Some(definition) = self.catalog.game(&game_id).await else {
                    tracing::warn!(session.id = %game_id, "Game not found in catalog");
                    let _ = respond_to.send(Err(GameError::SessionNotFound(game_id)));
                    return;
                };

                let registry = SessionRegistryHandle {
                    sender: self.self_sender.clone(),
                };
                let handle =
                    SessionHandle::spawn(&definition, &self.rules, SESSION_QUEUE_SIZE, registry);
                tracing::info!(
                    session.id = %game_id,
                    session.instance = %handle.instance_id,
                    game.kind = ?definition.game_kind,
                    questions.count = definition.questions.len(),
                    "Created session"
                );
                self.sessions.insert(game_id, handle.clone());
                let _ = respond_to.send(Ok(handle));
            }
            SessionRegistryMessage::GetSession {
                game_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.live(&game_id));
            }
            SessionRegistryMessage::DestroySession {
                game_id,
                respond_to,
            } => match self.sessions.remove(&game_id) {
                Some(handle) => {
                    tracing::info!(session.id = %game_id, "Destroying session");
                    handle.shutdown().await;
                    let _ = respond_to.send(true);
                }
                None => {
                    let _ = respond_to.send(false);
                }
            },
            SessionRegistryMessage::ListSessions { respond_to } => {
                self.sessions.retain(|_, handle| handle.is_live());
                let mut summaries: Vec<SessionSummary> =
                    self.sessions.values().map(SessionHandle::summary).collect();
                summaries.sort_by(|a, b| a.game_id.cmp(&b.game_id));
                let _ = respond_to.send(summaries);
            }
            SessionRegistryMessage::SessionStopped {
                game_id,
                instance_id,
            } => match self.sessions.get(&game_id) {
                Some(handle) if handle.instance_id == instance_id => {
                    self.sessions.remove(&game_id);
                    tracing::info!(session.id = %game_id, "Cleaning up session after actor stop");
                }
                Some(_) => {
                    tracing::debug!(
                        session.id = %game_id,
                        session.instance = %instance_id,
                        "Ignoring stop notice from replaced session"
                    );
                }
                None => {
                    tracing::debug!(session.id = %game_id, "Stop notice for unknown session");
                }
            },
        }
    }
}

#[tracing::instrument(skip(actor))]
pub async fn run_session_registry(mut actor: SessionRegistryActor) {
    tracing::info!("Session registry started");
    while let Some(msg) = actor.receiver.recv().await {
        actor.handle_message(msg).await;
    }
    tracing::info!("Session registry stopped");
}

#[derive(Clone, Debug)]
pub struct SessionRegistryHandle {
    sender: mpsc::Sender<SessionRegistryMessage>,
}

impl SessionRegistryHandle {
    pub fn spawn(buffer_size: usize, catalog: Arc<GameCatalogCache>, rules: GameRulesConfig) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = SessionRegistryActor {
            receiver,
            self_sender: sender.clone(),
            sessions: HashMap::new(),
            catalog,
            rules,
        };
        tokio::spawn(run_session_registry(actor));
        Self { sender }
    }

    pub async fn create_or_get_session(&self, game_id: GameId) -> Result<SessionHandle, GameError> {
        let (respond_to, rx) = oneshot::channel();
        let not_found = GameError::SessionNotFound(game_id.clone());
        if let Err(e) = self
            .sender
            .send(SessionRegistryMessage::CreateOrGetSession {
                game_id,
                respond_to,
            })
            .await
        {
            tracing::error!(error = %e, "Failed to send CreateOrGetSession");
            return Err(not_found);
        }
        rx.await.map_err(|e| {
            tracing::error!(error = %e, "Session registry gave no response");
            not_found
        })?
    }

    pub async fn get_session(&self, game_id: GameId) -> Option<SessionHandle> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(SessionRegistryMessage::GetSession {
                game_id,
                respond_to,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    pub async fn destroy_session(&self, game_id: GameId) -> bool {
        let (respond_to, rx) = oneshot::channel();
        if self
            .sender
            .send(SessionRegistryMessage::DestroySession {
                game_id,
                respond_to,
            })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let (respond_to, rx) = oneshot::channel();
        if self
            .sender
            .send(SessionRegistryMessage::ListSessions { respond_to })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn notify_session_stopped(
        &self,
        game_id: GameId,
        instance_id: InstanceId,
    ) -> Result<(), String> {
        self.sender
            .send(SessionRegistryMessage::SessionStopped {
                game_id,
                instance_id,
            })
            .await
            .map_err(|e| format!("Failed to send SessionStopped: {}", e))
    }
}
