use axum::extract::ws;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

use crate::game_logic::{Audience, ConnectionId, Outbound, PlayerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Receives broadcasts but has not joined as a player.
    Viewer,
    Host,
    Player(PlayerId),
}

#[derive(Debug)]
pub struct ConnectionEntry {
    tx: mpsc::Sender<ws::Message>,
    pub role: ConnectionRole,
    pub connected_at: Instant,
    pub last_seen: Instant,
}

/// Transport connections attached to one session.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records inbound activity, registering the connection on first sight.
    pub fn touch(&mut self, connection_id: ConnectionId, tx: mpsc::Sender<ws::Message>) -> bool {
        let now = Instant::now();
        match self.entries.get_mut(&connection_id) {
            Some(entry) => {
                entry.last_seen = now;
                false
            }
            None => {
                self.entries.insert(
                    connection_id,
                    ConnectionEntry {
                        tx,
                        role: ConnectionRole::Viewer,
                        connected_at: now,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    /// Binds the connection to `player_id`, returning the player it spoke
    /// for before if that was someone else.
    pub fn bind_player(&mut self, connection_id: ConnectionId, player_id: &str) -> Option<PlayerId> {
        let entry = self.entries.get_mut(&connection_id)?;
        let previous = match &entry.role {
            ConnectionRole::Player(current) if current == player_id => return None,
            ConnectionRole::Player(current) => Some(current.clone()),
            ConnectionRole::Viewer | ConnectionRole::Host => None,
        };
        entry.role = ConnectionRole::Player(player_id.to_string());
        previous
    }

    pub fn bind_host(&mut self, connection_id: ConnectionId) {
        if let Some(entry) = self.entries.get_mut(&connection_id)
            && entry.role == ConnectionRole::Viewer
        {
            entry.role = ConnectionRole::Host;
        }
    }

    pub fn player_of(&self, connection_id: ConnectionId) -> Option<&PlayerId> {
        match &self.entries.get(&connection_id)?.role {
            ConnectionRole::Player(player_id) => Some(player_id),
            _ => None,
        }
    }

    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<ConnectionEntry> {
        self.entries.remove(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn host_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.role == ConnectionRole::Host)
            .count()
    }

    /// Serializes each message once and queues it for its audience in order.
    /// Never waits for queue space: a connection whose queue is full or whose
    /// writer has gone away is returned so the caller can detach it.
    pub fn deliver(&self, outbound: &[Outbound]) -> Vec<ConnectionId> {
        let mut dead = Vec::new();

        for item in outbound {
            let ws_msg = match item.message.to_ws_text() {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize outbound message");
                    continue;
                }
            };

            match item.audience {
                Audience::Everyone => {
                    for (connection_id, entry) in &self.entries {
                        if !dead.contains(connection_id)
                            && !Self::enqueue(*connection_id, entry, ws_msg.clone())
                        {
                            dead.push(*connection_id);
                        }
                    }
                }
                Audience::Connection(connection_id) => {
                    let Some(entry) = self.entries.get(&connection_id) else {
                        tracing::trace!(client.id = %connection_id, "Unicast target not registered");
                        continue;
                    };
                    if !dead.contains(&connection_id) && !Self::enqueue(connection_id, entry, ws_msg)
                    {
                        dead.push(connection_id);
                    }
                }
            }
        }

        dead
    }

    fn enqueue(connection_id: ConnectionId, entry: &ConnectionEntry, ws_msg: ws::Message) -> bool {
        match entry.tx.try_send(ws_msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    client.id = %connection_id,
                    connection.role = ?entry.role,
                    "Outbound queue full, dropping slow connection"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(client.id = %connection_id, "Delivery to closed connection");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_logic::ServerToClientMessage;
    use uuid::Uuid;

    fn registered(registry: &mut ConnectionRegistry) -> (ConnectionId, mpsc::Receiver<ws::Message>) {
        let (tx, rx) = mpsc::channel(8);
        let id = Uuid::new_v4();
        registry.touch(id, tx);
        (id, rx)
    }

    #[tokio::test]
    async fn unicast_reaches_only_its_target() {
        let mut registry = ConnectionRegistry::new();
        let (a, mut rx_a) = registered(&mut registry);
        let (_b, mut rx_b) = registered(&mut registry);

        let out = vec![Outbound {
            audience: Audience::Connection(a),
            message: ServerToClientMessage::AnswerReceived { question_index: 0 },
        }];
        assert!(registry.deliver(&out).is_empty());
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reports_closed_writers() {
        let mut registry = ConnectionRegistry::new();
        let (_live, mut rx_live) = registered(&mut registry);
        let (gone, rx_gone) = registered(&mut registry);
        drop(rx_gone);

        let out = vec![Outbound {
            audience: Audience::Everyone,
            message: ServerToClientMessage::PlayersUpdate {
                count: 1,
                connected: 1,
            },
        }];
        assert_eq!(registry.deliver(&out), vec![gone]);
        assert!(rx_live.try_recv().is_ok());
    }

    #[tokio::test]
    async fn full_queue_is_reported_without_waiting() {
        let mut registry = ConnectionRegistry::new();
        let (_live, mut rx_live) = registered(&mut registry);
        let (tx, _rx_stalled) = mpsc::channel(1);
        let stalled = Uuid::new_v4();
        registry.touch(stalled, tx);

        let update = Outbound {
            audience: Audience::Everyone,
            message: ServerToClientMessage::PlayersUpdate {
                count: 1,
                connected: 1,
            },
        };
        assert!(registry.deliver(std::slice::from_ref(&update)).is_empty());
        assert_eq!(registry.deliver(&[update]), vec![stalled]);
        assert!(rx_live.try_recv().is_ok());
        assert!(rx_live.try_recv().is_ok());
    }

    #[tokio::test]
    async fn rebinding_reports_previous_player() {
        let mut registry = ConnectionRegistry::new();
        let (conn, _rx) = registered(&mut registry);

        assert_eq!(registry.bind_player(conn, "p1"), None);
        assert_eq!(registry.bind_player(conn, "p1"), None);
        assert_eq!(registry.bind_player(conn, "p2"), Some("p1".to_string()));
        assert_eq!(registry.player_of(conn), Some(&"p2".to_string()));

        registry.bind_host(conn);
        assert_eq!(registry.host_count(), 0, "players are not promoted to host");
    }

    #[tokio::test]
    async fn touch_registers_once() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = Uuid::new_v4();
        assert!(registry.touch(id, tx.clone()));
        assert!(!registry.touch(id, tx));
        assert_eq!(registry.len(), 1);
        registry.bind_host(id);
        assert_eq!(registry.host_count(), 1);
        assert!(registry.remove(id).is_some());
        assert_eq!(registry.len(), 0);
    }
}
