use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use super::{ConnectionId, PlayerId};

#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub connection_id: Option<ConnectionId>,
    pub name: String,
    pub avatar: String,
    pub extra: String,
    pub score: u32,
    pub joined_at: DateTime<Utc>,
}

impl Player {
    pub fn is_connected(&self) -> bool {
        self.connection_id.is_some()
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            player_id: self.id.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            extra: self.extra.clone(),
            score: self.score,
            connected: self.is_connected(),
        }
    }
}

/// Public projection of a player; never carries the connection handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub player_id: PlayerId,
    pub name: String,
    pub avatar: String,
    pub extra: String,
    pub score: u32,
    pub connected: bool,
}

#[derive(Debug, Clone, Default)]
pub struct JoinRequest {
    pub player_id: PlayerId,
    pub name: String,
    pub avatar: String,
    pub extra: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Rejoined,
}

/// Players of one session keyed by their stable id, kept in join order.
#[derive(Debug, Default)]
pub struct PlayerDirectory {
    players: IndexMap<PlayerId, Player>,
}

impl PlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, request: JoinRequest, connection_id: ConnectionId) -> JoinOutcome {
        if let Some(existing) = self.players.get_mut(&request.player_id) {
            existing.connection_id = Some(connection_id);
            if !request.name.trim().is_empty() {
                existing.name = request.name;
            }
            if !request.avatar.is_empty() {
                existing.avatar = request.avatar;
            }
            if !request.extra.trim().is_empty() {
                existing.extra = request.extra;
            }
            return JoinOutcome::Rejoined;
        }

        let player = Player {
            id: request.player_id.clone(),
            connection_id: Some(connection_id),
            name: request.name,
            avatar: request.avatar,
            extra: request.extra,
            score: 0,
            joined_at: Utc::now(),
        };
        self.players.insert(request.player_id, player);
        JoinOutcome::Joined
    }

    /// Marks the player absent, unless they already came back on a newer connection.
    pub fn leave(&mut self, player_id: &str, connection_id: ConnectionId) -> bool {
        match self.players.get_mut(player_id) {
            Some(player) if player.connection_id == Some(connection_id) => {
                player.connection_id = None;
                true
            }
            _ => false,
        }
    }

    pub fn award(&mut self, player_id: &str, points: u32) -> Option<u32> {
        let player = self.players.get_mut(player_id)?;
        player.score = player.score.saturating_add(points);
        Some(player.score)
    }

    pub fn get(&self, player_id: &str) -> Option<&Player> {
        self.players.get(player_id)
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.players.contains_key(player_id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn connected_count(&self) -> usize {
        self.players.values().filter(|p| p.is_connected()).count()
    }

    /// Iterates in join order.
    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn views<'a>(&'a self, ids: impl IntoIterator<Item = &'a PlayerId>) -> Vec<PlayerView> {
        ids.into_iter()
            .filter_map(|id| self.players.get(id))
            .map(Player::view)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn request(id: &str, name: &str) -> JoinRequest {
        JoinRequest {
            player_id: id.to_string(),
            name: name.to_string(),
            avatar: "🐶".to_string(),
            extra: "1234".to_string(),
        }
    }

    #[test]
    fn repeated_join_counts_once() {
        let mut directory = PlayerDirectory::new();
        let conn = Uuid::new_v4();
        assert_eq!(directory.join(request("p1", "Ana"), conn), JoinOutcome::Joined);
        for _ in 0..5 {
            assert_eq!(
                directory.join(request("p1", "Ana"), Uuid::new_v4()),
                JoinOutcome::Rejoined
            );
        }
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn rejoin_keeps_score_and_updates_connection() {
        let mut directory = PlayerDirectory::new();
        let first = Uuid::new_v4();
        directory.join(request("p1", "Ana"), first);
        directory.award("p1", 2);
        assert!(directory.leave("p1", first));
        assert_eq!(directory.connected_count(), 0);

        let second = Uuid::new_v4();
        directory.join(request("p1", "Ana María"), second);
        let player = directory.get("p1").unwrap();
        assert_eq!(player.score, 2);
        assert_eq!(player.name, "Ana María");
        assert_eq!(player.connection_id, Some(second));
    }

    #[test]
    fn rejoin_with_blank_fields_keeps_profile() {
        let mut directory = PlayerDirectory::new();
        directory.join(request("p1", "Ana"), Uuid::new_v4());
        directory.join(
            JoinRequest {
                player_id: "p1".to_string(),
                ..Default::default()
            },
            Uuid::new_v4(),
        );
        let player = directory.get("p1").unwrap();
        assert_eq!(player.name, "Ana");
        assert_eq!(player.extra, "1234");
    }

    #[test]
    fn stale_connection_leave_is_ignored() {
        let mut directory = PlayerDirectory::new();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        directory.join(request("p1", "Ana"), old);
        directory.join(request("p1", "Ana"), new);

        assert!(!directory.leave("p1", old));
        assert!(directory.get("p1").unwrap().is_connected());
    }

    #[test]
    fn iteration_follows_join_order() {
        let mut directory = PlayerDirectory::new();
        for id in ["c", "a", "b"] {
            directory.join(request(id, id), Uuid::new_v4());
        }
        let order: Vec<&str> = directory.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }
}
