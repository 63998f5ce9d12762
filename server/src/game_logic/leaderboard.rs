use super::players::{PlayerDirectory, PlayerView};

/// Players by score descending. The sort is stable, so ties keep join order.
pub fn leaderboard(players: &PlayerDirectory) -> Vec<PlayerView> {
    let mut ordered: Vec<PlayerView> = players.iter().map(|p| p.view()).collect();
    ordered.sort_by(|a, b| b.score.cmp(&a.score));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_logic::players::JoinRequest;
    use uuid::Uuid;

    fn join(directory: &mut PlayerDirectory, id: &str) {
        directory.join(
            JoinRequest {
                player_id: id.to_string(),
                name: id.to_uppercase(),
                ..Default::default()
            },
            Uuid::new_v4(),
        );
    }

    #[test]
    fn orders_by_score_then_join_order() {
        let mut directory = PlayerDirectory::new();
        for id in ["first", "second", "third", "fourth"] {
            join(&mut directory, id);
        }
        directory.award("third", 2);
        directory.award("second", 1);
        directory.award("fourth", 1);

        let ids: Vec<String> = leaderboard(&directory)
            .into_iter()
            .map(|p| p.player_id)
            .collect();
        assert_eq!(ids, vec!["third", "second", "fourth", "first"]);
    }

    #[test]
    fn empty_directory_yields_empty_board() {
        assert!(leaderboard(&PlayerDirectory::new()).is_empty());
    }
}
