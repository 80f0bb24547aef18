use super::round::{is_solo, Round, Rules};
use super::{EventSlot, Game, GameEvent, GameMetadata, GameSettings, PlayerEvent, Resolution};
use crate::config::DEFAULT_EVENT_BUFFER;
use crate::error::{Result, WagerError};
use crate::types::{GameType, Player};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighLowConfig {
    #[serde(flatten)]
    pub settings: GameSettings,
    /// Exclusive upper bound of every draw.
    pub max_random: u32,
}

/// Draws one number per player in `[0, max_random)`; everyone holding the
/// maximum wins.
pub fn draw_winners<R: Rng + ?Sized>(
    players: &[Player],
    max_random: u32,
    rng: &mut R,
) -> Result<Resolution> {
    if players.is_empty() {
        return Err(WagerError::incorrect_game("no players to draw for"));
    }
    if max_random == 0 {
        return Err(WagerError::config("max random must be greater than 0"));
    }

    let numbers: Vec<u32> = players.iter().map(|_| rng.gen_range(0..max_random)).collect();
    let max_number = numbers.iter().copied().max().unwrap_or_default();

    let winners = players
        .iter()
        .zip(&numbers)
        .filter(|(_, number)| **number == max_number)
        .map(|(player, _)| player.clone())
        .collect();

    let player_numbers: Vec<_> = players
        .iter()
        .zip(&numbers)
        .map(|(player, number)| json!({ "number": number, "player_id": player.id() }))
        .collect();

    let mut metadata = GameMetadata::new();
    metadata.insert("max_number".into(), json!(max_number));
    metadata.insert("player_numbers".into(), json!(player_numbers));

    Ok(Resolution { winners, metadata })
}

#[derive(Debug)]
struct HighLowRules {
    max_random: u32,
}

impl Rules<()> for HighLowRules {
    fn resolve(&self, players: &BTreeMap<Player, ()>) -> Result<Resolution> {
        let players: Vec<Player> = players.keys().cloned().collect();
        draw_winners(&players, self.max_random, &mut OsRng)
    }

    // Ties at the maximum are split, not refunded.
    fn is_refund(
        &self,
        players: &BTreeMap<Player, ()>,
        creator: &Player,
        resolution: &Resolution,
    ) -> bool {
        is_solo(players, creator, resolution)
    }
}

/// Numeric draw: players join without a payload, the highest draw wins.
#[derive(Debug)]
pub struct HighLowGame {
    round: Arc<Round<()>>,
    rules: Arc<HighLowRules>,
}

impl HighLowGame {
    pub fn new(config: HighLowConfig, creator: Player) -> Result<Self> {
        Self::with_buffer(config, creator, DEFAULT_EVENT_BUFFER)
    }

    pub fn with_buffer(config: HighLowConfig, creator: Player, buffer: usize) -> Result<Self> {
        if config.max_random == 0 {
            return Err(WagerError::config("max random must be greater than 0"));
        }

        let round = Round::new(GameType::HighLow, config.settings, creator, (), buffer)?;
        Ok(Self {
            round: Arc::new(round),
            rules: Arc::new(HighLowRules {
                max_random: config.max_random,
            }),
        })
    }

    pub fn max_random(&self) -> u32 {
        self.rules.max_random
    }
}

#[async_trait]
impl Game for HighLowGame {
    fn id(&self) -> Uuid {
        self.round.id()
    }

    fn game_type(&self) -> GameType {
        self.round.game_type()
    }

    fn cost(&self) -> f64 {
        self.round.settings().cost
    }

    fn duration(&self) -> Duration {
        self.round.settings().duration
    }

    fn creator(&self) -> &Player {
        self.round.creator()
    }

    fn max_players(&self) -> u8 {
        self.round.settings().number_of_players
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.round.created_at()
    }

    async fn players(&self) -> Vec<Player> {
        self.round.players().await
    }

    async fn reserve_slot(&self) -> Result<EventSlot> {
        self.round.reserve().await
    }

    async fn add_player_in(&self, slot: EventSlot, player: Player) -> Result<()> {
        self.round.join(slot, player, || Ok(())).await
    }

    async fn add_player_with_action_in(
        &self,
        _slot: EventSlot,
        _player: Player,
        _event: PlayerEvent,
    ) -> Result<()> {
        Err(WagerError::InvalidAction)
    }

    async fn remove_player_in(&self, slot: EventSlot, player: Player) -> Result<()> {
        self.round.leave(slot, player).await
    }

    async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        self.round.start(Arc::clone(&self.rules), shutdown).await
    }

    async fn abort(&self) -> Result<()> {
        self.round.abort().await
    }

    async fn resolve_winners(&self) -> Result<Resolution> {
        self.round.resolve(self.rules.as_ref()).await
    }

    async fn send_user_event(&self, _event: PlayerEvent) -> Result<()> {
        Err(WagerError::InvalidAction)
    }

    fn take_updates(&self) -> Option<mpsc::Receiver<GameEvent>> {
        self.round.take_updates()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameEventKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(players: u8, millis: u64, max_random: u32) -> HighLowConfig {
        HighLowConfig {
            settings: GameSettings {
                cost: 1.0,
                number_of_players: players,
                duration: Duration::from_millis(millis),
            },
            max_random,
        }
    }

    async fn next_kinds(updates: &mut mpsc::Receiver<GameEvent>) -> Vec<GameEventKind> {
        let mut kinds = Vec::new();
        while let Some(event) = updates.recv().await {
            kinds.push(event.kind());
        }
        kinds
    }

    #[test]
    fn test_draw_winners_are_the_maximum() {
        let players: Vec<Player> = ["a", "b", "c", "d"].into_iter().map(Player::from).collect();
        let mut rng = StdRng::seed_from_u64(7);

        let resolution = draw_winners(&players, 10, &mut rng).unwrap();
        let max = resolution.metadata["max_number"].as_u64().unwrap();
        let numbers = resolution.metadata["player_numbers"].as_array().unwrap();
        assert_eq!(numbers.len(), 4);

        let expected: Vec<String> = numbers
            .iter()
            .filter(|entry| entry["number"].as_u64() == Some(max))
            .map(|entry| entry["player_id"].as_str().unwrap().to_string())
            .collect();
        let winners: Vec<String> = resolution.winners.iter().map(|p| p.id().to_string()).collect();
        assert_eq!(winners, expected);
        assert!(numbers.iter().all(|entry| entry["number"].as_u64().unwrap() < 10));
    }

    #[test]
    fn test_draw_ties_are_all_winners() {
        let players: Vec<Player> = ["a", "b", "c"].into_iter().map(Player::from).collect();
        let mut rng = StdRng::seed_from_u64(1);

        let resolution = draw_winners(&players, 1, &mut rng).unwrap();
        assert_eq!(resolution.winners, players);
        assert_eq!(resolution.metadata["max_number"], json!(0));
    }

    #[test]
    fn test_draw_rejects_empty_set() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            draw_winners(&[], 100, &mut rng),
            Err(WagerError::IncorrectGame(_))
        ));
    }

    #[tokio::test]
    async fn test_membership_requires_start() {
        let game = HighLowGame::new(config(2, 50, 100), Player::from("creator")).unwrap();
        assert!(matches!(
            game.add_player(Player::from("bob")).await,
            Err(WagerError::NotStarted)
        ));
        let action = PlayerEvent::new(Player::from("bob"), b"{}".to_vec());
        assert!(matches!(
            game.add_player_with_action(Player::from("bob"), action).await,
            Err(WagerError::InvalidAction)
        ));
    }

    #[tokio::test]
    async fn test_creator_and_capacity_rules() {
        let (_tx, shutdown) = broadcast::channel(1);
        let game = HighLowGame::new(config(2, 60_000, 100), Player::from("creator")).unwrap();
        game.start(shutdown).await.unwrap();

        assert!(matches!(
            game.add_player(Player::from("creator")).await,
            Err(WagerError::CreatorCantLeave)
        ));
        assert!(matches!(
            game.remove_player(Player::from("creator")).await,
            Err(WagerError::CreatorCantLeave)
        ));

        game.add_player(Player::from("bob")).await.unwrap();
        game.add_player(Player::from("bob")).await.unwrap();
        assert!(matches!(
            game.add_player(Player::from("carol")).await,
            Err(WagerError::MaxPlayers)
        ));
        assert_eq!(game.players().await.len(), 2);

        game.remove_player(Player::from("dave")).await.unwrap();
        game.remove_player(Player::from("bob")).await.unwrap();
        assert_eq!(game.players().await, vec![Player::from("creator")]);

        game.abort().await.unwrap();
    }

    #[tokio::test]
    async fn test_event_sequence() {
        let (_tx, shutdown) = broadcast::channel(1);
        let game = HighLowGame::new(config(2, 50, 100), Player::from("creator")).unwrap();
        let mut updates = game.take_updates().unwrap();
        assert!(game.take_updates().is_none());

        game.start(shutdown).await.unwrap();
        game.add_player(Player::from("bob")).await.unwrap();

        let kinds = next_kinds(&mut updates).await;
        assert_eq!(kinds[0], GameEventKind::Start);
        assert_eq!(kinds[1], GameEventKind::PlayerJoined);
        assert_eq!(kinds[3], GameEventKind::Finished);
        assert_eq!(kinds.len(), 4);
        assert!(matches!(
            kinds[2],
            GameEventKind::WinnersRevealed | GameEventKind::NoWinners
        ));

        assert!(matches!(
            game.add_player(Player::from("carol")).await,
            Err(WagerError::GameFinished)
        ));
    }

    #[tokio::test]
    async fn test_solo_creator_is_refunded() {
        let (_tx, shutdown) = broadcast::channel(1);
        let game = HighLowGame::new(config(4, 20, 100), Player::from("creator")).unwrap();
        let mut updates = game.take_updates().unwrap();
        game.start(shutdown).await.unwrap();

        let kinds = next_kinds(&mut updates).await;
        assert_eq!(
            kinds,
            vec![
                GameEventKind::Start,
                GameEventKind::NoWinners,
                GameEventKind::Finished
            ]
        );
    }

    #[tokio::test]
    async fn test_abort_and_double_start() {
        let (_tx, shutdown) = broadcast::channel(1);
        let game = HighLowGame::new(config(4, 60_000, 100), Player::from("creator")).unwrap();
        let mut updates = game.take_updates().unwrap();
        game.start(shutdown.resubscribe()).await.unwrap();
        game.start(shutdown).await.unwrap();
        game.abort().await.unwrap();

        let kinds = next_kinds(&mut updates).await;
        assert_eq!(kinds, vec![GameEventKind::Start, GameEventKind::Abort]);
    }

    #[tokio::test]
    async fn test_shutdown_aborts() {
        let (tx, shutdown) = broadcast::channel(1);
        let game = HighLowGame::new(config(4, 60_000, 100), Player::from("creator")).unwrap();
        let mut updates = game.take_updates().unwrap();
        game.start(shutdown).await.unwrap();
        tx.send(()).unwrap();

        let kinds = next_kinds(&mut updates).await;
        assert_eq!(kinds.last(), Some(&GameEventKind::Abort));
    }

    #[tokio::test]
    async fn test_full_queue_blocks_no_lock() {
        let (_tx, shutdown) = broadcast::channel(1);
        let game = Arc::new(
            HighLowGame::with_buffer(config(4, 60_000, 100), Player::from("creator"), 1).unwrap(),
        );
        let mut updates = game.take_updates().unwrap();
        game.start(shutdown).await.unwrap();

        // `start` fills the queue: a join now waits for room.
        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            game.add_player(Player::from("bob")),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(game.players().await, vec![Player::from("creator")]);

        let waiting = {
            let game = Arc::clone(&game);
            tokio::spawn(async move { game.add_player(Player::from("carol")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let players = tokio::time::timeout(Duration::from_secs(1), game.players())
            .await
            .unwrap();
        assert_eq!(players.len(), 1);

        assert_eq!(updates.recv().await.unwrap().kind(), GameEventKind::Start);
        waiting.await.unwrap().unwrap();
        assert_eq!(
            updates.recv().await.unwrap().kind(),
            GameEventKind::PlayerJoined
        );
        assert_eq!(game.players().await.len(), 2);

        game.abort().await.unwrap();
        assert_eq!(updates.recv().await.unwrap().kind(), GameEventKind::Abort);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_respect_capacity() {
        let (_tx, shutdown) = broadcast::channel(1);
        let game = Arc::new(
            HighLowGame::new(config(4, 60_000, 100), Player::from("creator")).unwrap(),
        );
        game.start(shutdown).await.unwrap();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let game = Arc::clone(&game);
                tokio::spawn(async move { game.add_player(Player::new(format!("p{}", i))).await })
            })
            .collect();

        let mut joined = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => joined += 1,
                Err(WagerError::MaxPlayers) => rejected += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(joined, 3);
        assert_eq!(rejected, 7);
        let players = game.players().await;
        assert_eq!(players.len(), 4);
        assert!(players.contains(&Player::from("creator")));

        game.abort().await.unwrap();
    }
}
