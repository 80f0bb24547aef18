use super::drain::drain;
use crate::error::{Result, WagerError};
use crate::game::{Game, PlayerEvent};
use crate::ledger::Ledger;
use crate::types::Player;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch};
use uuid::Uuid;

/// Where a subscription stands while its creation is persisted.
#[derive(Debug, Clone, PartialEq)]
enum Creation {
    Pending,
    Created,
    Failed(String),
}

/// A registered game. Entries stay hidden from lookups until the ledger has
/// persisted their creation.
pub(super) struct Entry {
    game: Arc<dyn Game>,
    live: bool,
    created: watch::Receiver<Creation>,
    closed: watch::Receiver<bool>,
}

/// Owns every live game: mediates membership changes through the ledger and
/// drives each game's event stream into it.
pub struct SessionRuntime {
    ledger: Arc<dyn Ledger>,
    games: Arc<RwLock<HashMap<Uuid, Entry>>>,
    shutdown: broadcast::Sender<()>,
}

impl SessionRuntime {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        let (shutdown, _) = broadcast::channel(1);

        Self {
            ledger,
            games: Arc::new(RwLock::new(HashMap::new())),
            shutdown,
        }
    }

    /// Starts `game`, persists its creation and registers it. Subscribing a
    /// game that is already registered is a no-op; a concurrent call for a
    /// game still being created waits for that creation and shares its
    /// outcome.
    pub async fn subscribe(&self, game: Arc<dyn Game>) -> Result<()> {
        let id = game.id();

        let (created_tx, created_rx) = watch::channel(Creation::Pending);
        let (closed_tx, closed_rx) = watch::channel(false);
        let registration = {
            let mut games = self.games.write();
            match games.get(&id) {
                Some(entry) => Err(entry.created.clone()),
                None => {
                    let updates = game.take_updates().ok_or_else(|| {
                        WagerError::internal(format!("Game {} stream already taken", id))
                    })?;

                    games.insert(
                        id,
                        Entry {
                            game: Arc::clone(&game),
                            live: false,
                            created: created_rx,
                            closed: closed_rx,
                        },
                    );
                    Ok(updates)
                }
            }
        };
        let updates = match registration {
            Ok(updates) => updates,
            Err(created) => return Self::await_creation(id, created).await,
        };

        if let Err(e) = game.start(self.shutdown.subscribe()).await {
            self.games.write().remove(&id);
            let _ = created_tx.send(Creation::Failed(e.to_string()));
            return Err(e);
        }

        let (gate_tx, gate_rx) = oneshot::channel();
        tokio::spawn(drain(
            Arc::clone(&self.ledger),
            Arc::clone(&game),
            updates,
            gate_rx,
            Arc::clone(&self.games),
            closed_tx,
        ));

        if let Err(e) = self.ledger.create_game(&game.info()).await {
            tracing::warn!("Cant create game {}: {}", id, e);
            self.games.write().remove(&id);
            if let Err(abort_err) = game.abort().await {
                tracing::error!("Cant abort game {}: {}", id, abort_err);
            }
            let _ = gate_tx.send(false);
            let _ = created_tx.send(Creation::Failed(e.to_string()));
            return Err(e);
        }

        if let Some(entry) = self.games.write().get_mut(&id) {
            entry.live = true;
        }
        let _ = gate_tx.send(true);
        let _ = created_tx.send(Creation::Created);

        tracing::info!(
            "Subscribed on game {} ({}) created by {}",
            id,
            game.game_type(),
            game.creator()
        );
        Ok(())
    }

    async fn await_creation(id: Uuid, mut created: watch::Receiver<Creation>) -> Result<()> {
        let outcome = created
            .wait_for(|creation| *creation != Creation::Pending)
            .await
            .map(|creation| (*creation).clone());

        match outcome {
            Ok(Creation::Failed(reason)) => Err(WagerError::CreationFailed(reason)),
            Ok(_) => Ok(()),
            // The first subscriber went away before creation settled.
            Err(_) => Err(WagerError::CreationFailed(format!(
                "subscription of game {} abandoned",
                id
            ))),
        }
    }

    pub fn get_game(&self, id: Uuid) -> Result<Arc<dyn Game>> {
        self.games
            .read()
            .get(&id)
            .filter(|entry| entry.live)
            .map(|entry| Arc::clone(&entry.game))
            .ok_or(WagerError::InvalidGameId)
    }

    pub async fn join_game(&self, game: &Arc<dyn Game>, player: Player) -> Result<Arc<dyn Game>> {
        let slot = game.reserve_slot().await?;
        let target = Arc::clone(game);
        let member = player.clone();

        self.ledger
            .join_game(
                &game.info(),
                &player,
                Box::pin(async move { target.add_player_in(slot, member).await }),
            )
            .await?;

        tracing::debug!("Player {} joined game {}", player, game.id());
        Ok(Arc::clone(game))
    }

    pub async fn join_game_with_action(
        &self,
        game: &Arc<dyn Game>,
        player: Player,
        action: PlayerEvent,
    ) -> Result<Arc<dyn Game>> {
        let slot = game.reserve_slot().await?;
        let target = Arc::clone(game);
        let member = player.clone();

        self.ledger
            .join_game(
                &game.info(),
                &player,
                Box::pin(async move {
                    target
                        .add_player_with_action_in(slot, member, action)
                        .await
                }),
            )
            .await?;

        tracing::debug!("Player {} joined game {} with action", player, game.id());
        Ok(Arc::clone(game))
    }

    pub async fn left_game(&self, game: &Arc<dyn Game>, player: Player) -> Result<Arc<dyn Game>> {
        let slot = game.reserve_slot().await?;
        let target = Arc::clone(game);
        let member = player.clone();

        self.ledger
            .leave_game(
                &game.info(),
                &player,
                Box::pin(async move { target.remove_player_in(slot, member).await }),
            )
            .await?;

        tracing::debug!("Player {} left game {}", player, game.id());
        Ok(Arc::clone(game))
    }

    pub async fn send_user_event(&self, game: &Arc<dyn Game>, event: PlayerEvent) -> Result<()> {
        game.send_user_event(event).await
    }

    /// Live games, in no particular order.
    pub fn list_of_games(&self) -> Vec<Arc<dyn Game>> {
        self.games
            .read()
            .values()
            .filter(|entry| entry.live)
            .map(|entry| Arc::clone(&entry.game))
            .collect()
    }

    /// Resolves once the game's stream has been drained and it has been
    /// deregistered. Unknown ids resolve immediately.
    pub async fn closed(&self, id: Uuid) {
        let receiver = self.games.read().get(&id).map(|entry| entry.closed.clone());

        if let Some(mut receiver) = receiver {
            // A dropped sender means the drain task is gone as well.
            let _ = receiver.wait_for(|closed| *closed).await;
        }
    }

    /// Aborts every started game; their streams close through the usual
    /// abort path.
    pub fn shutdown(&self) {
        let count = self.games.read().len();
        if self.shutdown.send(()).is_ok() {
            tracing::info!("Shutting down {} games", count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{
        Choice, GameEventKind, GameSettings, HighLowConfig, HighLowGame, PlayerChoiceEvent,
        RockPaperScissorsGame,
    };
    use crate::testing::{Call, RecordingLedger};
    use crate::types::GameState;
    use std::time::Duration;

    fn high_low(players: u8, millis: u64) -> Arc<dyn Game> {
        let config = HighLowConfig {
            settings: GameSettings {
                cost: 1.0,
                number_of_players: players,
                duration: Duration::from_millis(millis),
            },
            max_random: 100,
        };
        Arc::new(HighLowGame::new(config, Player::from("creator")).unwrap())
    }

    fn rps(millis: u64, creator: Choice) -> Arc<dyn Game> {
        let settings = GameSettings {
            cost: 1.0,
            number_of_players: 3,
            duration: Duration::from_millis(millis),
        };
        let action = PlayerEvent::with_payload(
            Player::from("creator"),
            &PlayerChoiceEvent::new(creator),
        )
        .unwrap();
        Arc::new(RockPaperScissorsGame::new(settings, Player::from("creator"), &action).unwrap())
    }

    fn runtime(ledger: &Arc<RecordingLedger>) -> SessionRuntime {
        SessionRuntime::new(Arc::clone(ledger) as Arc<dyn Ledger>)
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let ledger = Arc::new(RecordingLedger::default());
        let runtime = runtime(&ledger);
        let game = high_low(2, 60_000);

        runtime.subscribe(Arc::clone(&game)).await.unwrap();
        runtime.subscribe(Arc::clone(&game)).await.unwrap();

        let creates = ledger
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Create(_)))
            .count();
        assert_eq!(creates, 1);
        assert_eq!(runtime.list_of_games().len(), 1);
        assert_eq!(runtime.get_game(game.id()).unwrap().id(), game.id());

        runtime.shutdown();
        runtime.closed(game.id()).await;
        assert!(runtime.list_of_games().is_empty());
    }

    #[tokio::test]
    async fn test_failed_creation_is_not_registered() {
        let ledger = Arc::new(RecordingLedger::failing_create());
        let runtime = runtime(&ledger);
        let game = high_low(2, 60_000);

        assert!(runtime.subscribe(Arc::clone(&game)).await.is_err());
        assert!(matches!(
            runtime.get_game(game.id()),
            Err(WagerError::InvalidGameId)
        ));
        assert!(runtime.list_of_games().is_empty());

        // The aborted game still runs to its end behind the scenes.
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if matches!(
                    game.add_player(Player::from("bob")).await,
                    Err(WagerError::GameFinished)
                ) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ledger.calls().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_shares_failed_creation() {
        let ledger = Arc::new(RecordingLedger::slow_failing_create(Duration::from_millis(50)));
        let runtime = runtime(&ledger);
        let game = high_low(2, 60_000);

        let (first, second) = tokio::join!(
            runtime.subscribe(Arc::clone(&game)),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                runtime.subscribe(Arc::clone(&game)).await
            }
        );

        assert!(matches!(first, Err(WagerError::MaxGamesInProgress(0))));
        assert!(matches!(second, Err(WagerError::CreationFailed(_))));
        assert!(matches!(
            runtime.get_game(game.id()),
            Err(WagerError::InvalidGameId)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_shares_success() {
        let ledger = Arc::new(RecordingLedger::default());
        let runtime = runtime(&ledger);
        let game = high_low(2, 60_000);

        let (first, second) = tokio::join!(
            runtime.subscribe(Arc::clone(&game)),
            runtime.subscribe(Arc::clone(&game))
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(runtime.get_game(game.id()).unwrap().id(), game.id());

        runtime.shutdown();
        runtime.closed(game.id()).await;
    }

    #[tokio::test]
    async fn test_unknown_game_id() {
        let ledger = Arc::new(RecordingLedger::default());
        let runtime = runtime(&ledger);
        assert!(matches!(
            runtime.get_game(Uuid::new_v4()),
            Err(WagerError::InvalidGameId)
        ));
        runtime.closed(Uuid::new_v4()).await;
    }

    #[tokio::test]
    async fn test_high_low_end_to_end() {
        let ledger = Arc::new(RecordingLedger::default());
        let runtime = runtime(&ledger);
        let game = high_low(2, 200);
        let id = game.id();

        runtime.subscribe(Arc::clone(&game)).await.unwrap();
        let game = runtime.get_game(id).unwrap();
        runtime.join_game(&game, Player::from("bob")).await.unwrap();
        runtime.closed(id).await;

        let calls = ledger.calls();
        assert_eq!(calls[0], Call::Create(id));
        assert_eq!(calls.last(), Some(&Call::State(GameState::Finished)));

        let appended = ledger.appended();
        assert_eq!(appended[0], GameEventKind::Start);
        assert_eq!(appended.last(), Some(&GameEventKind::Finished));
        assert!(appended.contains(&GameEventKind::PlayerJoined));

        let payouts = calls
            .iter()
            .filter(|call| matches!(call, Call::Winners(_) | Call::UnlockAll))
            .count();
        assert_eq!(payouts, 1);
        let finished = calls
            .iter()
            .filter(|call| **call == Call::State(GameState::Finished))
            .count();
        assert_eq!(finished, 1);
        assert!(calls.contains(&Call::State(GameState::InProgress)));
        assert!(runtime.list_of_games().is_empty());
    }

    #[tokio::test]
    async fn test_choice_game_through_runtime() {
        let ledger = Arc::new(RecordingLedger::default());
        let runtime = runtime(&ledger);
        let game = rps(150, Choice::Rock);
        let id = game.id();

        runtime.subscribe(Arc::clone(&game)).await.unwrap();

        let plain = runtime.join_game(&game, Player::from("carol")).await;
        assert!(matches!(plain, Err(WagerError::InvalidAction)));

        let action = PlayerEvent::new(Player::from("bob"), br#"{"choice":"scissors"}"#.to_vec());
        runtime
            .join_game_with_action(&game, Player::from("bob"), action)
            .await
            .unwrap();
        assert!(matches!(
            runtime
                .send_user_event(&game, PlayerEvent::new(Player::from("bob"), b"{}".to_vec()))
                .await,
            Err(WagerError::InvalidAction)
        ));
        runtime.closed(id).await;

        assert!(ledger
            .calls()
            .contains(&Call::Winners(vec![Player::from("creator")])));
    }

    #[tokio::test]
    async fn test_leave_and_rejected_mutation() {
        let ledger = Arc::new(RecordingLedger::default());
        let runtime = runtime(&ledger);
        let game = high_low(3, 60_000);

        runtime.subscribe(Arc::clone(&game)).await.unwrap();
        runtime.join_game(&game, Player::from("bob")).await.unwrap();
        runtime.left_game(&game, Player::from("bob")).await.unwrap();
        assert_eq!(game.players().await, vec![Player::from("creator")]);

        assert!(matches!(
            runtime.left_game(&game, Player::from("creator")).await,
            Err(WagerError::CreatorCantLeave)
        ));

        let calls = ledger.calls();
        assert!(calls.contains(&Call::Join(Player::from("bob"))));
        assert!(calls.contains(&Call::Leave(Player::from("bob"))));
        assert!(!calls.contains(&Call::Leave(Player::from("creator"))));

        runtime.shutdown();
        runtime.closed(game.id()).await;
    }

    #[tokio::test]
    async fn test_shutdown_aborts_and_unlocks() {
        let ledger = Arc::new(RecordingLedger::default());
        let runtime = runtime(&ledger);
        let first = high_low(2, 60_000);
        let second = rps(60_000, Choice::Paper);

        runtime.subscribe(Arc::clone(&first)).await.unwrap();
        runtime.subscribe(Arc::clone(&second)).await.unwrap();
        assert_eq!(runtime.list_of_games().len(), 2);

        runtime.shutdown();
        runtime.closed(first.id()).await;
        runtime.closed(second.id()).await;

        let calls = ledger.calls();
        let errored = calls
            .iter()
            .filter(|call| **call == Call::State(GameState::Error))
            .count();
        let unlocked = calls.iter().filter(|call| **call == Call::UnlockAll).count();
        assert_eq!(errored, 2);
        assert_eq!(unlocked, 2);
        assert!(runtime.list_of_games().is_empty());
    }
}
