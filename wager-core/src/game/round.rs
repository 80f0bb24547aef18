use super::{EventSlot, GameEvent, GameEventKind, GameSettings, Resolution};
use crate::error::{Result, WagerError};
use crate::types::{GameType, Player};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use uuid::Uuid;

/// Variant-specific resolution over the current player set.
pub(crate) trait Rules<T>: Send + Sync + 'static {
    fn resolve(&self, players: &BTreeMap<Player, T>) -> Result<Resolution>;

    /// Whether a resolved outcome is refunded instead of paid out.
    fn is_refund(
        &self,
        players: &BTreeMap<Player, T>,
        creator: &Player,
        resolution: &Resolution,
    ) -> bool;
}

/// The creator alone "won": not a real contest.
pub(crate) fn is_solo<T>(
    players: &BTreeMap<Player, T>,
    creator: &Player,
    resolution: &Resolution,
) -> bool {
    players.len() == 1 && resolution.winners.len() == 1 && resolution.winners[0] == *creator
}

struct Table<T> {
    players: BTreeMap<Player, T>,
    started: bool,
    finished: bool,
    abort: Option<oneshot::Sender<()>>,
    // Dropped when the loop exits, which closes the stream.
    updates: Option<mpsc::Sender<GameEvent>>,
}

/// State and lifecycle shared by both variants; `T` is what each player
/// committed when joining.
pub(crate) struct Round<T> {
    id: Uuid,
    game_type: GameType,
    settings: GameSettings,
    creator: Player,
    created_at: DateTime<Utc>,
    table: Mutex<Table<T>>,
    receiver: parking_lot::Mutex<Option<mpsc::Receiver<GameEvent>>>,
}

impl<T: Send + Sync + 'static> Round<T> {
    pub(crate) fn new(
        game_type: GameType,
        settings: GameSettings,
        creator: Player,
        creator_entry: T,
        buffer: usize,
    ) -> Result<Self> {
        if settings.number_of_players == 0 {
            return Err(WagerError::config("Number of players must be greater than 0"));
        }
        if buffer == 0 {
            return Err(WagerError::config("Event buffer must be greater than 0"));
        }

        let (updates, receiver) = mpsc::channel(buffer);
        let mut players = BTreeMap::new();
        players.insert(creator.clone(), creator_entry);

        Ok(Self {
            id: Uuid::new_v4(),
            game_type,
            settings,
            creator,
            created_at: Utc::now(),
            table: Mutex::new(Table {
                players,
                started: false,
                finished: false,
                abort: None,
                updates: Some(updates),
            }),
            receiver: parking_lot::Mutex::new(Some(receiver)),
        })
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn game_type(&self) -> GameType {
        self.game_type
    }

    pub(crate) fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub(crate) fn creator(&self) -> &Player {
        &self.creator
    }

    pub(crate) fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn take_updates(&self) -> Option<mpsc::Receiver<GameEvent>> {
        self.receiver.lock().take()
    }

    pub(crate) async fn players(&self) -> Vec<Player> {
        self.table.lock().await.players.keys().cloned().collect()
    }

    /// Reserves room for one event without holding the table lock.
    pub(crate) async fn reserve(&self) -> Result<EventSlot> {
        let updates = {
            let table = self.table.lock().await;
            if table.finished {
                return Err(WagerError::GameFinished);
            }
            Self::sender(&table)?
        };

        updates
            .reserve_owned()
            .await
            .map(EventSlot::new)
            .map_err(|_| WagerError::internal("event stream consumer gone"))
    }

    /// Adds `player`, building its entry with `entry` only once every
    /// membership check passed. Joining twice is a no-op.
    pub(crate) async fn join<F>(&self, slot: EventSlot, player: Player, entry: F) -> Result<()>
    where
        F: FnOnce() -> Result<T> + Send,
    {
        let mut table = self.table.lock().await;

        if player == self.creator {
            return Err(WagerError::CreatorCantLeave);
        }
        if table.finished {
            return Err(WagerError::GameFinished);
        }
        if !table.started {
            return Err(WagerError::NotStarted);
        }
        if table.players.contains_key(&player) {
            return Ok(());
        }
        if table.players.len() >= self.settings.number_of_players as usize {
            return Err(WagerError::MaxPlayers);
        }

        let value = entry()?;
        slot.send(GameEvent::new(
            self.id,
            GameEventKind::PlayerJoined,
            format!("player: {} join game", player),
            vec![player.clone()],
            None,
        ));
        table.players.insert(player.clone(), value);

        tracing::debug!("Player {} joined game {}", player, self.id);
        Ok(())
    }

    /// Removes `player`. Leaving a game one is not part of is a no-op.
    pub(crate) async fn leave(&self, slot: EventSlot, player: Player) -> Result<()> {
        let mut table = self.table.lock().await;

        if table.finished {
            return Err(WagerError::GameFinished);
        }
        if player == self.creator {
            return Err(WagerError::CreatorCantLeave);
        }
        if !table.started {
            return Err(WagerError::NotStarted);
        }
        if !table.players.contains_key(&player) {
            return Ok(());
        }

        slot.send(GameEvent::new(
            self.id,
            GameEventKind::PlayerLeft,
            format!("player: {} left game", player),
            vec![player.clone()],
            None,
        ));
        table.players.remove(&player);

        tracing::debug!("Player {} left game {}", player, self.id);
        Ok(())
    }

    pub(crate) async fn resolve<R: Rules<T>>(&self, rules: &R) -> Result<Resolution> {
        let table = self.table.lock().await;
        rules.resolve(&table.players)
    }

    pub(crate) async fn abort(&self) -> Result<()> {
        let mut table = self.table.lock().await;
        if let Some(abort) = table.abort.take() {
            let _ = abort.send(());
            tracing::info!("Game {} abort requested", self.id);
        }
        Ok(())
    }

    /// Emits `start` and spawns the timer loop. Idempotent.
    pub(crate) async fn start<R: Rules<T>>(
        self: &Arc<Self>,
        rules: Arc<R>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        if self.table.lock().await.started {
            return Ok(());
        }

        let slot = self.reserve().await?;
        let mut table = self.table.lock().await;
        if table.started {
            return Ok(());
        }

        let players = table.players.keys().cloned().collect();
        slot.send(GameEvent::new(
            self.id,
            GameEventKind::Start,
            "game is started",
            players,
            None,
        ));

        let (abort_tx, abort_rx) = oneshot::channel();
        table.started = true;
        table.abort = Some(abort_tx);
        drop(table);

        let round = Arc::clone(self);
        tokio::spawn(async move {
            round.run(rules, abort_rx, shutdown).await;
        });

        tracing::info!(
            "Game {} ({}) started for {:?}",
            self.id,
            self.game_type,
            self.settings.duration
        );
        Ok(())
    }

    async fn run<R: Rules<T>>(
        self: Arc<Self>,
        rules: Arc<R>,
        abort: oneshot::Receiver<()>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let cancelled = tokio::select! {
            _ = tokio::time::sleep(self.settings.duration) => false,
            _ = abort => true,
            _ = shutdown.recv() => true,
        };

        // Once `finished` is set nothing else is queued, so the terminal
        // events can be sent after the lock is released.
        let mut table = self.table.lock().await;
        table.finished = true;
        table.abort = None;
        let Some(updates) = table.updates.take() else {
            return;
        };

        let events = if cancelled {
            let players = table.players.keys().cloned().collect();
            vec![GameEvent::new(
                self.id,
                GameEventKind::Abort,
                "game is canceled",
                players,
                None,
            )]
        } else {
            self.conclude(rules.as_ref(), &table.players)
        };
        drop(table);

        for event in events {
            let kind = event.kind();
            if updates.send(event).await.is_err() {
                tracing::warn!("Game {} stream consumer gone before {:?}", self.id, kind);
                break;
            }
        }

        tracing::info!("Game {} closed", self.id);
    }

    fn conclude<R: Rules<T>>(&self, rules: &R, players: &BTreeMap<Player, T>) -> Vec<GameEvent> {
        let everyone: Vec<Player> = players.keys().cloned().collect();

        let resolution = match rules.resolve(players) {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::error!("Game {} cant resolve winners: {}", self.id, e);
                return vec![GameEvent::new(
                    self.id,
                    GameEventKind::Error,
                    "cant get game winners",
                    everyone,
                    None,
                )];
            }
        };

        let outcome = if rules.is_refund(players, &self.creator, &resolution) {
            GameEvent::new(
                self.id,
                GameEventKind::NoWinners,
                "no winners, money back",
                everyone.clone(),
                Some(resolution.metadata),
            )
        } else {
            GameEvent::new(
                self.id,
                GameEventKind::WinnersRevealed,
                "winners reveals",
                resolution.winners,
                Some(resolution.metadata),
            )
        };

        let finished = GameEvent::new(
            self.id,
            GameEventKind::Finished,
            "game is finished",
            everyone,
            None,
        );
        vec![outcome, finished]
    }

    fn sender(table: &Table<T>) -> Result<mpsc::Sender<GameEvent>> {
        table
            .updates
            .clone()
            .ok_or_else(|| WagerError::internal("event stream closed"))
    }
}

impl<T> fmt::Debug for Round<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Round")
            .field("id", &self.id)
            .field("game_type", &self.game_type)
            .field("creator", &self.creator)
            .field("settings", &self.settings)
            .finish()
    }
}
