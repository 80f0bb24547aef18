use crate::game::{Game, GameEvent, GameEventKind, GameInfo};
use crate::ledger::Ledger;
use crate::types::GameState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use super::runtime::Entry;

/// Consumes one game's stream until it closes, then deregisters the game.
///
/// Nothing is consumed before `gate` resolves. `false` (or a dropped gate)
/// means creation was never persisted: the stream is still drained so the
/// game loop can finish, but no event reaches the ledger.
pub(super) async fn drain(
    ledger: Arc<dyn Ledger>,
    game: Arc<dyn Game>,
    mut updates: mpsc::Receiver<GameEvent>,
    gate: oneshot::Receiver<bool>,
    games: Arc<RwLock<HashMap<Uuid, Entry>>>,
    closed: watch::Sender<bool>,
) {
    let persist = gate.await.unwrap_or(false);
    let info = game.info();

    while let Some(event) = updates.recv().await {
        if persist {
            apply(ledger.as_ref(), &info, &event).await;
        } else {
            tracing::debug!(
                "Discarding {} event of unpersisted game {}",
                event.kind().as_str(),
                info.id
            );
        }
    }

    games.write().remove(&info.id);
    let _ = closed.send(true);
    tracing::info!("Game {} drained and deregistered", info.id);
}

/// Persists `event` and applies its ledger side effect. Failures are
/// logged; the next event is processed regardless.
pub(super) async fn apply(ledger: &dyn Ledger, info: &GameInfo, event: &GameEvent) {
    if event.is_public() {
        if let Err(e) = ledger.append_event(info, event).await {
            tracing::error!("Cant append event to game {}: {}", info.id, e);
        }
    }

    match event.kind() {
        GameEventKind::Start => change_state(ledger, info, GameState::InProgress).await,
        GameEventKind::NoWinners => unlock_all(ledger, info).await,
        GameEventKind::WinnersRevealed => {
            if let Err(e) = ledger.store_winners(info, event.players()).await {
                tracing::error!("Cant store winners of game {}: {}", info.id, e);
            }
        }
        GameEventKind::Finished => change_state(ledger, info, GameState::Finished).await,
        GameEventKind::Abort | GameEventKind::Error => {
            change_state(ledger, info, GameState::Error).await;
            unlock_all(ledger, info).await;
        }
        // Membership is persisted by the join/leave path itself.
        GameEventKind::PlayerJoined | GameEventKind::PlayerLeft | GameEventKind::Update => {}
    }
}

async fn change_state(ledger: &dyn Ledger, info: &GameInfo, state: GameState) {
    if let Err(e) = ledger.change_game_state(info, state).await {
        tracing::error!("Cant update game {} state to {}: {}", info.id, state, e);
    }
}

async fn unlock_all(ledger: &dyn Ledger, info: &GameInfo) {
    if let Err(e) = ledger.unlock_all_players(info).await {
        tracing::error!("Cant unlock players of game {}: {}", info.id, e);
    }
}
