use super::round::{is_solo, Round, Rules};
use super::{EventSlot, Game, GameEvent, GameMetadata, GameSettings, PlayerEvent, Resolution};
use crate::config::DEFAULT_EVENT_BUFFER;
use crate::error::{Result, WagerError};
use crate::types::{GameType, Player};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// The choice game has no settings beyond the shared ones.
pub type RockPaperScissorsConfig = GameSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "ChoiceRepr")]
pub enum Choice {
    Rock,
    Paper,
    Scissors,
}

/// Wire forms accepted for a choice: its index or its name.
#[derive(Deserialize)]
#[serde(untagged)]
enum ChoiceRepr {
    Index(u64),
    Name(String),
}

impl TryFrom<ChoiceRepr> for Choice {
    type Error = String;

    fn try_from(repr: ChoiceRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            ChoiceRepr::Index(0) => Ok(Choice::Rock),
            ChoiceRepr::Index(1) => Ok(Choice::Paper),
            ChoiceRepr::Index(2) => Ok(Choice::Scissors),
            ChoiceRepr::Index(other) => Err(format!("unknown choice index {}", other)),
            ChoiceRepr::Name(name) => name.parse(),
        }
    }
}

impl Choice {
    pub const ALL: [Choice; 3] = [Choice::Rock, Choice::Paper, Choice::Scissors];

    /// The choice that beats this one.
    pub fn counter(&self) -> Choice {
        match self {
            Choice::Rock => Choice::Paper,
            Choice::Paper => Choice::Scissors,
            Choice::Scissors => Choice::Rock,
        }
    }

    /// The choice this one beats.
    pub fn beats(&self) -> Choice {
        match self {
            Choice::Rock => Choice::Scissors,
            Choice::Paper => Choice::Rock,
            Choice::Scissors => Choice::Paper,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Choice::Rock => "rock",
            Choice::Paper => "paper",
            Choice::Scissors => "scissors",
        }
    }
}

impl FromStr for Choice {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rock" | "0" => Ok(Choice::Rock),
            "paper" | "1" => Ok(Choice::Paper),
            "scissors" | "2" => Ok(Choice::Scissors),
            other => Err(format!("unknown choice {}", other)),
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a join: `{"choice": "rock"}` or `{"choice": 0}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerChoiceEvent {
    pub choice: Choice,
}

impl PlayerChoiceEvent {
    pub fn new(choice: Choice) -> Self {
        Self { choice }
    }
}

pub fn parse_action(event: &PlayerEvent) -> Result<PlayerChoiceEvent> {
    serde_json::from_slice(event.raw()).map_err(|_| WagerError::InvalidAction)
}

/// Cyclic dominance over any number of players. One distinct choice, or
/// all three, is a draw where everybody wins; with two distinct choices the
/// one whose counter is absent wins.
pub fn find_winners(players: &[(Player, Choice)]) -> Vec<Player> {
    if players.len() == 1 {
        return vec![players[0].0.clone()];
    }

    let present: HashSet<Choice> = players.iter().map(|(_, choice)| *choice).collect();
    if present.len() == 1 || present.len() == 3 {
        return players.iter().map(|(player, _)| player.clone()).collect();
    }

    let Some(dominant) = Choice::ALL
        .into_iter()
        .find(|choice| present.contains(choice) && !present.contains(&choice.counter()))
    else {
        return Vec::new();
    };

    players
        .iter()
        .filter(|(_, choice)| *choice == dominant)
        .map(|(player, _)| player.clone())
        .collect()
}

#[derive(Debug)]
struct RockPaperScissorsRules;

impl Rules<Choice> for RockPaperScissorsRules {
    fn resolve(&self, players: &BTreeMap<Player, Choice>) -> Result<Resolution> {
        if players.is_empty() {
            return Err(WagerError::incorrect_game("no players to resolve"));
        }

        let entries: Vec<(Player, Choice)> = players
            .iter()
            .map(|(player, choice)| (player.clone(), *choice))
            .collect();
        let winners = find_winners(&entries);

        let choices: Vec<_> = entries
            .iter()
            .map(|(player, choice)| json!({ "choice": choice, "player_id": player.id() }))
            .collect();
        let winner_ids: Vec<&str> = winners.iter().map(|player| player.id()).collect();

        let mut metadata = GameMetadata::new();
        metadata.insert("players".into(), json!(choices));
        metadata.insert("winners".into(), json!(winner_ids));

        Ok(Resolution { winners, metadata })
    }

    // Everybody winning leaves nothing to split.
    fn is_refund(
        &self,
        players: &BTreeMap<Player, Choice>,
        creator: &Player,
        resolution: &Resolution,
    ) -> bool {
        is_solo(players, creator, resolution) || resolution.winners.len() == players.len()
    }
}

/// Simultaneous choice: every player commits a choice as they join.
#[derive(Debug)]
pub struct RockPaperScissorsGame {
    round: Arc<Round<Choice>>,
    rules: Arc<RockPaperScissorsRules>,
}

impl RockPaperScissorsGame {
    /// `action` carries the creator's choice; a malformed one fails creation.
    pub fn new(
        config: RockPaperScissorsConfig,
        creator: Player,
        action: &PlayerEvent,
    ) -> Result<Self> {
        Self::with_buffer(config, creator, action, DEFAULT_EVENT_BUFFER)
    }

    pub fn with_buffer(
        config: RockPaperScissorsConfig,
        creator: Player,
        action: &PlayerEvent,
        buffer: usize,
    ) -> Result<Self> {
        let choice = parse_action(action)?.choice;
        let round = Round::new(GameType::RockPaperScissors, config, creator, choice, buffer)?;

        Ok(Self {
            round: Arc::new(round),
            rules: Arc::new(RockPaperScissorsRules),
        })
    }
}

#[async_trait]
impl Game for RockPaperScissorsGame {
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

    async fn add_player_in(&self, _slot: EventSlot, _player: Player) -> Result<()> {
        Err(WagerError::InvalidAction)
    }

    async fn add_player_with_action_in(
        &self,
        slot: EventSlot,
        player: Player,
        event: PlayerEvent,
    ) -> Result<()> {
        self.round
            .join(slot, player, move || {
                parse_action(&event).map(|action| action.choice)
            })
            .await
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
