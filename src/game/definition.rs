//! Game Definition
//!
//! The passive descriptor a game author supplies: how to build the first
//! board, how to reduce actions into new boards, how to hide information
//! from each viewer, and which action tags exist.
//!
//! Everything here must be deterministic. Given the same [`Ctx`] and the
//! same action sequence, `reduce` must produce the same boards on every run;
//! the recorded [`History`](crate::game::store::History) is only an oracle
//! if that holds.

use serde::{Serialize, Deserialize};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::board::{apply_patches, Board, Patch};

/// Seat index of a player.
pub type PlayerIndex = usize;

/// Game-specific options. `null` when a game has none.
pub type Options = Value;

/// Static facts about a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMeta {
    /// Display name.
    pub name: String,
    /// Inclusive `(min, max)` seat count.
    pub players: (usize, usize),
}

impl GameMeta {
    /// Create metadata.
    pub fn new(name: impl Into<String>, min_players: usize, max_players: usize) -> Self {
        Self {
            name: name.into(),
            players: (min_players, max_players),
        }
    }
}

/// Session context, fixed for the lifetime of one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ctx {
    /// Seated players.
    pub num_players: usize,
    /// Options resolved by [`Game::options`].
    pub options: Options,
    /// Seed for all randomness in the session.
    pub seed: String,
}

/// Player input, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action tag; must be one of [`Game::action_keys`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Action {
    /// Action with a payload.
    pub fn new(kind: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
        }
    }

    /// Action without a payload.
    pub fn bare(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: Value::Null,
        }
    }

    /// Decode the payload.
    pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.data.clone()).ok()
    }
}

/// An action attributed to the seat that issued it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerAction {
    /// The action itself.
    #[serde(flatten)]
    pub action: Action,
    /// Issuing seat.
    pub player: PlayerIndex,
}

impl PlayerAction {
    /// Attribute `action` to `player`.
    pub fn new(action: Action, player: PlayerIndex) -> Self {
        Self { action, player }
    }

    /// Action tag.
    pub fn kind(&self) -> &str {
        &self.action.kind
    }
}

/// Successful reducer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reduction {
    /// Full snapshot after each sub-step.
    pub boards: Vec<Board>,
    /// Delta for each sub-step; `boards[i]` is `boards[i - 1]` merged with `patches[i]`.
    pub patches: Vec<Patch>,
    /// True once the game has ended.
    #[serde(rename = "final")]
    pub is_final: bool,
}

impl Reduction {
    /// Build a reduction from patches, deriving the boards.
    pub fn from_patches(base: &Board, patches: Vec<Patch>, is_final: bool) -> Self {
        let boards = apply_patches(base, &patches);
        Self { boards, patches, is_final }
    }
}

/// Reducer result: new boards, or a human-readable rejection.
pub type ReduceResult = Result<Reduction, String>;

/// Outcome of per-viewer masking.
#[derive(Debug, Clone, PartialEq)]
pub enum Mask {
    /// Viewer may see the value as is.
    Unchanged,
    /// Fields to lay over the value before the viewer sees it.
    Override(Patch),
}

impl Mask {
    /// Apply to a patch.
    pub fn apply_to_patch(&self, patch: &Patch) -> Patch {
        match self {
            Mask::Unchanged => patch.clone(),
            Mask::Override(over) => patch.merge(over),
        }
    }

    /// Apply to a board.
    pub fn apply_to_board(&self, board: &Board) -> Board {
        match self {
            Mask::Unchanged => board.clone(),
            Mask::Override(over) => board.merge(over),
        }
    }
}

/// A turn-based game.
pub trait Game {
    /// Name and seat bounds.
    fn meta(&self) -> GameMeta;

    /// Resolve options for a seat count, honoring `requested` where valid.
    fn options(&self, num_players: usize, requested: Option<&Options>) -> Options;

    /// First board of a session.
    fn initial_board(&self, ctx: &Ctx) -> Board;

    /// Advance from `board`.
    ///
    /// Called without an action for forced advancement (dealing, scoring),
    /// with an action to validate and apply input. Illegal input must be
    /// reported as `Err(message)` and never panic.
    fn reduce(&self, board: &Board, ctx: &Ctx, action: Option<&PlayerAction>) -> ReduceResult;

    /// Registry of legal action tags.
    fn action_keys(&self) -> &[&'static str];

    /// Hide information from `player`. Defaults to no masking.
    fn mask_patch(&self, _patch: &Patch, _player: PlayerIndex) -> Mask {
        Mask::Unchanged
    }

    /// Hide action details from `player`. Defaults to identity.
    fn mask_action(&self, action: &PlayerAction, _player: PlayerIndex) -> PlayerAction {
        action.clone()
    }

    /// Pick a move for an AI-driven seat. Defaults to none.
    fn bot(&self, _board: &Board, _ctx: &Ctx, _player: PlayerIndex) -> Option<Action> {
        None
    }

    /// True if `kind` is a registered action tag.
    fn has_action(&self, kind: &str) -> bool {
        self.action_keys().contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_player_action_wire_shape() {
        let action = PlayerAction::new(Action::new("play", 3), 1);
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json, json!({ "type": "play", "data": 3, "player": 1 }));

        let parsed: PlayerAction = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, action);
    }

    #[test]
    fn test_bare_action_omits_data() {
        let json = serde_json::to_string(&Action::bare("pass")).unwrap();
        assert_eq!(json, r#"{"type":"pass"}"#);

        let parsed: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.data, Value::Null);
    }

    #[test]
    fn test_ctx_camel_case() {
        let ctx = Ctx {
            num_players: 2,
            options: Value::Null,
            seed: "s".into(),
        };
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["numPlayers"], json!(2));
    }

    #[test]
    fn test_mask_override_merges() {
        let board = Board::new("play").with("hands", json!([[1], [2]])).with("x", 1);
        let mask = Mask::Override(Patch::new().with("hands", json!([[1], []])));

        let masked = mask.apply_to_board(&board);
        assert_eq!(masked.get("hands"), Some(&json!([[1], []])));
        assert_eq!(masked.get("x"), Some(&json!(1)));

        assert_eq!(Mask::Unchanged.apply_to_board(&board), board);
    }

    #[test]
    fn test_reduction_from_patches() {
        let base = Board::new("start");
        let r = Reduction::from_patches(&base, vec![Patch::phase("deal"), Patch::phase("play")], false);
        assert_eq!(r.boards.len(), 2);
        assert_eq!(r.boards[1].phase(), "play");
    }
}
