//! Game Store
//!
//! The authoritative owner of one session's boards and action history.
//! Every mutation goes through [`GameStore::submit`]; everything else is a
//! read. Viewers get per-player masked copies through [`GameStore::get`].

use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::core::board::{apply_patches, Board, Patch};
use crate::game::definition::{
    Action, Ctx, Game, Options, PlayerAction, PlayerIndex,
};

/// Caller-supplied context before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputCtx {
    /// Requested seat count; clamped into the game's bounds.
    pub num_players: Option<usize>,
    /// Requested options.
    pub options: Option<Options>,
    /// Session seed; generated when missing or empty.
    pub seed: Option<String>,
}

impl InputCtx {
    /// Context with a seat count and seed.
    pub fn new(num_players: usize, seed: impl Into<String>) -> Self {
        Self {
            num_players: Some(num_players),
            options: None,
            seed: Some(seed.into()),
        }
    }
}

/// Unit of replication: everything needed to rebuild the boards produced by
/// the latest reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreUpdate {
    /// Logical turn counter.
    pub idx: u64,
    /// Session context.
    pub ctx: Ctx,
    /// Board the latest reduction started from.
    pub prev_board: Board,
    /// Action that triggered the latest reduction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<PlayerAction>,
    /// Sub-step deltas of the latest reduction.
    pub patches: Vec<Patch>,
    /// True once the game has ended.
    #[serde(rename = "final", default)]
    pub is_final: bool,
}

impl StoreUpdate {
    /// Boards produced by this update.
    pub fn boards(&self) -> Vec<Board> {
        apply_patches(&self.prev_board, &self.patches)
    }

    /// Drop the resync fields, leaving a continuation.
    pub fn into_hot(self) -> HotUpdate {
        HotUpdate {
            idx: self.idx,
            action: self.action,
            patches: self.patches,
            is_final: self.is_final,
        }
    }
}

/// A [`StoreUpdate`] without `prev_board` and `ctx`.
///
/// Only meaningful to a receiver already holding update `idx - 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotUpdate {
    /// Logical turn counter.
    pub idx: u64,
    /// Triggering action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<PlayerAction>,
    /// Sub-step deltas.
    pub patches: Vec<Patch>,
    /// True once the game has ended.
    #[serde(rename = "final", default)]
    pub is_final: bool,
}

/// Append-only log from which every board can be re-derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// Session context.
    pub ctx: Ctx,
    /// Accepted actions in order.
    pub actions: Vec<PlayerAction>,
}

impl History {
    /// Serialize for sharing (the `historyString` of server messages).
    pub fn to_history_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a shared history.
    pub fn from_history_string(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Store errors.
///
/// Rejections display exactly the reducer's message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Reducer rejected the action.
    #[error("{0}")]
    Rejected(String),

    /// Reducer returned neither an error nor boards.
    #[error("Action returned no error but caused no state change.")]
    NoStateChange,

    /// Game already reached its final board.
    #[error("Game is already over.")]
    GameOver,

    /// Seat index outside the session.
    #[error("Player {0} is not seated in this game.")]
    UnknownPlayer(PlayerIndex),

    /// Game declares unusable seat bounds.
    #[error("Invalid player bounds: min {min}, max {max}")]
    InvalidPlayerBounds {
        /// Declared minimum.
        min: usize,
        /// Declared maximum.
        max: usize,
    },

    /// Reducer rejected the initial forced advancement.
    #[error("Error on initial update: {0}")]
    InitialUpdate(String),
}

/// Authoritative state for one session.
pub struct GameStore<G: Game> {
    game: G,
    ctx: Ctx,
    idx: u64,
    prev_board: Board,
    boards: Vec<Board>,
    patches: Vec<Patch>,
    is_final: bool,
    actions: Vec<PlayerAction>,
}

impl<G: Game> GameStore<G> {
    /// Validate the context and run the initial forced advancement.
    pub fn new(game: G, input: InputCtx) -> Result<Self, StoreError> {
        let ctx = validate_context(&game, input)?;
        let initial_board = game.initial_board(&ctx);
        let initial = game
            .reduce(&initial_board, &ctx, None)
            .map_err(StoreError::InitialUpdate)?;

        debug!(
            game = %game.meta().name,
            num_players = ctx.num_players,
            seed = %ctx.seed,
            steps = initial.boards.len(),
            "Game store created"
        );

        Ok(Self {
            game,
            ctx,
            idx: 0,
            prev_board: initial_board,
            boards: initial.boards,
            patches: initial.patches,
            is_final: initial.is_final,
            actions: Vec::new(),
        })
    }

    /// Apply `action` on behalf of `player`.
    ///
    /// On error nothing changes.
    pub fn submit(&mut self, action: Action, player: PlayerIndex) -> Result<(), StoreError> {
        if self.is_final {
            return Err(StoreError::GameOver);
        }
        if player >= self.ctx.num_players {
            return Err(StoreError::UnknownPlayer(player));
        }

        let action = PlayerAction::new(action, player);
        let latest = self.board().clone();

        let next = match self.game.reduce(&latest, &self.ctx, Some(&action)) {
            Ok(next) => next,
            Err(message) => {
                debug!(player, kind = %action.kind(), %message, "Action rejected");
                return Err(StoreError::Rejected(message));
            }
        };

        if next.boards.is_empty() {
            warn!(player, kind = %action.kind(), "Reducer accepted action without producing boards");
            return Err(StoreError::NoStateChange);
        }

        self.prev_board = latest;
        self.actions.push(action);
        self.boards = next.boards;
        self.patches = next.patches;
        self.is_final = next.is_final;
        self.idx += 1;

        debug!(idx = self.idx, phase = %self.board().phase(), is_final = self.is_final, "Action applied");

        Ok(())
    }

    /// Latest update, masked for `player` when given.
    ///
    /// `prev_board` and every patch are masked independently, each relative
    /// to its unmasked value.
    pub fn get(&self, player: Option<PlayerIndex>) -> StoreUpdate {
        let action = self.actions.last().map(|a| match player {
            Some(p) => self.game.mask_action(a, p),
            None => a.clone(),
        });

        let (prev_board, patches) = match player {
            Some(p) => {
                let prev = self
                    .game
                    .mask_patch(&self.prev_board.to_patch(), p)
                    .apply_to_board(&self.prev_board);
                let patches = self
                    .patches
                    .iter()
                    .map(|patch| self.game.mask_patch(patch, p).apply_to_patch(patch))
                    .collect();
                (prev, patches)
            }
            None => (self.prev_board.clone(), self.patches.clone()),
        };

        StoreUpdate {
            idx: self.idx,
            ctx: self.ctx.clone(),
            prev_board,
            action,
            patches,
            is_final: self.is_final,
        }
    }

    /// Full action log.
    pub fn get_history(&self) -> History {
        History {
            ctx: self.ctx.clone(),
            actions: self.actions.clone(),
        }
    }

    /// Latest unmasked board.
    pub fn board(&self) -> &Board {
        self.boards.last().unwrap_or(&self.prev_board)
    }

    /// Boards of the latest reduction.
    pub fn boards(&self) -> &[Board] {
        &self.boards
    }

    /// Logical turn counter.
    pub fn idx(&self) -> u64 {
        self.idx
    }

    /// Session context.
    pub fn ctx(&self) -> &Ctx {
        &self.ctx
    }

    /// True once the game has ended.
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// The game definition.
    pub fn game(&self) -> &G {
        &self.game
    }

    /// Ask the game's bot for `player`'s move on the latest board.
    pub fn bot_action(&self, player: PlayerIndex) -> Option<Action> {
        if self.is_final {
            return None;
        }
        self.game.bot(self.board(), &self.ctx, player)
    }
}

/// Clamp the seat count and resolve options and seed.
pub fn validate_context<G: Game + ?Sized>(game: &G, input: InputCtx) -> Result<Ctx, StoreError> {
    let (min, max) = game.meta().players;
    if min == 0 || min > max {
        return Err(StoreError::InvalidPlayerBounds { min, max });
    }

    let num_players = input.num_players.unwrap_or(min).clamp(min, max);
    let options = game.options(num_players, input.options.as_ref());

    let seed = match input.seed {
        Some(seed) if !seed.is_empty() => seed,
        _ => format!("auto_{}", uuid::Uuid::new_v4().simple()),
    };

    Ok(Ctx { num_players, options, seed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::board::Patch;
    use crate::game::definition::{GameMeta, Mask, ReduceResult, Reduction};
    use crate::game::war::War;
    use serde_json::{json, Value};

    fn war_store() -> GameStore<War> {
        GameStore::new(War::new(), InputCtx::new(2, "test_")).unwrap()
    }

    fn hand(store: &GameStore<War>, player: usize) -> Vec<i64> {
        let hands: Vec<Vec<i64>> = store.board().get_as("hands").unwrap();
        hands[player].clone()
    }

    #[test]
    fn test_creates_with_default_options() {
        let store = war_store();
        let update = store.get(None);
        let boards = apply_patches(&update.prev_board, &update.patches);

        assert_eq!(boards.len(), 2);
        assert_eq!(boards[0].phase(), "deal");
        assert_eq!(boards[1].phase(), "play");
        assert!(!update.is_final);
        assert_eq!(update.idx, 0);
        assert_eq!(update.ctx.seed, "test_");
    }

    #[test]
    fn test_full_war_session() {
        let mut store = war_store();

        let err = store.submit(Action::new("play", 2), 1).unwrap_err();
        assert_eq!(err.to_string(), "Not your turn!");

        let err = store.submit(Action::new("play", 222), 0).unwrap_err();
        assert_eq!(err.to_string(), "You don't have that number!");

        let card = hand(&store, 0)[0];
        store.submit(Action::new("play", card), 0).unwrap();
        assert_eq!(store.idx(), 1);

        let err = store.submit(Action::new("play", 2), 0).unwrap_err();
        assert_eq!(err.to_string(), "Not your turn!");

        let err = store.submit(Action::new("play", 222), 1).unwrap_err();
        assert_eq!(err.to_string(), "You don't have that number!");

        let card = hand(&store, 1)[0];
        store.submit(Action::new("play", card), 1).unwrap();
        assert_eq!(store.idx(), 2);

        assert!(store.get(None).is_final);
        assert_eq!(store.board().phase(), "end");
    }

    #[test]
    fn test_invalid_submit_changes_nothing() {
        let mut store = war_store();
        let before_board = store.board().clone();
        let before_update = store.get(None);

        let err = store.submit(Action::new("play", 222), 0).unwrap_err();
        assert!(!err.to_string().is_empty());

        assert_eq!(store.idx(), 0);
        assert!(store.get_history().actions.is_empty());
        assert_eq!(store.board(), &before_board);
        assert_eq!(store.get(None), before_update);
    }

    #[test]
    fn test_submit_after_final_rejected() {
        let mut store = war_store();
        for player in 0..2 {
            let card = hand(&store, player)[0];
            store.submit(Action::new("play", card), player).unwrap();
        }
        assert!(store.is_final());
        assert_eq!(store.submit(Action::new("play", 1), 0), Err(StoreError::GameOver));
    }

    #[test]
    fn test_unknown_player() {
        let mut store = war_store();
        assert_eq!(
            store.submit(Action::new("play", 1), 7),
            Err(StoreError::UnknownPlayer(7))
        );
    }

    #[test]
    fn test_num_players_clamped() {
        let low = GameStore::new(War::new(), InputCtx::new(1, "s")).unwrap();
        assert_eq!(low.ctx().num_players, 2);

        let high = GameStore::new(War::new(), InputCtx::new(9, "s")).unwrap();
        assert_eq!(high.ctx().num_players, 4);

        let unset = GameStore::new(War::new(), InputCtx::default()).unwrap();
        assert_eq!(unset.ctx().num_players, 2);
    }

    #[test]
    fn test_seed_generated_when_missing() {
        let a = GameStore::new(War::new(), InputCtx::default()).unwrap();
        let b = GameStore::new(War::new(), InputCtx { seed: Some(String::new()), ..Default::default() }).unwrap();

        assert!(a.ctx().seed.starts_with("auto_"));
        assert!(b.ctx().seed.starts_with("auto_"));
        assert_ne!(a.ctx().seed, b.ctx().seed);
    }

    #[test]
    fn test_masking_per_viewer() {
        let store = war_store();
        let unmasked = store.get(None);
        let viewer0 = store.get(Some(0));

        // The deal patch carries hands; player 0 sees only their own.
        let full: Vec<Vec<i64>> = unmasked.patches[1].get_as("hands").unwrap();
        let seen: Vec<Vec<i64>> = viewer0.patches[1].get_as("hands").unwrap();
        assert_eq!(seen[0], full[0]);
        assert!(seen[1].is_empty());

        // Patches without hands are untouched.
        assert_eq!(viewer0.patches[0], unmasked.patches[0]);
    }

    #[test]
    fn test_history_round_trip() {
        let mut store = war_store();
        let card = hand(&store, 0)[0];
        store.submit(Action::new("play", card), 0).unwrap();

        let history = store.get_history();
        assert_eq!(history.actions.len(), 1);
        assert_eq!(history.actions[0].player, 0);

        let s = history.to_history_string().unwrap();
        assert_eq!(History::from_history_string(&s).unwrap(), history);
    }

    #[test]
    fn test_hot_update_strips_resync_fields() {
        let mut store = war_store();
        let card = hand(&store, 0)[0];
        store.submit(Action::new("play", card), 0).unwrap();

        let update = store.get(Some(1));
        let hot = update.clone().into_hot();
        assert_eq!(hot.idx, update.idx);
        assert_eq!(hot.patches, update.patches);

        let json = serde_json::to_value(&hot).unwrap();
        assert!(json.get("prevBoard").is_none());
        assert!(json.get("ctx").is_none());
        assert_eq!(json["final"], json!(false));
    }

    // A game whose reducer "accepts" every action without producing boards.
    struct Inert {
        players: (usize, usize),
    }

    impl Game for Inert {
        fn meta(&self) -> GameMeta {
            GameMeta::new("Inert", self.players.0, self.players.1)
        }
        fn options(&self, _: usize, _: Option<&Options>) -> Options {
            Value::Null
        }
        fn initial_board(&self, _: &Ctx) -> Board {
            Board::new("idle")
        }
        fn reduce(&self, board: &Board, _: &Ctx, _: Option<&PlayerAction>) -> ReduceResult {
            Ok(Reduction::from_patches(board, vec![], false))
        }
        fn action_keys(&self) -> &[&'static str] {
            &["poke"]
        }
        fn mask_patch(&self, _: &Patch, _: PlayerIndex) -> Mask {
            Mask::Unchanged
        }
    }

    #[test]
    fn test_no_state_change_is_error() {
        let mut store = GameStore::new(Inert { players: (1, 2) }, InputCtx::default()).unwrap();
        assert_eq!(store.board().phase(), "idle");

        let err = store.submit(Action::bare("poke"), 0).unwrap_err();
        assert_eq!(err, StoreError::NoStateChange);
        assert_eq!(store.idx(), 0);
    }

    #[test]
    fn test_bad_bounds_fatal() {
        assert!(matches!(
            GameStore::new(Inert { players: (0, 2) }, InputCtx::default()),
            Err(StoreError::InvalidPlayerBounds { min: 0, max: 2 })
        ));
        assert!(matches!(
            GameStore::new(Inert { players: (3, 2) }, InputCtx::default()),
            Err(StoreError::InvalidPlayerBounds { .. })
        ));
    }

    #[test]
    fn test_bot_action() {
        let store = war_store();
        let bot = store.bot_action(0).unwrap();
        assert_eq!(bot.kind, "play");
        assert_eq!(bot.data_as::<i64>(), Some(hand(&store, 0)[0]));
        assert!(store.bot_action(1).is_none());
    }
}
