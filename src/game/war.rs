//! War
//!
//! Minimal sample game. Every seat is dealt one card in `[0, 3]`, then
//! players lay their card on the table in seat order. The game ends after
//! the last seat has played.
//!
//! Phases: `start → deal → play ↔ played → end`.

use serde_json::{json, Value};

use crate::core::board::{Board, Patch};
use crate::core::rng::seeded_int_between;
use crate::game::definition::{
    Action, Ctx, Game, GameMeta, Mask, Options, PlayerAction, PlayerIndex, ReduceResult,
};
use crate::game::reducer::{PhaseReducer, Step};

type Hands = Vec<Vec<i64>>;

const PLAY: &str = "play";

/// The War game definition.
pub struct War {
    reducer: PhaseReducer,
}

impl Default for War {
    fn default() -> Self {
        Self::new()
    }
}

impl War {
    /// Build the phase table.
    pub fn new() -> Self {
        let reducer = PhaseReducer::new()
            .on("start", |_, _| Step::Advance(Patch::phase("deal")))
            .on("deal", |_, ctx| {
                let hands: Hands = (0..ctx.num_players)
                    .map(|i| vec![seeded_int_between(0, 3, &format!("{}{}", ctx.seed, i))])
                    .collect();
                Step::Advance(
                    Patch::phase(PLAY)
                        .with("hands", json!(hands))
                        .with("activePlayer", 0),
                )
            })
            .on_action(PLAY, validate_play, apply_play)
            .on("played", |board, ctx| {
                let active = active_player(board);
                match active {
                    Some(p) if p + 1 < ctx.num_players => {
                        Step::Advance(Patch::phase(PLAY).with("activePlayer", p + 1))
                    }
                    _ => Step::Advance(Patch::phase("end").with("activePlayer", Value::Null)),
                }
            })
            .terminal("end");

        Self { reducer }
    }
}

fn active_player(board: &Board) -> Option<PlayerIndex> {
    board.get_as("activePlayer")
}

fn hands(board: &Board) -> Hands {
    board.get_as("hands").unwrap_or_default()
}

fn validate_play(action: &PlayerAction, board: &Board, _: &Ctx) -> Result<(PlayerIndex, i64), String> {
    if action.kind() != PLAY {
        return Err("Unknown action.".to_string());
    }
    if active_player(board) != Some(action.player) {
        return Err("Not your turn!".to_string());
    }

    let held = hands(board);
    let card = action.action.data_as::<i64>();
    match (card, held.get(action.player)) {
        (Some(card), Some(hand)) if hand.contains(&card) => Ok((action.player, card)),
        _ => Err("You don't have that number!".to_string()),
    }
}

fn apply_play(board: &Board, _: &Ctx, (player, card): (PlayerIndex, i64)) -> Patch {
    let mut table: Vec<i64> = board.get_as("table").unwrap_or_default();
    table.push(card);

    let mut hands = hands(board);
    if let Some(hand) = hands.get_mut(player) {
        hand.retain(|&c| c != card);
    }

    Patch::phase("played")
        .with("table", json!(table))
        .with("hands", json!(hands))
}

impl Game for War {
    fn meta(&self) -> GameMeta {
        GameMeta::new("War", 2, 4)
    }

    fn options(&self, _num_players: usize, _requested: Option<&Options>) -> Options {
        Value::Null
    }

    fn initial_board(&self, ctx: &Ctx) -> Board {
        let hands: Hands = vec![Vec::new(); ctx.num_players];
        Board::new("start")
            .with("activePlayer", Value::Null)
            .with("hands", json!(hands))
            .with("table", json!([]))
            .with("scores", json!([]))
    }

    fn reduce(&self, board: &Board, ctx: &Ctx, action: Option<&PlayerAction>) -> ReduceResult {
        self.reducer.reduce(board, ctx, action)
    }

    fn action_keys(&self) -> &[&'static str] {
        &[PLAY]
    }

    fn mask_patch(&self, patch: &Patch, player: PlayerIndex) -> Mask {
        match patch.get("hands").and_then(Value::as_array) {
            Some(all) => {
                let masked: Vec<Value> = all
                    .iter()
                    .enumerate()
                    .map(|(i, hand)| if i == player { hand.clone() } else { json!([]) })
                    .collect();
                Mask::Override(Patch::new().with("hands", masked))
            }
            None => Mask::Unchanged,
        }
    }

    fn bot(&self, board: &Board, _ctx: &Ctx, player: PlayerIndex) -> Option<Action> {
        if board.phase() != PLAY || active_player(board) != Some(player) {
            return None;
        }
        let card = *hands(board).get(player)?.first()?;
        Some(Action::new(PLAY, card))
    }
}
