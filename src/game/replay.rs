//! History Replay
//!
//! Re-derive every board of a session from its [`History`] alone.
//! Reducers are deterministic, so a recorded history is a complete oracle
//! for the session: replaying it must reproduce the same boards and the
//! same final-board hash.

use tracing::{debug, warn};

use crate::core::board::{apply_patches, Board};
use crate::core::hash::{hash_board, StateHash};
use crate::game::definition::Game;
use crate::game::store::History;

/// Boards produced by a replay.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryResults {
    /// `board_sets[0]` is the initial board followed by the boards of the
    /// initial advancement; each later set holds the boards of one action.
    pub board_sets: Vec<Vec<Board>>,
    /// True if the last reduction ended the game.
    pub is_final: bool,
}

impl HistoryResults {
    /// Last board of the session.
    pub fn final_board(&self) -> Option<&Board> {
        self.board_sets.iter().rev().find_map(|set| set.last())
    }

    /// Number of replayed actions.
    pub fn action_count(&self) -> usize {
        self.board_sets.len().saturating_sub(1)
    }
}

/// Replay errors. `step` is the zero-based index into the action log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    /// Initial advancement was rejected.
    #[error("Error on initial update: {0}")]
    Initial(String),

    /// A recorded action was rejected on replay.
    #[error("Action {step} rejected: {message}")]
    Rejected {
        /// Offending action.
        step: usize,
        /// Reducer message.
        message: String,
    },

    /// A recorded action produced no boards.
    #[error("Action {step} caused no state change")]
    NoStateChange {
        /// Offending action.
        step: usize,
    },

    /// Reducer's boards disagree with its own patches.
    #[error("Action {step} produced boards inconsistent with its patches")]
    PatchMismatch {
        /// Offending action.
        step: usize,
    },

    /// Game ended before the log did.
    #[error("Premature final at action {step}")]
    PrematureFinal {
        /// Action after which the game ended.
        step: usize,
    },
}

/// Replay a history from scratch.
pub fn replay_history<G: Game + ?Sized>(game: &G, history: &History) -> Result<HistoryResults, ReplayError> {
    let ctx = &history.ctx;
    let initial_board = game.initial_board(ctx);
    let initial = game
        .reduce(&initial_board, ctx, None)
        .map_err(ReplayError::Initial)?;

    if initial.is_final && !history.actions.is_empty() {
        return Err(ReplayError::PrematureFinal { step: 0 });
    }

    let mut is_final = initial.is_final;
    let mut first = Vec::with_capacity(initial.boards.len() + 1);
    first.push(initial_board);
    first.extend(initial.boards);

    let mut board_sets = vec![first];

    for (step, action) in history.actions.iter().enumerate() {
        let prev = board_sets
            .iter()
            .rev()
            .find_map(|set| set.last())
            .cloned()
            .ok_or(ReplayError::NoStateChange { step })?;

        let reduction = game
            .reduce(&prev, ctx, Some(action))
            .map_err(|message| ReplayError::Rejected { step, message })?;

        if reduction.boards.is_empty() {
            return Err(ReplayError::NoStateChange { step });
        }

        let boards = apply_patches(&prev, &reduction.patches);
        if boards != reduction.boards {
            warn!(step, "Replayed reduction disagrees with its patches");
            return Err(ReplayError::PatchMismatch { step });
        }

        if reduction.is_final && step + 1 < history.actions.len() {
            return Err(ReplayError::PrematureFinal { step });
        }

        is_final = reduction.is_final;
        board_sets.push(boards);
    }

    debug!(actions = history.actions.len(), is_final, "History replayed");

    Ok(HistoryResults { board_sets, is_final })
}

/// Outcome of [`verify_history`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    /// Did the replayed final board match?
    pub valid: bool,
    /// Hash of the replayed final board.
    pub computed_final_hash: StateHash,
    /// Hash the caller expected.
    pub expected_final_hash: StateHash,
}

/// Replay `history` and compare the final board against `expected`.
pub fn verify_history<G: Game + ?Sized>(
    game: &G,
    history: &History,
    expected: &StateHash,
) -> Result<VerificationResult, ReplayError> {
    let results = replay_history(game, history)?;
    let computed = results.final_board().map(hash_board).unwrap_or([0; 32]);

    Ok(VerificationResult {
        valid: &computed == expected,
        computed_final_hash: computed,
        expected_final_hash: *expected,
    })
}

// =============================================================================
// TESTS
// =============================================================================
