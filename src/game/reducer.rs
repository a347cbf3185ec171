//! Phase-Table Reducer
//!
//! Most turn-based games are a loop over phases: some phases advance on
//! their own (deal, score), some wait for a player. [`PhaseReducer`] turns a
//! table of per-phase handlers into a [`Game::reduce`](crate::game::Game::reduce)
//! implementation that runs automatic phases back to back and records one
//! board and one patch per step.

use std::collections::BTreeMap;

use crate::core::board::{Board, Patch};
use crate::game::definition::{Ctx, PlayerAction, ReduceResult, Reduction};

/// Default cap on automatic steps per reduction.
pub const DEFAULT_MAX_STEPS: usize = 256;

/// What a phase handler decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Apply this patch and keep going.
    Advance(Patch),
    /// Stop here until a player acts.
    AwaitAction,
    /// Stop here; the game is over.
    Final,
    /// Reject the offered action.
    Reject(String),
}

type AutoFn = Box<dyn Fn(&Board, &Ctx) -> Step + Send + Sync>;
type ActionFn = Box<dyn Fn(&Board, &Ctx, &PlayerAction) -> Step + Send + Sync>;

enum Handler {
    Auto(AutoFn),
    Action(ActionFn),
}

/// Reducer built from a phase → handler table.
pub struct PhaseReducer {
    handlers: BTreeMap<String, Handler>,
    max_steps: usize,
}

impl Default for PhaseReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseReducer {
    /// Empty table.
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Override the automatic step cap.
    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Register an automatic phase.
    pub fn on(
        mut self,
        phase: &str,
        handler: impl Fn(&Board, &Ctx) -> Step + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(phase.to_string(), Handler::Auto(Box::new(handler)));
        self
    }

    /// Register a phase that ends the game.
    pub fn terminal(self, phase: &str) -> Self {
        self.on(phase, |_, _| Step::Final)
    }

    /// Register a phase that waits for player input.
    ///
    /// `validate` returns either a rejection message or a value handed to
    /// `apply`, which produces the patch for this step.
    pub fn on_action<T: 'static>(
        mut self,
        phase: &str,
        validate: impl Fn(&PlayerAction, &Board, &Ctx) -> Result<T, String> + Send + Sync + 'static,
        apply: impl Fn(&Board, &Ctx, T) -> Patch + Send + Sync + 'static,
    ) -> Self {
        let handler = move |board: &Board, ctx: &Ctx, action: &PlayerAction| {
            match validate(action, board, ctx) {
                Ok(valid) => Step::Advance(apply(board, ctx, valid)),
                Err(message) => Step::Reject(message),
            }
        };
        self.handlers.insert(phase.to_string(), Handler::Action(Box::new(handler)));
        self
    }

    /// Run the table from `board`.
    ///
    /// The action is offered only to the first handler. Reduction stops when
    /// a phase awaits input or declares the game final.
    pub fn reduce(&self, board: &Board, ctx: &Ctx, action: Option<&PlayerAction>) -> ReduceResult {
        let mut boards: Vec<Board> = Vec::new();
        let mut patches: Vec<Patch> = Vec::new();
        let mut pending = action;

        for _ in 0..self.max_steps {
            let current = boards.last().unwrap_or(board);
            let phase = current.phase();

            let handler = self
                .handlers
                .get(phase)
                .ok_or_else(|| format!("No handler for phase \"{}\"", phase))?;

            let step = match (handler, pending.take()) {
                (Handler::Auto(_), Some(_)) => {
                    return Err(format!("Phase \"{}\" does not accept actions", phase));
                }
                (Handler::Auto(f), None) => f(current, ctx),
                (Handler::Action(_), None) => Step::AwaitAction,
                (Handler::Action(f), Some(a)) => f(current, ctx, a),
            };

            match step {
                Step::Advance(patch) => {
                    let next = current.merge(&patch);
                    boards.push(next);
                    patches.push(patch);
                }
                Step::AwaitAction => {
                    return Ok(Reduction { boards, patches, is_final: false });
                }
                Step::Final => {
                    return Ok(Reduction { boards, patches, is_final: true });
                }
                Step::Reject(message) => return Err(message),
            }
        }

        Err(format!("Reducer exceeded {} automatic steps", self.max_steps))
    }
}
