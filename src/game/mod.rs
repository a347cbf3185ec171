//! Game Logic Module
//!
//! Game definitions and the authoritative store. 100% deterministic.
//!
//! ## Module Structure
//!
//! - `definition`: The `Game` trait, actions, context, masking
//! - `reducer`: Phase-table reducer builder
//! - `store`: Authoritative per-session state and history
//! - `replay`: Re-deriving boards from a recorded history
//! - `war`: Sample game used by tests and the demo

pub mod definition;
pub mod reducer;
pub mod store;
pub mod replay;
pub mod war;

// Re-export key types
pub use definition::{
    Action, Ctx, Game, GameMeta, Mask, Options, PlayerAction, PlayerIndex, ReduceResult, Reduction,
};
pub use reducer::{PhaseReducer, Step};
pub use store::{GameStore, History, HotUpdate, InputCtx, StoreError, StoreUpdate};
pub use replay::{replay_history, verify_history, HistoryResults, ReplayError, VerificationResult};
pub use war::War;
