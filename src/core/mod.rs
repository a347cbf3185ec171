//! Core deterministic primitives.
//!
//! Boards, patches and the patch algebra, seeded randomness, board hashing,
//! and the observable value every higher layer publishes through.

pub mod board;
pub mod emitter;
pub mod rng;
pub mod hash;

// Re-export core types
pub use board::{apply_patches, Board, BoardError, Fields, Patch, PHASE_KEY};
pub use emitter::{with_selector, Emitter, ReadOnlyEmitter, Subscription};
pub use rng::{DeterministicRng, derive_seed, seeded_int_between};
pub use hash::{hash_board, hash_boards, StateHash};
