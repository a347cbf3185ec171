//! # Tabletop
//!
//! Deterministic turn-based game engine with server-authoritative state,
//! per-viewer replication and paced client-side playback.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         TABLETOP                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Deterministic primitives                │
//! │  ├── board.rs      - Boards, patches, patch algebra          │
//! │  ├── rng.rs        - Seeded Xorshift128+ PRNG                │
//! │  ├── hash.rs       - Board hashing for verification          │
//! │  └── emitter.rs    - Observable value                        │
//! │                                                              │
//! │  game/             - Game logic (deterministic)              │
//! │  ├── definition.rs - Game trait, actions, masking            │
//! │  ├── reducer.rs    - Phase-table reducer builder             │
//! │  ├── store.rs      - Authoritative store and history         │
//! │  ├── replay.rs     - History replay and verification         │
//! │  └── war.rs        - Sample game                             │
//! │                                                              │
//! │  meter/            - Presentation (non-deterministic)        │
//! │  ├── task.rs       - Wait gates                              │
//! │  └── scheduler.rs  - Frame pacing meter                      │
//! │                                                              │
//! │  network/          - Replication (non-deterministic)         │
//! │  ├── protocol.rs   - Message types                           │
//! │  ├── client.rs     - Replication client                      │
//! │  └── session.rs    - Server-side game session                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are **deterministic**:
//! - No HashMap (serde_json maps and BTreeMap iterate in key order)
//! - No system time dependencies
//! - All randomness from the session seed
//!
//! Given the same context and action history, reduction produces
//! **identical boards** on every run, so a recorded history can always be
//! replayed and verified.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod meter;
pub mod network;

// Re-export commonly used types
pub use core::board::{apply_patches, Board, Patch};
pub use core::emitter::{with_selector, Emitter, ReadOnlyEmitter};
pub use core::rng::DeterministicRng;
pub use game::definition::{Action, Ctx, Game, Mask, PlayerAction, ReduceResult, Reduction};
pub use game::store::{GameStore, History, InputCtx, StoreError, StoreUpdate};
pub use meter::{Meter, MeterConfig, Task};
pub use network::{GameSession, ReplicationClient, ServerMessage};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
