//! Network Layer
//!
//! Replication between the authoritative session and its viewers.
//! This layer is **non-deterministic** - all game logic runs through `game/`.
//! Transports plug in at the [`Connection`] seam and by feeding
//! [`ServerMessage`]s into a [`ReplicationClient`].

pub mod protocol;
pub mod client;
pub mod session;

pub use protocol::{
    ClientMessage, ErrorCode, ErrorReport, Loc, ServerMessage, SocketMeta, SocketsStatus,
};
pub use client::{
    ChannelConnection, ClientErr, ClientError, ClientMode, ClientState, Connection, GameFrame,
    ReplicationClient,
};
pub use session::{GameSession, SessionConfig, SessionError, SessionId, SessionState};
