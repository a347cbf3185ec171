//! Protocol Messages
//!
//! Wire format for client-server communication.
//! All messages are serialized as JSON; server messages use camelCase
//! field names, client messages are tagged by `type`.

use serde::{Serialize, Deserialize};

use crate::game::definition::{Action, PlayerIndex};
use crate::game::store::{HotUpdate, StoreUpdate};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Game action for the sender's seat.
    Action {
        /// The action; the server attributes it to the sender's seat.
        action: Action,
    },

    /// Request a fresh full update (after a desync or reconnect).
    SyncRequest,

    /// Start the game from the lobby.
    Start,

    /// Seat a bot in the next free lobby seat.
    AddBot,

    /// Player is leaving the session.
    Leave,
}

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Where the receiving socket sits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loc {
    /// Session identifier.
    pub id: String,
    /// Receiver's seat, if seated.
    pub player_index: Option<PlayerIndex>,
    /// Has the game started?
    pub started: bool,
}

/// Public info about a connected socket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketMeta {
    /// Avatar identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Per-seat connection status; `None` for an empty seat.
pub type SocketsStatus = Vec<Option<SocketMeta>>;

/// Error categories reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Server-side failure.
    ServerErr,
    /// Client lost sync with the server's update sequence.
    SyncErr,
    /// Submitted action was rejected.
    ActionErr,
    /// Session lifecycle misuse.
    SessionErr,
}

/// Error payload of a server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Category.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Message sent from server to client.
///
/// `loc: null` tears the receiver's session down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// Receiver location.
    pub loc: Option<Loc>,

    /// Seat statuses, when changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sockets_status: Option<SocketsStatus>,

    /// Error addressed to the receiver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<ErrorReport>,

    /// Shareable history, sent once the game ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_string: Option<String>,

    /// Full update (resync point).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<StoreUpdate>,

    /// Continuation of the receiver's last update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hot_update: Option<HotUpdate>,
}

impl ServerMessage {
    /// Message for a receiver at `loc`.
    pub fn at(loc: Loc) -> Self {
        Self {
            loc: Some(loc),
            sockets_status: None,
            err: None,
            history_string: None,
            update: None,
            hot_update: None,
        }
    }

    /// Session teardown.
    pub fn teardown() -> Self {
        Self {
            loc: None,
            sockets_status: None,
            err: None,
            history_string: None,
            update: None,
            hot_update: None,
        }
    }

    /// Attach a full update.
    pub fn with_update(mut self, update: StoreUpdate) -> Self {
        self.update = Some(update);
        self
    }

    /// Attach a hot update.
    pub fn with_hot_update(mut self, update: HotUpdate) -> Self {
        self.hot_update = Some(update);
        self
    }

    /// Attach an error.
    pub fn with_err(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
        self.err = Some(ErrorReport {
            code,
            message: message.into(),
        });
        self
    }

    /// Attach seat statuses.
    pub fn with_sockets(mut self, sockets: SocketsStatus) -> Self {
        self.sockets_status = Some(sockets);
        self
    }

    /// Attach the history string.
    pub fn with_history(mut self, history: String) -> Self {
        self.history_string = Some(history);
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// TESTS
// =============================================================================
