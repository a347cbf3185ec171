//! Replication Client
//!
//! Mirrors the server's store for one viewer. Full updates are resync
//! points; hot updates are only accepted as the direct successor of the
//! last update held. Every update becomes a run of [`GameFrame`]s that is
//! handed to a [`Meter`] for paced presentation, and the frame under the
//! meter's cursor is published on the client state emitter.
//!
//! Single-threaded: the client is `!Send` and expects to be driven from
//! one task (typically inside a `tokio::task::LocalSet`).

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::board::{apply_patches, Board, Patch};
use crate::core::emitter::{with_selector, Emitter, ReadOnlyEmitter, Subscription};
use crate::game::definition::{Action, Ctx, Game, PlayerAction};
use crate::meter::scheduler::{Meter, MeterConfig, MeterStatus};
use crate::meter::task::Gate;
use crate::network::protocol::{ClientMessage, ErrorCode, Loc, ServerMessage, SocketsStatus};

// =============================================================================
// CONNECTION SEAM
// =============================================================================

/// Outbound half of a transport.
pub trait Connection {
    /// Send a message to the server.
    fn send(&self, message: ClientMessage) -> Result<(), ClientError>;

    /// Close the transport. Further sends fail.
    fn close(&self);
}

/// [`Connection`] over an unbounded tokio channel.
pub struct ChannelConnection {
    tx: RefCell<Option<mpsc::UnboundedSender<ClientMessage>>>,
}

impl ChannelConnection {
    /// Wrap a sender.
    pub fn new(tx: mpsc::UnboundedSender<ClientMessage>) -> Self {
        Self {
            tx: RefCell::new(Some(tx)),
        }
    }

    /// Connection plus the receiving end.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Has `close` been called or the receiver dropped?
    pub fn is_closed(&self) -> bool {
        self.tx.borrow().as_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl Connection for ChannelConnection {
    fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        let tx = self.tx.borrow();
        let tx = tx.as_ref().ok_or(ClientError::ConnectionClosed)?;
        tx.send(message).map_err(|_| ClientError::ConnectionClosed)
    }

    fn close(&self) {
        self.tx.borrow_mut().take();
    }
}

impl<C: Connection + ?Sized> Connection for Rc<C> {
    fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        (**self).send(message)
    }

    fn close(&self) {
        (**self).close()
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Client errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Hot update did not follow the last update held.
    #[error("Lost sync with server state: expected update {expected:?}, got {got}")]
    Desync {
        /// Index the client could accept, if any.
        expected: Option<u64>,
        /// Index received.
        got: u64,
    },

    /// Action tag not registered by the game.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Transport is closed.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Which screen the client is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMode {
    /// Not in a session.
    Title,
    /// Seated, game not started.
    Lobby,
    /// Game in progress or over.
    Game,
}

/// Error as published to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientErr {
    /// Category.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// When the client recorded it.
    pub date: DateTime<Utc>,
}

impl ClientErr {
    fn now(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            date: Utc::now(),
        }
    }
}

/// One presentable board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameFrame {
    /// Update index the frame came from.
    pub segment: u64,
    /// Position within that update.
    pub frame: usize,
    /// The board.
    pub board: Board,
    /// Delta that produced `board`. The first frame of a full update
    /// carries its whole base board.
    pub patch: Patch,
    /// Session context.
    pub ctx: Ctx,
    /// Action attributed to this frame, if any.
    pub action: Option<PlayerAction>,
    /// Did the update end the game?
    #[serde(rename = "final")]
    pub is_final: bool,
}

/// Everything the UI renders from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    /// Screen.
    pub mode: ClientMode,
    /// Transport up?
    pub connected: bool,
    /// Error since the last emission. Cleared after each emission.
    pub err: Option<ClientErr>,
    /// Location in the session.
    pub loc: Option<Loc>,
    /// Seat statuses.
    pub sockets_status: SocketsStatus,
    /// Frame currently presented.
    pub frame: Option<GameFrame>,
    /// Shareable history, once the game ended.
    pub history_string: Option<String>,
}

impl ClientState {
    fn title() -> Self {
        Self {
            mode: ClientMode::Title,
            connected: false,
            err: None,
            loc: None,
            sockets_status: Vec::new(),
            frame: None,
            history_string: None,
        }
    }
}

/// Replicated store state. Derived, never authoritative.
#[derive(Default)]
struct Cache {
    idx: Option<u64>,
    ctx: Option<Ctx>,
    boards: Vec<Board>,
    /// One per board.
    patches: Vec<Patch>,
    action: Option<PlayerAction>,
    history_string: Option<String>,
}

#[derive(Default)]
struct View {
    connected: bool,
    err: Option<ClientErr>,
    loc: Option<Loc>,
    sockets_status: SocketsStatus,
    frame: Option<GameFrame>,
}

struct ClientInner<G> {
    game: G,
    connection: Box<dyn Connection>,
    cache: RefCell<Cache>,
    view: RefCell<View>,
    meter: Meter<GameFrame>,
    state: Emitter<ClientState>,
    _frame_sub: RefCell<Option<Subscription>>,
}

// =============================================================================
// CLIENT
// =============================================================================

/// Local mirror of one viewer's slice of a game session.
pub struct ReplicationClient<G> {
    inner: Rc<ClientInner<G>>,
}

impl<G> Clone for ReplicationClient<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<G: Game + 'static> ReplicationClient<G> {
    /// Create a client sending through `connection`.
    pub fn new(game: G, connection: impl Connection + 'static, config: MeterConfig) -> Self {
        let inner = Rc::new(ClientInner {
            game,
            connection: Box::new(connection),
            cache: RefCell::new(Cache::default()),
            view: RefCell::new(View::default()),
            meter: Meter::new(config),
            state: Emitter::unfiltered(ClientState::title()),
            _frame_sub: RefCell::new(None),
        });

        let weak: Weak<ClientInner<G>> = Rc::downgrade(&inner);
        let sub = with_selector(
            &inner.meter.emitter(),
            |status: &MeterStatus<GameFrame>| status.current().cloned(),
            move |frame: &Option<GameFrame>, _| {
                let (Some(inner), Some(frame)) = (weak.upgrade(), frame) else {
                    return;
                };
                inner.view.borrow_mut().frame = Some(frame.clone());
                ReplicationClient { inner }.emit_state();
            },
        );
        *inner._frame_sub.borrow_mut() = Some(sub);

        Self { inner }
    }

    /// Client state stream.
    pub fn emitter(&self) -> ReadOnlyEmitter<ClientState> {
        self.inner.state.read_only()
    }

    /// Last published client state.
    pub fn state(&self) -> ClientState {
        self.inner.state.get()
    }

    /// Presentation meter.
    pub fn meter(&self) -> &Meter<GameFrame> {
        &self.inner.meter
    }

    /// The game definition.
    pub fn game(&self) -> &G {
        &self.inner.game
    }

    /// Index of the last update held.
    pub fn idx(&self) -> Option<u64> {
        self.inner.cache.borrow().idx
    }

    /// Latest replicated board, ahead of presentation.
    pub fn latest_board(&self) -> Option<Board> {
        self.inner.cache.borrow().boards.last().cloned()
    }

    /// Transport opened.
    pub fn on_open(&self) {
        self.inner.view.borrow_mut().connected = true;
        self.emit_state();
    }

    /// Transport closed.
    pub fn on_close(&self) {
        self.inner.view.borrow_mut().connected = false;
        self.emit_state();
    }

    /// Apply one server message.
    ///
    /// Returns [`ClientError::Desync`] when a hot update does not follow
    /// the last update held; the connection is closed in that case.
    pub fn handle_message(&self, message: ServerMessage) -> Result<(), ClientError> {
        if let Some(err) = message.err {
            self.inner.view.borrow_mut().err = Some(ClientErr::now(err.code, err.message));
        }

        let Some(loc) = message.loc else {
            debug!("Session torn down");
            {
                let mut view = self.inner.view.borrow_mut();
                view.loc = None;
                view.sockets_status.clear();
                view.frame = None;
            }
            *self.inner.cache.borrow_mut() = Cache::default();
            self.inner.meter.reset(Vec::new());
            self.emit_state();
            return Ok(());
        };

        {
            let mut view = self.inner.view.borrow_mut();
            let loc_changed = view.loc.as_ref().map(|l| &l.id) != Some(&loc.id);
            if loc_changed {
                debug!(session = %loc.id, "Location changed");
                *self.inner.cache.borrow_mut() = Cache::default();
            }
            view.loc = Some(loc);
            if let Some(sockets) = message.sockets_status {
                view.sockets_status = sockets;
            }
        }

        if let Some(history) = message.history_string {
            self.inner.cache.borrow_mut().history_string = Some(history);
        }

        let frames = if let Some(update) = message.update {
            let mut boards = Vec::with_capacity(update.patches.len() + 1);
            boards.push(update.prev_board.clone());
            boards.extend(apply_patches(&update.prev_board, &update.patches));

            let mut patches = Vec::with_capacity(update.patches.len() + 1);
            patches.push(update.prev_board.to_patch());
            patches.extend(update.patches);

            let mut cache = self.inner.cache.borrow_mut();
            cache.boards = boards;
            cache.patches = patches;
            cache.ctx = Some(update.ctx);
            cache.action = update.action;
            cache.idx = Some(update.idx);
            debug!(idx = update.idx, "Full update");

            Some(frames_from(&cache, 1, update.is_final))
        } else if let Some(hot) = message.hot_update {
            let mut cache = self.inner.cache.borrow_mut();
            let expected = cache.idx.map(|idx| idx + 1);
            let base = cache.boards.last().cloned();

            let base = match base {
                Some(base) if cache.ctx.is_some() && expected == Some(hot.idx) => base,
                _ => {
                    drop(cache);
                    return Err(self.desync(expected, hot.idx));
                }
            };

            cache.boards = apply_patches(&base, &hot.patches);
            cache.patches = hot.patches;
            cache.action = hot.action;
            cache.idx = Some(hot.idx);
            debug!(idx = hot.idx, "Hot update");

            Some(frames_from(&cache, 0, hot.is_final))
        } else {
            None
        };

        match frames {
            Some(frames) => {
                if self.inner.meter.status().current().is_some() {
                    self.inner.meter.push_states(frames);
                } else {
                    self.inner.meter.reset(frames);
                }
            }
            None => self.emit_state(),
        }

        Ok(())
    }

    /// Send a game action for this client's seat.
    pub fn submit(&self, action: Action) -> Result<(), ClientError> {
        if !self.inner.game.has_action(&action.kind) {
            return Err(ClientError::UnknownAction(action.kind));
        }
        self.inner.connection.send(ClientMessage::Action { action })
    }

    /// Ask the server for a fresh full update.
    pub fn request_sync(&self) -> Result<(), ClientError> {
        self.inner.connection.send(ClientMessage::SyncRequest)
    }

    /// Ask the server to start the game.
    pub fn start(&self) -> Result<(), ClientError> {
        self.inner.connection.send(ClientMessage::Start)
    }

    /// Ask the server to seat a bot.
    pub fn add_bot(&self) -> Result<(), ClientError> {
        self.inner.connection.send(ClientMessage::AddBot)
    }

    /// Leave the session.
    pub fn leave(&self) -> Result<(), ClientError> {
        self.inner.connection.send(ClientMessage::Leave)
    }

    /// Hold presentation until `gate` completes.
    ///
    /// Ignored until a frame is being presented.
    ///
    /// # Panics
    ///
    /// A delay gate (`Duration` or millis) panics when registered outside a
    /// `tokio::task::LocalSet`; see [`Task::delay`](crate::meter::task::Task::delay).
    pub fn wait_for(&self, gate: impl Into<Gate>) {
        let presenting = self.inner.view.borrow().frame.is_some();
        if presenting {
            self.inner.meter.wait_for(gate);
        }
    }

    fn desync(&self, expected: Option<u64>, got: u64) -> ClientError {
        warn!(?expected, got, "Lost sync with server state");
        {
            let mut view = self.inner.view.borrow_mut();
            view.err = Some(ClientErr::now(ErrorCode::SyncErr, "Lost sync with server state."));
            view.connected = false;
        }
        self.inner.connection.close();
        self.emit_state();
        ClientError::Desync { expected, got }
    }

    fn emit_state(&self) {
        let state = {
            let mut view = self.inner.view.borrow_mut();
            let cache = self.inner.cache.borrow();

            let mode = match &view.loc {
                None => ClientMode::Title,
                Some(loc) if !loc.started => ClientMode::Lobby,
                Some(_) => ClientMode::Game,
            };

            ClientState {
                mode,
                connected: view.connected,
                err: view.err.take(),
                loc: view.loc.clone(),
                sockets_status: view.sockets_status.clone(),
                frame: view.frame.clone(),
                history_string: cache.history_string.clone(),
            }
        };

        self.inner.state.next(state);
    }
}

/// Frames for the cached boards; the action lands on `action_frame`.
fn frames_from(cache: &Cache, action_frame: usize, is_final: bool) -> Vec<GameFrame> {
    let (Some(idx), Some(ctx)) = (cache.idx, cache.ctx.as_ref()) else {
        return Vec::new();
    };

    cache
        .boards
        .iter()
        .enumerate()
        .map(|(i, board)| GameFrame {
            segment: idx,
            frame: i,
            board: board.clone(),
            patch: cache.patches.get(i).cloned().unwrap_or_else(Patch::new),
            ctx: ctx.clone(),
            action: if i == action_frame { cache.action.clone() } else { None },
            is_final,
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
