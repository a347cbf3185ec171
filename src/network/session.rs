//! Game Session Management
//!
//! Server side of replication. A session seats players, owns the
//! authoritative [`GameStore`] once the game starts, and fans out per-seat
//! masked updates: a full update on start and reconnect, a hot update after
//! every accepted action.
//!
//! Seats are either humans with an outbound channel or bots. Bots are seated
//! explicitly from the lobby (`add_bot`), or fill every seat past the last
//! seated one at start when `auto_bots` is on.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::game::definition::{Action, Game, PlayerIndex};
use crate::game::store::{GameStore, InputCtx, StoreError};
use crate::network::protocol::{
    ClientMessage, ErrorCode, Loc, ServerMessage, SocketMeta, SocketsStatus,
};

/// Unique session identifier.
pub type SessionId = String;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Seating players.
    Lobby,
    /// Game in progress.
    Playing,
    /// Game reached its final board.
    Ended,
    /// Session closed.
    Closed,
}

/// Configuration for a game session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Seated humans required to start.
    pub min_ready: usize,
    /// Let the game's bot play every seat without a human.
    pub auto_bots: bool,
    /// Attach the history string to the final update.
    pub send_history_on_end: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_ready: 1,
            auto_bots: true,
            send_history_on_end: true,
        }
    }
}

/// An occupied seat.
#[derive(Debug)]
struct Seat {
    /// Outbound channel; `None` once the player left, and always for bots.
    sender: Option<mpsc::UnboundedSender<ServerMessage>>,
    meta: SocketMeta,
    bot: bool,
}

impl Seat {
    fn is_present(&self) -> bool {
        self.bot || self.sender.is_some()
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Every seat is taken.
    #[error("Session is full")]
    SessionFull,

    /// Operation requires the lobby.
    #[error("Game already started")]
    AlreadyStarted,

    /// Operation requires a running game.
    #[error("Game not in progress")]
    NotPlaying,

    /// Not enough players to start.
    #[error("Not enough players: need {need}, have {have}")]
    NotEnoughPlayers {
        /// Required.
        need: usize,
        /// Seated.
        have: usize,
    },

    /// No human at that seat.
    #[error("Unknown seat {0}")]
    UnknownSeat(PlayerIndex),

    /// Store rejected the request.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One game from lobby to teardown.
pub struct GameSession<G: Game> {
    /// Unique session identifier.
    pub id: SessionId,
    /// Current state.
    state: SessionState,
    /// Session configuration.
    config: SessionConfig,
    /// Requested context.
    input: InputCtx,
    /// Game definition, moved into the store on start.
    game: Option<G>,
    /// Authoritative store (when playing).
    store: Option<GameStore<G>>,
    /// Occupied seats, by player index.
    seats: Vec<Seat>,
}

impl<G: Game> GameSession<G> {
    /// Create a new session.
    pub fn new(game: G, input: InputCtx, config: SessionConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Lobby,
            config,
            input,
            game: Some(game),
            store: None,
            seats: Vec::new(),
        }
    }

    /// Seat a human; returns their player index.
    pub fn add_player(
        &mut self,
        sender: mpsc::UnboundedSender<ServerMessage>,
        meta: SocketMeta,
    ) -> Result<PlayerIndex, SessionError> {
        let player = self.seat(Seat {
            sender: Some(sender),
            meta,
            bot: false,
        })?;
        debug!(session = %self.id, player, "Player seated");
        Ok(player)
    }

    /// Seat a bot in the next free seat; returns its player index.
    pub fn add_bot(&mut self) -> Result<PlayerIndex, SessionError> {
        let name = format!("Bot {}", self.seats.len() + 1);
        let player = self.seat(Seat {
            sender: None,
            meta: SocketMeta {
                avatar: None,
                name: Some(name),
            },
            bot: true,
        })?;
        debug!(session = %self.id, player, "Bot seated");
        Ok(player)
    }

    fn seat(&mut self, seat: Seat) -> Result<PlayerIndex, SessionError> {
        if self.state != SessionState::Lobby {
            return Err(SessionError::AlreadyStarted);
        }

        let max = self
            .game
            .as_ref()
            .map(|g| g.meta().players.1)
            .unwrap_or(0);
        if self.seats.len() >= max {
            return Err(SessionError::SessionFull);
        }

        self.seats.push(seat);
        self.broadcast_lobby();
        Ok(self.seats.len() - 1)
    }

    /// Build the store and send every seat its first full update.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Lobby {
            return Err(SessionError::AlreadyStarted);
        }

        let humans = self.seats.iter().filter(|s| !s.bot).count();
        if humans < self.config.min_ready.max(1) {
            return Err(SessionError::NotEnoughPlayers {
                need: self.config.min_ready.max(1),
                have: humans,
            });
        }

        let have = self.seats.len();

        let game = self.game.take().ok_or(SessionError::AlreadyStarted)?;
        let (min, _) = game.meta().players;
        let requested = self.input.num_players.unwrap_or(have).max(have);

        if !self.config.auto_bots && requested.max(min) > have {
            self.game = Some(game);
            return Err(SessionError::NotEnoughPlayers {
                need: requested.max(min),
                have,
            });
        }

        let input = InputCtx {
            num_players: Some(requested),
            ..self.input.clone()
        };

        let store = match GameStore::new(game, input) {
            Ok(store) => store,
            Err(e) => {
                warn!(session = %self.id, error = %e, "Failed to start game");
                self.state = SessionState::Closed;
                return Err(e.into());
            }
        };

        info!(
            session = %self.id,
            players = store.ctx().num_players,
            humans,
            seed = %store.ctx().seed,
            "Game started"
        );

        self.store = Some(store);
        self.state = SessionState::Playing;
        self.check_ended();

        for player in 0..self.seats.len() {
            self.send_full_update(player);
        }

        self.run_bots();
        Ok(())
    }

    /// Apply an action from a human seat.
    ///
    /// A rejection is also reported to the submitter as an `err` message.
    pub fn submit(&mut self, player: PlayerIndex, action: Action) -> Result<(), SessionError> {
        self.human(player)?;
        let store = match (self.state, self.store.as_mut()) {
            (SessionState::Playing, Some(store)) => store,
            _ => return Err(SessionError::NotPlaying),
        };

        if let Err(e) = store.submit(action, player) {
            let msg = ServerMessage::at(self.loc(player)).with_err(ErrorCode::ActionErr, e.to_string());
            self.send(player, msg);
            return Err(e.into());
        }

        self.broadcast_hot_update();
        self.run_bots();
        Ok(())
    }

    /// Dispatch a message received from a seat.
    pub fn handle_client_message(
        &mut self,
        player: PlayerIndex,
        message: ClientMessage,
    ) -> Result<(), SessionError> {
        match message {
            ClientMessage::Action { action } => self.submit(player, action),
            ClientMessage::SyncRequest => {
                self.human(player)?;
                self.send_full_update(player);
                Ok(())
            }
            ClientMessage::Leave => self.leave(player),
            ClientMessage::Start => {
                self.human(player)?;
                let result = self.start();
                self.report(player, &result);
                result
            }
            ClientMessage::AddBot => {
                self.human(player)?;
                let result = self.add_bot().map(|_| ());
                self.report(player, &result);
                result
            }
        }
    }

    /// Tell a seat why its lobby request failed.
    fn report(&self, player: PlayerIndex, result: &Result<(), SessionError>) {
        if let Err(e) = result {
            let msg = ServerMessage::at(self.loc(player)).with_err(ErrorCode::SessionErr, e.to_string());
            self.send(player, msg);
        }
    }

    fn human(&self, player: PlayerIndex) -> Result<&Seat, SessionError> {
        self.seats
            .get(player)
            .filter(|seat| !seat.bot)
            .ok_or(SessionError::UnknownSeat(player))
    }

    fn human_mut(&mut self, player: PlayerIndex) -> Result<&mut Seat, SessionError> {
        self.seats
            .get_mut(player)
            .filter(|seat| !seat.bot)
            .ok_or(SessionError::UnknownSeat(player))
    }

    /// Replace a seat's channel and resend a full update.
    pub fn reconnect(
        &mut self,
        player: PlayerIndex,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<(), SessionError> {
        let seat = self.human_mut(player)?;
        seat.sender = Some(sender);
        debug!(session = %self.id, player, "Player reconnected");

        if self.store.is_some() {
            self.send_full_update(player);
        } else {
            self.broadcast_lobby();
        }
        Ok(())
    }

    /// Drop a seat's channel. The seat is kept for reconnection.
    pub fn leave(&mut self, player: PlayerIndex) -> Result<(), SessionError> {
        let seat = self.human_mut(player)?;
        if let Some(tx) = seat.sender.take() {
            let _ = tx.send(ServerMessage::teardown());
        }
        debug!(session = %self.id, player, "Player left");
        Ok(())
    }

    /// Tear the session down for everyone.
    pub fn close(&mut self) {
        for seat in &mut self.seats {
            if let Some(tx) = seat.sender.take() {
                let _ = tx.send(ServerMessage::teardown());
            }
        }
        self.state = SessionState::Closed;
        info!(session = %self.id, "Session closed");
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Authoritative store (once started).
    pub fn store(&self) -> Option<&GameStore<G>> {
        self.store.as_ref()
    }

    /// Occupied seats, humans and bots.
    pub fn player_count(&self) -> usize {
        self.seats.len()
    }

    // -------------------------------------------------------------------------
    // Fan-out
    // -------------------------------------------------------------------------

    fn loc(&self, player: PlayerIndex) -> Loc {
        Loc {
            id: self.id.clone(),
            player_index: Some(player),
            started: self.state != SessionState::Lobby,
        }
    }

    fn sockets_status(&self) -> SocketsStatus {
        let total = self
            .store
            .as_ref()
            .map_or(self.seats.len(), |s| s.ctx().num_players);

        (0..total)
            .map(|i| {
                self.seats
                    .get(i)
                    .filter(|seat| seat.is_present())
                    .map(|seat| seat.meta.clone())
            })
            .collect()
    }

    fn send(&self, player: PlayerIndex, message: ServerMessage) {
        let Some(tx) = self.seats.get(player).and_then(|s| s.sender.as_ref()) else {
            return;
        };
        if tx.send(message).is_err() {
            debug!(session = %self.id, player, "Dropped message for disconnected player");
        }
    }

    fn history_string(&self) -> Option<String> {
        let store = self.store.as_ref()?;
        if !(store.is_final() && self.config.send_history_on_end) {
            return None;
        }
        match store.get_history().to_history_string() {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(session = %self.id, error = %e, "Failed to serialize history");
                None
            }
        }
    }

    fn broadcast_lobby(&self) {
        let sockets = self.sockets_status();
        for player in 0..self.seats.len() {
            let msg = ServerMessage::at(self.loc(player)).with_sockets(sockets.clone());
            self.send(player, msg);
        }
    }

    fn send_full_update(&self, player: PlayerIndex) {
        let mut msg = ServerMessage::at(self.loc(player)).with_sockets(self.sockets_status());
        if let Some(store) = &self.store {
            msg = msg.with_update(store.get(Some(player)));
        }
        if let Some(history) = self.history_string() {
            msg = msg.with_history(history);
        }
        self.send(player, msg);
    }

    fn broadcast_hot_update(&mut self) {
        self.check_ended();
        let Some(store) = &self.store else {
            return;
        };

        let history = self.history_string();
        for player in 0..self.seats.len() {
            let mut msg = ServerMessage::at(self.loc(player)).with_hot_update(store.get(Some(player)).into_hot());
            if let Some(history) = &history {
                msg = msg.with_history(history.clone());
            }
            self.send(player, msg);
        }
    }

    fn check_ended(&mut self) {
        if self.state == SessionState::Playing && self.store.as_ref().is_some_and(|s| s.is_final()) {
            self.state = SessionState::Ended;
            info!(session = %self.id, "Game ended");
        }
    }

    /// Let bots move until a human must act or the game ends.
    fn run_bots(&mut self) {
        loop {
            let Some(store) = self.store.as_mut() else {
                return;
            };
            if store.is_final() {
                return;
            }

            let seated = self.seats.len();
            let auto = if self.config.auto_bots { seated..store.ctx().num_players } else { 0..0 };
            let bots: Vec<PlayerIndex> = (0..seated)
                .filter(|&i| self.seats[i].bot)
                .chain(auto)
                .collect();
            let mut acted = false;

            for player in bots {
                let Some(action) = store.bot_action(player) else {
                    continue;
                };
                match store.submit(action, player) {
                    Ok(()) => {
                        debug!(session = %self.id, player, "Bot moved");
                        acted = true;
                        break;
                    }
                    Err(e) => warn!(session = %self.id, player, error = %e, "Bot move rejected"),
                }
            }

            if !acted {
                return;
            }
            self.broadcast_hot_update();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
