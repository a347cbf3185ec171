//! Tabletop Demo
//!
//! Plays one game of War end to end: a server-side session with one human
//! seat and bots for the rest, a replication client with paced playback,
//! and a replay check of the shared history.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tabletop::{
    core::{hash::hash_board, with_selector},
    game::{verify_history, History, InputCtx, War},
    meter::{MeterConfig, MeterMode},
    network::{ChannelConnection, ClientState, GameSession, SessionConfig, SessionState, SocketMeta},
    Game, ReplicationClient, VERSION,
};

/// Upper bound on client/server exchange rounds.
const MAX_ROUNDS: usize = 64;

/// Presentation delay per frame.
const FRAME_DELAY: Duration = Duration::from_millis(120);

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Tabletop v{}", VERSION);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, demo_session())
}

/// Run a three-seat War session with one human seat.
async fn demo_session() -> anyhow::Result<()> {
    info!("=== Starting Demo Session ===");

    let input = InputCtx {
        num_players: Some(3),
        seed: Some("demo".to_string()),
        ..Default::default()
    };
    let mut session = GameSession::new(War::new(), input, SessionConfig::default());

    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let meta = SocketMeta {
        name: Some("host".to_string()),
        avatar: None,
    };
    let player = session.add_player(server_tx, meta)?;
    info!("Session {} seated player {}", session.id, player);

    let (connection, mut outbox) = ChannelConnection::pair();
    let client = ReplicationClient::new(War::new(), connection, MeterConfig::default());
    client.on_open();

    // Log every presented frame and hold it on screen for a moment.
    let presenter = client.clone();
    let _frames = with_selector(
        &client.emitter(),
        |state: &ClientState| state.frame.as_ref().map(|f| (f.segment, f.frame)),
        move |position: &Option<(u64, usize)>, _| {
            let Some(frame) = presenter.state().frame else {
                return;
            };
            if position.is_some() {
                info!(
                    segment = frame.segment,
                    frame = frame.frame,
                    phase = %frame.board.phase(),
                    table = %frame.board.get("table").cloned().unwrap_or_default(),
                    "Presenting"
                );
                presenter.wait_for(FRAME_DELAY);
            }
        },
    );
    let _errors = client.emitter().subscribe(|state: &ClientState, _| {
        if let Some(err) = &state.err {
            warn!(code = ?err.code, "{}", err.message);
        }
    });

    session.start()?;

    for _ in 0..MAX_ROUNDS {
        while let Ok(message) = server_rx.try_recv() {
            client.handle_message(message)?;
        }
        if session.state() != SessionState::Playing {
            break;
        }

        // The human seat plays whatever the bot would.
        if let (Some(board), Some(frame)) = (client.latest_board(), client.state().frame) {
            if let Some(action) = client.game().bot(&board, &frame.ctx, player) {
                info!("Player {} plays {}", player, action.data);
                client.submit(action)?;
            }
        }

        while let Ok(message) = outbox.try_recv() {
            session.handle_client_message(player, message)?;
        }
    }

    // Let playback catch up.
    while client.meter().status().mode != MeterMode::Idle {
        tokio::time::sleep(FRAME_DELAY / 2).await;
    }

    // Print final results
    info!("=== Session Results ===");
    let store = session
        .store()
        .ok_or_else(|| anyhow::anyhow!("session never started"))?;
    let final_hash = hash_board(store.board());
    info!("Final board: {}", serde_json::to_string(store.board().fields())?);
    info!("Final Board Hash: {}", hex::encode(final_hash));

    // Verify determinism by replaying the shared history
    info!("=== Verifying Determinism ===");
    let history_string = client
        .state()
        .history_string
        .ok_or_else(|| anyhow::anyhow!("no history received"))?;
    let history = History::from_history_string(&history_string)?;
    let result = verify_history(&War::new(), &history, &final_hash)?;

    info!("Replay Board Hash: {}", hex::encode(result.computed_final_hash));

    if result.valid {
        info!("DETERMINISM VERIFIED: Hashes match!");
    } else {
        warn!("DETERMINISM FAILURE: Hashes differ!");
    }

    session.close();
    Ok(())
}
