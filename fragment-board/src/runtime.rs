//! Tokio host for a [`Board`].
//!
//! A single task owns the board and serializes three sources with
//! `tokio::select!`: input events, generation completions, and the
//! scheduler's next deadline. Generation jobs run in their own tasks and
//! report back over a channel. Views are published on a `watch` channel
//! after every step.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fragment_core::config::LlmConfig;
use fragment_core::persistence;
use fragment_core::types::{Entity, Millis, Position};
use fragment_core::{FragmentConfig, FragmentError};
use fragment_llm::types::Sampling;
use fragment_llm::{LlmClient, LlmProvider};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::board::Board;
use crate::dialogue::DialogueAdapter;
use crate::events::{BoardEvent, Completion, Effect, RequestToken};
use crate::presentation::NodeView;

/// Input queue depth.
const INPUT_CAPACITY: usize = 256;

enum Command {
    Event(BoardEvent),
    Shutdown,
}

/// Wall-clock milliseconds that follow tokio's (pausable) clock.
#[derive(Debug, Clone, Copy)]
struct Clock {
    origin: Instant,
    epoch_ms: Millis,
}

impl Clock {
    fn start() -> Self {
        Self { origin: Instant::now(), epoch_ms: chrono::Utc::now().timestamp_millis() }
    }

    fn now(&self) -> Millis {
        let elapsed = Millis::try_from(self.origin.elapsed().as_millis()).unwrap_or(Millis::MAX);
        self.epoch_ms.saturating_add(elapsed)
    }

    fn instant_at(&self, at: Millis) -> Instant {
        let offset = u64::try_from(at.saturating_sub(self.epoch_ms)).unwrap_or(0);
        self.origin + Duration::from_millis(offset)
    }
}

/// Handle to a running board.
pub struct RuntimeHandle {
    events: mpsc::Sender<Command>,
    views: watch::Receiver<Vec<NodeView>>,
    placements: watch::Receiver<Option<Position>>,
    task: JoinHandle<Board>,
}

impl RuntimeHandle {
    /// Queue an input. Returns `false` once the runtime has stopped.
    pub async fn send(&self, event: BoardEvent) -> bool {
        self.events.send(Command::Event(event)).await.is_ok()
    }

    /// Subscribe to render records.
    #[must_use]
    pub fn views(&self) -> watch::Receiver<Vec<NodeView>> {
        self.views.clone()
    }

    /// Subscribe to character-form placements answered to pane clicks.
    #[must_use]
    pub fn placements(&self) -> watch::Receiver<Option<Position>> {
        self.placements.clone()
    }

    /// Stop the loop, cancel timers, abort in-flight generation, and hand
    /// the board back.
    pub async fn shutdown(self) -> Option<Board> {
        if self.events.send(Command::Shutdown).await.is_err() {
            debug!("Runtime already stopped");
        }
        match self.task.await {
            Ok(board) => Some(board),
            Err(e) => {
                warn!(error = %e, "Board task ended abnormally");
                None
            }
        }
    }
}

/// Spawns and drives boards.
pub struct BoardRuntime;

impl BoardRuntime {
    /// Start `board` on the current tokio runtime.
    #[must_use]
    pub fn spawn(board: Board, adapter: DialogueAdapter) -> RuntimeHandle {
        let (events_tx, events_rx) = mpsc::channel(INPUT_CAPACITY);
        let (views_tx, views_rx) = watch::channel(board.views());
        let (placements_tx, placements_rx) = watch::channel(None);
        let task = tokio::spawn(run(board, Arc::new(adapter), events_rx, views_tx, placements_tx));
        RuntimeHandle { events: events_tx, views: views_rx, placements: placements_rx, task }
    }
}

async fn run(
    mut board: Board,
    adapter: Arc<DialogueAdapter>,
    mut events: mpsc::Receiver<Command>,
    views: watch::Sender<Vec<NodeView>>,
    placements: watch::Sender<Option<Position>>,
) -> Board {
    let clock = Clock::start();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
    let mut tasks: HashMap<RequestToken, JoinHandle<()>> = HashMap::new();
    info!("Board runtime started");

    let effects = board.start(clock.now());
    perform(effects, &adapter, &done_tx, &mut tasks, &placements);
    views.send_replace(board.views());

    loop {
        let deadline = board.next_deadline().map(|at| clock.instant_at(at));
        let effects = tokio::select! {
            command = events.recv() => match command {
                Some(Command::Event(event)) => board.handle(event, clock.now()),
                Some(Command::Shutdown) | None => break,
            },
            Some(done) = done_rx.recv() => {
                tasks.remove(&done.token);
                board.complete(done, clock.now())
            }
            () = sleep_until(deadline) => board.advance(clock.now()),
        };
        perform(effects, &adapter, &done_tx, &mut tasks, &placements);
        views.send_replace(board.views());
    }

    for (_, task) in tasks.drain() {
        task.abort();
    }
    board.shutdown();
    views.send_replace(board.views());
    info!("Board runtime stopped");
    board
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

fn perform(
    effects: Vec<Effect>,
    adapter: &Arc<DialogueAdapter>,
    done_tx: &mpsc::UnboundedSender<Completion>,
    tasks: &mut HashMap<RequestToken, JoinHandle<()>>,
    placements: &watch::Sender<Option<Position>>,
) {
    tasks.retain(|_, task| !task.is_finished());
    for effect in effects {
        match effect {
            Effect::Generate { token, job } => {
                let adapter = Arc::clone(adapter);
                let done_tx = done_tx.clone();
                let task = tokio::spawn(async move {
                    let completion = adapter.run(token, &job).await;
                    if done_tx.send(completion).is_err() {
                        debug!(%token, "Runtime gone before completion");
                    }
                });
                tasks.insert(token, task);
            }
            Effect::PlaceCharacter { position } => {
                placements.send_replace(Some(position));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring from configuration
// ---------------------------------------------------------------------------

/// Build the generation client described by `llm`.
///
/// A missing API key yields a client without backend; every call then falls
/// back to canned dialogue.
#[must_use]
pub fn llm_client(llm: &LlmConfig) -> LlmClient {
    let provider = LlmProvider::from_env(&llm.provider, &llm.base_url, &llm.api_key_env);
    LlmClient::new(provider, llm.model.clone(), llm.max_retries)
        .with_sampling(Sampling {
            temperature: llm.temperature,
            top_p: llm.top_p,
            max_output_tokens: llm.max_output_tokens,
        })
        .with_timeout(llm.request_timeout_ms)
}

/// Open the configured snapshot store and restore a board from it.
///
/// # Errors
/// Returns an error if the persistence backend is unknown or cannot be opened.
pub fn open_board(config: FragmentConfig, default_entities: Vec<Entity>) -> Result<Board, FragmentError> {
    match persistence::open_store(&config.persistence)? {
        Some(store) => Ok(Board::restore(config, store, default_entities)),
        None => Ok(Board::new(config, default_entities)),
    }
}
