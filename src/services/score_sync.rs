//! File-event driven score upload with per-category change detection.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
    dao::game_adapter::GameAdapter,
    dto::{rpc::RpcRequest, scores::ScoreUpload},
    error::RpcError,
    services::{file_watcher::FileWatcher, rpc_channel::RpcClient, session_service::SessionManager},
    state::{CategoryMachine, ScoreCategory, ShutdownSignal, SyncEvent},
};

/// Score upload endpoint.
pub const SCORES_PATH: &str = "/api/v1/scores";

/// What one sync pass did for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Scores matched the last upload; nothing was sent.
    Unchanged,
    /// New scores were handed to the transport.
    Uploaded,
    /// New scores could not be sent; the next file event retries.
    UploadFailed,
    /// The score file could not be read.
    ParseFailed,
}

struct CategoryState {
    machine: CategoryMachine,
    snapshot: Option<Value>,
}

impl CategoryState {
    fn new(category: ScoreCategory) -> Self {
        Self {
            machine: CategoryMachine::new(category),
            snapshot: None,
        }
    }

    fn advance(&mut self, event: SyncEvent) {
        if let Err(err) = self.machine.apply(event) {
            error!(error = %err, "score sync out of step; resetting category");
            self.machine.reset();
        }
    }
}

/// Keeps the scoreboard in step with the game's score files.
///
/// Events are handled one at a time, so no two passes for a category overlap.
pub struct ScoreSync {
    adapter: Arc<dyn GameAdapter>,
    rpc: Arc<dyn RpcClient>,
    session: Arc<SessionManager>,
    high: CategoryState,
    last: CategoryState,
}

impl ScoreSync {
    /// Sync engine with empty snapshots.
    pub fn new(
        adapter: Arc<dyn GameAdapter>,
        rpc: Arc<dyn RpcClient>,
        session: Arc<SessionManager>,
    ) -> Self {
        Self {
            adapter,
            rpc,
            session,
            high: CategoryState::new(ScoreCategory::High),
            last: CategoryState::new(ScoreCategory::Last),
        }
    }

    /// Last uploaded scores for `category`.
    pub fn snapshot(&self, category: ScoreCategory) -> Option<&Value> {
        match category {
            ScoreCategory::High => self.high.snapshot.as_ref(),
            ScoreCategory::Last => self.last.snapshot.as_ref(),
        }
    }

    /// React to `filename` having been written. A file serving both categories drives the
    /// high scores first.
    pub async fn handle_event(&mut self, filename: &str) -> Vec<(ScoreCategory, SyncOutcome)> {
        let mut outcomes = Vec::new();
        if filename == self.adapter.high_scores_file() {
            outcomes.push((ScoreCategory::High, self.sync(ScoreCategory::High).await));
        }
        if filename == self.adapter.last_scores_file() {
            outcomes.push((ScoreCategory::Last, self.sync(ScoreCategory::Last).await));
        }
        if outcomes.is_empty() {
            debug!(file = %filename, "ignoring unrelated file event");
        }
        outcomes
    }

    /// Upload both categories once, regardless of file events.
    pub async fn upload_all(&mut self) -> Vec<(ScoreCategory, SyncOutcome)> {
        let mut outcomes = Vec::with_capacity(2);
        for category in [ScoreCategory::High, ScoreCategory::Last] {
            outcomes.push((category, self.sync(category).await));
        }
        outcomes
    }

    /// One `Idle -> Parsing -> ... -> Idle` pass for `category`.
    ///
    /// High scores are uploaded only when they differ from the snapshot. Last-game scores are
    /// always uploaded and always reset the roster, whether or not the upload went out.
    pub async fn sync(&mut self, category: ScoreCategory) -> SyncOutcome {
        let Self {
            adapter,
            rpc,
            session,
            high,
            last,
        } = self;
        let state = match category {
            ScoreCategory::High => high,
            ScoreCategory::Last => last,
        };

        state.advance(SyncEvent::FileChanged);
        let parsed = match category {
            ScoreCategory::High => adapter.process_high_scores(),
            ScoreCategory::Last => adapter.process_last_game_scores(),
        };
        let scores = match parsed {
            Ok(scores) => scores,
            Err(err) => {
                warn!(category = %category, error = %err, "failed to parse scores");
                state.advance(SyncEvent::ParseFailed);
                return SyncOutcome::ParseFailed;
            }
        };

        // Every last-game event is a finished game, even when its scores repeat.
        let changed = category == ScoreCategory::Last || state.snapshot.as_ref() != Some(&scores);
        state.advance(SyncEvent::Parsed { changed });
        if !changed {
            debug!(category = %category, "scores unchanged");
            state.advance(SyncEvent::Settled);
            return SyncOutcome::Unchanged;
        }

        state.advance(SyncEvent::UploadStarted);
        let games_played = match category {
            ScoreCategory::High => None,
            ScoreCategory::Last => match adapter.games_played() {
                Ok(count) => Some(count),
                Err(err) => {
                    warn!(error = %err, "games played counter unavailable");
                    None
                }
            },
        };

        let outcome = match upload(&**rpc, category, &scores, games_played).await {
            Ok(()) => {
                info!(category = %category, "scores uploaded");
                state.snapshot = Some(scores);
                SyncOutcome::Uploaded
            }
            Err(err) => {
                warn!(category = %category, error = %err, "score upload failed; retrying on next change");
                SyncOutcome::UploadFailed
            }
        };
        state.advance(SyncEvent::Settled);

        if category == ScoreCategory::Last {
            session.reset().await;
        }
        outcome
    }

    /// Handle watcher events until shutdown or until the watcher is exhausted.
    pub async fn run<W>(mut self, mut watcher: W, mut shutdown: ShutdownSignal)
    where
        W: FileWatcher,
    {
        info!(
            game = self.adapter.name(),
            dir = %self.adapter.scores_path().display(),
            "watching score files"
        );
        loop {
            let event = tokio::select! {
                _ = shutdown.wait() => break,
                event = watcher.next_event() => event,
            };
            let Some(filename) = event else {
                warn!("file watcher stopped");
                break;
            };
            self.handle_event(&filename).await;
        }
        info!("score sync stopped");
    }
}

async fn upload(
    rpc: &dyn RpcClient,
    category: ScoreCategory,
    scores: &Value,
    games_played: Option<u32>,
) -> Result<(), RpcError> {
    let body = serde_json::to_value(ScoreUpload {
        category,
        scores,
        games_played,
    })?;
    rpc.send(RpcRequest::post(SCORES_PATH).with_body(body)).await
}
