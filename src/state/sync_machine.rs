use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Score payload categories uploaded to the scoreboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreCategory {
    /// The machine's high score table.
    High,
    /// Scores from the most recently finished game.
    Last,
}

impl fmt::Display for ScoreCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreCategory::High => f.write_str("high"),
            ScoreCategory::Last => f.write_str("last"),
        }
    }
}

/// Phases a score category moves through while handling one file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Waiting for the next file event.
    Idle,
    /// Reading the score file through the game adapter.
    Parsing,
    /// Parsed scores match the last uploaded snapshot.
    Unchanged,
    /// Parsed scores differ from the last uploaded snapshot.
    Changed,
    /// Handing the new scores to the RPC channel.
    Uploading,
}

/// Events that drive a [`CategoryMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// The category's file was closed for writing.
    FileChanged,
    /// The adapter produced scores; `changed` compares them with the snapshot.
    Parsed {
        /// Whether the parsed scores differ from the snapshot.
        changed: bool,
    },
    /// The adapter could not read the file.
    ParseFailed,
    /// The upload frame is about to be sent.
    UploadStarted,
    /// Work for this event is finished.
    Settled,
}

/// Error returned when an event cannot be applied from the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {category} sync transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// Category whose machine rejected the event.
    pub category: ScoreCategory,
    /// Phase the machine was in.
    pub from: SyncPhase,
    /// Rejected event.
    pub event: SyncEvent,
}

/// Per-category phase machine:
/// `Idle -> Parsing -> (Unchanged -> Idle | Changed -> Uploading -> Idle)`.
#[derive(Debug, Clone)]
pub struct CategoryMachine {
    category: ScoreCategory,
    phase: SyncPhase,
    cycles: usize,
}

impl CategoryMachine {
    /// Create an idle machine for `category`.
    pub fn new(category: ScoreCategory) -> Self {
        Self {
            category,
            phase: SyncPhase::Idle,
            cycles: 0,
        }
    }

    /// Category this machine tracks.
    pub fn category(&self) -> ScoreCategory {
        self.category
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Number of file events fully processed.
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    /// Apply an event, returning the new phase.
    pub fn apply(&mut self, event: SyncEvent) -> Result<SyncPhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        if next == SyncPhase::Idle {
            self.cycles += 1;
        }
        self.phase = next;
        Ok(next)
    }

    /// Force the machine back to idle after a bookkeeping error.
    pub fn reset(&mut self) {
        self.phase = SyncPhase::Idle;
    }

    fn compute_transition(&self, event: SyncEvent) -> Result<SyncPhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (SyncPhase::Idle, SyncEvent::FileChanged) => SyncPhase::Parsing,
            (SyncPhase::Parsing, SyncEvent::Parsed { changed: false }) => SyncPhase::Unchanged,
            (SyncPhase::Parsing, SyncEvent::Parsed { changed: true }) => SyncPhase::Changed,
            (SyncPhase::Parsing, SyncEvent::ParseFailed) => SyncPhase::Idle,
            (SyncPhase::Unchanged, SyncEvent::Settled) => SyncPhase::Idle,
            (SyncPhase::Changed, SyncEvent::UploadStarted) => SyncPhase::Uploading,
            (SyncPhase::Uploading, SyncEvent::Settled) => SyncPhase::Idle,
            (from, event) => {
                return Err(InvalidTransition {
                    category: self.category,
                    from,
                    event,
                });
            }
        };

        Ok(next)
    }
}
