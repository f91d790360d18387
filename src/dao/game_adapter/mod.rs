//! Per-title access to score and audit files.

mod halloween;

use std::{path::Path, sync::Arc};

use serde_json::Value;

use crate::error::ParseError;

pub use self::halloween::SpookyConfigAdapter;

/// Knows where a game keeps its score files and how to read them.
///
/// Implementations are stateless; every call re-reads the files.
pub trait GameAdapter: Send + Sync {
    /// Short registry name, e.g. `hwn`.
    fn name(&self) -> &str;
    /// Directory holding the score and audit files.
    fn scores_path(&self) -> &Path;
    /// File name (inside [`Self::scores_path`]) of the high score table.
    fn high_scores_file(&self) -> &str;
    /// File name (inside [`Self::scores_path`]) of the last-game scores.
    fn last_scores_file(&self) -> &str;
    /// Parse the high score table.
    fn process_high_scores(&self) -> Result<Value, ParseError>;
    /// Parse the scores of the last finished game.
    fn process_last_game_scores(&self) -> Result<Value, ParseError>;
    /// Read the lifetime games-played counter.
    fn games_played(&self) -> Result<u32, ParseError>;
}

/// Names accepted by [`adapter_for`].
pub fn supported_games() -> &'static [&'static str] {
    &["hwn", "um"]
}

/// Look up the bundled adapter registered under `name`.
pub fn adapter_for(name: &str) -> Option<Arc<dyn GameAdapter>> {
    match name {
        "hwn" => Some(Arc::new(SpookyConfigAdapter::halloween())),
        "um" => Some(Arc::new(SpookyConfigAdapter::ultraman())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_supported_game_has_an_adapter() {
        for name in supported_games() {
            let adapter = adapter_for(name).unwrap();
            assert_eq!(adapter.name(), *name);
        }
        assert!(adapter_for("tna").is_none());
    }
}
