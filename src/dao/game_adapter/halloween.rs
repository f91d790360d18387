use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::{Value, json};

use super::GameAdapter;
use crate::error::ParseError;

const GAME_ROOT: &str = "/game";
const SCORES_FILE: &str = "highscores.config";
const AUDITS_FILE: &str = "_game_audits.json";
const CLASSIC_ENTRIES: usize = 6;
const LAST_ENTRIES: usize = 4;

/// Adapter for titles storing scores in the line-oriented `highscores.config` file.
///
/// Layout: one header line, six initials/score line pairs, a `[LAST SCORES]` section line,
/// then four last-game scores. High and last scores share the same file.
#[derive(Debug, Clone)]
pub struct SpookyConfigAdapter {
    name: &'static str,
    root: PathBuf,
}

/// Scores parsed out of one read of `highscores.config`.
#[derive(Debug, PartialEq)]
struct ScoreTables {
    classic: Vec<(String, u64)>,
    last: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct Audits {
    games_played: AuditCounter,
}

#[derive(Debug, Deserialize)]
struct AuditCounter {
    value: u32,
}

impl SpookyConfigAdapter {
    /// Halloween, reading from `/game`.
    pub fn halloween() -> Self {
        Self::with_root("hwn", GAME_ROOT)
    }

    /// Ultraman, reading from `/game`.
    pub fn ultraman() -> Self {
        Self::with_root("um", GAME_ROOT)
    }

    /// Adapter named `name` reading files under `root`.
    pub fn with_root(name: &'static str, root: impl Into<PathBuf>) -> Self {
        Self {
            name,
            root: root.into(),
        }
    }

    fn read_tables(&self) -> Result<ScoreTables, ParseError> {
        let path = self.root.join(SCORES_FILE);
        let contents = fs::read_to_string(&path).map_err(|source| ParseError::Io {
            path: path.clone(),
            source,
        })?;
        parse_tables(&contents).map_err(|reason| ParseError::Malformed { path, reason })
    }
}

impl GameAdapter for SpookyConfigAdapter {
    fn name(&self) -> &str {
        self.name
    }

    fn scores_path(&self) -> &Path {
        &self.root
    }

    fn high_scores_file(&self) -> &str {
        SCORES_FILE
    }

    fn last_scores_file(&self) -> &str {
        SCORES_FILE
    }

    fn process_high_scores(&self) -> Result<Value, ParseError> {
        let tables = self.read_tables()?;
        Ok(tables
            .classic
            .into_iter()
            .map(|(initials, score)| json!({ "initials": initials, "score": score }))
            .collect())
    }

    fn process_last_game_scores(&self) -> Result<Value, ParseError> {
        Ok(self.read_tables()?.last.into())
    }

    fn games_played(&self) -> Result<u32, ParseError> {
        let path = self.root.join(AUDITS_FILE);
        let contents = fs::read_to_string(&path).map_err(|source| ParseError::Io {
            path: path.clone(),
            source,
        })?;
        let audits: Audits =
            serde_json::from_str(&contents).map_err(|source| ParseError::Json { path, source })?;
        Ok(audits.games_played.value)
    }
}

fn parse_tables(contents: &str) -> Result<ScoreTables, String> {
    let mut lines = contents.lines().map(str::trim);
    let mut next_line = |what: &str| {
        lines
            .next()
            .ok_or_else(|| format!("file ended before {what}"))
    };

    next_line("header")?;

    let mut classic = Vec::with_capacity(CLASSIC_ENTRIES);
    for rank in 1..=CLASSIC_ENTRIES {
        let initials = next_line("classic initials")?.to_owned();
        let score = parse_score(next_line("classic score")?)
            .map_err(|raw| format!("classic score #{rank} is not a number: `{raw}`"))?;
        classic.push((initials, score));
    }

    next_line("last scores section")?;

    let mut last = Vec::with_capacity(LAST_ENTRIES);
    for player in 1..=LAST_ENTRIES {
        let score = parse_score(next_line("last score")?)
            .map_err(|raw| format!("last score for player {player} is not a number: `{raw}`"))?;
        last.push(score);
    }

    Ok(ScoreTables { classic, last })
}

/// Scores may carry thousands separators; blank entries count as zero.
fn parse_score(raw: &str) -> Result<u64, String> {
    let digits: String = raw.chars().filter(|c| *c != ',').collect();
    if digits.is_empty() {
        return Ok(0);
    }
    digits.parse().map_err(|_| raw.to_owned())
}
