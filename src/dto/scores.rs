use serde::Serialize;
use serde_json::Value;

use crate::state::ScoreCategory;

/// Body of a `POST /api/v1/scores` upload.
#[derive(Debug, Serialize)]
pub struct ScoreUpload<'a> {
    /// Which table the scores belong to.
    pub category: ScoreCategory,
    /// Scores as produced by the game adapter.
    pub scores: &'a Value,
    /// Lifetime game counter, attached to last-game uploads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub games_played: Option<u32>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn games_played_is_omitted_when_unknown() {
        let scores = json!([{ "initials": "BOO", "score": 10 }]);
        let upload = ScoreUpload {
            category: ScoreCategory::High,
            scores: &scores,
            games_played: None,
        };
        assert_eq!(
            serde_json::to_value(&upload).unwrap(),
            json!({ "category": "high", "scores": scores })
        );
    }

    #[test]
    fn last_uploads_carry_the_game_counter() {
        let scores = json!([100, 200]);
        let upload = ScoreUpload {
            category: ScoreCategory::Last,
            scores: &scores,
            games_played: Some(42),
        };
        let encoded = serde_json::to_value(&upload).unwrap();
        assert_eq!(encoded["category"], "last");
        assert_eq!(encoded["games_played"], 42);
    }
}
