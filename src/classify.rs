use serde::{Deserialize, Serialize};

/// Weight verdict for one bag against the session limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WeightStatus {
    Under,
    Pass,
    Over,
}

impl std::fmt::Display for WeightStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            WeightStatus::Under => "UNDER",
            WeightStatus::Pass => "PASS",
            WeightStatus::Over => "OVER",
        };
        f.write_str(label)
    }
}

/// Maps a weight to its verdict. Both limit values themselves count as
/// Pass.
pub fn classify(weight_grams: i64, under_limit: i64, over_limit: i64) -> WeightStatus {
    if weight_grams < under_limit {
        WeightStatus::Under
    } else if weight_grams > over_limit {
        WeightStatus::Over
    } else {
        WeightStatus::Pass
    }
}
