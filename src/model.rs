use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type PlayerId = i64;
pub type MatchId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Lose,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Win => "WIN",
            Outcome::Lose => "LOSE",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let s = raw.trim();
        if s.eq_ignore_ascii_case("win") {
            Ok(Outcome::Win)
        } else if s.eq_ignore_ascii_case("lose") {
            Ok(Outcome::Lose)
        } else {
            Err(format!("unknown result {raw:?}"))
        }
    }
}

/// One scoreboard row as returned by the extraction collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRow {
    pub name: String,
    pub result: Outcome,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
}

impl ExtractedRow {
    pub fn new(name: &str, result: Outcome, kills: u32, deaths: u32, assists: u32) -> Self {
        Self {
            name: name.to_string(),
            result,
            kills,
            deaths,
            assists,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub canonical_name: String,
    pub created_at: DateTime<Utc>,
}

/// A live result row joined with its match and owning player.
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub match_id: MatchId,
    pub match_created_at: DateTime<Utc>,
    pub player_id: PlayerId,
    pub player_name: String,
    pub player_canonical: String,
    pub raw_name: String,
    pub result: Outcome,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
}

#[derive(Debug, Clone)]
pub struct StoredMatch {
    pub id: MatchId,
    pub created_at: DateTime<Utc>,
    pub results: Vec<ResultRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    WinRate,
    Kda,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "winrate" | "win_rate" | "wr" => Ok(SortKey::WinRate),
            "kda" => Ok(SortKey::Kda),
            other => Err(format!("unknown sort key {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerStats {
    pub player_id: PlayerId,
    pub name: String,
    pub matches: u32,
    pub wins: u32,
    pub losses: u32,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
}

impl PlayerStats {
    pub fn win_rate(&self) -> f64 {
        if self.matches == 0 {
            return 0.0;
        }
        self.wins as f64 / self.matches as f64 * 100.0
    }

    /// `(kills + assists) / max(deaths, 1)`; never infinite.
    pub fn kda(&self) -> f64 {
        (f64::from(self.kills) + f64::from(self.assists)) / f64::from(self.deaths.max(1))
    }
}
