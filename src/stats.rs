use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Outcome, PlayerId, PlayerStats, SortKey, StoredMatch};
use crate::store::{Store, default_season_start};

/// The counting window: a global season start plus per-player reset dates keyed
/// by canonical name.
#[derive(Debug, Clone)]
pub struct SeasonSettings {
    pub season_start: DateTime<Utc>,
    pub resets: HashMap<String, DateTime<Utc>>,
}

impl Default for SeasonSettings {
    fn default() -> Self {
        Self::new(default_season_start())
    }
}

impl SeasonSettings {
    pub fn new(season_start: DateTime<Utc>) -> Self {
        Self {
            season_start,
            resets: HashMap::new(),
        }
    }

    pub fn load(store: &Store) -> Result<Self> {
        Ok(Self {
            season_start: store.season_start()?,
            resets: store.player_reset_dates()?,
        })
    }

    pub fn with_reset(mut self, canonical: &str, date: DateTime<Utc>) -> Self {
        self.resets.insert(canonical.to_string(), date);
        self
    }

    /// Whether a row for `canonical` created at `at` is inside the window.
    pub fn counts(&self, canonical: &str, at: DateTime<Utc>) -> bool {
        if at < self.season_start {
            return false;
        }
        match self.resets.get(canonical) {
            Some(reset) => at >= *reset,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardRow {
    pub rank: usize,
    pub player_id: PlayerId,
    pub name: String,
    pub matches: u32,
    pub wins: u32,
    pub losses: u32,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub win_rate: f64,
    pub kda: f64,
}

impl LeaderboardRow {
    fn from_stats(rank: usize, stats: &PlayerStats) -> Self {
        Self {
            rank,
            player_id: stats.player_id,
            name: stats.name.clone(),
            matches: stats.matches,
            wins: stats.wins,
            losses: stats.losses,
            kills: stats.kills,
            deaths: stats.deaths,
            assists: stats.assists,
            win_rate: stats.win_rate(),
            kda: stats.kda(),
        }
    }
}

/// Folds live matches into per-player totals, honoring the season window and
/// personal resets. Output is keyed by player id.
pub fn aggregate(settings: &SeasonSettings, matches: &[StoredMatch]) -> HashMap<PlayerId, PlayerStats> {
    let mut out: HashMap<PlayerId, PlayerStats> = HashMap::new();
    for m in matches {
        for row in &m.results {
            if !settings.counts(&row.player_canonical, m.created_at) {
                continue;
            }
            let entry = out.entry(row.player_id).or_insert_with(|| PlayerStats {
                player_id: row.player_id,
                name: row.player_name.clone(),
                ..PlayerStats::default()
            });
            entry.matches = entry.matches.saturating_add(1);
            match row.result {
                Outcome::Win => entry.wins = entry.wins.saturating_add(1),
                Outcome::Lose => entry.losses = entry.losses.saturating_add(1),
            }
            entry.kills = entry.kills.saturating_add(row.kills);
            entry.deaths = entry.deaths.saturating_add(row.deaths);
            entry.assists = entry.assists.saturating_add(row.assists);
        }
    }
    out
}

/// Matches desc, then the chosen metric desc, then the other metric desc, then id asc.
pub fn rank(stats: impl IntoIterator<Item = PlayerStats>, key: SortKey) -> Vec<LeaderboardRow> {
    let mut sorted: Vec<PlayerStats> = stats.into_iter().collect();
    sorted.sort_by(|a, b| compare(a, b, key));
    sorted
        .iter()
        .enumerate()
        .map(|(idx, s)| LeaderboardRow::from_stats(idx + 1, s))
        .collect()
}

fn compare(a: &PlayerStats, b: &PlayerStats, key: SortKey) -> Ordering {
    let (primary_a, secondary_a) = metrics(a, key);
    let (primary_b, secondary_b) = metrics(b, key);
    b.matches
        .cmp(&a.matches)
        .then_with(|| primary_b.total_cmp(&primary_a))
        .then_with(|| secondary_b.total_cmp(&secondary_a))
        .then_with(|| a.player_id.cmp(&b.player_id))
}

fn metrics(stats: &PlayerStats, key: SortKey) -> (f64, f64) {
    match key {
        SortKey::WinRate => (stats.win_rate(), stats.kda()),
        SortKey::Kda => (stats.kda(), stats.win_rate()),
    }
}

pub fn leaderboard(store: &Store, settings: &SeasonSettings, key: SortKey) -> Result<Vec<LeaderboardRow>> {
    let matches = store.matches_since(settings.season_start)?;
    Ok(rank(aggregate(settings, &matches).into_values(), key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stats(id: PlayerId, matches: u32, wins: u32, kills: u32, deaths: u32, assists: u32) -> PlayerStats {
        PlayerStats {
            player_id: id,
            name: format!("p{id}"),
            matches,
            wins,
            losses: matches - wins,
            kills,
            deaths,
            assists,
        }
    }

    #[test]
    fn match_count_dominates_metrics() {
        let rows = rank(
            vec![stats(1, 2, 2, 20, 0, 0), stats(2, 5, 1, 1, 10, 0)],
            SortKey::WinRate,
        );
        assert_eq!(rows[0].player_id, 2);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[1].rank, 2);
    }

    #[test]
    fn sort_key_picks_first_tie_break() {
        // Same match count; 1 has the better win rate, 2 the better KDA.
        let players = vec![stats(1, 4, 4, 1, 4, 0), stats(2, 4, 1, 40, 1, 0)];
        let by_wr = rank(players.clone(), SortKey::WinRate);
        let by_kda = rank(players, SortKey::Kda);
        assert_eq!(by_wr[0].player_id, 1);
        assert_eq!(by_kda[0].player_id, 2);
    }

    #[test]
    fn player_id_breaks_full_ties() {
        let rows = rank(
            vec![stats(9, 3, 1, 3, 3, 3), stats(4, 3, 1, 3, 3, 3)],
            SortKey::Kda,
        );
        assert_eq!(rows.iter().map(|r| r.player_id).collect::<Vec<_>>(), vec![4, 9]);
    }

    #[test]
    fn huge_counters_saturate_instead_of_overflowing() {
        use crate::model::ResultRow;
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let rows = (1..=2)
            .map(|id| StoredMatch {
                id,
                created_at: at,
                results: vec![ResultRow {
                    match_id: id,
                    match_created_at: at,
                    player_id: 1,
                    player_name: "Ace".to_string(),
                    player_canonical: "ace".to_string(),
                    raw_name: "Ace".to_string(),
                    result: Outcome::Win,
                    kills: u32::MAX,
                    deaths: 0,
                    assists: u32::MAX,
                }],
            })
            .collect::<Vec<_>>();
        let totals = aggregate(&SeasonSettings::new(at), &rows);
        let ace = &totals[&1];
        assert_eq!(ace.kills, u32::MAX);
        assert_eq!(ace.matches, 2);

        let board = rank(totals.into_values(), SortKey::Kda);
        assert!(board[0].kda.is_finite());
        assert_eq!(board[0].kda, 2.0 * f64::from(u32::MAX));
    }

    #[test]
    fn reset_only_narrows_window() {
        let season = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let settings = SeasonSettings::new(season).with_reset("ace", early);
        assert!(!settings.counts("ace", Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap()));
        assert!(settings.counts("ace", season));
    }
}
