use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use crate::dedup::{self, Fingerprints};
use crate::model::{ExtractedRow, MatchId, Outcome, Player, PlayerId, ResultRow, StoredMatch};

const SEASON_START_KEY: &str = "season_start_date";

/// SQLite-backed persistence. One connection, serialized behind a mutex, so every
/// transaction sees a consistent view and the unique indexes arbitrate races.
pub struct Store {
    pub(crate) conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite db {}", path.display()))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("store connection lock poisoned"))
    }

    pub fn live_players(&self) -> Result<Vec<Player>> {
        let conn = self.lock()?;
        live_players(&conn)
    }

    pub fn find_player(&self, id: PlayerId) -> Result<Option<Player>> {
        let conn = self.lock()?;
        find_player(&conn, id, false)
    }

    pub fn find_player_by_canonical(&self, canonical: &str) -> Result<Option<Player>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, canonical_name, created_at FROM players
             WHERE canonical_name = ?1 AND is_deleted = 0",
            params![canonical],
            player_row,
        )
        .optional()
        .context("query player by canonical name")
    }

    pub fn season_start(&self) -> Result<DateTime<Utc>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![SEASON_START_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("query season start")?;
        match raw {
            Some(raw) => parse_ts(&raw).context("parse stored season start"),
            None => Ok(default_season_start()),
        }
    }

    pub fn set_season_start(&self, date: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![SEASON_START_KEY, fmt_ts(date)],
        )
        .context("upsert season start")?;
        Ok(())
    }

    pub fn player_reset_dates(&self) -> Result<HashMap<String, DateTime<Utc>>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT canonical_name, reset_date FROM player_resets")
            .context("prepare player resets query")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, ts_column(row, 1)?)))
            .context("query player resets")?;
        let mut out = HashMap::new();
        for row in rows {
            let (name, date) = row.context("decode player reset row")?;
            out.insert(name, date);
        }
        Ok(out)
    }

    pub fn set_player_reset(&self, canonical: &str, date: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO player_resets (canonical_name, reset_date) VALUES (?1, ?2)
             ON CONFLICT(canonical_name) DO UPDATE SET reset_date = excluded.reset_date",
            params![canonical, fmt_ts(date)],
        )
        .context("upsert player reset")?;
        Ok(())
    }

    /// Live matches created at or after `since`, with their live result rows.
    pub fn matches_since(&self, since: DateTime<Utc>) -> Result<Vec<StoredMatch>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT
                    m.id, m.created_at, pr.player_id, p.name, p.canonical_name,
                    pr.raw_name, pr.result, pr.kills, pr.deaths, pr.assists
                FROM matches m
                JOIN player_results pr ON pr.match_id = m.id
                JOIN players p ON p.id = pr.player_id
                WHERE m.created_at >= ?1
                  AND m.is_deleted = 0
                  AND pr.is_deleted = 0
                ORDER BY m.created_at ASC, m.id ASC, pr.id ASC
                "#,
            )
            .context("prepare matches since query")?;
        let rows = stmt
            .query_map(params![fmt_ts(since)], result_row)
            .context("query matches since")?;

        let mut out: Vec<StoredMatch> = Vec::new();
        for row in rows {
            let row = row.context("decode result row")?;
            match out.last_mut() {
                Some(last) if last.id == row.match_id => last.results.push(row),
                _ => out.push(StoredMatch {
                    id: row.match_id,
                    created_at: row.match_created_at,
                    results: vec![row],
                }),
            }
        }
        Ok(out)
    }

    /// Most recent live results for one player, newest first.
    pub fn history(&self, player_id: PlayerId, limit: usize) -> Result<Vec<ResultRow>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT
                    m.id, m.created_at, pr.player_id, p.name, p.canonical_name,
                    pr.raw_name, pr.result, pr.kills, pr.deaths, pr.assists
                FROM player_results pr
                JOIN matches m ON m.id = pr.match_id
                JOIN players p ON p.id = pr.player_id
                WHERE pr.player_id = ?1
                  AND m.is_deleted = 0
                  AND pr.is_deleted = 0
                ORDER BY m.created_at DESC, m.id DESC
                LIMIT ?2
                "#,
            )
            .context("prepare history query")?;
        let rows = stmt
            .query_map(params![player_id, limit as i64], result_row)
            .context("query history")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("decode history row")?);
        }
        Ok(out)
    }

    /// Returns `(content_hash, signature, is_deleted)` for any match, live or not.
    pub fn soft_delete_match(&self, id: MatchId) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("begin delete match transaction")?;
        let changed = tx
            .execute(
                "UPDATE matches SET is_deleted = 1, deleted_at = ?2 WHERE id = ?1 AND is_deleted = 0",
                params![id, fmt_ts(Utc::now())],
            )
            .context("soft delete match")?;
        if changed > 0 {
            tx.execute(
                "UPDATE player_results SET is_deleted = 1 WHERE match_id = ?1",
                params![id],
            )
            .context("soft delete match results")?;
        }
        tx.commit().context("commit delete match")?;
        Ok(changed > 0)
    }

    /// Un-deletes a match unless its image or scoreboard is live again. The
    /// fingerprint check and the restore share one immediate transaction.
    pub fn restore_match(&self, id: MatchId) -> Result<MatchRestore> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin restore match transaction")?;
        let found = tx
            .query_row(
                "SELECT content_hash, signature, is_deleted FROM matches WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get::<_, i64>(2)? != 0)),
            )
            .optional()
            .context("query match fingerprints")?;
        let Some((content_hash, signature, is_deleted)) = found else {
            return Ok(MatchRestore::Missing);
        };
        if !is_deleted {
            return Ok(MatchRestore::AlreadyLive);
        }
        if dedup::exists(&tx, &Fingerprints { content_hash, signature })? {
            return Ok(MatchRestore::Duplicate);
        }

        tx.execute(
            "UPDATE matches SET is_deleted = 0, deleted_at = NULL WHERE id = ?1",
            params![id],
        )
        .context("restore match")?;
        tx.execute(
            "UPDATE player_results SET is_deleted = 0
             WHERE match_id = ?1
               AND player_id IN (SELECT id FROM players WHERE is_deleted = 0)",
            params![id],
        )
        .context("restore match results")?;
        tx.commit().context("commit restore match")?;
        Ok(MatchRestore::Restored)
    }

    pub fn soft_delete_player(&self, id: PlayerId) -> Result<Option<Player>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("begin delete player transaction")?;
        let Some(player) = find_player(&tx, id, false)? else {
            return Ok(None);
        };
        tx.execute(
            "UPDATE player_results SET is_deleted = 1 WHERE player_id = ?1",
            params![id],
        )
        .context("soft delete player results")?;
        tx.execute(
            "DELETE FROM player_resets WHERE canonical_name = ?1",
            params![player.canonical_name],
        )
        .context("delete player reset")?;
        tx.execute(
            "UPDATE players SET is_deleted = 1, deleted_at = ?2 WHERE id = ?1",
            params![id, fmt_ts(Utc::now())],
        )
        .context("soft delete player")?;
        tx.commit().context("commit delete player")?;
        Ok(Some(player))
    }

    /// Restores a soft-deleted player unless a live player already owns its name.
    pub fn restore_player(&self, id: PlayerId) -> Result<RestoreOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("begin restore player transaction")?;
        let Some(player) = find_player(&tx, id, true)? else {
            return Ok(RestoreOutcome::Missing);
        };
        if live_player_by_canonical(&tx, &player.canonical_name)?.is_some() {
            return Ok(RestoreOutcome::NameTaken(player));
        }
        tx.execute(
            "UPDATE players SET is_deleted = 0, deleted_at = NULL WHERE id = ?1",
            params![id],
        )
        .context("restore player")?;
        tx.execute(
            "UPDATE player_results SET is_deleted = 0
             WHERE player_id = ?1
               AND match_id IN (SELECT id FROM matches WHERE is_deleted = 0)",
            params![id],
        )
        .context("restore player results")?;
        tx.commit().context("commit restore player")?;
        Ok(RestoreOutcome::Restored(player))
    }

    /// Renames a live player and moves its personal reset to the new key.
    pub fn rename_player(&self, id: PlayerId, new_name: &str, new_canonical: &str) -> Result<RenameOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("begin rename transaction")?;
        let Some(old) = find_player(&tx, id, false)? else {
            return Ok(RenameOutcome::Missing);
        };
        if let Some(other) = live_player_by_canonical(&tx, new_canonical)?
            && other != id
        {
            return Ok(RenameOutcome::NameTaken(other));
        }
        tx.execute(
            "UPDATE players SET name = ?2, canonical_name = ?3 WHERE id = ?1",
            params![id, new_name, new_canonical],
        )
        .context("rename player")?;
        if old.canonical_name != new_canonical {
            tx.execute(
                "UPDATE OR REPLACE player_resets SET canonical_name = ?2 WHERE canonical_name = ?1",
                params![old.canonical_name, new_canonical],
            )
            .context("move player reset")?;
        }
        tx.commit().context("commit rename")?;
        Ok(RenameOutcome::Renamed { old })
    }

    /// Soft-deletes every match, result and player, and clears personal resets.
    pub fn wipe_all(&self) -> Result<()> {
        let mut conn = self.lock()?;
        let now = fmt_ts(Utc::now());
        let tx = conn.transaction().context("begin wipe transaction")?;
        tx.execute(
            "UPDATE matches SET is_deleted = 1, deleted_at = ?1 WHERE is_deleted = 0",
            params![now],
        )
        .context("wipe matches")?;
        tx.execute(
            "UPDATE player_results SET is_deleted = 1 WHERE is_deleted = 0",
            [],
        )
        .context("wipe results")?;
        tx.execute(
            "UPDATE players SET is_deleted = 1, deleted_at = ?1 WHERE is_deleted = 0",
            params![now],
        )
        .context("wipe players")?;
        tx.execute("DELETE FROM player_resets", [])
            .context("wipe player resets")?;
        tx.commit().context("commit wipe")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRestore {
    Restored,
    AlreadyLive,
    Duplicate,
    Missing,
}

#[derive(Debug)]
pub enum RestoreOutcome {
    Restored(Player),
    NameTaken(Player),
    Missing,
}

#[derive(Debug)]
pub enum RenameOutcome {
    Renamed { old: Player },
    NameTaken(PlayerId),
    Missing,
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS players (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            canonical_name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_players_live_canonical
            ON players(canonical_name) WHERE is_deleted = 0;

        CREATE TABLE IF NOT EXISTS matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content_hash TEXT NOT NULL,
            signature TEXT NOT NULL,
            created_at TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_matches_live_hash
            ON matches(content_hash) WHERE is_deleted = 0;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_matches_live_signature
            ON matches(signature) WHERE is_deleted = 0;
        CREATE INDEX IF NOT EXISTS idx_matches_created_at ON matches(created_at);

        CREATE TABLE IF NOT EXISTS player_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            match_id INTEGER NOT NULL REFERENCES matches(id),
            player_id INTEGER NOT NULL REFERENCES players(id),
            raw_name TEXT NOT NULL,
            result TEXT NOT NULL CHECK (result IN ('WIN', 'LOSE')),
            kills INTEGER NOT NULL,
            deaths INTEGER NOT NULL,
            assists INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_results_match ON player_results(match_id);
        CREATE INDEX IF NOT EXISTS idx_results_player ON player_results(player_id);

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS player_resets (
            canonical_name TEXT PRIMARY KEY,
            reset_date TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Live players in id order. This is the iteration order fuzzy matching walks.
pub(crate) fn live_players(conn: &Connection) -> Result<Vec<Player>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT id, name, canonical_name, created_at FROM players
             WHERE is_deleted = 0 ORDER BY id",
        )
        .context("prepare live players query")?;
    let rows = stmt.query_map([], player_row).context("query live players")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode player row")?);
    }
    Ok(out)
}

fn find_player(conn: &Connection, id: PlayerId, deleted: bool) -> Result<Option<Player>> {
    conn.query_row(
        "SELECT id, name, canonical_name, created_at FROM players WHERE id = ?1 AND is_deleted = ?2",
        params![id, deleted as i64],
        player_row,
    )
    .optional()
    .context("query player by id")
}

pub(crate) fn player_is_live(conn: &Connection, id: PlayerId) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM players WHERE id = ?1 AND is_deleted = 0)",
        params![id],
        |row| row.get(0),
    )
    .context("check player is live")
}

fn live_player_by_canonical(conn: &Connection, canonical: &str) -> Result<Option<PlayerId>> {
    conn.query_row(
        "SELECT id FROM players WHERE canonical_name = ?1 AND is_deleted = 0",
        params![canonical],
        |row| row.get(0),
    )
    .optional()
    .context("query live player by canonical name")
}

/// Inserts a player, or returns the live player already holding `canonical`.
pub(crate) fn upsert_player(conn: &Connection, raw_name: &str, canonical: &str) -> Result<PlayerId> {
    conn.query_row(
        r#"
        INSERT INTO players (name, canonical_name, created_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(canonical_name) WHERE is_deleted = 0
        DO UPDATE SET canonical_name = excluded.canonical_name
        RETURNING id
        "#,
        params![raw_name.trim(), canonical, fmt_ts(Utc::now())],
        |row| row.get(0),
    )
    .with_context(|| format!("upsert player {canonical:?}"))
}

pub(crate) fn insert_match(
    conn: &Connection,
    content_hash: &str,
    signature: &str,
    created_at: DateTime<Utc>,
) -> Result<MatchId> {
    conn.execute(
        "INSERT INTO matches (content_hash, signature, created_at) VALUES (?1, ?2, ?3)",
        params![content_hash, signature, fmt_ts(created_at)],
    )
    .context("insert match")?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn insert_result(
    conn: &Connection,
    match_id: MatchId,
    player_id: PlayerId,
    row: &ExtractedRow,
) -> Result<()> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO player_results (match_id, player_id, raw_name, result, kills, deaths, assists)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .context("prepare result insert")?;
    stmt.execute(params![
        match_id,
        player_id,
        row.name,
        row.result.as_str(),
        row.kills,
        row.deaths,
        row.assists
    ])
    .context("insert player result")?;
    Ok(())
}

fn player_row(row: &Row<'_>) -> rusqlite::Result<Player> {
    Ok(Player {
        id: row.get(0)?,
        name: row.get(1)?,
        canonical_name: row.get(2)?,
        created_at: ts_column(row, 3)?,
    })
}

fn result_row(row: &Row<'_>) -> rusqlite::Result<ResultRow> {
    let raw_result: String = row.get(6)?;
    let result = raw_result.parse::<Outcome>().map_err(|msg| {
        rusqlite::Error::FromSqlConversionFailure(6, Type::Text, msg.into())
    })?;
    Ok(ResultRow {
        match_id: row.get(0)?,
        match_created_at: ts_column(row, 1)?,
        player_id: row.get(2)?,
        player_name: row.get(3)?,
        player_canonical: row.get(4)?,
        raw_name: row.get(5)?,
        result,
        kills: row.get(7)?,
        deaths: row.get(8)?,
        assists: row.get(9)?,
    })
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into()))
}

/// Fixed-width RFC 3339 in UTC, so stored timestamps compare correctly as text.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp {raw:?}"))?
        .with_timezone(&Utc))
}

pub fn default_season_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn season_start_defaults_then_persists() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.season_start().unwrap(), default_season_start());
        store.set_season_start(at(2026, 2, 1)).unwrap();
        assert_eq!(store.season_start().unwrap(), at(2026, 2, 1));
    }

    #[test]
    fn rename_carries_personal_reset() {
        let store = Store::open_in_memory().unwrap();
        let id = upsert_player(&store.lock().unwrap(), "Old", "old").unwrap();
        store.set_player_reset("old", at(2025, 5, 1)).unwrap();

        let outcome = store.rename_player(id, "New", "new").unwrap();
        assert!(matches!(outcome, RenameOutcome::Renamed { .. }));
        let resets = store.player_reset_dates().unwrap();
        assert_eq!(resets.get("new"), Some(&at(2025, 5, 1)));
        assert!(!resets.contains_key("old"));
    }

    #[test]
    fn upsert_returns_existing_live_row() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.lock().unwrap();
        let a = upsert_player(&conn, "Ace", "ace").unwrap();
        let b = upsert_player(&conn, "ACE!", "ace").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn deleted_player_frees_name_and_reset() {
        let store = Store::open_in_memory().unwrap();
        let id = upsert_player(&store.lock().unwrap(), "Ace", "ace").unwrap();
        store.set_player_reset("ace", at(2025, 5, 1)).unwrap();

        let removed = store.soft_delete_player(id).unwrap().unwrap();
        assert_eq!(removed.canonical_name, "ace");
        assert!(store.player_reset_dates().unwrap().is_empty());
        assert!(store.soft_delete_player(id).unwrap().is_none());

        let fresh = upsert_player(&store.lock().unwrap(), "Ace", "ace").unwrap();
        assert_ne!(fresh, id);
        assert!(matches!(store.restore_player(id).unwrap(), RestoreOutcome::NameTaken(_)));
    }

    #[test]
    fn restore_match_checks_fingerprints_in_the_same_transaction() {
        let store = Store::open_in_memory().unwrap();
        let first = insert_match(&store.lock().unwrap(), "h1", "sig", at(2025, 2, 1)).unwrap();
        assert!(store.soft_delete_match(first).unwrap());
        let second = insert_match(&store.lock().unwrap(), "h2", "sig", at(2025, 2, 2)).unwrap();

        assert_eq!(store.restore_match(first).unwrap(), MatchRestore::Duplicate);
        assert_eq!(store.restore_match(second).unwrap(), MatchRestore::AlreadyLive);
        assert_eq!(store.restore_match(9_999).unwrap(), MatchRestore::Missing);

        assert!(store.soft_delete_match(second).unwrap());
        assert_eq!(store.restore_match(first).unwrap(), MatchRestore::Restored);
        assert!(dedup::hash_exists(&store.lock().unwrap(), "h1").unwrap());
    }

    #[test]
    fn liveness_follows_soft_delete() {
        let store = Store::open_in_memory().unwrap();
        let id = upsert_player(&store.lock().unwrap(), "Ace", "ace").unwrap();
        assert!(player_is_live(&store.lock().unwrap(), id).unwrap());
        store.soft_delete_player(id).unwrap();
        assert!(!player_is_live(&store.lock().unwrap(), id).unwrap());
        assert!(!player_is_live(&store.lock().unwrap(), id + 100).unwrap());
    }

    #[test]
    fn timestamps_sort_as_text() {
        let early = fmt_ts(at(2025, 1, 2));
        let late = fmt_ts(at(2025, 1, 10));
        assert!(early < late);
        assert_eq!(parse_ts(&late).unwrap(), at(2025, 1, 10));
    }
}
