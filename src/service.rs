//! Command surface for upstream callers (chat command handlers, CLIs).
//!
//! Every operation returns a typed [`LedgerError`]; storage failures arrive as
//! `Persistence` with their context chain intact.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tracing::{info, warn};

use crate::canonical::canonicalize;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::export;
use crate::extract::{Extractor, HttpExtractor, UnconfiguredExtractor};
use crate::identity::IdentityResolver;
use crate::ingest::{BatchSummary, HttpImageSource, ImageSource, IngestContext, IngestionCoordinator};
use crate::model::{MatchId, Player, PlayerId, PlayerStats, ResultRow, SortKey};
use crate::stats::{self, LeaderboardRow, SeasonSettings};
use crate::store::{MatchRestore, RenameOutcome, RestoreOutcome, Store};

pub const DEFAULT_HISTORY_LIMIT: usize = 10;

pub struct LedgerService {
    store: Store,
    resolver: IdentityResolver,
    extractor: Box<dyn Extractor>,
    source: Box<dyn ImageSource>,
    coordinator: IngestionCoordinator,
}

impl LedgerService {
    /// Wires the collaborators together and warms the identity cache.
    pub fn new(
        store: Store,
        extractor: Box<dyn Extractor>,
        source: Box<dyn ImageSource>,
        coordinator: IngestionCoordinator,
    ) -> anyhow::Result<Self> {
        let resolver = IdentityResolver::new();
        resolver.warm(&store)?;
        Ok(Self {
            store,
            resolver,
            extractor,
            source,
            coordinator,
        })
    }

    pub fn from_config(config: &LedgerConfig) -> anyhow::Result<Self> {
        let path = config
            .db_path
            .as_deref()
            .context("unable to resolve sqlite path")?;
        let store = Store::open(path)?;
        let extractor: Box<dyn Extractor> = match config.extractor_url.as_deref() {
            Some(url) => Box::new(HttpExtractor::new(
                url,
                config.extractor_api_key.clone(),
                config.extractor_timeout,
            )?),
            None => Box::new(UnconfiguredExtractor),
        };
        let source = Box::new(HttpImageSource::new(
            config.download_timeout,
            config.max_image_bytes,
        )?);
        let coordinator = IngestionCoordinator::new(config.parallelism, config.max_image_bytes);
        Self::new(store, extractor, source, coordinator)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    fn ctx(&self) -> IngestContext<'_> {
        IngestContext {
            store: &self.store,
            resolver: &self.resolver,
            extractor: self.extractor.as_ref(),
        }
    }

    pub fn submit_urls(&self, urls: &[String]) -> BatchSummary {
        let summary = self
            .coordinator
            .submit_urls(self.ctx(), self.source.as_ref(), urls);
        log_batch(&summary);
        summary
    }

    pub fn submit_images(&self, images: &[Vec<u8>]) -> BatchSummary {
        let summary = self.coordinator.ingest_bytes(self.ctx(), images);
        log_batch(&summary);
        summary
    }

    pub fn submit_image(&self, image: &[u8]) -> Result<MatchId> {
        self.coordinator.process(self.ctx(), image)
    }

    pub fn season_settings(&self) -> Result<SeasonSettings> {
        Ok(SeasonSettings::load(&self.store)?)
    }

    pub fn leaderboard(&self, key: SortKey) -> Result<Vec<LeaderboardRow>> {
        let settings = self.season_settings()?;
        Ok(stats::leaderboard(&self.store, &settings, key)?)
    }

    pub fn player_stats_by_id(&self, id: PlayerId) -> Result<PlayerStats> {
        let player = self
            .store
            .find_player(id)?
            .ok_or_else(|| LedgerError::not_found(format!("player {id}")))?;
        self.stats_for(&player)
    }

    pub fn player_stats_by_name(&self, name: &str) -> Result<PlayerStats> {
        let player = self.live_player_named(name)?;
        self.stats_for(&player)
    }

    fn stats_for(&self, player: &Player) -> Result<PlayerStats> {
        let settings = self.season_settings()?;
        let matches = self.store.matches_since(settings.season_start)?;
        let mut all = stats::aggregate(&settings, &matches);
        Ok(all.remove(&player.id).unwrap_or_else(|| PlayerStats {
            player_id: player.id,
            name: player.name.clone(),
            ..PlayerStats::default()
        }))
    }

    pub fn player_history(&self, id: PlayerId, limit: Option<usize>) -> Result<Vec<ResultRow>> {
        if self.store.find_player(id)?.is_none() {
            return Err(LedgerError::not_found(format!("player {id}")));
        }
        Ok(self
            .store
            .history(id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))?)
    }

    pub fn list_players(&self) -> Result<Vec<Player>> {
        Ok(self.store.live_players()?)
    }

    pub fn set_season_start(&self, raw_date: &str) -> Result<DateTime<Utc>> {
        let date = parse_date(raw_date)?;
        self.store.set_season_start(date)?;
        info!(season_start = %date, "season start updated");
        Ok(date)
    }

    pub fn reset_season_now(&self) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        self.store.set_season_start(now)?;
        info!(season_start = %now, "season reset");
        Ok(now)
    }

    /// Sets a personal reset for `name`. `raw_date` is `YYYY-MM-DD` or `now`.
    pub fn reset_player(&self, name: &str, raw_date: &str) -> Result<DateTime<Utc>> {
        let date = if raw_date.trim().eq_ignore_ascii_case("now") {
            Utc::now()
        } else {
            parse_date(raw_date)?
        };
        let player = self.live_player_named(name)?;
        self.store.set_player_reset(&player.canonical_name, date)?;
        info!(player_id = player.id, reset = %date, "player stats reset");
        Ok(date)
    }

    pub fn delete_match(&self, id: MatchId) -> Result<()> {
        if !self.store.soft_delete_match(id)? {
            return Err(LedgerError::not_found(format!("match {id}")));
        }
        info!(match_id = id, "match deleted");
        Ok(())
    }

    pub fn restore_match(&self, id: MatchId) -> Result<()> {
        match self.store.restore_match(id)? {
            MatchRestore::Restored => {
                info!(match_id = id, "match restored");
                Ok(())
            }
            MatchRestore::AlreadyLive => Ok(()),
            MatchRestore::Duplicate => Err(LedgerError::DuplicateMatch),
            MatchRestore::Missing => Err(LedgerError::not_found(format!("match {id}"))),
        }
    }

    pub fn delete_player(&self, id: PlayerId) -> Result<Player> {
        let player = self
            .store
            .soft_delete_player(id)?
            .ok_or_else(|| LedgerError::not_found(format!("player {id}")))?;
        self.resolver.on_delete(player.id);
        info!(player_id = id, name = %player.name, "player deleted");
        Ok(player)
    }

    pub fn restore_player(&self, id: PlayerId) -> Result<Player> {
        match self.store.restore_player(id)? {
            RestoreOutcome::Restored(player) => {
                self.resolver.on_restore(&player);
                info!(player_id = id, name = %player.name, "player restored");
                Ok(player)
            }
            RestoreOutcome::NameTaken(player) => Err(LedgerError::validation(format!(
                "name {:?} is already used by another player",
                player.name
            ))),
            RestoreOutcome::Missing => Err(LedgerError::not_found(format!("deleted player {id}"))),
        }
    }

    pub fn rename_player(&self, id: PlayerId, new_name: &str) -> Result<Player> {
        let new_display = new_name.trim();
        let canonical = canonicalize(new_display);
        if canonical.is_empty() {
            return Err(LedgerError::validation("player name cannot be empty"));
        }
        match self.store.rename_player(id, new_display, &canonical)? {
            RenameOutcome::Renamed { old } => {
                self.resolver.on_rename(&old.canonical_name, &canonical, id);
                info!(player_id = id, from = %old.name, to = %new_display, "player renamed");
            }
            RenameOutcome::NameTaken(other) => {
                return Err(LedgerError::validation(format!(
                    "name {new_display:?} already belongs to player {other}"
                )));
            }
            RenameOutcome::Missing => return Err(LedgerError::not_found(format!("player {id}"))),
        }
        self.store
            .find_player(id)?
            .ok_or_else(|| LedgerError::not_found(format!("player {id}")))
    }

    /// Soft-deletes everything, empties the identity cache and rewinds the
    /// season start so new matches count immediately.
    pub fn wipe_all(&self) -> Result<()> {
        self.store.wipe_all()?;
        self.resolver.on_wipe();
        self.store.set_season_start(wipe_season_start())?;
        warn!("all matches and players wiped");
        Ok(())
    }

    pub fn export_leaderboard(&self, path: &Path, key: SortKey) -> Result<usize> {
        let rows = self.leaderboard(key)?;
        Ok(export::export_leaderboard(path, &rows)?)
    }

    /// Same workbook as [`Self::export_leaderboard`], kept in memory for callers
    /// that upload it rather than write a file.
    pub fn leaderboard_workbook(&self, key: SortKey) -> Result<Vec<u8>> {
        let rows = self.leaderboard(key)?;
        Ok(export::leaderboard_workbook_bytes(&rows)?)
    }

    fn live_player_named(&self, name: &str) -> Result<Player> {
        self.store
            .find_player_by_canonical(&canonicalize(name))?
            .ok_or_else(|| LedgerError::not_found(format!("player {:?}", name.trim())))
    }
}

/// `YYYY-MM-DD` at UTC midnight.
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| LedgerError::validation(format!("invalid date {raw:?}, expected YYYY-MM-DD")))
}

fn wipe_season_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

fn log_batch(summary: &BatchSummary) {
    info!(
        items = summary.items.len(),
        succeeded = summary.succeeded(),
        duplicates = summary.duplicates(),
        failed = summary.failed(),
        "submission processed"
    );
}
