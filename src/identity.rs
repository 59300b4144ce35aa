//! Raw scoreboard name -> stable player id.
//!
//! Resolution order: cache hit, then a scan of live players (exact canonical match
//! first-come, otherwise the first candidate above [`SIMILARITY_THRESHOLD`]), then an
//! insert-or-return-existing upsert. The scan walks players in id order; when two
//! stored names are equally similar to the input, which one wins is not part of the
//! contract.
//!
//! The cache only accelerates. A hit is re-checked against the live players table
//! inside the caller's transaction, so a stale entry falls through to the scan. The
//! unique index on live canonical names is what decides identity when two
//! resolutions race.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::{Result, bail};
use rusqlite::Connection;
use tracing::debug;

use crate::canonical::{SIMILARITY_THRESHOLD, canonicalize, similarity_canonical};
use crate::model::{Player, PlayerId};
use crate::store::{self, Store};

#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: RwLock<HashMap<String, PlayerId>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, canonical: &str) -> Option<PlayerId> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(canonical).copied()
    }

    pub fn insert(&self, canonical: String, id: PlayerId) {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(canonical, id);
    }

    pub fn remove(&self, canonical: &str) {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        guard.remove(canonical);
    }

    pub fn clear(&self) {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        guard.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&self, players: &[Player]) {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for p in players {
            guard.insert(p.canonical_name.clone(), p.id);
        }
    }
}

/// Result of resolving one name inside a transaction. The cache entry is held
/// back until the caller knows the transaction committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub player_id: PlayerId,
    pub canonical: String,
    pub from_cache: bool,
}

#[derive(Debug, Default)]
pub struct IdentityResolver {
    cache: IdentityCache,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates the cache with every live player.
    pub fn warm(&self, store: &Store) -> Result<usize> {
        let players = store.live_players()?;
        self.cache.load(&players);
        debug!(players = players.len(), "identity cache warmed");
        Ok(players.len())
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Resolves outside any caller transaction and publishes the cache entry
    /// before releasing the connection.
    pub fn ensure_player(&self, store: &Store, raw_name: &str) -> Result<PlayerId> {
        let conn = store.lock()?;
        let resolution = self.resolve_in(&conn, raw_name)?;
        self.publish(std::slice::from_ref(&resolution));
        Ok(resolution.player_id)
    }

    /// Resolves `raw_name` against `conn` (usually an open transaction). Never
    /// adds cache entries; a hit on a deleted player is evicted.
    pub fn resolve_in(&self, conn: &Connection, raw_name: &str) -> Result<Resolution> {
        let canonical = canonicalize(raw_name);
        if canonical.is_empty() {
            bail!("player name {raw_name:?} has no letters or digits");
        }

        if let Some(id) = self.cache.get(&canonical) {
            if store::player_is_live(conn, id)? {
                return Ok(Resolution {
                    player_id: id,
                    canonical,
                    from_cache: true,
                });
            }
            debug!(player_id = id, name = %canonical, "evicting cache entry for deleted player");
            self.cache.remove(&canonical);
        }

        let player_id = match find_candidate(&store::live_players(conn)?, &canonical) {
            Some(id) => id,
            None => {
                let id = store::upsert_player(conn, raw_name, &canonical)?;
                debug!(player_id = id, name = %canonical, "player created");
                id
            }
        };

        Ok(Resolution {
            player_id,
            canonical,
            from_cache: false,
        })
    }

    /// Writes resolved names into the cache. Call only after the owning
    /// transaction committed.
    pub fn publish(&self, resolutions: &[Resolution]) {
        for r in resolutions.iter().filter(|r| !r.from_cache) {
            self.cache.insert(r.canonical.clone(), r.player_id);
        }
    }

    pub fn on_rename(&self, old_canonical: &str, new_canonical: &str, id: PlayerId) {
        self.cache.remove(old_canonical);
        self.cache.insert(new_canonical.to_string(), id);
    }

    /// Drops every cache key pointing at `id`, including fuzzy aliases.
    pub fn on_delete(&self, id: PlayerId) {
        let mut guard = self.cache.entries.write().unwrap_or_else(PoisonError::into_inner);
        guard.retain(|_, cached| *cached != id);
    }

    pub fn on_restore(&self, player: &Player) {
        self.cache.insert(player.canonical_name.clone(), player.id);
    }

    pub fn on_wipe(&self) {
        self.cache.clear();
    }
}

/// Exact canonical match anywhere wins; otherwise the first fuzzy match in order.
fn find_candidate(players: &[Player], canonical: &str) -> Option<PlayerId> {
    if let Some(p) = players.iter().find(|p| p.canonical_name == canonical) {
        return Some(p.id);
    }
    players
        .iter()
        .find(|p| similarity_canonical(canonical, &p.canonical_name) > SIMILARITY_THRESHOLD)
        .map(|p| p.id)
}
