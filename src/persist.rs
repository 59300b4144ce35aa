use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::TransactionBehavior;
use tracing::{info, warn};

use crate::canonical::canonicalize;
use crate::dedup::{self, Fingerprints};
use crate::error::{LedgerError, Result};
use crate::identity::IdentityResolver;
use crate::model::{ExtractedRow, MatchId};
use crate::store::{self, Store};

/// A fully extracted match waiting to be written.
#[derive(Debug, Clone)]
pub struct NewMatch {
    pub fingerprints: Fingerprints,
    pub rows: Vec<ExtractedRow>,
    pub created_at: DateTime<Utc>,
}

impl NewMatch {
    pub fn new(image: &[u8], rows: Vec<ExtractedRow>) -> Self {
        Self {
            fingerprints: Fingerprints::new(image, &rows),
            rows,
            created_at: Utc::now(),
        }
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Writes a match atomically: duplicate re-check, identity resolution and the
/// match/result inserts all share one `BEGIN IMMEDIATE` transaction.
pub struct MatchPersistor<'a> {
    store: &'a Store,
    resolver: &'a IdentityResolver,
}

impl<'a> MatchPersistor<'a> {
    pub fn new(store: &'a Store, resolver: &'a IdentityResolver) -> Self {
        Self { store, resolver }
    }

    pub fn persist(&self, new_match: &NewMatch) -> Result<MatchId> {
        if new_match.rows.is_empty() {
            return Err(LedgerError::extraction("no player rows extracted"));
        }
        if let Some(row) = new_match.rows.iter().find(|r| canonicalize(&r.name).is_empty()) {
            return Err(LedgerError::extraction(format!(
                "unreadable player name {:?}",
                row.name
            )));
        }
        let hash_prefix = short(&new_match.fingerprints.content_hash);

        let match_id = self.write(new_match).inspect_err(|err| {
            if !err.is_duplicate() {
                warn!(
                    op = "persist_match",
                    hash = hash_prefix,
                    rows = new_match.rows.len(),
                    error = %err,
                    "match insert rolled back"
                );
            }
        })?;

        info!(
            match_id,
            hash = hash_prefix,
            rows = new_match.rows.len(),
            "match recorded"
        );
        Ok(match_id)
    }

    /// Cache entries are published while the connection is still held, so no
    /// admin change can land between commit and publish.
    fn write(&self, new_match: &NewMatch) -> Result<MatchId> {
        let mut conn = self.store.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin match transaction")?;

        if dedup::exists(&tx, &new_match.fingerprints)? {
            return Err(LedgerError::DuplicateMatch);
        }

        let mut resolutions = Vec::with_capacity(new_match.rows.len());
        for row in &new_match.rows {
            resolutions.push(self.resolver.resolve_in(&tx, &row.name)?);
        }

        let match_id = store::insert_match(
            &tx,
            &new_match.fingerprints.content_hash,
            &new_match.fingerprints.signature,
            new_match.created_at,
        )?;
        for (row, resolution) in new_match.rows.iter().zip(&resolutions) {
            store::insert_result(&tx, match_id, resolution.player_id, row)?;
        }

        tx.commit().context("commit match transaction")?;
        self.resolver.publish(&resolutions);
        drop(conn);
        Ok(match_id)
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
