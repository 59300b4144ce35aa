//! Re-submission detection.
//!
//! A match is fingerprinted twice: by the SHA-256 of the uploaded bytes, and by a
//! signature over the extracted rows. Either one colliding with a live match means
//! the match is already recorded.

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use sha2::{Digest, Sha256};

use crate::canonical::canonicalize;
use crate::model::ExtractedRow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprints {
    pub content_hash: String,
    pub signature: String,
}

impl Fingerprints {
    pub fn new(image: &[u8], rows: &[ExtractedRow]) -> Self {
        Self {
            content_hash: content_hash(image),
            signature: match_signature(rows),
        }
    }
}

/// Hex SHA-256 of the raw image bytes.
pub fn content_hash(image: &[u8]) -> String {
    format!("{:x}", Sha256::digest(image))
}

/// Hex SHA-256 over `name|k/d/a|result` lines, sorted so extraction order is irrelevant.
pub fn match_signature(rows: &[ExtractedRow]) -> String {
    let mut lines: Vec<String> = rows
        .iter()
        .map(|row| {
            format!(
                "{}|{}/{}/{}|{}",
                canonicalize(&row.name),
                row.kills,
                row.deaths,
                row.assists,
                row.result
            )
        })
        .collect();
    lines.sort_unstable();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Cheap pre-extraction check on the content hash alone.
pub fn hash_exists(conn: &Connection, content_hash: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM matches WHERE content_hash = ?1 AND is_deleted = 0)",
        params![content_hash],
        |row| row.get(0),
    )
    .context("check content hash")
}

/// True if any live match carries either fingerprint.
pub fn exists(conn: &Connection, fingerprints: &Fingerprints) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM matches
            WHERE (content_hash = ?1 OR signature = ?2) AND is_deleted = 0
        )",
        params![fingerprints.content_hash, fingerprints.signature],
        |row| row.get(0),
    )
    .context("check match fingerprints")
}
