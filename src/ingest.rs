use std::time::Duration;

use anyhow::Result as AnyResult;
use chrono::Utc;
use rayon::prelude::*;
use reqwest::blocking::Client;
use tracing::{debug, warn};

use crate::dedup::{self, Fingerprints};
use crate::error::{LedgerError, Result};
use crate::extract::Extractor;
use crate::http_client::{build_client, read_capped};
use crate::identity::IdentityResolver;
use crate::model::MatchId;
use crate::persist::{MatchPersistor, NewMatch};
use crate::store::Store;

/// Where submitted image references are downloaded from.
pub trait ImageSource: Send + Sync {
    fn fetch(&self, reference: &str) -> AnyResult<Vec<u8>>;
}

pub struct HttpImageSource {
    client: Client,
    max_bytes: usize,
}

impl HttpImageSource {
    pub fn new(timeout: Duration, max_bytes: usize) -> AnyResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            max_bytes,
        })
    }
}

impl ImageSource for HttpImageSource {
    fn fetch(&self, reference: &str) -> AnyResult<Vec<u8>> {
        let resp = self.client.get(reference).send()?;
        read_capped(resp, self.max_bytes)
    }
}

/// Collaborators one ingestion run needs.
#[derive(Clone, Copy)]
pub struct IngestContext<'a> {
    pub store: &'a Store,
    pub resolver: &'a IdentityResolver,
    pub extractor: &'a dyn Extractor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    Duplicate,
    Error,
}

#[derive(Debug)]
pub struct ItemOutcome {
    pub index: usize,
    pub result: Result<MatchId>,
}

impl ItemOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match &self.result {
            Ok(_) => OutcomeKind::Success,
            Err(err) if err.is_duplicate() => OutcomeKind::Duplicate,
            Err(_) => OutcomeKind::Error,
        }
    }
}

/// Per-item outcomes of one submission, in submission order.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub items: Vec<ItemOutcome>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.count(OutcomeKind::Success)
    }

    pub fn duplicates(&self) -> usize {
        self.count(OutcomeKind::Duplicate)
    }

    pub fn failed(&self) -> usize {
        self.count(OutcomeKind::Error)
    }

    pub fn match_ids(&self) -> Vec<MatchId> {
        self.items
            .iter()
            .filter_map(|item| item.result.as_ref().ok().copied())
            .collect()
    }

    fn count(&self, kind: OutcomeKind) -> usize {
        self.items.iter().filter(|item| item.kind() == kind).count()
    }
}

/// Runs every image of a submission through download, validation, extraction
/// and persistence on a bounded pool. Items fail independently.
pub struct IngestionCoordinator {
    pool: Option<rayon::ThreadPool>,
    max_image_bytes: usize,
}

impl IngestionCoordinator {
    pub fn new(parallelism: usize, max_image_bytes: usize) -> Self {
        Self {
            pool: build_ingest_pool(parallelism),
            max_image_bytes,
        }
    }

    pub fn submit_urls(
        &self,
        ctx: IngestContext<'_>,
        source: &dyn ImageSource,
        urls: &[String],
    ) -> BatchSummary {
        self.run(urls, |url| {
            let image = source.fetch(url).map_err(|err| {
                LedgerError::extraction(format!("download failed: {err:#}"))
            })?;
            self.process(ctx, &image)
        })
    }

    pub fn ingest_bytes(&self, ctx: IngestContext<'_>, images: &[Vec<u8>]) -> BatchSummary {
        self.run(images, |image| self.process(ctx, image))
    }

    fn run<T: Sync>(&self, items: &[T], work: impl Fn(&T) -> Result<MatchId> + Sync) -> BatchSummary {
        // Indexed parallel collect keeps submission order regardless of completion order.
        let items = with_ingest_pool(&self.pool, || {
            items
                .par_iter()
                .enumerate()
                .map(|(index, item)| {
                    let result = work(item);
                    if let Err(err) = &result
                        && !err.is_duplicate()
                    {
                        warn!(index, error = %err, "screenshot ingest failed");
                    }
                    ItemOutcome { index, result }
                })
                .collect::<Vec<_>>()
        });
        BatchSummary { items }
    }

    /// Single-image pipeline: validate, hash pre-check, extract, persist.
    pub fn process(&self, ctx: IngestContext<'_>, image: &[u8]) -> Result<MatchId> {
        validate_image(image, self.max_image_bytes)?;

        let content_hash = dedup::content_hash(image);
        let seen = {
            let conn = ctx.store.lock()?;
            dedup::hash_exists(&conn, &content_hash)?
        };
        if seen {
            debug!(hash = %&content_hash[..12], "duplicate upload skipped before extraction");
            return Err(LedgerError::DuplicateMatch);
        }

        let rows = ctx
            .extractor
            .extract(image)
            .map_err(|err| LedgerError::extraction(format!("{err:#}")))?;
        let new_match = NewMatch {
            fingerprints: Fingerprints {
                content_hash,
                signature: dedup::match_signature(&rows),
            },
            rows,
            created_at: Utc::now(),
        };
        MatchPersistor::new(ctx.store, ctx.resolver).persist(&new_match)
    }
}

fn validate_image(image: &[u8], max_bytes: usize) -> Result<()> {
    if image.is_empty() {
        return Err(LedgerError::extraction("empty image"));
    }
    if image.len() > max_bytes {
        return Err(LedgerError::extraction(format!(
            "image of {} bytes exceeds limit of {max_bytes}",
            image.len()
        )));
    }
    if !infer::is_image(image) {
        return Err(LedgerError::extraction("payload is not a recognized image"));
    }
    Ok(())
}

fn build_ingest_pool(threads: usize) -> Option<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|idx| format!("ingest-{idx}"))
        .build()
        .ok()
}

fn with_ingest_pool<T>(pool: &Option<rayon::ThreadPool>, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    if let Some(pool) = pool.as_ref() {
        pool.install(action)
    } else {
        action()
    }
}
