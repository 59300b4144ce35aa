#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use scoreboard_ledger::{
    ExtractedRow, Extractor, ImageSource, IngestionCoordinator, LedgerService, Outcome, Store,
};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

pub fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

/// Bytes that pass image sniffing, unique per tag.
pub fn png(tag: &str) -> Vec<u8> {
    let mut out = PNG_MAGIC.to_vec();
    out.extend_from_slice(tag.as_bytes());
    out
}

pub fn row(name: &str, result: Outcome, k: u32, d: u32, a: u32) -> ExtractedRow {
    ExtractedRow::new(name, result, k, d, a)
}

/// Extractor that answers from a table keyed by image bytes.
#[derive(Default)]
pub struct ScriptedExtractor {
    answers: Mutex<HashMap<Vec<u8>, std::result::Result<Vec<ExtractedRow>, String>>>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(self, image: &[u8], rows: Vec<ExtractedRow>) -> Self {
        self.answers.lock().unwrap().insert(image.to_vec(), Ok(rows));
        self
    }

    pub fn fail(self, image: &[u8], msg: &str) -> Self {
        self.answers
            .lock()
            .unwrap()
            .insert(image.to_vec(), Err(msg.to_string()));
        self
    }
}

impl Extractor for ScriptedExtractor {
    fn extract(&self, image: &[u8]) -> Result<Vec<ExtractedRow>> {
        match self.answers.lock().unwrap().get(image) {
            Some(Ok(rows)) => Ok(rows.clone()),
            Some(Err(msg)) => Err(anyhow!(msg.clone())),
            None => Err(anyhow!("unrecognized scoreboard")),
        }
    }
}

/// Image source backed by an in-memory url table.
#[derive(Default)]
pub struct MapSource {
    images: HashMap<String, Vec<u8>>,
}

impl MapSource {
    pub fn with(mut self, url: &str, image: Vec<u8>) -> Self {
        self.images.insert(url.to_string(), image);
        self
    }
}

impl ImageSource for MapSource {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        self.images
            .get(reference)
            .cloned()
            .ok_or_else(|| anyhow!("http 404 Not Found"))
    }
}

pub fn service(extractor: ScriptedExtractor) -> LedgerService {
    service_with(extractor, MapSource::default(), 3)
}

pub fn service_with(extractor: ScriptedExtractor, source: MapSource, parallelism: usize) -> LedgerService {
    LedgerService::new(
        Store::open_in_memory().unwrap(),
        Box::new(extractor),
        Box::new(source),
        IngestionCoordinator::new(parallelism, 1024 * 1024),
    )
    .unwrap()
}
