pub mod canonical;
pub mod config;
pub mod dedup;
pub mod error;
pub mod export;
pub mod extract;
pub mod http_client;
pub mod identity;
pub mod ingest;
pub mod model;
pub mod persist;
pub mod service;
pub mod stats;
pub mod store;

pub use error::{LedgerError, Result};
pub use extract::Extractor;
pub use ingest::{BatchSummary, ImageSource, IngestionCoordinator, OutcomeKind};
pub use model::{ExtractedRow, MatchId, Outcome, Player, PlayerId, PlayerStats, SortKey};
pub use service::LedgerService;
pub use stats::{LeaderboardRow, SeasonSettings};
pub use store::Store;
