use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("duplicate match detected")]
    DuplicateMatch,

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("persistence failure: {0:#}")]
    Persistence(#[source] anyhow::Error),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl From<anyhow::Error> for LedgerError {
    fn from(err: anyhow::Error) -> Self {
        LedgerError::Persistence(err)
    }
}

impl LedgerError {
    pub fn extraction(msg: impl Into<String>) -> Self {
        LedgerError::Extraction(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        LedgerError::NotFound(what.into())
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, LedgerError::DuplicateMatch)
    }

    /// Text safe to show an end user. Infrastructure details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::DuplicateMatch => "This match was already recorded.".to_string(),
            LedgerError::Extraction(_) => "Could not read the scoreboard from this image.".to_string(),
            LedgerError::Persistence(_) => "Something went wrong while saving. Try again later.".to_string(),
            LedgerError::Validation(msg) => msg.clone(),
            LedgerError::NotFound(what) => format!("{what} not found."),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
