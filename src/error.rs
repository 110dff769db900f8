use derive_more::{Display, Error};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Display, Error)]
pub enum FetchError {
    #[display("Invalid feed URL: {_0}")]
    #[error(ignore)]
    InvalidUrl(String),
    #[display("Feed responded with HTTP {status} ({url})")]
    Status { status: u16, url: String },
    #[display("Download timed out after {}s", _0.as_secs())]
    #[error(ignore)]
    Timeout(Duration),
    #[display("Transport error: {_0}")]
    Transport(reqwest::Error),
    #[display("Unable to unpack archive: {_0}")]
    #[error(ignore)]
    Archive(String),
}

#[derive(Debug, Display, Error)]
pub enum ParseError {
    #[display("Invalid JSON: {_0}")]
    Json(serde_json::Error),
    #[display("No products array found")]
    NoProductArray,
    #[display("Invalid CSV: {_0}")]
    Csv(csv::Error),
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<csv::Error> for ParseError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

/// A single record that cannot become a product. Never aborts a run.
#[derive(Debug, Display, Error)]
pub enum ItemError {
    #[display("Missing title")]
    MissingTitle,
    #[display("Missing required field {_0}")]
    #[error(ignore)]
    MissingRequired(String),
    #[display("Invalid price for {_0}")]
    #[error(ignore)]
    InvalidPrice(String),
    #[display("Malformed record: {_0}")]
    #[error(ignore)]
    Malformed(String),
}

/// Returned by traversal callbacks when a stop was requested.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
#[display("Import cancelled")]
pub struct Cancelled;

#[derive(Debug, Display, Error)]
pub enum TraversalError {
    #[display("{_0}")]
    Parse(ParseError),
    #[display("{_0}")]
    Cancelled(Cancelled),
}

impl From<ParseError> for TraversalError {
    fn from(err: ParseError) -> Self {
        Self::Parse(err)
    }
}

impl From<Cancelled> for TraversalError {
    fn from(err: Cancelled) -> Self {
        Self::Cancelled(err)
    }
}

#[derive(Debug, Display, Error)]
pub enum ImportError {
    #[display("Import already running for feed {_0}")]
    #[error(ignore)]
    Conflict(Uuid),
    #[display("Download failed: {_0}")]
    Fetch(FetchError),
    #[display("Parse failed: {_0}")]
    Parse(ParseError),
    #[display("Import cancelled")]
    Cancelled,
}

impl From<FetchError> for ImportError {
    fn from(err: FetchError) -> Self {
        Self::Fetch(err)
    }
}

impl From<ParseError> for ImportError {
    fn from(err: ParseError) -> Self {
        Self::Parse(err)
    }
}

impl From<TraversalError> for ImportError {
    fn from(err: TraversalError) -> Self {
        match err {
            TraversalError::Parse(err) => Self::Parse(err),
            TraversalError::Cancelled(_) => Self::Cancelled,
        }
    }
}
