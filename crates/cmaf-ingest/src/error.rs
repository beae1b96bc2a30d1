use std::sync::Arc;

use reqwest::StatusCode;

/// Errors raised by a [`LiveSource`](crate::source::LiveSource) collaborator.
#[derive(Debug, thiserror::Error, Clone)]
pub enum SourceError {
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Manifest error: {0}")]
    Manifest(String),
    #[error("Availability error: {0}")]
    Availability(String),
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io {
            source: Arc::new(err),
        }
    }
}

/// Outcome of producing a single media segment.
///
/// `NotFound`, `TooEarly` and `Gone` end one representation's push only.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("segment not found: {0}")]
    NotFound(String),
    #[error("segment requested too early: {0}")]
    TooEarly(String),
    #[error("segment no longer available: {0}")]
    Gone(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

impl SegmentError {
    /// Whether this error only concerns the one segment it was raised for.
    pub fn is_unit_local(&self) -> bool {
        matches!(
            self,
            SegmentError::NotFound(_) | SegmentError::TooEarly(_) | SegmentError::Gone(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("CMAF ingester manager not running")]
    NotRunning,

    #[error("failed to get config from request: {0}")]
    ConfigResolution(#[source] SourceError),

    #[error("unknown asset {0:?}")]
    UnknownAsset(String),

    #[error("unknown content type: {0}")]
    UnsupportedContentType(String),

    #[error("duplicate representation id {0:?}")]
    DuplicateRepresentation(String),

    #[error("no init segment matching {0:?}")]
    InitMatch(String),

    #[error("time subtitles init segment: {0}")]
    TimeSubsInit(String),

    #[error("segment availability time: {0}")]
    AvailabilityComputation(#[source] SourceError),

    #[error("media segment production: {0}")]
    Production(String),

    #[error("unknown ingest session {0}")]
    UnknownSession(u64),

    #[error("ingest session {0} already started")]
    AlreadyStarted(u64),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("destination returned status code {0}")]
    StatusCode(StatusCode),
}
