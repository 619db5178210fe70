use thiserror::Error;

/// Failures from the persisted chat store. Read-side corruption is absorbed
/// by the store itself (a broken collection degrades to an empty one), so
/// these only surface from writes.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chat store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("chat store serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Everything that can terminate a send. Per-line decode problems inside the
/// response body are absorbed by the literal-text fallback and never appear
/// here.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("chat '{0}' does not exist")]
    UnknownChat(String),
    #[error("agent '{0}' is not configured")]
    UnknownAgent(String),
    #[error("a request is already in flight for chat '{0}'")]
    RequestInFlight(String),
    #[error("request to '{url}' failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("agent endpoint '{url}' returned HTTP {status}")]
    Http { url: String, status: u16 },
    #[error(transparent)]
    Storage(#[from] StoreError),
}
