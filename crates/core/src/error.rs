use thiserror::Error;

/// Problems with caller-supplied backup data. All of these are detected
/// before the store is touched.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("invalid restore request: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),
    #[error("invalid JSON file: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("invalid backup format: missing 'collections' section")]
    MissingCollections,
    #[error("invalid backup format: {0}")]
    InvalidShape(#[source] serde_json::Error),
    #[error("record must be a JSON object, found {0}")]
    NotAnObject(&'static str),
}
