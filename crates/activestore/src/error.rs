#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("missing identifier: {0}")]
    MissingIdentifier(String),

    #[error("invalid key: {0}")]
    KeyValidation(String),

    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("data corruption: {0}")]
    DataCorruption(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<activestore_memcache::Error> for StoreError {
    fn from(err: activestore_memcache::Error) -> Self {
        if activestore_memcache::is_connection_error(&err) {
            StoreError::BackendUnreachable(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}
