#[derive(thiserror::Error, Debug)]
pub enum KvStoreError {
    #[error("unknown area: {0}")]
    UnknownArea(String),
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("malformed peer message: {0}")]
    Malformed(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("operation timed out")]
    Timeout,
    #[error("subscriber queue overflowed; re-subscribe and re-snapshot")]
    SubscriberLagged,
    #[error("store is shutting down")]
    Shutdown,
}
