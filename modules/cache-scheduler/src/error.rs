use thiserror::Error;

/// Domain-level errors. Fatal startup conditions aside, nothing here
/// crosses the HTTP boundary directly — handlers in `apps/cache-daemon`
/// map these to `daemon_errors::Problem`.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("queue store error: {0}")]
    QueueStore(String),

    #[error("queue store operation timed out")]
    QueueStoreTimeout,

    #[error("unknown host {0}")]
    UnknownHost(i64),

    #[error("unknown dimension {dimension_id} for host {host_id}")]
    UnknownDimension { host_id: i64, dimension_id: i64 },

    #[error("url normalization failed for {url}: {reason}")]
    UrlNormalization { url: String, reason: String },

    #[error("validation failed: {0}")]
    Validation(String),
}
